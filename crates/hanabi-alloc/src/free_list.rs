/// 空闲块，按 offset 升序存放
#[derive(Clone, Copy, Debug)]
struct FreeBlock {
    offset: u64,
    size: u64,
}

/// first-fit 空闲链表分配器
///
/// 管理 `[0, capacity)` 的偏移区间，不直接持有内存。
/// 用途:
/// 1. 作为 transfer buffer 的子分配器，offset 即 GPU 侧的拷贝源偏移。
/// 2. 长生命期的异构分配（asset 数据、反射数据）。
///
/// 释放时与相邻空闲块合并，避免碎片累积。
pub struct FreeListAllocator {
    name: String,
    capacity: u64,

    /// 按 offset 升序的空闲块
    free_blocks: Vec<FreeBlock>,
    /// 已分配块: offset -> size（含对齐前导）
    allocations: std::collections::HashMap<u64, (u64, u64)>,
}

// new & init
impl FreeListAllocator {
    pub fn new(capacity: u64, name: impl Into<String>) -> Self {
        assert!(capacity > 0);
        Self {
            name: name.into(),
            capacity,
            free_blocks: vec![FreeBlock { offset: 0, size: capacity }],
            allocations: Default::default(),
        }
    }
}

// getter
impl FreeListAllocator {
    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    #[inline]
    pub fn used(&self) -> u64 {
        self.capacity - self.free_blocks.iter().map(|b| b.size).sum::<u64>()
    }

    #[inline]
    pub fn allocation_count(&self) -> usize {
        self.allocations.len()
    }
}

// tools
impl FreeListAllocator {
    /// 分配一段区间，返回对齐后的 offset
    pub fn alloc(&mut self, size: u64, align: u64) -> Option<u64> {
        assert!(size > 0);
        assert!(align.is_power_of_two());

        for (block_idx, block) in self.free_blocks.iter().copied().enumerate() {
            let aligned = (block.offset + align - 1) & !(align - 1);
            let padding = aligned - block.offset;
            if padding + size > block.size {
                continue;
            }

            let consumed = padding + size;
            if consumed == block.size {
                self.free_blocks.remove(block_idx);
            } else {
                let b = &mut self.free_blocks[block_idx];
                b.offset += consumed;
                b.size -= consumed;
            }

            // 记录块起点，前导 padding 随块一起归还
            self.allocations.insert(aligned, (block.offset, consumed));
            return Some(aligned);
        }

        log::error!("FreeListAllocator[{}] exhausted: size = {}, align = {}", self.name, size, align);
        None
    }

    /// 归还一段区间，与相邻空闲块合并
    pub fn free(&mut self, offset: u64) {
        let (block_offset, block_size) =
            self.allocations.remove(&offset).unwrap_or_else(|| panic!("free of unknown offset {offset}"));

        let insert_idx = self.free_blocks.partition_point(|b| b.offset < block_offset);
        self.free_blocks.insert(
            insert_idx,
            FreeBlock {
                offset: block_offset,
                size: block_size,
            },
        );

        // 与后一块合并
        if insert_idx + 1 < self.free_blocks.len() {
            let next = self.free_blocks[insert_idx + 1];
            let current = self.free_blocks[insert_idx];
            if current.offset + current.size == next.offset {
                self.free_blocks[insert_idx].size += next.size;
                self.free_blocks.remove(insert_idx + 1);
            }
        }
        // 与前一块合并
        if insert_idx > 0 {
            let prev = self.free_blocks[insert_idx - 1];
            let current = self.free_blocks[insert_idx];
            if prev.offset + prev.size == current.offset {
                self.free_blocks[insert_idx - 1].size += current.size;
                self.free_blocks.remove(insert_idx);
            }
        }
    }

    /// 重新分配：新区间分配成功后才释放旧区间
    ///
    /// 返回新的 offset。数据搬运由调用者负责（分配器不持有内存）。
    pub fn realloc(&mut self, offset: u64, new_size: u64, align: u64) -> Option<u64> {
        let new_offset = self.alloc(new_size, align)?;
        self.free(offset);
        Some(new_offset)
    }

    /// 归还所有分配
    pub fn reset(&mut self) {
        self.allocations.clear();
        self.free_blocks.clear();
        self.free_blocks.push(FreeBlock {
            offset: 0,
            size: self.capacity,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_free_roundtrip() {
        let mut allocator = FreeListAllocator::new(1024, "test");
        let a = allocator.alloc(100, 4).unwrap();
        let b = allocator.alloc(200, 4).unwrap();
        assert_ne!(a, b);
        assert_eq!(allocator.allocation_count(), 2);

        allocator.free(a);
        allocator.free(b);
        assert_eq!(allocator.used(), 0);
        assert_eq!(allocator.allocation_count(), 0);
    }

    #[test]
    fn test_coalescing_restores_full_block() {
        let mut allocator = FreeListAllocator::new(1024, "test");
        let a = allocator.alloc(256, 4).unwrap();
        let b = allocator.alloc(256, 4).unwrap();
        let c = allocator.alloc(256, 4).unwrap();

        // 乱序释放，相邻块应当合并回一整块
        allocator.free(b);
        allocator.free(a);
        allocator.free(c);

        let d = allocator.alloc(1024, 4).unwrap();
        assert_eq!(d, 0);
    }

    #[test]
    fn test_alignment_padding_returned_on_free() {
        let mut allocator = FreeListAllocator::new(1024, "test");
        allocator.alloc(3, 1).unwrap();
        let aligned = allocator.alloc(64, 256).unwrap();
        assert_eq!(aligned % 256, 0);

        allocator.free(aligned);
        // padding 已随块归还，完整容量可重新分配
        let rest = allocator.alloc(1021, 1);
        assert!(rest.is_some());
    }

    #[test]
    fn test_exhaustion_returns_none() {
        let mut allocator = FreeListAllocator::new(128, "test");
        assert!(allocator.alloc(129, 1).is_none());
        let a = allocator.alloc(128, 1).unwrap();
        assert!(allocator.alloc(1, 1).is_none());
        allocator.free(a);
        assert!(allocator.alloc(1, 1).is_some());
    }

    #[test]
    fn test_realloc_moves_allocation() {
        let mut allocator = FreeListAllocator::new(1024, "test");
        let a = allocator.alloc(100, 4).unwrap();
        let _b = allocator.alloc(100, 4).unwrap();
        let a2 = allocator.realloc(a, 300, 4).unwrap();
        assert_ne!(a, a2);
        assert_eq!(allocator.allocation_count(), 2);
    }
}
