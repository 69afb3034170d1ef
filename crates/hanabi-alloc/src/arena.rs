use std::alloc::Layout;
use std::cell::Cell;
use std::ptr::NonNull;

/// 区域的基础对齐，足够容纳所有 GPU POD 类型
const ARENA_BASE_ALIGN: usize = 64;

/// 线性分配器 (bump allocator)
///
/// 在一块连续内存上向后推进 offset 进行分配，容量在创建时固定。
/// 耗尽视为启动期容量配置错误，直接 panic。
///
/// # Destroy
///
/// 持有内存的 arena 在 Drop 时释放；sub arena 只借用父区域，不释放。
pub struct MemoryArena {
    base: NonNull<u8>,
    capacity: usize,
    offset: Cell<usize>,

    /// sub arena 不拥有内存
    owns_memory: bool,
}

// new & init
impl MemoryArena {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        let layout = Layout::from_size_align(capacity, ARENA_BASE_ALIGN).unwrap();
        let base = unsafe { std::alloc::alloc(layout) };
        let base = NonNull::new(base).expect("MemoryArena allocation failed");

        Self {
            base,
            capacity,
            offset: Cell::new(0),
            owns_memory: true,
        }
    }

    /// 从当前 arena 的尾部切出一个子 arena
    ///
    /// 子区域占用父区域的 offset 空间，生命期由借用约束在父区域之内。
    pub fn create_sub_arena(&self, capacity: usize) -> MemoryArena {
        let base = self.alloc(capacity, ARENA_BASE_ALIGN);
        MemoryArena {
            base,
            capacity,
            offset: Cell::new(0),
            owns_memory: false,
        }
    }
}

impl Drop for MemoryArena {
    fn drop(&mut self) {
        if self.owns_memory {
            let layout = Layout::from_size_align(self.capacity, ARENA_BASE_ALIGN).unwrap();
            unsafe { std::alloc::dealloc(self.base.as_ptr(), layout) };
        }
    }
}

// getter
impl MemoryArena {
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset.get()
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.capacity - self.offset.get()
    }
}

// tools
impl MemoryArena {
    pub fn alloc(&self, size: usize, align: usize) -> NonNull<u8> {
        debug_assert!(align.is_power_of_two());

        let aligned = (self.offset.get() + align - 1) & !(align - 1);
        let new_offset = aligned + size;
        assert!(new_offset <= self.capacity, "MemoryArena exhausted: capacity = {}", self.capacity);

        self.offset.set(new_offset);
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(aligned)) }
    }

    /// 分配一段清零的类型化切片
    ///
    /// # Safety
    ///
    /// 返回切片的生命期绑定在 `&self` 上，但 arena 本身不跟踪别名；
    /// 调用者保证在 `reset` 或作用域回退之前不再访问该切片。
    pub unsafe fn alloc_slice<T: bytemuck::Zeroable>(&self, count: usize) -> &mut [T] {
        let ptr = self.alloc(count * size_of::<T>(), align_of::<T>()).as_ptr() as *mut T;
        unsafe {
            std::ptr::write_bytes(ptr as *mut u8, 0, count * size_of::<T>());
            std::slice::from_raw_parts_mut(ptr, count)
        }
    }

    /// 回退到空状态，已分配内容全部失效
    #[inline]
    pub fn reset(&self) {
        self.offset.set(0);
    }

    #[inline]
    pub(crate) fn set_offset(&self, offset: usize) {
        self.offset.set(offset);
    }

    /// 开启一个临时作用域，守卫 Drop 时恢复 offset
    #[inline]
    pub fn begin_temp(&self) -> TempRegion<'_> {
        TempRegion {
            arena: self,
            saved_offset: self.offset.get(),
        }
    }
}

/// 临时分配作用域
///
/// 保证无论从哪条路径离开作用域，arena 的 offset 都会恢复到进入时的值。
pub struct TempRegion<'a> {
    arena: &'a MemoryArena,
    saved_offset: usize,
}

impl TempRegion<'_> {
    #[inline]
    pub fn arena(&self) -> &MemoryArena {
        self.arena
    }
}

impl Drop for TempRegion<'_> {
    fn drop(&mut self) {
        self.arena.offset.set(self.saved_offset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_respects_alignment() {
        let arena = MemoryArena::new(1024);
        arena.alloc(3, 1);
        let ptr = arena.alloc(16, 16);
        assert_eq!(ptr.as_ptr() as usize % 16, 0);
    }

    #[test]
    fn test_temp_region_restores_offset() {
        let arena = MemoryArena::new(1024);
        arena.alloc(100, 8);
        let before = arena.offset();
        {
            let temp = arena.begin_temp();
            temp.arena().alloc(256, 8);
            assert!(arena.offset() > before);
        }
        assert_eq!(arena.offset(), before);
    }

    #[test]
    fn test_temp_region_restores_on_early_exit() {
        let arena = MemoryArena::new(1024);
        let before = arena.offset();
        let exercise = |fail: bool| -> Result<(), ()> {
            let temp = arena.begin_temp();
            temp.arena().alloc(64, 8);
            if fail {
                return Err(());
            }
            Ok(())
        };
        assert!(exercise(true).is_err());
        assert_eq!(arena.offset(), before);
    }

    #[test]
    fn test_sub_arena_is_independent() {
        let arena = MemoryArena::new(1024);
        let sub = arena.create_sub_arena(256);
        let parent_offset = arena.offset();
        sub.alloc(128, 8);
        assert_eq!(arena.offset(), parent_offset);
        assert_eq!(sub.remaining(), 128);
    }

    #[test]
    #[should_panic]
    fn test_exhaustion_panics() {
        let arena = MemoryArena::new(64);
        arena.alloc(128, 8);
    }
}
