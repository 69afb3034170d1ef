use std::marker::PhantomData;

use crate::arena::MemoryArena;

/// 每个线程的 scratch arena 容量
const SCRATCH_ARENA_SIZE: usize = 4 * 1024 * 1024;

thread_local! {
    static SCRATCH_ARENA: MemoryArena = MemoryArena::new(SCRATCH_ARENA_SIZE);
}

/// 线程本地的临时分配作用域
///
/// Drop 时恢复本线程 scratch arena 的 offset。
/// 不能跨线程传递，作用域释放必须发生在每条退出路径上。
pub struct ScratchRegion {
    arena: *const MemoryArena,
    saved_offset: usize,

    /// scratch 绑定在创建它的线程上
    _not_send: PhantomData<*const u8>,
}

impl ScratchRegion {
    #[inline]
    pub fn arena(&self) -> &MemoryArena {
        // 线程本地 arena 的生命期覆盖本线程上所有 ScratchRegion
        unsafe { &*self.arena }
    }
}

impl Drop for ScratchRegion {
    fn drop(&mut self) {
        self.arena().reset_to(self.saved_offset);
    }
}

impl MemoryArena {
    /// 仅供 scratch 作用域恢复使用
    #[inline]
    pub(crate) fn reset_to(&self, offset: usize) {
        assert!(offset <= self.offset());
        self.set_offset(offset);
    }
}

/// 获取当前线程的 scratch 作用域
///
/// 嵌套使用时按栈序回退，内层作用域的释放不影响外层已分配的内容。
pub fn scratch() -> ScratchRegion {
    SCRATCH_ARENA.with(|arena| ScratchRegion {
        arena: arena as *const MemoryArena,
        saved_offset: arena.offset(),
        _not_send: PhantomData,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scratch_restores_offset() {
        let before = SCRATCH_ARENA.with(|a| a.offset());
        {
            let s = scratch();
            s.arena().alloc(1024, 8);
        }
        let after = SCRATCH_ARENA.with(|a| a.offset());
        assert_eq!(before, after);
    }

    #[test]
    fn test_scratch_nesting() {
        let outer = scratch();
        let a = outer.arena().alloc(64, 8);
        {
            let inner = scratch();
            inner.arena().alloc(128, 8);
        }
        // 内层释放后，外层的分配仍然有效（offset 只回退到内层进入点）
        let b = outer.arena().alloc(64, 8);
        assert_ne!(a.as_ptr(), b.as_ptr());
    }

    #[test]
    fn test_scratch_is_per_thread() {
        let s = scratch();
        s.arena().alloc(512, 8);
        let handle = std::thread::spawn(|| {
            let t = scratch();
            t.arena().alloc(16, 8);
            t.arena().offset()
        });
        // 另一个线程的 scratch 不受本线程分配影响
        assert_eq!(handle.join().unwrap(), 16);
    }
}
