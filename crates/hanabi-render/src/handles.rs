use slotmap::{new_key_type, Key, KeyData};

// 渲染资源的强类型句柄
// slotmap 的 generational index：slot 被释放后 generation 递增，
// 旧句柄在逻辑层即可检测失效。32 位 generation 视为实际使用中不会回绕。
new_key_type! {
    pub struct BufferHandle;
    pub struct TextureHandle;
    pub struct SamplerHandle;
    pub struct ShaderHandle;
    pub struct ShaderGroupHandle;
    pub struct PipelineStateHandle;
    pub struct BindGroupLayoutHandle;
    pub struct BindGroupHandle;
    pub struct RenderPassHandle;
    pub struct FrameBufferHandle;
    pub struct StaticMeshHandle;
    pub struct MaterialHandle;
    pub struct SemaphoreHandle;
}

/// 句柄与 asset 层 `(index, generation)` 裸表示之间的转换
pub trait RawHandle: Key {
    /// 裸 64 位表示：高 32 位 generation，低 32 位 index
    fn as_raw(&self) -> u64 {
        self.data().as_ffi()
    }

    fn from_raw(raw: u64) -> Self {
        Self::from(KeyData::from_ffi(raw))
    }

    /// 句柄的 slot 序号，也是 bindless 数组中的下标
    fn slot_index(&self) -> u32 {
        (self.data().as_ffi() & 0xFFFF_FFFF) as u32
    }
}

impl<T: Key> RawHandle for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn test_raw_roundtrip() {
        let mut pool: SlotMap<TextureHandle, u32> = SlotMap::with_key();
        let handle = pool.insert(7);

        let raw = handle.as_raw();
        let back = TextureHandle::from_raw(raw);
        assert_eq!(handle, back);
        assert_eq!(pool.get(back), Some(&7));
    }

    #[test]
    fn test_generation_invalidates_stale_handle() {
        let mut pool: SlotMap<TextureHandle, u32> = SlotMap::with_key();
        let old = pool.insert(1);
        pool.remove(old);
        let new = pool.insert(2);

        // 同一个 slot，新旧 generation 不同
        assert_eq!(old.slot_index(), new.slot_index());
        assert!(!pool.contains_key(old));
        assert!(pool.contains_key(new));
    }
}
