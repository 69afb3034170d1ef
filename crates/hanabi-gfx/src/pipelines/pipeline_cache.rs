use ash::vk;

use crate::gfx::Gfx;

/// 缓存文件头，按设备区分缓存
const CACHE_MAGIC: u32 = 0x48414243; // "HABC"

/// pipeline cache
///
/// 持久化为带 `(vendor_id, device_id)` 前缀的二进制 blob，
/// 换卡或换驱动导致不匹配时静默丢弃缓存。
///
/// # Destroy
///
/// 需要手动调用 `destroy` 方法来释放资源。
pub struct GfxPipelineCache {
    handle: vk::PipelineCache,
}

// new & init
impl GfxPipelineCache {
    pub fn new(cache_path: Option<&std::path::Path>) -> Self {
        let initial_data = cache_path.and_then(Self::load_cache_blob).unwrap_or_default();

        let create_info = vk::PipelineCacheCreateInfo::default().initial_data(&initial_data);
        let handle = unsafe { Gfx::get().gfx_device().create_pipeline_cache(&create_info, None).unwrap() };
        Gfx::get().gfx_device().set_object_debug_name(handle, "PipelineCache::main");

        Self { handle }
    }

    fn load_cache_blob(path: &std::path::Path) -> Option<Vec<u8>> {
        let bytes = std::fs::read(path).ok()?;
        if bytes.len() < 12 {
            return None;
        }

        let magic = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let vendor_id = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let device_id = u32::from_le_bytes(bytes[8..12].try_into().unwrap());

        let pdevice = Gfx::get().physical_device();
        if magic != CACHE_MAGIC || vendor_id != pdevice.vendor_id() || device_id != pdevice.device_id() {
            log::warn!("pipeline cache rejected: vendor/device mismatch, rebuilding");
            return None;
        }

        Some(bytes[12..].to_vec())
    }
}

// getter
impl GfxPipelineCache {
    #[inline]
    pub fn handle(&self) -> vk::PipelineCache {
        self.handle
    }
}

// tools
impl GfxPipelineCache {
    /// 把当前缓存数据写回磁盘
    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let data = unsafe { Gfx::get().gfx_device().get_pipeline_cache_data(self.handle)? };

        let pdevice = Gfx::get().physical_device();
        let mut blob = Vec::with_capacity(12 + data.len());
        blob.extend_from_slice(&CACHE_MAGIC.to_le_bytes());
        blob.extend_from_slice(&pdevice.vendor_id().to_le_bytes());
        blob.extend_from_slice(&pdevice.device_id().to_le_bytes());
        blob.extend_from_slice(&data);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, blob)?;
        log::info!("pipeline cache saved to {path:?}");
        Ok(())
    }
}

// destroy
impl GfxPipelineCache {
    pub fn destroy(self) {
        unsafe {
            Gfx::get().gfx_device().destroy_pipeline_cache(self.handle, None);
        }
    }
}
