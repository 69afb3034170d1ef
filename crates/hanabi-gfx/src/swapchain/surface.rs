use ash::vk;

use crate::gfx::Gfx;

/// window surface 封装
///
/// 由 host 提供的 raw handle 创建，引擎持有其生命周期。
pub struct GfxSurface {
    pub(crate) handle: vk::SurfaceKHR,
    pub(crate) surface_instance: ash::khr::surface::Instance,
}

impl GfxSurface {
    pub fn new(
        raw_display_handle: raw_window_handle::RawDisplayHandle,
        raw_window_handle: raw_window_handle::RawWindowHandle,
    ) -> Self {
        let gfx = Gfx::get();
        let handle = unsafe {
            ash_window::create_surface(
                gfx.vk_entry(),
                gfx.instance().ash_instance(),
                raw_display_handle,
                raw_window_handle,
                None,
            )
            .expect("failed to create window surface")
        };

        let surface_instance = ash::khr::surface::Instance::new(gfx.vk_entry(), gfx.instance().ash_instance());

        Self {
            handle,
            surface_instance,
        }
    }

    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// 实时获取 surface capabilities
    pub fn get_capabilities(&self) -> vk::SurfaceCapabilitiesKHR {
        unsafe {
            self.surface_instance
                .get_physical_device_surface_capabilities(Gfx::get().physical_device().vk_handle, self.handle)
                .unwrap()
        }
    }

    pub fn destroy(self) {
        unsafe {
            self.surface_instance.destroy_surface(self.handle, None);
        }
    }
}
