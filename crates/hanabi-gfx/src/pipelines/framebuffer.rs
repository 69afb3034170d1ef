use ash::vk;

use crate::gfx::Gfx;
use crate::pipelines::render_pass::GfxRenderPass;

/// # Destroy
///
/// 需要手动调用 `destroy` 方法来释放资源。
pub struct GfxFramebuffer {
    handle: vk::Framebuffer,
    extent: vk::Extent2D,
}

// new & init
impl GfxFramebuffer {
    /// attachment view 的顺序必须与 render pass 的 attachment 声明一致:
    /// colors, resolves, depth
    pub fn new(render_pass: &GfxRenderPass, views: &[vk::ImageView], extent: vk::Extent2D, debug_name: &str) -> Self {
        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass.handle())
            .attachments(views)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let handle = unsafe { Gfx::get().gfx_device().create_framebuffer(&create_info, None).unwrap() };
        Gfx::get().gfx_device().set_object_debug_name(handle, format!("Framebuffer::{debug_name}"));

        Self { handle, extent }
    }
}

// getter
impl GfxFramebuffer {
    #[inline]
    pub fn handle(&self) -> vk::Framebuffer {
        self.handle
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

// destroy
impl GfxFramebuffer {
    pub fn destroy(self) {
        unsafe {
            Gfx::get().gfx_device().destroy_framebuffer(self.handle, None);
        }
    }
}
