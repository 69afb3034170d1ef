use ash::vk;

use crate::foundation::debug_messenger::DebugType;
use crate::gfx::Gfx;

/// # Destroy
///
/// 可以 Clone，因此需要手动 destroy。
#[derive(Clone)]
pub struct GfxFence {
    fence: vk::Fence,
}

impl DebugType for GfxFence {
    fn debug_type_name() -> &'static str {
        "GfxFence"
    }

    fn vk_handle(&self) -> impl vk::Handle + Copy {
        self.fence
    }
}

impl GfxFence {
    /// # param
    /// * signaled - 是否创建时就 signaled
    pub fn new(signaled: bool, debug_name: &str) -> Self {
        let fence_flags = if signaled { vk::FenceCreateFlags::SIGNALED } else { vk::FenceCreateFlags::empty() };
        let fence = unsafe {
            Gfx::get()
                .gfx_device()
                .create_fence(&vk::FenceCreateInfo::default().flags(fence_flags), None)
                .unwrap()
        };

        let fence = Self { fence };
        Gfx::get().gfx_device().set_debug_name(&fence, debug_name);
        fence
    }

    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// 阻塞等待 fence
    #[inline]
    pub fn wait(&self) {
        unsafe {
            Gfx::get()
                .gfx_device()
                .wait_for_fences(std::slice::from_ref(&self.fence), true, u64::MAX)
                .unwrap();
        }
    }

    #[inline]
    pub fn reset(&self) {
        unsafe {
            Gfx::get().gfx_device().reset_fences(std::slice::from_ref(&self.fence)).unwrap();
        }
    }

    #[inline]
    pub fn destroy(self) {
        unsafe {
            Gfx::get().gfx_device().destroy_fence(self.fence, None);
        }
    }
}
