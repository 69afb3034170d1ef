use ash::vk;

use crate::foundation::debug_messenger::DebugType;
use crate::gfx::Gfx;

/// # Destroy
///
/// 可以 Clone，因此需要手动 destroy。
#[derive(Clone)]
pub struct GfxSemaphore {
    semaphore: vk::Semaphore,
}

impl DebugType for GfxSemaphore {
    fn debug_type_name() -> &'static str {
        "GfxSemaphore"
    }

    fn vk_handle(&self) -> impl vk::Handle + Copy {
        self.semaphore
    }
}

impl GfxSemaphore {
    pub fn new(debug_name: &str) -> Self {
        let semaphore =
            unsafe { Gfx::get().gfx_device().create_semaphore(&vk::SemaphoreCreateInfo::default(), None).unwrap() };

        let semaphore = Self { semaphore };
        Gfx::get().gfx_device().set_debug_name(&semaphore, debug_name);
        semaphore
    }

    /// 创建 timeline semaphore
    pub fn new_timeline(initial_value: u64, debug_name: &str) -> Self {
        let mut timeline_type_ci = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let timeline_semaphore_ci = vk::SemaphoreCreateInfo::default().push_next(&mut timeline_type_ci);
        let semaphore = unsafe { Gfx::get().gfx_device().create_semaphore(&timeline_semaphore_ci, None).unwrap() };

        let semaphore = Self { semaphore };
        Gfx::get().gfx_device().set_debug_name(&semaphore, debug_name);
        semaphore
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }

    /// 阻塞等待 timeline 值
    #[inline]
    pub fn wait_timeline(&self, timeline_value: u64, timeout_ns: u64) {
        unsafe {
            let wait_semaphore = [self.semaphore];
            let wait_info = vk::SemaphoreWaitInfo::default()
                .semaphores(&wait_semaphore)
                .values(std::slice::from_ref(&timeline_value));
            Gfx::get().gfx_device().wait_semaphores(&wait_info, timeout_ns).unwrap();
        }
    }

    /// 非阻塞查询 timeline 当前值
    #[inline]
    pub fn counter_value(&self) -> u64 {
        unsafe { Gfx::get().gfx_device().get_semaphore_counter_value(self.semaphore).unwrap_or(0) }
    }

    #[inline]
    pub fn destroy(self) {
        unsafe {
            Gfx::get().gfx_device().destroy_semaphore(self.semaphore, None);
        }
    }
}
