use ash::vk;
use itertools::Itertools;

use crate::commands::fence::GfxFence;
use crate::commands::submit_info::GfxSubmitInfo;
use crate::foundation::physical_device::QueueFamily;
use crate::gfx::Gfx;

/// 命令队列封装
///
/// queue 的提交和 present 必须串行，调用方通过 render commands mutex 保证。
pub struct GfxCommandQueue {
    handle: vk::Queue,
    queue_family: QueueFamily,
}

// new & init
impl GfxCommandQueue {
    pub(crate) fn from_device(device: &ash::Device, queue_family: QueueFamily, queue_index: u32) -> Self {
        let handle = unsafe { device.get_device_queue(queue_family.index, queue_index) };
        Self { handle, queue_family }
    }
}

// getter
impl GfxCommandQueue {
    #[inline]
    pub fn handle(&self) -> vk::Queue {
        self.handle
    }

    #[inline]
    pub fn queue_family(&self) -> &QueueFamily {
        &self.queue_family
    }
}

// tools
impl GfxCommandQueue {
    pub fn submit(&self, submit_infos: Vec<GfxSubmitInfo>, fence: Option<&GfxFence>) {
        let infos = submit_infos.iter().map(|info| info.submit_info()).collect_vec();
        unsafe {
            Gfx::get()
                .gfx_device()
                .queue_submit2(self.handle, &infos, fence.map_or(vk::Fence::null(), |f| f.handle()))
                .unwrap();
        }
    }

    pub fn wait_idle(&self) {
        unsafe {
            Gfx::get().gfx_device().queue_wait_idle(self.handle).unwrap();
        }
    }
}
