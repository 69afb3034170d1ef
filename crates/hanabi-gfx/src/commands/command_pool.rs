use ash::vk;
use itertools::Itertools;

use crate::foundation::physical_device::QueueFamily;
use crate::gfx::Gfx;

/// # Destroy
///
/// 需要手动调用 `destroy` 方法来释放资源。
pub struct GfxCommandPool {
    handle: vk::CommandPool,
    queue_family: QueueFamily,
}

// new & init
impl GfxCommandPool {
    pub fn new(queue_family: QueueFamily, flags: vk::CommandPoolCreateFlags, debug_name: &str) -> Self {
        let pool = unsafe {
            Gfx::get()
                .gfx_device()
                .create_command_pool(
                    &vk::CommandPoolCreateInfo::default().queue_family_index(queue_family.index).flags(flags),
                    None,
                )
                .unwrap()
        };

        Gfx::get().gfx_device().set_object_debug_name(pool, format!("CommandPool::{debug_name}"));
        Self {
            handle: pool,
            queue_family,
        }
    }
}

// getter
impl GfxCommandPool {
    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.handle
    }

    #[inline]
    pub fn queue_family(&self) -> &QueueFamily {
        &self.queue_family
    }
}

// tools
impl GfxCommandPool {
    /// 释放 pool 中所有 command buffer 的记录，buffer 本身回到初始状态
    pub fn reset(&self) {
        unsafe {
            Gfx::get()
                .gfx_device()
                .reset_command_pool(self.handle, vk::CommandPoolResetFlags::empty())
                .unwrap();
        }
    }

    pub fn free_command_buffers(&self, command_buffers: Vec<super::command_buffer::GfxCommandBuffer>) {
        let handles = command_buffers.iter().map(|cmd| cmd.vk_handle()).collect_vec();
        unsafe {
            Gfx::get().gfx_device().free_command_buffers(self.handle, &handles);
        }
    }
}

// destroy
impl GfxCommandPool {
    pub fn destroy(self) {
        unsafe {
            Gfx::get().gfx_device().destroy_command_pool(self.handle, None);
        }
    }
}
