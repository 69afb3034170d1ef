use ash::vk;
use itertools::Itertools;

use crate::commands::barrier::{GfxBufferBarrier, GfxImageBarrier};
use crate::commands::command_pool::GfxCommandPool;
use crate::gfx::Gfx;

/// # Destroy
///
/// 跟随 command pool 一起释放，或通过 pool 的 free_command_buffers。
#[derive(Clone)]
pub struct GfxCommandBuffer {
    handle: vk::CommandBuffer,
}

// new & init
impl GfxCommandBuffer {
    pub fn new(pool: &GfxCommandPool, debug_name: &str) -> Self {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool.handle())
            .command_buffer_count(1)
            .level(vk::CommandBufferLevel::PRIMARY);

        let handle = unsafe { Gfx::get().gfx_device().allocate_command_buffers(&info).unwrap()[0] };
        Gfx::get().gfx_device().set_object_debug_name(handle, format!("CommandBuffer::{debug_name}"));
        Self { handle }
    }
}

// getter
impl GfxCommandBuffer {
    #[inline]
    pub fn vk_handle(&self) -> vk::CommandBuffer {
        self.handle
    }
}

// 录制控制
impl GfxCommandBuffer {
    pub fn begin(&self, usage: vk::CommandBufferUsageFlags, label: &str) {
        let device = Gfx::get().gfx_device();
        unsafe {
            device
                .begin_command_buffer(self.handle, &vk::CommandBufferBeginInfo::default().flags(usage))
                .unwrap();
        }
        self.begin_label(label, [0.2, 0.8, 0.2, 1.0]);
    }

    pub fn end(&self) {
        self.end_label();
        unsafe {
            Gfx::get().gfx_device().end_command_buffer(self.handle).unwrap();
        }
    }

    pub fn reset(&self) {
        unsafe {
            Gfx::get()
                .gfx_device()
                .reset_command_buffer(self.handle, vk::CommandBufferResetFlags::empty())
                .unwrap();
        }
    }

    fn begin_label(&self, label: &str, color: [f32; 4]) {
        let label_name = std::ffi::CString::new(label).unwrap();
        unsafe {
            Gfx::get().gfx_device().debug_utils().cmd_begin_debug_utils_label(
                self.handle,
                &vk::DebugUtilsLabelEXT::default().label_name(label_name.as_c_str()).color(color),
            );
        }
    }

    fn end_label(&self) {
        unsafe {
            Gfx::get().gfx_device().debug_utils().cmd_end_debug_utils_label(self.handle);
        }
    }
}

// render pass
impl GfxCommandBuffer {
    pub fn begin_render_pass(
        &self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        render_area: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    ) {
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: render_area,
            })
            .clear_values(clear_values);

        unsafe {
            Gfx::get()
                .gfx_device()
                .cmd_begin_render_pass(self.handle, &begin_info, vk::SubpassContents::INLINE);
        }
    }

    pub fn end_render_pass(&self) {
        unsafe {
            Gfx::get().gfx_device().cmd_end_render_pass(self.handle);
        }
    }
}

// 状态绑定
impl GfxCommandBuffer {
    #[inline]
    pub fn bind_graphics_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe {
            Gfx::get()
                .gfx_device()
                .cmd_bind_pipeline(self.handle, vk::PipelineBindPoint::GRAPHICS, pipeline);
        }
    }

    #[inline]
    pub fn bind_descriptor_sets(
        &self,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        unsafe {
            Gfx::get().gfx_device().cmd_bind_descriptor_sets(
                self.handle,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                first_set,
                sets,
                dynamic_offsets,
            );
        }
    }

    #[inline]
    pub fn bind_vertex_buffers(&self, first_binding: u32, buffers: &[vk::Buffer], offsets: &[vk::DeviceSize]) {
        unsafe {
            Gfx::get()
                .gfx_device()
                .cmd_bind_vertex_buffers(self.handle, first_binding, buffers, offsets);
        }
    }

    #[inline]
    pub fn bind_index_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, index_type: vk::IndexType) {
        unsafe {
            Gfx::get().gfx_device().cmd_bind_index_buffer(self.handle, buffer, offset, index_type);
        }
    }

    /// y 轴方向的翻转由投影矩阵承担，viewport 保持正向
    pub fn set_viewport(&self, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        unsafe {
            Gfx::get().gfx_device().cmd_set_viewport(self.handle, 0, std::slice::from_ref(&viewport));
            Gfx::get().gfx_device().cmd_set_scissor(self.handle, 0, std::slice::from_ref(&scissor));
        }
    }
}

// 绘制与拷贝
impl GfxCommandBuffer {
    #[inline]
    pub fn draw_indexed(
        &self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            Gfx::get().gfx_device().cmd_draw_indexed(
                self.handle,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }

    pub fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy2]) {
        let copy_info = vk::CopyBufferInfo2::default().src_buffer(src).dst_buffer(dst).regions(regions);
        unsafe {
            Gfx::get().gfx_device().cmd_copy_buffer2(self.handle, &copy_info);
        }
    }

    pub fn copy_buffer_to_image(&self, copy_info: &vk::CopyBufferToImageInfo2) {
        unsafe {
            Gfx::get().gfx_device().cmd_copy_buffer_to_image2(self.handle, copy_info);
        }
    }

    pub fn blit_image(&self, blit_info: &vk::BlitImageInfo2) {
        unsafe {
            Gfx::get().gfx_device().cmd_blit_image2(self.handle, blit_info);
        }
    }

    /// 用于小数据量的 inline 更新，size 必须 <= 65536 且 4 对齐
    pub fn update_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) {
        unsafe {
            Gfx::get().gfx_device().cmd_update_buffer(self.handle, buffer, offset, data);
        }
    }
}

// barrier
impl GfxCommandBuffer {
    pub fn image_memory_barrier(&self, dependency_flags: vk::DependencyFlags, barriers: &[GfxImageBarrier]) {
        let barriers = barriers.iter().map(|b| *b.inner()).collect_vec();
        let dependency_info =
            vk::DependencyInfo::default().image_memory_barriers(&barriers).dependency_flags(dependency_flags);
        unsafe {
            Gfx::get().gfx_device().cmd_pipeline_barrier2(self.handle, &dependency_info);
        }
    }

    pub fn buffer_memory_barrier(&self, dependency_flags: vk::DependencyFlags, barriers: &[GfxBufferBarrier]) {
        let barriers = barriers.iter().map(|b| *b.inner()).collect_vec();
        let dependency_info =
            vk::DependencyInfo::default().buffer_memory_barriers(&barriers).dependency_flags(dependency_flags);
        unsafe {
            Gfx::get().gfx_device().cmd_pipeline_barrier2(self.handle, &dependency_info);
        }
    }
}
