use std::collections::VecDeque;

use ash::vk;
use hanabi_alloc::FreeListAllocator;
use hanabi_gfx::commands::barrier::GfxImageBarrier;
use hanabi_gfx::commands::command_buffer::GfxCommandBuffer;
use hanabi_gfx::commands::command_pool::GfxCommandPool;
use hanabi_gfx::commands::semaphore::GfxSemaphore;
use hanabi_gfx::commands::submit_info::GfxSubmitInfo;
use hanabi_gfx::gfx::Gfx;
use hanabi_gfx::resources::buffer::GfxBuffer;
use hanabi_gfx::resources::image::GfxImage;

use crate::settings::TRANSFER_BUFFER_SIZE;

/// 一组上传分配，生命期由一个 semaphore 守护
///
/// semaphore signal 之后，组内的 free-list 区间才允许归还。
struct AllocationGroup {
    name: String,
    semaphore: GfxSemaphore,
    /// free-list 中的分配起点
    pending_allocations: Vec<u64>,
    command_buffer: GfxCommandBuffer,
    /// mip 生成走 graphics queue，其余走 transfer queue
    uses_gfx_queue: bool,
}

/// 传输管理器
///
/// 维护一块大的 host 可见 transfer buffer（free-list 子分配），
/// 所有上传 payload 都写进这块 buffer；`mapped_base + offset` 与
/// GPU 侧的拷贝源偏移一一对应。
///
/// 每次上传构成一个 allocation group，由 timeline semaphore 守护；
/// 帧调度器每帧轮询 `update`，signal 的组把区间还给 free list。
pub struct TransferManager {
    transfer_buffer: GfxBuffer,
    allocator: FreeListAllocator,

    command_pool: GfxCommandPool,
    /// mip 链的 blit 只能在 graphics queue 上执行
    gfx_command_pool: GfxCommandPool,
    pending_groups: VecDeque<AllocationGroup>,
}

// new & init
impl TransferManager {
    pub fn new() -> Self {
        let transfer_buffer = GfxBuffer::new(
            TRANSFER_BUFFER_SIZE,
            vk::BufferUsageFlags::TRANSFER_SRC,
            true,
            "transfer-buffer",
        );

        let command_pool = GfxCommandPool::new(
            Gfx::get().transfer_queue().queue_family().clone(),
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            "transfer",
        );
        let gfx_command_pool = GfxCommandPool::new(
            Gfx::get().gfx_queue().queue_family().clone(),
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            "transfer-gfx",
        );

        Self {
            transfer_buffer,
            allocator: FreeListAllocator::new(TRANSFER_BUFFER_SIZE, "transfer-buffer"),
            command_pool,
            gfx_command_pool,
            pending_groups: VecDeque::new(),
        }
    }
}

// tools
impl TransferManager {
    /// 向 transfer buffer 写入 payload，返回 GPU 侧的源偏移
    fn stage_bytes(&mut self, data: &[u8]) -> u64 {
        let offset = self
            .allocator
            .alloc(data.len() as u64, 16)
            .expect("transfer buffer exhausted");

        // 指针即偏移: mapped_base + offset
        let base = self.transfer_buffer.mapped_ptr().unwrap();
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), base.add(offset as usize), data.len());
        }
        self.transfer_buffer.flush(offset, data.len() as u64);

        offset
    }

    /// 把数据异步拷贝到 device-local buffer 的指定区间
    pub fn upload_to_buffer(&mut self, dst: vk::Buffer, dst_offset: u64, data: &[u8], name: &str) {
        let _span = tracy_client::span!("TransferManager::upload_to_buffer");

        let src_offset = self.stage_bytes(data);

        let command_buffer = GfxCommandBuffer::new(&self.command_pool, &format!("upload-{name}"));
        command_buffer.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, name);

        let region = vk::BufferCopy2::default()
            .src_offset(src_offset)
            .dst_offset(dst_offset)
            .size(data.len() as u64);
        command_buffer.copy_buffer(self.transfer_buffer.vk_buffer(), dst, std::slice::from_ref(&region));

        command_buffer.end();

        self.submit_group(name, command_buffer, vec![src_offset], false);
    }

    /// 把像素数据异步拷贝到 image 的所有 layer
    ///
    /// 录制流程:
    /// 1. barrier: Undefined -> TransferDst
    /// 2. 逐 layer 拷贝到 level 0
    /// 3. mip 链逐级 blit（只在 graphics queue 上合法）
    /// 4. barrier: -> ShaderReadOnly
    pub fn upload_to_image(&mut self, image: &GfxImage, data: &[u8], name: &str) {
        let _span = tracy_client::span!("TransferManager::upload_to_image");

        let src_offset = self.stage_bytes(data);

        let layer_count = image.layer_count();
        let mip_levels = image.mip_levels();
        let layer_size = data.len() as u64 / layer_count as u64;
        let extent = image.extent();
        let uses_gfx_queue = mip_levels > 1;

        let pool = if uses_gfx_queue { &self.gfx_command_pool } else { &self.command_pool };
        let command_buffer = GfxCommandBuffer::new(pool, &format!("upload-{name}"));
        command_buffer.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, name);

        let to_transfer_dst = GfxImageBarrier::new()
            .image(image.vk_image())
            .image_aspect_flag(image.aspect_flags())
            .layer_count(layer_count)
            .level_count(mip_levels)
            .src_mask(vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::empty())
            .dst_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE)
            .layout_transfer(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        command_buffer.image_memory_barrier(vk::DependencyFlags::empty(), std::slice::from_ref(&to_transfer_dst));

        let regions = (0..layer_count)
            .map(|layer| {
                vk::BufferImageCopy2::default()
                    .buffer_offset(src_offset + layer as u64 * layer_size)
                    .buffer_row_length(0)
                    .buffer_image_height(0)
                    .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
                    .image_extent(vk::Extent3D {
                        width: extent.width,
                        height: extent.height,
                        depth: 1,
                    })
                    .image_subresource(vk::ImageSubresourceLayers {
                        aspect_mask: image.aspect_flags(),
                        mip_level: 0,
                        base_array_layer: layer,
                        layer_count: 1,
                    })
            })
            .collect::<Vec<_>>();
        command_buffer.copy_buffer_to_image(
            &vk::CopyBufferToImageInfo2::default()
                .src_buffer(self.transfer_buffer.vk_buffer())
                .dst_image(image.vk_image())
                .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .regions(&regions),
        );

        if mip_levels > 1 {
            Self::record_mip_chain(&command_buffer, image);
        }

        // mip 链生成后，level [0, n-1) 处于 TransferSrc，最后一级处于 TransferDst
        let (src_layouts, last_level) = if mip_levels > 1 {
            (vk::ImageLayout::TRANSFER_SRC_OPTIMAL, mip_levels - 1)
        } else {
            (vk::ImageLayout::TRANSFER_DST_OPTIMAL, 0)
        };
        let mut final_barriers = vec![GfxImageBarrier::new()
            .image(image.vk_image())
            .image_aspect_flag(image.aspect_flags())
            .layer_count(layer_count)
            .base_mip_level(last_level)
            .level_count(1)
            .src_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE)
            .dst_mask(vk::PipelineStageFlags2::FRAGMENT_SHADER, vk::AccessFlags2::SHADER_READ)
            .layout_transfer(vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)];
        if mip_levels > 1 {
            final_barriers.push(
                GfxImageBarrier::new()
                    .image(image.vk_image())
                    .image_aspect_flag(image.aspect_flags())
                    .layer_count(layer_count)
                    .base_mip_level(0)
                    .level_count(mip_levels - 1)
                    .src_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_READ)
                    .dst_mask(vk::PipelineStageFlags2::FRAGMENT_SHADER, vk::AccessFlags2::SHADER_READ)
                    .layout_transfer(src_layouts, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
            );
        }
        command_buffer.image_memory_barrier(vk::DependencyFlags::empty(), &final_barriers);

        command_buffer.end();

        self.submit_group(name, command_buffer, vec![src_offset], uses_gfx_queue);
    }

    /// 逐级 blit 生成 mip 链
    fn record_mip_chain(command_buffer: &GfxCommandBuffer, image: &GfxImage) {
        let layer_count = image.layer_count();
        let extent = image.extent();

        let mut mip_width = extent.width as i32;
        let mut mip_height = extent.height as i32;

        for level in 1..image.mip_levels() {
            // 上一级转为 blit 源
            let to_src = GfxImageBarrier::new()
                .image(image.vk_image())
                .image_aspect_flag(image.aspect_flags())
                .layer_count(layer_count)
                .base_mip_level(level - 1)
                .level_count(1)
                .src_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE)
                .dst_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_READ)
                .layout_transfer(vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
            command_buffer.image_memory_barrier(vk::DependencyFlags::empty(), std::slice::from_ref(&to_src));

            let next_width = (mip_width / 2).max(1);
            let next_height = (mip_height / 2).max(1);

            let blit = vk::ImageBlit2::default()
                .src_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: image.aspect_flags(),
                    mip_level: level - 1,
                    base_array_layer: 0,
                    layer_count,
                })
                .src_offsets([
                    vk::Offset3D { x: 0, y: 0, z: 0 },
                    vk::Offset3D {
                        x: mip_width,
                        y: mip_height,
                        z: 1,
                    },
                ])
                .dst_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: image.aspect_flags(),
                    mip_level: level,
                    base_array_layer: 0,
                    layer_count,
                })
                .dst_offsets([
                    vk::Offset3D { x: 0, y: 0, z: 0 },
                    vk::Offset3D {
                        x: next_width,
                        y: next_height,
                        z: 1,
                    },
                ]);

            command_buffer.blit_image(
                &vk::BlitImageInfo2::default()
                    .src_image(image.vk_image())
                    .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                    .dst_image(image.vk_image())
                    .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .filter(vk::Filter::LINEAR)
                    .regions(std::slice::from_ref(&blit)),
            );

            mip_width = next_width;
            mip_height = next_height;
        }
    }

    fn submit_group(&mut self, name: &str, command_buffer: GfxCommandBuffer, allocations: Vec<u64>, uses_gfx_queue: bool) {
        let semaphore = GfxSemaphore::new_timeline(0, &format!("transfer-group-{name}"));

        let submit_info = GfxSubmitInfo::new(std::slice::from_ref(&command_buffer)).signal(
            &semaphore,
            vk::PipelineStageFlags2::ALL_COMMANDS,
            Some(1),
        );
        let queue = if uses_gfx_queue { Gfx::get().gfx_queue() } else { Gfx::get().transfer_queue() };
        queue.submit(vec![submit_info], None);

        self.pending_groups.push_back(AllocationGroup {
            name: name.to_string(),
            semaphore,
            pending_allocations: allocations,
            command_buffer,
            uses_gfx_queue,
        });
    }

    /// 每帧轮询，signal 的 allocation group 把 free-list 区间归还
    pub fn update(&mut self) {
        let _span = tracy_client::span!("TransferManager::update");

        while let Some(group) = self.pending_groups.front() {
            if group.semaphore.counter_value() < 1 {
                // 按提交顺序排队，队头未完成则后续也未完成
                break;
            }

            let group = self.pending_groups.pop_front().unwrap();
            log::trace!("transfer group finished: {}", group.name);

            for offset in group.pending_allocations {
                self.allocator.free(offset);
            }
            let pool = if group.uses_gfx_queue { &self.gfx_command_pool } else { &self.command_pool };
            pool.free_command_buffers(vec![group.command_buffer]);
            group.semaphore.destroy();
        }
    }

    /// 等待所有在途上传完成并回收
    pub fn flush_all(&mut self) {
        for group in &self.pending_groups {
            group.semaphore.wait_timeline(1, u64::MAX);
        }
        self.update();
        assert!(self.pending_groups.is_empty());
    }
}

// destroy
impl TransferManager {
    pub fn destroy(mut self) {
        self.flush_all();
        self.command_pool.destroy();
        self.gfx_command_pool.destroy();
        self.transfer_buffer.destroy();
    }
}
