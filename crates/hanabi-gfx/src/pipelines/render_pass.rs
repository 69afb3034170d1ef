use ash::vk;

use crate::gfx::Gfx;

/// 单个 attachment 的描述
#[derive(Clone, Copy, Debug)]
pub struct GfxAttachmentDesc {
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub initial_layout: vk::ImageLayout,
    pub final_layout: vk::ImageLayout,
}

/// render pass 的创建参数
///
/// 单 subpass。resolve 与 color 一一对应（多重采样的 color 才有 resolve）。
pub struct GfxRenderPassDesc {
    pub colors: Vec<GfxAttachmentDesc>,
    pub resolves: Vec<Option<GfxAttachmentDesc>>,
    pub depth: Option<GfxAttachmentDesc>,
}

/// # Destroy
///
/// 需要手动调用 `destroy` 方法来释放资源。
pub struct GfxRenderPass {
    handle: vk::RenderPass,
    color_count: u32,
    samples: vk::SampleCountFlags,
}

// new & init
impl GfxRenderPass {
    pub fn new(desc: &GfxRenderPassDesc, debug_name: &str) -> Self {
        assert!(desc.resolves.is_empty() || desc.resolves.len() == desc.colors.len());

        let mut attachments = Vec::new();
        let mut color_refs = Vec::new();
        let mut resolve_refs = Vec::new();
        let mut depth_ref = None;

        let vk_attachment = |a: &GfxAttachmentDesc, stencil: bool| {
            vk::AttachmentDescription::default()
                .format(a.format)
                .samples(a.samples)
                .load_op(a.load_op)
                .store_op(a.store_op)
                .stencil_load_op(if stencil { a.load_op } else { vk::AttachmentLoadOp::DONT_CARE })
                .stencil_store_op(if stencil { a.store_op } else { vk::AttachmentStoreOp::DONT_CARE })
                .initial_layout(a.initial_layout)
                .final_layout(a.final_layout)
        };

        for color in &desc.colors {
            let index = attachments.len() as u32;
            attachments.push(vk_attachment(color, false));
            color_refs.push(
                vk::AttachmentReference::default()
                    .attachment(index)
                    .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
            );
        }

        if !desc.resolves.is_empty() {
            for resolve in &desc.resolves {
                match resolve {
                    Some(resolve) => {
                        let index = attachments.len() as u32;
                        attachments.push(vk_attachment(resolve, false));
                        resolve_refs.push(
                            vk::AttachmentReference::default()
                                .attachment(index)
                                .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
                        );
                    }
                    None => {
                        resolve_refs.push(
                            vk::AttachmentReference::default()
                                .attachment(vk::ATTACHMENT_UNUSED)
                                .layout(vk::ImageLayout::UNDEFINED),
                        );
                    }
                }
            }
        }

        if let Some(depth) = &desc.depth {
            let index = attachments.len() as u32;
            attachments.push(vk_attachment(depth, true));
            depth_ref = Some(
                vk::AttachmentReference::default()
                    .attachment(index)
                    .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
            );
        }

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if !resolve_refs.is_empty() {
            subpass = subpass.resolve_attachments(&resolve_refs);
        }
        if let Some(depth_ref) = &depth_ref {
            subpass = subpass.depth_stencil_attachment(depth_ref);
        }

        // 保证前一次使用（上一个 node 或上一帧）的读写先于本 pass 的写入
        let dependencies = [
            vk::SubpassDependency::default()
                .src_subpass(vk::SUBPASS_EXTERNAL)
                .dst_subpass(0)
                .src_stage_mask(
                    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                        | vk::PipelineStageFlags::FRAGMENT_SHADER,
                )
                .src_access_mask(vk::AccessFlags::SHADER_READ)
                .dst_stage_mask(
                    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                )
                .dst_access_mask(
                    vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                ),
            vk::SubpassDependency::default()
                .src_subpass(0)
                .dst_subpass(vk::SUBPASS_EXTERNAL)
                .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                .dst_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
                .dst_access_mask(vk::AccessFlags::SHADER_READ),
        ];

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(std::slice::from_ref(&subpass))
            .dependencies(&dependencies);

        let handle = unsafe { Gfx::get().gfx_device().create_render_pass(&create_info, None).unwrap() };
        Gfx::get().gfx_device().set_object_debug_name(handle, format!("RenderPass::{debug_name}"));

        let samples = desc.colors.first().map_or(vk::SampleCountFlags::TYPE_1, |c| c.samples);

        Self {
            handle,
            color_count: desc.colors.len() as u32,
            samples,
        }
    }
}

// getter
impl GfxRenderPass {
    #[inline]
    pub fn handle(&self) -> vk::RenderPass {
        self.handle
    }

    #[inline]
    pub fn color_count(&self) -> u32 {
        self.color_count
    }

    #[inline]
    pub fn samples(&self) -> vk::SampleCountFlags {
        self.samples
    }
}

// destroy
impl GfxRenderPass {
    pub fn destroy(self) {
        unsafe {
            Gfx::get().gfx_device().destroy_render_pass(self.handle, None);
        }
    }
}

/// 把 load op 无关的字段补全，方便 render graph 侧构造
impl GfxAttachmentDesc {
    pub fn color(format: vk::Format, samples: vk::SampleCountFlags, load_op: vk::AttachmentLoadOp) -> Self {
        Self {
            format,
            samples,
            load_op,
            store_op: vk::AttachmentStoreOp::STORE,
            initial_layout: if load_op == vk::AttachmentLoadOp::LOAD {
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
            } else {
                vk::ImageLayout::UNDEFINED
            },
            final_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }
    }

    pub fn depth(format: vk::Format, samples: vk::SampleCountFlags, load_op: vk::AttachmentLoadOp) -> Self {
        Self {
            format,
            samples,
            load_op,
            store_op: vk::AttachmentStoreOp::STORE,
            initial_layout: if load_op == vk::AttachmentLoadOp::LOAD {
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
            } else {
                vk::ImageLayout::UNDEFINED
            },
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        }
    }

    pub fn final_layout(mut self, layout: vk::ImageLayout) -> Self {
        self.final_layout = layout;
        self
    }
}
