use std::ffi::CStr;

use ash::vk;
use itertools::Itertools;

use crate::gfx::Gfx;
use crate::pipelines::pipeline_cache::GfxPipelineCache;
use crate::pipelines::render_pass::GfxRenderPass;
use crate::pipelines::shader::GfxShaderModule;

/// 固定管线设置
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CullMode {
    None,
    Back,
    Front,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrontFace {
    Clockwise,
    CounterClockwise,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FillMode {
    Solid,
    Wireframe,
}

/// 光栅化阶段的固定功能设置
#[derive(Clone, Copy, Debug)]
pub struct RasterizationSettings {
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub fill_mode: FillMode,
    pub depth_testing: bool,
    pub sample_shading: bool,
}

impl Default for RasterizationSettings {
    fn default() -> Self {
        Self {
            cull_mode: CullMode::Back,
            front_face: FrontFace::CounterClockwise,
            fill_mode: FillMode::Solid,
            depth_testing: true,
            sample_shading: true,
        }
    }
}

/// 单个 shader stage
pub struct GfxShaderStage<'a> {
    pub stage: vk::ShaderStageFlags,
    pub module: &'a GfxShaderModule,
    pub entry_point: &'a CStr,
}

/// graphics pipeline 的创建参数
pub struct GfxGraphicsPipelineCreateInfo<'a> {
    pub settings: RasterizationSettings,

    pub shader_stages: Vec<GfxShaderStage<'a>>,

    pub descriptor_set_layouts: Vec<vk::DescriptorSetLayout>,
    pub push_constant_ranges: Vec<vk::PushConstantRange>,

    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,

    pub msaa_samples: vk::SampleCountFlags,
    pub color_attachment_count: u32,
}

/// # Destroy
///
/// 需要手动调用 `destroy` 方法来释放资源。
pub struct GfxGraphicsPipeline {
    pipeline: vk::Pipeline,
    pipeline_layout: vk::PipelineLayout,
}

// new & init
impl GfxGraphicsPipeline {
    pub fn new(
        create_info: &GfxGraphicsPipelineCreateInfo,
        render_pass: &GfxRenderPass,
        cache: &GfxPipelineCache,
        debug_name: &str,
    ) -> Self {
        let device = Gfx::get().gfx_device();

        let pipeline_layout = {
            let pipeline_layout_create_info = vk::PipelineLayoutCreateInfo::default()
                .set_layouts(&create_info.descriptor_set_layouts)
                .push_constant_ranges(&create_info.push_constant_ranges);
            unsafe { device.create_pipeline_layout(&pipeline_layout_create_info, None).unwrap() }
        };
        device.set_object_debug_name(pipeline_layout, debug_name);

        let shader_stages_info = create_info
            .shader_stages
            .iter()
            .map(|stage| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(stage.stage)
                    .module(stage.module.handle())
                    .name(stage.entry_point)
            })
            .collect_vec();

        let vertex_input_state_info = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&create_info.vertex_bindings)
            .vertex_attribute_descriptions(&create_info.vertex_attributes);

        let input_assembly_info = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // viewport 和 scissor 的具体值由 dynamic state 决定，数量在这里固定
        let viewport_info = vk::PipelineViewportStateCreateInfo {
            viewport_count: 1,
            scissor_count: 1,
            ..Default::default()
        };

        let settings = &create_info.settings;
        let rasterize_state_info = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(match settings.fill_mode {
                FillMode::Solid => vk::PolygonMode::FILL,
                FillMode::Wireframe => vk::PolygonMode::LINE,
            })
            .line_width(1.0)
            .cull_mode(match settings.cull_mode {
                CullMode::None => vk::CullModeFlags::NONE,
                CullMode::Back => vk::CullModeFlags::BACK,
                CullMode::Front => vk::CullModeFlags::FRONT,
            })
            .front_face(match settings.front_face {
                FrontFace::Clockwise => vk::FrontFace::CLOCKWISE,
                FrontFace::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
            })
            .depth_bias_enable(false);

        let msaa_info = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(create_info.msaa_samples)
            .sample_shading_enable(settings.sample_shading)
            .min_sample_shading(if settings.sample_shading { 0.2 } else { 0.0 });

        // 混合设置：为每个 color attachment 分别指定
        let color_attach_blend_states = (0..create_info.color_attachment_count)
            .map(|_| {
                vk::PipelineColorBlendAttachmentState::default()
                    .blend_enable(false)
                    .color_write_mask(vk::ColorComponentFlags::RGBA)
            })
            .collect_vec();
        let color_blend_info = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_attach_blend_states);

        let depth_stencil_info = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(settings.depth_testing)
            .depth_write_enable(settings.depth_testing)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state_info = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages_info)
            .vertex_input_state(&vertex_input_state_info)
            .input_assembly_state(&input_assembly_info)
            .viewport_state(&viewport_info)
            .rasterization_state(&rasterize_state_info)
            .multisample_state(&msaa_info)
            .color_blend_state(&color_blend_info)
            .depth_stencil_state(&depth_stencil_info)
            .layout(pipeline_layout)
            .dynamic_state(&dynamic_state_info)
            .render_pass(render_pass.handle())
            .subpass(0);

        let pipeline = unsafe {
            device
                .create_graphics_pipelines(cache.handle(), std::slice::from_ref(&pipeline_info), None)
                .unwrap()[0]
        };
        device.set_object_debug_name(pipeline, debug_name);

        Self {
            pipeline,
            pipeline_layout,
        }
    }
}

// getter
impl GfxGraphicsPipeline {
    #[inline]
    pub fn pipeline(&self) -> vk::Pipeline {
        self.pipeline
    }

    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }
}

// destroy
impl GfxGraphicsPipeline {
    pub fn destroy(self) {
        unsafe {
            let device = Gfx::get().gfx_device();
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.pipeline_layout, None);
        }
    }
}
