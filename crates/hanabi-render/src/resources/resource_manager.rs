use std::sync::{Mutex, MutexGuard};

use ash::vk;
use hanabi_gfx::descriptors::bind_group::{GfxBindGroup, GfxBindGroupLayout, GfxBindingDesc, GfxBindingUpdate};
use hanabi_gfx::gfx::Gfx;
use hanabi_gfx::pipelines::framebuffer::GfxFramebuffer;
use hanabi_gfx::pipelines::graphics_pipeline::{
    GfxGraphicsPipeline, GfxGraphicsPipelineCreateInfo, GfxShaderStage, RasterizationSettings,
};
use hanabi_gfx::pipelines::pipeline_cache::GfxPipelineCache;
use hanabi_gfx::pipelines::render_pass::{GfxRenderPass, GfxRenderPassDesc};
use hanabi_gfx::pipelines::shader::{GfxShaderModule, ShaderReflection, MAX_DESCRIPTOR_SET_COUNT};
use hanabi_gfx::resources::buffer::GfxBuffer;
use hanabi_gfx::resources::image::{GfxImage, GfxImageDesc};
use hanabi_gfx::resources::sampler::{GfxSampler, GfxSamplerDesc};
use slotmap::SlotMap;

use crate::handles::*;
use crate::resources::resource_data::*;
use crate::settings::*;
use crate::shader_data::{VertexNormal, VertexPosition, VertexTangent, VertexUv};
use crate::transfer::TransferManager;

/// descriptor set 的引擎约定:
/// set 0 = 每帧全局数据 (globals UBO + object data storage)
/// set 1 = bindless 纹理数组
/// set 2 = 材质 uniform
pub const GLOBALS_SET_INDEX: usize = 0;
pub const BINDLESS_SET_INDEX: usize = 1;
pub const MATERIAL_SET_INDEX: usize = 2;

pub(crate) struct ResourceState {
    pub buffers: SlotMap<BufferHandle, BufferResource>,
    pub textures: SlotMap<TextureHandle, TextureResource>,
    pub samplers: SlotMap<SamplerHandle, SamplerResource>,
    pub shaders: SlotMap<ShaderHandle, ShaderResource>,
    pub shader_groups: SlotMap<ShaderGroupHandle, ShaderGroupResource>,
    pub pipeline_states: SlotMap<PipelineStateHandle, PipelineStateResource>,
    pub bind_group_layouts: SlotMap<BindGroupLayoutHandle, BindGroupLayoutResource>,
    pub bind_groups: SlotMap<BindGroupHandle, BindGroupResource>,
    pub render_passes: SlotMap<RenderPassHandle, RenderPassResource>,
    pub frame_buffers: SlotMap<FrameBufferHandle, FrameBufferResource>,
    pub static_meshes: SlotMap<StaticMeshHandle, StaticMeshResource>,
    pub materials: SlotMap<MaterialHandle, MaterialResource>,
    pub semaphores: SlotMap<SemaphoreHandle, SemaphoreResource>,

    pub transfer: TransferManager,
    pub pipeline_cache: GfxPipelineCache,

    /// set 0 / set 1 的权威 layout，pipeline 与 bind group 都从这里取
    pub globals_set_layout: BindGroupLayoutHandle,
    pub bindless_set_layout: BindGroupLayoutHandle,

    pub default_sampler: SamplerHandle,
    pub white_pixel_texture: TextureHandle,
    pub normal_pixel_texture: TextureHandle,
    /// 渲染器启动时创建，材质未加载时的替身
    pub default_material: MaterialHandle,

    // 全局几何 buffer，静态网格按 cursor 追加
    pub position_buffer: BufferHandle,
    pub normal_buffer: BufferHandle,
    pub uv_buffer: BufferHandle,
    pub tangent_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub vertex_cursor: u32,
    pub index_cursor: u32,

    pub frames_in_flight: usize,
}

/// 渲染资源管理器
///
/// 所有资源池的持有者。创建/更新/销毁一律经过唯一的 render commands mutex；
/// 跨线程（asset 加载 job）创建资源是安全的，句柄的 generation 保证
/// 失效引用可检测。
pub struct RenderResourceManager {
    state: Mutex<ResourceState>,
}

// new & init
impl RenderResourceManager {
    pub fn new(pipeline_cache_path: Option<&std::path::Path>, settings: &crate::settings::RendererSettings) -> Self {
        let transfer = TransferManager::new();
        let pipeline_cache = GfxPipelineCache::new(pipeline_cache_path);

        let mut state = ResourceState {
            buffers: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            samplers: SlotMap::with_key(),
            shaders: SlotMap::with_key(),
            shader_groups: SlotMap::with_key(),
            pipeline_states: SlotMap::with_key(),
            bind_group_layouts: SlotMap::with_key(),
            bind_groups: SlotMap::with_key(),
            render_passes: SlotMap::with_key(),
            frame_buffers: SlotMap::with_key(),
            static_meshes: SlotMap::with_key(),
            materials: SlotMap::with_key(),
            semaphores: SlotMap::with_key(),
            transfer,
            pipeline_cache,
            globals_set_layout: BindGroupLayoutHandle::default(),
            bindless_set_layout: BindGroupLayoutHandle::default(),
            default_sampler: SamplerHandle::default(),
            white_pixel_texture: TextureHandle::default(),
            normal_pixel_texture: TextureHandle::default(),
            default_material: MaterialHandle::default(),
            position_buffer: BufferHandle::default(),
            normal_buffer: BufferHandle::default(),
            uv_buffer: BufferHandle::default(),
            tangent_buffer: BufferHandle::default(),
            index_buffer: BufferHandle::default(),
            vertex_cursor: 0,
            index_cursor: 0,
            frames_in_flight: settings.frames_in_flight(),
        };

        Self::create_builtin_resources(&mut state, settings);

        Self {
            state: Mutex::new(state),
        }
    }

    fn create_builtin_resources(state: &mut ResourceState, settings: &crate::settings::RendererSettings) {
        // 权威的 set 0 / set 1 layout
        let globals_layout = GfxBindGroupLayout::new(
            vec![
                GfxBindingDesc {
                    binding: 0,
                    descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                    count: 1,
                    stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                    flags: vk::DescriptorBindingFlags::empty(),
                },
                GfxBindingDesc {
                    binding: 1,
                    descriptor_type: vk::DescriptorType::STORAGE_BUFFER,
                    count: 1,
                    stage_flags: vk::ShaderStageFlags::VERTEX,
                    flags: vk::DescriptorBindingFlags::empty(),
                },
            ],
            "globals",
        );
        state.globals_set_layout = state.bind_group_layouts.insert(BindGroupLayoutResource { gfx: globals_layout });

        let bindless_layout = GfxBindGroupLayout::new(
            vec![GfxBindingDesc {
                binding: 0,
                descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                count: MAX_TEXTURE_COUNT as u32,
                stage_flags: vk::ShaderStageFlags::FRAGMENT,
                flags: vk::DescriptorBindingFlags::PARTIALLY_BOUND | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND,
            }],
            "bindless-textures",
        );
        state.bindless_set_layout = state.bind_group_layouts.insert(BindGroupLayoutResource { gfx: bindless_layout });

        // 默认 sampler
        let sampler = GfxSampler::new(
            &GfxSamplerDesc {
                max_anisotropy: settings.anisotropy,
                ..Default::default()
            },
            "default",
        );
        state.default_sampler = state.samplers.insert(SamplerResource { gfx: sampler });

        // 1x1 白色与默认法线纹理
        state.white_pixel_texture = Self::create_texture_locked(
            state,
            &TextureDescriptor {
                name: "white-pixel".to_string(),
                data: Some(&[255, 255, 255, 255]),
                ..Default::default()
            },
        );
        state.normal_pixel_texture = Self::create_texture_locked(
            state,
            &TextureDescriptor {
                name: "normal-pixel".to_string(),
                data: Some(&[128, 128, 255, 255]),
                ..Default::default()
            },
        );

        // 全局几何 buffer
        let vertex_buffer = |name: &str, stride: usize| BufferResource {
            name: name.to_string(),
            usage: BufferUsage::Vertex,
            is_device_local: true,
            gfx: GfxBuffer::new(
                (MAX_VERTEX_COUNT * stride) as u64,
                BufferUsage::Vertex.vk_usage(),
                false,
                name,
            ),
        };
        state.position_buffer = state.buffers.insert(vertex_buffer("positions", size_of::<VertexPosition>()));
        state.normal_buffer = state.buffers.insert(vertex_buffer("normals", size_of::<VertexNormal>()));
        state.uv_buffer = state.buffers.insert(vertex_buffer("uvs", size_of::<VertexUv>()));
        state.tangent_buffer = state.buffers.insert(vertex_buffer("tangents", size_of::<VertexTangent>()));
        state.index_buffer = state.buffers.insert(BufferResource {
            name: "indices".to_string(),
            usage: BufferUsage::Index,
            is_device_local: true,
            gfx: GfxBuffer::new(
                (MAX_INDEX_COUNT * size_of::<u32>()) as u64,
                BufferUsage::Index.vk_usage(),
                false,
                "indices",
            ),
        });
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ResourceState> {
        self.state.lock().unwrap()
    }
}

// buffer
impl RenderResourceManager {
    /// device local 的 buffer 不做 host 映射；host 可见的 buffer 暴露映射指针
    pub fn create_buffer(&self, desc: &BufferDescriptor) -> BufferHandle {
        assert!(desc.size > 0);
        let mut state = self.lock();
        assert!(state.buffers.len() < MAX_BUFFER_COUNT, "buffer pool exhausted");

        let mut usage = desc.usage.vk_usage();
        if !desc.is_device_local {
            // host 侧直接写，不需要 TRANSFER_DST
            usage &= !vk::BufferUsageFlags::TRANSFER_DST;
        }

        let gfx = GfxBuffer::new(desc.size, usage, !desc.is_device_local, &desc.name);
        state.buffers.insert(BufferResource {
            name: desc.name.clone(),
            usage: desc.usage,
            is_device_local: desc.is_device_local,
            gfx,
        })
    }

    pub fn is_buffer_valid(&self, handle: BufferHandle) -> bool {
        self.lock().buffers.contains_key(handle)
    }

    /// host 可见 buffer 的直接写入
    pub fn write_buffer(&self, handle: BufferHandle, offset: u64, data: &[u8]) {
        let state = self.lock();
        let buffer = state.buffers.get(handle).expect("stale buffer handle");
        assert!(!buffer.is_device_local, "write_buffer on a device-local buffer");
        buffer.gfx.write_bytes(offset, data);
    }

    /// device local buffer 经过 transfer buffer 异步上传
    pub fn upload_buffer(&self, handle: BufferHandle, offset: u64, data: &[u8]) {
        let state = &mut *self.lock();
        let buffer = state.buffers.get(handle).expect("stale buffer handle");
        assert!(buffer.is_device_local);
        let dst = buffer.gfx.vk_buffer();
        let name = buffer.name.clone();
        state.transfer.upload_to_buffer(dst, offset, data, &name);
    }

    pub fn destroy_buffer(&self, handle: BufferHandle) {
        let mut state = self.lock();
        let buffer = state.buffers.remove(handle).expect("stale buffer handle");
        buffer.gfx.destroy();
    }

    pub fn buffer_vk_handle(&self, handle: BufferHandle) -> vk::Buffer {
        self.lock().buffers.get(handle).expect("stale buffer handle").gfx.vk_buffer()
    }
}

// texture
impl RenderResourceManager {
    pub fn create_texture(&self, desc: &TextureDescriptor) -> TextureHandle {
        let state = &mut *self.lock();
        Self::create_texture_locked(state, desc)
    }

    fn create_texture_locked(state: &mut ResourceState, desc: &TextureDescriptor) -> TextureHandle {
        assert!(state.textures.len() < MAX_TEXTURE_COUNT, "texture pool exhausted");

        let mip_levels = if desc.mipmapping {
            (desc.width.max(desc.height) as f32).log2().floor() as u32 + 1
        } else {
            1
        };

        let is_depth = matches!(
            desc.format,
            vk::Format::D16_UNORM
                | vk::Format::D32_SFLOAT
                | vk::Format::D24_UNORM_S8_UINT
                | vk::Format::D32_SFLOAT_S8_UINT
                | vk::Format::D16_UNORM_S8_UINT
        );
        let usage = if desc.is_attachment {
            if is_depth {
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED
            } else {
                vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::SAMPLED
                    | vk::ImageUsageFlags::TRANSFER_SRC
            }
        } else {
            let mut usage = vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST;
            if mip_levels > 1 {
                // mip 链通过 blit 生成
                usage |= vk::ImageUsageFlags::TRANSFER_SRC;
            }
            usage
        };

        let image = GfxImage::new(
            &GfxImageDesc {
                extent: vk::Extent2D {
                    width: desc.width,
                    height: desc.height,
                },
                format: desc.format,
                usage,
                layer_count: desc.layer_count,
                mip_levels,
                samples: desc.sample_count,
                is_cubemap: desc.is_cubemap,
            },
            &desc.name,
        );

        if let Some(data) = desc.data {
            state.transfer.upload_to_image(&image, data, &desc.name);
        }

        state.textures.insert(TextureResource {
            name: desc.name.clone(),
            image,
            is_attachment: desc.is_attachment,
        })
    }

    pub fn is_texture_valid(&self, handle: TextureHandle) -> bool {
        self.lock().textures.contains_key(handle)
    }

    pub fn destroy_texture(&self, handle: TextureHandle) {
        let mut state = self.lock();
        let texture = state.textures.remove(handle).expect("stale texture handle");
        texture.image.destroy();
    }
}

// sampler
impl RenderResourceManager {
    pub fn create_sampler(&self, desc: &SamplerDescriptor, name: &str) -> SamplerHandle {
        let mut state = self.lock();
        assert!(state.samplers.len() < MAX_SAMPLER_COUNT, "sampler pool exhausted");
        state.samplers.insert(SamplerResource {
            gfx: GfxSampler::new(desc, name),
        })
    }

    pub fn destroy_sampler(&self, handle: SamplerHandle) {
        let mut state = self.lock();
        let sampler = state.samplers.remove(handle).expect("stale sampler handle");
        sampler.gfx.destroy();
    }

    /// 替换默认 sampler（各向异性设置变化时）
    ///
    /// 被绑定的 descriptor 可能仍引用旧对象，因此先等 GPU 空闲再重建；
    /// bindless 描述符在下一帧 begin 时整体重写。
    pub fn recreate_default_sampler(&self, anisotropy: u32) {
        Gfx::get().wait_idle();

        let mut state = self.lock();
        let handle = state.default_sampler;
        let sampler = state.samplers.remove(handle).expect("default sampler missing");
        sampler.gfx.destroy();

        let new_sampler = GfxSampler::new(
            &GfxSamplerDesc {
                max_anisotropy: anisotropy,
                ..Default::default()
            },
            "default",
        );
        state.default_sampler = state.samplers.insert(SamplerResource { gfx: new_sampler });
    }
}

// shader & shader group
impl RenderResourceManager {
    /// 解析 SPIR-V 反射，得到 per-set 绑定、输入输出变量和具名 struct 定义
    pub fn create_shader(&self, name: &str, spv: &[u8]) -> anyhow::Result<ShaderHandle> {
        let reflection = ShaderReflection::reflect(spv)?;
        let module = GfxShaderModule::new(spv, name);

        let mut state = self.lock();
        assert!(state.shaders.len() < MAX_SHADER_COUNT, "shader pool exhausted");
        Ok(state.shaders.insert(ShaderResource {
            name: name.to_string(),
            module,
            reflection,
        }))
    }

    pub fn destroy_shader(&self, handle: ShaderHandle) {
        let mut state = self.lock();
        let shader = state.shaders.remove(handle).expect("stale shader handle");
        shader.module.destroy();
    }

    /// 合并各 stage 的 per-set 绑定，为每个 set 建一个 bind group layout
    ///
    /// set 0 / set 1 使用引擎的权威 layout。
    pub fn create_shader_group(&self, name: &str, shaders: &[ShaderHandle]) -> ShaderGroupHandle {
        let state = &mut *self.lock();
        assert!(state.shader_groups.len() < MAX_SHADER_GROUP_COUNT, "shader group pool exhausted");

        // 跨 stage 合并绑定
        let mut merged: [Vec<GfxBindingDesc>; MAX_DESCRIPTOR_SET_COUNT] = Default::default();
        for &shader in shaders {
            let reflection = &state.shaders.get(shader).expect("stale shader handle").reflection;
            for (set_index, bindings) in reflection.set_bindings.iter().enumerate() {
                for binding in bindings {
                    if let Some(existing) = merged[set_index].iter_mut().find(|b| b.binding == binding.binding) {
                        assert_eq!(existing.descriptor_type, binding.descriptor_type);
                        assert_eq!(existing.count, binding.count);
                        existing.stage_flags |= binding.stage_flags;
                    } else {
                        merged[set_index].push(*binding);
                    }
                }
            }
        }

        let mut layouts: Vec<Option<BindGroupLayoutHandle>> = vec![None; MAX_DESCRIPTOR_SET_COUNT];
        layouts[GLOBALS_SET_INDEX] = Some(state.globals_set_layout);
        layouts[BINDLESS_SET_INDEX] = Some(state.bindless_set_layout);
        for (set_index, bindings) in merged.iter().enumerate() {
            if set_index < MATERIAL_SET_INDEX || bindings.is_empty() {
                continue;
            }
            let layout = GfxBindGroupLayout::new(bindings.clone(), &format!("{name}-set{set_index}"));
            layouts[set_index] = Some(state.bind_group_layouts.insert(BindGroupLayoutResource { gfx: layout }));
        }

        state.shader_groups.insert(ShaderGroupResource {
            name: name.to_string(),
            shaders: shaders.to_vec(),
            bind_group_layouts: layouts,
        })
    }

    pub fn destroy_shader_group(&self, handle: ShaderGroupHandle) {
        let state = &mut *self.lock();
        let group = state.shader_groups.remove(handle).expect("stale shader group handle");
        for (set_index, layout) in group.bind_group_layouts.into_iter().enumerate() {
            // 权威 layout 不属于 group
            if set_index < MATERIAL_SET_INDEX {
                continue;
            }
            if let Some(layout) = layout {
                let resource = state.bind_group_layouts.remove(layout).expect("stale layout handle");
                resource.gfx.destroy();
            }
        }
    }

    pub fn shader_group_shaders(&self, handle: ShaderGroupHandle) -> Vec<ShaderHandle> {
        self.lock().shader_groups.get(handle).expect("stale shader group handle").shaders.clone()
    }

    /// material 系统按名字查找 shader group 里反射出的 struct
    pub fn find_shader_struct(
        &self,
        group: ShaderGroupHandle,
        struct_name: &str,
    ) -> Option<hanabi_gfx::pipelines::shader::ShaderStruct> {
        let state = self.lock();
        let group = state.shader_groups.get(group).expect("stale shader group handle");
        for &shader in &group.shaders {
            let reflection = &state.shaders.get(shader).expect("stale shader handle").reflection;
            if let Some(s) = reflection.find_struct(struct_name) {
                return Some(s.clone());
            }
        }
        None
    }
}

// pipeline state
impl RenderResourceManager {
    pub fn create_pipeline_state(
        &self,
        name: &str,
        settings: RasterizationSettings,
        shader_group: ShaderGroupHandle,
        render_pass: RenderPassHandle,
    ) -> PipelineStateHandle {
        let state = &mut *self.lock();
        assert!(state.pipeline_states.len() < MAX_PIPELINE_STATE_COUNT, "pipeline pool exhausted");

        let gfx = Self::build_pipeline_locked(state, name, settings, shader_group, render_pass);
        state.pipeline_states.insert(PipelineStateResource {
            name: name.to_string(),
            gfx,
            settings,
            shader_group,
            render_pass,
        })
    }

    fn build_pipeline_locked(
        state: &ResourceState,
        name: &str,
        settings: RasterizationSettings,
        shader_group: ShaderGroupHandle,
        render_pass: RenderPassHandle,
    ) -> GfxGraphicsPipeline {
        let group = state.shader_groups.get(shader_group).expect("stale shader group handle");
        let pass = state.render_passes.get(render_pass).expect("stale render pass handle");

        let shader_stages = group
            .shaders
            .iter()
            .map(|&shader| {
                let resource = state.shaders.get(shader).expect("stale shader handle");
                GfxShaderStage {
                    stage: resource.reflection.stage,
                    module: &resource.module,
                    entry_point: c"main",
                }
            })
            .collect::<Vec<_>>();

        // set layout 列表必须连续，取到最后一个被使用的 set
        let last_used_set = group.bind_group_layouts.iter().rposition(|l| l.is_some()).unwrap_or(0);
        let descriptor_set_layouts = group.bind_group_layouts[..=last_used_set]
            .iter()
            .map(|layout| {
                let handle = layout.expect("descriptor set layouts must be contiguous");
                state.bind_group_layouts.get(handle).expect("stale layout handle").gfx.handle()
            })
            .collect::<Vec<_>>();

        // 顶点流: position / normal / uv / tangent 分离绑定
        let vertex_bindings = vec![
            vk::VertexInputBindingDescription {
                binding: 0,
                stride: size_of::<VertexPosition>() as u32,
                input_rate: vk::VertexInputRate::VERTEX,
            },
            vk::VertexInputBindingDescription {
                binding: 1,
                stride: size_of::<VertexNormal>() as u32,
                input_rate: vk::VertexInputRate::VERTEX,
            },
            vk::VertexInputBindingDescription {
                binding: 2,
                stride: size_of::<VertexUv>() as u32,
                input_rate: vk::VertexInputRate::VERTEX,
            },
            vk::VertexInputBindingDescription {
                binding: 3,
                stride: size_of::<VertexTangent>() as u32,
                input_rate: vk::VertexInputRate::VERTEX,
            },
        ];
        let vertex_attributes = vec![
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 0,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 1,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 0,
            },
            vk::VertexInputAttributeDescription {
                location: 2,
                binding: 2,
                format: vk::Format::R32G32_SFLOAT,
                offset: 0,
            },
            vk::VertexInputAttributeDescription {
                location: 3,
                binding: 3,
                format: vk::Format::R32G32B32A32_SFLOAT,
                offset: 0,
            },
        ];

        let create_info = GfxGraphicsPipelineCreateInfo {
            settings,
            shader_stages,
            descriptor_set_layouts,
            push_constant_ranges: vec![],
            vertex_bindings,
            vertex_attributes,
            msaa_samples: pass.gfx.samples(),
            color_attachment_count: pass.gfx.color_count(),
        };

        GfxGraphicsPipeline::new(&create_info, &pass.gfx, &state.pipeline_cache, name)
    }

    pub fn destroy_pipeline_state(&self, handle: PipelineStateHandle) {
        let mut state = self.lock();
        let pipeline = state.pipeline_states.remove(handle).expect("stale pipeline handle");
        pipeline.gfx.destroy();
    }

    /// MSAA 等设置变化后，原地重建所有 pipeline 的 vk 对象
    ///
    /// 句柄不变，材质无需重建。调用方保证 GPU 空闲。
    pub fn recreate_all_pipelines(&self) {
        let state = &mut *self.lock();
        let handles: Vec<PipelineStateHandle> = state.pipeline_states.keys().collect();
        for handle in handles {
            let (name, settings, shader_group, render_pass) = {
                let pipeline = &state.pipeline_states[handle];
                (pipeline.name.clone(), pipeline.settings, pipeline.shader_group, pipeline.render_pass)
            };
            let new_gfx = Self::build_pipeline_locked(state, &name, settings, shader_group, render_pass);
            let old = std::mem::replace(&mut state.pipeline_states[handle].gfx, new_gfx);
            old.destroy();
        }
    }

    pub fn pipeline_render_pass(&self, handle: PipelineStateHandle) -> RenderPassHandle {
        self.lock().pipeline_states.get(handle).expect("stale pipeline handle").render_pass
    }

    pub fn pipeline_vk_layout(&self, handle: PipelineStateHandle) -> vk::PipelineLayout {
        self.lock().pipeline_states.get(handle).expect("stale pipeline handle").gfx.layout()
    }
}

// bind group
impl RenderResourceManager {
    pub fn create_bind_group(&self, layout: BindGroupLayoutHandle, name: &str) -> BindGroupHandle {
        let state = &mut *self.lock();
        assert!(state.bind_groups.len() < MAX_BIND_GROUP_COUNT, "bind group pool exhausted");

        let layout_resource = state.bind_group_layouts.get(layout).expect("stale layout handle");
        let gfx = GfxBindGroup::new(&layout_resource.gfx, name);
        state.bind_groups.insert(BindGroupResource { gfx, layout })
    }

    pub fn bind_group_vk_handle(&self, handle: BindGroupHandle) -> vk::DescriptorSet {
        self.lock().bind_groups.get(handle).expect("stale bind group handle").gfx.handle()
    }

    /// 把一组 bind group 绑定到从 first_set 开始的连续 set 上
    pub fn set_bind_groups(
        &self,
        cmd: &hanabi_gfx::commands::command_buffer::GfxCommandBuffer,
        pipeline: PipelineStateHandle,
        first_set: u32,
        groups: &[BindGroupHandle],
    ) {
        let state = self.lock();
        let layout = state.pipeline_states.get(pipeline).expect("stale pipeline handle").gfx.layout();
        let sets = groups
            .iter()
            .map(|&g| state.bind_groups.get(g).expect("stale bind group handle").gfx.handle())
            .collect::<Vec<_>>();
        cmd.bind_descriptor_sets(layout, first_set, &sets, &[]);
    }

    pub fn destroy_bind_group(&self, handle: BindGroupHandle) {
        let mut state = self.lock();
        let group = state.bind_groups.remove(handle).expect("stale bind group handle");
        group.gfx.free();
    }

    /// 按句柄解析 update 描述，写入 descriptor set
    pub fn update_bind_group(&self, handle: BindGroupHandle, updates: &[BindingUpdateDescriptor]) {
        let state = &*self.lock();
        let group = state.bind_groups.get(handle).expect("stale bind group handle");

        let gfx_updates = updates
            .iter()
            .map(|update| match update {
                BindingUpdateDescriptor::UniformBuffer { binding, buffers } => GfxBindingUpdate::UniformBuffer {
                    binding: *binding,
                    element_index: 0,
                    buffers: buffers
                        .iter()
                        .map(|&b| {
                            let buffer = state.buffers.get(b).expect("stale buffer handle");
                            vk::DescriptorBufferInfo::default()
                                .buffer(buffer.gfx.vk_buffer())
                                .offset(0)
                                .range(buffer.gfx.size())
                        })
                        .collect(),
                },
                BindingUpdateDescriptor::StorageBuffer { binding, buffers } => GfxBindingUpdate::StorageBuffer {
                    binding: *binding,
                    element_index: 0,
                    buffers: buffers
                        .iter()
                        .map(|&b| {
                            let buffer = state.buffers.get(b).expect("stale buffer handle");
                            vk::DescriptorBufferInfo::default()
                                .buffer(buffer.gfx.vk_buffer())
                                .offset(0)
                                .range(buffer.gfx.size())
                        })
                        .collect(),
                },
                BindingUpdateDescriptor::Textures {
                    binding,
                    element_index,
                    textures,
                } => GfxBindingUpdate::CombinedImageSampler {
                    binding: *binding,
                    element_index: *element_index,
                    images: textures
                        .iter()
                        .map(|&(texture, sampler)| {
                            let texture = state.textures.get(texture).expect("stale texture handle");
                            let sampler = state.samplers.get(sampler).expect("stale sampler handle");
                            vk::DescriptorImageInfo::default()
                                .image_view(texture.image.default_view())
                                .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                                .sampler(sampler.gfx.handle())
                        })
                        .collect(),
                },
            })
            .collect::<Vec<_>>();

        group.gfx.update(&gfx_updates);
    }
}

/// update_bind_group 的句柄级描述
pub enum BindingUpdateDescriptor {
    UniformBuffer {
        binding: u32,
        buffers: Vec<BufferHandle>,
    },
    StorageBuffer {
        binding: u32,
        buffers: Vec<BufferHandle>,
    },
    Textures {
        binding: u32,
        element_index: u32,
        textures: Vec<(TextureHandle, SamplerHandle)>,
    },
}

// render pass & frame buffer
impl RenderResourceManager {
    pub fn create_render_pass(&self, name: &str, desc: &GfxRenderPassDesc) -> RenderPassHandle {
        let mut state = self.lock();
        assert!(state.render_passes.len() < MAX_RENDER_PASS_COUNT, "render pass pool exhausted");
        state.render_passes.insert(RenderPassResource {
            name: name.to_string(),
            gfx: GfxRenderPass::new(desc, name),
        })
    }

    pub fn destroy_render_pass(&self, handle: RenderPassHandle) {
        let mut state = self.lock();
        let pass = state.render_passes.remove(handle).expect("stale render pass handle");
        pass.gfx.destroy();
    }

    /// 原地重建 render pass 的 vk 对象，句柄保持有效
    ///
    /// render graph invalidate 时使用，引用它的 pipeline 句柄不会失效。
    pub fn recreate_render_pass(&self, handle: RenderPassHandle, desc: &GfxRenderPassDesc) {
        let state = &mut *self.lock();
        let name = state.render_passes.get(handle).expect("stale render pass handle").name.clone();
        let new_gfx = GfxRenderPass::new(desc, &name);
        let old = std::mem::replace(&mut state.render_passes[handle].gfx, new_gfx);
        old.destroy();
    }

    pub fn create_frame_buffer(
        &self,
        name: &str,
        render_pass: RenderPassHandle,
        attachments: &[TextureHandle],
        extent: vk::Extent2D,
    ) -> FrameBufferHandle {
        let state = &mut *self.lock();
        assert!(state.frame_buffers.len() < MAX_FRAME_BUFFER_COUNT, "frame buffer pool exhausted");

        let pass = state.render_passes.get(render_pass).expect("stale render pass handle");
        let views = attachments
            .iter()
            .map(|&t| state.textures.get(t).expect("stale texture handle").image.default_view())
            .collect::<Vec<_>>();

        let gfx = GfxFramebuffer::new(&pass.gfx, &views, extent, name);
        state.frame_buffers.insert(FrameBufferResource {
            name: name.to_string(),
            gfx,
            attachments: attachments.to_vec(),
        })
    }

    pub fn destroy_frame_buffer(&self, handle: FrameBufferHandle) {
        let mut state = self.lock();
        let fb = state.frame_buffers.remove(handle).expect("stale frame buffer handle");
        fb.gfx.destroy();
    }
}

// static mesh
impl RenderResourceManager {
    /// 顶点与索引追加进全局几何 buffer，经 transfer buffer 异步上传
    pub fn create_static_mesh(&self, desc: &StaticMeshDescriptor) -> StaticMeshHandle {
        let state = &mut *self.lock();
        assert!(state.static_meshes.len() < MAX_STATIC_MESH_COUNT, "static mesh pool exhausted");

        let vertex_count = desc.positions.len() as u32;
        let index_count = desc.indices.len() as u32;
        assert_eq!(desc.normals.len() as u32, vertex_count);
        assert_eq!(desc.uvs.len() as u32, vertex_count);
        assert_eq!(desc.tangents.len() as u32, vertex_count);
        assert!(
            state.vertex_cursor as usize + vertex_count as usize <= MAX_VERTEX_COUNT,
            "global vertex buffer exhausted"
        );
        assert!(
            state.index_cursor as usize + index_count as usize <= MAX_INDEX_COUNT,
            "global index buffer exhausted"
        );

        let base_vertex = state.vertex_cursor;
        let base_index = state.index_cursor;

        let uploads: [(BufferHandle, u64, &[u8]); 5] = [
            (
                state.position_buffer,
                base_vertex as u64 * size_of::<VertexPosition>() as u64,
                bytemuck::cast_slice(&desc.positions),
            ),
            (
                state.normal_buffer,
                base_vertex as u64 * size_of::<VertexNormal>() as u64,
                bytemuck::cast_slice(&desc.normals),
            ),
            (
                state.uv_buffer,
                base_vertex as u64 * size_of::<VertexUv>() as u64,
                bytemuck::cast_slice(&desc.uvs),
            ),
            (
                state.tangent_buffer,
                base_vertex as u64 * size_of::<VertexTangent>() as u64,
                bytemuck::cast_slice(&desc.tangents),
            ),
            (
                state.index_buffer,
                base_index as u64 * size_of::<u32>() as u64,
                bytemuck::cast_slice(&desc.indices),
            ),
        ];
        for (buffer, offset, bytes) in uploads {
            let dst = state.buffers.get(buffer).unwrap().gfx.vk_buffer();
            state.transfer.upload_to_buffer(dst, offset, bytes, &desc.name);
        }

        state.vertex_cursor += vertex_count;
        state.index_cursor += index_count;

        let sub_meshes = desc
            .sub_meshes
            .iter()
            .map(|sub| SubMesh {
                vertex_offset: base_vertex + sub.vertex_offset,
                index_offset: base_index + sub.index_offset,
                index_count: sub.index_count,
                vertex_count: sub.vertex_count,
                material: sub.material,
            })
            .collect();

        state.static_meshes.insert(StaticMeshResource {
            name: desc.name.clone(),
            vertex_count,
            index_count,
            sub_meshes,
        })
    }

    pub fn destroy_static_mesh(&self, handle: StaticMeshHandle) {
        // 全局几何 buffer 的区间不回收，只移除元数据
        let mut state = self.lock();
        state.static_meshes.remove(handle).expect("stale static mesh handle");
    }

    pub fn static_mesh_sub_meshes(&self, handle: StaticMeshHandle) -> Vec<SubMesh> {
        self.lock().static_meshes.get(handle).expect("stale static mesh handle").sub_meshes.clone()
    }
}

// semaphore
impl RenderResourceManager {
    pub fn create_semaphore(&self, name: &str) -> SemaphoreHandle {
        let mut state = self.lock();
        assert!(state.semaphores.len() < MAX_SEMAPHORE_COUNT, "semaphore pool exhausted");
        state.semaphores.insert(SemaphoreResource {
            gfx: hanabi_gfx::commands::semaphore::GfxSemaphore::new(name),
        })
    }

    pub fn destroy_semaphore(&self, handle: SemaphoreHandle) {
        let mut state = self.lock();
        let semaphore = state.semaphores.remove(handle).expect("stale semaphore handle");
        semaphore.gfx.destroy();
    }
}

// 每帧维护
impl RenderResourceManager {
    /// 轮询 transfer 的 allocation group，回收完成的上传
    pub fn update(&self) {
        self.lock().transfer.update();
    }

    pub fn wait_uploads(&self) {
        self.lock().transfer.flush_all();
    }
}

// getter
impl RenderResourceManager {
    pub fn white_pixel_texture(&self) -> TextureHandle {
        self.lock().white_pixel_texture
    }

    pub fn normal_pixel_texture(&self) -> TextureHandle {
        self.lock().normal_pixel_texture
    }

    pub fn default_sampler(&self) -> SamplerHandle {
        self.lock().default_sampler
    }

    pub fn default_material(&self) -> MaterialHandle {
        self.lock().default_material
    }

    pub fn set_default_material(&self, material: MaterialHandle) {
        self.lock().default_material = material;
    }

    /// 三缓冲开关切换时更新；新建材质的 dirty_count 以此为准
    pub fn set_frames_in_flight(&self, frames_in_flight: usize) {
        assert!(frames_in_flight == 2 || frames_in_flight == 3);
        self.lock().frames_in_flight = frames_in_flight;
    }

    pub fn globals_set_layout(&self) -> BindGroupLayoutHandle {
        self.lock().globals_set_layout
    }

    pub fn bindless_set_layout(&self) -> BindGroupLayoutHandle {
        self.lock().bindless_set_layout
    }

    pub fn save_pipeline_cache(&self, path: &std::path::Path) {
        if let Err(e) = self.lock().pipeline_cache.save(path) {
            log::error!("failed to save pipeline cache: {e}");
        }
    }
}

// destroy
impl RenderResourceManager {
    /// 销毁所有资源，调用前必须保证 GPU 空闲
    pub fn destroy(self) {
        let state = self.state.into_inner().unwrap();

        for (_, material) in state.materials {
            drop(material);
        }
        for (_, fb) in state.frame_buffers {
            fb.gfx.destroy();
        }
        for (_, pass) in state.render_passes {
            pass.gfx.destroy();
        }
        for (_, pipeline) in state.pipeline_states {
            pipeline.gfx.destroy();
        }
        for (_, group) in state.bind_groups {
            group.gfx.free();
        }
        for (_, layout) in state.bind_group_layouts {
            layout.gfx.destroy();
        }
        for (_, shader) in state.shaders {
            shader.module.destroy();
        }
        for (_, sampler) in state.samplers {
            sampler.gfx.destroy();
        }
        for (_, texture) in state.textures {
            texture.image.destroy();
        }
        for (_, buffer) in state.buffers {
            buffer.gfx.destroy();
        }
        for (_, semaphore) in state.semaphores {
            semaphore.gfx.destroy();
        }

        state.transfer.destroy();
        state.pipeline_cache.destroy();
    }
}
