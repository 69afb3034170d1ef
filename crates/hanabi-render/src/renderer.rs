use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use ash::vk;
use glam::{Mat4, Vec3};
use hanabi_asset::{AssetHandle, AssetManager};
use hanabi_gfx::commands::barrier::GfxImageBarrier;
use hanabi_gfx::commands::command_buffer::GfxCommandBuffer;
use hanabi_gfx::commands::command_pool::GfxCommandPool;
use hanabi_gfx::commands::fence::GfxFence;
use hanabi_gfx::commands::semaphore::GfxSemaphore;
use hanabi_gfx::commands::submit_info::GfxSubmitInfo;
use hanabi_gfx::gfx::Gfx;
use hanabi_gfx::pipelines::graphics_pipeline::RasterizationSettings;
use hanabi_gfx::swapchain::render_swapchain::{GfxAcquireResult, GfxRenderSwapchain};
use itertools::Itertools;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::asset_types::model::OPAQUE_PBR_SHADER_PATH;
use crate::asset_types::scene::{default_scene_text, serialize_scene};
use crate::asset_types::{builtin_asset_types, RenderAssetEnv};
use crate::bindless::BindlessManager;
use crate::graph::{AttachmentInfo, AttachmentOperation, NodeExecuteContext, NodeTargetDesc, RenderGraph};
use crate::handles::*;
use crate::resources::{
    BindingUpdateDescriptor, BufferDescriptor, BufferUsage, MaterialPropertyValue, RenderResourceManager,
};
use crate::scene::{FramePackets, SceneManager};
use crate::settings::*;
use crate::shader_data::{Globals, ObjectData};

/// host 每帧提供的场景视图数据
pub struct SceneView {
    pub camera_view: Mat4,
    pub camera_projection: Mat4,
    pub light_direction: Vec3,
    pub light_color: Vec3,
    pub light_intensity: f32,
}

/// UI 节点的绘制回调，core 不依赖任何具体的 immediate-mode 库
pub type DrawUiFn = Box<dyn FnMut(&NodeExecuteContext)>;

pub struct RendererCreateInfo {
    pub app_name: String,
    pub asset_root: PathBuf,
    pub display_handle: RawDisplayHandle,
    pub window_handle: RawWindowHandle,
    pub window_extent: vk::Extent2D,
    pub draw_ui: Option<DrawUiFn>,
}

/// world pass 绘制需要的共享绑定，graph 闭包与 renderer 两边访问
struct WorldBindings {
    world_render_pass: RenderPassHandle,
    globals_sets: Vec<vk::DescriptorSet>,
    bindless_sets: Vec<vk::DescriptorSet>,
    position_buffer: vk::Buffer,
    normal_buffer: vk::Buffer,
    uv_buffer: vk::Buffer,
    tangent_buffer: vk::Buffer,
    index_buffer: vk::Buffer,
}

/// 渲染器
///
/// 帧调度模型: 一个主线程驱动 begin_frame / render / end_frame，
/// asset 加载 job 在 worker 线程创建渲染资源，backend 调用由
/// render commands mutex 串行化。
pub struct Renderer {
    settings: RendererSettings,
    back_buffer_extent: vk::Extent2D,

    rm: Arc<RenderResourceManager>,
    assets: Arc<AssetManager>,
    env: Arc<RenderAssetEnv>,
    scene: Arc<Mutex<SceneManager>>,
    packets: Arc<Mutex<FramePackets>>,

    graph: RenderGraph,
    bindless: BindlessManager,
    world_bindings: Arc<Mutex<WorldBindings>>,

    swapchain: Option<GfxRenderSwapchain>,
    display_handle: RawDisplayHandle,
    window_handle: RawWindowHandle,

    command_pool: GfxCommandPool,
    command_buffers: Vec<GfxCommandBuffer>,
    in_flight_fences: Vec<GfxFence>,
    /// 每个 frame in flight 一个
    image_available_semaphores: Vec<GfxSemaphore>,
    /// 每个 swapchain image 一个
    render_finished_semaphores: Vec<GfxSemaphore>,

    globals_buffers: Vec<BufferHandle>,
    object_data_buffers: Vec<BufferHandle>,
    globals_bind_groups: Vec<BindGroupHandle>,

    current_frame_in_flight_index: usize,
    frame_id: u64,
    /// swapchain suboptimal / 设置变更后置位，下一帧开始时重建
    needs_invalidate: bool,
    /// acquire 失败时跳过本帧的提交
    frame_skipped: bool,

    pipeline_cache_path: PathBuf,
    default_material_assets: (AssetHandle, PipelineStateHandle, MaterialHandle),
    current_scene: AssetHandle,
}

// new & init
impl Renderer {
    pub fn new(mut create_info: RendererCreateInfo) -> anyhow::Result<Self> {
        let _span = tracy_client::span!("Renderer::new");
        hanabi_crate_tools::init_log();

        let surface_extensions = ash_window::enumerate_required_extensions(create_info.display_handle)?
            .iter()
            .map(|ext| unsafe { std::ffi::CStr::from_ptr(*ext) })
            .collect_vec();
        Gfx::init(create_info.app_name.clone(), surface_extensions);

        let mut settings = RendererSettings::default();
        settings.clamp();

        let swapchain = GfxRenderSwapchain::new(
            create_info.display_handle,
            create_info.window_handle,
            settings.present_mode(),
            DefaultRendererSettings::DEFAULT_SURFACE_FORMAT,
            create_info.window_extent,
        );
        let back_buffer_extent = swapchain.extent();

        let pipeline_cache_path = create_info.asset_root.join("shaders/bin/pipeline.cache");
        let rm = Arc::new(RenderResourceManager::new(Some(&pipeline_cache_path), &settings));

        let scene = Arc::new(Mutex::new(SceneManager::new()));
        let env = Arc::new(RenderAssetEnv::new(rm.clone(), scene.clone()));

        let assets = Arc::new(AssetManager::init(&create_info.asset_root, builtin_asset_types(env.clone()))?);
        env.bind_asset_manager(&assets);

        let packets = Arc::new(Mutex::new(FramePackets::default()));
        let world_bindings = Arc::new(Mutex::new(WorldBindings {
            world_render_pass: RenderPassHandle::default(),
            globals_sets: Vec::new(),
            bindless_sets: Vec::new(),
            position_buffer: vk::Buffer::null(),
            normal_buffer: vk::Buffer::null(),
            uv_buffer: vk::Buffer::null(),
            tangent_buffer: vk::Buffer::null(),
            index_buffer: vk::Buffer::null(),
        }));

        let skybox_cube = Self::create_skybox_cube(&rm);

        let mut graph = Self::build_default_graph(
            &rm,
            &assets,
            &scene,
            &packets,
            &world_bindings,
            skybox_cube,
            create_info.draw_ui.take(),
        );
        graph.compile(&rm, back_buffer_extent, settings.vk_sample_count(), settings.frames_in_flight());

        let world_node = graph.find_node("world").unwrap();
        let world_render_pass = graph.node_render_pass(world_node);
        env.set_world_render_pass(world_render_pass);

        // per-frame 资源按上限创建，三缓冲开关切换时不用重建
        let command_pool = GfxCommandPool::new(
            Gfx::get().gfx_queue().queue_family().clone(),
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            "frame-commands",
        );
        let command_buffers = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|fif| GfxCommandBuffer::new(&command_pool, &format!("frame-{fif}")))
            .collect_vec();
        let in_flight_fences = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|fif| GfxFence::new(true, &format!("frame-in-flight-{fif}")))
            .collect_vec();
        let image_available_semaphores = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|fif| GfxSemaphore::new(&format!("image-available-{fif}")))
            .collect_vec();
        let render_finished_semaphores = (0..swapchain.image_infos().image_cnt)
            .map(|index| GfxSemaphore::new(&format!("render-finished-{index}")))
            .collect_vec();

        let globals_buffers = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|fif| {
                rm.create_buffer(&BufferDescriptor {
                    name: format!("globals-{fif}"),
                    size: size_of::<Globals>() as u64,
                    usage: BufferUsage::Uniform,
                    is_device_local: false,
                })
            })
            .collect_vec();
        let object_data_buffers = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|fif| {
                rm.create_buffer(&BufferDescriptor {
                    name: format!("object-data-{fif}"),
                    size: (MAX_OBJECT_DATA_COUNT * size_of::<ObjectData>()) as u64,
                    usage: BufferUsage::Storage,
                    is_device_local: false,
                })
            })
            .collect_vec();

        let globals_layout = rm.globals_set_layout();
        let globals_bind_groups = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|fif| {
                let group = rm.create_bind_group(globals_layout, &format!("globals-{fif}"));
                rm.update_bind_group(
                    group,
                    &[
                        BindingUpdateDescriptor::UniformBuffer {
                            binding: 0,
                            buffers: vec![globals_buffers[fif]],
                        },
                        BindingUpdateDescriptor::StorageBuffer {
                            binding: 1,
                            buffers: vec![object_data_buffers[fif]],
                        },
                    ],
                );
                group
            })
            .collect_vec();

        let bindless = BindlessManager::new(&rm, MAX_FRAMES_IN_FLIGHT);

        let mut renderer = Self {
            settings,
            back_buffer_extent,
            rm,
            assets,
            env,
            scene,
            packets,
            graph,
            bindless,
            world_bindings,
            swapchain: Some(swapchain),
            display_handle: create_info.display_handle,
            window_handle: create_info.window_handle,
            command_pool,
            command_buffers,
            in_flight_fences,
            image_available_semaphores,
            render_finished_semaphores,
            globals_buffers,
            object_data_buffers,
            globals_bind_groups,
            current_frame_in_flight_index: 0,
            frame_id: 1,
            needs_invalidate: false,
            frame_skipped: false,
            pipeline_cache_path,
            default_material_assets: (AssetHandle::INVALID, PipelineStateHandle::default(), MaterialHandle::default()),
            current_scene: AssetHandle::INVALID,
        };

        renderer.refresh_world_bindings();
        renderer.bootstrap_default_material();

        log::info!("renderer initialized: back buffer {}x{}", back_buffer_extent.width, back_buffer_extent.height);
        Ok(renderer)
    }

    /// 内嵌在全局几何 buffer 里的单位立方体，天空盒用
    ///
    /// 索引朝内缠绕，从立方体内部看是正面。
    fn create_skybox_cube(rm: &RenderResourceManager) -> StaticMeshHandle {
        let positions: Vec<[f32; 3]> = vec![
            [-1.0, -1.0, -1.0],
            [1.0, -1.0, -1.0],
            [1.0, 1.0, -1.0],
            [-1.0, 1.0, -1.0],
            [-1.0, -1.0, 1.0],
            [1.0, -1.0, 1.0],
            [1.0, 1.0, 1.0],
            [-1.0, 1.0, 1.0],
        ];
        let indices = vec![
            6, 5, 1, 1, 2, 6, // +X
            3, 0, 4, 4, 7, 3, // -X
            6, 2, 3, 3, 7, 6, // +Y
            1, 5, 4, 4, 0, 1, // -Y
            7, 4, 5, 5, 6, 7, // +Z
            2, 1, 0, 0, 3, 2, // -Z
        ];
        let vertex_count = positions.len();

        rm.create_static_mesh(&crate::resources::StaticMeshDescriptor {
            name: "skybox-cube".to_string(),
            positions,
            normals: vec![[0.0, 0.0, 0.0]; vertex_count],
            uvs: vec![[0.0, 0.0]; vertex_count],
            tangents: vec![[0.0, 0.0, 0.0, 0.0]; vertex_count],
            indices,
            sub_meshes: vec![crate::resources::SubMeshDescriptor {
                vertex_offset: 0,
                index_offset: 0,
                index_count: 36,
                vertex_count: vertex_count as u32,
                material: AssetHandle::INVALID,
            }],
        })
    }

    /// 默认 render graph:
    /// world 节点先画天空盒、再画排序后的不透明 packet
    /// （MSAA color + depth，resolve 到单采样 color），
    /// ui 节点 Load resolve 结果叠加 UI，resolve 结果是 presentable。
    fn build_default_graph(
        rm: &Arc<RenderResourceManager>,
        assets: &Arc<AssetManager>,
        scene: &Arc<Mutex<SceneManager>>,
        packets: &Arc<Mutex<FramePackets>>,
        world_bindings: &Arc<Mutex<WorldBindings>>,
        skybox_cube: StaticMeshHandle,
        draw_ui: Option<DrawUiFn>,
    ) -> RenderGraph {
        let mut graph = RenderGraph::new();

        let depth_format = Gfx::get()
            .find_supported_format(
                DefaultRendererSettings::DEPTH_FORMAT_CANDIDATES,
                vk::ImageTiling::OPTIMAL,
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            )
            .first()
            .copied()
            .unwrap_or(vk::Format::D32_SFLOAT);

        let world_targets = vec![
            NodeTargetDesc {
                name: "world_color".to_string(),
                operation: AttachmentOperation::Clear,
                info: Some(AttachmentInfo {
                    format: DefaultRendererSettings::COLOR_FORMAT,
                    resizable_sample: true,
                    ..Default::default()
                }),
                clear_value: vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: [0.0, 0.0, 0.0, 1.0],
                    },
                },
            },
            NodeTargetDesc {
                name: "world_depth".to_string(),
                operation: AttachmentOperation::Clear,
                info: Some(AttachmentInfo {
                    format: depth_format,
                    resizable_sample: true,
                    ..Default::default()
                }),
                clear_value: vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
                },
            },
        ];

        let world_render = {
            let rm = rm.clone();
            let assets = assets.clone();
            let scene = scene.clone();
            let packets = packets.clone();
            let bindings = world_bindings.clone();
            move |ctx: &NodeExecuteContext| {
                let bindings = bindings.lock().unwrap();

                // 场景的天空盒材质，未加载时本帧不画天空盒
                let skybox_asset = scene.lock().unwrap().skybox_material;
                let packets = packets.lock().unwrap();
                let skybox_material = if skybox_asset.is_valid() && assets.is_loaded(skybox_asset) {
                    let handle = MaterialHandle::from_raw(assets.get(skybox_asset).as_raw());
                    rm.is_material_valid(handle).then_some(handle)
                } else {
                    None
                };

                let bucket = packets.buckets.get(&bindings.world_render_pass);
                let has_packets = bucket.is_some_and(|b| !b.is_empty());
                if skybox_material.is_none() && !has_packets {
                    return;
                }

                ctx.cmd.bind_vertex_buffers(
                    0,
                    &[
                        bindings.position_buffer,
                        bindings.normal_buffer,
                        bindings.uv_buffer,
                        bindings.tangent_buffer,
                    ],
                    &[0, 0, 0, 0],
                );
                ctx.cmd.bind_index_buffer(bindings.index_buffer, 0, vk::IndexType::UINT32);

                let fif = *ctx.frame_label;
                let mut bound_pipeline = None;
                let mut globals_bound = false;

                // 天空盒先于不透明物体绘制
                if let Some(material) = skybox_material {
                    rm.use_material(ctx.cmd, material, ctx.frame_label, &assets, &mut bound_pipeline);
                    if !globals_bound {
                        // 所有 pipeline 共享权威的 set 0 / set 1 layout，绑定一次即可
                        let layout = rm.pipeline_vk_layout(rm.material_pipeline(material));
                        ctx.cmd.bind_descriptor_sets(
                            layout,
                            0,
                            &[bindings.globals_sets[fif], bindings.bindless_sets[fif]],
                            &[],
                        );
                        globals_bound = true;
                    }

                    let sub_meshes = rm.static_mesh_sub_meshes(skybox_cube);
                    let sub = &sub_meshes[0];
                    ctx.cmd.draw_indexed(sub.index_count, 1, sub.index_offset, sub.vertex_offset as i32, 0);
                }

                let Some(bucket) = bucket else {
                    return;
                };

                // packet 已按 (pipeline, material, ...) 排序，
                // 连续相同材质只 use 一次，dirty_count 每帧最多递减一次
                let mut current_material = None;
                for packet in bucket.iter() {
                    if current_material != Some(packet.material) {
                        rm.use_material(ctx.cmd, packet.material, ctx.frame_label, &assets, &mut bound_pipeline);
                        current_material = Some(packet.material);

                        if !globals_bound {
                            let layout = rm.pipeline_vk_layout(packet.pipeline);
                            ctx.cmd.bind_descriptor_sets(
                                layout,
                                0,
                                &[bindings.globals_sets[fif], bindings.bindless_sets[fif]],
                                &[],
                            );
                            globals_bound = true;
                        }
                    }

                    let sub_meshes = rm.static_mesh_sub_meshes(packet.static_mesh);
                    let sub = &sub_meshes[packet.sub_mesh_index as usize];
                    ctx.cmd.draw_indexed(
                        sub.index_count,
                        1,
                        sub.index_offset,
                        sub.vertex_offset as i32,
                        packet.transform_index,
                    );
                }
            }
        };
        let world_node = graph.add_node("world", world_targets, world_render);
        graph.add_resolve_color_attachment(world_node, "world_color", "resolved_color");

        // UI 是外部节点：core 只负责调 hook
        let ui_targets = vec![NodeTargetDesc {
            name: "resolved_color".to_string(),
            operation: AttachmentOperation::Load,
            info: None,
            clear_value: vk::ClearValue::default(),
        }];
        let mut draw_ui = draw_ui;
        graph.add_node("ui", ui_targets, move |ctx| {
            if let Some(draw_ui) = draw_ui.as_mut() {
                draw_ui(ctx);
            }
        });

        graph.set_presentable_attachment("resolved_color");
        graph
    }

    /// 启动期的默认材质：opaque_pbr shader + 白色 albedo
    fn bootstrap_default_material(&mut self) {
        let shader = self.assets.import_asset(OPAQUE_PBR_SHADER_PATH);
        if !shader.is_valid() {
            log::warn!("opaque_pbr shader is missing, meshes without materials will be skipped");
            return;
        }

        let job = self.assets.acquire(shader);
        self.assets.job_system().wait(job);
        if !self.assets.is_loaded(shader) {
            log::error!("failed to load the opaque_pbr shader, default material unavailable");
            return;
        }

        let group = ShaderGroupHandle::from_raw(self.assets.get(shader).as_raw());
        let world_node = self.graph.find_node("world").unwrap();
        let pipeline = self.rm.create_pipeline_state(
            "default-material",
            RasterizationSettings::default(),
            group,
            self.graph.node_render_pass(world_node),
        );
        let material = self.rm.create_material("default-material", pipeline);
        self.rm.set_material_property(
            material,
            "albedo_color",
            MaterialPropertyValue::Vector4([1.0, 1.0, 1.0, 1.0]),
            &self.assets,
        );
        self.rm.set_default_material(material);
        self.default_material_assets = (shader, pipeline, material);
    }

    fn refresh_world_bindings(&self) {
        let mut bindings = self.world_bindings.lock().unwrap();

        let world_node = self.graph.find_node("world").unwrap();
        bindings.world_render_pass = self.graph.node_render_pass(world_node);

        bindings.globals_sets = self
            .globals_bind_groups
            .iter()
            .map(|&group| self.rm.bind_group_vk_handle(group))
            .collect();
        bindings.bindless_sets = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|fif| self.bindless.current_set(FrameLabel::from_usize(fif)))
            .collect();

        let state = self.rm.lock();
        bindings.position_buffer = state.buffers[state.position_buffer].gfx.vk_buffer();
        bindings.normal_buffer = state.buffers[state.normal_buffer].gfx.vk_buffer();
        bindings.uv_buffer = state.buffers[state.uv_buffer].gfx.vk_buffer();
        bindings.tangent_buffer = state.buffers[state.tangent_buffer].gfx.vk_buffer();
        bindings.index_buffer = state.buffers[state.index_buffer].gfx.vk_buffer();
    }
}

// getter
impl Renderer {
    #[inline]
    pub fn assets(&self) -> &Arc<AssetManager> {
        &self.assets
    }

    #[inline]
    pub fn resource_manager(&self) -> &Arc<RenderResourceManager> {
        &self.rm
    }

    #[inline]
    pub fn scene(&self) -> &Arc<Mutex<SceneManager>> {
        &self.scene
    }

    #[inline]
    pub fn settings(&self) -> &RendererSettings {
        &self.settings
    }

    #[inline]
    pub fn frame_label(&self) -> FrameLabel {
        FrameLabel::from_usize(self.current_frame_in_flight_index)
    }

    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }
}

// phase call
impl Renderer {
    /// 帧开始
    ///
    /// 1. 等待本 slot 的 in-flight fence
    /// 2. 回收完成的 transfer allocation group
    /// 3. 写入本帧 globals（投影矩阵 y 轴翻转）
    /// 4. acquire swapchain image，out-of-date 时重建后重试
    /// 5. 重置并开始录制本帧 command buffer，重建 bindless 描述符
    pub fn begin_frame(&mut self, scene_view: &SceneView) {
        let _span = tracy_client::span!("Renderer::begin_frame");
        let fif = self.current_frame_in_flight_index;
        let frame_label = FrameLabel::from_usize(fif);

        self.in_flight_fences[fif].wait();

        if self.needs_invalidate {
            self.rebuild_swapchain_and_graph();
        }

        self.rm.update();

        // globals: y 轴翻转交给投影矩阵（图形 API 约定）
        let mut projection = scene_view.camera_projection;
        projection.y_axis.y = -projection.y_axis.y;
        let ambient_color = self.scene.lock().unwrap().ambient_color;
        let globals = Globals {
            view: scene_view.camera_view.to_cols_array_2d(),
            projection: projection.to_cols_array_2d(),
            directional_light_direction: scene_view.light_direction.to_array(),
            _padding_0: 0.0,
            directional_light_color: (scene_view.light_color * scene_view.light_intensity).to_array(),
            gamma: self.settings.gamma,
            ambient_color,
            _padding_1: 0.0,
        };
        self.rm.write_buffer(self.globals_buffers[fif], 0, bytemuck::bytes_of(&globals));

        // acquire；out-of-date 时重建并重试一次
        self.frame_skipped = false;
        let mut attempts = 0;
        loop {
            let result = self.swapchain.as_mut().unwrap().acquire_next_image(
                Some(&self.image_available_semaphores[fif]),
                None,
                u64::MAX,
            );
            match result {
                GfxAcquireResult::Success => break,
                GfxAcquireResult::Suboptimal => {
                    // image 可用，本帧继续，下一帧重建
                    self.needs_invalidate = true;
                    break;
                }
                GfxAcquireResult::OutOfDate => {
                    self.rebuild_swapchain_and_graph();
                    attempts += 1;
                    if attempts >= 2 {
                        log::warn!("swapchain acquire keeps failing, skipping frame {}", self.frame_id);
                        self.frame_skipped = true;
                        return;
                    }
                }
            }
        }

        let cmd = &self.command_buffers[fif];
        cmd.reset();
        cmd.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, &format!("frame-{}", self.frame_id));

        // bindless 数组覆盖每个纹理 slot，空位回落 white-pixel
        self.bindless.update(&self.rm, frame_label);
    }

    /// 场景遍历 + 按拓扑序执行 graph 节点
    pub fn render(&mut self) {
        let _span = tracy_client::span!("Renderer::render");
        if self.frame_skipped {
            return;
        }
        let fif = self.current_frame_in_flight_index;
        let frame_label = FrameLabel::from_usize(fif);

        {
            let scene = self.scene.lock().unwrap();
            let mut packets = self.packets.lock().unwrap();
            scene.parse_scene(&self.assets, &self.rm, &mut packets);

            if !packets.object_data.is_empty() {
                self.rm.write_buffer(
                    self.object_data_buffers[fif],
                    0,
                    bytemuck::cast_slice(&packets.object_data),
                );
            }
        }

        let cmd = self.command_buffers[fif].clone();
        self.graph.execute(&self.rm, &cmd, frame_label);
    }

    /// 帧结束：presentable attachment blit 到 swapchain image，提交并 present
    pub fn end_frame(&mut self) {
        let _span = tracy_client::span!("Renderer::end_frame");
        let fif = self.current_frame_in_flight_index;
        let frame_label = FrameLabel::from_usize(fif);

        if self.frame_skipped {
            self.frame_id += 1;
            return;
        }

        let cmd = &self.command_buffers[fif];
        let swapchain = self.swapchain.as_ref().unwrap();
        let swapchain_image = swapchain.current_image();
        let swapchain_extent = swapchain.extent();
        let image_index = swapchain.current_image_index();

        // presentable -> swapchain
        let presentable = self.graph.presentable_texture(frame_label);
        let (src_image, src_extent) = {
            let state = self.rm.lock();
            let texture = state.textures.get(presentable).expect("stale presentable texture");
            (texture.image.vk_image(), texture.image.extent())
        };

        let to_transfer_dst = GfxImageBarrier::new()
            .image(swapchain_image)
            .image_aspect_flag(vk::ImageAspectFlags::COLOR)
            .src_mask(vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::empty())
            .dst_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE)
            .layout_transfer(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        cmd.image_memory_barrier(vk::DependencyFlags::empty(), std::slice::from_ref(&to_transfer_dst));

        let blit = vk::ImageBlit2::default()
            .src_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .src_offsets([
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D {
                    x: src_extent.width as i32,
                    y: src_extent.height as i32,
                    z: 1,
                },
            ])
            .dst_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .dst_offsets([
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D {
                    x: swapchain_extent.width as i32,
                    y: swapchain_extent.height as i32,
                    z: 1,
                },
            ]);
        cmd.blit_image(
            &vk::BlitImageInfo2::default()
                .src_image(src_image)
                .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                .dst_image(swapchain_image)
                .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .filter(vk::Filter::LINEAR)
                .regions(std::slice::from_ref(&blit)),
        );

        let to_present = GfxImageBarrier::new()
            .image(swapchain_image)
            .image_aspect_flag(vk::ImageAspectFlags::COLOR)
            .src_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE)
            .dst_mask(vk::PipelineStageFlags2::BOTTOM_OF_PIPE, vk::AccessFlags2::empty())
            .layout_transfer(vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::PRESENT_SRC_KHR);
        cmd.image_memory_barrier(vk::DependencyFlags::empty(), std::slice::from_ref(&to_present));

        cmd.end();

        self.in_flight_fences[fif].reset();
        let submit_info = GfxSubmitInfo::new(std::slice::from_ref(cmd))
            .wait(
                &self.image_available_semaphores[fif],
                vk::PipelineStageFlags2::TRANSFER,
                None,
            )
            .signal(
                &self.render_finished_semaphores[image_index],
                vk::PipelineStageFlags2::ALL_COMMANDS,
                None,
            );
        Gfx::get().gfx_queue().submit(vec![submit_info], Some(&self.in_flight_fences[fif]));

        let needs_recreate = self
            .swapchain
            .as_ref()
            .unwrap()
            .present_image(Gfx::get().gfx_queue(), &[self.render_finished_semaphores[image_index].clone()]);
        if needs_recreate {
            self.needs_invalidate = true;
        }

        self.frame_id += 1;
        self.current_frame_in_flight_index = (fif + 1) % self.settings.frames_in_flight();
    }
}

// 设置与尺寸变化
impl Renderer {
    pub fn on_resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.back_buffer_extent = vk::Extent2D { width, height };
        self.needs_invalidate = true;
    }

    pub fn set_vsync(&mut self, vsync: bool) {
        if self.settings.vsync == vsync {
            return;
        }
        self.settings.vsync = vsync;
        self.needs_invalidate = true;
    }

    pub fn set_gamma(&mut self, gamma: f32) {
        self.settings.gamma = gamma.clamp(2.0, 2.4);
    }

    /// MSAA 变化会重建 graph 的 attachment 与 render pass，
    /// 并原地重建所有 pipeline；材质无需重建。
    pub fn set_msaa(&mut self, samples: u32) {
        if self.settings.msaa_samples == samples {
            return;
        }
        self.settings.msaa_samples = samples;
        self.settings.clamp();

        Gfx::get().wait_idle();
        self.graph.invalidate(
            &self.rm,
            self.back_buffer_extent,
            self.settings.vk_sample_count(),
            self.settings.frames_in_flight(),
        );
        self.rm.recreate_all_pipelines();
        self.refresh_world_bindings();
    }

    /// 三缓冲开关；graph 与 swapchain 在下一帧开始时重建
    pub fn set_triple_buffering(&mut self, triple_buffering: bool) {
        if self.settings.triple_buffering == triple_buffering {
            return;
        }
        Gfx::get().wait_idle();
        self.settings.triple_buffering = triple_buffering;
        self.rm.set_frames_in_flight(self.settings.frames_in_flight());
        self.current_frame_in_flight_index = 0;
        self.needs_invalidate = true;
    }

    /// sampler 身份变化：等 GPU 空闲、重建默认 sampler，
    /// 引用它的描述符在下一帧 bindless 重写时全部更新。
    pub fn set_anisotropy(&mut self, anisotropy: u32) {
        if self.settings.anisotropy == anisotropy {
            return;
        }
        self.settings.anisotropy = anisotropy;
        self.settings.clamp();
        self.rm.recreate_default_sampler(anisotropy);
    }

    fn rebuild_swapchain_and_graph(&mut self) {
        let _span = tracy_client::span!("Renderer::rebuild_swapchain_and_graph");
        Gfx::get().wait_idle();

        if let Some(swapchain) = self.swapchain.take() {
            swapchain.destroy();
        }
        let swapchain = GfxRenderSwapchain::new(
            self.display_handle,
            self.window_handle,
            self.settings.present_mode(),
            DefaultRendererSettings::DEFAULT_SURFACE_FORMAT,
            self.back_buffer_extent,
        );
        self.back_buffer_extent = swapchain.extent();

        // swapchain image 数量可能变化
        let image_count = swapchain.image_infos().image_cnt;
        if image_count != self.render_finished_semaphores.len() {
            for semaphore in self.render_finished_semaphores.drain(..) {
                semaphore.destroy();
            }
            self.render_finished_semaphores =
                (0..image_count).map(|index| GfxSemaphore::new(&format!("render-finished-{index}"))).collect_vec();
        }
        self.swapchain = Some(swapchain);

        self.graph.invalidate(
            &self.rm,
            self.back_buffer_extent,
            self.settings.vk_sample_count(),
            self.settings.frames_in_flight(),
        );
        self.refresh_world_bindings();
        self.needs_invalidate = false;

        log::info!(
            "swapchain and render graph rebuilt: {}x{}",
            self.back_buffer_extent.width,
            self.back_buffer_extent.height
        );
    }
}

// 场景文件
impl Renderer {
    /// 导入并加载一个场景
    ///
    /// 文件不存在时先写出只含 root 的默认场景（skybox 颜色 (0,0,0)）
    /// 再导入，重启后 re-import 返回同一个 uuid。
    pub fn load_scene(&mut self, relative_path: &str) -> AssetHandle {
        let absolute_path = self.assets.asset_path().join(relative_path);
        if !absolute_path.is_file() {
            if let Some(parent) = absolute_path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            if let Err(e) = std::fs::write(&absolute_path, default_scene_text()) {
                log::error!("failed to create default scene {absolute_path:?}: {e}");
                return AssetHandle::INVALID;
            }
            log::info!("created default scene at {absolute_path:?}");
        }

        let handle = self.assets.import_asset(relative_path);
        if !handle.is_valid() {
            return handle;
        }

        if self.current_scene.is_valid() && self.current_scene != handle {
            self.assets.release(self.current_scene);
        }
        self.assets.acquire(handle);
        self.current_scene = handle;
        handle
    }

    /// 把当前场景树写回它的 .hascene 文件
    pub fn save_scene(&self) -> anyhow::Result<()> {
        if !self.current_scene.is_valid() {
            anyhow::bail!("no scene is loaded");
        }
        let entry = self.assets.registry_entry(self.current_scene);
        let text = serialize_scene(&self.scene.lock().unwrap());
        std::fs::write(self.assets.asset_path().join(&entry.path), text)?;
        Ok(())
    }
}

// destroy
impl Renderer {
    pub fn destroy(self) {
        Gfx::get().wait_idle();

        if self.current_scene.is_valid() && self.assets.is_loaded(self.current_scene) {
            self.assets.release(self.current_scene);
        }

        let (_, default_pipeline, default_material) = self.default_material_assets;
        if self.rm.is_material_valid(default_material) {
            self.rm.destroy_material(default_material);
            self.rm.destroy_pipeline_state(default_pipeline);
        }
        let (default_shader, _, _) = self.default_material_assets;
        if default_shader.is_valid() && self.assets.is_loaded(default_shader) {
            self.assets.release(default_shader);
        }

        let Renderer {
            rm,
            assets,
            env,
            graph,
            command_pool,
            mut in_flight_fences,
            mut image_available_semaphores,
            mut render_finished_semaphores,
            swapchain,
            pipeline_cache_path,
            ..
        } = self;

        // 先销毁 graph：节点闭包持有 assets / rm 的 Arc
        graph.destroy(&rm);

        assets.deinit();

        rm.wait_uploads();
        rm.save_pipeline_cache(&pipeline_cache_path);

        for fence in in_flight_fences.drain(..) {
            fence.destroy();
        }
        for semaphore in image_available_semaphores.drain(..) {
            semaphore.destroy();
        }
        for semaphore in render_finished_semaphores.drain(..) {
            semaphore.destroy();
        }
        command_pool.destroy();

        if let Some(swapchain) = swapchain {
            swapchain.destroy();
        }

        // 解开 Arc 链，独占后销毁资源池
        drop(assets);
        drop(env);
        let rm = Arc::try_unwrap(rm).unwrap_or_else(|_| panic!("resource manager is still shared at shutdown"));
        rm.destroy();

        Gfx::destroy();
    }
}
