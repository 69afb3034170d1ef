use std::collections::{HashMap, VecDeque};

use ash::vk;
use hanabi_gfx::commands::command_buffer::GfxCommandBuffer;
use hanabi_gfx::pipelines::render_pass::{GfxAttachmentDesc, GfxRenderPassDesc};

use crate::handles::{FrameBufferHandle, RenderPassHandle, TextureHandle};
use crate::resources::{RenderResourceManager, TextureDescriptor};
use crate::settings::{FrameLabel, MAX_FRAMES_IN_FLIGHT};

/// attachment 的读写方式
///
/// Clear/DontCare 视为生产者，Load 视为消费者，依赖边由此推导。
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AttachmentOperation {
    Clear,
    Load,
    DontCare,
}

impl AttachmentOperation {
    fn vk_load_op(self) -> vk::AttachmentLoadOp {
        match self {
            Self::Clear => vk::AttachmentLoadOp::CLEAR,
            Self::Load => vk::AttachmentLoadOp::LOAD,
            Self::DontCare => vk::AttachmentLoadOp::DONT_CARE,
        }
    }

    #[inline]
    fn is_producer(self) -> bool {
        matches!(self, Self::Clear | Self::DontCare)
    }
}

/// 由生产者节点提供的 attachment 描述
#[derive(Clone, Copy, Debug)]
pub struct AttachmentInfo {
    pub format: vk::Format,
    /// true 时采样数跟随引擎 MSAA 设置
    pub resizable_sample: bool,
    /// true 时尺寸跟随 back buffer
    pub resizable: bool,
    pub scale_x: f32,
    pub scale_y: f32,
}

impl Default for AttachmentInfo {
    fn default() -> Self {
        Self {
            format: vk::Format::R8G8B8A8_UNORM,
            resizable_sample: false,
            resizable: true,
            scale_x: 1.0,
            scale_y: 1.0,
        }
    }
}

/// 节点的一个目标 attachment
pub struct NodeTargetDesc {
    pub name: String,
    pub operation: AttachmentOperation,
    /// None 表示读取外部节点产出的 attachment
    pub info: Option<AttachmentInfo>,
    pub clear_value: vk::ClearValue,
}

/// 节点执行时的上下文
pub struct NodeExecuteContext<'a> {
    pub cmd: &'a GfxCommandBuffer,
    pub frame_label: FrameLabel,
    pub extent: vk::Extent2D,
    pub render_pass: RenderPassHandle,
}

type NodeRenderFn = Box<dyn FnMut(&NodeExecuteContext)>;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct NodeId(usize);

struct GraphNode {
    name: String,
    targets: Vec<NodeTargetDesc>,
    render_fn: NodeRenderFn,
    /// (multisample attachment, resolved attachment)
    resolves: Vec<(String, String)>,

    // compile 的产物
    render_pass: RenderPassHandle,
    frame_buffers: Vec<FrameBufferHandle>,
    extent: vk::Extent2D,
    clear_values: Vec<vk::ClearValue>,
}

struct AttachmentResources {
    info: AttachmentInfo,
    samples: vk::SampleCountFlags,
    /// 每个 frame in flight 一张纹理
    textures: Vec<TextureHandle>,
    /// MSAA 为 1 时，resolve 目标与源共用纹理
    aliased_to: Option<String>,
}

/// render graph
///
/// 声明式的节点/attachment 模型：节点消费与产出具名 attachment，
/// compile 时按依赖拓扑排序，创建 attachment 纹理、每个节点的
/// render pass 以及每个 (节点, frame in flight) 的 frame buffer。
/// presentable attachment 在最后一个写它的节点结束时转为可拷贝布局，
/// 由帧调度器 blit 到 swapchain image。
pub struct RenderGraph {
    nodes: Vec<GraphNode>,
    execution_order: Vec<usize>,
    attachments: HashMap<String, AttachmentResources>,
    presentable: Option<String>,
    compiled: bool,
}

// new & init
impl RenderGraph {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            execution_order: Vec::new(),
            attachments: HashMap::new(),
            presentable: None,
            compiled: false,
        }
    }
}

impl Default for RenderGraph {
    fn default() -> Self {
        Self::new()
    }
}

// 声明
impl RenderGraph {
    pub fn add_node(
        &mut self,
        name: impl Into<String>,
        targets: Vec<NodeTargetDesc>,
        render_fn: impl FnMut(&NodeExecuteContext) + 'static,
    ) -> NodeId {
        assert!(!self.compiled, "add_node after compile");
        let id = NodeId(self.nodes.len());
        self.nodes.push(GraphNode {
            name: name.into(),
            targets,
            render_fn: Box::new(render_fn),
            resolves: Vec::new(),
            render_pass: RenderPassHandle::default(),
            frame_buffers: Vec::new(),
            extent: vk::Extent2D::default(),
            clear_values: Vec::new(),
        });
        id
    }

    /// 标记一个 multisample color attachment 的 resolve 输出
    pub fn add_resolve_color_attachment(
        &mut self,
        node: NodeId,
        multisample_name: impl Into<String>,
        resolved_name: impl Into<String>,
    ) {
        assert!(!self.compiled, "add_resolve_color_attachment after compile");
        self.nodes[node.0].resolves.push((multisample_name.into(), resolved_name.into()));
    }

    /// 标记最终拷贝进 swapchain image 的 attachment
    pub fn set_presentable_attachment(&mut self, name: impl Into<String>) {
        self.presentable = Some(name.into());
    }
}

// getter
impl RenderGraph {
    pub fn node_render_pass(&self, node: NodeId) -> RenderPassHandle {
        assert!(self.compiled);
        self.nodes[node.0].render_pass
    }

    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.name == name).map(NodeId)
    }

    /// presentable attachment 当前帧的纹理
    pub fn presentable_texture(&self, frame_label: FrameLabel) -> TextureHandle {
        let name = self.presentable.as_ref().expect("no presentable attachment set");
        let attachment = self.resolve_alias(name);
        self.attachments[attachment].textures[*frame_label]
    }

    pub fn attachment_texture(&self, name: &str, frame_label: FrameLabel) -> TextureHandle {
        let attachment = self.resolve_alias(name);
        self.attachments[attachment].textures[*frame_label]
    }

    fn resolve_alias<'a>(&'a self, name: &'a str) -> &'a str {
        match self.attachments.get(name).and_then(|a| a.aliased_to.as_deref()) {
            Some(alias) => alias,
            None => name,
        }
    }
}

// compile
impl RenderGraph {
    /// 编译整个图
    ///
    /// 1. 依赖分析 + 拓扑排序
    /// 2. 为每个唯一的 attachment 名创建纹理（尺寸按 back buffer 缩放）
    /// 3. 每个节点一个 render pass，每个 (节点, fif) 一个 frame buffer
    pub fn compile(
        &mut self,
        rm: &RenderResourceManager,
        back_buffer: vk::Extent2D,
        msaa: vk::SampleCountFlags,
        frames_in_flight: usize,
    ) {
        let _span = tracy_client::span!("RenderGraph::compile");
        assert!(!self.compiled, "graph already compiled, call invalidate instead");

        // resolve 输出也是节点的产出，参与依赖分析
        let declared = self
            .nodes
            .iter()
            .map(|node| {
                let mut targets = node
                    .targets
                    .iter()
                    .map(|t| (t.name.clone(), t.operation))
                    .collect::<Vec<_>>();
                for (_, resolved) in &node.resolves {
                    targets.push((resolved.clone(), AttachmentOperation::DontCare));
                }
                targets
            })
            .collect::<Vec<_>>();
        self.execution_order = plan_order(&declared).unwrap_or_else(|cycle| {
            panic!("render graph has a dependency cycle involving nodes {cycle:?}");
        });

        self.create_attachments(rm, back_buffer, msaa, frames_in_flight);
        self.create_node_resources(rm, back_buffer, frames_in_flight, false);

        self.compiled = true;
        log::info!(
            "render graph compiled: {} nodes, {} attachments",
            self.nodes.len(),
            self.attachments.len()
        );
    }

    /// 销毁并以当前尺寸/采样数重建 attachment 纹理与 frame buffer
    ///
    /// swapchain 尺寸变化与 MSAA 设置变化时调用；调用方保证 GPU 空闲。
    pub fn invalidate(
        &mut self,
        rm: &RenderResourceManager,
        back_buffer: vk::Extent2D,
        msaa: vk::SampleCountFlags,
        frames_in_flight: usize,
    ) {
        let _span = tracy_client::span!("RenderGraph::invalidate");
        assert!(self.compiled, "invalidate before compile");

        // render pass 原地重建，句柄保持有效，引用它的 pipeline 不用跟着换
        for node in &mut self.nodes {
            for fb in node.frame_buffers.drain(..) {
                rm.destroy_frame_buffer(fb);
            }
        }
        for (_, attachment) in self.attachments.drain() {
            for texture in attachment.textures {
                rm.destroy_texture(texture);
            }
        }

        self.create_attachments(rm, back_buffer, msaa, frames_in_flight);
        self.create_node_resources(rm, back_buffer, frames_in_flight, true);
    }

    fn create_attachments(
        &mut self,
        rm: &RenderResourceManager,
        back_buffer: vk::Extent2D,
        msaa: vk::SampleCountFlags,
        frames_in_flight: usize,
    ) {
        assert!(frames_in_flight <= MAX_FRAMES_IN_FLIGHT);

        let create_textures = |name: &str, info: &AttachmentInfo, samples: vk::SampleCountFlags| {
            let extent = attachment_extent(info, back_buffer);
            (0..frames_in_flight)
                .map(|fif| {
                    rm.create_texture(&TextureDescriptor {
                        name: format!("{name}-{fif}"),
                        width: extent.width,
                        height: extent.height,
                        format: info.format,
                        sample_count: samples,
                        is_attachment: true,
                        ..Default::default()
                    })
                })
                .collect::<Vec<_>>()
        };

        for node_index in 0..self.nodes.len() {
            let targets = self.nodes[node_index]
                .targets
                .iter()
                .filter(|t| t.operation.is_producer())
                .filter_map(|t| t.info.map(|info| (t.name.clone(), info)))
                .collect::<Vec<_>>();

            for (name, info) in targets {
                if self.attachments.contains_key(&name) {
                    continue;
                }

                let samples = if info.resizable_sample { msaa } else { vk::SampleCountFlags::TYPE_1 };
                let textures = create_textures(&name, &info, samples);
                self.attachments.insert(
                    name,
                    AttachmentResources {
                        info,
                        samples,
                        textures,
                        aliased_to: None,
                    },
                );
            }

            // resolve 输出：MSAA 为 1 时退化为源 attachment 的别名，
            // 否则是一张单采样的独立纹理
            let resolves = self.nodes[node_index].resolves.clone();
            for (source, resolved) in resolves {
                if self.attachments.contains_key(&resolved) {
                    continue;
                }
                let source_info = self
                    .attachments
                    .get(&source)
                    .unwrap_or_else(|| panic!("resolve source `{source}` is not produced by any node"))
                    .info;

                if msaa == vk::SampleCountFlags::TYPE_1 {
                    self.attachments.insert(
                        resolved,
                        AttachmentResources {
                            info: source_info,
                            samples: vk::SampleCountFlags::TYPE_1,
                            textures: Vec::new(),
                            aliased_to: Some(source.clone()),
                        },
                    );
                } else {
                    let textures = create_textures(&resolved, &source_info, vk::SampleCountFlags::TYPE_1);
                    self.attachments.insert(
                        resolved,
                        AttachmentResources {
                            info: source_info,
                            samples: vk::SampleCountFlags::TYPE_1,
                            textures,
                            aliased_to: None,
                        },
                    );
                }
            }
        }
    }

    fn create_node_resources(
        &mut self,
        rm: &RenderResourceManager,
        back_buffer: vk::Extent2D,
        frames_in_flight: usize,
        reuse_render_passes: bool,
    ) {
        // presentable 的最后一个写入者，结束时转为 blit 源布局
        let presentable_real = self.presentable.as_ref().map(|name| self.resolve_alias(name).to_string());
        let presentable_last_writer = presentable_real.as_ref().map(|real| {
            self.execution_order
                .iter()
                .copied()
                .filter(|&idx| {
                    self.nodes[idx]
                        .targets
                        .iter()
                        .any(|t| self.resolve_alias(&t.name) == real)
                        || self.nodes[idx].resolves.iter().any(|(_, resolved)| resolved == real)
                })
                .last()
                .expect("presentable attachment is not produced by any node")
        });

        for order_index in 0..self.execution_order.len() {
            let node_index = self.execution_order[order_index];

            // targets 解析出的 attachment 名与 depth 标记
            let resolved_targets = self.nodes[node_index]
                .targets
                .iter()
                .map(|t| {
                    let name = self.resolve_alias(&t.name).to_string();
                    let is_depth = is_depth_format(self.attachments[&name].info.format);
                    (name, is_depth, t.operation, t.clear_value)
                })
                .collect::<Vec<_>>();

            let node_name = self.nodes[node_index].name.clone();
            let is_presentable_writer = presentable_last_writer == Some(node_index);

            let mut colors = Vec::new();
            let mut resolves: Vec<Option<GfxAttachmentDesc>> = Vec::new();
            let mut depth = None;
            let mut extent = back_buffer;

            for (name, is_depth, operation, _) in &resolved_targets {
                let attachment = &self.attachments[name];
                extent = attachment_extent(&attachment.info, back_buffer);

                if *is_depth {
                    assert!(depth.is_none(), "node `{node_name}` declares two depth targets");
                    depth = Some(GfxAttachmentDesc::depth(
                        attachment.info.format,
                        attachment.samples,
                        operation.vk_load_op(),
                    ));
                } else {
                    let mut desc =
                        GfxAttachmentDesc::color(attachment.info.format, attachment.samples, operation.vk_load_op());
                    if is_presentable_writer
                        && Some(name) == presentable_real.as_ref()
                        && attachment.samples == vk::SampleCountFlags::TYPE_1
                    {
                        desc = desc.final_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
                    }
                    colors.push(desc);
                    resolves.push(None);
                }
            }

            // resolve 输出追加在 color 之后；单采样时 resolve 退化为别名，直接跳过
            let mut resolve_views = Vec::new();
            for (source, resolved) in &self.nodes[node_index].resolves {
                let source_name = self.resolve_alias(source).to_string();
                if self.attachments[&source_name].samples == vk::SampleCountFlags::TYPE_1 {
                    continue;
                }

                let color_index = resolved_targets
                    .iter()
                    .filter(|(_, is_depth, _, _)| !is_depth)
                    .position(|(name, _, _, _)| *name == source_name)
                    .expect("resolve source is not a color target of this node");

                let mut desc = GfxAttachmentDesc::color(
                    self.attachments[resolved.as_str()].info.format,
                    vk::SampleCountFlags::TYPE_1,
                    vk::AttachmentLoadOp::DONT_CARE,
                );
                if is_presentable_writer && Some(resolved) == presentable_real.as_ref() {
                    desc = desc.final_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
                }
                resolves[color_index] = Some(desc);
                resolve_views.push(resolved.clone());
            }

            let has_resolves = resolves.iter().any(|r| r.is_some());
            let render_pass_desc = GfxRenderPassDesc {
                colors,
                resolves: if has_resolves { resolves } else { Vec::new() },
                depth,
            };
            let render_pass = if reuse_render_passes {
                let existing = self.nodes[node_index].render_pass;
                rm.recreate_render_pass(existing, &render_pass_desc);
                existing
            } else {
                rm.create_render_pass(&node_name, &render_pass_desc)
            };

            // clear value 顺序与 attachment 声明一致: colors, resolves, depth
            let mut clear_values = Vec::new();
            for (_, is_depth, _, value) in &resolved_targets {
                if !is_depth {
                    clear_values.push(*value);
                }
            }
            clear_values.extend(std::iter::repeat(vk::ClearValue::default()).take(resolve_views.len()));
            for (_, is_depth, _, value) in &resolved_targets {
                if *is_depth {
                    clear_values.push(*value);
                }
            }

            // frame buffer 的 attachment 顺序同上
            let frame_buffers = (0..frames_in_flight)
                .map(|fif| {
                    let frame_label = FrameLabel::from_usize(fif);
                    let mut per_fif = Vec::new();
                    for (name, is_depth, _, _) in &resolved_targets {
                        if !is_depth {
                            per_fif.push(self.attachment_texture(name, frame_label));
                        }
                    }
                    for resolved in &resolve_views {
                        per_fif.push(self.attachment_texture(resolved, frame_label));
                    }
                    for (name, is_depth, _, _) in &resolved_targets {
                        if *is_depth {
                            per_fif.push(self.attachment_texture(name, frame_label));
                        }
                    }
                    rm.create_frame_buffer(&format!("{node_name}-{fif}"), render_pass, &per_fif, extent)
                })
                .collect();

            let node = &mut self.nodes[node_index];
            node.render_pass = render_pass;
            node.extent = extent;
            node.clear_values = clear_values;
            node.frame_buffers = frame_buffers;
        }
    }
}

// 执行
impl RenderGraph {
    /// 按拓扑顺序执行所有节点，全部录制进同一个 command buffer
    ///
    /// 每个节点的状态机: Idle -> BeginPass -> RenderFn -> EndPass
    pub fn execute(&mut self, rm: &RenderResourceManager, cmd: &GfxCommandBuffer, frame_label: FrameLabel) {
        let _span = tracy_client::span!("RenderGraph::execute");
        assert!(self.compiled, "execute before compile");

        for &node_index in &self.execution_order {
            let node = &mut self.nodes[node_index];

            let (render_pass_vk, frame_buffer_vk) = {
                let state = rm.lock();
                (
                    state.render_passes.get(node.render_pass).expect("stale render pass handle").gfx.handle(),
                    state
                        .frame_buffers
                        .get(node.frame_buffers[*frame_label])
                        .expect("stale frame buffer handle")
                        .gfx
                        .handle(),
                )
            };

            cmd.begin_render_pass(render_pass_vk, frame_buffer_vk, node.extent, &node.clear_values);
            cmd.set_viewport(node.extent);

            let ctx = NodeExecuteContext {
                cmd,
                frame_label,
                extent: node.extent,
                render_pass: node.render_pass,
            };
            (node.render_fn)(&ctx);

            cmd.end_render_pass();
        }
    }
}

// destroy
impl RenderGraph {
    pub fn destroy(mut self, rm: &RenderResourceManager) {
        if !self.compiled {
            return;
        }
        for node in &mut self.nodes {
            for fb in node.frame_buffers.drain(..) {
                rm.destroy_frame_buffer(fb);
            }
            rm.destroy_render_pass(node.render_pass);
        }
        for (_, attachment) in self.attachments.drain() {
            for texture in attachment.textures {
                rm.destroy_texture(texture);
            }
        }
    }
}

fn is_depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::D32_SFLOAT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
    )
}

/// attachment 纹理的尺寸 = back buffer * scale
pub(crate) fn attachment_extent(info: &AttachmentInfo, back_buffer: vk::Extent2D) -> vk::Extent2D {
    if !info.resizable {
        return back_buffer;
    }
    vk::Extent2D {
        width: ((back_buffer.width as f32 * info.scale_x) as u32).max(1),
        height: ((back_buffer.height as f32 * info.scale_y) as u32).max(1),
    }
}

/// 依赖分析 + Kahn 拓扑排序
///
/// Clear/DontCare 的 attachment 是节点的产出，Load 是消费；
/// 消费者排在生产者之后。
///
/// # 返回
/// - `Ok(order)`: 拓扑排序后的节点下标
/// - `Err(cycle)`: 有循环依赖，返回参与循环的节点下标
pub(crate) fn plan_order(nodes: &[Vec<(String, AttachmentOperation)>]) -> Result<Vec<usize>, Vec<usize>> {
    let node_count = nodes.len();

    // attachment name -> 生产者节点
    let mut producers: HashMap<&str, usize> = HashMap::new();
    for (node_index, targets) in nodes.iter().enumerate() {
        for (name, operation) in targets {
            if operation.is_producer() {
                producers.insert(name.as_str(), node_index);
            }
        }
    }

    // 邻接表用 Vec 保持确定性的遍历顺序
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); node_count];
    let mut in_degrees = vec![0usize; node_count];
    for (node_index, targets) in nodes.iter().enumerate() {
        for (name, operation) in targets {
            if *operation != AttachmentOperation::Load {
                continue;
            }
            if let Some(&producer) = producers.get(name.as_str()) {
                if producer != node_index && !adjacency[producer].contains(&node_index) {
                    adjacency[producer].push(node_index);
                    in_degrees[node_index] += 1;
                }
            }
        }
    }

    let mut queue: VecDeque<usize> = (0..node_count).filter(|&i| in_degrees[i] == 0).collect();
    let mut order = Vec::with_capacity(node_count);

    while let Some(node) = queue.pop_front() {
        order.push(node);
        for &next in &adjacency[node] {
            in_degrees[next] -= 1;
            if in_degrees[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if order.len() != node_count {
        let remaining = (0..node_count).filter(|&i| in_degrees[i] > 0).collect();
        Err(remaining)
    } else {
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets(entries: &[(&str, AttachmentOperation)]) -> Vec<(String, AttachmentOperation)> {
        entries.iter().map(|(name, op)| (name.to_string(), *op)).collect()
    }

    #[test]
    fn test_plan_consumer_after_producer() {
        // world 产出 color，ui 加载 color
        let nodes = vec![
            targets(&[("color", AttachmentOperation::Load)]),
            targets(&[("color", AttachmentOperation::Clear), ("depth", AttachmentOperation::Clear)]),
        ];
        let order = plan_order(&nodes).unwrap();
        assert_eq!(order, vec![1, 0]);
    }

    #[test]
    fn test_plan_chain() {
        let nodes = vec![
            targets(&[("a", AttachmentOperation::Clear)]),
            targets(&[("a", AttachmentOperation::Load), ("b", AttachmentOperation::Clear)]),
            targets(&[("b", AttachmentOperation::Load)]),
        ];
        let order = plan_order(&nodes).unwrap();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_plan_detects_cycle() {
        let nodes = vec![
            targets(&[("a", AttachmentOperation::Clear), ("b", AttachmentOperation::Load)]),
            targets(&[("b", AttachmentOperation::Clear), ("a", AttachmentOperation::Load)]),
        ];
        assert!(plan_order(&nodes).is_err());
    }

    #[test]
    fn test_plan_is_deterministic() {
        let nodes = vec![
            targets(&[("a", AttachmentOperation::Clear)]),
            targets(&[("b", AttachmentOperation::Clear)]),
            targets(&[("a", AttachmentOperation::Load), ("b", AttachmentOperation::Load)]),
        ];
        let first = plan_order(&nodes).unwrap();
        let second = plan_order(&nodes).unwrap();
        assert_eq!(first, second);
        assert_eq!(first[2], 2);
    }

    #[test]
    fn test_attachment_extent_scaling() {
        let back_buffer = vk::Extent2D {
            width: 1920,
            height: 1080,
        };

        let full = AttachmentInfo::default();
        assert_eq!(attachment_extent(&full, back_buffer).width, 1920);

        let half = AttachmentInfo {
            scale_x: 0.5,
            scale_y: 0.5,
            ..Default::default()
        };
        let extent = attachment_extent(&half, back_buffer);
        assert_eq!(extent.width, 960);
        assert_eq!(extent.height, 540);
    }
}
