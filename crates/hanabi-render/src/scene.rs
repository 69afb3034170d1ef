use std::collections::HashMap;

use glam::Mat4;
use hanabi_asset::{AssetHandle, AssetManager};
use slotmap::{new_key_type, SlotMap};

use crate::handles::*;
use crate::resources::RenderResourceManager;
use crate::settings::MAX_OBJECT_DATA_COUNT;
use crate::shader_data::ObjectData;

new_key_type! {
    pub struct SceneNodeId;
}

/// 场景树节点
///
/// 树结构用 id 链接 (parent / first_child / last_child / next_sibling)，
/// 不持有引用，遍历是显式的。
pub struct SceneNode {
    pub name: String,
    pub local_transform: Mat4,

    pub parent: Option<SceneNodeId>,
    pub first_child: Option<SceneNodeId>,
    pub last_child: Option<SceneNodeId>,
    pub next_sibling: Option<SceneNodeId>,

    /// INVALID 表示本节点不渲染
    pub static_mesh: AssetHandle,
    /// 按 sub mesh 序号覆盖材质；空表示不覆盖
    pub material_overrides: Vec<AssetHandle>,
}

/// 一次绘制的最小单元
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderPacket {
    pub pipeline: PipelineStateHandle,
    pub material: MaterialHandle,
    pub static_mesh: StaticMeshHandle,
    pub sub_mesh_index: u32,
    pub transform_index: u32,
}

impl RenderPacket {
    /// 排序键: (pipeline, material, static_mesh, sub_mesh) 升序，
    /// 相同时按句柄 slot 序号升序
    fn sort_key(&self) -> (u32, u32, u32, u32, u32) {
        (
            self.pipeline.slot_index(),
            self.material.slot_index(),
            self.static_mesh.slot_index(),
            self.sub_mesh_index,
            self.transform_index,
        )
    }
}

/// 一帧的场景提取结果
#[derive(Default)]
pub struct FramePackets {
    pub object_data: Vec<ObjectData>,
    /// 按目标 render pass 分桶
    pub buckets: HashMap<RenderPassHandle, Vec<RenderPacket>>,
}

impl FramePackets {
    pub fn clear(&mut self) {
        self.object_data.clear();
        for bucket in self.buckets.values_mut() {
            bucket.clear();
        }
    }

    /// 不透明 packet 排序，减少 pipeline / material 切换
    pub fn sort(&mut self) {
        for bucket in self.buckets.values_mut() {
            bucket.sort_unstable_by_key(|p| p.sort_key());
        }
    }
}

/// CPU 侧的场景管理
///
/// root 节点隐式存在，永远不会被销毁。
pub struct SceneManager {
    nodes: SlotMap<SceneNodeId, SceneNode>,
    root: SceneNodeId,

    pub skybox_material: AssetHandle,
    pub ambient_color: [f32; 3],
}

// new & init
impl SceneManager {
    pub fn new() -> Self {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(SceneNode {
            name: "root".to_string(),
            local_transform: Mat4::IDENTITY,
            parent: None,
            first_child: None,
            last_child: None,
            next_sibling: None,
            static_mesh: AssetHandle::INVALID,
            material_overrides: Vec::new(),
        });

        Self {
            nodes,
            root,
            skybox_material: AssetHandle::INVALID,
            ambient_color: [0.0, 0.0, 0.0],
        }
    }
}

impl Default for SceneManager {
    fn default() -> Self {
        Self::new()
    }
}

// getter
impl SceneManager {
    #[inline]
    pub fn root(&self) -> SceneNodeId {
        self.root
    }

    #[inline]
    pub fn node(&self, id: SceneNodeId) -> &SceneNode {
        self.nodes.get(id).expect("stale scene node id")
    }

    #[inline]
    pub fn node_mut(&mut self, id: SceneNodeId) -> &mut SceneNode {
        self.nodes.get_mut(id).expect("stale scene node id")
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// 按声明顺序迭代 parent 的直接子节点
    pub fn children(&self, parent: SceneNodeId) -> Vec<SceneNodeId> {
        let mut result = Vec::new();
        let mut cursor = self.node(parent).first_child;
        while let Some(id) = cursor {
            result.push(id);
            cursor = self.node(id).next_sibling;
        }
        result
    }
}

// tools
impl SceneManager {
    /// 在 parent 下追加一个子节点
    pub fn add_child(&mut self, parent: SceneNodeId, name: impl Into<String>) -> SceneNodeId {
        let id = self.nodes.insert(SceneNode {
            name: name.into(),
            local_transform: Mat4::IDENTITY,
            parent: Some(parent),
            first_child: None,
            last_child: None,
            next_sibling: None,
            static_mesh: AssetHandle::INVALID,
            material_overrides: Vec::new(),
        });

        let parent_node = self.nodes.get_mut(parent).expect("stale scene node id");
        match parent_node.last_child {
            Some(last) => {
                parent_node.last_child = Some(id);
                self.nodes[last].next_sibling = Some(id);
            }
            None => {
                parent_node.first_child = Some(id);
                parent_node.last_child = Some(id);
            }
        }

        id
    }

    /// 摘除并销毁一个子树；root 不可销毁
    pub fn remove_node(&mut self, id: SceneNodeId) {
        assert!(id != self.root, "the scene root is never destroyed");

        // 从父节点的链表摘除
        let (parent, next_sibling) = {
            let node = self.node(id);
            (node.parent, node.next_sibling)
        };
        if let Some(parent) = parent {
            let first = self.nodes[parent].first_child;
            if first == Some(id) {
                self.nodes[parent].first_child = next_sibling;
            } else {
                let mut cursor = first;
                while let Some(current) = cursor {
                    if self.nodes[current].next_sibling == Some(id) {
                        self.nodes[current].next_sibling = next_sibling;
                        break;
                    }
                    cursor = self.nodes[current].next_sibling;
                }
            }
            if self.nodes[parent].last_child == Some(id) {
                let mut new_last = None;
                let mut cursor = self.nodes[parent].first_child;
                while let Some(current) = cursor {
                    new_last = Some(current);
                    cursor = self.nodes[current].next_sibling;
                }
                self.nodes[parent].last_child = new_last;
            }
        }

        // 递归销毁子树
        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            let mut cursor = self.nodes[current].first_child;
            while let Some(child) = cursor {
                pending.push(child);
                cursor = self.nodes[child].next_sibling;
            }
            self.nodes.remove(current);
        }
    }

    /// 遍历场景，产出 object data 与按 render pass 分桶的 render packet
    ///
    /// 1. global = parent_global * local
    /// 2. static mesh 已加载的节点写入一条 ObjectData（上限 MAX_OBJECT_DATA_COUNT）
    /// 3. 每个 sub mesh 解析材质，未加载的替换为默认材质
    pub fn parse_scene(
        &self,
        assets: &AssetManager,
        rm: &RenderResourceManager,
        packets: &mut FramePackets,
    ) {
        let _span = tracy_client::span!("SceneManager::parse_scene");
        packets.clear();

        // 显式 DFS 栈放在 scratch 上
        let scratch = hanabi_alloc::scratch();
        let capacity = self.nodes.len() + 1;
        let stack_ids: &mut [u64] = unsafe { scratch.arena().alloc_slice(capacity) };
        let stack_transforms: &mut [Mat4] = unsafe { scratch.arena().alloc_slice(capacity) };
        let mut stack_top = 0usize;

        stack_ids[stack_top] = self.root.as_raw();
        stack_transforms[stack_top] = Mat4::IDENTITY;
        stack_top += 1;

        while stack_top > 0 {
            stack_top -= 1;
            let id = SceneNodeId::from_raw(stack_ids[stack_top]);
            let parent_transform = stack_transforms[stack_top];

            let node = self.node(id);
            let global_transform = parent_transform * node.local_transform;

            if node.static_mesh.is_valid() && assets.is_loaded(node.static_mesh) {
                let mesh_handle = StaticMeshHandle::from_raw(assets.get(node.static_mesh).as_raw());

                assert!(
                    packets.object_data.len() < MAX_OBJECT_DATA_COUNT,
                    "object data overflow, the host must stay below MAX_OBJECT_DATA_COUNT"
                );
                let transform_index = packets.object_data.len() as u32;
                packets.object_data.push(ObjectData {
                    model: global_transform.to_cols_array_2d(),
                });

                for (sub_mesh_index, sub_mesh) in rm.static_mesh_sub_meshes(mesh_handle).iter().enumerate() {
                    let material_asset = node
                        .material_overrides
                        .get(sub_mesh_index)
                        .copied()
                        .filter(|handle| handle.is_valid())
                        .unwrap_or(sub_mesh.material);

                    let material = if material_asset.is_valid() && assets.is_loaded(material_asset) {
                        let handle = MaterialHandle::from_raw(assets.get(material_asset).as_raw());
                        if rm.is_material_valid(handle) { handle } else { rm.default_material() }
                    } else {
                        rm.default_material()
                    };
                    if !rm.is_material_valid(material) {
                        // 默认材质尚未就绪（opaque_pbr shader 缺失或未加载）
                        continue;
                    }

                    let pipeline = rm.material_pipeline(material);
                    let render_pass = rm.pipeline_render_pass(pipeline);

                    packets.buckets.entry(render_pass).or_default().push(RenderPacket {
                        pipeline,
                        material,
                        static_mesh: mesh_handle,
                        sub_mesh_index: sub_mesh_index as u32,
                        transform_index,
                    });
                }
            }

            let mut cursor = node.first_child;
            while let Some(child) = cursor {
                stack_ids[stack_top] = child.as_raw();
                stack_transforms[stack_top] = global_transform;
                stack_top += 1;
                cursor = self.node(child).next_sibling;
            }
        }

        packets.sort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::Key;

    #[test]
    fn test_tree_links() {
        let mut scene = SceneManager::new();
        let a = scene.add_child(scene.root(), "a");
        let b = scene.add_child(scene.root(), "b");
        let c = scene.add_child(a, "c");

        assert_eq!(scene.children(scene.root()), vec![a, b]);
        assert_eq!(scene.children(a), vec![c]);
        assert_eq!(scene.node(b).parent, Some(scene.root()));
    }

    #[test]
    fn test_remove_subtree() {
        let mut scene = SceneManager::new();
        let a = scene.add_child(scene.root(), "a");
        let b = scene.add_child(scene.root(), "b");
        let _c = scene.add_child(a, "c");

        scene.remove_node(a);
        assert_eq!(scene.children(scene.root()), vec![b]);
        // a 与 c 都被销毁：root + b
        assert_eq!(scene.node_count(), 2);
    }

    #[test]
    fn test_remove_middle_child_keeps_sibling_chain() {
        let mut scene = SceneManager::new();
        let a = scene.add_child(scene.root(), "a");
        let b = scene.add_child(scene.root(), "b");
        let c = scene.add_child(scene.root(), "c");

        scene.remove_node(b);
        assert_eq!(scene.children(scene.root()), vec![a, c]);

        let d = scene.add_child(scene.root(), "d");
        assert_eq!(scene.children(scene.root()), vec![a, c, d]);
    }

    #[test]
    #[should_panic]
    fn test_root_is_never_destroyed() {
        let mut scene = SceneManager::new();
        let root = scene.root();
        scene.remove_node(root);
    }

    #[test]
    fn test_packet_sort_is_deterministic() {
        let packet = |pipeline: u64, material: u64, mesh: u64, sub: u32, transform: u32| RenderPacket {
            pipeline: PipelineStateHandle::from_raw((1 << 32) | pipeline),
            material: MaterialHandle::from_raw((1 << 32) | material),
            static_mesh: StaticMeshHandle::from_raw((1 << 32) | mesh),
            sub_mesh_index: sub,
            transform_index: transform,
        };

        let make_packets = || {
            let mut packets = FramePackets::default();
            let bucket = packets.buckets.entry(RenderPassHandle::null()).or_default();
            bucket.push(packet(2, 1, 1, 0, 5));
            bucket.push(packet(1, 2, 1, 1, 4));
            bucket.push(packet(1, 1, 2, 0, 3));
            bucket.push(packet(1, 1, 1, 0, 2));
            bucket.push(packet(1, 1, 1, 0, 1));
            packets.sort();
            packets
        };

        let first = make_packets();
        let second = make_packets();
        let bucket_first = &first.buckets[&RenderPassHandle::null()];
        let bucket_second = &second.buckets[&RenderPassHandle::null()];
        assert_eq!(bucket_first, bucket_second);

        // pipeline 优先，其次 material / mesh / sub mesh
        assert_eq!(bucket_first[0].transform_index, 1);
        assert_eq!(bucket_first[1].transform_index, 2);
        assert_eq!(bucket_first[2].transform_index, 3);
        assert_eq!(bucket_first[3].transform_index, 4);
        assert_eq!(bucket_first[4].transform_index, 5);
    }
}
