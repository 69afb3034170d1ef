use std::sync::Arc;

use glam::Mat4;
use hanabi_asset::{AssetHandle, AssetTypeDesc, LoadAssetResult};

use crate::asset_types::RenderAssetEnv;
use crate::scene::{SceneManager, SceneNodeId};

/// `.hascene` 文本格式:
///
/// ```text
/// version 1
/// skybox_material <uuid>
/// ambient_color <r> <g> <b>
/// node_count <N>
///
/// node <byte_len> <name>
/// parent <index>          # 先序编号，-1 表示挂在 root 下
/// transform <16 floats>
/// static_mesh <uuid>
/// material_override_count <n>
/// material_override <uuid>
/// ```
pub struct ParsedScene {
    pub skybox_material: AssetHandle,
    pub ambient_color: [f32; 3],
    pub nodes: Vec<ParsedSceneNode>,
}

pub struct ParsedSceneNode {
    pub name: String,
    /// 先序遍历中的父节点编号，-1 = root
    pub parent: i64,
    pub transform: [f32; 16],
    pub static_mesh: AssetHandle,
    pub material_overrides: Vec<AssetHandle>,
}

pub fn parse_scene_file(text: &str) -> anyhow::Result<ParsedScene> {
    let mut cursor = text;

    let version: u32 = next_value(&mut cursor, "version")?.parse()?;
    if version != 1 {
        anyhow::bail!("unsupported scene file version {version}");
    }

    let skybox_material: u64 = next_value(&mut cursor, "skybox_material")?.parse()?;
    let ambient_line = next_value(&mut cursor, "ambient_color")?;
    let ambient = ambient_line.split_whitespace().map(|v| v.parse::<f32>()).collect::<Result<Vec<_>, _>>()?;
    if ambient.len() != 3 {
        anyhow::bail!("ambient_color needs 3 components");
    }

    let node_count: usize = next_value(&mut cursor, "node_count")?.parse()?;

    let mut nodes = Vec::with_capacity(node_count);
    for i in 0..node_count {
        // name 带字节长度前缀，名字里可以有空格
        let name_record = next_value(&mut cursor, "node").map_err(|e| anyhow::anyhow!("node {i}: {e}"))?;
        let (len_str, rest) = name_record
            .split_once(char::is_whitespace)
            .ok_or_else(|| anyhow::anyhow!("node {i}: missing name length"))?;
        let name_len: usize = len_str.parse()?;
        if rest.len() < name_len {
            anyhow::bail!("node {i}: truncated name");
        }
        let name = rest[..name_len].to_string();

        let parent: i64 = next_value(&mut cursor, "parent")?.parse()?;

        let transform_line = next_value(&mut cursor, "transform")?;
        let values = transform_line
            .split_whitespace()
            .map(|v| v.parse::<f32>())
            .collect::<Result<Vec<_>, _>>()?;
        if values.len() != 16 {
            anyhow::bail!("node {i}: transform needs 16 components");
        }
        let mut transform = [0.0f32; 16];
        transform.copy_from_slice(&values);

        let static_mesh: u64 = next_value(&mut cursor, "static_mesh")?.parse()?;

        let override_count: usize = next_value(&mut cursor, "material_override_count")?.parse()?;
        let mut material_overrides = Vec::with_capacity(override_count);
        for _ in 0..override_count {
            let uuid: u64 = next_value(&mut cursor, "material_override")?.parse()?;
            material_overrides.push(AssetHandle::new(uuid));
        }

        nodes.push(ParsedSceneNode {
            name,
            parent,
            transform,
            static_mesh: AssetHandle::new(static_mesh),
            material_overrides,
        });
    }

    Ok(ParsedScene {
        skybox_material: AssetHandle::new(skybox_material),
        ambient_color: [ambient[0], ambient[1], ambient[2]],
        nodes,
    })
}

fn next_value<'a>(cursor: &mut &'a str, name: &str) -> anyhow::Result<&'a str> {
    let trimmed = cursor.trim_start();
    let rest = trimmed
        .strip_prefix(name)
        .ok_or_else(|| anyhow::anyhow!("expected `{name}`"))?;
    let rest = rest.trim_start_matches([' ', '\t']);
    let end = rest.find(['\n', '\r']).unwrap_or(rest.len());
    let value = rest[..end].trim();
    *cursor = &rest[end..];
    Ok(value)
}

/// 把场景树序列化为 .hascene 文本
///
/// root 本身不写入文件；节点按先序排列，parent 用先序编号表示。
pub fn serialize_scene(scene: &SceneManager) -> String {
    let mut out = String::new();
    out.push_str("version 1\n");
    out.push_str(&format!("skybox_material {}\n", scene.skybox_material.uuid));
    out.push_str(&format!(
        "ambient_color {} {} {}\n",
        scene.ambient_color[0], scene.ambient_color[1], scene.ambient_color[2]
    ));

    // 先序收集，记录每个节点的文件内编号
    let mut order: Vec<(SceneNodeId, i64)> = Vec::new();
    let mut stack: Vec<(SceneNodeId, i64)> = scene
        .children(scene.root())
        .into_iter()
        .rev()
        .map(|id| (id, -1))
        .collect();
    while let Some((id, parent_index)) = stack.pop() {
        let my_index = order.len() as i64;
        order.push((id, parent_index));
        for child in scene.children(id).into_iter().rev() {
            stack.push((child, my_index));
        }
    }

    out.push_str(&format!("node_count {}\n", order.len()));
    for (id, parent_index) in order {
        let node = scene.node(id);
        out.push_str(&format!("\nnode {} {}\n", node.name.len(), node.name));
        out.push_str(&format!("parent {parent_index}\n"));

        let transform = node.local_transform.to_cols_array();
        let transform_str = transform.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(" ");
        out.push_str(&format!("transform {transform_str}\n"));

        out.push_str(&format!("static_mesh {}\n", node.static_mesh.uuid));
        out.push_str(&format!("material_override_count {}\n", node.material_overrides.len()));
        for material in &node.material_overrides {
            out.push_str(&format!("material_override {}\n", material.uuid));
        }
    }

    out
}

/// 只含 root 的空场景，skybox 颜色取默认 (0,0,0)
pub fn default_scene_text() -> String {
    serialize_scene(&SceneManager::new())
}

/// scene (.hascene)
///
/// 加载时把节点树灌进 SceneManager，并 acquire 文件里引用的
/// 静态网格 / 材质 / skybox 材质；卸载时逆向释放。
pub fn asset_type(env: Arc<RenderAssetEnv>) -> AssetTypeDesc {
    let load_env = env.clone();
    AssetTypeDesc {
        name: "scene".to_string(),
        extensions: vec!["hascene".to_string()],
        load: Arc::new(move |ctx| {
            let load = || -> anyhow::Result<()> {
                let text = std::fs::read_to_string(&ctx.absolute_path)?;
                let parsed = parse_scene_file(&text)?;
                let assets = load_env.assets();

                let mut scene = load_env.scene().lock().unwrap();
                scene.skybox_material = parsed.skybox_material;
                scene.ambient_color = parsed.ambient_color;

                if parsed.skybox_material.is_valid() && assets.is_valid(parsed.skybox_material) {
                    assets.acquire(parsed.skybox_material);
                }

                let root = scene.root();
                let mut created: Vec<SceneNodeId> = Vec::with_capacity(parsed.nodes.len());
                for parsed_node in &parsed.nodes {
                    let parent = if parsed_node.parent < 0 {
                        root
                    } else {
                        created[parsed_node.parent as usize]
                    };
                    let id = scene.add_child(parent, parsed_node.name.clone());
                    created.push(id);

                    let node = scene.node_mut(id);
                    node.local_transform = Mat4::from_cols_array(&parsed_node.transform);
                    node.static_mesh = parsed_node.static_mesh;
                    node.material_overrides = parsed_node.material_overrides.clone();

                    if parsed_node.static_mesh.is_valid() && assets.is_valid(parsed_node.static_mesh) {
                        assets.acquire(parsed_node.static_mesh);
                    }
                    for material in &parsed_node.material_overrides {
                        if material.is_valid() && assets.is_valid(*material) {
                            assets.acquire(*material);
                        }
                    }
                }
                Ok(())
            };

            match load() {
                Ok(()) => LoadAssetResult {
                    success: true,
                    index: 0,
                    generation: 0,
                },
                Err(e) => {
                    log::error!("failed to load scene {:?}: {e}", ctx.absolute_path);
                    LoadAssetResult::failed()
                }
            }
        }),
        unload: Arc::new(move |_result| {
            let assets = env.assets();
            let mut scene = env.scene().lock().unwrap();

            if scene.skybox_material.is_valid() && assets.is_valid(scene.skybox_material) {
                assets.release(scene.skybox_material);
            }
            scene.skybox_material = AssetHandle::INVALID;

            let root = scene.root();
            for child in scene.children(root) {
                release_subtree_assets(&mut scene, &assets, child);
                scene.remove_node(child);
            }
        }),
        on_import: None,
    }
}

fn release_subtree_assets(scene: &mut SceneManager, assets: &hanabi_asset::AssetManager, id: SceneNodeId) {
    let (mesh, overrides) = {
        let node = scene.node(id);
        (node.static_mesh, node.material_overrides.clone())
    };
    if mesh.is_valid() && assets.is_valid(mesh) {
        assets.release(mesh);
    }
    for material in overrides {
        if material.is_valid() && assets.is_valid(material) {
            assets.release(material);
        }
    }
    for child in scene.children(id) {
        release_subtree_assets(scene, assets, child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_scene_roundtrip() {
        let text = default_scene_text();
        let parsed = parse_scene_file(&text).unwrap();
        assert_eq!(parsed.nodes.len(), 0);
        assert_eq!(parsed.ambient_color, [0.0, 0.0, 0.0]);
        assert!(!parsed.skybox_material.is_valid());
    }

    #[test]
    fn test_scene_tree_roundtrip() {
        let mut scene = SceneManager::new();
        scene.skybox_material = AssetHandle::new(99);
        scene.ambient_color = [0.1, 0.2, 0.3];

        let a = scene.add_child(scene.root(), "helmet holder");
        scene.node_mut(a).static_mesh = AssetHandle::new(5);
        scene.node_mut(a).material_overrides = vec![AssetHandle::new(7)];
        let b = scene.add_child(a, "child");
        scene.node_mut(b).local_transform = Mat4::from_translation(glam::vec3(1.0, 2.0, 3.0));

        let text = serialize_scene(&scene);
        let parsed = parse_scene_file(&text).unwrap();

        assert_eq!(parsed.skybox_material.uuid, 99);
        assert_eq!(parsed.nodes.len(), 2);
        assert_eq!(parsed.nodes[0].name, "helmet holder");
        assert_eq!(parsed.nodes[0].parent, -1);
        assert_eq!(parsed.nodes[0].static_mesh.uuid, 5);
        assert_eq!(parsed.nodes[0].material_overrides, vec![AssetHandle::new(7)]);
        assert_eq!(parsed.nodes[1].parent, 0);

        let transform = Mat4::from_cols_array(&parsed.nodes[1].transform);
        assert_eq!(transform, Mat4::from_translation(glam::vec3(1.0, 2.0, 3.0)));
    }
}
