use std::sync::Arc;

use hanabi_asset::manager::{format_embedded_path, parse_embedded_path};
use hanabi_asset::{AssetHandle, AssetManager, AssetTypeDesc, LoadAssetResult};

use crate::asset_types::material::instantiate_material;
use crate::asset_types::RenderAssetEnv;
use crate::handles::{MaterialHandle, RawHandle, StaticMeshHandle};
use crate::resources::{MaterialPropertyValue, StaticMeshDescriptor, SubMeshDescriptor};

/// 模型的隐式父 asset：不透明 PBR shader
pub const OPAQUE_PBR_SHADER_PATH: &str = "shaders/opaque_pbr.hashader";

/// 内嵌 asset 的名字只保留安全字符
fn sanitize_name(name: &str) -> String {
    name.chars().map(|c| if c.is_ascii_alphanumeric() { c } else { '_' }).collect()
}

/// 在 parent 的内嵌子 asset 中按 data_id 与扩展名查找
fn find_embedded_child(assets: &AssetManager, parent: AssetHandle, data_id: u64, extension: &str) -> AssetHandle {
    for child in assets.embedded_assets(parent) {
        let entry = assets.registry_entry(child);
        if let Some((_, child_data_id, name)) = parse_embedded_path(&entry.path) {
            if child_data_id == data_id && name.ends_with(extension) {
                return child;
            }
        }
    }
    AssetHandle::INVALID
}

/// model (gltf/glb)
///
/// on_import 时把 GLTF 的每个 material 注册为内嵌材质、每个 mesh 注册为
/// 内嵌静态网格，模型自身的隐式父 asset 是 opaque_pbr shader。
/// 内嵌子 asset 的加载走这里的 load_fn（读父 asset 的文件 + data_id）。
pub fn asset_type(env: Arc<RenderAssetEnv>) -> AssetTypeDesc {
    let load_env = env.clone();
    AssetTypeDesc {
        name: "model".to_string(),
        extensions: ["gltf", "glb"].iter().map(|e| e.to_string()).collect(),
        load: Arc::new(move |ctx| match &ctx.embedded {
            // 模型自身: 校验文件可读，内容由内嵌子 asset 消费
            None => match gltf::Gltf::open(&ctx.absolute_path) {
                Ok(_) => LoadAssetResult {
                    success: true,
                    index: 0,
                    generation: 0,
                },
                Err(e) => {
                    log::error!("failed to open model {:?}: {e}", ctx.absolute_path);
                    LoadAssetResult::failed()
                }
            },
            Some(params) => {
                let result = if params.name.ends_with(".hastaticmesh") {
                    load_embedded_static_mesh(&load_env, ctx, params.data_id)
                        .map(|handle| LoadAssetResult::from_raw(handle.as_raw()))
                } else {
                    load_embedded_material(&load_env, ctx, params.data_id)
                        .map(|handle| LoadAssetResult::from_raw(handle.as_raw()))
                };

                result.unwrap_or_else(|e| {
                    log::error!("failed to load embedded asset {}: {e}", params.name);
                    LoadAssetResult::failed()
                })
            }
        }),
        // 模型的缓存记录只是标记，没有池对象
        unload: Arc::new(move |_result| {}),
        on_import: Some(Arc::new(on_import_model)),
    }
}

fn on_import_model(assets: &AssetManager, handle: AssetHandle) {
    let entry = assets.registry_entry(handle);

    let shader = assets.import_asset(OPAQUE_PBR_SHADER_PATH);
    if shader.is_valid() {
        assets.set_parent(handle, shader);
    } else {
        log::error!("on_import_model -- opaque_pbr shader is missing, model {} stays parentless", entry.path);
    }

    let absolute_path = assets.asset_path().join(&entry.path);
    let document = match gltf::Gltf::open(&absolute_path) {
        Ok(document) => document,
        Err(e) => {
            log::error!("on_import_model -- failed to open {absolute_path:?}: {e}");
            return;
        }
    };

    for (index, material) in document.materials().enumerate() {
        let name = sanitize_name(material.name().unwrap_or("material"));
        let path = format_embedded_path(handle, index as u64, &format!("{name}_{index}.hamaterial"));
        let child = assets.import_asset(&path);
        if child.is_valid() {
            assets.set_parent(child, handle);
        }
    }

    for (index, mesh) in document.meshes().enumerate() {
        let name = sanitize_name(mesh.name().unwrap_or("mesh"));
        let path = format_embedded_path(handle, index as u64, &format!("{name}_{index}.hastaticmesh"));
        let child = assets.import_asset(&path);
        if child.is_valid() {
            assets.set_parent(child, handle);
        }
    }
}

fn load_embedded_static_mesh(
    env: &RenderAssetEnv,
    ctx: &hanabi_asset::LoadContext,
    mesh_index: u64,
) -> anyhow::Result<StaticMeshHandle> {
    let assets = env.assets();
    let model = assets.registry_entry(ctx.asset).parent;

    let (document, buffers, _images) = gltf::import(&ctx.absolute_path)?;
    let mesh = document
        .meshes()
        .nth(mesh_index as usize)
        .ok_or_else(|| anyhow::anyhow!("model has no mesh {mesh_index}"))?;

    let mut positions: Vec<[f32; 3]> = Vec::new();
    let mut normals: Vec<[f32; 3]> = Vec::new();
    let mut uvs: Vec<[f32; 2]> = Vec::new();
    let mut tangents: Vec<[f32; 4]> = Vec::new();
    let mut indices: Vec<u32> = Vec::new();
    let mut sub_meshes = Vec::new();

    for primitive in mesh.primitives() {
        let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(|data| data.0.as_slice()));

        let vertex_offset = positions.len() as u32;
        let index_offset = indices.len() as u32;

        let primitive_positions: Vec<[f32; 3]> = reader
            .read_positions()
            .ok_or_else(|| anyhow::anyhow!("primitive has no positions"))?
            .collect();
        let vertex_count = primitive_positions.len();
        positions.extend(primitive_positions);

        match reader.read_normals() {
            Some(iter) => normals.extend(iter),
            None => normals.extend(std::iter::repeat([0.0, 0.0, 1.0]).take(vertex_count)),
        }
        match reader.read_tex_coords(0) {
            Some(iter) => uvs.extend(iter.into_f32()),
            None => uvs.extend(std::iter::repeat([0.0, 0.0]).take(vertex_count)),
        }
        match reader.read_tangents() {
            Some(iter) => tangents.extend(iter),
            None => tangents.extend(std::iter::repeat([1.0, 0.0, 0.0, 1.0]).take(vertex_count)),
        }

        let index_count = match reader.read_indices() {
            Some(iter) => {
                let primitive_indices: Vec<u32> = iter.into_u32().collect();
                let count = primitive_indices.len() as u32;
                indices.extend(primitive_indices);
                count
            }
            None => {
                indices.extend(0..vertex_count as u32);
                vertex_count as u32
            }
        };

        let material = primitive
            .material()
            .index()
            .map(|material_index| find_embedded_child(&assets, model, material_index as u64, ".hamaterial"))
            .unwrap_or(AssetHandle::INVALID);

        sub_meshes.push(SubMeshDescriptor {
            vertex_offset,
            index_offset,
            index_count,
            vertex_count: vertex_count as u32,
            material,
        });
    }

    let handle = env.rm().create_static_mesh(&StaticMeshDescriptor {
        name: format!("{}#{}", ctx.absolute_path.display(), mesh_index),
        positions,
        normals,
        uvs,
        tangents,
        indices,
        sub_meshes,
    });
    Ok(handle)
}

fn load_embedded_material(
    env: &RenderAssetEnv,
    ctx: &hanabi_asset::LoadContext,
    material_index: u64,
) -> anyhow::Result<MaterialHandle> {
    let assets = env.assets();
    let model_entry = assets.registry_entry(ctx.asset);
    let model = model_entry.parent;
    // 模型的隐式父 asset 是 shader
    let shader_asset = assets.registry_entry(model).parent;

    let document = gltf::Gltf::open(&ctx.absolute_path)?;
    let material = document
        .materials()
        .nth(material_index as usize)
        .ok_or_else(|| anyhow::anyhow!("model has no material {material_index}"))?;

    let pbr = material.pbr_metallic_roughness();
    let mut properties = vec![
        ("albedo_color".to_string(), MaterialPropertyValue::Vector4(pbr.base_color_factor())),
        ("metallic".to_string(), MaterialPropertyValue::F32(pbr.metallic_factor())),
        ("roughness".to_string(), MaterialPropertyValue::F32(pbr.roughness_factor())),
    ];

    // GLTF 的纹理引用转成 texture asset；data URI 不支持
    let model_dir = std::path::Path::new(&assets.registry_entry(model).path)
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut import_texture = |source: gltf::image::Source| -> AssetHandle {
        match source {
            gltf::image::Source::Uri { uri, .. } => {
                let relative = if model_dir.is_empty() { uri.to_string() } else { format!("{model_dir}/{uri}") };
                assets.import_asset(&relative)
            }
            gltf::image::Source::View { .. } => {
                log::warn!("embedded GLTF image views are not supported, falling back to white pixel");
                AssetHandle::INVALID
            }
        }
    };

    if let Some(info) = pbr.base_color_texture() {
        let asset = import_texture(info.texture().source().source());
        if asset.is_valid() {
            properties.push(("albedo_texture".to_string(), MaterialPropertyValue::Texture(asset)));
        }
    }
    if let Some(normal) = material.normal_texture() {
        let asset = import_texture(normal.texture().source().source());
        if asset.is_valid() {
            properties.push(("normal_texture".to_string(), MaterialPropertyValue::Texture(asset)));
        }
    }
    if let Some(info) = pbr.metallic_roughness_texture() {
        let asset = import_texture(info.texture().source().source());
        if asset.is_valid() {
            properties.push(("metallic_roughness_texture".to_string(), MaterialPropertyValue::Texture(asset)));
        }
    }

    let name = format!("{}#material{}", model_entry.path, material_index);
    instantiate_material(env, &name, shader_asset, &properties)
}

/// static_mesh (.hastaticmesh)
///
/// 永远内嵌在 model 里，数据由 model 的 load_fn 提供；
/// 独立文件导入没有意义，直接失败。
pub fn static_mesh_asset_type(env: Arc<RenderAssetEnv>) -> AssetTypeDesc {
    AssetTypeDesc {
        name: "static_mesh".to_string(),
        extensions: vec!["hastaticmesh".to_string()],
        load: Arc::new(|ctx| {
            log::error!("static mesh {:?} can only be loaded as an embedded asset", ctx.absolute_path);
            LoadAssetResult::failed()
        }),
        unload: Arc::new(move |result| {
            env.rm().destroy_static_mesh(StaticMeshHandle::from_raw(result.as_raw()));
        }),
        on_import: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("Scene Material #3"), "Scene_Material__3");
        assert_eq!(sanitize_name("helmet"), "helmet");
    }
}
