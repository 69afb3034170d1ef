use std::sync::Arc;

use hanabi_asset::{AssetHandle, AssetTypeDesc, LoadAssetResult};
use hanabi_gfx::pipelines::graphics_pipeline::RasterizationSettings;

use crate::asset_types::RenderAssetEnv;
use crate::handles::{MaterialHandle, RawHandle, ShaderGroupHandle};
use crate::resources::MaterialPropertyValue;

/// `.hamaterial` 文本格式:
///
/// ```text
/// version 1
/// shader <uuid>
/// property_count <N>
/// property <name> <type> <value...>
/// ```
///
/// 纹理属性的值是 asset uuid，颜色是 3/4 个浮点。
pub struct ParsedMaterial {
    pub shader: AssetHandle,
    pub properties: Vec<(String, MaterialPropertyValue)>,
}

pub fn parse_material_file(text: &str) -> anyhow::Result<ParsedMaterial> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());

    let version: u32 = expect_value(lines.next(), "version")?.parse()?;
    if version != 1 {
        anyhow::bail!("unsupported material file version {version}");
    }

    let shader_uuid: u64 = expect_value(lines.next(), "shader")?.parse()?;
    let property_count: usize = expect_value(lines.next(), "property_count")?.parse()?;

    let mut properties = Vec::with_capacity(property_count);
    for _ in 0..property_count {
        let line = lines.next().ok_or_else(|| anyhow::anyhow!("missing property record"))?;
        let rest = line
            .trim()
            .strip_prefix("property")
            .ok_or_else(|| anyhow::anyhow!("expected `property`: {line}"))?;
        let mut tokens = rest.split_whitespace();
        let name = tokens.next().ok_or_else(|| anyhow::anyhow!("property missing name"))?;
        let data_type = tokens.next().ok_or_else(|| anyhow::anyhow!("property missing type"))?;
        let values: Vec<&str> = tokens.collect();

        let value = parse_property_value(data_type, &values)
            .ok_or_else(|| anyhow::anyhow!("malformed value of property {name}"))?;
        properties.push((name.to_string(), value));
    }

    Ok(ParsedMaterial {
        shader: AssetHandle::new(shader_uuid),
        properties,
    })
}

fn expect_value<'a>(line: Option<&'a str>, name: &str) -> anyhow::Result<&'a str> {
    line.and_then(|l| l.trim().strip_prefix(name))
        .map(str::trim)
        .ok_or_else(|| anyhow::anyhow!("expected `{name}`"))
}

fn parse_property_value(data_type: &str, values: &[&str]) -> Option<MaterialPropertyValue> {
    let f = |i: usize| values.get(i).and_then(|v| v.parse::<f32>().ok());
    match data_type {
        "f32" => Some(MaterialPropertyValue::F32(f(0)?)),
        "u32" => Some(MaterialPropertyValue::U32(values.first()?.parse().ok()?)),
        "s32" => Some(MaterialPropertyValue::U32(values.first()?.parse::<i32>().ok()? as u32)),
        "bool" => Some(MaterialPropertyValue::Bool(values.first()? == &"true")),
        "vector2f" => Some(MaterialPropertyValue::Vector2([f(0)?, f(1)?])),
        "vector3f" => Some(MaterialPropertyValue::Vector3([f(0)?, f(1)?, f(2)?])),
        "vector4f" => Some(MaterialPropertyValue::Vector4([f(0)?, f(1)?, f(2)?, f(3)?])),
        "texture" => Some(MaterialPropertyValue::Texture(AssetHandle::new(values.first()?.parse().ok()?))),
        _ => None,
    }
}

/// 材质文件序列化，编辑器保存时使用
pub fn serialize_material(shader: AssetHandle, properties: &[(String, MaterialPropertyValue)]) -> String {
    let mut out = String::new();
    out.push_str("version 1\n");
    out.push_str(&format!("shader {}\n", shader.uuid));
    out.push_str(&format!("property_count {}\n", properties.len()));

    for (name, value) in properties {
        let line = match value {
            MaterialPropertyValue::F32(v) => format!("property {name} f32 {v}"),
            MaterialPropertyValue::U32(v) => format!("property {name} u32 {v}"),
            MaterialPropertyValue::Bool(v) => format!("property {name} bool {v}"),
            MaterialPropertyValue::Vector2(v) => format!("property {name} vector2f {} {}", v[0], v[1]),
            MaterialPropertyValue::Vector3(v) => format!("property {name} vector3f {} {} {}", v[0], v[1], v[2]),
            MaterialPropertyValue::Vector4(v) => {
                format!("property {name} vector4f {} {} {} {}", v[0], v[1], v[2], v[3])
            }
            MaterialPropertyValue::Texture(asset) => format!("property {name} texture {}", asset.uuid),
        };
        out.push_str(&line);
        out.push('\n');
    }

    out
}

/// 从已加载的 shader asset 创建 pipeline + 材质并应用属性
pub(crate) fn instantiate_material(
    env: &RenderAssetEnv,
    name: &str,
    shader_asset: AssetHandle,
    properties: &[(String, MaterialPropertyValue)],
) -> anyhow::Result<MaterialHandle> {
    let assets = env.assets();
    if !assets.is_loaded(shader_asset) {
        anyhow::bail!("shader asset {shader_asset} of material {name} is not loaded");
    }

    let group = ShaderGroupHandle::from_raw(assets.get(shader_asset).as_raw());
    let rm = env.rm();

    let pipeline = rm.create_pipeline_state(name, RasterizationSettings::default(), group, env.world_render_pass());
    let material = rm.create_material(name, pipeline);

    for (property_name, value) in properties {
        rm.set_material_property(material, property_name, *value, &assets);
    }

    Ok(material)
}

pub fn asset_type(env: Arc<RenderAssetEnv>) -> AssetTypeDesc {
    let load_env = env.clone();
    AssetTypeDesc {
        name: "material".to_string(),
        extensions: vec!["hamaterial".to_string()],
        load: Arc::new(move |ctx| {
            let load = || -> anyhow::Result<MaterialHandle> {
                let text = std::fs::read_to_string(&ctx.absolute_path)?;
                let parsed = parse_material_file(&text)?;
                let name = ctx.absolute_path.display().to_string();
                instantiate_material(&load_env, &name, parsed.shader, &parsed.properties)
            };

            match load() {
                Ok(material) => LoadAssetResult::from_raw(material.as_raw()),
                Err(e) => {
                    log::error!("failed to load material {:?}: {e}", ctx.absolute_path);
                    LoadAssetResult::failed()
                }
            }
        }),
        unload: Arc::new(move |result| {
            let rm = env.rm();
            let material = MaterialHandle::from_raw(result.as_raw());
            let pipeline = rm.material_pipeline(material);
            rm.destroy_material(material);
            rm.destroy_pipeline_state(pipeline);
        }),
        // 材质的隐式父 asset 是它引用的 shader，加载顺序由 job 依赖保证
        on_import: Some(Arc::new(move |assets, handle| {
            let entry = assets.registry_entry(handle);
            if hanabi_asset::manager::parse_embedded_path(&entry.path).is_some() {
                // 内嵌材质由 model 的 on_import 设置父子关系
                return;
            }

            let absolute_path = assets.asset_path().join(&entry.path);
            let text = match std::fs::read_to_string(&absolute_path) {
                Ok(text) => text,
                Err(e) => {
                    log::error!("material on_import -- failed to read {absolute_path:?}: {e}");
                    return;
                }
            };
            match parse_material_file(&text) {
                Ok(parsed) => assets.set_parent(handle, parsed.shader),
                Err(e) => log::error!("material on_import -- failed to parse {absolute_path:?}: {e}"),
            }
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_material_file_roundtrip() {
        let properties = vec![
            ("albedo_color".to_string(), MaterialPropertyValue::Vector4([1.0, 0.5, 0.25, 1.0])),
            ("albedo_texture".to_string(), MaterialPropertyValue::Texture(AssetHandle::new(42))),
            ("roughness".to_string(), MaterialPropertyValue::F32(0.75)),
        ];

        let text = serialize_material(AssetHandle::new(7), &properties);
        let parsed = parse_material_file(&text).unwrap();

        assert_eq!(parsed.shader.uuid, 7);
        assert_eq!(parsed.properties.len(), 3);
        assert!(matches!(
            parsed.properties[1].1,
            MaterialPropertyValue::Texture(asset) if asset.uuid == 42
        ));
        assert!(matches!(parsed.properties[2].1, MaterialPropertyValue::F32(v) if v == 0.75));
    }

    #[test]
    fn test_malformed_material_is_rejected() {
        assert!(parse_material_file("").is_err());
        assert!(parse_material_file("version 3\nshader 1\nproperty_count 0\n").is_err());
        assert!(parse_material_file("version 1\nshader 1\nproperty_count 1\nproperty x f32\n").is_err());
    }
}
