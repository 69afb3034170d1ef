use std::sync::Arc;

use ash::vk;
use hanabi_asset::{AssetTypeDesc, LoadAssetResult};

use crate::asset_types::RenderAssetEnv;
use crate::handles::{RawHandle, TextureHandle};
use crate::resources::TextureDescriptor;

/// cubemap 六个面的记录顺序，与 vulkan 的 layer 顺序一致
const FACE_NAMES: [&str; 6] = ["right", "left", "top", "bottom", "front", "back"];

/// `.haskybox` 文本格式:
///
/// ```text
/// version 1
/// right skyboxes/sea/right.png
/// left skyboxes/sea/left.png
/// ...
/// ```
fn parse_skybox_file(text: &str) -> anyhow::Result<[String; 6]> {
    let mut faces: [Option<String>; 6] = Default::default();
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());

    let version_line = lines.next().ok_or_else(|| anyhow::anyhow!("empty skybox file"))?;
    let version = version_line
        .strip_prefix("version")
        .map(str::trim)
        .ok_or_else(|| anyhow::anyhow!("expected `version`"))?;
    if version != "1" {
        anyhow::bail!("unsupported skybox file version {version}");
    }

    for line in lines {
        let (face, path) = line
            .trim()
            .split_once(char::is_whitespace)
            .ok_or_else(|| anyhow::anyhow!("malformed face line: {line}"))?;
        let index = FACE_NAMES
            .iter()
            .position(|name| *name == face)
            .ok_or_else(|| anyhow::anyhow!("unknown cubemap face {face}"))?;
        faces[index] = Some(path.trim().to_string());
    }

    let mut result: [String; 6] = Default::default();
    for (index, face) in faces.into_iter().enumerate() {
        result[index] = face.ok_or_else(|| anyhow::anyhow!("missing cubemap face {}", FACE_NAMES[index]))?;
    }
    Ok(result)
}

/// skybox 的加载结果是一张 cubemap 纹理
pub fn asset_type(env: Arc<RenderAssetEnv>) -> AssetTypeDesc {
    let load_env = env.clone();
    AssetTypeDesc {
        name: "skybox".to_string(),
        extensions: vec!["haskybox".to_string()],
        load: Arc::new(move |ctx| {
            let load = || -> anyhow::Result<TextureHandle> {
                let text = std::fs::read_to_string(&ctx.absolute_path)?;
                let faces = parse_skybox_file(&text)?;

                let assets = load_env.assets();
                let asset_root = assets.asset_path();

                let mut pixels = Vec::new();
                let mut extent = (0u32, 0u32);
                for face in &faces {
                    let image = image::open(asset_root.join(face))?.into_rgba8();
                    let (width, height) = image.dimensions();
                    if extent == (0, 0) {
                        extent = (width, height);
                    }
                    if (width, height) != extent {
                        anyhow::bail!("cubemap face {face} has mismatched dimensions");
                    }
                    pixels.extend_from_slice(image.as_raw());
                }

                Ok(load_env.rm().create_texture(&TextureDescriptor {
                    name: ctx.absolute_path.display().to_string(),
                    width: extent.0,
                    height: extent.1,
                    format: vk::Format::R8G8B8A8_UNORM,
                    layer_count: 6,
                    is_cubemap: true,
                    data: Some(&pixels),
                    ..Default::default()
                }))
            };

            match load() {
                Ok(texture) => LoadAssetResult::from_raw(texture.as_raw()),
                Err(e) => {
                    log::error!("failed to load skybox {:?}: {e}", ctx.absolute_path);
                    LoadAssetResult::failed()
                }
            }
        }),
        unload: Arc::new(move |result| {
            env.rm().destroy_texture(TextureHandle::from_raw(result.as_raw()));
        }),
        on_import: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_skybox_file() {
        let text = "version 1\nright r.png\nleft l.png\ntop t.png\nbottom b.png\nfront f.png\nback k.png\n";
        let faces = parse_skybox_file(text).unwrap();
        assert_eq!(faces[0], "r.png");
        assert_eq!(faces[5], "k.png");
    }

    #[test]
    fn test_parse_rejects_missing_face() {
        let text = "version 1\nright r.png\n";
        assert!(parse_skybox_file(text).is_err());
    }
}
