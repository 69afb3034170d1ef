use std::path::Path;
use std::sync::Arc;

use hanabi_asset::{AssetTypeDesc, LoadAssetResult};

use crate::asset_types::RenderAssetEnv;
use crate::handles::{RawHandle, ShaderGroupHandle};

/// `.hashader` 文本格式:
///
/// ```text
/// version 1
/// vertex shaders/bin/opaque_pbr.vert.spv
/// fragment shaders/bin/opaque_pbr.frag.spv
/// ```
///
/// 每个 stage 指向一个预编译的 SPIR-V 文件，路径相对 asset 根目录。
fn parse_shader_file(text: &str) -> anyhow::Result<Vec<(String, String)>> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());

    let version_line = lines.next().ok_or_else(|| anyhow::anyhow!("empty shader file"))?;
    let version = version_line
        .strip_prefix("version")
        .map(str::trim)
        .ok_or_else(|| anyhow::anyhow!("expected `version`"))?;
    if version != "1" {
        anyhow::bail!("unsupported shader file version {version}");
    }

    let mut stages = Vec::new();
    for line in lines {
        let (stage, path) = line
            .trim()
            .split_once(char::is_whitespace)
            .ok_or_else(|| anyhow::anyhow!("malformed stage line: {line}"))?;
        if stage != "vertex" && stage != "fragment" {
            anyhow::bail!("unknown shader stage {stage}");
        }
        stages.push((stage.to_string(), path.trim().to_string()));
    }

    if stages.is_empty() {
        anyhow::bail!("shader file declares no stages");
    }
    Ok(stages)
}

/// shader asset 的加载结果是一个 shader group:
/// 所有 stage 的模块 + 每个 descriptor set 的 layout。
pub fn asset_type(env: Arc<RenderAssetEnv>) -> AssetTypeDesc {
    let load_env = env.clone();
    AssetTypeDesc {
        name: "shader".to_string(),
        extensions: vec!["hashader".to_string()],
        load: Arc::new(move |ctx| {
            let load = || -> anyhow::Result<ShaderGroupHandle> {
                let text = std::fs::read_to_string(&ctx.absolute_path)?;
                let stages = parse_shader_file(&text)?;

                // stage 的 spv 路径相对 asset 根目录
                let assets = load_env.assets();
                let asset_root: &Path = assets.asset_path();
                let rm = load_env.rm();

                let mut shaders = Vec::with_capacity(stages.len());
                for (stage, spv_path) in &stages {
                    let spv = std::fs::read(asset_root.join(spv_path))?;
                    let name = format!("{}-{stage}", ctx.absolute_path.display());
                    shaders.push(rm.create_shader(&name, &spv)?);
                }

                let group_name = ctx.absolute_path.display().to_string();
                Ok(rm.create_shader_group(&group_name, &shaders))
            };

            match load() {
                Ok(group) => LoadAssetResult::from_raw(group.as_raw()),
                Err(e) => {
                    log::error!("failed to load shader {:?}: {e}", ctx.absolute_path);
                    LoadAssetResult::failed()
                }
            }
        }),
        unload: Arc::new(move |result| {
            let rm = env.rm();
            let group = ShaderGroupHandle::from_raw(result.as_raw());
            for shader in rm.shader_group_shaders(group) {
                rm.destroy_shader(shader);
            }
            rm.destroy_shader_group(group);
        }),
        on_import: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_shader_file() {
        let text = "version 1\nvertex shaders/bin/a.vert.spv\nfragment shaders/bin/a.frag.spv\n";
        let stages = parse_shader_file(text).unwrap();
        assert_eq!(stages.len(), 2);
        assert_eq!(stages[0], ("vertex".to_string(), "shaders/bin/a.vert.spv".to_string()));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(parse_shader_file("").is_err());
        assert!(parse_shader_file("version 2\nvertex a.spv").is_err());
        assert!(parse_shader_file("version 1\ngeometry a.spv").is_err());
        assert!(parse_shader_file("version 1\n").is_err());
    }
}
