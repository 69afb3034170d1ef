use std::sync::Arc;

use ash::vk;
use hanabi_asset::{AssetTypeDesc, LoadAssetResult};

use crate::asset_types::RenderAssetEnv;
use crate::handles::{RawHandle, TextureHandle};
use crate::resources::TextureDescriptor;

pub fn asset_type(env: Arc<RenderAssetEnv>) -> AssetTypeDesc {
    let load_env = env.clone();
    AssetTypeDesc {
        name: "texture".to_string(),
        extensions: ["png", "jpeg", "jpg", "tga"].iter().map(|e| e.to_string()).collect(),
        load: Arc::new(move |ctx| {
            let image = match image::open(&ctx.absolute_path) {
                Ok(image) => image,
                Err(e) => {
                    log::error!("failed to decode texture {:?}: {e}", ctx.absolute_path);
                    return LoadAssetResult::failed();
                }
            };

            let rgba = image.into_rgba8();
            let (width, height) = rgba.dimensions();

            let handle = load_env.rm().create_texture(&TextureDescriptor {
                name: ctx.absolute_path.display().to_string(),
                width,
                height,
                format: vk::Format::R8G8B8A8_UNORM,
                mipmapping: true,
                data: Some(rgba.as_raw()),
                ..Default::default()
            });

            LoadAssetResult::from_raw(handle.as_raw())
        }),
        unload: Arc::new(move |result| {
            env.rm().destroy_texture(TextureHandle::from_raw(result.as_raw()));
        }),
        on_import: None,
    }
}
