pub mod material;
pub mod model;
pub mod scene;
pub mod shader;
pub mod skybox;
pub mod texture;

use std::sync::{Arc, Mutex, Weak};

use hanabi_asset::{AssetManager, AssetTypeDesc};

use crate::handles::RenderPassHandle;
use crate::resources::RenderResourceManager;
use crate::scene::SceneManager;

/// asset 加载回调共享的环境
///
/// 回调注册进 AssetManager 后由 worker 线程调用，
/// 这里只保留 AssetManager 的弱引用避免循环。
pub struct RenderAssetEnv {
    rm: Arc<RenderResourceManager>,
    scene: Arc<Mutex<SceneManager>>,

    assets: Mutex<Weak<AssetManager>>,
    /// 材质 pipeline 的目标 render pass，graph compile 后写入
    world_render_pass: Mutex<RenderPassHandle>,
}

impl RenderAssetEnv {
    pub fn new(rm: Arc<RenderResourceManager>, scene: Arc<Mutex<SceneManager>>) -> Self {
        Self {
            rm,
            scene,
            assets: Mutex::new(Weak::new()),
            world_render_pass: Mutex::new(RenderPassHandle::default()),
        }
    }

    pub fn bind_asset_manager(&self, assets: &Arc<AssetManager>) {
        *self.assets.lock().unwrap() = Arc::downgrade(assets);
    }

    pub fn set_world_render_pass(&self, render_pass: RenderPassHandle) {
        *self.world_render_pass.lock().unwrap() = render_pass;
    }

    #[inline]
    pub fn rm(&self) -> &Arc<RenderResourceManager> {
        &self.rm
    }

    #[inline]
    pub fn scene(&self) -> &Arc<Mutex<SceneManager>> {
        &self.scene
    }

    pub fn assets(&self) -> Arc<AssetManager> {
        self.assets.lock().unwrap().upgrade().expect("asset manager already destroyed")
    }

    pub fn world_render_pass(&self) -> RenderPassHandle {
        *self.world_render_pass.lock().unwrap()
    }
}

/// 引擎内置的 asset 类型
///
/// texture / shader / material / static_mesh / model / skybox / scene
pub fn builtin_asset_types(env: Arc<RenderAssetEnv>) -> Vec<AssetTypeDesc> {
    vec![
        texture::asset_type(env.clone()),
        shader::asset_type(env.clone()),
        material::asset_type(env.clone()),
        model::static_mesh_asset_type(env.clone()),
        model::asset_type(env.clone()),
        skybox::asset_type(env.clone()),
        scene::asset_type(env),
    ]
}
