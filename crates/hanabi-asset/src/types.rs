use std::path::PathBuf;
use std::sync::Arc;

use crate::handle::AssetHandle;
use crate::manager::AssetManager;

/// 加载结果
///
/// 携带进入对应 resource pool 的类型化句柄 (index, generation)。
/// asset 层不解释这两个值，由注册该类型的一方负责转换。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadAssetResult {
    pub success: bool,
    pub index: u32,
    pub generation: u32,
}

impl LoadAssetResult {
    pub fn failed() -> Self {
        Self {
            success: false,
            index: 0,
            generation: 0,
        }
    }

    pub fn from_raw(raw: u64) -> Self {
        Self {
            success: true,
            index: raw as u32,
            generation: (raw >> 32) as u32,
        }
    }

    /// 合回 64 位，布局与 slotmap 的 ffi 表示一致
    pub fn as_raw(&self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }
}

/// 内嵌 asset 的加载参数
///
/// data_id 是父 asset 内部的子资源序号（例如 model 中的 mesh 序号）。
#[derive(Clone, Debug)]
pub struct EmbeddedParams {
    pub name: String,
    pub type_info_index: u16,
    pub data_id: u64,
}

/// 传给 load_fn 的上下文
pub struct LoadContext {
    pub asset: AssetHandle,
    /// 实际读取的文件（内嵌 asset 指向父 asset 的文件）
    pub absolute_path: PathBuf,
    pub embedded: Option<EmbeddedParams>,
}

pub type LoadAssetFn = Arc<dyn Fn(&LoadContext) -> LoadAssetResult + Send + Sync>;
pub type UnloadAssetFn = Arc<dyn Fn(LoadAssetResult) + Send + Sync>;
pub type OnImportAssetFn = Arc<dyn Fn(&AssetManager, AssetHandle) + Send + Sync>;

/// 注册 asset 类型时的描述
#[derive(Clone)]
pub struct AssetTypeDesc {
    pub name: String,
    pub extensions: Vec<String>,
    pub load: LoadAssetFn,
    pub unload: UnloadAssetFn,
    pub on_import: Option<OnImportAssetFn>,
}

/// 注册后的 asset 类型信息
#[derive(Clone)]
pub struct AssetTypeInfo {
    pub name: String,
    pub extensions: Vec<String>,
    pub(crate) load: LoadAssetFn,
    pub(crate) unload: UnloadAssetFn,
    pub(crate) on_import: Option<OnImportAssetFn>,
}
