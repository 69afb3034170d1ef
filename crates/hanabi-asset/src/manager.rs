use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use hanabi_job::{JobHandle, JobResult, JobSystem};

use crate::handle::{generate_uuid, AssetHandle};
use crate::registry::{self, AssetRegistryEntry, AssetState};
use crate::types::{AssetTypeDesc, AssetTypeInfo, EmbeddedParams, LoadAssetResult, LoadContext};

const ASSET_REGISTRY_FILE_NAME: &str = "asset_registry.haregistry";

/// 加载 asset 的工作线程数
const ASSET_WORKER_COUNT: usize = 4;

struct AssetManagerState {
    registry: HashMap<u64, AssetRegistryEntry>,
    cache: HashMap<u64, LoadAssetResult>,
    /// parent uuid -> 内嵌子 asset 的 uuid 列表（按 import 顺序）
    embedded_index: HashMap<u64, Vec<u64>>,
    asset_infos: Vec<AssetTypeInfo>,
}

/// asset manager
///
/// 职责:
/// 1. 维护 registry（uuid -> 路径/类型/父子关系）及其持久化。
/// 2. 维护所有 asset 的状态 (Unloaded -> Pending -> Loaded)。
/// 3. 调度异步加载 job；子 asset 的加载排在父 asset 的 job 之后。
/// 4. 引用计数归零时卸载缓存。
///
/// 锁约定: 状态锁是唯一的 asset mutex；`load_fn`/`unload_fn`/`on_import`
/// 一律在锁外调用，回调内部可以重入 manager 的公开接口。
pub struct AssetManager {
    asset_path: PathBuf,
    registry_path: PathBuf,

    state: Arc<Mutex<AssetManagerState>>,
    jobs: Arc<JobSystem>,
}

// new & init
impl AssetManager {
    /// asset 根目录必须存在；已持久化的 registry 会被载入
    pub fn init(asset_path: impl Into<PathBuf>, builtin_types: Vec<AssetTypeDesc>) -> anyhow::Result<Self> {
        let asset_path: PathBuf = asset_path.into();
        if !asset_path.is_dir() {
            anyhow::bail!("asset path {asset_path:?} doesn't exist");
        }

        let registry_path = asset_path.join(ASSET_REGISTRY_FILE_NAME);

        let manager = Self {
            asset_path,
            registry_path,
            state: Arc::new(Mutex::new(AssetManagerState {
                registry: HashMap::new(),
                cache: HashMap::new(),
                embedded_index: HashMap::new(),
                asset_infos: Vec::new(),
            })),
            jobs: Arc::new(JobSystem::new(ASSET_WORKER_COUNT)),
        };

        for desc in builtin_types {
            manager.register_asset(desc);
        }

        if manager.registry_path.is_file() {
            manager.load_registry()?;
        }

        Ok(manager)
    }

    /// 持久化 registry，卸载所有仍在缓存中的 asset
    ///
    /// 之后这个 manager 不应再被使用。
    pub fn deinit(&self) {
        self.jobs.wait_all();

        if let Err(e) = self.save_registry() {
            log::error!("deinit -- failed to serialize asset registry: {e}");
        }

        // 先统一转成 Unloaded 并清空缓存，再在锁外强制卸载。
        // 引用计数保持原值：卸载回调里可能 release 其他 asset，
        // 那条路径只会正常递减，不会再触发第二次 unload。
        let leftovers = {
            let mut guard = self.state.lock().unwrap();
            let state = &mut *guard;
            let uuids: Vec<u64> = state.cache.keys().copied().collect();
            uuids
                .into_iter()
                .map(|uuid| {
                    let result = state.cache.remove(&uuid).unwrap();
                    let entry = state.registry.get_mut(&uuid).unwrap();
                    entry.state = AssetState::Unloaded;
                    let type_info_index = entry.type_info_index as usize;
                    let unload = state.asset_infos[type_info_index].unload.clone();
                    (result, unload)
                })
                .collect::<Vec<_>>()
        };

        for (result, unload) in leftovers {
            unload(result);
        }
    }
}

// getter
impl AssetManager {
    #[inline]
    pub fn asset_path(&self) -> &Path {
        &self.asset_path
    }

    #[inline]
    pub fn job_system(&self) -> &Arc<JobSystem> {
        &self.jobs
    }

    pub fn is_valid(&self, handle: AssetHandle) -> bool {
        if !handle.is_valid() {
            return false;
        }
        self.state.lock().unwrap().registry.contains_key(&handle.uuid)
    }

    pub fn is_loaded(&self, handle: AssetHandle) -> bool {
        self.state.lock().unwrap().cache.contains_key(&handle.uuid)
    }

    pub fn is_pending(&self, handle: AssetHandle) -> bool {
        self.state
            .lock()
            .unwrap()
            .registry
            .get(&handle.uuid)
            .is_some_and(|e| e.state == AssetState::Pending)
    }

    /// 缓存的加载结果；asset 必须处于 Loaded 状态
    pub fn get(&self, handle: AssetHandle) -> LoadAssetResult {
        let state = self.state.lock().unwrap();
        *state.cache.get(&handle.uuid).expect("get on an asset that is not loaded")
    }

    pub fn registry_entry(&self, handle: AssetHandle) -> AssetRegistryEntry {
        let state = self.state.lock().unwrap();
        state.registry.get(&handle.uuid).expect("invalid asset handle").clone()
    }

    pub fn handle_by_path(&self, path: &str) -> AssetHandle {
        let path = canonicalize_path(path);
        let state = self.state.lock().unwrap();
        Self::handle_by_path_locked(&state, &path)
    }

    fn handle_by_path_locked(state: &AssetManagerState, path: &str) -> AssetHandle {
        state
            .registry
            .iter()
            .find(|(_, entry)| entry.path == path)
            .map(|(uuid, _)| AssetHandle::new(*uuid))
            .unwrap_or(AssetHandle::INVALID)
    }

    pub fn is_embedded(&self, handle: AssetHandle) -> bool {
        let entry = self.registry_entry(handle);
        parse_embedded_path(&entry.path).is_some()
    }

    /// parent 的内嵌子 asset（按 import 顺序）
    pub fn embedded_assets(&self, parent: AssetHandle) -> Vec<AssetHandle> {
        let state = self.state.lock().unwrap();
        state
            .embedded_index
            .get(&parent.uuid)
            .map(|uuids| uuids.iter().map(|uuid| AssetHandle::new(*uuid)).collect())
            .unwrap_or_default()
    }

    pub fn asset_type_name(&self, type_info_index: u16) -> String {
        let state = self.state.lock().unwrap();
        state.asset_infos[type_info_index as usize].name.clone()
    }

    pub fn asset_type_index(&self, name: &str) -> Option<u16> {
        let state = self.state.lock().unwrap();
        state.asset_infos.iter().position(|info| info.name == name).map(|i| i as u16)
    }
}

// tools
impl AssetManager {
    /// 注册一种 asset 类型，重名直接拒绝
    pub fn register_asset(&self, desc: AssetTypeDesc) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.asset_infos.iter().any(|info| info.name == desc.name) {
            log::trace!("register_asset -- asset type {} already registered", desc.name);
            return false;
        }

        state.asset_infos.push(AssetTypeInfo {
            name: desc.name,
            extensions: desc.extensions,
            load: desc.load,
            unload: desc.unload,
            on_import: desc.on_import,
        });
        true
    }

    /// 导入一个 asset，返回其 uuid 句柄
    ///
    /// 路径先规范化；重复导入返回已有句柄。普通 asset 要求文件存在，
    /// 内嵌 asset 要求父 asset 已注册。导入成功后调用该类型的 on_import，
    /// on_import 可以递归导入内嵌子 asset。
    pub fn import_asset(&self, path: &str) -> AssetHandle {
        if path.is_empty() {
            log::error!("import_asset -- failed to import asset: file path is empty");
            return AssetHandle::INVALID;
        }

        let path = canonicalize_path(path);

        let (handle, on_import) = {
            let mut state = self.state.lock().unwrap();

            let existing = Self::handle_by_path_locked(&state, &path);
            if existing.is_valid() {
                return existing;
            }

            let embedded = parse_embedded_path(&path);
            if let Some((parent, _, _)) = &embedded {
                if !state.registry.contains_key(parent) {
                    log::error!("import_asset -- failed to import embedded asset {path}: parent {parent} is invalid");
                    return AssetHandle::INVALID;
                }
            } else {
                let absolute_path = self.asset_path.join(&path);
                if !absolute_path.is_file() {
                    log::error!("import_asset -- failed to import asset {path}: file doesn't exist");
                    return AssetHandle::INVALID;
                }
            }

            let extension = path_extension(&path);
            let Some(type_info_index) = Self::type_index_by_extension_locked(&state, extension) else {
                log::error!("import_asset -- failed to import asset {path}: extension {extension} isn't registered");
                return AssetHandle::INVALID;
            };

            let mut uuid = generate_uuid();
            while state.registry.contains_key(&uuid) {
                uuid = generate_uuid();
            }

            state.registry.insert(
                uuid,
                AssetRegistryEntry {
                    path: path.clone(),
                    type_info_index,
                    parent: AssetHandle::INVALID,
                    ref_count: 0,
                    state: AssetState::Unloaded,
                    job: JobHandle::default(),
                },
            );

            if let Some((parent, _, _)) = &embedded {
                state.embedded_index.entry(*parent).or_default().push(uuid);
            }

            let on_import = state.asset_infos[type_info_index as usize].on_import.clone();
            (AssetHandle::new(uuid), on_import)
        };

        // on_import 在锁外调用，允许递归 import
        if let Some(on_import) = on_import {
            on_import(self, handle);
        }

        log::trace!("Imported asset: {path}");
        handle
    }

    /// 设置 asset 的父子关系，父句柄无效时拒绝
    pub fn set_parent(&self, asset: AssetHandle, parent: AssetHandle) {
        let mut state = self.state.lock().unwrap();
        let parent_exists = !parent.is_valid() || state.registry.contains_key(&parent.uuid);
        let entry = state.registry.get_mut(&asset.uuid).expect("invalid asset handle");
        if parent_exists {
            entry.parent = parent;
        } else {
            log::error!(
                "set_parent -- failed to set parent of asset {}-{}: parent {} is invalid",
                entry.path,
                asset.uuid,
                parent.uuid
            );
        }
    }

    /// 请求加载 asset，返回其加载 job
    ///
    /// Unloaded 的 asset 转为 Pending 并入队加载 job（父 asset 先递归 acquire，
    /// 子 job 依赖父 job）；Pending/Loaded 的 asset 只增加引用计数，
    /// 返回原有 job 句柄。
    pub fn acquire(&self, handle: AssetHandle) -> JobHandle {
        let mut guard = self.state.lock().unwrap();
        self.acquire_locked(&mut guard, handle)
    }

    fn acquire_locked(&self, state: &mut AssetManagerState, handle: AssetHandle) -> JobHandle {
        let entry = state.registry.get(&handle.uuid).expect("invalid asset handle").clone();

        if entry.state != AssetState::Unloaded {
            let entry = state.registry.get_mut(&handle.uuid).unwrap();
            entry.ref_count += 1;
            return entry.job;
        }

        let mut parent_job = JobHandle::default();
        if entry.parent.is_valid() && state.registry.contains_key(&entry.parent.uuid) {
            parent_job = self.acquire_locked(state, entry.parent);
        }

        let job = self.spawn_load_job(state, handle, parent_job);

        let entry = state.registry.get_mut(&handle.uuid).unwrap();
        entry.state = AssetState::Pending;
        entry.ref_count = 1;
        entry.job = job;
        job
    }

    fn spawn_load_job(&self, state: &AssetManagerState, handle: AssetHandle, parent_job: JobHandle) -> JobHandle {
        let entry = state.registry.get(&handle.uuid).unwrap();

        // 内嵌 asset 实际读取父 asset 的文件，用父类型的 load_fn
        let embedded = parse_embedded_path(&entry.path);
        let (load, relative_path) = match &embedded {
            Some((parent_uuid, _, _)) => {
                let parent_entry = state.registry.get(parent_uuid).expect("embedded parent vanished from registry");
                let load = state.asset_infos[parent_entry.type_info_index as usize].load.clone();
                (load, parent_entry.path.clone())
            }
            None => {
                let load = state.asset_infos[entry.type_info_index as usize].load.clone();
                (load, entry.path.clone())
            }
        };

        let embedded_params = embedded.map(|(_, data_id, name)| EmbeddedParams {
            name,
            type_info_index: entry.type_info_index,
            data_id,
        });

        let ctx = LoadContext {
            asset: handle,
            absolute_path: self.asset_path.join(&relative_path),
            embedded: embedded_params,
        };
        let display_path = entry.path.clone();
        let shared = self.state.clone();

        self.jobs.execute(
            move || {
                let result = load(&ctx);

                let mut state = shared.lock().unwrap();
                let entry = state.registry.get_mut(&ctx.asset.uuid).expect("asset vanished from registry");
                if !result.success {
                    log::error!("load_asset_job -- failed to load asset: {display_path}");
                    entry.state = AssetState::Unloaded;
                    return JobResult::Failed;
                }

                entry.state = AssetState::Loaded;
                state.cache.insert(ctx.asset.uuid, result);

                log::trace!("loaded asset: {display_path}");
                JobResult::Succeeded
            },
            &[parent_job],
        )
    }

    /// 释放一次引用；归零且已加载时卸载缓存
    pub fn release(&self, handle: AssetHandle) {
        let unload = {
            let mut state = self.state.lock().unwrap();
            let entry = state.registry.get_mut(&handle.uuid).expect("invalid asset handle");

            assert!(entry.ref_count > 0, "release on an asset with no references");
            entry.ref_count -= 1;

            if entry.ref_count == 0 && entry.state == AssetState::Loaded {
                entry.state = AssetState::Unloaded;
                entry.job = JobHandle::default();
                let type_info_index = entry.type_info_index as usize;
                let path = entry.path.clone();

                let result = state.cache.remove(&handle.uuid).expect("loaded asset missing from cache");
                log::trace!("unloaded asset: {path}");
                Some((state.asset_infos[type_info_index].unload.clone(), result))
            } else {
                None
            }
        };

        // unload 在锁外调用，里面会触碰 renderer 的锁
        if let Some((unload, result)) = unload {
            unload(result);
        }
    }
}

// 持久化
impl AssetManager {
    pub fn save_registry(&self) -> anyhow::Result<()> {
        let text = {
            let state = self.state.lock().unwrap();
            registry::serialize_registry(&state.registry)
        };
        std::fs::write(&self.registry_path, text)?;
        log::trace!("serialized asset registry");
        Ok(())
    }

    fn load_registry(&self) -> anyhow::Result<()> {
        let text = std::fs::read_to_string(&self.registry_path)?;
        let parsed = registry::deserialize_registry(&text)?;

        let mut state = self.state.lock().unwrap();
        for record in parsed {
            let extension = path_extension(&record.path);
            let Some(type_info_index) = Self::type_index_by_extension_locked(&state, extension) else {
                anyhow::bail!("registry entry {} has unregistered extension {extension}", record.uuid);
            };

            state.registry.insert(
                record.uuid,
                AssetRegistryEntry {
                    path: record.path.clone(),
                    type_info_index,
                    parent: AssetHandle::new(record.parent),
                    ref_count: 0,
                    state: AssetState::Unloaded,
                    job: JobHandle::default(),
                },
            );

            if let Some((parent, _, _)) = parse_embedded_path(&record.path) {
                state.embedded_index.entry(parent).or_default().push(record.uuid);
            }
        }

        Ok(())
    }

    fn type_index_by_extension_locked(state: &AssetManagerState, extension: &str) -> Option<u16> {
        state
            .asset_infos
            .iter()
            .position(|info| info.extensions.iter().any(|e| e == extension))
            .map(|i| i as u16)
    }
}

/// 路径规范化：小写 + 正斜杠
pub fn canonicalize_path(path: &str) -> String {
    path.trim().replace('\\', "/").to_lowercase()
}

/// 取扩展名（不带点）
pub fn path_extension(path: &str) -> &str {
    path.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("")
}

/// 解析内嵌 asset 路径 `@<parent_uuid>-<data_id>/<name>.<ext>`
///
/// 返回 (parent_uuid, data_id, name)。
pub fn parse_embedded_path(path: &str) -> Option<(u64, u64, String)> {
    let rest = path.strip_prefix('@')?;
    let (parent, rest) = rest.split_once('-')?;
    let (data_id, name) = rest.split_once('/')?;
    if name.is_empty() {
        return None;
    }
    let parent: u64 = parent.parse().ok()?;
    let data_id: u64 = data_id.parse().ok()?;
    Some((parent, data_id, name.to_string()))
}

/// 拼一个内嵌 asset 路径
pub fn format_embedded_path(parent: AssetHandle, data_id: u64, name: &str) -> String {
    format!("@{}-{}/{}", parent.uuid, data_id, name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn dummy_type(name: &str, extensions: &[&str], unload_counter: Arc<AtomicU32>) -> AssetTypeDesc {
        AssetTypeDesc {
            name: name.to_string(),
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
            load: Arc::new(|_ctx| LoadAssetResult {
                success: true,
                index: 1,
                generation: 1,
            }),
            unload: Arc::new(move |_result| {
                unload_counter.fetch_add(1, Ordering::SeqCst);
            }),
            on_import: None,
        }
    }

    fn test_manager(dir: &Path) -> (AssetManager, Arc<AtomicU32>) {
        let unloads = Arc::new(AtomicU32::new(0));
        let manager = AssetManager::init(dir, vec![dummy_type("text", &["txt"], unloads.clone())]).unwrap();
        (manager, unloads)
    }

    #[test]
    fn test_canonicalize_makes_imports_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "hi").unwrap();

        let (manager, _) = test_manager(dir.path());
        let a = manager.import_asset("Hello.TXT");
        let b = manager.import_asset("hello.txt");
        assert!(a.is_valid());
        assert_eq!(a, b);
    }

    #[test]
    fn test_import_rejects_missing_file_and_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "hi").unwrap();

        let (manager, _) = test_manager(dir.path());
        assert!(!manager.import_asset("missing.txt").is_valid());
        assert!(!manager.import_asset("").is_valid());

        std::fs::write(dir.path().join("weird.xyz"), "?").unwrap();
        assert!(!manager.import_asset("weird.xyz").is_valid());
    }

    #[test]
    fn test_acquire_release_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "hi").unwrap();

        let (manager, unloads) = test_manager(dir.path());
        let handle = manager.import_asset("hello.txt");

        let job = manager.acquire(handle);
        manager.job_system().wait(job);
        assert!(manager.is_loaded(handle));

        // 再 acquire 两次：引用计数 3
        let job2 = manager.acquire(handle);
        let job3 = manager.acquire(handle);
        // Pending/Loaded 期间返回原有 job 句柄
        assert_eq!(job, job2);
        assert_eq!(job, job3);

        manager.release(handle);
        manager.release(handle);
        assert!(manager.is_loaded(handle));
        assert_eq!(unloads.load(Ordering::SeqCst), 0);

        manager.release(handle);
        assert!(!manager.is_loaded(handle));
        assert_eq!(unloads.load(Ordering::SeqCst), 1);

        // 释放后可以重新加载
        let job = manager.acquire(handle);
        manager.job_system().wait(job);
        assert!(manager.is_loaded(handle));
    }

    #[test]
    fn test_refcount_invariant_when_positive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "hi").unwrap();

        let (manager, _) = test_manager(dir.path());
        let handle = manager.import_asset("hello.txt");
        manager.acquire(handle);

        let entry = manager.registry_entry(handle);
        assert!(entry.ref_count > 0);
        assert!(matches!(entry.state, AssetState::Pending | AssetState::Loaded));
    }

    #[test]
    fn test_failed_load_reverts_to_unloaded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.bin"), "x").unwrap();

        let failing = AssetTypeDesc {
            name: "binary".to_string(),
            extensions: vec!["bin".to_string()],
            load: Arc::new(|_ctx| LoadAssetResult::failed()),
            unload: Arc::new(|_result| {}),
            on_import: None,
        };
        let manager = AssetManager::init(dir.path(), vec![failing]).unwrap();

        let handle = manager.import_asset("broken.bin");
        let job = manager.acquire(handle);
        assert_eq!(manager.job_system().wait(job), JobResult::Failed);

        assert!(!manager.is_loaded(handle));
        assert_eq!(manager.registry_entry(handle).state, AssetState::Unloaded);
    }

    #[test]
    fn test_embedded_import_requires_parent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("model.txt"), "m").unwrap();

        let (manager, _) = test_manager(dir.path());
        // 父 uuid 17 不存在
        assert!(!manager.import_asset("@17-0/sub.txt").is_valid());

        let parent = manager.import_asset("model.txt");
        let child_path = format_embedded_path(parent, 0, "sub.txt");
        let child = manager.import_asset(&child_path);
        assert!(child.is_valid());
        assert!(manager.is_embedded(child));
        assert_eq!(manager.embedded_assets(parent), vec![child]);
    }

    #[test]
    fn test_embedded_child_waits_for_parent_job() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("model.txt"), "m").unwrap();

        let (manager, _) = test_manager(dir.path());
        let parent = manager.import_asset("model.txt");
        let child = manager.import_asset(&format_embedded_path(parent, 0, "sub.txt"));
        manager.set_parent(child, parent);

        let child_job = manager.acquire(child);
        manager.job_system().wait(child_job);

        // 子 asset 加载完成时，父 asset 必然已经加载完成
        assert!(manager.is_loaded(parent));
        assert!(manager.is_loaded(child));
    }

    #[test]
    fn test_registry_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "hi").unwrap();

        let uuid = {
            let (manager, _) = test_manager(dir.path());
            let handle = manager.import_asset("hello.txt");
            manager.deinit();
            handle.uuid
        };

        // 重启后 re-import 返回同一个 uuid
        let (manager, _) = test_manager(dir.path());
        let handle = manager.import_asset("hello.txt");
        assert_eq!(handle.uuid, uuid);
        assert_eq!(manager.registry_entry(handle).state, AssetState::Unloaded);
    }

    #[test]
    fn test_embedded_path_parsing() {
        assert_eq!(
            parse_embedded_path("@42-3/material_3.hamaterial"),
            Some((42, 3, "material_3.hamaterial".to_string()))
        );
        assert_eq!(parse_embedded_path("models/helmet.gltf"), None);
        assert_eq!(parse_embedded_path("@notanumber-0/x.y"), None);
        assert_eq!(parse_embedded_path("@1-2/"), None);

        let formatted = format_embedded_path(AssetHandle::new(42), 3, "material_3.hamaterial");
        assert_eq!(formatted, "@42-3/material_3.hamaterial");
    }
}
