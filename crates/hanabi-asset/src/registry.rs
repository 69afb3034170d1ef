use std::collections::HashMap;

use hanabi_job::JobHandle;

use crate::handle::AssetHandle;

/// asset 的加载状态机
///
/// 状态流转: Unloaded -> Pending -> Loaded
///                          \-> Unloaded (加载失败)
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AssetState {
    Unloaded,
    Pending,
    Loaded,
}

/// registry 中的一条记录
#[derive(Clone)]
pub struct AssetRegistryEntry {
    /// 相对于 asset 根目录的规范化路径；内嵌 asset 使用 `@parent-id/name.ext` 形式
    pub path: String,
    pub type_info_index: u16,
    /// 无父 asset 时为 INVALID
    pub parent: AssetHandle,
    pub ref_count: u32,
    pub state: AssetState,
    /// 最近一次加载 job，没有时为默认（无效）句柄
    pub job: JobHandle,
}

/// 把 registry 序列化为文本
///
/// 格式（版本 1）:
/// ```text
/// version 1
/// entry_count <N>
///
/// asset <uuid>
/// parent <uuid>
/// path <byte_len> <path>
/// ```
/// 记录按 uuid 升序写出，保证输出稳定。
pub fn serialize_registry(registry: &HashMap<u64, AssetRegistryEntry>) -> String {
    // 排序用的临时 uuid 数组放在 scratch 上
    let scratch = hanabi_alloc::scratch();
    let uuids: &mut [u64] = unsafe { scratch.arena().alloc_slice(registry.len()) };
    for (slot, uuid) in uuids.iter_mut().zip(registry.keys()) {
        *slot = *uuid;
    }
    uuids.sort_unstable();

    let mut out = String::new();
    out.push_str("version 1\n");
    out.push_str(&format!("entry_count {}\n", registry.len()));

    for uuid in uuids.iter() {
        let entry = &registry[uuid];
        out.push_str(&format!("\nasset {uuid}\n"));
        out.push_str(&format!("parent {}\n", entry.parent.uuid));
        out.push_str(&format!("path {} {}\n", entry.path.len(), entry.path));
    }

    out
}

/// 解析出的 registry 记录，类型在上层按扩展名补齐
pub struct ParsedRegistryEntry {
    pub uuid: u64,
    pub parent: u64,
    pub path: String,
}

/// 解析 registry 文本
///
/// 记录重建为 `state = Unloaded`、`ref_count = 0`；内嵌索引由上层按路径重建。
pub fn deserialize_registry(text: &str) -> anyhow::Result<Vec<ParsedRegistryEntry>> {
    let mut cursor = text;

    let version = parse_name_value(&mut cursor, "version")?;
    let version: u64 = version.parse()?;
    if version != 1 {
        anyhow::bail!("unsupported registry version {version}");
    }

    let entry_count: usize = parse_name_value(&mut cursor, "entry_count")?.parse()?;

    let mut entries = Vec::with_capacity(entry_count);
    for i in 0..entry_count {
        let uuid: u64 = parse_name_value(&mut cursor, "asset")
            .map_err(|e| anyhow::anyhow!("entry {i}: {e}"))?
            .parse()?;
        let parent: u64 = parse_name_value(&mut cursor, "parent")
            .map_err(|e| anyhow::anyhow!("entry {i}: {e}"))?
            .parse()?;

        // path 记录带字节长度前缀，路径本身可以包含空格
        cursor = cursor.trim_start();
        let rest = cursor
            .strip_prefix("path")
            .ok_or_else(|| anyhow::anyhow!("entry {i}: expected `path`"))?;
        let rest = rest.trim_start();
        let (len_str, rest) = rest
            .split_once(char::is_whitespace)
            .ok_or_else(|| anyhow::anyhow!("entry {i}: missing path length"))?;
        let path_len: usize = len_str.parse()?;
        if rest.len() < path_len {
            anyhow::bail!("entry {i}: truncated path");
        }
        let path = rest[..path_len].to_string();
        cursor = &rest[path_len..];

        entries.push(ParsedRegistryEntry { uuid, parent, path });
    }

    Ok(entries)
}

/// 解析 `<name> <value>\n` 形式的一行
fn parse_name_value<'a>(cursor: &mut &'a str, name: &str) -> anyhow::Result<&'a str> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use hanabi_job::JobHandle;

    fn entry(path: &str, parent: u64) -> AssetRegistryEntry {
        AssetRegistryEntry {
            path: path.to_string(),
            type_info_index: 0,
            parent: AssetHandle::new(parent),
            ref_count: 3,
            state: AssetState::Loaded,
            job: JobHandle::default(),
        }
    }

    #[test]
    fn test_registry_roundtrip() {
        let mut registry = HashMap::new();
        registry.insert(42, entry("models/helmet.gltf", 0));
        registry.insert(7, entry("@42-0/material_0.hamaterial", 42));
        registry.insert(100, entry("scenes/main.hascene", 0));

        let text = serialize_registry(&registry);
        let parsed = deserialize_registry(&text).unwrap();

        assert_eq!(parsed.len(), 3);
        // 按 uuid 升序
        assert_eq!(parsed[0].uuid, 7);
        assert_eq!(parsed[1].uuid, 42);
        assert_eq!(parsed[2].uuid, 100);

        assert_eq!(parsed[0].parent, 42);
        assert_eq!(parsed[0].path, "@42-0/material_0.hamaterial");
        assert_eq!(parsed[1].path, "models/helmet.gltf");
    }

    #[test]
    fn test_path_with_spaces_roundtrip() {
        let mut registry = HashMap::new();
        registry.insert(1, entry("models/space marine.gltf", 0));

        let text = serialize_registry(&registry);
        let parsed = deserialize_registry(&text).unwrap();
        assert_eq!(parsed[0].path, "models/space marine.gltf");
    }

    #[test]
    fn test_bad_version_is_rejected() {
        assert!(deserialize_registry("version 2\nentry_count 0\n").is_err());
        assert!(deserialize_registry("garbage").is_err());
    }

    #[test]
    fn test_truncated_entry_is_rejected() {
        let text = "version 1\nentry_count 2\n\nasset 1\nparent 0\npath 3 a/b\n";
        assert!(deserialize_registry(text).is_err());
    }
}
