use rand::Rng;

/// asset 的持久化标识
///
/// uuid 为 0 表示无效句柄。uuid 跨进程、跨会话稳定，由 registry 文件持久化。
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Default)]
pub struct AssetHandle {
    pub uuid: u64,
}

impl AssetHandle {
    pub const INVALID: AssetHandle = AssetHandle { uuid: 0 };

    #[inline]
    pub fn new(uuid: u64) -> Self {
        Self { uuid }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.uuid != 0
    }
}

impl std::fmt::Display for AssetHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.uuid)
    }
}

/// 生成一个非零 uuid
pub(crate) fn generate_uuid() -> u64 {
    rand::rng().random_range(1..=u64::MAX)
}
