//! 全局基础类型与错误定义

use thiserror::Error;

// ── ID 类型别名 ───────────────────────────────────────────────────────────────

pub type TabletId    = u64;
pub type PartitionId = u64;
pub type ReplicaId   = u64;
pub type SchemaHash  = u32;
pub type TableId     = u64;
pub type RowsetId    = u64;
/// Rowset 内的 Segment 序号
pub type SegmentId   = u32;
/// 列的稳定唯一 id（跨 schema change 不变）
pub type ColumnUniqueId = u32;

// ── Version ───────────────────────────────────────────────────────────────────

/// 一个 Rowset 覆盖的 [start, end] 闭区间版本范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version {
    pub start: i64,
    pub end:   i64,
}

impl Version {
    pub fn new(start: i64, end: i64) -> Self { Self { start, end } }
    pub fn point(v: i64) -> Self { Self::new(v, v) }

    pub fn is_point(&self) -> bool { self.start == self.end }

    /// `other` 完全落在 self 内
    pub fn contains(&self, other: &Version) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn contains_version(&self, v: i64) -> bool {
        self.start <= v && v <= self.end
    }

    pub fn overlaps(&self, other: &Version) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{},{}]", self.start, self.end)
    }
}

// ── 枚举 ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeysType {
    /// 聚合模型：value 列有 SUM/MAX/MIN 等聚合函数
    Aggregate,
    /// 唯一键模型：相同 key 保留最新版本（merge-on-write，依赖 DeleteBitmap）
    Unique,
    /// 明细模型：保留所有行
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Int8, Int16, Int32, Int64,
    Float32, Float64,
    Varchar,
    Date,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateType {
    None, Sum, Max, Min, Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMedium { Hdd, Ssd }

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionType { Base, Cumulative }

/// Rowset 的磁盘布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowsetType { Alpha, Beta }

// ── Tablet 生命周期 ───────────────────────────────────────────────────────────
//
//   NOTREADY -> RUNNING -> TOMBSTONED -> STOPPED -> SHUTDOWN
//                  |                        ^
//                  +------------------------+
//
// 只允许向前迁移。状态本身不带行为，由上层（Tablet / StorageEngine）解释。

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TabletState {
    /// 建表 / alter / clone 过程中，拒绝数据读写
    NotReady,
    Running,
    /// 完整性被破坏（如版本缺失），不再接受请求，等待外部删除
    Tombstoned,
    /// 正在关闭，磁盘文件仍在
    Stopped,
    /// 文件已删除，彻底关闭
    Shutdown,
}

impl TabletState {
    pub fn can_transition_to(self, next: TabletState) -> bool {
        use TabletState::*;
        matches!(
            (self, next),
            (NotReady, Running)
                | (Running, Tombstoned)
                | (Running, Stopped)
                | (Tombstoned, Stopped)
                | (Stopped, Shutdown)
        )
    }
}

impl std::fmt::Display for TabletState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotReady   => "NOTREADY",
            Self::Running    => "RUNNING",
            Self::Tombstoned => "TOMBSTONED",
            Self::Stopped    => "STOPPED",
            Self::Shutdown   => "SHUTDOWN",
        };
        f.write_str(s)
    }
}

// ── 错误 ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum OlapError {
    /// 文件 / payload 损坏：magic、校验和、截断、解码失败。不可重试。
    #[error("corruption: {0}")]
    Corruption(String),
    /// 调用方违反契约（版本重叠、缺少默认值的新增列等）
    #[error("internal error: {0}")]
    InternalError(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("tablet not found: tablet_id={0}")]
    TabletNotFound(TabletId),
    #[error("tablet already exists: tablet_id={0}")]
    TabletExists(TabletId),
    #[error("version already exists: {0}")]
    VersionExists(Version),
    #[error("missing versions in range {0}")]
    MissingVersions(String),
    #[error("invalid tablet state transition: {from} -> {to}")]
    InvalidStateTransition { from: TabletState, to: TabletState },
    #[error("tablet {tablet_id} is {state}")]
    InvalidTabletState { tablet_id: TabletId, state: TabletState },
    #[error("encoding error: {0}")]
    Encoding(String),
    #[error("compression error: {0}")]
    Compression(String),
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl OlapError {
    pub fn is_corruption(&self) -> bool { matches!(self, Self::Corruption(_)) }
}

pub type Result<T> = std::result::Result<T, OlapError>;

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn legal_transitions_only_move_forward() {
        use TabletState::*;
        assert!(NotReady.can_transition_to(Running));
        assert!(Running.can_transition_to(Tombstoned));
        assert!(Running.can_transition_to(Stopped));
        assert!(Tombstoned.can_transition_to(Stopped));
        assert!(Stopped.can_transition_to(Shutdown));

        assert!(!Running.can_transition_to(NotReady));
        assert!(!Stopped.can_transition_to(Running));
        assert!(!Shutdown.can_transition_to(Stopped));
        assert!(!NotReady.can_transition_to(Tombstoned));
        assert!(!Tombstoned.can_transition_to(Running));
    }

    #[test]
    fn version_overlap() {
        let v = Version::new(3, 5);
        assert!(v.overlaps(&Version::point(5)));
        assert!(v.overlaps(&Version::new(1, 3)));
        assert!(!v.overlaps(&Version::new(6, 9)));
        assert!(v.contains(&Version::new(4, 5)));
        assert!(!v.contains(&Version::new(4, 6)));
        assert_eq!(v.to_string(), "[3,5]");
    }
}
