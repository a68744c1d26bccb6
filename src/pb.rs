//! 持久化 / 跨进程传输使用的 protobuf 结构
//!
//! Segment footer、索引页、TabletMetaPB 都在这里定义。字段编号一经发布不可复用。

use crate::common::{
    AggregateType, ColumnType, KeysType, OlapError, Result, RowsetType, StorageMedium, TabletState,
};
use crate::field_type::{CompressionType, EncodingType, FieldType};

// ── 枚举 ──────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum FieldTypePb {
    Int8 = 0,
    Int16 = 1,
    Int32 = 2,
    Int64 = 3,
    Float32 = 4,
    Float64 = 5,
    Bytes = 6,
    Date = 7,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum EncodingTypePb {
    Plain = 0,
    RunLength = 1,
    DeltaBinary = 2,
    Dictionary = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum CompressionTypePb {
    NoCompression = 0,
    Lz4 = 1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ColumnTypePb {
    Int8 = 0,
    Int16 = 1,
    Int32 = 2,
    Int64 = 3,
    Float32 = 4,
    Float64 = 5,
    Varchar = 6,
    Date = 7,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum KeysTypePb {
    DupKeys = 0,
    UniqueKeys = 1,
    AggKeys = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum AggregateTypePb {
    None = 0,
    Sum = 1,
    Max = 2,
    Min = 3,
    Replace = 4,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum TabletStatePb {
    PbNotready = 0,
    PbRunning = 1,
    PbTombstoned = 2,
    PbStopped = 3,
    PbShutdown = 4,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum RowsetTypePb {
    AlphaRowset = 0,
    BetaRowset = 1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum RowsetStatePb {
    Prepared = 0,
    Committed = 1,
    Visible = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum StorageMediumPb {
    Hdd = 0,
    Ssd = 1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum PredicateOpPb {
    Eq = 0,
    Ne = 1,
    Lt = 2,
    Le = 3,
    Gt = 4,
    Ge = 5,
    In = 6,
    IsNull = 7,
    IsNotNull = 8,
}

// ── Segment 文件 ──────────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PagePointerPb {
    #[prost(uint64, tag = "1")]
    pub offset: u64,
    #[prost(uint32, tag = "2")]
    pub size: u32,
}

/// min / max 为 `Value::to_sort_key` 字节串，只统计非 Null 值
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ZoneMapPb {
    #[prost(bytes = "vec", tag = "1")]
    pub min: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub max: Vec<u8>,
    #[prost(bool, tag = "3")]
    pub has_null: bool,
    #[prost(bool, tag = "4")]
    pub has_not_null: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ColumnMetaPb {
    /// footer 中的序号
    #[prost(uint32, tag = "1")]
    pub column_id: u32,
    #[prost(uint32, tag = "2")]
    pub unique_id: u32,
    #[prost(enumeration = "FieldTypePb", tag = "3")]
    pub field_type: i32,
    #[prost(enumeration = "EncodingTypePb", tag = "4")]
    pub encoding: i32,
    #[prost(enumeration = "CompressionTypePb", tag = "5")]
    pub compression: i32,
    #[prost(bool, tag = "6")]
    pub is_nullable: bool,
    #[prost(message, optional, tag = "7")]
    pub ordinal_index: Option<PagePointerPb>,
    #[prost(message, optional, tag = "8")]
    pub page_zone_maps: Option<PagePointerPb>,
    #[prost(message, optional, tag = "9")]
    pub segment_zone_map: Option<ZoneMapPb>,
    #[prost(message, optional, tag = "10")]
    pub bloom_filter: Option<PagePointerPb>,
    #[prost(message, optional, tag = "11")]
    pub bitmap_index: Option<PagePointerPb>,
    #[prost(uint64, tag = "12")]
    pub data_size: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SegmentFooterPb {
    #[prost(uint32, tag = "1")]
    pub version: u32,
    #[prost(message, repeated, tag = "2")]
    pub columns: Vec<ColumnMetaPb>,
    #[prost(uint32, tag = "3")]
    pub num_rows: u32,
    #[prost(message, optional, tag = "4")]
    pub short_key_index_page: Option<PagePointerPb>,
    #[prost(uint32, tag = "5")]
    pub num_short_key_columns: u32,
    #[prost(uint64, tag = "6")]
    pub index_footprint: u64,
    #[prost(uint64, tag = "7")]
    pub data_footprint: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OrdinalIndexPb {
    #[prost(uint32, repeated, tag = "1")]
    pub first_row_ids: Vec<u32>,
    #[prost(uint64, repeated, tag = "2")]
    pub offsets: Vec<u64>,
    #[prost(uint32, repeated, tag = "3")]
    pub sizes: Vec<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PageZoneMapsPb {
    #[prost(message, repeated, tag = "1")]
    pub zone_maps: Vec<ZoneMapPb>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ShortKeyEntryPb {
    #[prost(uint32, tag = "1")]
    pub row_id: u32,
    /// 每个 key 列的 `Value::to_key_bytes`
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub key: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ShortKeyIndexPb {
    #[prost(message, repeated, tag = "1")]
    pub entries: Vec<ShortKeyEntryPb>,
    #[prost(uint32, tag = "2")]
    pub num_rows: u32,
    #[prost(uint32, tag = "3")]
    pub interval: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BloomFilterPb {
    #[prost(uint64, tag = "1")]
    pub num_bits: u64,
    #[prost(uint32, tag = "2")]
    pub num_hashes: u32,
    #[prost(bytes = "vec", tag = "3")]
    pub bits: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BitmapIndexPb {
    /// 有序去重的 sort key
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub dict_values: Vec<Vec<u8>>,
    /// 与 dict_values 一一对应的 roaring 序列化结果
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub bitmaps: Vec<Vec<u8>>,
    #[prost(bytes = "vec", tag = "3")]
    pub null_bitmap: Vec<u8>,
}

// ── Tablet 元数据 ─────────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ColumnPb {
    #[prost(uint32, tag = "1")]
    pub unique_id: u32,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(enumeration = "ColumnTypePb", tag = "3")]
    pub column_type: i32,
    #[prost(bool, tag = "4")]
    pub is_key: bool,
    #[prost(bool, tag = "5")]
    pub is_nullable: bool,
    #[prost(enumeration = "AggregateTypePb", tag = "6")]
    pub aggregation: i32,
    #[prost(string, optional, tag = "7")]
    pub default_value: Option<String>,
    #[prost(uint32, tag = "8")]
    pub length: u32,
    #[prost(bool, tag = "9")]
    pub is_bf_column: bool,
    #[prost(bool, tag = "10")]
    pub has_bitmap_index: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TabletSchemaPb {
    #[prost(enumeration = "KeysTypePb", tag = "1")]
    pub keys_type: i32,
    #[prost(message, repeated, tag = "2")]
    pub columns: Vec<ColumnPb>,
    #[prost(uint32, tag = "3")]
    pub num_short_key_columns: u32,
    #[prost(uint32, tag = "4")]
    pub schema_version: u32,
    #[prost(uint32, tag = "5")]
    pub next_column_unique_id: u32,
    #[prost(enumeration = "CompressionTypePb", tag = "6")]
    pub compression_type: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TabletUidPb {
    #[prost(int64, tag = "1")]
    pub hi: i64,
    #[prost(int64, tag = "2")]
    pub lo: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RowsetMetaPb {
    #[prost(uint64, tag = "1")]
    pub rowset_id: u64,
    #[prost(uint64, tag = "2")]
    pub tablet_id: u64,
    #[prost(uint64, tag = "3")]
    pub partition_id: u64,
    #[prost(message, optional, tag = "4")]
    pub tablet_uid: Option<TabletUidPb>,
    #[prost(int64, tag = "5")]
    pub start_version: i64,
    #[prost(int64, tag = "6")]
    pub end_version: i64,
    #[prost(uint64, tag = "7")]
    pub num_rows: u64,
    #[prost(uint64, tag = "8")]
    pub total_disk_size: u64,
    #[prost(uint64, tag = "9")]
    pub data_disk_size: u64,
    #[prost(uint64, tag = "10")]
    pub index_disk_size: u64,
    #[prost(uint32, tag = "11")]
    pub num_segments: u32,
    #[prost(enumeration = "RowsetTypePb", tag = "12")]
    pub rowset_type: i32,
    #[prost(enumeration = "RowsetStatePb", tag = "13")]
    pub rowset_state: i32,
    /// 空串表示本地 rowset
    #[prost(string, tag = "14")]
    pub resource_id: String,
    #[prost(int64, tag = "15")]
    pub creation_time: i64,
    #[prost(bool, tag = "16")]
    pub empty: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteConditionPb {
    #[prost(string, tag = "1")]
    pub column_name: String,
    #[prost(enumeration = "PredicateOpPb", tag = "2")]
    pub op: i32,
    #[prost(string, repeated, tag = "3")]
    pub values: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeletePredicatePb {
    #[prost(int64, tag = "1")]
    pub version: i64,
    #[prost(message, repeated, tag = "2")]
    pub conditions: Vec<DeleteConditionPb>,
}

/// 四个 repeated 字段按下标一一对应
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteBitmapPb {
    #[prost(uint64, repeated, tag = "1")]
    pub rowset_ids: Vec<u64>,
    #[prost(uint32, repeated, tag = "2")]
    pub segment_ids: Vec<u32>,
    #[prost(uint64, repeated, tag = "3")]
    pub versions: Vec<u64>,
    #[prost(bytes = "vec", repeated, tag = "4")]
    pub segment_delete_bitmaps: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TabletMetaPb {
    #[prost(uint64, tag = "1")]
    pub table_id: u64,
    #[prost(uint64, tag = "2")]
    pub partition_id: u64,
    #[prost(uint64, tag = "3")]
    pub tablet_id: u64,
    #[prost(uint64, tag = "4")]
    pub replica_id: u64,
    #[prost(uint32, tag = "5")]
    pub schema_hash: u32,
    #[prost(int32, tag = "6")]
    pub shard_id: i32,
    #[prost(int64, tag = "7")]
    pub creation_time: i64,
    #[prost(int64, tag = "8")]
    pub cumulative_layer_point: i64,
    #[prost(message, optional, tag = "9")]
    pub tablet_uid: Option<TabletUidPb>,
    #[prost(enumeration = "TabletStatePb", tag = "10")]
    pub tablet_state: i32,
    #[prost(message, optional, tag = "11")]
    pub schema: Option<TabletSchemaPb>,
    #[prost(message, repeated, tag = "12")]
    pub rs_metas: Vec<RowsetMetaPb>,
    #[prost(message, repeated, tag = "13")]
    pub stale_rs_metas: Vec<RowsetMetaPb>,
    #[prost(message, repeated, tag = "14")]
    pub delete_predicates: Vec<DeletePredicatePb>,
    #[prost(bool, tag = "15")]
    pub in_restore_mode: bool,
    #[prost(enumeration = "RowsetTypePb", tag = "16")]
    pub preferred_rowset_type: i32,
    #[prost(enumeration = "StorageMediumPb", tag = "17")]
    pub storage_medium: i32,
    #[prost(string, tag = "18")]
    pub remote_storage_name: String,
    #[prost(string, tag = "19")]
    pub cooldown_resource: String,
    #[prost(message, optional, tag = "20")]
    pub delete_bitmap: Option<DeleteBitmapPb>,
}

// ── 枚举转换 ──────────────────────────────────────────────────────────────────

/// 把 pb 中的 i32 枚举值解析为 pb 枚举，未知值视为损坏
pub(crate) fn enum_from_i32<E: TryFrom<i32>>(v: i32, what: &str) -> Result<E> {
    E::try_from(v).map_err(|_| OlapError::Corruption(format!("unknown {what} value {v}")))
}

impl From<FieldType> for FieldTypePb {
    fn from(ft: FieldType) -> Self {
        match ft {
            FieldType::Int8    => Self::Int8,
            FieldType::Int16   => Self::Int16,
            FieldType::Int32   => Self::Int32,
            FieldType::Int64   => Self::Int64,
            FieldType::Float32 => Self::Float32,
            FieldType::Float64 => Self::Float64,
            FieldType::Bytes   => Self::Bytes,
            FieldType::Date    => Self::Date,
        }
    }
}

impl From<FieldTypePb> for FieldType {
    fn from(pb: FieldTypePb) -> Self {
        match pb {
            FieldTypePb::Int8    => Self::Int8,
            FieldTypePb::Int16   => Self::Int16,
            FieldTypePb::Int32   => Self::Int32,
            FieldTypePb::Int64   => Self::Int64,
            FieldTypePb::Float32 => Self::Float32,
            FieldTypePb::Float64 => Self::Float64,
            FieldTypePb::Bytes   => Self::Bytes,
            FieldTypePb::Date    => Self::Date,
        }
    }
}

impl From<EncodingType> for EncodingTypePb {
    fn from(e: EncodingType) -> Self {
        match e {
            EncodingType::Plain       => Self::Plain,
            EncodingType::RunLength   => Self::RunLength,
            EncodingType::DeltaBinary => Self::DeltaBinary,
            EncodingType::Dictionary  => Self::Dictionary,
        }
    }
}

impl From<EncodingTypePb> for EncodingType {
    fn from(pb: EncodingTypePb) -> Self {
        match pb {
            EncodingTypePb::Plain       => Self::Plain,
            EncodingTypePb::RunLength   => Self::RunLength,
            EncodingTypePb::DeltaBinary => Self::DeltaBinary,
            EncodingTypePb::Dictionary  => Self::Dictionary,
        }
    }
}

impl From<CompressionType> for CompressionTypePb {
    fn from(c: CompressionType) -> Self {
        match c {
            CompressionType::None => Self::NoCompression,
            CompressionType::Lz4  => Self::Lz4,
        }
    }
}

impl From<CompressionTypePb> for CompressionType {
    fn from(pb: CompressionTypePb) -> Self {
        match pb {
            CompressionTypePb::NoCompression => Self::None,
            CompressionTypePb::Lz4           => Self::Lz4,
        }
    }
}

impl From<ColumnType> for ColumnTypePb {
    fn from(ct: ColumnType) -> Self {
        match ct {
            ColumnType::Int8    => Self::Int8,
            ColumnType::Int16   => Self::Int16,
            ColumnType::Int32   => Self::Int32,
            ColumnType::Int64   => Self::Int64,
            ColumnType::Float32 => Self::Float32,
            ColumnType::Float64 => Self::Float64,
            ColumnType::Varchar => Self::Varchar,
            ColumnType::Date    => Self::Date,
        }
    }
}

impl From<ColumnTypePb> for ColumnType {
    fn from(pb: ColumnTypePb) -> Self {
        match pb {
            ColumnTypePb::Int8    => Self::Int8,
            ColumnTypePb::Int16   => Self::Int16,
            ColumnTypePb::Int32   => Self::Int32,
            ColumnTypePb::Int64   => Self::Int64,
            ColumnTypePb::Float32 => Self::Float32,
            ColumnTypePb::Float64 => Self::Float64,
            ColumnTypePb::Varchar => Self::Varchar,
            ColumnTypePb::Date    => Self::Date,
        }
    }
}

impl From<KeysType> for KeysTypePb {
    fn from(k: KeysType) -> Self {
        match k {
            KeysType::Duplicate => Self::DupKeys,
            KeysType::Unique    => Self::UniqueKeys,
            KeysType::Aggregate => Self::AggKeys,
        }
    }
}

impl From<KeysTypePb> for KeysType {
    fn from(pb: KeysTypePb) -> Self {
        match pb {
            KeysTypePb::DupKeys    => Self::Duplicate,
            KeysTypePb::UniqueKeys => Self::Unique,
            KeysTypePb::AggKeys    => Self::Aggregate,
        }
    }
}

impl From<AggregateType> for AggregateTypePb {
    fn from(a: AggregateType) -> Self {
        match a {
            AggregateType::None    => Self::None,
            AggregateType::Sum     => Self::Sum,
            AggregateType::Max     => Self::Max,
            AggregateType::Min     => Self::Min,
            AggregateType::Replace => Self::Replace,
        }
    }
}

impl From<AggregateTypePb> for AggregateType {
    fn from(pb: AggregateTypePb) -> Self {
        match pb {
            AggregateTypePb::None    => Self::None,
            AggregateTypePb::Sum     => Self::Sum,
            AggregateTypePb::Max     => Self::Max,
            AggregateTypePb::Min     => Self::Min,
            AggregateTypePb::Replace => Self::Replace,
        }
    }
}

impl From<TabletState> for TabletStatePb {
    fn from(s: TabletState) -> Self {
        match s {
            TabletState::NotReady   => Self::PbNotready,
            TabletState::Running    => Self::PbRunning,
            TabletState::Tombstoned => Self::PbTombstoned,
            TabletState::Stopped    => Self::PbStopped,
            TabletState::Shutdown   => Self::PbShutdown,
        }
    }
}

impl From<TabletStatePb> for TabletState {
    fn from(pb: TabletStatePb) -> Self {
        match pb {
            TabletStatePb::PbNotready   => Self::NotReady,
            TabletStatePb::PbRunning    => Self::Running,
            TabletStatePb::PbTombstoned => Self::Tombstoned,
            TabletStatePb::PbStopped    => Self::Stopped,
            TabletStatePb::PbShutdown   => Self::Shutdown,
        }
    }
}

impl From<RowsetType> for RowsetTypePb {
    fn from(t: RowsetType) -> Self {
        match t {
            RowsetType::Alpha => Self::AlphaRowset,
            RowsetType::Beta  => Self::BetaRowset,
        }
    }
}

impl From<RowsetTypePb> for RowsetType {
    fn from(pb: RowsetTypePb) -> Self {
        match pb {
            RowsetTypePb::AlphaRowset => Self::Alpha,
            RowsetTypePb::BetaRowset  => Self::Beta,
        }
    }
}

impl From<StorageMedium> for StorageMediumPb {
    fn from(m: StorageMedium) -> Self {
        match m {
            StorageMedium::Hdd => Self::Hdd,
            StorageMedium::Ssd => Self::Ssd,
        }
    }
}

impl From<StorageMediumPb> for StorageMedium {
    fn from(pb: StorageMediumPb) -> Self {
        match pb {
            StorageMediumPb::Hdd => Self::Hdd,
            StorageMediumPb::Ssd => Self::Ssd,
        }
    }
}
