//! # olap-tablet-core
//!
//! OLAP 存储引擎的 tablet 存储核心：
//! - **Segment V2**：带校验 footer 的列存文件，zone map / short key / bloom / bitmap 索引
//! - **DeleteBitmap**：按 (rowset, segment, version) 记录被删除的行
//! - **TabletMeta**：rowset 列表、delete 谓词、状态机，原子落盘
//! - **Tablet / Compaction / Reader / StorageEngine**：运行时层
//!
//! ## 整体架构
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       StorageEngine                           │
//! │   TabletManager (64-shard map)      RowsetIdGenerator         │
//! │           │                                                   │
//! │        Tablet ──── publish_rowset / modify_rowsets            │
//! │     ┌─────┼──────────────┬───────────────┐                    │
//! │  TabletMeta         VersionGraph     DeleteBitmap             │
//! │  (rowsets, stale,   (active+stale    (rowset,seg,ver)         │
//! │   delete preds)      edges)           → RoaringBitmap         │
//! │     │                                                         │
//! │   Rowset ──── RowsetWriter / Compaction / TabletReader        │
//! │     │                                                         │
//! │   Segment                                                     │
//! │   ┌────────────────────────────────────────────────────┐      │
//! │   │  ColumnWriter / ColumnReader × N                   │      │
//! │   │   ├─ encoding  (Plain/RLE/Delta/Dict)              │      │
//! │   │   ├─ compression (LZ4/None)                        │      │
//! │   │   ├─ OrdinalIndex  (行号→页偏移)                    │      │
//! │   │   ├─ ZoneMap       (min/max 剪枝)                  │      │
//! │   │   ├─ BloomFilter   (等值加速)                      │      │
//! │   │   └─ BitmapIndex   (值→行号 bitmap)                │      │
//! │   │  ShortKeyIndex (段级稀疏前缀索引)                   │      │
//! │   │  Footer + [len][crc32c][magic]                     │      │
//! │   └────────────────────────────────────────────────────┘      │
//! └──────────────────────────────────────────────────────────────┘
//! ```

// ── 基础设施 ──────────────────────────────────────────────────────────────────
pub mod common;
pub mod config;
pub mod io;
pub mod mem_tracker;
pub mod pb;

// ── Segment 层 ────────────────────────────────────────────────────────────────
pub mod field_type;
pub mod encoding;
pub mod compression;
pub mod page;
pub mod index;
pub mod predicate;
pub mod schema;
pub mod column_writer;
pub mod column_reader;
pub mod segment;
pub mod segment_iterator;

// ── Tablet 层 ─────────────────────────────────────────────────────────────────
pub mod rowset;
pub mod delete_bitmap;
pub mod tablet_meta;
pub mod tablet;
pub mod compaction;
pub mod reader;
pub mod storage;

pub use common::{OlapError, Result, TabletState, Version};
pub use config::StorageConfig;
pub use delete_bitmap::DeleteBitmap;
pub use segment::Segment;
pub use storage::{CreateTabletRequest, StorageEngine};
pub use tablet::Tablet;
pub use tablet_meta::TabletMeta;
