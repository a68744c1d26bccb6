//! 索引结构（对应 OLAP Segment V2 index/）
//!
//! 五种索引：
//! - **OrdinalIndex** ：稀疏行号→页偏移，O(log n) 按 row_id 定位页
//! - **ZoneMap**      ：每页及整个 segment 的 min/max，跳过无关页 / segment
//! - **ShortKeyIndex**：每 N 行记录一次 key，key 范围扫描时缩小行区间
//! - **BloomFilter**  ：双哈希位数组，等值查询快速过滤
//! - **BitmapIndex**  ：值 → 行号 bitmap，低基数列等值查询

pub mod bitmap;
pub mod bloom_filter;
pub mod ordinal;
pub mod short_key;
pub mod zone_map;

pub use bitmap::{BitmapIndexBuilder, BitmapIndexIterator, BitmapIndexReader};
pub use bloom_filter::BloomFilter;
pub use ordinal::OrdinalIndex;
pub use short_key::{encode_key, EncodedKey, ShortKeyIndex, ShortKeyIndexBuilder};
pub use zone_map::ZoneMap;
