//! Segment V2 文件读写
//!
//! 文件格式：
//! ```text
//! ┌────────────────────────────────────┐
//! │  DATA REGION                       │
//! │    [Data Pages col 0]              │ ← 编码 + 压缩
//! │    [Data Pages col 1]              │
//! │    ...                             │
//! ├────────────────────────────────────┤
//! │  INDEX REGION                      │
//! │    [OrdinalIndex   col N]          │
//! │    [PageZoneMaps   col N]          │
//! │    [BloomFilter    col N]  可选     │
//! │    [BitmapIndex    col N]  可选     │
//! │    [ShortKeyIndex]                 │
//! ├────────────────────────────────────┤
//! │  FOOTER  SegmentFooterPb           │
//! ├────────────────────────────────────┤
//! │  TRAILER (12 bytes)                │
//! │    footer length (u32 LE)          │
//! │    footer CRC32C (u32 LE)          │
//! │    MAGIC         (4 bytes)         │
//! └────────────────────────────────────┘
//! ```
//!
//! 打开 segment 只需两次读：trailer，然后 footer。

use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt};
use once_cell::sync::OnceCell;
use prost::Message;
use tracing::{debug, warn};

use crate::column_reader::{ColumnIterator, ColumnReader, DefaultValueColumnIterator};
use crate::column_writer::{ColumnWriter, ColumnWriterOptions};
use crate::common::{ColumnUniqueId, OlapError, Result, SegmentId};
use crate::config::StorageConfig;
use crate::field_type::{CompressionType, Value};
use crate::index::{BitmapIndexIterator, EncodedKey, ShortKeyIndex, ShortKeyIndexBuilder};
use crate::io::{FileReader, FileSystem};
use crate::mem_tracker::MemTrackerPtr;
use crate::page::{build_index_page, read_index_page, PagePointer, PageSink};
use crate::pb::{SegmentFooterPb, ShortKeyIndexPb};
use crate::schema::{TabletColumn, TabletSchema};
use crate::segment_iterator::{
    bind_predicates, segment_zone_map, EmptySegmentIterator, ReadOptions, ReaderStats,
    RowIterator, SegmentIterator,
};

pub const SEGMENT_MAGIC:          &[u8; 4] = b"OSG2";
pub const SEGMENT_FORMAT_VERSION: u32      = 1;
pub const TRAILER_SIZE:           usize    = 12;

// ── SegmentWriter ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct SegmentWriterOptions {
    pub page_max_rows:             usize,
    pub short_key_interval:        u32,
    pub bloom_filter_bits_per_key: usize,
    /// None 时使用 schema 上的压缩方式
    pub compression:               Option<CompressionType>,
}

impl Default for SegmentWriterOptions {
    fn default() -> Self {
        Self { page_max_rows: 1024, short_key_interval: 1024, bloom_filter_bits_per_key: 10, compression: None }
    }
}

impl From<&StorageConfig> for SegmentWriterOptions {
    fn from(cfg: &StorageConfig) -> Self {
        Self {
            page_max_rows:             cfg.page_max_rows,
            short_key_interval:        cfg.short_key_interval,
            bloom_filter_bits_per_key: cfg.bloom_filter_bits_per_key,
            compression:               Some(cfg.compression),
        }
    }
}

/// finalize 之后的文件统计
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentFileInfo {
    pub num_rows:   u32,
    pub data_size:  u64,
    pub index_size: u64,
    pub file_size:  u64,
}

pub struct SegmentWriter {
    col_writers:       Vec<ColumnWriter>,
    sk_builder:        ShortKeyIndexBuilder,
    num_rows:          u32,
    num_key_columns:   usize,
    num_short_keys:    u32,
    last_key:          Option<EncodedKey>,
}

impl SegmentWriter {
    pub fn new(schema: &TabletSchema, opts: SegmentWriterOptions) -> Self {
        let compression = opts.compression.unwrap_or(schema.compression);
        let col_opts = ColumnWriterOptions {
            page_max_rows:             opts.page_max_rows,
            bloom_filter_bits_per_key: opts.bloom_filter_bits_per_key,
        };
        let col_writers = schema.columns.iter()
            .map(|c| ColumnWriter::new(c.column_meta(compression), col_opts))
            .collect();
        Self {
            col_writers,
            sk_builder:      ShortKeyIndexBuilder::new(opts.short_key_interval),
            num_rows:        0,
            num_key_columns: schema.num_key_columns(),
            num_short_keys:  schema.num_short_key_columns,
            last_key:        None,
        }
    }

    /// 追加一行，`row` 的长度必须等于列数，且按 key 升序追加
    pub fn append_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.col_writers.len() {
            return Err(OlapError::SchemaMismatch(format!(
                "row has {} values, schema has {} columns", row.len(), self.col_writers.len()
            )));
        }
        let key = crate::index::encode_key(&row[..self.num_key_columns]);
        if self.last_key.as_ref().map_or(false, |last| key < *last) {
            return Err(OlapError::InvalidArgument(format!(
                "row {} is out of key order", self.num_rows
            )));
        }

        self.sk_builder.maybe_add(self.num_rows, &row[..self.num_short_keys as usize]);
        for (col, v) in self.col_writers.iter_mut().zip(row) {
            col.add_value(v)?;
        }
        self.last_key = Some(key);
        self.num_rows += 1;
        Ok(())
    }

    pub fn num_rows(&self) -> u32 { self.num_rows }

    /// 完成写入，将整个 Segment 序列化到字节流
    pub fn finalize<W: Write>(mut self, writer: W) -> Result<SegmentFileInfo> {
        let mut sink = PageSink::new(writer);

        // ── DATA REGION ───────────────────────────────────────────────────────
        for cw in &mut self.col_writers {
            cw.write_data(&mut sink)?;
        }
        let data_size = sink.offset();

        // ── INDEX REGION ──────────────────────────────────────────────────────
        let mut columns = Vec::with_capacity(self.col_writers.len());
        for (i, cw) in self.col_writers.into_iter().enumerate() {
            columns.push(cw.write_index(i as u32, &mut sink)?);
        }
        let sk_page = sink.append(&build_index_page(&self.sk_builder.finish(self.num_rows)))?;
        let index_size = sink.offset() - data_size;

        // ── FOOTER + TRAILER ──────────────────────────────────────────────────
        let footer = SegmentFooterPb {
            version:               SEGMENT_FORMAT_VERSION,
            columns,
            num_rows:              self.num_rows,
            short_key_index_page:  Some(sk_page.into()),
            num_short_key_columns: self.num_short_keys,
            index_footprint:       index_size,
            data_footprint:        data_size,
        };
        let footer_bytes = footer.encode_to_vec();
        let footer_len   = u32::try_from(footer_bytes.len())
            .map_err(|_| OlapError::InternalError("segment footer exceeds 4GB".into()))?;

        let mut trailer = Vec::with_capacity(TRAILER_SIZE);
        trailer.extend_from_slice(&footer_len.to_le_bytes());
        trailer.extend_from_slice(&crc32c::crc32c(&footer_bytes).to_le_bytes());
        trailer.extend_from_slice(SEGMENT_MAGIC);

        sink.append(&footer_bytes)?;
        sink.append(&trailer)?;
        let file_size = sink.offset();
        sink.into_inner().flush()?;

        Ok(SegmentFileInfo { num_rows: self.num_rows, data_size, index_size, file_size })
    }
}

// ── Footer 解析 ───────────────────────────────────────────────────────────────

/// 读 trailer、校验 magic 与 CRC32C，再解码 footer
pub fn parse_footer(file: &dyn FileReader) -> Result<(SegmentFooterPb, u32)> {
    let size = file.size();
    if size < TRAILER_SIZE as u64 {
        return Err(OlapError::Corruption(format!(
            "{}: file size {size} is smaller than the {TRAILER_SIZE} byte trailer", file.path()
        )));
    }
    let trailer = file.read_at(size - TRAILER_SIZE as u64, TRAILER_SIZE)?;
    if &trailer[8..12] != SEGMENT_MAGIC {
        return Err(OlapError::Corruption(format!("{}: bad segment magic {:?}", file.path(), &trailer[8..12])));
    }
    let mut cur = Cursor::new(&trailer[..8]);
    let footer_len = cur.read_u32::<LittleEndian>()
        .map_err(|e| OlapError::Corruption(format!("trailer: {e}")))?;
    let stored_crc = cur.read_u32::<LittleEndian>()
        .map_err(|e| OlapError::Corruption(format!("trailer: {e}")))?;
    if footer_len as u64 + TRAILER_SIZE as u64 > size {
        return Err(OlapError::Corruption(format!(
            "{}: footer length {footer_len} exceeds file size {size}", file.path()
        )));
    }

    let footer_bytes = file.read_at(size - TRAILER_SIZE as u64 - footer_len as u64, footer_len as usize)?;
    let actual_crc = crc32c::crc32c(&footer_bytes);
    if actual_crc != stored_crc {
        return Err(OlapError::Corruption(format!(
            "{}: footer checksum mismatch stored={stored_crc:#010x} actual={actual_crc:#010x}", file.path()
        )));
    }
    let footer = SegmentFooterPb::decode(footer_bytes.as_slice())
        .map_err(|e| OlapError::Corruption(format!("{}: malformed footer: {e}", file.path())))?;
    if footer.version != SEGMENT_FORMAT_VERSION {
        return Err(OlapError::Corruption(format!(
            "{}: unsupported segment version {}", file.path(), footer.version
        )));
    }
    Ok((footer, footer_len))
}

// ── Segment ───────────────────────────────────────────────────────────────────

/// 一个已打开的 segment 文件
///
/// footer 在 `open` 时解析；short key 索引和各列索引在第一次使用时加载，且只加载一次。
pub struct Segment {
    segment_id:            SegmentId,
    path:                  String,
    file:                  Arc<dyn FileReader>,
    num_rows:              u32,
    schema:                Arc<TabletSchema>,
    column_readers:        HashMap<ColumnUniqueId, Arc<ColumnReader>>,
    short_key_page:        Option<PagePointer>,
    num_short_key_columns: u32,
    short_key_index:       OnceCell<ShortKeyIndex>,
    mem_tracker:           MemTrackerPtr,
    tracked_bytes:         AtomicI64,
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("segment_id", &self.segment_id)
            .field("path", &self.path)
            .field("num_rows", &self.num_rows)
            .finish()
    }
}

impl Segment {
    pub fn open(
        fs:          &dyn FileSystem,
        path:        &str,
        segment_id:  SegmentId,
        schema:      Arc<TabletSchema>,
        mem_tracker: MemTrackerPtr,
    ) -> Result<Arc<Self>> {
        let file = fs.open_file(path)?;
        let (footer, footer_len) = parse_footer(file.as_ref()).map_err(|e| {
            warn!(path, error = %e, "segment footer rejected");
            e
        })?;

        // 只为当前 schema 中仍存在的列建立 reader，已删除的列直接忽略
        let mut column_readers = HashMap::new();
        for meta in &footer.columns {
            let Some(col) = schema.column_by_unique_id(meta.unique_id) else { continue };
            let reader = ColumnReader::from_pb(meta, footer.num_rows, file.clone(), mem_tracker.clone())?;
            if reader.field_type() != col.field_type() {
                return Err(OlapError::SchemaMismatch(format!(
                    "{path}: column {} stored as {:?}, schema says {:?}",
                    col.name, reader.field_type(), col.field_type()
                )));
            }
            column_readers.insert(meta.unique_id, Arc::new(reader));
        }

        mem_tracker.consume(footer_len as i64);
        debug!(path, segment_id, num_rows = footer.num_rows, columns = footer.columns.len(), "segment opened");

        Ok(Arc::new(Self {
            segment_id,
            path: path.into(),
            file,
            num_rows: footer.num_rows,
            schema,
            column_readers,
            short_key_page: footer.short_key_index_page.as_ref().map(PagePointer::from),
            num_short_key_columns: footer.num_short_key_columns,
            short_key_index: OnceCell::new(),
            mem_tracker,
            tracked_bytes: AtomicI64::new(footer_len as i64),
        }))
    }

    pub fn id(&self)       -> SegmentId          { self.segment_id }
    pub fn path(&self)     -> &str               { &self.path }
    pub fn num_rows(&self) -> u32                { self.num_rows }
    pub fn schema(&self)   -> &Arc<TabletSchema> { &self.schema }
    pub fn file_size(&self) -> u64               { self.file.size() }
    pub fn num_short_key_columns(&self) -> u32   { self.num_short_key_columns }

    pub fn column_reader(&self, uid: ColumnUniqueId) -> Option<&Arc<ColumnReader>> {
        self.column_readers.get(&uid)
    }

    /// 加载 short key 索引；并发的首次调用只读一次文件
    pub fn load_index(&self) -> Result<&ShortKeyIndex> {
        self.short_key_index.get_or_try_init(|| {
            let ptr = self.short_key_page.ok_or_else(|| {
                OlapError::Corruption(format!("{}: footer has no short key index", self.path))
            })?;
            let pb: ShortKeyIndexPb = read_index_page(self.file.as_ref(), ptr)?;
            let index = ShortKeyIndex::from_pb(pb)?;
            self.tracked_bytes.fetch_add(ptr.size as i64, Ordering::Relaxed);
            self.mem_tracker.consume(ptr.size as i64);
            debug!(path = %self.path, entries = index.num_entries(), "short key index loaded");
            Ok(index)
        })
    }

    /// footer 中不存在的列在本 segment 上的取值
    pub fn default_value(col: &TabletColumn) -> Result<Value> {
        match col.parsed_default()? {
            Some(v) => Ok(v),
            None if col.is_nullable => Ok(Value::Null),
            None => Err(OlapError::InternalError(format!(
                "column {} (unique id {}) is missing from segment and has no default", col.name, col.unique_id
            ))),
        }
    }

    /// 列存在时读 data page，否则返回常量迭代器（后加的列）
    pub fn new_column_iterator(&self, col: &TabletColumn) -> Result<Box<dyn ColumnIterator>> {
        match self.column_readers.get(&col.unique_id) {
            Some(reader) => Ok(Box::new(reader.new_iterator())),
            None => Ok(Box::new(DefaultValueColumnIterator::new(Self::default_value(col)?, self.num_rows))),
        }
    }

    /// 列不存在或没有 bitmap 索引时返回 None
    pub fn new_bitmap_index_iterator(&self, uid: ColumnUniqueId) -> Result<Option<BitmapIndexIterator>> {
        match self.column_readers.get(&uid) {
            Some(reader) => reader.new_bitmap_index_iterator(),
            None => Ok(None),
        }
    }

    /// segment 级 zone map 与 bloom filter 证明没有行满足谓词时，返回空迭代器
    pub fn new_iterator(self: &Arc<Self>, schema: &TabletSchema, mut opts: ReadOptions) -> Result<Box<dyn RowIterator>> {
        ReaderStats::add(&opts.stats.total_segment_number, 1);
        opts.predicates = bind_predicates(schema, &opts.predicates)?;

        for pred in &opts.predicates {
            let zone_map = segment_zone_map(self, schema, pred.column_id)?;
            let mut pruned = !pred.match_zone_map(&zone_map);
            if !pruned {
                if let Some(bf) = self.column_reader(pred.column_id).map(|r| r.bloom_filter()).transpose()?.flatten() {
                    pruned = !pred.match_bloom_filter(bf);
                }
            }
            if pruned {
                ReaderStats::add(&opts.stats.filtered_segment_number, 1);
                debug!(path = %self.path, column = pred.column_id, "segment pruned by index");
                return Ok(Box::new(EmptySegmentIterator));
            }
        }
        Ok(Box::new(SegmentIterator::new(self.clone(), schema, opts)?))
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        self.mem_tracker.release(self.tracked_bytes.load(Ordering::Relaxed));
    }
}

/// 测试与工具用：把行写成一个完整的 segment 文件
pub fn write_segment(
    fs:     &dyn FileSystem,
    path:   &str,
    schema: &TabletSchema,
    opts:   SegmentWriterOptions,
    rows:   impl IntoIterator<Item = Vec<Value>>,
) -> Result<SegmentFileInfo> {
    let mut writer = SegmentWriter::new(schema, opts);
    for row in rows {
        writer.append_row(row)?;
    }
    let mut file = fs.create_file(path)?;
    let info = writer.finalize(&mut *file)?;
    file.finalize()?;
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{AggregateType, ColumnType, KeysType};
    use crate::io::MemoryFileSystem;
    use crate::mem_tracker::{CountingMemTracker, MemTracker};
    use crate::predicate::{ColumnPredicate, PredicateOp};
    use crate::segment_iterator::KeyRange;
    use test_log::test;

    fn schema() -> TabletSchema {
        TabletSchema::new(KeysType::Duplicate, vec![
            TabletColumn::key(1, "a", ColumnType::Int32),
            TabletColumn::value(2, "b", ColumnType::Varchar, AggregateType::None).with_bitmap_index(),
        ])
    }

    fn rows(n: i32) -> impl Iterator<Item = Vec<Value>> {
        (0..n).map(|i| vec![Value::Int32(i), Value::Bytes(format!("v{}", i % 3).into_bytes())])
    }

    fn small_pages() -> SegmentWriterOptions {
        SegmentWriterOptions { page_max_rows: 16, short_key_interval: 8, ..Default::default() }
    }

    fn open(fs: &MemoryFileSystem, path: &str, schema: TabletSchema) -> Result<Arc<Segment>> {
        Segment::open(fs, path, 0, Arc::new(schema), crate::mem_tracker::noop())
    }

    fn collect(mut it: Box<dyn RowIterator>) -> Vec<Vec<Value>> {
        let mut out = Vec::new();
        while let Some(block) = it.next_block().unwrap() {
            out.extend(block.rows());
        }
        out
    }

    #[test]
    fn write_then_scan_everything() {
        let fs = MemoryFileSystem::new();
        let info = write_segment(&fs, "s/0.seg", &schema(), small_pages(), rows(100)).unwrap();
        assert_eq!(info.num_rows, 100);
        assert_eq!(info.file_size, fs.get("s/0.seg").unwrap().len() as u64);

        let seg = open(&fs, "s/0.seg", schema()).unwrap();
        assert_eq!(seg.num_rows(), 100);
        let out = collect(seg.new_iterator(&schema(), ReadOptions { batch_size: 7, ..Default::default() }).unwrap());
        assert_eq!(out.len(), 100);
        assert_eq!(out[42], vec![Value::Int32(42), Value::Bytes(b"v0".to_vec())]);
    }

    #[test]
    fn open_reads_trailer_then_footer() {
        let fs = MemoryFileSystem::new();
        write_segment(&fs, "s/0.seg", &schema(), small_pages(), rows(10)).unwrap();
        let before = fs.read_count();
        open(&fs, "s/0.seg", schema()).unwrap();
        assert_eq!(fs.read_count() - before, 2);
    }

    #[test]
    fn flipped_footer_byte_is_corruption() {
        let fs = MemoryFileSystem::new();
        write_segment(&fs, "s/0.seg", &schema(), small_pages(), rows(10)).unwrap();
        let good = fs.get("s/0.seg").unwrap();
        let footer_len = u32::from_le_bytes([good[good.len() - 12], good[good.len() - 11], good[good.len() - 10], good[good.len() - 9]]) as usize;
        let footer_start = good.len() - TRAILER_SIZE - footer_len;
        for pos in [footer_start, footer_start + footer_len / 2, good.len() - TRAILER_SIZE - 1, good.len() - 1] {
            let mut bad = good.clone();
            bad[pos] ^= 0x40;
            fs.put("s/bad.seg", bad);
            assert!(open(&fs, "s/bad.seg", schema()).unwrap_err().is_corruption(), "byte {pos}");
        }
    }

    #[test]
    fn truncated_file_is_corruption() {
        let fs = MemoryFileSystem::new();
        write_segment(&fs, "s/0.seg", &schema(), small_pages(), rows(10)).unwrap();
        let data = fs.get("s/0.seg").unwrap();
        fs.put("s/short.seg", data[..8].to_vec());
        assert!(open(&fs, "s/short.seg", schema()).unwrap_err().is_corruption());
        fs.put("s/empty.seg", vec![]);
        assert!(open(&fs, "s/empty.seg", schema()).unwrap_err().is_corruption());
        fs.put("s/tail.seg", data[data.len() - 40..].to_vec());
        assert!(open(&fs, "s/tail.seg", schema()).unwrap_err().is_corruption());
    }

    #[test]
    fn zone_map_prunes_whole_segment() {
        let fs = MemoryFileSystem::new();
        write_segment(&fs, "s/0.seg", &schema(), small_pages(), rows(50)).unwrap();
        let seg = open(&fs, "s/0.seg", schema()).unwrap();
        let opts = ReadOptions {
            predicates: vec![ColumnPredicate::new(1, PredicateOp::Gt(Value::Int64(1000)))],
            ..Default::default()
        };
        let stats = opts.stats.clone();
        assert!(collect(seg.new_iterator(&schema(), opts).unwrap()).is_empty());
        assert_eq!(ReaderStats::get(&stats.filtered_segment_number), 1);
        assert_eq!(ReaderStats::get(&stats.total_segment_number), 1);
    }

    #[test]
    fn page_zone_maps_skip_pages() {
        let fs = MemoryFileSystem::new();
        write_segment(&fs, "s/0.seg", &schema(), small_pages(), rows(100)).unwrap();
        let seg = open(&fs, "s/0.seg", schema()).unwrap();
        let opts = ReadOptions {
            predicates: vec![ColumnPredicate::new(1, PredicateOp::Lt(Value::Int32(10)))],
            ..Default::default()
        };
        let stats = opts.stats.clone();
        let out = collect(seg.new_iterator(&schema(), opts).unwrap());
        assert_eq!(out.len(), 10);
        assert_eq!(ReaderStats::get(&stats.rows_zone_map_filtered), 84);
        assert_eq!(ReaderStats::get(&stats.rows_pred_filtered), 6);
    }

    #[test]
    fn predicates_key_range_and_deleted_rows() {
        let fs = MemoryFileSystem::new();
        write_segment(&fs, "s/0.seg", &schema(), small_pages(), rows(100)).unwrap();
        let seg = open(&fs, "s/0.seg", schema()).unwrap();

        let mut deleted = roaring::RoaringBitmap::new();
        deleted.insert(30);
        let opts = ReadOptions {
            predicates:   vec![ColumnPredicate::new(2, PredicateOp::Eq(Value::Bytes(b"v0".to_vec())))],
            key_range:    Some(KeyRange::new(Some(vec![Value::Int32(20)]), Some(vec![Value::Int32(40)]))),
            deleted_rows: Some(deleted),
            ..Default::default()
        };
        let stats = opts.stats.clone();
        let out = collect(seg.new_iterator(&schema(), opts).unwrap());
        let keys: Vec<Value> = out.iter().map(|r| r[0].clone()).collect();
        let expected: Vec<Value> = (20..=40).filter(|i| i % 3 == 0 && *i != 30).map(Value::Int32).collect();
        assert_eq!(keys, expected);
        assert!(ReaderStats::get(&stats.rows_key_range_filtered) > 0);
        assert!(ReaderStats::get(&stats.rows_bitmap_index_filtered) > 0);
        assert_eq!(ReaderStats::get(&stats.rows_del_filtered), 1);
        assert_eq!(ReaderStats::get(&stats.rows_returned), expected.len() as u64);
    }

    #[test]
    fn added_column_reads_default_and_dropped_column_is_ignored() {
        let fs = MemoryFileSystem::new();
        write_segment(&fs, "s/0.seg", &schema(), small_pages(), rows(5)).unwrap();

        let mut evolved = schema();
        evolved.add_column(TabletColumn::value(0, "c", ColumnType::Int64, AggregateType::None)
            .not_null().with_default("0")).unwrap();
        let seg = open(&fs, "s/0.seg", evolved.clone()).unwrap();
        let c = evolved.column_by_name("c").unwrap();
        let mut it = seg.new_column_iterator(c).unwrap();
        let mut out = Vec::new();
        assert_eq!(it.next_batch(10, &mut out).unwrap(), 5);
        assert_eq!(out, vec![Value::Int64(0); 5]);

        let mut no_default = schema();
        no_default.columns.push(TabletColumn::value(9, "d", ColumnType::Int32, AggregateType::None).not_null());
        let seg = open(&fs, "s/0.seg", no_default.clone()).unwrap();
        let err = seg.new_column_iterator(no_default.column_by_name("d").unwrap()).err().unwrap();
        assert!(matches!(err, OlapError::InternalError(_)));

        let mut dropped = schema();
        dropped.drop_column("b").unwrap();
        let seg = open(&fs, "s/0.seg", dropped.clone()).unwrap();
        assert!(seg.column_reader(2).is_none());
        let out = collect(seg.new_iterator(&dropped, ReadOptions::default()).unwrap());
        assert_eq!(out[3], vec![Value::Int32(3)]);
    }

    #[test]
    fn index_loads_once_under_concurrency() {
        let fs = MemoryFileSystem::new();
        write_segment(&fs, "s/0.seg", &schema(), small_pages(), rows(100)).unwrap();
        let tracker = Arc::new(CountingMemTracker::new());
        let seg = Segment::open(&fs, "s/0.seg", 0, Arc::new(schema()), tracker.clone()).unwrap();
        let after_open = fs.read_count();
        let footer_bytes = tracker.consumption();
        assert!(footer_bytes > 0);

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    let idx = seg.load_index().unwrap();
                    assert!(idx.num_entries() > 0);
                    seg.new_bitmap_index_iterator(2).unwrap().unwrap();
                });
            }
        });
        // short key 页 + bitmap 索引页各一次
        assert_eq!(fs.read_count() - after_open, 2);
        assert!(tracker.consumption() > footer_bytes);

        drop(seg);
        assert_eq!(tracker.consumption(), 0);
    }
}
