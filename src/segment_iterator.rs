//! Segment 行迭代器
//!
//! 读取流程：
//!   1. 用 ShortKey 索引把 key 范围缩小到行区间
//!   2. 用页级 zone map 剔除整页
//!   3. 等值谓词与 bitmap 索引求交
//!   4. 减去 delete bitmap
//!   5. 按批读取剩余行，逐行应用 key 范围、谓词、delete 条件
//!
//! 输出的 `RowBlock` 带 segment 内行号。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use roaring::RoaringBitmap;

use crate::column_reader::ColumnIterator;
use crate::common::{ColumnUniqueId, OlapError, Result};
use crate::field_type::Value;
use crate::index::{encode_key, EncodedKey, ZoneMap};
use crate::predicate::ColumnPredicate;
use crate::schema::{TabletColumn, TabletSchema};
use crate::segment::Segment;

// ── 统计 ──────────────────────────────────────────────────────────────────────

/// 一次读请求内所有 segment 共享的计数器
#[derive(Debug, Default)]
pub struct ReaderStats {
    pub total_segment_number:       AtomicU64,
    pub filtered_segment_number:    AtomicU64,
    pub rows_key_range_filtered:    AtomicU64,
    pub rows_zone_map_filtered:     AtomicU64,
    pub rows_bitmap_index_filtered: AtomicU64,
    pub rows_del_filtered:          AtomicU64,
    pub rows_pred_filtered:         AtomicU64,
    pub rows_returned:              AtomicU64,
}

impl ReaderStats {
    pub fn new() -> Arc<Self> { Arc::new(Self::default()) }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        if n > 0 {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn get(counter: &AtomicU64) -> u64 { counter.load(Ordering::Relaxed) }
}

// ── ReadOptions ───────────────────────────────────────────────────────────────

/// key 前缀区间，两端都是闭区间；None 表示不限
#[derive(Debug, Clone, PartialEq, Default)]
pub struct KeyRange {
    pub lower: Option<Vec<Value>>,
    pub upper: Option<Vec<Value>>,
}

impl KeyRange {
    pub fn new(lower: Option<Vec<Value>>, upper: Option<Vec<Value>>) -> Self {
        Self { lower, upper }
    }

    pub fn point(key: Vec<Value>) -> Self {
        Self { lower: Some(key.clone()), upper: Some(key) }
    }
}

#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// 输出列（unique id），空表示 schema 的全部列
    pub return_columns:    Vec<ColumnUniqueId>,
    /// AND 关系
    pub predicates:        Vec<ColumnPredicate>,
    /// 外层 OR、内层 AND：满足任一组的行被删除
    pub delete_conditions: Vec<Vec<ColumnPredicate>>,
    /// 该 segment 在读取版本下已被删除的行
    pub deleted_rows:      Option<RoaringBitmap>,
    pub key_range:         Option<KeyRange>,
    pub batch_size:        usize,
    pub stats:             Arc<ReaderStats>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            return_columns:    Vec::new(),
            predicates:        Vec::new(),
            delete_conditions: Vec::new(),
            deleted_rows:      None,
            key_range:         None,
            batch_size:        1024,
            stats:             ReaderStats::new(),
        }
    }
}

// ── RowBlock / RowIterator ────────────────────────────────────────────────────

/// 列式的一批行
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowBlock {
    /// segment 内行号
    pub row_ids: Vec<u32>,
    /// 与 return_columns 一一对应
    pub columns: Vec<Vec<Value>>,
}

impl RowBlock {
    pub fn num_rows(&self) -> usize { self.row_ids.len() }
    pub fn is_empty(&self) -> bool  { self.row_ids.is_empty() }

    pub fn row(&self, i: usize) -> Vec<Value> {
        self.columns.iter().map(|c| c[i].clone()).collect()
    }

    pub fn rows(&self) -> impl Iterator<Item = Vec<Value>> + '_ {
        (0..self.num_rows()).map(move |i| self.row(i))
    }
}

pub trait RowIterator: Send {
    /// 读完返回 None
    fn next_block(&mut self) -> Result<Option<RowBlock>>;
}

/// 被 zone map 整体过滤掉的 segment
#[derive(Debug, Default)]
pub struct EmptySegmentIterator;

impl RowIterator for EmptySegmentIterator {
    fn next_block(&mut self) -> Result<Option<RowBlock>> { Ok(None) }
}

// ── 谓词绑定 ──────────────────────────────────────────────────────────────────

pub(crate) fn column_of<'a>(schema: &'a TabletSchema, uid: ColumnUniqueId) -> Result<&'a TabletColumn> {
    schema.column_by_unique_id(uid)
        .ok_or_else(|| OlapError::SchemaMismatch(format!("no column with unique id {uid}")))
}

/// 把谓词字面量转换为列类型
pub(crate) fn bind_predicates(schema: &TabletSchema, preds: &[ColumnPredicate]) -> Result<Vec<ColumnPredicate>> {
    preds.iter().map(|p| {
        let col = column_of(schema, p.column_id)?;
        Ok(ColumnPredicate::new(p.column_id, p.op.cast_to(col.field_type())?))
    }).collect()
}

// ── SegmentIterator ───────────────────────────────────────────────────────────

pub struct SegmentIterator {
    segment:           Arc<Segment>,
    return_columns:    Vec<ColumnUniqueId>,
    predicates:        Vec<ColumnPredicate>,
    delete_conditions: Vec<Vec<ColumnPredicate>>,
    deleted_rows:      Option<RoaringBitmap>,
    key_range:         Option<(Option<EncodedKey>, Option<EncodedKey>)>,
    key_columns:       Vec<ColumnUniqueId>,
    iterators:         HashMap<ColumnUniqueId, Box<dyn ColumnIterator>>,
    rows:              Option<roaring::bitmap::IntoIter>,
    batch_size:        usize,
    stats:             Arc<ReaderStats>,
}

impl SegmentIterator {
    /// `opts.predicates` 需已经绑定到 schema
    pub(crate) fn new(segment: Arc<Segment>, schema: &TabletSchema, opts: ReadOptions) -> Result<Self> {
        let return_columns: Vec<ColumnUniqueId> = if opts.return_columns.is_empty() {
            schema.columns.iter().map(|c| c.unique_id).collect()
        } else {
            opts.return_columns.clone()
        };

        // 在整个 segment 上都不可能命中的 delete 条件组直接丢弃
        let mut delete_conditions = Vec::new();
        for conj in &opts.delete_conditions {
            let bound = bind_predicates(schema, conj)?;
            let mut may_match = true;
            for p in &bound {
                may_match &= segment_zone_map(&segment, schema, p.column_id)?.match_predicate(&p.op);
            }
            if may_match && !bound.is_empty() {
                delete_conditions.push(bound);
            }
        }

        let key_columns: Vec<ColumnUniqueId> = schema.key_columns().map(|c| c.unique_id).collect();
        let key_range = opts.key_range.as_ref().map(|r| {
            (r.lower.as_deref().map(encode_key), r.upper.as_deref().map(encode_key))
        });

        let mut needed: Vec<ColumnUniqueId> = return_columns.clone();
        needed.extend(opts.predicates.iter().map(|p| p.column_id));
        needed.extend(delete_conditions.iter().flatten().map(|p| p.column_id));
        if key_range.is_some() {
            needed.extend(key_columns.iter().copied());
        }
        let mut iterators = HashMap::new();
        for uid in needed {
            if !iterators.contains_key(&uid) {
                let col = column_of(schema, uid)?;
                iterators.insert(uid, segment.new_column_iterator(col)?);
            }
        }

        Ok(Self {
            segment,
            return_columns,
            predicates: opts.predicates,
            delete_conditions,
            deleted_rows: opts.deleted_rows,
            key_range,
            key_columns,
            iterators,
            rows: None,
            batch_size: opts.batch_size.max(1),
            stats: opts.stats,
        })
    }

    /// 用索引与 delete bitmap 计算候选行
    fn init_row_bitmap(&mut self) -> Result<RoaringBitmap> {
        let num_rows = self.segment.num_rows();
        let mut rows = RoaringBitmap::new();
        rows.insert_range(0..num_rows);

        if let Some((lower, upper)) = &self.key_range {
            let sk = self.segment.load_index()?;
            let lo = lower.as_ref().map_or(0, |k| sk.lower_bound(k));
            let hi = upper.as_ref().map_or(num_rows, |k| sk.upper_bound(k));
            let removed = rows.remove_range(..lo) + rows.remove_range(hi..);
            ReaderStats::add(&self.stats.rows_key_range_filtered, removed);
        }

        for pred in &self.predicates {
            let Some(reader) = self.segment.column_reader(pred.column_id) else { continue };
            let ordinal = reader.ordinal_index()?;
            let mut removed = 0;
            for (i, zm) in reader.page_zone_maps()?.iter().enumerate() {
                if !pred.match_zone_map(zm) {
                    removed += rows.remove_range(ordinal.page_rows(i));
                }
            }
            ReaderStats::add(&self.stats.rows_zone_map_filtered, removed);
        }

        for pred in &self.predicates {
            let Some(values) = pred.op.point_values() else { continue };
            let Some(mut it) = self.segment.new_bitmap_index_iterator(pred.column_id)? else { continue };
            let mut hits = RoaringBitmap::new();
            for v in values {
                if it.seek_dictionary(v)? {
                    hits |= it.read_bitmap(it.current_ordinal())?;
                }
            }
            let before = rows.len();
            rows &= hits;
            ReaderStats::add(&self.stats.rows_bitmap_index_filtered, before - rows.len());
        }

        if let Some(deleted) = &self.deleted_rows {
            let before = rows.len();
            rows -= deleted;
            ReaderStats::add(&self.stats.rows_del_filtered, before - rows.len());
        }
        Ok(rows)
    }

    fn key_in_range(&self, key: &[Vec<u8>]) -> bool {
        let Some((lower, upper)) = &self.key_range else { return true };
        let prefix = |bound: &[Vec<u8>]| {
            let n = bound.len().min(key.len());
            key[..n].cmp(&bound[..n])
        };
        lower.as_ref().map_or(true, |l| prefix(l.as_slice()).is_ge())
            && upper.as_ref().map_or(true, |u| prefix(u.as_slice()).is_le())
    }
}

impl RowIterator for SegmentIterator {
    fn next_block(&mut self) -> Result<Option<RowBlock>> {
        if self.rows.is_none() {
            let bitmap = self.init_row_bitmap()?;
            self.rows = Some(bitmap.into_iter());
        }

        loop {
            let ids: Vec<u32> = match self.rows.as_mut() {
                Some(rows) => rows.take(self.batch_size).collect(),
                None => Vec::new(),
            };
            if ids.is_empty() {
                return Ok(None);
            }

            let mut values: HashMap<ColumnUniqueId, Vec<Value>> = HashMap::with_capacity(self.iterators.len());
            for (uid, it) in self.iterators.iter_mut() {
                let mut col = Vec::with_capacity(ids.len());
                it.read_by_rowids(&ids, &mut col)?;
                values.insert(*uid, col);
            }
            let column = |uid: &ColumnUniqueId| {
                values.get(uid).ok_or_else(|| OlapError::InternalError(format!("column {uid} was not read")))
            };

            let mut keep = vec![true; ids.len()];

            if self.key_range.is_some() {
                let keys = self.key_columns.iter().map(column).collect::<Result<Vec<_>>>()?;
                let mut filtered = 0;
                for (i, k) in keep.iter_mut().enumerate() {
                    let key: EncodedKey = keys.iter().map(|c| c[i].to_key_bytes()).collect();
                    if !self.key_in_range(&key) {
                        *k = false;
                        filtered += 1;
                    }
                }
                ReaderStats::add(&self.stats.rows_key_range_filtered, filtered);
            }

            let mut filtered = 0;
            for pred in &self.predicates {
                let col = column(&pred.column_id)?;
                for (i, k) in keep.iter_mut().enumerate() {
                    if *k && !pred.evaluate(&col[i]) {
                        *k = false;
                        filtered += 1;
                    }
                }
            }
            ReaderStats::add(&self.stats.rows_pred_filtered, filtered);

            let mut deleted = 0;
            for (i, k) in keep.iter_mut().enumerate() {
                if !*k {
                    continue;
                }
                for conj in &self.delete_conditions {
                    let mut all = true;
                    for p in conj {
                        all &= p.evaluate(&column(&p.column_id)?[i]);
                    }
                    if all {
                        *k = false;
                        deleted += 1;
                        break;
                    }
                }
            }
            ReaderStats::add(&self.stats.rows_del_filtered, deleted);

            let mut block = RowBlock::default();
            block.row_ids = ids.iter().zip(&keep).filter(|(_, k)| **k).map(|(id, _)| *id).collect();
            if block.is_empty() {
                continue;
            }
            for uid in &self.return_columns {
                let col = column(uid)?;
                block.columns.push(col.iter().zip(&keep).filter(|(_, k)| **k).map(|(v, _)| v.clone()).collect());
            }
            ReaderStats::add(&self.stats.rows_returned, block.num_rows() as u64);
            return Ok(Some(block));
        }
    }
}

/// 列在该 segment 上的 zone map；footer 中不存在的列按默认值计算
pub(crate) fn segment_zone_map(segment: &Segment, schema: &TabletSchema, uid: ColumnUniqueId) -> Result<ZoneMap> {
    match segment.column_reader(uid) {
        Some(reader) => Ok(reader.segment_zone_map().clone()),
        None => {
            let col = column_of(schema, uid)?;
            Ok(ZoneMap::for_constant(&Segment::default_value(col)?))
        }
    }
}
