//! 列读取器与列迭代器
//!
//! `ColumnReader` 对应 footer 中的一列。索引页在第一次用到时加载，
//! 每种索引各由一个 `OnceCell` 保证只读一次；并发的首次访问会等待同一次加载完成。

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::debug;

use crate::common::{ColumnUniqueId, OlapError, Result};
use crate::field_type::{CompressionType, EncodingType, FieldType, Value};
use crate::index::{BitmapIndexIterator, BitmapIndexReader, BloomFilter, OrdinalIndex, ZoneMap};
use crate::io::FileReader;
use crate::mem_tracker::MemTrackerPtr;
use crate::page::{read_index_page, PageDecoder, PagePointer};
use crate::pb::{self, BitmapIndexPb, BloomFilterPb, ColumnMetaPb, OrdinalIndexPb, PageZoneMapsPb};

pub struct ColumnReader {
    unique_id:        ColumnUniqueId,
    field_type:       FieldType,
    encoding:         EncodingType,
    compression:      CompressionType,
    is_nullable:      bool,
    num_rows:         u32,
    file:             Arc<dyn FileReader>,
    ordinal_ptr:      PagePointer,
    zone_maps_ptr:    PagePointer,
    bloom_ptr:        Option<PagePointer>,
    bitmap_ptr:       Option<PagePointer>,
    segment_zone_map: ZoneMap,
    ordinal_index:    OnceCell<OrdinalIndex>,
    page_zone_maps:   OnceCell<Vec<ZoneMap>>,
    bloom_filter:     OnceCell<BloomFilter>,
    bitmap_index:     OnceCell<Arc<BitmapIndexReader>>,
    mem_tracker:      MemTrackerPtr,
    index_bytes:      AtomicI64,
}

impl std::fmt::Debug for ColumnReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnReader")
            .field("unique_id", &self.unique_id)
            .field("field_type", &self.field_type)
            .field("num_rows", &self.num_rows)
            .finish()
    }
}

impl ColumnReader {
    pub fn from_pb(
        meta:        &ColumnMetaPb,
        num_rows:    u32,
        file:        Arc<dyn FileReader>,
        mem_tracker: MemTrackerPtr,
    ) -> Result<Self> {
        let field_type: pb::FieldTypePb        = pb::enum_from_i32(meta.field_type, "field type")?;
        let encoding: pb::EncodingTypePb       = pb::enum_from_i32(meta.encoding, "encoding")?;
        let compression: pb::CompressionTypePb = pb::enum_from_i32(meta.compression, "compression")?;
        let field_type = FieldType::from(field_type);

        let missing = |what: &str| {
            OlapError::Corruption(format!("column {} has no {what}", meta.unique_id))
        };
        let ordinal_ptr   = meta.ordinal_index.as_ref().ok_or_else(|| missing("ordinal index"))?;
        let zone_maps_ptr = meta.page_zone_maps.as_ref().ok_or_else(|| missing("page zone maps"))?;
        let segment_zone  = meta.segment_zone_map.as_ref().ok_or_else(|| missing("segment zone map"))?;

        Ok(Self {
            unique_id:        meta.unique_id,
            field_type,
            encoding:         encoding.into(),
            compression:      compression.into(),
            is_nullable:      meta.is_nullable,
            num_rows,
            file,
            ordinal_ptr:      ordinal_ptr.into(),
            zone_maps_ptr:    zone_maps_ptr.into(),
            bloom_ptr:        meta.bloom_filter.as_ref().map(PagePointer::from),
            bitmap_ptr:       meta.bitmap_index.as_ref().map(PagePointer::from),
            segment_zone_map: ZoneMap::from_pb(segment_zone, field_type)?,
            ordinal_index:    OnceCell::new(),
            page_zone_maps:   OnceCell::new(),
            bloom_filter:     OnceCell::new(),
            bitmap_index:     OnceCell::new(),
            mem_tracker,
            index_bytes:      AtomicI64::new(0),
        })
    }

    pub fn unique_id(&self)        -> ColumnUniqueId { self.unique_id }
    pub fn field_type(&self)       -> FieldType      { self.field_type }
    pub fn is_nullable(&self)      -> bool           { self.is_nullable }
    pub fn num_rows(&self)         -> u32            { self.num_rows }
    pub fn has_bloom_filter(&self) -> bool           { self.bloom_ptr.is_some() }
    pub fn has_bitmap_index(&self) -> bool           { self.bitmap_ptr.is_some() }

    pub fn segment_zone_map(&self) -> &ZoneMap { &self.segment_zone_map }

    fn track(&self, ptr: PagePointer) {
        self.index_bytes.fetch_add(ptr.size as i64, Ordering::Relaxed);
        self.mem_tracker.consume(ptr.size as i64);
    }

    pub fn ordinal_index(&self) -> Result<&OrdinalIndex> {
        self.ordinal_index.get_or_try_init(|| {
            let pb: OrdinalIndexPb = read_index_page(self.file.as_ref(), self.ordinal_ptr)?;
            let idx = OrdinalIndex::from_pb(&pb, self.num_rows)?;
            self.track(self.ordinal_ptr);
            Ok(idx)
        })
    }

    pub fn page_zone_maps(&self) -> Result<&[ZoneMap]> {
        let zone_maps = self.page_zone_maps.get_or_try_init(|| {
            let pb: PageZoneMapsPb = read_index_page(self.file.as_ref(), self.zone_maps_ptr)?;
            let zone_maps = pb.zone_maps.iter()
                .map(|z| ZoneMap::from_pb(z, self.field_type))
                .collect::<Result<Vec<_>>>()?;
            self.track(self.zone_maps_ptr);
            Ok::<_, OlapError>(zone_maps)
        })?;
        Ok(zone_maps)
    }

    pub fn bloom_filter(&self) -> Result<Option<&BloomFilter>> {
        let Some(ptr) = self.bloom_ptr else { return Ok(None) };
        let bf = self.bloom_filter.get_or_try_init(|| {
            let pb: BloomFilterPb = read_index_page(self.file.as_ref(), ptr)?;
            let bf = BloomFilter::from_pb(pb)?;
            self.track(ptr);
            Ok::<_, OlapError>(bf)
        })?;
        Ok(Some(bf))
    }

    pub fn bitmap_index(&self) -> Result<Option<Arc<BitmapIndexReader>>> {
        let Some(ptr) = self.bitmap_ptr else { return Ok(None) };
        let reader = self.bitmap_index.get_or_try_init(|| {
            let pb: BitmapIndexPb = read_index_page(self.file.as_ref(), ptr)?;
            let reader = BitmapIndexReader::from_pb(pb, self.field_type)?;
            self.track(ptr);
            debug!(column = self.unique_id, cardinality = reader.cardinality(), "bitmap index loaded");
            Ok::<_, OlapError>(Arc::new(reader))
        })?;
        Ok(Some(reader.clone()))
    }

    pub fn new_bitmap_index_iterator(&self) -> Result<Option<BitmapIndexIterator>> {
        Ok(self.bitmap_index()?.map(BitmapIndexIterator::new))
    }

    /// 读取并解码第 idx 页
    pub fn read_page(&self, idx: usize) -> Result<PageDecoder> {
        let ordinal = self.ordinal_index()?;
        let ptr = ordinal.page(idx).ok_or_else(|| {
            OlapError::InternalError(format!("page {idx} out of range for column {}", self.unique_id))
        })?;
        let page = PageDecoder::decode(&ptr.read(self.file.as_ref())?, self.field_type, self.encoding, self.compression)?;
        let expected = ordinal.page_rows(idx);
        if page.first_row_id != expected.start || page.values.len() != expected.len() {
            return Err(OlapError::Corruption(format!(
                "page {idx} of column {} holds rows {}+{}, ordinal index says {expected:?}",
                self.unique_id, page.first_row_id, page.values.len()
            )));
        }
        Ok(page)
    }

    pub fn new_iterator(self: &Arc<Self>) -> FileColumnIterator {
        FileColumnIterator { reader: self.clone(), current: 0, page: None }
    }
}

impl Drop for ColumnReader {
    fn drop(&mut self) {
        self.mem_tracker.release(self.index_bytes.load(Ordering::Relaxed));
    }
}

// ── ColumnIterator ────────────────────────────────────────────────────────────

pub trait ColumnIterator: Send {
    fn seek_to_ordinal(&mut self, ordinal: u32) -> Result<()>;
    fn current_ordinal(&self) -> u32;
    /// 从当前位置读最多 n 个值追加到 dst，返回实际读到的个数
    fn next_batch(&mut self, n: usize, dst: &mut Vec<Value>) -> Result<usize>;
    /// 按升序行号读取
    fn read_by_rowids(&mut self, rowids: &[u32], dst: &mut Vec<Value>) -> Result<()>;
}

struct CachedPage {
    idx:          usize,
    first_row_id: u32,
    values:       Vec<Value>,
}

/// 从 data page 读取的列迭代器，缓存最近解码的一页
pub struct FileColumnIterator {
    reader:  Arc<ColumnReader>,
    current: u32,
    page:    Option<CachedPage>,
}

impl FileColumnIterator {
    fn value_at(&mut self, row: u32) -> Result<&Value> {
        let hit = self.page.as_ref().map_or(false, |p| {
            row >= p.first_row_id && ((row - p.first_row_id) as usize) < p.values.len()
        });
        if !hit {
            let idx = self.reader.ordinal_index()?.find_page(row).ok_or_else(|| {
                OlapError::InternalError(format!("row {row} >= {} rows", self.reader.num_rows))
            })?;
            let page = self.reader.read_page(idx)?;
            self.page = Some(CachedPage { idx, first_row_id: page.first_row_id, values: page.values });
        }
        match &self.page {
            Some(p) => Ok(&p.values[(row - p.first_row_id) as usize]),
            None => Err(OlapError::InternalError(format!("row {row} not cached"))),
        }
    }

    pub fn cached_page(&self) -> Option<usize> { self.page.as_ref().map(|p| p.idx) }
}

impl ColumnIterator for FileColumnIterator {
    fn seek_to_ordinal(&mut self, ordinal: u32) -> Result<()> {
        if ordinal > self.reader.num_rows {
            return Err(OlapError::InvalidArgument(format!(
                "seek to {ordinal} past {} rows", self.reader.num_rows
            )));
        }
        self.current = ordinal;
        Ok(())
    }

    fn current_ordinal(&self) -> u32 { self.current }

    fn next_batch(&mut self, n: usize, dst: &mut Vec<Value>) -> Result<usize> {
        let end = (self.current as u64 + n as u64).min(self.reader.num_rows as u64) as u32;
        let start = self.current;
        for row in start..end {
            let v = self.value_at(row)?.clone();
            dst.push(v);
        }
        self.current = end;
        Ok((end - start) as usize)
    }

    fn read_by_rowids(&mut self, rowids: &[u32], dst: &mut Vec<Value>) -> Result<()> {
        for &row in rowids {
            let v = self.value_at(row)?.clone();
            dst.push(v);
        }
        if let Some(&last) = rowids.last() {
            self.current = last + 1;
        }
        Ok(())
    }
}

/// footer 中不存在的列：每行返回同一个值（默认值或 Null）
pub struct DefaultValueColumnIterator {
    value:    Value,
    num_rows: u32,
    current:  u32,
}

impl DefaultValueColumnIterator {
    pub fn new(value: Value, num_rows: u32) -> Self {
        Self { value, num_rows, current: 0 }
    }

    pub fn value(&self) -> &Value { &self.value }
}

impl ColumnIterator for DefaultValueColumnIterator {
    fn seek_to_ordinal(&mut self, ordinal: u32) -> Result<()> {
        if ordinal > self.num_rows {
            return Err(OlapError::InvalidArgument(format!("seek to {ordinal} past {} rows", self.num_rows)));
        }
        self.current = ordinal;
        Ok(())
    }

    fn current_ordinal(&self) -> u32 { self.current }

    fn next_batch(&mut self, n: usize, dst: &mut Vec<Value>) -> Result<usize> {
        let take = (n as u64).min((self.num_rows - self.current) as u64) as usize;
        dst.extend(std::iter::repeat(self.value.clone()).take(take));
        self.current += take as u32;
        Ok(take)
    }

    fn read_by_rowids(&mut self, rowids: &[u32], dst: &mut Vec<Value>) -> Result<()> {
        if let Some(&bad) = rowids.iter().find(|&&r| r >= self.num_rows) {
            return Err(OlapError::InvalidArgument(format!("row {bad} >= {} rows", self.num_rows)));
        }
        dst.extend(std::iter::repeat(self.value.clone()).take(rowids.len()));
        if let Some(&last) = rowids.last() {
            self.current = last + 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_iterator_repeats_value() {
        let mut it = DefaultValueColumnIterator::new(Value::Int32(0), 5);
        let mut out = Vec::new();
        assert_eq!(it.next_batch(3, &mut out).unwrap(), 3);
        assert_eq!(it.next_batch(3, &mut out).unwrap(), 2);
        assert_eq!(out, vec![Value::Int32(0); 5]);
        assert_eq!(it.next_batch(3, &mut out).unwrap(), 0);

        it.seek_to_ordinal(1).unwrap();
        let mut out = Vec::new();
        it.read_by_rowids(&[1, 4], &mut out).unwrap();
        assert_eq!(out, vec![Value::Int32(0); 2]);
        assert!(it.read_by_rowids(&[5], &mut out).is_err());
        assert!(it.seek_to_ordinal(6).is_err());
    }
}
