//! 列写入器（对应 OLAP Segment V2 column_writer）
//!
//! 每列独立维护：
//!   - Data Page 缓冲区
//!   - OrdinalIndex（行号→页偏移）
//!   - ZoneMap（页级 + segment 级 min/max）
//!   - BloomFilter（等值过滤，可选）
//!   - BitmapIndex（值→行号，可选）

use std::collections::BTreeSet;
use std::io::Write;

use crate::common::{OlapError, Result};
use crate::field_type::{ColumnMeta, Value};
use crate::index::{BitmapIndexBuilder, BloomFilter, OrdinalIndex, ZoneMap};
use crate::page::{build_index_page, PageBuilder, PageSink};
use crate::pb::{self, ColumnMetaPb, PagePointerPb, PageZoneMapsPb};

#[derive(Debug, Clone, Copy)]
pub struct ColumnWriterOptions {
    pub page_max_rows:             usize,
    pub bloom_filter_bits_per_key: usize,
}

impl Default for ColumnWriterOptions {
    fn default() -> Self {
        Self { page_max_rows: 1024, bloom_filter_bits_per_key: 10 }
    }
}

pub struct ColumnWriter {
    pub meta:        ColumnMeta,
    opts:            ColumnWriterOptions,
    // 已完成的页（序列化字节）
    pages:           Vec<(u32, Vec<u8>)>,
    current:         PageBuilder,
    // 当前行计数（跨页累计）
    next_row_id:     u32,
    page_zone:       ZoneMap,
    page_zone_maps:  Vec<ZoneMap>,
    segment_zone:    ZoneMap,
    // bloom filter 在 finalize 时按去重后的基数建立
    bloom_keys:      Option<BTreeSet<Vec<u8>>>,
    bitmap_index:    Option<BitmapIndexBuilder>,
    ordinal_index:   OrdinalIndex,
    data_size:       u64,
}

impl ColumnWriter {
    pub fn new(meta: ColumnMeta, opts: ColumnWriterOptions) -> Self {
        let page = PageBuilder::new(0, meta.field_type, meta.encoding, meta.compression, opts.page_max_rows);
        Self {
            bloom_keys:   meta.has_bloom_filter.then(BTreeSet::new),
            bitmap_index: meta.has_bitmap_index.then(BitmapIndexBuilder::default),
            meta, opts, pages: Vec::new(),
            current: page, next_row_id: 0,
            page_zone: ZoneMap::default(),
            page_zone_maps: Vec::new(),
            segment_zone: ZoneMap::default(),
            ordinal_index: OrdinalIndex::default(),
            data_size: 0,
        }
    }

    /// 追加一个值到本列
    pub fn add_value(&mut self, value: Value) -> Result<()> {
        if !value.matches_type(self.meta.field_type) {
            return Err(OlapError::SchemaMismatch(format!(
                "column {} expects {:?}, got {value:?}", self.meta.name, self.meta.field_type
            )));
        }
        if value.is_null() && !self.meta.is_nullable {
            return Err(OlapError::SchemaMismatch(format!("column {} is not nullable", self.meta.name)));
        }
        if let Some(b) = value.as_bytes() {
            if b.len() > self.meta.max_length as usize {
                return Err(OlapError::InvalidArgument(format!(
                    "value of {} bytes exceeds column {} length {}", b.len(), self.meta.name, self.meta.max_length
                )));
            }
        }

        if let Some(keys) = &mut self.bloom_keys {
            if !value.is_null() {
                keys.insert(value.to_sort_key());
            }
        }
        if let Some(bitmap) = &mut self.bitmap_index {
            bitmap.add(self.next_row_id, &value);
        }
        self.page_zone.add(&value);

        self.current.add(value);
        self.next_row_id += 1;

        if self.current.is_full() {
            self.flush_page()?;
        }
        Ok(())
    }

    fn flush_page(&mut self) -> Result<()> {
        let next = PageBuilder::new(
            self.next_row_id, self.meta.field_type, self.meta.encoding,
            self.meta.compression, self.opts.page_max_rows,
        );
        let page      = std::mem::replace(&mut self.current, next);
        let first_rid = page.first_row_id;
        let bytes     = page.build()?;

        let zone = std::mem::take(&mut self.page_zone);
        self.segment_zone.merge(&zone);
        self.page_zone_maps.push(zone);
        self.pages.push((first_rid, bytes));
        Ok(())
    }

    /// 写出全部 data page
    pub fn write_data<W: Write>(&mut self, sink: &mut PageSink<W>) -> Result<()> {
        if !self.current.is_empty() {
            self.flush_page()?;
        }
        for (first_rid, bytes) in std::mem::take(&mut self.pages) {
            let ptr = sink.append(&bytes)?;
            self.data_size += ptr.size as u64;
            self.ordinal_index.add(first_rid, ptr);
        }
        self.ordinal_index.set_num_rows(self.next_row_id);
        Ok(())
    }

    /// 写出本列的索引页，返回 footer 中的列描述
    pub fn write_index<W: Write>(self, column_id: u32, sink: &mut PageSink<W>) -> Result<ColumnMetaPb> {
        let ordinal = sink.append(&build_index_page(&self.ordinal_index.to_pb()))?;
        let zone_maps = PageZoneMapsPb {
            zone_maps: self.page_zone_maps.iter().map(ZoneMap::to_pb).collect(),
        };
        let page_zone_maps = sink.append(&build_index_page(&zone_maps))?;

        let bloom_filter: Option<PagePointerPb> = match self.bloom_keys {
            Some(keys) => {
                let mut bf = BloomFilter::new(keys.len(), self.opts.bloom_filter_bits_per_key);
                for k in &keys {
                    bf.add(k);
                }
                Some(sink.append(&build_index_page(&bf.to_pb()))?.into())
            }
            None => None,
        };
        let bitmap_index: Option<PagePointerPb> = match self.bitmap_index {
            Some(builder) => Some(sink.append(&build_index_page(&builder.finish()?))?.into()),
            None => None,
        };

        Ok(ColumnMetaPb {
            column_id,
            unique_id:        self.meta.unique_id,
            field_type:       pb::FieldTypePb::from(self.meta.field_type) as i32,
            encoding:         pb::EncodingTypePb::from(self.meta.encoding) as i32,
            compression:      pb::CompressionTypePb::from(self.meta.compression) as i32,
            is_nullable:      self.meta.is_nullable,
            ordinal_index:    Some(ordinal.into()),
            page_zone_maps:   Some(page_zone_maps.into()),
            segment_zone_map: Some(self.segment_zone.to_pb()),
            bloom_filter,
            bitmap_index,
            data_size:        self.data_size,
        })
    }

    pub fn num_rows(&self) -> u32 { self.next_row_id }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_type::{CompressionType, FieldType};
    use crate::page::{parse_index_page, PageDecoder};
    use crate::pb::OrdinalIndexPb;

    #[test]
    fn pages_split_and_zone_maps_follow() {
        let meta = ColumnMeta::new(5, "v", FieldType::Int64).nullable().with_bloom_filter();
        let opts = ColumnWriterOptions { page_max_rows: 4, ..Default::default() };
        let mut w = ColumnWriter::new(meta, opts);
        for i in 0..10i64 {
            w.add_value(if i == 3 { Value::Null } else { Value::Int64(i * 10) }).unwrap();
        }
        let mut sink = PageSink::new(Vec::new());
        w.write_data(&mut sink).unwrap();
        assert_eq!(w.ordinal_index.page_count(), 3);
        let col = w.write_index(0, &mut sink).unwrap();

        let zm = col.segment_zone_map.as_ref().unwrap();
        assert!(zm.has_null && zm.has_not_null);
        assert_eq!(zm.max, Value::Int64(90).to_sort_key());
        assert!(col.bloom_filter.is_some() && col.bitmap_index.is_none());

        let file = sink.into_inner();
        let ord_ptr = col.ordinal_index.unwrap();
        let ord: OrdinalIndexPb = parse_index_page(
            &file[ord_ptr.offset as usize..(ord_ptr.offset + ord_ptr.size as u64) as usize],
        ).unwrap();
        assert_eq!(ord.first_row_ids, vec![0, 4, 8]);
        let (off, size) = (ord.offsets[0] as usize, ord.sizes[0] as usize);
        let page = PageDecoder::decode(
            &file[off..off + size], FieldType::Int64, FieldType::Int64.default_encoding(), CompressionType::Lz4,
        ).unwrap();
        assert_eq!(page.values[3], Value::Null);
    }

    #[test]
    fn rejects_values_the_column_cannot_hold() {
        let mut w = ColumnWriter::new(ColumnMeta::new(0, "k", FieldType::Int32), ColumnWriterOptions::default());
        assert!(matches!(w.add_value(Value::Null), Err(OlapError::SchemaMismatch(_))));
        assert!(matches!(w.add_value(Value::Int64(1)), Err(OlapError::SchemaMismatch(_))));
        w.add_value(Value::Int32(1)).unwrap();
        assert_eq!(w.num_rows(), 1);
    }
}
