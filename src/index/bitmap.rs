//! Bitmap 索引：有序去重字典 → 行号 bitmap
//!
//! 字典项是 `Value::to_sort_key`，按字节序即按值序排列。

use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;

use roaring::RoaringBitmap;

use crate::common::{OlapError, Result};
use crate::field_type::{FieldType, Value};
use crate::pb::BitmapIndexPb;

pub(crate) fn encode_bitmap(bitmap: &RoaringBitmap) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(bitmap.serialized_size());
    bitmap.serialize_into(&mut out)?;
    Ok(out)
}

pub(crate) fn decode_bitmap(data: &[u8]) -> Result<RoaringBitmap> {
    RoaringBitmap::deserialize_from(&mut Cursor::new(data))
        .map_err(|e| OlapError::Corruption(format!("malformed roaring bitmap: {e}")))
}

// ── 写入 ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct BitmapIndexBuilder {
    dict:  BTreeMap<Vec<u8>, RoaringBitmap>,
    nulls: RoaringBitmap,
}

impl BitmapIndexBuilder {
    pub fn add(&mut self, row_id: u32, v: &Value) {
        if v.is_null() {
            self.nulls.insert(row_id);
        } else {
            self.dict.entry(v.to_sort_key()).or_default().insert(row_id);
        }
    }

    pub fn finish(self) -> Result<BitmapIndexPb> {
        let mut pb = BitmapIndexPb {
            dict_values: Vec::with_capacity(self.dict.len()),
            bitmaps:     Vec::with_capacity(self.dict.len()),
            null_bitmap: encode_bitmap(&self.nulls)?,
        };
        for (key, bitmap) in self.dict {
            pb.dict_values.push(key);
            pb.bitmaps.push(encode_bitmap(&bitmap)?);
        }
        Ok(pb)
    }
}

// ── 读取 ──────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct BitmapIndexReader {
    field_type: FieldType,
    dict:       Vec<Vec<u8>>,
    bitmaps:    Vec<RoaringBitmap>,
    nulls:      RoaringBitmap,
}

impl BitmapIndexReader {
    pub fn from_pb(pb: BitmapIndexPb, field_type: FieldType) -> Result<Self> {
        if pb.dict_values.len() != pb.bitmaps.len() {
            return Err(OlapError::Corruption(format!(
                "bitmap index has {} values but {} bitmaps", pb.dict_values.len(), pb.bitmaps.len()
            )));
        }
        if !pb.dict_values.windows(2).all(|w| w[0] < w[1]) {
            return Err(OlapError::Corruption("bitmap index dictionary is not sorted".into()));
        }
        let bitmaps = pb.bitmaps.iter().map(|b| decode_bitmap(b)).collect::<Result<Vec<_>>>()?;
        Ok(Self {
            field_type,
            dict: pb.dict_values,
            bitmaps,
            nulls: decode_bitmap(&pb.null_bitmap)?,
        })
    }

    pub fn cardinality(&self) -> usize { self.dict.len() }
}

/// 查询侧游标。多个 iterator 共享同一个已加载的 reader。
#[derive(Debug, Clone)]
pub struct BitmapIndexIterator {
    reader:  Arc<BitmapIndexReader>,
    current: usize,
}

impl BitmapIndexIterator {
    pub fn new(reader: Arc<BitmapIndexReader>) -> Self {
        Self { reader, current: 0 }
    }

    /// 定位到第一个 >= value 的字典项，返回是否精确命中
    pub fn seek_dictionary(&mut self, value: &Value) -> Result<bool> {
        let key = value.cast_to(self.reader.field_type)?.to_sort_key();
        let pos = self.reader.dict.partition_point(|k| k.as_slice() < key.as_slice());
        self.current = pos;
        Ok(self.reader.dict.get(pos).map_or(false, |k| *k == key))
    }

    pub fn current_ordinal(&self) -> usize { self.current }

    pub fn cardinality(&self) -> usize { self.reader.cardinality() }

    pub fn dictionary_value(&self, ordinal: usize) -> Result<Value> {
        let key = self.reader.dict.get(ordinal).ok_or_else(|| {
            OlapError::InvalidArgument(format!("dictionary ordinal {ordinal} out of range"))
        })?;
        Value::from_sort_key(self.reader.field_type, key)
    }

    pub fn read_bitmap(&self, ordinal: usize) -> Result<RoaringBitmap> {
        self.reader.bitmaps.get(ordinal).cloned().ok_or_else(|| {
            OlapError::InvalidArgument(format!(
                "bitmap ordinal {ordinal} >= cardinality {}", self.reader.cardinality()
            ))
        })
    }

    /// [from, to) 内所有字典项的并集
    pub fn read_union_bitmap(&self, from: usize, to: usize) -> RoaringBitmap {
        let to = to.min(self.reader.bitmaps.len());
        let mut out = RoaringBitmap::new();
        for bitmap in self.reader.bitmaps.get(from..to).unwrap_or_default() {
            out |= bitmap;
        }
        out
    }

    pub fn has_null_bitmap(&self) -> bool { !self.reader.nulls.is_empty() }

    pub fn read_null_bitmap(&self) -> RoaringBitmap { self.reader.nulls.clone() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iterator() -> BitmapIndexIterator {
        let mut b = BitmapIndexBuilder::default();
        let col = [Some(30), Some(10), None, Some(30), Some(20), Some(10)];
        for (row, v) in col.iter().enumerate() {
            b.add(row as u32, &v.map_or(Value::Null, Value::Int32));
        }
        let reader = BitmapIndexReader::from_pb(b.finish().unwrap(), FieldType::Int32).unwrap();
        BitmapIndexIterator::new(Arc::new(reader))
    }

    #[test]
    fn seek_and_read() {
        let mut it = iterator();
        assert_eq!(it.cardinality(), 3);
        assert!(it.seek_dictionary(&Value::Int32(30)).unwrap());
        let rows: Vec<u32> = it.read_bitmap(it.current_ordinal()).unwrap().iter().collect();
        assert_eq!(rows, vec![0, 3]);

        // 未命中时停在第一个更大的值
        assert!(!it.seek_dictionary(&Value::Int64(15)).unwrap());
        assert_eq!(it.dictionary_value(it.current_ordinal()).unwrap(), Value::Int32(20));

        let union: Vec<u32> = it.read_union_bitmap(0, 2).iter().collect();
        assert_eq!(union, vec![1, 4, 5]);
        assert_eq!(it.read_null_bitmap().iter().collect::<Vec<_>>(), vec![2]);
        assert!(it.read_bitmap(3).is_err());
    }

    #[test]
    fn unsorted_dictionary_is_corruption() {
        let mut b = BitmapIndexBuilder::default();
        b.add(0, &Value::Int32(1));
        b.add(1, &Value::Int32(2));
        let mut pb = b.finish().unwrap();
        pb.dict_values.swap(0, 1);
        assert!(BitmapIndexReader::from_pb(pb, FieldType::Int32).unwrap_err().is_corruption());
    }
}
