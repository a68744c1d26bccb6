//! 稀疏 key 索引：每 `interval` 行记录一次该行的 key
//!
//! key 是每个 key 列 `Value::to_key_bytes` 的数组，按字典序比较。
//! 探测 key 可以只给前缀列。

use std::cmp::Ordering;

use crate::common::{OlapError, Result};
use crate::field_type::Value;
use crate::pb::{ShortKeyEntryPb, ShortKeyIndexPb};

pub type EncodedKey = Vec<Vec<u8>>;

pub fn encode_key(values: &[Value]) -> EncodedKey {
    values.iter().map(Value::to_key_bytes).collect()
}

/// 只比较 target 覆盖到的前缀列
fn cmp_prefix(entry: &[Vec<u8>], target: &[Vec<u8>]) -> Ordering {
    let n = target.len().min(entry.len());
    entry[..n].cmp(&target[..n])
}

#[derive(Debug)]
pub struct ShortKeyIndexBuilder {
    interval: u32,
    entries:  Vec<(u32, EncodedKey)>,
}

impl ShortKeyIndexBuilder {
    pub fn new(interval: u32) -> Self {
        Self { interval: interval.max(1), entries: Vec::new() }
    }

    /// 每隔 interval 行插入一条记录
    pub fn maybe_add(&mut self, row_id: u32, key: &[Value]) {
        if row_id % self.interval == 0 {
            self.entries.push((row_id, encode_key(key)));
        }
    }

    pub fn finish(self, num_rows: u32) -> ShortKeyIndexPb {
        ShortKeyIndexPb {
            entries:  self.entries.into_iter()
                .map(|(row_id, key)| ShortKeyEntryPb { row_id, key })
                .collect(),
            num_rows,
            interval: self.interval,
        }
    }
}

#[derive(Debug, Default)]
pub struct ShortKeyIndex {
    entries:  Vec<(u32, EncodedKey)>,
    num_rows: u32,
}

impl ShortKeyIndex {
    pub fn from_pb(pb: ShortKeyIndexPb) -> Result<Self> {
        let ascending = pb.entries.windows(2).all(|w| w[0].row_id < w[1].row_id);
        if !ascending || pb.entries.last().map_or(false, |e| e.row_id >= pb.num_rows) {
            return Err(OlapError::Corruption("short key index row ids out of order".into()));
        }
        let entries = pb.entries.into_iter().map(|e| (e.row_id, e.key)).collect();
        Ok(Self { entries, num_rows: pb.num_rows })
    }

    pub fn num_entries(&self) -> usize { self.entries.len() }

    /// key >= target 的行不会出现在返回值之前
    pub fn lower_bound(&self, target: &[Vec<u8>]) -> u32 {
        let pos = self.entries.partition_point(|(_, k)| cmp_prefix(k, target) == Ordering::Less);
        match pos {
            0 => 0,
            p => self.entries[p - 1].0,
        }
    }

    /// key <= target 的行都在返回值（不含）之前
    pub fn upper_bound(&self, target: &[Vec<u8>]) -> u32 {
        let pos = self.entries.partition_point(|(_, k)| cmp_prefix(k, target) != Ordering::Greater);
        self.entries.get(pos).map_or(self.num_rows, |(rid, _)| *rid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> ShortKeyIndex {
        // 行 i 的 key = (i / 10, i)，每 4 行采样一次
        let mut b = ShortKeyIndexBuilder::new(4);
        for i in 0..20u32 {
            b.maybe_add(i, &[Value::Int32(i as i32 / 10), Value::Int32(i as i32)]);
        }
        ShortKeyIndex::from_pb(b.finish(20)).unwrap()
    }

    #[test]
    fn bounds_cover_matching_rows() {
        let idx = index();
        assert_eq!(idx.num_entries(), 5);

        let target = encode_key(&[Value::Int32(0), Value::Int32(9)]);
        assert_eq!(idx.lower_bound(&target), 8);
        assert_eq!(idx.upper_bound(&target), 12);

        // 前缀探测：第一列 = 1 的行是 10..20
        let prefix = encode_key(&[Value::Int32(1)]);
        assert!(idx.lower_bound(&prefix) <= 10);
        assert_eq!(idx.upper_bound(&prefix), 20);
        assert_eq!(idx.lower_bound(&encode_key(&[Value::Int32(-1)])), 0);
    }

    #[test]
    fn null_keys_sort_first() {
        let mut b = ShortKeyIndexBuilder::new(1);
        b.maybe_add(0, &[Value::Null]);
        b.maybe_add(1, &[Value::Int64(5)]);
        let idx = ShortKeyIndex::from_pb(b.finish(2)).unwrap();
        assert_eq!(idx.upper_bound(&encode_key(&[Value::Null])), 1);
        assert_eq!(idx.lower_bound(&encode_key(&[Value::Int64(5)])), 0);
    }
}
