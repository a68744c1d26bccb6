//! 稀疏行号 → 页位置，O(log n) 按 row_id 定位页

use std::ops::Range;

use crate::common::{OlapError, Result};
use crate::page::PagePointer;
use crate::pb::OrdinalIndexPb;

#[derive(Debug, Default, Clone)]
pub struct OrdinalIndex {
    /// (first_row_id, page) 有序列表
    entries:  Vec<(u32, PagePointer)>,
    num_rows: u32,
}

impl OrdinalIndex {
    pub fn add(&mut self, first_row_id: u32, page: PagePointer) {
        self.entries.push((first_row_id, page));
    }

    pub fn set_num_rows(&mut self, num_rows: u32) { self.num_rows = num_rows; }

    pub fn page_count(&self) -> usize { self.entries.len() }

    pub fn page(&self, idx: usize) -> Option<PagePointer> {
        self.entries.get(idx).map(|(_, p)| *p)
    }

    /// 找包含 row_id 的页序号（二分查找）
    pub fn find_page(&self, row_id: u32) -> Option<usize> {
        if row_id >= self.num_rows || self.entries.is_empty() {
            return None;
        }
        let pos = self.entries.partition_point(|(rid, _)| *rid <= row_id);
        Some(pos.saturating_sub(1))
    }

    /// 第 idx 页覆盖的行号区间
    pub fn page_rows(&self, idx: usize) -> Range<u32> {
        let start = self.entries.get(idx).map_or(self.num_rows, |(rid, _)| *rid);
        let end   = self.entries.get(idx + 1).map_or(self.num_rows, |(rid, _)| *rid);
        start..end
    }

    pub fn to_pb(&self) -> OrdinalIndexPb {
        OrdinalIndexPb {
            first_row_ids: self.entries.iter().map(|(rid, _)| *rid).collect(),
            offsets:       self.entries.iter().map(|(_, p)| p.offset).collect(),
            sizes:         self.entries.iter().map(|(_, p)| p.size).collect(),
        }
    }

    pub fn from_pb(pb: &OrdinalIndexPb, num_rows: u32) -> Result<Self> {
        let n = pb.first_row_ids.len();
        if pb.offsets.len() != n || pb.sizes.len() != n {
            return Err(OlapError::Corruption(format!(
                "ordinal index arrays disagree: {n} / {} / {}", pb.offsets.len(), pb.sizes.len()
            )));
        }
        let sorted = pb.first_row_ids.windows(2).all(|w| w[0] < w[1]);
        if !sorted || pb.first_row_ids.first().map_or(n != 0, |&first| first != 0) {
            return Err(OlapError::Corruption("ordinal index row ids are not ascending from 0".into()));
        }
        if pb.first_row_ids.last().map_or(false, |&last| last >= num_rows) {
            return Err(OlapError::Corruption(format!("ordinal index points past {num_rows} rows")));
        }
        let entries = pb.first_row_ids.iter()
            .zip(pb.offsets.iter().zip(&pb.sizes))
            .map(|(&rid, (&offset, &size))| (rid, PagePointer::new(offset, size)))
            .collect();
        Ok(Self { entries, num_rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> OrdinalIndex {
        let mut idx = OrdinalIndex::default();
        idx.add(0, PagePointer::new(0, 10));
        idx.add(100, PagePointer::new(10, 10));
        idx.add(200, PagePointer::new(20, 5));
        idx.set_num_rows(250);
        idx
    }

    #[test]
    fn finds_page_for_row() {
        let idx = index();
        assert_eq!(idx.find_page(0), Some(0));
        assert_eq!(idx.find_page(99), Some(0));
        assert_eq!(idx.find_page(100), Some(1));
        assert_eq!(idx.find_page(249), Some(2));
        assert_eq!(idx.find_page(250), None);
        assert_eq!(idx.page_rows(2), 200..250);
    }

    #[test]
    fn malformed_pb_is_corruption() {
        let mut pb = index().to_pb();
        assert_eq!(OrdinalIndex::from_pb(&pb, 250).unwrap().page_count(), 3);
        pb.sizes.pop();
        assert!(OrdinalIndex::from_pb(&pb, 250).unwrap_err().is_corruption());
        let mut pb = index().to_pb();
        pb.first_row_ids.swap(1, 2);
        assert!(OrdinalIndex::from_pb(&pb, 250).unwrap_err().is_corruption());
    }
}
