//! Tablet 级 DeleteBitmap
//!
//! key = (rowset_id, segment_id, version)，value = 该 segment 内在 version 时被删除 / 覆盖的行号。
//! 按 key 有序，`subset` / `remove_range` 走 BTreeMap 的区间查询。
//!
//! 整个 map 由一把独立的读写锁保护，与 TabletMeta 的结构锁无关。
//! 长时间的扫描应先 `snapshot()` / `subset()`，不要持锁迭代。

use std::collections::BTreeMap;
use std::ops::Bound;

use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};
use roaring::RoaringBitmap;

use crate::common::{OlapError, Result, RowsetId, SegmentId, TabletId};
use crate::index::bitmap::{decode_bitmap, encode_bitmap};
use crate::pb::DeleteBitmapPb;

pub type BitmapKey = (RowsetId, SegmentId, u64);

/// `set` 的结果：首次写入还是覆盖
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetResult {
    Inserted,
    Replaced,
}

pub struct DeleteBitmap {
    tablet_id:     TabletId,
    delete_bitmap: RwLock<BTreeMap<BitmapKey, RoaringBitmap>>,
}

impl DeleteBitmap {
    pub fn new(tablet_id: TabletId) -> Self {
        Self { tablet_id, delete_bitmap: RwLock::new(BTreeMap::new()) }
    }

    fn from_map(tablet_id: TabletId, map: BTreeMap<BitmapKey, RoaringBitmap>) -> Self {
        Self { tablet_id, delete_bitmap: RwLock::new(map) }
    }

    pub fn tablet_id(&self) -> TabletId { self.tablet_id }

    /// 标记一行在 key 上被删除，幂等
    pub fn add(&self, key: BitmapKey, row_id: u32) {
        self.delete_bitmap.write().entry(key).or_default().insert(row_id);
    }

    /// 清除一行的删除标记；key 不存在时返回 false
    pub fn remove(&self, key: BitmapKey, row_id: u32) -> bool {
        match self.delete_bitmap.write().get_mut(&key) {
            Some(bitmap) => {
                bitmap.remove(row_id);
                true
            }
            None => false,
        }
    }

    /// 删除 `[lower, upper)` 内的全部 key
    pub fn remove_range(&self, lower: BitmapKey, upper: BitmapKey) {
        if lower >= upper {
            return;
        }
        let mut map = self.delete_bitmap.write();
        let mut tail = map.split_off(&lower);
        let mut rest = tail.split_off(&upper);
        map.append(&mut rest);
    }

    /// 删除某个 rowset 的全部条目
    pub fn remove_rowset(&self, rowset_id: RowsetId) {
        self.delete_bitmap.write().retain(|k, _| k.0 != rowset_id);
    }

    pub fn contains(&self, key: BitmapKey, row_id: u32) -> bool {
        self.delete_bitmap.read().get(&key).map_or(false, |b| b.contains(row_id))
    }

    /// 写入或整体替换 key 的 bitmap
    pub fn set(&self, key: BitmapKey, bitmap: RoaringBitmap) -> SetResult {
        match self.delete_bitmap.write().insert(key, bitmap) {
            Some(_) => SetResult::Replaced,
            None    => SetResult::Inserted,
        }
    }

    /// 借出 key 的 bitmap，持有期间写者会被阻塞
    pub fn get(&self, key: BitmapKey) -> Option<MappedRwLockReadGuard<'_, RoaringBitmap>> {
        RwLockReadGuard::try_map(self.delete_bitmap.read(), |m| m.get(&key)).ok()
    }

    /// 拷贝 `[start, end)` 内的条目到一个独立的 DeleteBitmap
    pub fn subset(&self, start: BitmapKey, end: BitmapKey) -> DeleteBitmap {
        let map = if start < end {
            self.delete_bitmap.read()
                .range((Bound::Included(start), Bound::Excluded(end)))
                .map(|(k, v)| (*k, v.clone()))
                .collect()
        } else {
            BTreeMap::new()
        };
        Self::from_map(self.tablet_id, map)
    }

    /// 按 key 合并 `other` 的全部条目（bitmap 取并集）
    pub fn merge(&self, other: &DeleteBitmap) {
        // 先拷贝再加写锁，`other` 与 self 是同一个对象时也不会死锁
        let incoming = other.delete_bitmap.read().clone();
        let mut map = self.delete_bitmap.write();
        for (key, bitmap) in incoming {
            *map.entry(key).or_default() |= bitmap;
        }
    }

    pub fn merge_bitmap(&self, key: BitmapKey, bitmap: &RoaringBitmap) {
        *self.delete_bitmap.write().entry(key).or_default() |= bitmap;
    }

    /// 读锁下的深拷贝，拷贝自带独立的锁
    pub fn snapshot(&self) -> DeleteBitmap {
        Self::from_map(self.tablet_id, self.delete_bitmap.read().clone())
    }

    /// (rowset, segment) 在 `version` 及之前被删除的全部行
    pub fn aggregate_upto(&self, rowset_id: RowsetId, segment_id: SegmentId, version: u64) -> RoaringBitmap {
        let map = self.delete_bitmap.read();
        let mut out = RoaringBitmap::new();
        for (_, bitmap) in map.range((rowset_id, segment_id, 0)..=(rowset_id, segment_id, version)) {
            out |= bitmap;
        }
        out
    }

    /// 全部 key，按序
    pub fn keys(&self) -> Vec<BitmapKey> {
        self.delete_bitmap.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize { self.delete_bitmap.read().len() }
    pub fn is_empty(&self) -> bool { self.delete_bitmap.read().is_empty() }

    /// 全部被标记的行数（各 key 的 bitmap 基数之和）
    pub fn cardinality(&self) -> u64 {
        self.delete_bitmap.read().values().map(RoaringBitmap::len).sum()
    }

    // ── 持久化 ────────────────────────────────────────────────────────────────

    pub fn to_pb(&self) -> Result<DeleteBitmapPb> {
        let map = self.delete_bitmap.read();
        let mut pb = DeleteBitmapPb::default();
        for (&(rowset_id, segment_id, version), bitmap) in map.iter() {
            pb.rowset_ids.push(rowset_id);
            pb.segment_ids.push(segment_id);
            pb.versions.push(version);
            pb.segment_delete_bitmaps.push(encode_bitmap(bitmap)?);
        }
        Ok(pb)
    }

    pub fn from_pb(tablet_id: TabletId, pb: &DeleteBitmapPb) -> Result<Self> {
        let n = pb.rowset_ids.len();
        if pb.segment_ids.len() != n || pb.versions.len() != n || pb.segment_delete_bitmaps.len() != n {
            return Err(OlapError::Corruption(format!(
                "delete bitmap arrays disagree: {n} rowsets, {} segments, {} versions, {} bitmaps",
                pb.segment_ids.len(), pb.versions.len(), pb.segment_delete_bitmaps.len()
            )));
        }
        let mut map = BTreeMap::new();
        for i in 0..n {
            let key = (pb.rowset_ids[i], pb.segment_ids[i], pb.versions[i]);
            map.insert(key, decode_bitmap(&pb.segment_delete_bitmaps[i])?);
        }
        Ok(Self::from_map(tablet_id, map))
    }
}

impl Clone for DeleteBitmap {
    fn clone(&self) -> Self { self.snapshot() }
}

impl PartialEq for DeleteBitmap {
    fn eq(&self, other: &Self) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        self.tablet_id == other.tablet_id && *self.delete_bitmap.read() == *other.delete_bitmap.read()
    }
}

impl std::fmt::Debug for DeleteBitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeleteBitmap")
            .field("tablet_id", &self.tablet_id)
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use test_log::test;

    #[test]
    fn add_contains_remove() {
        let dbm = DeleteBitmap::new(1);
        let k = (10, 0, 3);
        dbm.add(k, 7);
        dbm.add(k, 7);
        assert!(dbm.contains(k, 7));
        assert!(!dbm.contains(k, 8));
        assert!(dbm.remove(k, 7));
        assert!(!dbm.contains(k, 7));
        // key 仍在，只是 bitmap 为空
        assert!(dbm.remove(k, 7));
        assert!(!dbm.remove((10, 0, 4), 7));
        assert!(!dbm.contains((99, 0, 0), 0));
    }

    #[test]
    fn set_reports_insert_or_replace() {
        let dbm = DeleteBitmap::new(1);
        let k = (1, 1, 1);
        assert_eq!(dbm.set(k, RoaringBitmap::from_iter([1, 2])), SetResult::Inserted);
        assert_eq!(dbm.set(k, RoaringBitmap::from_iter([5])), SetResult::Replaced);
        assert_eq!(*dbm.get(k).unwrap(), RoaringBitmap::from_iter([5]));
        assert!(dbm.get((1, 1, 2)).is_none());
    }

    #[test]
    fn subset_and_remove_range_are_half_open() {
        let dbm = DeleteBitmap::new(1);
        for rs in 1..=3u64 {
            for v in 1..=3u64 {
                dbm.add((rs, 0, v), rs as u32);
            }
        }
        dbm.remove((2, 0, 2), 2);

        let sub = dbm.subset((1, 0, 2), (2, 0, 3));
        assert_eq!(sub.keys(), vec![(1, 0, 2), (1, 0, 3), (2, 0, 1), (2, 0, 2)]);
        assert!(!sub.contains((2, 0, 2), 2));
        assert!(dbm.subset((3, 0, 0), (1, 0, 0)).is_empty());

        // 子集独立于原结构
        dbm.add((1, 0, 2), 100);
        assert!(!sub.contains((1, 0, 2), 100));

        dbm.remove_range((1, 0, 3), (3, 0, 2));
        assert_eq!(dbm.keys(), vec![(1, 0, 1), (1, 0, 2), (3, 0, 2), (3, 0, 3)]);
        dbm.remove_rowset(3);
        assert_eq!(dbm.keys(), vec![(1, 0, 1), (1, 0, 2)]);
    }

    #[test]
    fn merge_unions_by_key() {
        let a = DeleteBitmap::new(1);
        let b = DeleteBitmap::new(1);
        a.add((1, 0, 1), 1);
        b.add((1, 0, 1), 2);
        b.add((2, 0, 5), 9);
        a.merge(&b);
        assert!(a.contains((1, 0, 1), 1) && a.contains((1, 0, 1), 2));
        assert!(a.contains((2, 0, 5), 9));
        a.merge(&a.clone());
        a.merge(&a);
        assert_eq!(a.cardinality(), 3);
    }

    #[test]
    fn aggregate_upto_unions_older_versions() {
        let dbm = DeleteBitmap::new(1);
        dbm.add((1, 0, 2), 1);
        dbm.add((1, 0, 4), 2);
        dbm.add((1, 1, 1), 3);
        dbm.add((2, 0, 1), 4);
        assert_eq!(dbm.aggregate_upto(1, 0, 3), RoaringBitmap::from_iter([1]));
        assert_eq!(dbm.aggregate_upto(1, 0, 4), RoaringBitmap::from_iter([1, 2]));
        assert!(dbm.aggregate_upto(1, 0, 1).is_empty());
    }

    #[test]
    fn pb_round_trip_and_corrupt_arrays() {
        let dbm = DeleteBitmap::new(7);
        dbm.set((1, 0, 1), RoaringBitmap::from_iter(0..1000));
        dbm.set((2, 3, 9), RoaringBitmap::from_iter([42]));
        let pb = dbm.to_pb().unwrap();
        assert_eq!(DeleteBitmap::from_pb(7, &pb).unwrap(), dbm);

        let mut bad = pb.clone();
        bad.versions.pop();
        assert!(DeleteBitmap::from_pb(7, &bad).unwrap_err().is_corruption());
        let mut bad = pb;
        bad.segment_delete_bitmaps[0] = vec![0xff, 0x01];
        assert!(DeleteBitmap::from_pb(7, &bad).unwrap_err().is_corruption());
    }

    #[test]
    fn snapshot_never_sees_half_applied_add() {
        let dbm = DeleteBitmap::new(1);
        let done = AtomicBool::new(false);
        std::thread::scope(|s| {
            s.spawn(|| {
                for row in 0..5000u32 {
                    dbm.add((1, 0, 1), row);
                    if row % 2 == 0 {
                        dbm.add((2, 0, 1), row);
                    }
                }
                done.store(true, Ordering::SeqCst);
            });
            s.spawn(|| {
                while !done.load(Ordering::SeqCst) {
                    let snap = dbm.snapshot();
                    let n = snap.get((1, 0, 1)).map_or(0, |b| b.len());
                    if let Some(b) = snap.get((1, 0, 1)) {
                        // 顺序写入的行号在快照里必须是一个前缀
                        assert_eq!(b.max().map_or(0, |m| m as u64 + 1), n);
                    }
                    dbm.add((3, 0, 1), 0);
                }
            });
        });
        assert_eq!(dbm.get((1, 0, 1)).unwrap().len(), 5000);
    }
}
