//! Tablet 级读取：在一个 ReadSnapshot 上按版本顺序依次扫描各 rowset 的 segment
//!
//! 每个 segment 的迭代器带上：
//!   - 该 segment 在读版本下的 delete bitmap
//!   - 版本大于所在 rowset 的 delete 谓词

use std::sync::Arc;

use tracing::debug;

use crate::common::{ColumnUniqueId, Result};
use crate::predicate::{ColumnPredicate, DeletePredicate};
use crate::rowset::RowsetSharedPtr;
use crate::segment::Segment;
use crate::segment_iterator::{ReadOptions, ReaderStats, RowBlock, RowIterator};
use crate::tablet::ReadSnapshot;

/// rowset 版本之后生效的 delete 谓词，每条谓词内部是 AND
pub(crate) fn delete_conditions_for(
    preds:       &[DeletePredicate],
    rowset_end:  i64,
    read_version: i64,
    schema:      &crate::schema::TabletSchema,
) -> Result<Vec<Vec<ColumnPredicate>>> {
    preds.iter()
        .filter(|p| p.version > rowset_end && p.version <= read_version)
        .map(|p| p.to_column_predicates(schema))
        .collect()
}

pub struct TabletReader {
    snapshot:    ReadSnapshot,
    projection:  Vec<ColumnUniqueId>,
    predicates:  Vec<ColumnPredicate>,
    batch_size:  usize,
    stats:       Arc<ReaderStats>,
    // (rowset 下标, segment 下标)
    next_seg:    (usize, usize),
    current:     Option<Box<dyn RowIterator>>,
}

impl TabletReader {
    /// `projection` 为空表示读取全部列
    pub fn new(snapshot: ReadSnapshot, projection: Vec<ColumnUniqueId>, predicates: Vec<ColumnPredicate>) -> Self {
        Self {
            snapshot,
            projection,
            predicates,
            batch_size: 1024,
            stats: ReaderStats::new(),
            next_seg: (0, 0),
            current: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn stats(&self) -> &Arc<ReaderStats> { &self.stats }

    pub fn snapshot(&self) -> &ReadSnapshot { &self.snapshot }

    /// 读出全部行
    pub fn read_all(mut self) -> Result<Vec<RowBlock>> {
        let mut blocks = Vec::new();
        while let Some(block) = self.next_block()? {
            blocks.push(block);
        }
        Ok(blocks)
    }

    fn next_segment(&mut self) -> Result<Option<(RowsetSharedPtr, Arc<Segment>)>> {
        loop {
            let (rs_idx, seg_idx) = self.next_seg;
            let Some(rs) = self.snapshot.rowsets.get(rs_idx) else { return Ok(None) };
            let segments = rs.load_segments()?;
            if let Some(seg) = segments.get(seg_idx) {
                self.next_seg = (rs_idx, seg_idx + 1);
                return Ok(Some((rs.clone(), seg.clone())));
            }
            self.next_seg = (rs_idx + 1, 0);
        }
    }

    fn open_segment(&self, rs: &RowsetSharedPtr, seg: &Arc<Segment>) -> Result<Box<dyn RowIterator>> {
        let snapshot = &self.snapshot;
        let deleted = snapshot.delete_bitmap.aggregate_upto(rs.rowset_id(), seg.id(), snapshot.version as u64);
        let opts = ReadOptions {
            return_columns:    self.projection.clone(),
            predicates:        self.predicates.clone(),
            delete_conditions: delete_conditions_for(
                &snapshot.delete_predicates, rs.version().end, snapshot.version, &snapshot.schema,
            )?,
            deleted_rows:      (!deleted.is_empty()).then_some(deleted),
            key_range:         None,
            batch_size:        self.batch_size,
            stats:             self.stats.clone(),
        };
        debug!(
            tablet_id = snapshot.tablet_id,
            rowset_id = rs.rowset_id(),
            segment_id = seg.id(),
            delete_conditions = opts.delete_conditions.len(),
            "open segment for read"
        );
        seg.new_iterator(&snapshot.schema, opts)
    }
}

impl RowIterator for TabletReader {
    fn next_block(&mut self) -> Result<Option<RowBlock>> {
        loop {
            if let Some(it) = self.current.as_mut() {
                if let Some(block) = it.next_block()? {
                    return Ok(Some(block));
                }
                self.current = None;
            }
            match self.next_segment()? {
                Some((rs, seg)) => self.current = Some(self.open_segment(&rs, &seg)?),
                None => return Ok(None),
            }
        }
    }
}
