//! Compaction：把一段连续的 active rowset 合并成一个输出 rowset
//!
//! 流程：
//!   1. 读入输入 rowset，丢弃在输出版本及之前已被删除的行，应用输出区间内的 delete 谓词
//!   2. 按 key 稳定排序（同 key 保持版本顺序）后写成一个 rowset
//!   3. 在 publish 锁内把版本大于输出版本的删除标记映射到输出 rowset
//!   4. `modify_rowsets(.., same_version = false)`：输入进入 stale 列表

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::common::{CompactionType, OlapError, Result, RowsetId, SegmentId, TabletState, Version};
use crate::field_type::Value;
use crate::index::{encode_key, EncodedKey};
use crate::reader::delete_conditions_for;
use crate::rowset::{RowsetIdGenerator, RowsetSharedPtr, RowsetState, RowsetWriter, RowsetWriterContext};
use crate::segment::SegmentWriterOptions;
use crate::segment_iterator::{ReadOptions, ReaderStats};
use crate::tablet::Tablet;

// ── delete 谓词处理策略 ───────────────────────────────────────────────────────

/// compaction 提交时决定哪些 delete 谓词可以移除
pub trait DeletePredicatePolicy: Send + Sync {
    /// `first_version` 是 tablet 最早 rowset 的起始版本；返回要移除的谓词版本区间
    fn retire(&self, output: Version, first_version: i64) -> Option<Version>;
}

/// 谓词永远保留
#[derive(Debug, Default, Clone, Copy)]
pub struct RetainDeletePredicates;

impl DeletePredicatePolicy for RetainDeletePredicates {
    fn retire(&self, _output: Version, _first_version: i64) -> Option<Version> { None }
}

/// base compaction 之后，输出区间内的谓词已物化到数据里，可以移除
#[derive(Debug, Default, Clone, Copy)]
pub struct RetireCoveredPredicates;

impl DeletePredicatePolicy for RetireCoveredPredicates {
    fn retire(&self, output: Version, first_version: i64) -> Option<Version> {
        (output.start == first_version).then_some(output)
    }
}

// ── Compaction ────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct CompactionStats {
    pub input_rowsets: usize,
    pub input_rows:    u64,
    pub output_rows:   u64,
    /// delete bitmap 与 delete 谓词过滤掉的行
    pub filtered_rows: u64,
    /// 映射到输出 rowset 的删除标记
    pub remapped_marks: u64,
}

type SourceRow = (RowsetId, SegmentId, u32);

pub struct Compaction {
    tablet:           Tablet,
    output_version:   Version,
    segment_opts:     SegmentWriterOptions,
    segment_max_rows: u64,
    policy:           Arc<dyn DeletePredicatePolicy>,
    stats:            CompactionStats,
}

impl Compaction {
    pub fn new(tablet: Tablet, output_version: Version) -> Self {
        Self {
            tablet,
            output_version,
            segment_opts:     SegmentWriterOptions::default(),
            segment_max_rows: u32::MAX as u64,
            policy:           Arc::new(RetainDeletePredicates),
            stats:            CompactionStats::default(),
        }
    }

    pub fn with_writer_options(mut self, segment_opts: SegmentWriterOptions, segment_max_rows: u64) -> Self {
        self.segment_opts = segment_opts;
        self.segment_max_rows = segment_max_rows;
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn DeletePredicatePolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn stats(&self) -> &CompactionStats { &self.stats }

    /// 从 tablet 首个版本开始的合并视为 base compaction
    pub fn compaction_type(&self) -> CompactionType {
        let first = self.tablet.with_meta(|m| m.all_rs_metas().first().map(|r| r.version.start));
        if first == Some(self.output_version.start) { CompactionType::Base } else { CompactionType::Cumulative }
    }

    /// 输出区间内的 active rowset，必须恰好拼成输出区间且至少两个
    fn pick_input_rowsets(&self) -> Result<Vec<RowsetSharedPtr>> {
        let out = self.output_version;
        let versions: Vec<Version> = self.tablet.with_meta(|m| {
            m.all_rs_metas().iter().map(|r| r.version).filter(|v| out.contains(v)).collect()
        });
        let covers = versions.first().map(|v| v.start) == Some(out.start)
            && versions.last().map(|v| v.end) == Some(out.end);
        if !covers {
            return Err(OlapError::MissingVersions(format!(
                "tablet {}: active rowsets do not cover {out}", self.tablet.tablet_id()
            )));
        }
        if versions.len() < 2 {
            return Err(OlapError::InvalidArgument(format!(
                "tablet {}: {out} is a single rowset, nothing to compact", self.tablet.tablet_id()
            )));
        }
        self.tablet.capture_rowsets(&versions)
    }

    /// 执行一次 compaction，返回已生效的输出 rowset
    pub fn execute(&mut self, id_gen: &RowsetIdGenerator) -> Result<RowsetSharedPtr> {
        let tablet = self.tablet.clone();
        match tablet.tablet_state() {
            TabletState::Running => {}
            state => return Err(OlapError::InvalidTabletState { tablet_id: tablet.tablet_id(), state }),
        }
        let out = self.output_version;
        let inputs = self.pick_input_rowsets()?;
        let schema = tablet.schema();
        let delete_predicates = tablet.with_meta(|m| m.delete_predicates().to_vec());
        let num_keys = schema.num_key_columns();
        let read_stats = ReaderStats::new();

        // ── 读取 ──────────────────────────────────────────────────────────────
        let mut rows: Vec<(EncodedKey, Vec<Value>, SourceRow)> = Vec::new();
        for rs in &inputs {
            self.stats.input_rows += rs.num_rows();
            for seg in rs.load_segments()? {
                let deleted = tablet.delete_bitmap().aggregate_upto(rs.rowset_id(), seg.id(), out.end as u64);
                let opts = ReadOptions {
                    delete_conditions: delete_conditions_for(&delete_predicates, rs.version().end, out.end, &schema)?,
                    deleted_rows: (!deleted.is_empty()).then_some(deleted),
                    stats: read_stats.clone(),
                    ..Default::default()
                };
                let mut it = seg.new_iterator(&schema, opts)?;
                while let Some(block) = it.next_block()? {
                    for (i, row) in block.rows().enumerate() {
                        let key = encode_key(&row[..num_keys]);
                        rows.push((key, row, (rs.rowset_id(), seg.id(), block.row_ids[i])));
                    }
                }
            }
        }
        self.stats.input_rowsets = inputs.len();
        self.stats.filtered_rows = ReaderStats::get(&read_stats.rows_del_filtered);
        rows.sort_by(|a, b| a.0.cmp(&b.0));

        // ── 写出 ──────────────────────────────────────────────────────────────
        let (partition_id, tablet_uid) = tablet.with_meta(|m| (m.partition_id(), m.tablet_uid()));
        let ctx = RowsetWriterContext {
            rowset_id:        id_gen.next_id(),
            tablet_id:        tablet.tablet_id(),
            partition_id,
            tablet_uid,
            version:          out,
            tablet_path:      tablet.tablet_path().into(),
            schema:           schema.clone(),
            segment_opts:     self.segment_opts,
            segment_max_rows: self.segment_max_rows,
        };
        let mut writer = RowsetWriter::new(ctx, tablet.fs().clone())?;
        let mut location: HashMap<SourceRow, (SegmentId, u32)> = HashMap::with_capacity(rows.len());
        for (idx, (_, row, src)) in rows.into_iter().enumerate() {
            let idx = idx as u64;
            location.insert(src, ((idx / self.segment_max_rows) as SegmentId, (idx % self.segment_max_rows) as u32));
            writer.add_row(row)?;
        }
        let mut meta = writer.build()?;
        meta.state = RowsetState::Visible;
        self.stats.output_rows = meta.num_rows;
        let output_id = meta.rowset_id;
        let output = tablet.new_rowset_handle(meta, schema);
        debug!(tablet_id = tablet.tablet_id(), rowset_id = output_id, rows = self.stats.output_rows, "compaction output written");

        // ── 提交 ──────────────────────────────────────────────────────────────
        let _guard = tablet.publish_lock();
        let dbm = tablet.delete_bitmap();
        for rs in &inputs {
            let id = rs.rowset_id();
            let entries = dbm.subset((id, 0, 0), (id, SegmentId::MAX, u64::MAX));
            for (rs_id, seg_id, version) in entries.keys() {
                if version <= out.end as u64 {
                    continue;
                }
                let Some(bitmap) = entries.get((rs_id, seg_id, version)) else { continue };
                for row in bitmap.iter() {
                    if let Some(&(out_seg, out_row)) = location.get(&(rs_id, seg_id, row)) {
                        dbm.add((output_id, out_seg, version), out_row);
                        self.stats.remapped_marks += 1;
                    }
                }
            }
        }
        let first_version = tablet.with_meta(|m| m.all_rs_metas().first().map_or(out.start, |r| r.version.start));
        let retired = self.policy.retire(out, first_version);
        if let Err(e) = tablet.swap_rowsets(std::slice::from_ref(&output), &inputs, false, retired) {
            dbm.remove_rowset(output_id);
            output.mark_pending_removal();
            return Err(e);
        }

        info!(
            tablet_id = tablet.tablet_id(),
            version = %out,
            compaction_type = ?self.compaction_type(),
            inputs = self.stats.input_rowsets,
            input_rows = self.stats.input_rows,
            output_rows = self.stats.output_rows,
            filtered_rows = self.stats.filtered_rows,
            remapped_marks = self.stats.remapped_marks,
            "compaction finished"
        );
        Ok(output)
    }
}
