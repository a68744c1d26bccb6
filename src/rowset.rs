//! Rowset：一个版本区间内已提交的数据，由一个或多个 segment 组成
//!
//! `RowsetMeta` 是不可变的元数据，由 TabletMeta 持有；`Rowset` 是运行时共享句柄，
//! 被 tablet 和进行中的读快照共同引用。最后一个引用释放时，若已被标记待删除，
//! 才真正删除 segment 文件。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::common::{OlapError, PartitionId, Result, RowsetId, RowsetType, SegmentId, TabletId, Version};
use crate::field_type::Value;
use crate::io::{join_path, FileSystemPtr};
use crate::mem_tracker::MemTrackerPtr;
use crate::pb::{self, RowsetMetaPb};
use crate::schema::TabletSchema;
use crate::segment::{Segment, SegmentWriter, SegmentWriterOptions};
use crate::tablet_meta::TabletUid;

// ── Rowset 状态 ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowsetState { Prepared, Committed, Visible }

impl From<RowsetState> for pb::RowsetStatePb {
    fn from(s: RowsetState) -> Self {
        match s {
            RowsetState::Prepared  => Self::Prepared,
            RowsetState::Committed => Self::Committed,
            RowsetState::Visible   => Self::Visible,
        }
    }
}

impl From<pb::RowsetStatePb> for RowsetState {
    fn from(pb: pb::RowsetStatePb) -> Self {
        match pb {
            pb::RowsetStatePb::Prepared  => Self::Prepared,
            pb::RowsetStatePb::Committed => Self::Committed,
            pb::RowsetStatePb::Visible   => Self::Visible,
        }
    }
}

// ── Rowset 元数据 ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct RowsetMeta {
    pub rowset_id:       RowsetId,
    pub tablet_id:       TabletId,
    pub partition_id:    PartitionId,
    pub tablet_uid:      TabletUid,
    pub version:         Version,
    pub num_rows:        u64,
    pub total_disk_size: u64,
    pub data_disk_size:  u64,
    pub index_disk_size: u64,
    pub num_segments:    u32,
    pub rowset_type:     RowsetType,
    pub state:           RowsetState,
    /// 空串表示本地；否则是远端存储资源名
    pub resource_id:     String,
    pub creation_time:   i64,
    pub empty:           bool,
}

impl RowsetMeta {
    pub fn new(rowset_id: RowsetId, tablet_id: TabletId, version: Version) -> Self {
        Self {
            rowset_id, tablet_id, version,
            partition_id:    0,
            tablet_uid:      TabletUid::default(),
            num_rows:        0,
            total_disk_size: 0,
            data_disk_size:  0,
            index_disk_size: 0,
            num_segments:    0,
            rowset_type:     RowsetType::Beta,
            state:           RowsetState::Prepared,
            resource_id:     String::new(),
            creation_time:   0,
            empty:           true,
        }
    }

    pub fn is_local(&self) -> bool { self.resource_id.is_empty() }
    pub fn is_visible(&self) -> bool { self.state == RowsetState::Visible }

    pub fn to_pb(&self) -> RowsetMetaPb {
        RowsetMetaPb {
            rowset_id:       self.rowset_id,
            tablet_id:       self.tablet_id,
            partition_id:    self.partition_id,
            tablet_uid:      Some(self.tablet_uid.into()),
            start_version:   self.version.start,
            end_version:     self.version.end,
            num_rows:        self.num_rows,
            total_disk_size: self.total_disk_size,
            data_disk_size:  self.data_disk_size,
            index_disk_size: self.index_disk_size,
            num_segments:    self.num_segments,
            rowset_type:     pb::RowsetTypePb::from(self.rowset_type) as i32,
            rowset_state:    pb::RowsetStatePb::from(self.state) as i32,
            resource_id:     self.resource_id.clone(),
            creation_time:   self.creation_time,
            empty:           self.empty,
        }
    }

    pub fn from_pb(p: &RowsetMetaPb) -> Result<Self> {
        let rowset_type: pb::RowsetTypePb = pb::enum_from_i32(p.rowset_type, "rowset type")?;
        let state: pb::RowsetStatePb      = pb::enum_from_i32(p.rowset_state, "rowset state")?;
        if p.start_version > p.end_version {
            return Err(OlapError::Corruption(format!(
                "rowset {} has inverted version [{},{}]", p.rowset_id, p.start_version, p.end_version
            )));
        }
        Ok(Self {
            rowset_id:       p.rowset_id,
            tablet_id:       p.tablet_id,
            partition_id:    p.partition_id,
            tablet_uid:      p.tablet_uid.as_ref().map(TabletUid::from).unwrap_or_default(),
            version:         Version::new(p.start_version, p.end_version),
            num_rows:        p.num_rows,
            total_disk_size: p.total_disk_size,
            data_disk_size:  p.data_disk_size,
            index_disk_size: p.index_disk_size,
            num_segments:    p.num_segments,
            rowset_type:     rowset_type.into(),
            state:           state.into(),
            resource_id:     p.resource_id.clone(),
            creation_time:   p.creation_time,
            empty:           p.empty,
        })
    }
}

/// tablet 目录下 segment 文件名
pub fn segment_file_name(rowset_id: RowsetId, segment_id: SegmentId) -> String {
    format!("{rowset_id}_{segment_id}.seg")
}

// ── Rowset 句柄 ───────────────────────────────────────────────────────────────

pub type RowsetSharedPtr = Arc<Rowset>;

pub struct Rowset {
    meta:            RowsetMeta,
    tablet_path:     String,
    schema:          Arc<TabletSchema>,
    fs:              FileSystemPtr,
    mem_tracker:     MemTrackerPtr,
    segments:        OnceCell<Vec<Arc<Segment>>>,
    pending_removal: AtomicBool,
}

impl std::fmt::Debug for Rowset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rowset")
            .field("rowset_id", &self.meta.rowset_id)
            .field("version", &self.meta.version)
            .field("pending_removal", &self.is_pending_removal())
            .finish()
    }
}

impl Rowset {
    pub fn new(
        meta:        RowsetMeta,
        tablet_path: &str,
        schema:      Arc<TabletSchema>,
        fs:          FileSystemPtr,
        mem_tracker: MemTrackerPtr,
    ) -> RowsetSharedPtr {
        Arc::new(Self {
            meta,
            tablet_path: tablet_path.into(),
            schema,
            fs,
            mem_tracker,
            segments: OnceCell::new(),
            pending_removal: AtomicBool::new(false),
        })
    }

    pub fn meta(&self)         -> &RowsetMeta { &self.meta }
    pub fn rowset_id(&self)    -> RowsetId    { self.meta.rowset_id }
    pub fn version(&self)      -> Version     { self.meta.version }
    pub fn num_rows(&self)     -> u64         { self.meta.num_rows }
    pub fn num_segments(&self) -> u32         { self.meta.num_segments }

    pub fn segment_path(&self, segment_id: SegmentId) -> String {
        join_path(&self.tablet_path, &segment_file_name(self.meta.rowset_id, segment_id))
    }

    /// 打开全部 segment；并发调用只打开一次，失败不缓存
    pub fn load_segments(&self) -> Result<&[Arc<Segment>]> {
        self.segments.get_or_try_init(|| {
            let segments = (0..self.meta.num_segments)
                .map(|seg| Segment::open(
                    self.fs.as_ref(), &self.segment_path(seg), seg, self.schema.clone(), self.mem_tracker.clone(),
                ))
                .collect::<Result<Vec<_>>>()?;
            debug!(rowset_id = self.meta.rowset_id, segments = segments.len(), "rowset segments opened");
            Ok(segments)
        }).map(Vec::as_slice)
    }

    /// 标记为待删除，最后一个引用释放时删除文件
    pub fn mark_pending_removal(&self) {
        self.pending_removal.store(true, Ordering::Release);
    }

    pub fn is_pending_removal(&self) -> bool {
        self.pending_removal.load(Ordering::Acquire)
    }
}

impl Drop for Rowset {
    fn drop(&mut self) {
        if !self.is_pending_removal() {
            return;
        }
        // 先关闭已打开的 segment 句柄
        self.segments.take();
        for seg in 0..self.meta.num_segments {
            let path = self.segment_path(seg);
            if let Err(e) = self.fs.delete_file(&path) {
                warn!(rowset_id = self.meta.rowset_id, path, error = %e, "failed to remove segment file");
            }
        }
        info!(rowset_id = self.meta.rowset_id, version = %self.meta.version, "rowset files removed");
    }
}

// ── Rowset id 生成器 ──────────────────────────────────────────────────────────

/// 单调递增；恢复时从已有的最大 id 之后继续
#[derive(Debug)]
pub struct RowsetIdGenerator {
    next: AtomicU64,
}

impl RowsetIdGenerator {
    pub fn new(start: RowsetId) -> Self {
        Self { next: AtomicU64::new(start.max(1)) }
    }

    pub fn next_id(&self) -> RowsetId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// 保证之后分配的 id 都大于 `used`
    pub fn observe(&self, used: RowsetId) {
        self.next.fetch_max(used + 1, Ordering::Relaxed);
    }
}

impl Default for RowsetIdGenerator {
    fn default() -> Self { Self::new(1) }
}

// ── RowsetWriter ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RowsetWriterContext {
    pub rowset_id:        RowsetId,
    pub tablet_id:        TabletId,
    pub partition_id:     PartitionId,
    pub tablet_uid:       TabletUid,
    pub version:          Version,
    pub tablet_path:      String,
    pub schema:           Arc<TabletSchema>,
    pub segment_opts:     SegmentWriterOptions,
    pub segment_max_rows: u64,
}

/// 按 key 序写入行，每 `segment_max_rows` 行切一个 segment
pub struct RowsetWriter {
    ctx:          RowsetWriterContext,
    fs:           FileSystemPtr,
    current:      Option<SegmentWriter>,
    num_segments: u32,
    num_rows:     u64,
    data_size:    u64,
    index_size:   u64,
    total_size:   u64,
}

impl RowsetWriter {
    pub fn new(ctx: RowsetWriterContext, fs: FileSystemPtr) -> Result<Self> {
        if ctx.segment_max_rows == 0 {
            return Err(OlapError::InvalidArgument("segment_max_rows must be > 0".into()));
        }
        fs.create_dir_all(&ctx.tablet_path)?;
        Ok(Self {
            ctx, fs,
            current: None,
            num_segments: 0, num_rows: 0,
            data_size: 0, index_size: 0, total_size: 0,
        })
    }

    pub fn rowset_id(&self) -> RowsetId { self.ctx.rowset_id }
    pub fn num_rows(&self) -> u64 { self.num_rows }

    pub fn add_row(&mut self, row: Vec<Value>) -> Result<()> {
        let writer = self.current.get_or_insert_with(|| SegmentWriter::new(&self.ctx.schema, self.ctx.segment_opts));
        writer.append_row(row)?;
        self.num_rows += 1;
        if writer.num_rows() as u64 >= self.ctx.segment_max_rows {
            self.flush()?;
        }
        Ok(())
    }

    /// 把当前 segment 写成文件
    pub fn flush(&mut self) -> Result<()> {
        let Some(writer) = self.current.take() else { return Ok(()) };
        let path = join_path(&self.ctx.tablet_path, &segment_file_name(self.ctx.rowset_id, self.num_segments));
        let mut file = self.fs.create_file(&path)?;
        let info = writer.finalize(&mut *file)?;
        file.finalize()?;

        self.num_segments += 1;
        self.data_size  += info.data_size;
        self.index_size += info.index_size;
        self.total_size += info.file_size;
        debug!(rowset_id = self.ctx.rowset_id, path, rows = info.num_rows, bytes = info.file_size, "segment written");
        Ok(())
    }

    /// 写完剩余数据，返回 Committed 状态的元数据
    pub fn build(mut self) -> Result<RowsetMeta> {
        self.flush()?;
        let ctx = &self.ctx;
        Ok(RowsetMeta {
            rowset_id:       ctx.rowset_id,
            tablet_id:       ctx.tablet_id,
            partition_id:    ctx.partition_id,
            tablet_uid:      ctx.tablet_uid,
            version:         ctx.version,
            num_rows:        self.num_rows,
            total_disk_size: self.total_size,
            data_disk_size:  self.data_size,
            index_disk_size: self.index_size,
            num_segments:    self.num_segments,
            rowset_type:     RowsetType::Beta,
            state:           RowsetState::Committed,
            resource_id:     String::new(),
            creation_time:   std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0),
            empty:           self.num_rows == 0,
        })
    }
}
