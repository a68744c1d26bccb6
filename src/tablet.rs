//! Tablet 运行时状态（Version Graph + Tablet 句柄 + TabletManager）
//!
//! 锁的划分：
//!   - `inner`（RwLock）：TabletMeta 结构、rowset 句柄表、version 图
//!   - DeleteBitmap 自带锁，与 `inner` 独立
//!   - `publish_lock`（Mutex）：串行化所有 meta 修改（publish、compaction 提交、
//!     状态迁移、stale 清理），保证 merge-on-write 计算期间 active rowset 集合不变
//!
//! meta 修改先作用在 `TabletMeta::fork` 出的副本上，副本落盘成功后才装回 `inner`；
//! 落盘失败时内存状态保持原样。持 `inner` 锁期间不做文件 I/O。

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use roaring::RoaringBitmap;
use tracing::{debug, info};

use crate::common::{KeysType, OlapError, Result, RowsetId, SchemaHash, SegmentId, TabletId, TabletState, Version};
use crate::delete_bitmap::DeleteBitmap;
use crate::index::{encode_key, EncodedKey};
use crate::io::{join_path, FileSystemPtr};
use crate::mem_tracker::MemTrackerPtr;
use crate::predicate::DeletePredicate;
use crate::rowset::{Rowset, RowsetMeta, RowsetSharedPtr, RowsetState};
use crate::schema::TabletSchema;
use crate::segment_iterator::ReadOptions;
use crate::tablet_meta::TabletMeta;

// ── Version 图 ────────────────────────────────────────────────────────────────
//
// 有向图：每条边 start → end 代表一个覆盖 [start,end] 的 Rowset（active 或 stale）。
// 支持：
//   • 检测版本空洞（O(V+E) BFS）
//   • 找出覆盖 [lo,hi] 的最少 Rowset 路径

#[derive(Debug, Default)]
pub struct VersionGraph {
    // start_version → { end_version, ... }
    adj: HashMap<i64, HashSet<i64>>,
}

impl VersionGraph {
    pub fn add_edge(&mut self, v: Version) {
        self.adj.entry(v.start).or_default().insert(v.end);
    }

    pub fn remove_edge(&mut self, v: Version) {
        if let Some(ends) = self.adj.get_mut(&v.start) {
            ends.remove(&v.end);
            if ends.is_empty() {
                self.adj.remove(&v.start);
            }
        }
    }

    /// BFS 找从 lo 到 hi 的覆盖路径，返回经过的 Version 列表。
    pub fn find_covering_path(&self, lo: i64, hi: i64) -> Option<Vec<Version>> {
        let mut queue: VecDeque<(i64, Vec<Version>)> = VecDeque::new();
        queue.push_back((lo, vec![]));
        let mut visited: HashSet<i64> = HashSet::new();
        visited.insert(lo);

        while let Some((cur, path)) = queue.pop_front() {
            if let Some(ends) = self.adj.get(&cur) {
                // 优先尝试跨度最大的边
                let mut sorted: Vec<i64> = ends.iter().copied().collect();
                sorted.sort_unstable_by(|a, b| b.cmp(a));

                for &end in &sorted {
                    if end > hi {
                        continue;
                    }
                    let mut new_path = path.clone();
                    new_path.push(Version::new(cur, end));

                    if end == hi {
                        return Some(new_path);
                    }
                    if visited.insert(end + 1) {
                        queue.push_back((end + 1, new_path));
                    }
                }
            }
        }
        None
    }

    pub fn has_version_holes(&self, lo: i64, hi: i64) -> bool {
        self.find_covering_path(lo, hi).is_none()
    }
}

// ── 读快照 ────────────────────────────────────────────────────────────────────

/// 某个版本上的一致视图：持有 rowset 句柄，stale rowset 在快照释放前不会被删除
#[derive(Debug)]
pub struct ReadSnapshot {
    pub tablet_id:         TabletId,
    pub version:           i64,
    pub schema:            Arc<TabletSchema>,
    /// 按版本升序
    pub rowsets:           Vec<RowsetSharedPtr>,
    /// 只含这些 rowset 的条目
    pub delete_bitmap:     DeleteBitmap,
    /// 版本不超过读版本的 delete 谓词
    pub delete_predicates: Vec<DeletePredicate>,
}

// ── Tablet 内部状态 ───────────────────────────────────────────────────────────

pub struct TabletInner {
    pub meta:             TabletMeta,
    pub version_graph:    VersionGraph,
    rs_version_map:       HashMap<Version, RowsetSharedPtr>,
    stale_rs_version_map: HashMap<Version, RowsetSharedPtr>,
}

impl TabletInner {
    fn check_running(&self) -> Result<()> {
        match self.meta.tablet_state() {
            TabletState::Running => Ok(()),
            state => Err(OlapError::InvalidTabletState { tablet_id: self.meta.tablet_id, state }),
        }
    }

    fn next_version(&self) -> i64 {
        self.meta.max_version().map_or(0, |v| v.end + 1)
    }
}

struct TabletCore {
    tablet_id:     TabletId,
    tablet_path:   String,
    fs:            FileSystemPtr,
    mem_tracker:   MemTrackerPtr,
    sync_meta:     bool,
    delete_bitmap: Arc<DeleteBitmap>,
    inner:         RwLock<TabletInner>,
    publish_lock:  Mutex<()>,
}

// ── Tablet 句柄 ───────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Tablet(Arc<TabletCore>);

impl std::fmt::Debug for Tablet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tablet").field("tablet_id", &self.0.tablet_id).field("path", &self.0.tablet_path).finish()
    }
}

impl Tablet {
    pub fn new(
        meta:        TabletMeta,
        tablet_path: &str,
        fs:          FileSystemPtr,
        mem_tracker: MemTrackerPtr,
        sync_meta:   bool,
    ) -> Self {
        let schema = meta.schema().clone();
        let handle = |rs: &RowsetMeta| {
            Rowset::new(rs.clone(), tablet_path, schema.clone(), fs.clone(), mem_tracker.clone())
        };
        let mut version_graph = VersionGraph::default();
        let mut rs_version_map = HashMap::new();
        let mut stale_rs_version_map = HashMap::new();
        for rs in meta.all_rs_metas() {
            version_graph.add_edge(rs.version);
            rs_version_map.insert(rs.version, handle(rs));
        }
        for rs in meta.all_stale_rs_metas() {
            version_graph.add_edge(rs.version);
            stale_rs_version_map.insert(rs.version, handle(rs));
        }
        Self(Arc::new(TabletCore {
            tablet_id: meta.tablet_id,
            tablet_path: tablet_path.into(),
            fs,
            mem_tracker,
            sync_meta,
            delete_bitmap: meta.delete_bitmap().clone(),
            inner: RwLock::new(TabletInner { meta, version_graph, rs_version_map, stale_rs_version_map }),
            publish_lock: Mutex::new(()),
        }))
    }

    pub fn tablet_id(&self)   -> TabletId        { self.0.tablet_id }
    pub fn tablet_path(&self) -> &str            { &self.0.tablet_path }
    pub fn fs(&self)          -> &FileSystemPtr  { &self.0.fs }

    pub fn meta_path(&self) -> String {
        join_path(&self.0.tablet_path, &format!("{}.hdr", self.0.tablet_id))
    }

    pub fn schema_hash(&self) -> SchemaHash {
        self.0.inner.read().meta.schema_hash
    }

    pub fn schema(&self) -> Arc<TabletSchema> {
        self.0.inner.read().meta.schema().clone()
    }

    pub fn tablet_state(&self) -> TabletState {
        self.0.inner.read().meta.tablet_state()
    }

    pub fn max_version(&self) -> Option<Version> {
        self.0.inner.read().meta.max_version()
    }

    pub fn delete_bitmap(&self) -> &Arc<DeleteBitmap> { &self.0.delete_bitmap }

    /// 在读锁下访问 TabletMeta
    pub fn with_meta<R>(&self, f: impl FnOnce(&TabletMeta) -> R) -> R {
        f(&self.0.inner.read().meta)
    }

    pub(crate) fn publish_lock(&self) -> parking_lot::MutexGuard<'_, ()> {
        self.0.publish_lock.lock()
    }

    pub(crate) fn new_rowset_handle(&self, meta: RowsetMeta, schema: Arc<TabletSchema>) -> RowsetSharedPtr {
        Rowset::new(meta, &self.0.tablet_path, schema, self.0.fs.clone(), self.0.mem_tracker.clone())
    }

    // ── 持久化 ────────────────────────────────────────────────────────────────

    fn persist(&self, bytes: Vec<u8>) -> Result<()> {
        TabletMeta::save_bytes(self.0.fs.as_ref(), &self.meta_path(), &bytes, self.0.sync_meta)?;
        debug!(tablet_id = self.0.tablet_id, bytes = bytes.len(), "tablet meta saved");
        Ok(())
    }

    /// 锁内序列化，锁外写文件
    pub fn save_meta(&self) -> Result<()> {
        let _guard = self.0.publish_lock.lock();
        let bytes = self.0.inner.read().meta.serialize()?;
        self.persist(bytes)
    }

    pub fn set_state(&self, state: TabletState) -> Result<()> {
        let _guard = self.0.publish_lock.lock();
        let staged = {
            let inner = self.0.inner.read();
            let mut staged = inner.meta.fork(self.0.delete_bitmap.clone());
            staged.set_tablet_state(state)?;
            staged
        };
        self.persist(staged.serialize()?)?;
        self.0.inner.write().meta = staged;
        info!(tablet_id = self.0.tablet_id, state = %state, "tablet state persisted");
        Ok(())
    }

    /// meta 文件删除之后的最终状态，不再落盘
    pub(crate) fn mark_shutdown(&self) -> Result<()> {
        let _guard = self.0.publish_lock.lock();
        self.0.inner.write().meta.set_tablet_state(TabletState::Shutdown)
    }

    // ── 版本 ──────────────────────────────────────────────────────────────────

    /// 找出覆盖 range 的 rowset 版本路径（active 与 stale 边都参与）
    pub fn capture_consistent_versions(&self, range: Version) -> Result<Vec<Version>> {
        let inner = self.0.inner.read();
        inner.version_graph
            .find_covering_path(range.start, range.end)
            .ok_or_else(|| OlapError::MissingVersions(range.to_string()))
    }

    pub fn capture_rowsets(&self, versions: &[Version]) -> Result<Vec<RowsetSharedPtr>> {
        let inner = self.0.inner.read();
        versions.iter().map(|v| {
            inner.rs_version_map.get(v)
                .or_else(|| inner.stale_rs_version_map.get(v))
                .cloned()
                .ok_or_else(|| OlapError::MissingVersions(v.to_string()))
        }).collect()
    }

    pub fn active_rowsets(&self) -> Vec<RowsetSharedPtr> {
        let inner = self.0.inner.read();
        inner.meta.all_rs_metas().iter()
            .filter_map(|r| inner.rs_version_map.get(&r.version).cloned())
            .collect()
    }

    pub fn stale_rowsets(&self) -> Vec<RowsetSharedPtr> {
        self.0.inner.read().stale_rs_version_map.values().cloned().collect()
    }

    /// 捕获 `version` 上的读快照：rowset 句柄 + 相关 delete bitmap 子集 + delete 谓词
    pub fn capture_read_snapshot(&self, version: i64) -> Result<ReadSnapshot> {
        let (rowsets, schema, delete_predicates) = {
            let inner = self.0.inner.read();
            inner.check_running()?;
            let first = inner.meta.all_rs_metas().first()
                .map(|r| r.version.start)
                .ok_or_else(|| OlapError::MissingVersions(format!("tablet {} has no rowset", self.0.tablet_id)))?;
            let path = inner.version_graph.find_covering_path(first, version)
                .ok_or_else(|| OlapError::MissingVersions(format!("[{first},{version}]")))?;
            let rowsets = path.iter().map(|v| {
                inner.rs_version_map.get(v)
                    .or_else(|| inner.stale_rs_version_map.get(v))
                    .cloned()
                    .ok_or_else(|| OlapError::MissingVersions(v.to_string()))
            }).collect::<Result<Vec<_>>>()?;
            let preds = inner.meta.delete_predicates().iter()
                .filter(|p| p.version <= version)
                .cloned()
                .collect::<Vec<_>>();
            (rowsets, inner.meta.schema().clone(), preds)
        };

        let delete_bitmap = DeleteBitmap::new(self.0.tablet_id);
        for rs in &rowsets {
            let id = rs.rowset_id();
            delete_bitmap.merge(&self.0.delete_bitmap.subset((id, 0, 0), (id, SegmentId::MAX, u64::MAX)));
        }
        Ok(ReadSnapshot { tablet_id: self.0.tablet_id, version, schema, rowsets, delete_bitmap, delete_predicates })
    }

    // ── 写入 ──────────────────────────────────────────────────────────────────

    /// 发布一个已提交的 rowset，版本必须紧接当前最大版本
    ///
    /// unique key 表在锁外计算 merge-on-write 的删除标记，先并入 DeleteBitmap 再使 rowset 可见。
    pub fn publish_rowset(&self, rs_meta: RowsetMeta) -> Result<RowsetSharedPtr> {
        self.publish(rs_meta, None)
    }

    /// DELETE：一个（通常为空的）rowset 加一条版本等于其版本的 delete 谓词
    pub fn publish_delete(&self, rs_meta: RowsetMeta, pred: DeletePredicate) -> Result<RowsetSharedPtr> {
        self.publish(rs_meta, Some(pred))
    }

    fn publish(&self, mut rs_meta: RowsetMeta, pred: Option<DeletePredicate>) -> Result<RowsetSharedPtr> {
        let _guard = self.0.publish_lock.lock();
        let (base, mut staged) = {
            let inner = self.0.inner.read();
            inner.check_running()?;
            let expected = inner.next_version();
            if rs_meta.version.start != expected {
                return Err(if inner.rs_version_map.contains_key(&rs_meta.version) {
                    OlapError::VersionExists(rs_meta.version)
                } else {
                    OlapError::MissingVersions(format!(
                        "tablet {} expects version {expected}, got {}", self.0.tablet_id, rs_meta.version
                    ))
                });
            }
            let base: Vec<RowsetSharedPtr> = inner.meta.all_rs_metas().iter()
                .filter_map(|r| inner.rs_version_map.get(&r.version).cloned())
                .collect();
            (base, inner.meta.fork(self.0.delete_bitmap.clone()))
        };

        rs_meta.state = RowsetState::Visible;
        if let Some(pred) = pred {
            staged.add_delete_predicate(pred, rs_meta.version.end)?;
        }
        staged.add_rs_meta(rs_meta.clone())?;
        let schema = staged.schema().clone();
        let rowset = self.new_rowset_handle(rs_meta.clone(), schema.clone());

        let marks = if schema.keys_type == KeysType::Unique && rs_meta.num_rows > 0 {
            let marks = calc_delete_bitmap(&schema, &rowset, &base, &self.0.delete_bitmap)?;
            debug!(tablet_id = self.0.tablet_id, rowset_id = rowset.rowset_id(), marked = marks.cardinality(), "merge-on-write delete bitmap computed");
            let staged_bitmap = self.0.delete_bitmap.snapshot();
            staged_bitmap.merge(&marks);
            staged.set_delete_bitmap(Arc::new(staged_bitmap));
            Some(marks)
        } else {
            None
        };
        self.persist(staged.serialize()?)?;

        // 标记先于 rowset 可见，读者不会同时看到新旧两行
        if let Some(marks) = &marks {
            self.0.delete_bitmap.merge(marks);
        }
        staged.set_delete_bitmap(self.0.delete_bitmap.clone());
        {
            let mut inner = self.0.inner.write();
            inner.meta = staged;
            inner.version_graph.add_edge(rs_meta.version);
            inner.rs_version_map.insert(rs_meta.version, rowset.clone());
        }
        info!(tablet_id = self.0.tablet_id, rowset_id = rs_meta.rowset_id, version = %rs_meta.version, rows = rs_meta.num_rows, "rowset published");
        Ok(rowset)
    }

    /// 原子替换 rowset：`same_version == false` 时输入进入 stale 列表
    pub fn modify_rowsets(
        &self,
        to_add:       &[RowsetSharedPtr],
        to_delete:    &[RowsetSharedPtr],
        same_version: bool,
    ) -> Result<()> {
        let _guard = self.0.publish_lock.lock();
        self.swap_rowsets(to_add, to_delete, same_version, None)
    }

    /// compaction 提交：替换 rowset，并在同一次落盘里移除 `retired` 内的 delete 谓词
    ///
    /// 调用方持有 `publish_lock`。
    pub(crate) fn swap_rowsets(
        &self,
        to_add:       &[RowsetSharedPtr],
        to_delete:    &[RowsetSharedPtr],
        same_version: bool,
        retired:      Option<Version>,
    ) -> Result<()> {
        let add_metas: Vec<RowsetMeta> = to_add.iter().map(|r| r.meta().clone()).collect();
        let del_metas: Vec<RowsetMeta> = to_delete.iter().map(|r| r.meta().clone()).collect();
        let mut staged = self.0.inner.read().meta.fork(self.0.delete_bitmap.clone());
        staged.modify_rs_metas(&add_metas, &del_metas, same_version)?;
        if let Some(range) = retired {
            staged.remove_delete_predicate_by_version(range);
        }
        self.persist(staged.serialize()?)?;

        {
            let mut inner = self.0.inner.write();
            inner.meta = staged;
            for rs in to_delete {
                let v = rs.version();
                if let Some(handle) = inner.rs_version_map.remove(&v) {
                    if same_version {
                        inner.version_graph.remove_edge(v);
                        handle.mark_pending_removal();
                    } else {
                        inner.stale_rs_version_map.insert(v, handle);
                    }
                }
            }
            for rs in to_add {
                inner.version_graph.add_edge(rs.version());
                inner.rs_version_map.insert(rs.version(), rs.clone());
            }
        }
        info!(
            tablet_id = self.0.tablet_id,
            added = ?to_add.iter().map(|r| r.version()).collect::<Vec<_>>(),
            removed = ?to_delete.iter().map(|r| r.version()).collect::<Vec<_>>(),
            same_version,
            retired = ?retired,
            "rowsets swapped"
        );
        Ok(())
    }

    /// 清理只被 tablet 自己引用的 stale rowset，返回清理个数
    ///
    /// 仍被读快照引用的 stale rowset 保留到下一次清理。
    pub fn delete_expired_stale_rowsets(&self) -> Result<usize> {
        let _guard = self.0.publish_lock.lock();
        // 先从句柄表摘下，之后不会再有新的读者拿到它们
        let (expired, mut staged) = {
            let mut inner = self.0.inner.write();
            let versions: Vec<Version> = inner.stale_rs_version_map.iter()
                .filter(|(_, rs)| Arc::strong_count(rs) == 1)
                .map(|(v, _)| *v)
                .collect();
            if versions.is_empty() {
                return Ok(0);
            }
            let mut staged = inner.meta.fork(self.0.delete_bitmap.clone());
            let mut expired = Vec::with_capacity(versions.len());
            for v in versions {
                if let Some(rs) = inner.stale_rs_version_map.remove(&v) {
                    staged.delete_stale_rs_meta_by_version(v);
                    if !inner.rs_version_map.contains_key(&v) {
                        inner.version_graph.remove_edge(v);
                    }
                    expired.push(rs);
                }
            }
            (expired, staged)
        };

        let staged_bitmap = self.0.delete_bitmap.snapshot();
        for rs in &expired {
            staged_bitmap.remove_rowset(rs.rowset_id());
        }
        staged.set_delete_bitmap(Arc::new(staged_bitmap));
        if let Err(e) = staged.serialize().and_then(|bytes| self.persist(bytes)) {
            let mut inner = self.0.inner.write();
            for rs in expired {
                inner.version_graph.add_edge(rs.version());
                inner.stale_rs_version_map.insert(rs.version(), rs);
            }
            return Err(e);
        }

        for rs in &expired {
            self.0.delete_bitmap.remove_rowset(rs.rowset_id());
        }
        staged.set_delete_bitmap(self.0.delete_bitmap.clone());
        self.0.inner.write().meta = staged;

        let n = expired.len();
        let ids: Vec<RowsetId> = expired.iter().map(|r| r.rowset_id()).collect();
        // 最后一个引用，Drop 时删除文件
        for rs in expired {
            rs.mark_pending_removal();
        }
        info!(tablet_id = self.0.tablet_id, removed = n, rowsets = ?ids, "stale rowsets swept");
        Ok(n)
    }

    /// 摘下全部 rowset 句柄并标记待删除，返回仍被外部引用的个数
    ///
    /// 没有外部引用的 rowset 在此处 Drop 时即删除文件；其余的随最后一个读快照释放。
    pub(crate) fn retire_all_rowsets(&self) -> usize {
        let _guard = self.0.publish_lock.lock();
        let handles: Vec<RowsetSharedPtr> = {
            let mut inner = self.0.inner.write();
            inner.version_graph = VersionGraph::default();
            let mut handles: Vec<_> = inner.rs_version_map.drain().map(|(_, rs)| rs).collect();
            handles.extend(inner.stale_rs_version_map.drain().map(|(_, rs)| rs));
            handles
        };
        let mut held = 0;
        for rs in handles {
            rs.mark_pending_removal();
            if Arc::strong_count(&rs) > 1 {
                held += 1;
            }
        }
        if held > 0 {
            info!(tablet_id = self.0.tablet_id, held, "rowset files kept until readers release them");
        }
        held
    }
}

// ── merge-on-write ────────────────────────────────────────────────────────────

type RowLocation = (RowsetId, SegmentId, u32);

fn key_columns_options(schema: &TabletSchema, deleted_rows: Option<RoaringBitmap>) -> ReadOptions {
    ReadOptions {
        return_columns: schema.key_columns().map(|c| c.unique_id).collect(),
        deleted_rows,
        ..Default::default()
    }
}

/// 计算新 rowset 带来的删除标记
///
/// 同一 key 在更早 rowset 中仍存活的行，在 `(旧 rowset, 旧 segment, 新版本)` 上标记删除；
/// 同一批导入内重复的 key 只保留最后一行。
fn calc_delete_bitmap(
    schema:        &TabletSchema,
    rowset:        &RowsetSharedPtr,
    base:          &[RowsetSharedPtr],
    delete_bitmap: &DeleteBitmap,
) -> Result<DeleteBitmap> {
    let version = rowset.version().end as u64;
    let mut live: HashMap<EncodedKey, RowLocation> = HashMap::new();

    for rs in base {
        for seg in rs.load_segments()? {
            let deleted = delete_bitmap.aggregate_upto(rs.rowset_id(), seg.id(), version);
            let opts = key_columns_options(schema, (!deleted.is_empty()).then_some(deleted));
            let mut it = seg.new_iterator(schema, opts)?;
            while let Some(block) = it.next_block()? {
                for (i, row) in block.rows().enumerate() {
                    live.insert(encode_key(&row), (rs.rowset_id(), seg.id(), block.row_ids[i]));
                }
            }
        }
    }

    let marks = DeleteBitmap::new(delete_bitmap.tablet_id());
    for seg in rowset.load_segments()? {
        let mut it = seg.new_iterator(schema, key_columns_options(schema, None))?;
        while let Some(block) = it.next_block()? {
            for (i, row) in block.rows().enumerate() {
                let loc = (rowset.rowset_id(), seg.id(), block.row_ids[i]);
                if let Some((rs_id, seg_id, row_id)) = live.insert(encode_key(&row), loc) {
                    marks.add((rs_id, seg_id, version), row_id);
                }
            }
        }
    }
    Ok(marks)
}

// ── Tablet 分片注册表 ─────────────────────────────────────────────────────────

const NUM_SHARDS: usize = 64;

struct Shard {
    tablets: HashMap<TabletId, Tablet>,
}

/// 分片 Tablet 注册表
///
/// 使用 64 个 RwLock Shard 降低读写竞争。
pub struct TabletManager {
    shards: Vec<RwLock<Shard>>,
}

impl TabletManager {
    pub fn new() -> Self {
        let shards = (0..NUM_SHARDS)
            .map(|_| RwLock::new(Shard { tablets: HashMap::new() }))
            .collect();
        Self { shards }
    }

    fn shard(&self, tablet_id: TabletId) -> &RwLock<Shard> {
        &self.shards[(tablet_id as usize) % NUM_SHARDS]
    }

    pub fn add_tablet(&self, tablet: Tablet) -> Result<Tablet> {
        let tablet_id = tablet.tablet_id();
        let mut shard = self.shard(tablet_id).write();
        if shard.tablets.contains_key(&tablet_id) {
            return Err(OlapError::TabletExists(tablet_id));
        }
        shard.tablets.insert(tablet_id, tablet.clone());
        Ok(tablet)
    }

    pub fn get_tablet(&self, tablet_id: TabletId) -> Result<Tablet> {
        self.shard(tablet_id)
            .read()
            .tablets.get(&tablet_id)
            .cloned()
            .ok_or(OlapError::TabletNotFound(tablet_id))
    }

    pub fn contains(&self, tablet_id: TabletId) -> bool {
        self.shard(tablet_id).read().tablets.contains_key(&tablet_id)
    }

    pub fn remove_tablet(&self, tablet_id: TabletId) -> Result<Tablet> {
        self.shard(tablet_id)
            .write()
            .tablets.remove(&tablet_id)
            .ok_or(OlapError::TabletNotFound(tablet_id))
    }

    pub fn tablet_count(&self) -> usize {
        self.shards.iter().map(|s| s.read().tablets.len()).sum()
    }

    pub fn all_tablets(&self) -> Vec<Tablet> {
        self.shards.iter().flat_map(|s| s.read().tablets.values().cloned().collect::<Vec<_>>()).collect()
    }
}

impl Default for TabletManager {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{AggregateType, ColumnType};
    use crate::field_type::Value;
    use crate::io::{FileReader, FileSystem, FileWriter, MemoryFileSystem};
    use crate::predicate::{CompareOp, DeleteCondition};
    use crate::reader::TabletReader;
    use crate::rowset::{RowsetWriter, RowsetWriterContext};
    use crate::schema::TabletColumn;
    use crate::segment::SegmentWriterOptions;
    use std::sync::atomic::{AtomicBool, Ordering};
    use test_log::test;

    /// 打开 `disk_full` 后，meta 的临时文件创建失败
    #[derive(Debug, Default)]
    struct FlakyFileSystem {
        inner:     MemoryFileSystem,
        disk_full: AtomicBool,
    }

    impl FlakyFileSystem {
        fn set_disk_full(&self, on: bool) {
            self.disk_full.store(on, Ordering::SeqCst);
        }
    }

    impl FileSystem for FlakyFileSystem {
        fn open_file(&self, path: &str) -> Result<Arc<dyn FileReader>> { self.inner.open_file(path) }

        fn create_file(&self, path: &str) -> Result<Box<dyn FileWriter>> {
            if path.ends_with(".tmp") && self.disk_full.load(Ordering::SeqCst) {
                return Err(OlapError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full")));
            }
            self.inner.create_file(path)
        }

        fn rename(&self, from: &str, to: &str) -> Result<()> { self.inner.rename(from, to) }
        fn delete_file(&self, path: &str) -> Result<()> { self.inner.delete_file(path) }
        fn exists(&self, path: &str) -> Result<bool> { self.inner.exists(path) }
        fn list_dir(&self, dir: &str) -> Result<Vec<String>> { self.inner.list_dir(dir) }
        fn create_dir_all(&self, dir: &str) -> Result<()> { self.inner.create_dir_all(dir) }
        fn delete_dir_all(&self, dir: &str) -> Result<()> { self.inner.delete_dir_all(dir) }
    }

    #[test]
    fn covering_path_prefers_wide_edges() {
        let mut g = VersionGraph::default();
        for v in [Version::new(0, 1), Version::point(2), Version::point(3), Version::new(2, 3), Version::point(4)] {
            g.add_edge(v);
        }
        assert_eq!(g.find_covering_path(0, 4).unwrap(), vec![Version::new(0, 1), Version::new(2, 3), Version::point(4)]);
        assert_eq!(g.find_covering_path(0, 2).unwrap(), vec![Version::new(0, 1), Version::point(2)]);
        g.remove_edge(Version::point(4));
        assert!(g.has_version_holes(0, 4));
        assert!(!g.has_version_holes(0, 3));
    }

    fn unique_schema() -> TabletSchema {
        TabletSchema::new(KeysType::Unique, vec![
            TabletColumn::key(0, "k", ColumnType::Int64),
            TabletColumn::value(1, "v", ColumnType::Int32, AggregateType::Replace),
        ])
    }

    fn running_tablet<F: FileSystem + 'static>(fs: &Arc<F>, schema: TabletSchema) -> Tablet {
        let mut meta = TabletMeta::new(1, 1, 42, 1, schema);
        meta.set_tablet_state(TabletState::Running).unwrap();
        meta.add_rs_meta(RowsetMeta::new(1, 42, Version::new(0, 1))).unwrap();
        Tablet::new(meta, "data/42", fs.clone(), crate::mem_tracker::noop(), false)
    }

    fn write_rowset<F: FileSystem + 'static>(fs: &Arc<F>, tablet: &Tablet, id: RowsetId, version: i64, rows: &[(i64, i32)]) -> RowsetMeta {
        let ctx = RowsetWriterContext {
            rowset_id:        id,
            tablet_id:        42,
            partition_id:     1,
            tablet_uid:       tablet.with_meta(|m| m.tablet_uid()),
            version:          Version::point(version),
            tablet_path:      "data/42".into(),
            schema:           tablet.schema(),
            segment_opts:     SegmentWriterOptions::default(),
            segment_max_rows: 1000,
        };
        let mut w = RowsetWriter::new(ctx, fs.clone()).unwrap();
        for &(k, v) in rows {
            w.add_row(vec![Value::Int64(k), Value::Int32(v)]).unwrap();
        }
        w.build().unwrap()
    }

    fn keys_at(tablet: &Tablet, version: i64) -> Vec<i64> {
        let snapshot = tablet.capture_read_snapshot(version).unwrap();
        let mut keys: Vec<i64> = TabletReader::new(snapshot, vec![0], vec![])
            .read_all()
            .unwrap()
            .iter()
            .flat_map(|b| b.rows().map(|r| r[0].as_i64().unwrap()).collect::<Vec<_>>())
            .collect();
        keys.sort();
        keys
    }

    #[test]
    fn publish_requires_next_version_and_running() {
        let fs = Arc::new(MemoryFileSystem::new());
        let tablet = running_tablet(&fs, unique_schema());
        let rs = write_rowset(&fs, &tablet, 2, 3, &[(1, 1)]);
        assert!(matches!(tablet.publish_rowset(rs), Err(OlapError::MissingVersions(_))));

        let rs = write_rowset(&fs, &tablet, 3, 2, &[(1, 1)]);
        tablet.publish_rowset(rs.clone()).unwrap();
        assert_eq!(tablet.max_version(), Some(Version::point(2)));
        assert!(fs.exists(&tablet.meta_path()).unwrap());

        tablet.set_state(TabletState::Tombstoned).unwrap();
        let rs = write_rowset(&fs, &tablet, 4, 3, &[(2, 2)]);
        assert!(matches!(tablet.publish_rowset(rs), Err(OlapError::InvalidTabletState { .. })));
        let reloaded = TabletMeta::create_from_file(fs.as_ref(), &tablet.meta_path()).unwrap();
        assert_eq!(reloaded.tablet_state(), TabletState::Tombstoned);
    }

    #[test]
    fn merge_on_write_marks_older_rows() {
        let fs = Arc::new(MemoryFileSystem::new());
        let tablet = running_tablet(&fs, unique_schema());
        let r2 = write_rowset(&fs, &tablet, 2, 2, &[(1, 10), (2, 20), (3, 30)]);
        tablet.publish_rowset(r2).unwrap();
        // 同批次里 key 4 重复，保留后一行
        let r3 = write_rowset(&fs, &tablet, 3, 3, &[(2, 21), (4, 40), (4, 41)]);
        tablet.publish_rowset(r3).unwrap();

        let dbm = tablet.delete_bitmap();
        assert!(dbm.contains((2, 0, 3), 1));
        assert!(dbm.contains((3, 0, 3), 1));
        assert_eq!(dbm.cardinality(), 2);

        let r4 = write_rowset(&fs, &tablet, 4, 4, &[(2, 22)]);
        tablet.publish_rowset(r4).unwrap();
        assert!(dbm.contains((3, 0, 4), 0));
        // 已在版本 3 删除的旧行不会被重复标记
        assert!(!dbm.contains((2, 0, 4), 1));
    }

    #[test]
    fn stale_rowsets_live_while_snapshot_holds_them() {
        let fs = Arc::new(MemoryFileSystem::new());
        let tablet = running_tablet(&fs, unique_schema());
        let r2 = tablet.publish_rowset(write_rowset(&fs, &tablet, 2, 2, &[(1, 1)])).unwrap();
        let r3 = tablet.publish_rowset(write_rowset(&fs, &tablet, 3, 3, &[(2, 2)])).unwrap();
        let snapshot = tablet.capture_read_snapshot(3).unwrap();
        assert_eq!(snapshot.rowsets.len(), 3);

        let mut merged = write_rowset(&fs, &tablet, 9, 2, &[(1, 1), (2, 2)]);
        merged.version = Version::new(2, 3);
        let merged = tablet.new_rowset_handle(merged, tablet.schema());
        tablet.modify_rowsets(&[merged], &[r2.clone(), r3.clone()], false).unwrap();
        drop((r2, r3));

        assert_eq!(tablet.capture_consistent_versions(Version::new(0, 3)).unwrap(),
                   vec![Version::new(0, 1), Version::new(2, 3)]);
        // 快照仍持有 [2,2] 与 [3,3]
        assert_eq!(tablet.delete_expired_stale_rowsets().unwrap(), 0);
        assert!(fs.exists("data/42/2_0.seg").unwrap());

        drop(snapshot);
        assert_eq!(tablet.delete_expired_stale_rowsets().unwrap(), 2);
        assert!(!fs.exists("data/42/2_0.seg").unwrap());
        assert!(tablet.stale_rowsets().is_empty());
        assert!(tablet.with_meta(|m| m.all_stale_rs_metas().is_empty()));
    }

    #[test]
    fn rejected_delete_leaves_no_marks() {
        let fs = Arc::new(MemoryFileSystem::new());
        let tablet = running_tablet(&fs, unique_schema());
        tablet.publish_rowset(write_rowset(&fs, &tablet, 2, 2, &[(1, 1), (2, 2)])).unwrap();

        let bad = DeletePredicate::new(vec![DeleteCondition::new("nope", CompareOp::Eq, &["1"])]);
        let r3 = write_rowset(&fs, &tablet, 3, 3, &[(1, 10)]);
        assert!(matches!(tablet.publish_delete(r3, bad), Err(OlapError::SchemaMismatch(_))));
        assert!(tablet.delete_bitmap().is_empty());
        assert_eq!(tablet.max_version(), Some(Version::point(2)));
        assert!(tablet.with_meta(|m| m.delete_predicates().is_empty()));

        tablet.publish_rowset(write_rowset(&fs, &tablet, 4, 3, &[(9, 9)])).unwrap();
        assert_eq!(keys_at(&tablet, 3), vec![1, 2, 9]);
    }

    #[test]
    fn failed_publish_is_not_visible() {
        let fs = Arc::new(FlakyFileSystem::default());
        let tablet = running_tablet(&fs, unique_schema());
        tablet.publish_rowset(write_rowset(&fs, &tablet, 2, 2, &[(1, 1), (2, 2)])).unwrap();
        let on_disk = fs.inner.get(&tablet.meta_path()).unwrap();

        let r3 = write_rowset(&fs, &tablet, 3, 3, &[(1, 10)]);
        fs.set_disk_full(true);
        assert!(matches!(tablet.publish_rowset(r3.clone()), Err(OlapError::Io(_))));
        assert_eq!(tablet.max_version(), Some(Version::point(2)));
        assert_eq!(tablet.active_rowsets().len(), 2);
        assert!(tablet.delete_bitmap().is_empty());
        assert_eq!(fs.inner.get(&tablet.meta_path()).unwrap(), on_disk);
        assert!(!fs.exists(&format!("{}.tmp", tablet.meta_path())).unwrap());

        fs.set_disk_full(false);
        tablet.publish_rowset(r3).unwrap();
        assert!(tablet.delete_bitmap().contains((2, 0, 3), 0));
        assert_eq!(keys_at(&tablet, 3), vec![1, 2]);
        let reloaded = TabletMeta::create_from_file(fs.as_ref(), &tablet.meta_path()).unwrap();
        assert_eq!(reloaded.max_version(), Some(Version::point(3)));
        assert!(reloaded.delete_bitmap().contains((2, 0, 3), 0));
    }

    #[test]
    fn failed_state_change_keeps_old_state() {
        let fs = Arc::new(FlakyFileSystem::default());
        let tablet = running_tablet(&fs, unique_schema());
        fs.set_disk_full(true);
        assert!(matches!(tablet.set_state(TabletState::Tombstoned), Err(OlapError::Io(_))));
        assert_eq!(tablet.tablet_state(), TabletState::Running);

        fs.set_disk_full(false);
        tablet.set_state(TabletState::Tombstoned).unwrap();
        assert_eq!(tablet.tablet_state(), TabletState::Tombstoned);
    }

    #[test]
    fn failed_swap_keeps_inputs_active() {
        let fs = Arc::new(FlakyFileSystem::default());
        let tablet = running_tablet(&fs, unique_schema());
        let r2 = tablet.publish_rowset(write_rowset(&fs, &tablet, 2, 2, &[(1, 1)])).unwrap();
        let r3 = tablet.publish_rowset(write_rowset(&fs, &tablet, 3, 3, &[(2, 2)])).unwrap();
        let mut merged = write_rowset(&fs, &tablet, 9, 2, &[(1, 1), (2, 2)]);
        merged.version = Version::new(2, 3);
        let merged = tablet.new_rowset_handle(merged, tablet.schema());

        fs.set_disk_full(true);
        let err = tablet.modify_rowsets(&[merged.clone()], &[r2.clone(), r3.clone()], false);
        assert!(matches!(err, Err(OlapError::Io(_))));
        assert_eq!(tablet.capture_consistent_versions(Version::new(0, 3)).unwrap(),
                   vec![Version::new(0, 1), Version::point(2), Version::point(3)]);
        assert_eq!(tablet.active_rowsets().len(), 3);
        assert!(tablet.stale_rowsets().is_empty());
        assert!(tablet.with_meta(|m| m.all_stale_rs_metas().is_empty()));

        fs.set_disk_full(false);
        tablet.modify_rowsets(&[merged], &[r2, r3], false).unwrap();
        assert_eq!(tablet.stale_rowsets().len(), 2);
    }

    #[test]
    fn failed_sweep_keeps_stale_rowsets() {
        let fs = Arc::new(FlakyFileSystem::default());
        let tablet = running_tablet(&fs, unique_schema());
        let r2 = tablet.publish_rowset(write_rowset(&fs, &tablet, 2, 2, &[(1, 1)])).unwrap();
        let r3 = tablet.publish_rowset(write_rowset(&fs, &tablet, 3, 3, &[(1, 2)])).unwrap();
        let mut merged = write_rowset(&fs, &tablet, 9, 2, &[(1, 2)]);
        merged.version = Version::new(2, 3);
        let merged = tablet.new_rowset_handle(merged, tablet.schema());
        tablet.modify_rowsets(&[merged], &[r2.clone(), r3.clone()], false).unwrap();
        drop((r2, r3));
        assert!(tablet.delete_bitmap().contains((2, 0, 3), 0));

        fs.set_disk_full(true);
        assert!(matches!(tablet.delete_expired_stale_rowsets(), Err(OlapError::Io(_))));
        assert_eq!(tablet.stale_rowsets().len(), 2);
        assert_eq!(tablet.with_meta(|m| m.all_stale_rs_metas().len()), 2);
        assert!(tablet.delete_bitmap().contains((2, 0, 3), 0));
        assert!(fs.exists("data/42/2_0.seg").unwrap());
        assert_eq!(tablet.capture_rowsets(&[Version::point(2)]).unwrap().len(), 1);

        fs.set_disk_full(false);
        assert_eq!(tablet.delete_expired_stale_rowsets().unwrap(), 2);
        assert!(!fs.exists("data/42/2_0.seg").unwrap());
        assert!(tablet.delete_bitmap().is_empty());
    }

    #[test]
    fn retired_rowsets_outlive_their_readers() {
        let fs = Arc::new(MemoryFileSystem::new());
        let tablet = running_tablet(&fs, unique_schema());
        tablet.publish_rowset(write_rowset(&fs, &tablet, 2, 2, &[(1, 1)])).unwrap();
        tablet.publish_rowset(write_rowset(&fs, &tablet, 3, 3, &[(2, 2)])).unwrap();
        let snapshot = tablet.capture_read_snapshot(3).unwrap();

        tablet.set_state(TabletState::Stopped).unwrap();
        assert_eq!(tablet.retire_all_rowsets(), 3);
        assert!(tablet.active_rowsets().is_empty());
        assert!(fs.exists("data/42/3_0.seg").unwrap());

        let rows: usize = TabletReader::new(snapshot, vec![0], vec![])
            .read_all()
            .unwrap()
            .iter()
            .map(|b| b.rows().count())
            .sum();
        assert_eq!(rows, 2);
        assert!(!fs.exists("data/42/2_0.seg").unwrap());
        assert!(!fs.exists("data/42/3_0.seg").unwrap());
    }

    #[test]
    fn manager_rejects_duplicates() {
        let fs = Arc::new(MemoryFileSystem::new());
        let mgr = TabletManager::new();
        mgr.add_tablet(running_tablet(&fs, unique_schema())).unwrap();
        assert!(matches!(mgr.add_tablet(running_tablet(&fs, unique_schema())), Err(OlapError::TabletExists(42))));
        assert_eq!(mgr.tablet_count(), 1);
        assert!(mgr.get_tablet(42).is_ok());
        mgr.remove_tablet(42).unwrap();
        assert!(matches!(mgr.get_tablet(42), Err(OlapError::TabletNotFound(42))));
    }
}
