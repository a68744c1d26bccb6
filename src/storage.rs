//! 顶层存储协调器
//!
//! 磁盘布局：
//!   {data_dir}/{tablet_id}/{tablet_id}.hdr          TabletMeta
//!   {data_dir}/{tablet_id}/{rowset_id}_{seg}.seg    Segment 文件

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::common::{
    OlapError, PartitionId, ReplicaId, Result, RowsetId, SegmentId, StorageMedium, TableId, TabletId,
    TabletState, Version,
};
use crate::compaction::{Compaction, DeletePredicatePolicy, RetainDeletePredicates};
use crate::config::StorageConfig;
use crate::io::{join_path, FileSystemPtr};
use crate::mem_tracker::MemTrackerPtr;
use crate::predicate::DeletePredicate;
use crate::rowset::{segment_file_name, RowsetIdGenerator, RowsetMeta, RowsetSharedPtr, RowsetState, RowsetWriter, RowsetWriterContext};
use crate::schema::TabletSchema;
use crate::segment::SegmentWriterOptions;
use crate::tablet::{Tablet, TabletManager};
use crate::tablet_meta::TabletMeta;

/// 创建 tablet 的参数
#[derive(Debug, Clone)]
pub struct CreateTabletRequest {
    pub table_id:       TableId,
    pub partition_id:   PartitionId,
    pub tablet_id:      TabletId,
    pub replica_id:     ReplicaId,
    pub schema:         TabletSchema,
    pub storage_medium: StorageMedium,
}

/// 单节点 OLAP 存储引擎
pub struct StorageEngine {
    config:           StorageConfig,
    fs:               FileSystemPtr,
    mem_tracker:      MemTrackerPtr,
    tablet_manager:   TabletManager,
    rowset_id_gen:    RowsetIdGenerator,
    predicate_policy: Arc<dyn DeletePredicatePolicy>,
}

impl StorageEngine {
    /// 打开数据目录并恢复其中所有 tablet
    pub fn open(config: StorageConfig, fs: FileSystemPtr, mem_tracker: MemTrackerPtr) -> Result<Self> {
        config.validate()?;
        fs.create_dir_all(&config.data_dir)?;
        let engine = Self {
            config,
            fs,
            mem_tracker,
            tablet_manager:   TabletManager::new(),
            rowset_id_gen:    RowsetIdGenerator::default(),
            predicate_policy: Arc::new(RetainDeletePredicates),
        };
        engine.load_tablets()?;
        info!(data_dir = %engine.config.data_dir, tablets = engine.tablet_count(), "storage engine opened");
        Ok(engine)
    }

    pub fn with_predicate_policy(mut self, policy: Arc<dyn DeletePredicatePolicy>) -> Self {
        self.predicate_policy = policy;
        self
    }

    pub fn config(&self) -> &StorageConfig { &self.config }

    fn load_tablets(&self) -> Result<()> {
        for name in self.fs.list_dir(&self.config.data_dir)? {
            let Ok(tablet_id) = name.parse::<TabletId>() else { continue };
            let dir = self.tablet_path(tablet_id);

            // 上次保存中途退出留下的临时文件
            for file in self.fs.list_dir(&dir)? {
                if file.ends_with(".tmp") {
                    let path = join_path(&dir, &file);
                    match self.fs.delete_file(&path) {
                        Ok(()) => info!(path, "removed leftover temp file"),
                        Err(e) => warn!(path, error = %e, "failed to remove leftover temp file"),
                    }
                }
            }

            let meta_path = join_path(&dir, &format!("{tablet_id}.hdr"));
            if !self.fs.exists(&meta_path)? {
                // 删除中途退出的 tablet，或建到一半的目录
                match self.fs.delete_dir_all(&dir) {
                    Ok(()) => warn!(tablet_id, dir, "tablet dir without meta removed"),
                    Err(e) => warn!(tablet_id, dir, error = %e, "failed to remove tablet dir without meta"),
                }
                continue;
            }
            let meta = match TabletMeta::create_from_file(self.fs.as_ref(), &meta_path) {
                Ok(meta) => meta,
                Err(e) if e.is_corruption() => {
                    error!(tablet_id, path = meta_path, error = %e, "corrupted tablet meta, skipped");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if meta.tablet_state() == TabletState::Shutdown {
                continue;
            }
            for rs in meta.all_rs_metas().iter().chain(meta.all_stale_rs_metas()) {
                self.rowset_id_gen.observe(rs.rowset_id);
            }
            let tablet = Tablet::new(meta, &dir, self.fs.clone(), self.mem_tracker.clone(), self.config.sync_meta);
            self.tablet_manager.add_tablet(tablet)?;
        }
        Ok(())
    }

    // ── Tablet 生命周期 ───────────────────────────────────────────────────────

    /// 创建 tablet：带一个空的初始 rowset [0,1]，状态为 RUNNING
    pub fn create_tablet(&self, req: CreateTabletRequest) -> Result<Tablet> {
        if self.tablet_manager.contains(req.tablet_id) {
            return Err(OlapError::TabletExists(req.tablet_id));
        }
        req.schema.validate()?;
        let dir = self.tablet_path(req.tablet_id);
        self.fs.create_dir_all(&dir)?;

        let mut meta = TabletMeta::new(req.table_id, req.partition_id, req.tablet_id, req.replica_id, req.schema);
        meta.set_storage_medium(req.storage_medium);
        let mut init = RowsetMeta::new(self.rowset_id_gen.next_id(), req.tablet_id, Version::new(0, 1));
        init.partition_id = req.partition_id;
        init.tablet_uid = meta.tablet_uid();
        init.state = RowsetState::Visible;
        meta.add_rs_meta(init)?;
        meta.set_tablet_state(TabletState::Running)?;

        let tablet = Tablet::new(meta, &dir, self.fs.clone(), self.mem_tracker.clone(), self.config.sync_meta);
        tablet.save_meta()?;
        self.tablet_manager.add_tablet(tablet.clone())?;
        info!(tablet_id = req.tablet_id, partition_id = req.partition_id, "tablet created");
        Ok(tablet)
    }

    pub fn get_tablet(&self, tablet_id: TabletId) -> Result<Tablet> {
        self.tablet_manager.get_tablet(tablet_id)
    }

    /// 删除 tablet：STOPPED 落盘 → 从注册表移除 → 删除 meta 文件 → SHUTDOWN
    ///
    /// segment 文件随 rowset 句柄释放而删除；仍有读快照引用时，文件保留到快照释放，
    /// 目录留给下次启动时清理。
    pub fn drop_tablet(&self, tablet_id: TabletId) -> Result<()> {
        let tablet = self.tablet_manager.get_tablet(tablet_id)?;
        if tablet.tablet_state() != TabletState::Stopped {
            tablet.set_state(TabletState::Stopped)?;
        }
        self.tablet_manager.remove_tablet(tablet_id)?;
        self.fs.delete_file(&tablet.meta_path())?;
        // meta 已删除，SHUTDOWN 只在内存中生效
        tablet.mark_shutdown()?;
        if tablet.retire_all_rowsets() == 0 {
            self.fs.delete_dir_all(tablet.tablet_path())?;
        }
        info!(tablet_id, "tablet dropped");
        Ok(())
    }

    /// 标记 tablet 数据不完整，停止接收请求
    pub fn tombstone_tablet(&self, tablet_id: TabletId) -> Result<()> {
        self.tablet_manager.get_tablet(tablet_id)?.set_state(TabletState::Tombstoned)
    }

    // ── 写入 ──────────────────────────────────────────────────────────────────

    pub fn new_rowset_writer(&self, tablet_id: TabletId, version: Version) -> Result<RowsetWriter> {
        let tablet = self.tablet_manager.get_tablet(tablet_id)?;
        let (partition_id, tablet_uid) = tablet.with_meta(|m| (m.partition_id(), m.tablet_uid()));
        let ctx = RowsetWriterContext {
            rowset_id:        self.rowset_id_gen.next_id(),
            tablet_id,
            partition_id,
            tablet_uid,
            version,
            tablet_path:      tablet.tablet_path().into(),
            schema:           tablet.schema(),
            segment_opts:     SegmentWriterOptions::from(&self.config),
            segment_max_rows: self.config.segment_max_rows,
        };
        RowsetWriter::new(ctx, self.fs.clone())
    }

    /// 将一个已提交的 Rowset 发布到对应 Tablet（Load 完成后调用）
    pub fn publish_rowset(&self, tablet_id: TabletId, rowset: RowsetMeta) -> Result<RowsetSharedPtr> {
        self.tablet_manager.get_tablet(tablet_id)?.publish_rowset(rowset)
    }

    /// DELETE：在下一个版本上发布空 rowset 与 delete 谓词
    pub fn delete(&self, tablet_id: TabletId, pred: DeletePredicate) -> Result<RowsetSharedPtr> {
        let tablet = self.tablet_manager.get_tablet(tablet_id)?;
        let version = tablet.max_version().map_or(0, |v| v.end + 1);
        let rs_meta = self.new_rowset_writer(tablet_id, Version::point(version))?.build()?;
        tablet.publish_delete(rs_meta, pred)
    }

    // ── Compaction ────────────────────────────────────────────────────────────

    pub fn compact(&self, tablet_id: TabletId, version: Version) -> Result<RowsetSharedPtr> {
        let tablet = self.tablet_manager.get_tablet(tablet_id)?;
        Compaction::new(tablet, version)
            .with_writer_options(SegmentWriterOptions::from(&self.config), self.config.segment_max_rows)
            .with_policy(self.predicate_policy.clone())
            .execute(&self.rowset_id_gen)
    }

    /// 清理所有 tablet 中不再被引用的 stale rowset
    pub fn sweep_stale_rowsets(&self) -> Result<usize> {
        let mut total = 0;
        for tablet in self.tablet_manager.all_tablets() {
            total += tablet.delete_expired_stale_rowsets()?;
        }
        Ok(total)
    }

    // ── 辅助 ─────────────────────────────────────────────────────────────────

    pub fn tablet_count(&self) -> usize {
        self.tablet_manager.tablet_count()
    }

    pub fn tablet_path(&self, tablet_id: TabletId) -> String {
        join_path(&self.config.data_dir, &tablet_id.to_string())
    }

    /// 生成 Segment 文件的路径
    pub fn segment_path(&self, tablet_id: TabletId, rowset_id: RowsetId, segment_id: SegmentId) -> String {
        join_path(&self.tablet_path(tablet_id), &segment_file_name(rowset_id, segment_id))
    }
}
