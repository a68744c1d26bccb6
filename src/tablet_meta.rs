//! Tablet 持久化元数据
//!
//! TabletMeta 是 tablet 的权威记录：身份、生命周期状态、全部 rowset（active + stale）、
//! delete 谓词，以及一对一持有的 DeleteBitmap。
//!
//! 核心不变式：active rowset 的版本区间互不重叠且首尾相接，没有空洞。
//!
//! 本结构自身不加结构锁，由 `Tablet` 在外层用读写锁保护；
//! placement 提示（rowset 类型 / 介质 / cooldown）有自己的内部锁，与版本不变式无关。
//!
//! 落盘格式：
//! ```text
//! [magic "TMTA"][format version u32 LE][crc32c u32 LE][payload len u64 LE][TabletMetaPb]
//! ```

use std::io::{Cursor, Write};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use byteorder::{LittleEndian, ReadBytesExt};
use parking_lot::RwLock;
use prost::Message;
use tracing::{info, warn};

use crate::common::{
    OlapError, PartitionId, ReplicaId, Result, RowsetType, SchemaHash, StorageMedium, TableId,
    TabletId, TabletState, Version,
};
use crate::delete_bitmap::DeleteBitmap;
use crate::io::FileSystem;
use crate::pb::{self, TabletMetaPb, TabletUidPb};
use crate::predicate::DeletePredicate;
use crate::rowset::RowsetMeta;
use crate::schema::TabletSchema;

pub const META_MAGIC:          &[u8; 4] = b"TMTA";
pub const META_FORMAT_VERSION: u32      = 1;
const META_HEADER_SIZE:        usize    = 20;

// ── TabletUid ─────────────────────────────────────────────────────────────────

/// tablet 实例的唯一标识，只在 clone / restore 时重新生成
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TabletUid {
    pub hi: i64,
    pub lo: i64,
}

impl TabletUid {
    pub fn new(hi: i64, lo: i64) -> Self { Self { hi, lo } }

    pub fn generate() -> Self {
        let (hi, lo) = uuid::Uuid::new_v4().as_u64_pair();
        Self { hi: hi as i64, lo: lo as i64 }
    }
}

impl std::fmt::Display for TabletUid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}-{:016x}", self.hi as u64, self.lo as u64)
    }
}

impl From<TabletUid> for TabletUidPb {
    fn from(u: TabletUid) -> Self { Self { hi: u.hi, lo: u.lo } }
}

impl From<&TabletUidPb> for TabletUid {
    fn from(pb: &TabletUidPb) -> Self { Self { hi: pb.hi, lo: pb.lo } }
}

// ── Placement ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
struct Placement {
    preferred_rowset_type: RowsetType,
    storage_medium:        StorageMedium,
    remote_storage_name:   String,
    cooldown_resource:     String,
}

impl Default for Placement {
    fn default() -> Self {
        Self {
            preferred_rowset_type: RowsetType::Beta,
            storage_medium:        StorageMedium::Hdd,
            remote_storage_name:   String::new(),
            cooldown_resource:     String::new(),
        }
    }
}

// ── 版本检查 ──────────────────────────────────────────────────────────────────

/// `rs_metas` 已按版本排序；检查互不重叠且首尾相接
fn check_contiguous(rs_metas: &[RowsetMeta]) -> std::result::Result<(), String> {
    for w in rs_metas.windows(2) {
        let (a, b) = (w[0].version, w[1].version);
        if b.start <= a.end {
            return Err(format!("rowset version {b} overlaps {a}"));
        }
        if b.start != a.end + 1 {
            return Err(format!("version hole between {a} and {b}"));
        }
    }
    for (i, rs) in rs_metas.iter().enumerate() {
        if rs.version.start > rs.version.end {
            return Err(format!("rowset {} has inverted version {}", rs.rowset_id, rs.version));
        }
        if rs_metas[i + 1..].iter().any(|o| o.rowset_id == rs.rowset_id) {
            return Err(format!("duplicate rowset id {}", rs.rowset_id));
        }
    }
    Ok(())
}

fn now_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

// ── TabletMeta ────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct TabletMeta {
    pub table_id:               TableId,
    partition_id:               PartitionId,
    pub tablet_id:              TabletId,
    pub replica_id:             ReplicaId,
    pub schema_hash:            SchemaHash,
    pub shard_id:               i32,
    pub creation_time:          i64,
    cumulative_layer_point:     i64,
    tablet_uid:                 TabletUid,
    tablet_state:               TabletState,
    schema:                     Arc<TabletSchema>,
    /// 按版本排序
    rs_metas:                   Vec<RowsetMeta>,
    stale_rs_metas:             Vec<RowsetMeta>,
    /// 追加顺序，不重排
    delete_predicates:          Vec<DeletePredicate>,
    in_restore_mode:            bool,
    placement:                  RwLock<Placement>,
    delete_bitmap:              Arc<DeleteBitmap>,
}

impl TabletMeta {
    pub fn new(
        table_id:     TableId,
        partition_id: PartitionId,
        tablet_id:    TabletId,
        replica_id:   ReplicaId,
        schema:       TabletSchema,
    ) -> Self {
        Self {
            table_id,
            partition_id,
            tablet_id,
            replica_id,
            schema_hash:            schema.schema_hash,
            shard_id:               0,
            creation_time:          now_secs(),
            cumulative_layer_point: -1,
            tablet_uid:             TabletUid::generate(),
            tablet_state:           TabletState::NotReady,
            schema:                 Arc::new(schema),
            rs_metas:               Vec::new(),
            stale_rs_metas:         Vec::new(),
            delete_predicates:      Vec::new(),
            in_restore_mode:        false,
            placement:              RwLock::new(Placement::default()),
            delete_bitmap:          Arc::new(DeleteBitmap::new(tablet_id)),
        }
    }

    // ── 身份 ──────────────────────────────────────────────────────────────────

    pub fn partition_id(&self) -> PartitionId { self.partition_id }

    /// 只能从未设置（0）改为某个值，或重复设置同一个值
    pub fn set_partition_id(&mut self, partition_id: PartitionId) -> Result<()> {
        if self.partition_id != 0 && self.partition_id != partition_id {
            return Err(OlapError::InternalError(format!(
                "tablet {} already belongs to partition {}, cannot move to {partition_id}",
                self.tablet_id, self.partition_id
            )));
        }
        self.partition_id = partition_id;
        Ok(())
    }

    pub fn tablet_uid(&self) -> TabletUid { self.tablet_uid }

    /// clone / restore 后使用新的 uid
    pub fn reset_tablet_uid(&mut self) -> TabletUid {
        self.tablet_uid = TabletUid::generate();
        self.tablet_uid
    }

    pub fn full_name(&self) -> String {
        format!("{}.{}.{}", self.tablet_id, self.schema_hash, self.tablet_uid)
    }

    pub fn schema(&self) -> &Arc<TabletSchema> { &self.schema }

    /// light schema change：替换 schema，schema_hash 保持不变
    pub fn set_schema(&mut self, schema: TabletSchema) -> Result<()> {
        schema.validate()?;
        self.schema = Arc::new(schema);
        Ok(())
    }

    pub fn delete_bitmap(&self) -> &Arc<DeleteBitmap> { &self.delete_bitmap }

    /// 待提交副本：在副本上修改并落盘，成功后再替换原 meta
    pub(crate) fn fork(&self, delete_bitmap: Arc<DeleteBitmap>) -> Self {
        Self {
            table_id:               self.table_id,
            partition_id:           self.partition_id,
            tablet_id:              self.tablet_id,
            replica_id:             self.replica_id,
            schema_hash:            self.schema_hash,
            shard_id:               self.shard_id,
            creation_time:          self.creation_time,
            cumulative_layer_point: self.cumulative_layer_point,
            tablet_uid:             self.tablet_uid,
            tablet_state:           self.tablet_state,
            schema:                 self.schema.clone(),
            rs_metas:               self.rs_metas.clone(),
            stale_rs_metas:         self.stale_rs_metas.clone(),
            delete_predicates:      self.delete_predicates.clone(),
            in_restore_mode:        self.in_restore_mode,
            placement:              RwLock::new(self.placement.read().clone()),
            delete_bitmap,
        }
    }

    pub(crate) fn set_delete_bitmap(&mut self, delete_bitmap: Arc<DeleteBitmap>) {
        self.delete_bitmap = delete_bitmap;
    }

    pub fn cumulative_layer_point(&self) -> i64 { self.cumulative_layer_point }
    pub fn set_cumulative_layer_point(&mut self, point: i64) { self.cumulative_layer_point = point; }

    pub fn in_restore_mode(&self) -> bool { self.in_restore_mode }
    pub fn set_in_restore_mode(&mut self, on: bool) { self.in_restore_mode = on; }

    // ── 生命周期 ──────────────────────────────────────────────────────────────

    pub fn tablet_state(&self) -> TabletState { self.tablet_state }

    /// 只允许向前迁移；设置为当前状态视为成功
    pub fn set_tablet_state(&mut self, state: TabletState) -> Result<()> {
        if state == self.tablet_state {
            return Ok(());
        }
        if !self.tablet_state.can_transition_to(state) {
            return Err(OlapError::InvalidStateTransition { from: self.tablet_state, to: state });
        }
        info!(tablet_id = self.tablet_id, from = %self.tablet_state, to = %state, "tablet state changed");
        self.tablet_state = state;
        Ok(())
    }

    // ── placement ─────────────────────────────────────────────────────────────

    pub fn preferred_rowset_type(&self) -> RowsetType { self.placement.read().preferred_rowset_type }
    pub fn set_preferred_rowset_type(&self, t: RowsetType) { self.placement.write().preferred_rowset_type = t; }

    pub fn storage_medium(&self) -> StorageMedium { self.placement.read().storage_medium }
    pub fn set_storage_medium(&self, m: StorageMedium) { self.placement.write().storage_medium = m; }

    pub fn remote_storage_name(&self) -> String { self.placement.read().remote_storage_name.clone() }
    pub fn set_remote_storage_name(&self, name: &str) { self.placement.write().remote_storage_name = name.into(); }

    pub fn cooldown_resource(&self) -> String { self.placement.read().cooldown_resource.clone() }
    pub fn set_cooldown_resource(&self, resource: &str) { self.placement.write().cooldown_resource = resource.into(); }

    // ── Rowset ────────────────────────────────────────────────────────────────

    pub fn all_rs_metas(&self) -> &[RowsetMeta] { &self.rs_metas }
    pub fn all_stale_rs_metas(&self) -> &[RowsetMeta] { &self.stale_rs_metas }

    /// 直接修改 active 列表，调用方负责维持版本不变式
    pub fn all_mutable_rs_metas(&mut self) -> &mut Vec<RowsetMeta> { &mut self.rs_metas }

    /// 登记一个新 rowset：版本不能与已有 rowset 重叠，且必须接在现有区间的某一端
    pub fn add_rs_meta(&mut self, rs_meta: RowsetMeta) -> Result<()> {
        if let Some(dup) = self.rs_metas.iter().find(|r| r.version.overlaps(&rs_meta.version)) {
            return Err(OlapError::InternalError(format!(
                "tablet {}: rowset {} version {} overlaps rowset {} version {}",
                self.tablet_id, rs_meta.rowset_id, rs_meta.version, dup.rowset_id, dup.version
            )));
        }
        let mut next = self.rs_metas.clone();
        next.push(rs_meta);
        next.sort_by_key(|r| r.version);
        check_contiguous(&next).map_err(|e| OlapError::InternalError(format!("tablet {}: {e}", self.tablet_id)))?;
        self.rs_metas = next;
        Ok(())
    }

    /// compaction 的原子替换：删除 `to_delete`，加入 `to_add`
    ///
    /// `same_version == false` 时被删除的 rowset 移入 stale 列表。
    /// 任一检查失败则不做任何修改。
    pub fn modify_rs_metas(
        &mut self,
        to_add:       &[RowsetMeta],
        to_delete:    &[RowsetMeta],
        same_version: bool,
    ) -> Result<()> {
        let mut next = self.rs_metas.clone();
        let mut removed = Vec::with_capacity(to_delete.len());
        for d in to_delete {
            let pos = next.iter()
                .position(|r| r.rowset_id == d.rowset_id && r.version == d.version)
                .ok_or_else(|| OlapError::InternalError(format!(
                    "tablet {}: rowset {} {} is not active", self.tablet_id, d.rowset_id, d.version
                )))?;
            removed.push(next.remove(pos));
        }
        next.extend(to_add.iter().cloned());
        next.sort_by_key(|r| r.version);
        check_contiguous(&next).map_err(|e| OlapError::InternalError(format!("tablet {}: {e}", self.tablet_id)))?;

        self.rs_metas = next;
        if !same_version {
            self.stale_rs_metas.extend(removed);
        }
        Ok(())
    }

    /// 整体替换 active 列表（clone / restore）
    pub fn revise_rs_metas(&mut self, mut rs_metas: Vec<RowsetMeta>) -> Result<()> {
        rs_metas.sort_by_key(|r| r.version);
        check_contiguous(&rs_metas).map_err(|e| OlapError::InternalError(format!("tablet {}: {e}", self.tablet_id)))?;
        self.rs_metas = rs_metas;
        Ok(())
    }

    /// 只能删除两端的 rowset，否则会留下版本空洞
    pub fn delete_rs_meta_by_version(&mut self, version: Version) -> Result<Option<RowsetMeta>> {
        let Some(pos) = self.rs_metas.iter().position(|r| r.version == version) else { return Ok(None) };
        if pos != 0 && pos != self.rs_metas.len() - 1 {
            return Err(OlapError::InternalError(format!(
                "tablet {}: removing {version} would leave a version hole", self.tablet_id
            )));
        }
        Ok(Some(self.rs_metas.remove(pos)))
    }

    pub fn delete_stale_rs_meta_by_version(&mut self, version: Version) -> Option<RowsetMeta> {
        let pos = self.stale_rs_metas.iter().position(|r| r.version == version)?;
        Some(self.stale_rs_metas.remove(pos))
    }

    pub fn acquire_rs_meta_by_version(&self, version: Version) -> Option<&RowsetMeta> {
        self.rs_metas.iter().find(|r| r.version == version)
    }

    pub fn acquire_stale_rs_meta_by_version(&self, version: Version) -> Option<&RowsetMeta> {
        self.stale_rs_metas.iter().find(|r| r.version == version)
    }

    pub fn clear_stale_rowset(&mut self) -> Vec<RowsetMeta> {
        std::mem::take(&mut self.stale_rs_metas)
    }

    // ── 统计 ──────────────────────────────────────────────────────────────────

    pub fn num_rows(&self) -> u64 { self.rs_metas.iter().map(|r| r.num_rows).sum() }

    pub fn tablet_footprint(&self) -> u64 { self.rs_metas.iter().map(|r| r.total_disk_size).sum() }

    pub fn tablet_local_size(&self) -> u64 {
        self.rs_metas.iter().filter(|r| r.is_local()).map(|r| r.total_disk_size).sum()
    }

    pub fn tablet_remote_size(&self) -> u64 {
        self.rs_metas.iter().filter(|r| !r.is_local()).map(|r| r.total_disk_size).sum()
    }

    pub fn version_count(&self) -> usize { self.rs_metas.len() }

    /// end 最大的 active rowset 的版本
    pub fn max_version(&self) -> Option<Version> {
        self.rs_metas.iter().map(|r| r.version).max_by_key(|v| v.end)
    }

    pub fn all_beta(&self) -> bool {
        self.rs_metas.iter().chain(&self.stale_rs_metas).all(|r| r.rowset_type == RowsetType::Beta)
    }

    // ── Delete 谓词 ───────────────────────────────────────────────────────────

    /// 追加一条 DELETE；条件里的列必须在当前 schema 中存在
    pub fn add_delete_predicate(&mut self, mut pred: DeletePredicate, version: i64) -> Result<()> {
        pred.to_column_predicates(&self.schema)?;
        pred.version = version;
        self.delete_predicates.push(pred);
        Ok(())
    }

    /// 删除版本落在 `version` 内的谓词
    pub fn remove_delete_predicate_by_version(&mut self, version: Version) {
        self.delete_predicates.retain(|p| !version.contains_version(p.version));
    }

    pub fn delete_predicates(&self) -> &[DeletePredicate] { &self.delete_predicates }

    pub fn version_for_delete_predicate(&self, version: i64) -> bool {
        self.delete_predicates.iter().any(|p| p.version == version)
    }

    // ── pb ────────────────────────────────────────────────────────────────────

    pub fn to_meta_pb(&self) -> Result<TabletMetaPb> {
        let placement = self.placement.read().clone();
        Ok(TabletMetaPb {
            table_id:               self.table_id,
            partition_id:           self.partition_id,
            tablet_id:              self.tablet_id,
            replica_id:             self.replica_id,
            schema_hash:            self.schema_hash,
            shard_id:               self.shard_id,
            creation_time:          self.creation_time,
            cumulative_layer_point: self.cumulative_layer_point,
            tablet_uid:             Some(self.tablet_uid.into()),
            tablet_state:           pb::TabletStatePb::from(self.tablet_state) as i32,
            schema:                 Some(self.schema.to_pb()),
            rs_metas:               self.rs_metas.iter().map(RowsetMeta::to_pb).collect(),
            stale_rs_metas:         self.stale_rs_metas.iter().map(RowsetMeta::to_pb).collect(),
            delete_predicates:      self.delete_predicates.iter().map(DeletePredicate::to_pb).collect(),
            in_restore_mode:        self.in_restore_mode,
            preferred_rowset_type:  pb::RowsetTypePb::from(placement.preferred_rowset_type) as i32,
            storage_medium:         pb::StorageMediumPb::from(placement.storage_medium) as i32,
            remote_storage_name:    placement.remote_storage_name,
            cooldown_resource:      placement.cooldown_resource,
            delete_bitmap:          Some(self.delete_bitmap.to_pb()?),
        })
    }

    pub fn init_from_pb(p: &TabletMetaPb) -> Result<Self> {
        let schema = TabletSchema::from_pb(p.schema.as_ref().ok_or_else(|| {
            OlapError::Corruption(format!("tablet {} meta has no schema", p.tablet_id))
        })?)?;
        let state: pb::TabletStatePb      = pb::enum_from_i32(p.tablet_state, "tablet state")?;
        let rs_type: pb::RowsetTypePb     = pb::enum_from_i32(p.preferred_rowset_type, "rowset type")?;
        let medium: pb::StorageMediumPb   = pb::enum_from_i32(p.storage_medium, "storage medium")?;

        let mut rs_metas = p.rs_metas.iter().map(RowsetMeta::from_pb).collect::<Result<Vec<_>>>()?;
        rs_metas.sort_by_key(|r| r.version);
        check_contiguous(&rs_metas)
            .map_err(|e| OlapError::Corruption(format!("tablet {}: {e}", p.tablet_id)))?;
        let stale_rs_metas = p.stale_rs_metas.iter().map(RowsetMeta::from_pb).collect::<Result<Vec<_>>>()?;
        let delete_predicates = p.delete_predicates.iter().map(DeletePredicate::from_pb).collect::<Result<Vec<_>>>()?;
        let delete_bitmap = match &p.delete_bitmap {
            Some(dbm) => DeleteBitmap::from_pb(p.tablet_id, dbm)?,
            None      => DeleteBitmap::new(p.tablet_id),
        };

        Ok(Self {
            table_id:               p.table_id,
            partition_id:           p.partition_id,
            tablet_id:              p.tablet_id,
            replica_id:             p.replica_id,
            schema_hash:            p.schema_hash,
            shard_id:               p.shard_id,
            creation_time:          p.creation_time,
            cumulative_layer_point: p.cumulative_layer_point,
            tablet_uid:             p.tablet_uid.as_ref().map(TabletUid::from).unwrap_or_default(),
            tablet_state:           state.into(),
            schema:                 Arc::new(schema),
            rs_metas,
            stale_rs_metas,
            delete_predicates,
            in_restore_mode:        p.in_restore_mode,
            placement:              RwLock::new(Placement {
                preferred_rowset_type: rs_type.into(),
                storage_medium:        medium.into(),
                remote_storage_name:   p.remote_storage_name.clone(),
                cooldown_resource:     p.cooldown_resource.clone(),
            }),
            delete_bitmap:          Arc::new(delete_bitmap),
        })
    }

    // ── 序列化 / 落盘 ─────────────────────────────────────────────────────────

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let payload = self.to_meta_pb()?.encode_to_vec();
        let mut buf = Vec::with_capacity(META_HEADER_SIZE + payload.len());
        buf.extend_from_slice(META_MAGIC);
        buf.extend_from_slice(&META_FORMAT_VERSION.to_le_bytes());
        buf.extend_from_slice(&crc32c::crc32c(&payload).to_le_bytes());
        buf.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() < META_HEADER_SIZE {
            return Err(OlapError::Corruption(format!("tablet meta of {} bytes has no header", data.len())));
        }
        if &data[..4] != META_MAGIC {
            return Err(OlapError::Corruption(format!("bad tablet meta magic {:?}", &data[..4])));
        }
        let mut cur = Cursor::new(&data[4..META_HEADER_SIZE]);
        let header_err = |e: std::io::Error| OlapError::Corruption(format!("tablet meta header: {e}"));
        let version    = cur.read_u32::<LittleEndian>().map_err(header_err)?;
        let stored_crc = cur.read_u32::<LittleEndian>().map_err(header_err)?;
        let len        = cur.read_u64::<LittleEndian>().map_err(header_err)?;
        if version != META_FORMAT_VERSION {
            return Err(OlapError::Corruption(format!("unsupported tablet meta format {version}")));
        }
        let payload = &data[META_HEADER_SIZE..];
        if payload.len() as u64 != len {
            return Err(OlapError::Corruption(format!(
                "tablet meta payload is {} bytes, header says {len}", payload.len()
            )));
        }
        let actual_crc = crc32c::crc32c(payload);
        if actual_crc != stored_crc {
            return Err(OlapError::Corruption(format!(
                "tablet meta checksum mismatch stored={stored_crc:#010x} actual={actual_crc:#010x}"
            )));
        }
        let pb = TabletMetaPb::decode(payload)
            .map_err(|e| OlapError::Corruption(format!("malformed tablet meta: {e}")))?;
        Self::init_from_pb(&pb)
    }

    /// 序列化后原子写入 `path`
    pub fn save(&self, fs: &dyn FileSystem, path: &str, sync: bool) -> Result<()> {
        let bytes = self.serialize()?;
        Self::save_bytes(fs, path, &bytes, sync)?;
        info!(tablet_id = self.tablet_id, path, bytes = bytes.len(), "tablet meta saved");
        Ok(())
    }

    /// 先写 `path.tmp` 再 rename，崩溃时 `path` 要么是旧内容要么是新内容
    pub fn save_bytes(fs: &dyn FileSystem, path: &str, bytes: &[u8], sync: bool) -> Result<()> {
        let tmp = format!("{path}.tmp");
        let written = (|| -> Result<()> {
            let mut file = fs.create_file(&tmp)?;
            file.write_all(bytes)?;
            if sync { file.finalize()?; } else { file.close()?; }
            fs.rename(&tmp, path)
        })();
        let written = written.and_then(|()| {
            if !sync {
                return Ok(());
            }
            let dir = std::path::Path::new(path).parent()
                .and_then(|p| p.to_str())
                .filter(|p| !p.is_empty())
                .unwrap_or(".");
            fs.sync_dir(dir)
        });
        if let Err(e) = written {
            if let Err(cleanup) = fs.delete_file(&tmp) {
                warn!(path = %tmp, error = %cleanup, "failed to remove temporary tablet meta");
            }
            return Err(e);
        }
        Ok(())
    }

    pub fn create_from_file(fs: &dyn FileSystem, path: &str) -> Result<Self> {
        let file = fs.open_file(path)?;
        let data = file.read_at(0, file.size() as usize)?;
        Self::deserialize(&data).map_err(|e| {
            warn!(path, error = %e, "tablet meta rejected");
            e
        })
    }
}

/// delete 谓词按 (version, 条件) 排序后比较，其余字段逐一比较
impl PartialEq for TabletMeta {
    fn eq(&self, other: &Self) -> bool {
        let sorted = |preds: &[DeletePredicate]| {
            let mut v: Vec<_> = preds.iter().map(|p| (p.version, format!("{:?}", p.conditions))).collect();
            v.sort();
            v
        };
        self.table_id == other.table_id
            && self.partition_id == other.partition_id
            && self.tablet_id == other.tablet_id
            && self.replica_id == other.replica_id
            && self.schema_hash == other.schema_hash
            && self.shard_id == other.shard_id
            && self.creation_time == other.creation_time
            && self.cumulative_layer_point == other.cumulative_layer_point
            && self.tablet_uid == other.tablet_uid
            && self.tablet_state == other.tablet_state
            && *self.schema == *other.schema
            && self.rs_metas == other.rs_metas
            && self.stale_rs_metas == other.stale_rs_metas
            && sorted(&self.delete_predicates) == sorted(&other.delete_predicates)
            && self.in_restore_mode == other.in_restore_mode
            && *self.placement.read() == *other.placement.read()
            && *self.delete_bitmap == *other.delete_bitmap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{AggregateType, ColumnType, KeysType};
    use crate::io::{LocalFileSystem, MemoryFileSystem};
    use crate::predicate::{CompareOp, DeleteCondition};
    use crate::schema::TabletColumn;
    use test_log::test;

    fn schema() -> TabletSchema {
        TabletSchema::new(KeysType::Unique, vec![
            TabletColumn::key(0, "k", ColumnType::Int64),
            TabletColumn::value(1, "v", ColumnType::Int32, AggregateType::Replace),
        ])
    }

    fn meta() -> TabletMeta {
        TabletMeta::new(1, 2, 100, 3, schema())
    }

    fn rs(id: u64, start: i64, end: i64, rows: u64) -> RowsetMeta {
        let mut r = RowsetMeta::new(id, 100, Version::new(start, end));
        r.num_rows = rows;
        r.total_disk_size = rows * 10;
        r
    }

    #[test]
    fn compaction_swap_moves_inputs_to_stale() {
        let mut m = meta();
        let r1 = rs(1, 1, 1, 100);
        let r2 = rs(2, 2, 2, 50);
        m.add_rs_meta(r1.clone()).unwrap();
        m.add_rs_meta(r2.clone()).unwrap();
        assert_eq!(m.acquire_rs_meta_by_version(Version::point(2)), Some(&r2));

        let r3 = rs(3, 1, 2, 150);
        m.modify_rs_metas(&[r3.clone()], &[r1.clone(), r2.clone()], false).unwrap();
        assert_eq!(m.all_rs_metas(), &[r3]);
        assert_eq!(m.all_stale_rs_metas(), &[r1.clone(), r2]);
        assert_eq!(m.acquire_stale_rs_meta_by_version(Version::point(1)), Some(&r1));
        assert!(m.acquire_rs_meta_by_version(Version::point(1)).is_none());

        assert_eq!(m.delete_stale_rs_meta_by_version(Version::point(1)), Some(r1));
        assert!(m.delete_stale_rs_meta_by_version(Version::point(1)).is_none());
        assert_eq!(m.clear_stale_rowset().len(), 1);
    }

    #[test]
    fn versions_stay_contiguous() {
        let mut m = meta();
        m.add_rs_meta(rs(1, 2, 4, 1)).unwrap();
        assert!(matches!(m.add_rs_meta(rs(2, 4, 5, 1)), Err(OlapError::InternalError(_))));
        assert!(matches!(m.add_rs_meta(rs(2, 3, 3, 1)), Err(OlapError::InternalError(_))));
        assert!(matches!(m.add_rs_meta(rs(2, 7, 7, 1)), Err(OlapError::InternalError(_))));
        m.add_rs_meta(rs(2, 5, 5, 1)).unwrap();
        m.add_rs_meta(rs(3, 0, 1, 1)).unwrap();
        assert!(matches!(m.add_rs_meta(rs(3, 6, 6, 1)), Err(OlapError::InternalError(_))));

        let versions: Vec<Version> = m.all_rs_metas().iter().map(|r| r.version).collect();
        assert_eq!(versions, vec![Version::new(0, 1), Version::new(2, 4), Version::point(5)]);
        assert_eq!(m.max_version(), Some(Version::point(5)));

        // 中间的 rowset 不能单独删除
        assert!(m.delete_rs_meta_by_version(Version::new(2, 4)).is_err());
        assert!(m.delete_rs_meta_by_version(Version::point(9)).unwrap().is_none());
        assert_eq!(m.delete_rs_meta_by_version(Version::point(5)).unwrap().unwrap().rowset_id, 2);
    }

    #[test]
    fn failed_modify_changes_nothing() {
        let mut m = meta();
        m.add_rs_meta(rs(1, 1, 1, 1)).unwrap();
        m.add_rs_meta(rs(2, 2, 2, 1)).unwrap();
        // 输出只覆盖 [1,1]，会留下空洞
        let err = m.modify_rs_metas(&[rs(3, 1, 1, 1)], &[rs(1, 1, 1, 1), rs(2, 2, 2, 1)], false);
        assert!(err.is_err());
        assert_eq!(m.version_count(), 2);
        assert!(m.all_stale_rs_metas().is_empty());
        // 要删除的 rowset 不存在
        assert!(m.modify_rs_metas(&[], &[rs(9, 1, 1, 1)], false).is_err());

        m.modify_rs_metas(&[rs(4, 1, 2, 2)], &[rs(1, 1, 1, 1), rs(2, 2, 2, 1)], true).unwrap();
        assert!(m.all_stale_rs_metas().is_empty());
    }

    #[test]
    fn state_machine() {
        let mut m = meta();
        assert_eq!(m.tablet_state(), TabletState::NotReady);
        assert!(m.set_tablet_state(TabletState::Stopped).is_err());
        m.set_tablet_state(TabletState::Running).unwrap();
        m.set_tablet_state(TabletState::Running).unwrap();
        m.set_tablet_state(TabletState::Tombstoned).unwrap();
        let err = m.set_tablet_state(TabletState::Running).unwrap_err();
        assert!(matches!(err, OlapError::InvalidStateTransition { from: TabletState::Tombstoned, to: TabletState::Running }));
        m.set_tablet_state(TabletState::Stopped).unwrap();
        m.set_tablet_state(TabletState::Shutdown).unwrap();
        assert_eq!(m.tablet_state(), TabletState::Shutdown);
    }

    #[test]
    fn delete_predicates_keep_order() {
        let mut m = meta();
        let p = |v: &str| DeletePredicate::new(vec![DeleteCondition::new("k", CompareOp::Eq, &[v])]);
        m.add_delete_predicate(p("1"), 5).unwrap();
        m.add_delete_predicate(p("2"), 3).unwrap();
        m.add_delete_predicate(p("3"), 8).unwrap();
        let versions: Vec<i64> = m.delete_predicates().iter().map(|p| p.version).collect();
        assert_eq!(versions, vec![5, 3, 8]);
        assert!(m.version_for_delete_predicate(3));
        assert!(!m.version_for_delete_predicate(4));

        m.remove_delete_predicate_by_version(Version::new(1, 5));
        assert_eq!(m.delete_predicates().len(), 1);
        assert!(!m.version_for_delete_predicate(5));

        let bad = DeletePredicate::new(vec![DeleteCondition::new("nope", CompareOp::Eq, &["1"])]);
        assert!(matches!(m.add_delete_predicate(bad, 9), Err(OlapError::SchemaMismatch(_))));
    }

    #[test]
    fn serialize_round_trip() {
        for n in [0u64, 1, 5] {
            let mut m = meta();
            m.set_tablet_state(TabletState::Running).unwrap();
            for i in 0..n {
                m.add_rs_meta(rs(i + 1, i as i64, i as i64, i * 3)).unwrap();
            }
            m.add_delete_predicate(
                DeletePredicate::new(vec![DeleteCondition::new("v", CompareOp::In, &["1", "2"])]), 4,
            ).unwrap();
            m.delete_bitmap().add((1, 0, 2), 17);
            m.set_storage_medium(StorageMedium::Ssd);
            m.set_cooldown_resource("s3_cold");

            let back = TabletMeta::deserialize(&m.serialize().unwrap()).unwrap();
            assert_eq!(back, m);
            assert!(back.delete_bitmap().contains((1, 0, 2), 17));
            assert_eq!(back.cooldown_resource(), "s3_cold");
        }
    }

    #[test]
    fn equality_ignores_delete_predicate_order() {
        let p = |v: &str| DeletePredicate::new(vec![DeleteCondition::new("k", CompareOp::Eq, &[v])]);
        let mut a = meta();
        a.add_delete_predicate(p("1"), 2).unwrap();
        a.add_delete_predicate(p("2"), 3).unwrap();
        let mut pb = a.to_meta_pb().unwrap();
        pb.delete_predicates.reverse();
        let b = TabletMeta::init_from_pb(&pb).unwrap();
        assert_eq!(a, b);
        b.delete_bitmap().add((1, 1, 1), 1);
        assert_ne!(a, b);
    }

    #[test]
    fn corrupted_bytes_are_rejected() {
        let mut m = meta();
        m.add_rs_meta(rs(1, 0, 1, 10)).unwrap();
        let good = m.serialize().unwrap();
        for pos in [0, 5, 9, 13, good.len() - 1] {
            let mut bad = good.clone();
            bad[pos] ^= 0x10;
            assert!(TabletMeta::deserialize(&bad).unwrap_err().is_corruption(), "byte {pos}");
        }
        assert!(TabletMeta::deserialize(&good[..good.len() - 1]).unwrap_err().is_corruption());
        assert!(TabletMeta::deserialize(&good[..7]).unwrap_err().is_corruption());
    }

    #[test]
    fn save_and_reload_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem::new();
        let path = dir.path().join("100.hdr").to_string_lossy().into_owned();

        let mut m = meta();
        m.add_rs_meta(rs(1, 0, 1, 10)).unwrap();
        m.save(&fs, &path, true).unwrap();
        assert!(!fs.exists(&format!("{path}.tmp")).unwrap());

        m.add_rs_meta(rs(2, 2, 2, 10)).unwrap();
        m.save(&fs, &path, false).unwrap();
        let back = TabletMeta::create_from_file(&fs, &path).unwrap();
        assert_eq!(back, m);
        assert_eq!(back.version_count(), 2);
    }

    #[test]
    fn fork_leaves_original_untouched() {
        let mut m = meta();
        m.set_tablet_state(TabletState::Running).unwrap();
        m.add_rs_meta(rs(1, 0, 1, 10)).unwrap();
        m.set_storage_medium(StorageMedium::Ssd);

        let mut staged = m.fork(Arc::new(m.delete_bitmap().snapshot()));
        assert_eq!(staged, m);
        staged.add_rs_meta(rs(2, 2, 2, 5)).unwrap();
        staged.set_tablet_state(TabletState::Stopped).unwrap();
        staged.set_storage_medium(StorageMedium::Hdd);
        staged.delete_bitmap().add((1, 0, 2), 3);

        assert_eq!(m.max_version(), Some(Version::new(0, 1)));
        assert_eq!(m.tablet_state(), TabletState::Running);
        assert_eq!(m.storage_medium(), StorageMedium::Ssd);
        assert!(m.delete_bitmap().is_empty());
    }

    #[test]
    fn leftover_tmp_does_not_affect_reload() {
        let fs = MemoryFileSystem::new();
        let m = meta();
        m.save(&fs, "t/100.hdr", true).unwrap();
        // 模拟上一次保存写了一半就崩溃
        fs.put("t/100.hdr.tmp", b"TMTA\x01\x00".to_vec());
        assert_eq!(TabletMeta::create_from_file(&fs, "t/100.hdr").unwrap(), m);
    }

    #[test]
    fn identity_accessors() {
        let mut m = meta();
        let uid = m.tablet_uid();
        assert_ne!(m.reset_tablet_uid(), uid);
        assert!(m.full_name().starts_with("100."));
        assert!(m.set_partition_id(2).is_ok());
        assert!(m.set_partition_id(7).is_err());
        let mut fresh = TabletMeta::new(1, 0, 101, 3, schema());
        fresh.set_partition_id(7).unwrap();
        assert_eq!(fresh.partition_id(), 7);

        m.add_rs_meta(rs(1, 0, 1, 10)).unwrap();
        let mut remote = rs(2, 2, 2, 5);
        remote.resource_id = "s3".into();
        m.add_rs_meta(remote).unwrap();
        assert_eq!(m.num_rows(), 15);
        assert_eq!(m.tablet_footprint(), 150);
        assert_eq!(m.tablet_local_size(), 100);
        assert_eq!(m.tablet_remote_size(), 50);
        assert!(m.all_beta());
    }
}
