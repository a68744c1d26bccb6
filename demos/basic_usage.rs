//! # olap-tablet-core 使用案例
//!
//! 1. 打开 StorageEngine 并创建 unique key tablet
//! 2. 两次导入（第二次覆盖部分 key，merge-on-write）
//! 3. DELETE 谓词
//! 4. 按版本读取
//! 5. Compaction 与 stale rowset 清理
//! 6. 重启恢复

use std::sync::Arc;

use olap_tablet_core::{
    common::{AggregateType, ColumnType, KeysType, StorageMedium, Version},
    field_type::Value,
    io::{FileSystem, FileSystemPtr, LocalFileSystem},
    mem_tracker::{CountingMemTracker, MemTracker, MemTrackerPtr},
    predicate::{CompareOp, DeleteCondition, DeletePredicate},
    reader::TabletReader,
    schema::{TabletColumn, TabletSchema},
    segment_iterator::ReaderStats,
    CreateTabletRequest, StorageConfig, StorageEngine,
};

const TABLET_ID: u64 = 1001;

fn order_schema() -> TabletSchema {
    TabletSchema::new(KeysType::Unique, vec![
        TabletColumn::key(0, "order_id", ColumnType::Int64),
        TabletColumn::value(1, "user_id", ColumnType::Int64, AggregateType::Replace),
        TabletColumn::value(2, "amount", ColumnType::Float64, AggregateType::Replace),
        TabletColumn::varchar(3, "status", 16, false).with_bitmap_index(),
    ])
}

fn order(id: i64, status: &str) -> Vec<Value> {
    vec![
        Value::Int64(id),
        Value::Int64(id % 13),
        Value::Float64(id as f64 * 1.5),
        Value::Bytes(status.as_bytes().to_vec()),
    ]
}

fn print_version(engine: &StorageEngine, version: i64) -> olap_tablet_core::Result<()> {
    let snapshot = engine.get_tablet(TABLET_ID)?.capture_read_snapshot(version)?;
    let reader = TabletReader::new(snapshot, vec![0, 3], vec![]);
    let stats = reader.stats().clone();
    let mut paid = 0;
    let mut total = 0;
    for block in reader.read_all()? {
        for row in block.rows() {
            total += 1;
            if row[1] == Value::Bytes(b"paid".to_vec()) {
                paid += 1;
            }
        }
    }
    println!(
        "    v{version}: rows={total} paid={paid} del_filtered={}",
        ReaderStats::get(&stats.rows_del_filtered)
    );
    Ok(())
}

fn main() -> olap_tablet_core::Result<()> {
    let data_dir = std::env::temp_dir().join("olap-tablet-core-demo");
    let data_dir = data_dir.to_string_lossy().into_owned();
    let fs: FileSystemPtr = Arc::new(LocalFileSystem::new());
    fs.delete_dir_all(&data_dir)?;

    let config = StorageConfig::new(&data_dir)
        .with_page_max_rows(256)
        .with_segment_max_rows(4096);
    let tracker = Arc::new(CountingMemTracker::new());
    let mem_tracker: MemTrackerPtr = tracker.clone();

    println!("【1】打开 StorageEngine: {data_dir}");
    let engine = StorageEngine::open(config.clone(), fs.clone(), mem_tracker.clone())?;
    engine.create_tablet(CreateTabletRequest {
        table_id:       1,
        partition_id:   10,
        tablet_id:      TABLET_ID,
        replica_id:     1,
        schema:         order_schema(),
        storage_medium: StorageMedium::Ssd,
    })?;

    println!("【2】导入");
    let mut w = engine.new_rowset_writer(TABLET_ID, Version::point(2))?;
    for id in 0..10_000 {
        w.add_row(order(id, "created"))?;
    }
    engine.publish_rowset(TABLET_ID, w.build()?)?;

    let mut w = engine.new_rowset_writer(TABLET_ID, Version::point(3))?;
    for id in (0..10_000).step_by(3) {
        w.add_row(order(id, "paid"))?;
    }
    engine.publish_rowset(TABLET_ID, w.build()?)?;
    let tablet = engine.get_tablet(TABLET_ID)?;
    println!("    delete bitmap marks = {}", tablet.delete_bitmap().cardinality());

    println!("【3】DELETE order_id < 100");
    let pred = DeletePredicate::new(vec![DeleteCondition::new("order_id", CompareOp::Lt, &["100"])]);
    engine.delete(TABLET_ID, pred)?;

    println!("【4】按版本读取");
    for v in 2..=4 {
        print_version(&engine, v)?;
    }

    println!("【5】Compaction [2,4]");
    let out = engine.compact(TABLET_ID, Version::new(2, 4))?;
    println!("    output rowset {} rows={} segments={}", out.rowset_id(), out.num_rows(), out.num_segments());
    drop(out);
    println!("    stale rowsets removed = {}", engine.sweep_stale_rowsets()?);
    print_version(&engine, 4)?;
    println!("    tracked memory = {} bytes", tracker.consumption());

    println!("【6】重启恢复");
    drop(tablet);
    drop(engine);
    let engine = StorageEngine::open(config, fs, mem_tracker)?;
    let tablet = engine.get_tablet(TABLET_ID)?;
    tablet.with_meta(|m| {
        println!("    {} state={} versions={} rows={}", m.full_name(), m.tablet_state(), m.version_count(), m.num_rows());
    });
    print_version(&engine, 4)?;
    Ok(())
}
