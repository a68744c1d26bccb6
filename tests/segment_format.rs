use std::sync::Arc;

use olap_tablet_core::common::{AggregateType, ColumnType, KeysType};
use olap_tablet_core::field_type::Value;
use olap_tablet_core::io::{FileSystem, LocalFileSystem};
use olap_tablet_core::mem_tracker::{CountingMemTracker, MemTracker};
use olap_tablet_core::schema::{TabletColumn, TabletSchema};
use olap_tablet_core::segment::{write_segment, Segment, SegmentWriterOptions, SEGMENT_MAGIC, TRAILER_SIZE};
use olap_tablet_core::segment_iterator::ReadOptions;
use tempfile::TempDir;
use test_log::test;

fn schema() -> TabletSchema {
    TabletSchema::new(KeysType::Duplicate, vec![
        TabletColumn::key(0, "id", ColumnType::Int64),
        TabletColumn::value(1, "score", ColumnType::Float64, AggregateType::None),
        TabletColumn::varchar(2, "name", 32, false).with_bloom_filter(),
    ])
}

fn rows(n: i64) -> Vec<Vec<Value>> {
    (0..n).map(|i| vec![
        Value::Int64(i),
        Value::Float64(i as f64 * 0.5),
        if i % 7 == 0 { Value::Null } else { Value::Bytes(format!("user-{i}").into_bytes()) },
    ]).collect()
}

#[test]
fn trailer_layout_is_stable() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("1_0.seg");
    let path = path.to_str().unwrap();
    let fs = LocalFileSystem::new();
    let info = write_segment(&fs, path, &schema(), SegmentWriterOptions::default(), rows(300)).unwrap();

    let bytes = std::fs::read(path).unwrap();
    assert_eq!(bytes.len() as u64, info.file_size);
    let trailer = &bytes[bytes.len() - TRAILER_SIZE..];
    assert_eq!(&trailer[8..12], SEGMENT_MAGIC);
    let footer_len = u32::from_le_bytes(trailer[0..4].try_into().unwrap()) as usize;
    let checksum = u32::from_le_bytes(trailer[4..8].try_into().unwrap());
    let footer_start = bytes.len() - TRAILER_SIZE - footer_len;
    assert_eq!(crc32c::crc32c(&bytes[footer_start..bytes.len() - TRAILER_SIZE]), checksum);
}

#[test]
fn reopened_segment_reads_back_every_row() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("2_0.seg");
    let path = path.to_str().unwrap();
    let fs = LocalFileSystem::new();
    let schema = Arc::new(schema());
    write_segment(&fs, path, &schema, SegmentWriterOptions::default(), rows(300)).unwrap();

    let tracker = Arc::new(CountingMemTracker::new());
    let segment = Segment::open(&fs, path, 0, schema.clone(), tracker.clone()).unwrap();
    assert_eq!(segment.num_rows(), 300);
    assert!(tracker.consumption() > 0);

    let mut it = segment.new_iterator(&schema, ReadOptions::default()).unwrap();
    let mut read = Vec::new();
    while let Some(block) = it.next_block().unwrap() {
        read.extend(block.rows());
    }
    assert_eq!(read, rows(300));

    drop(it);
    drop(segment);
    assert_eq!(tracker.consumption(), 0);
}

#[test]
fn truncated_file_is_corruption() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("3_0.seg");
    let path = path.to_str().unwrap();
    let fs = LocalFileSystem::new();
    let schema = Arc::new(schema());
    write_segment(&fs, path, &schema, SegmentWriterOptions::default(), rows(10)).unwrap();

    let bytes = std::fs::read(path).unwrap();
    std::fs::write(path, &bytes[..bytes.len() - 5]).unwrap();
    let err = Segment::open(&fs, path, 0, schema, olap_tablet_core::mem_tracker::noop()).unwrap_err();
    assert!(err.is_corruption(), "{err}");
    assert!(fs.exists(path).unwrap());
}
