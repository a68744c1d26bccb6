//! 存储层配置

use crate::common::{OlapError, Result};
use crate::field_type::CompressionType;

/// 存储引擎的可调参数
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// 数据根目录，每个 tablet 一个子目录
    pub data_dir:                  String,
    /// 每个 data page 最多容纳的行数
    pub page_max_rows:             usize,
    /// ShortKey 索引的采样间隔（行）
    pub short_key_interval:        u32,
    /// RowsetWriter 切分 segment 的行数上限
    pub segment_max_rows:          u64,
    /// data page 默认压缩方式
    pub compression:               CompressionType,
    pub bloom_filter_bits_per_key: usize,
    /// 读路径每批返回的行数
    pub read_batch_size:           usize,
    /// 保存 tablet meta 时 rename 前是否 fsync
    pub sync_meta:                 bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir:                  "./olap-data".into(),
            page_max_rows:             1024,
            short_key_interval:        1024,
            segment_max_rows:          1_000_000,
            compression:               CompressionType::Lz4,
            bloom_filter_bits_per_key: 10,
            read_batch_size:           1024,
            sync_meta:                 true,
        }
    }
}

impl StorageConfig {
    pub fn new(data_dir: &str) -> Self {
        Self { data_dir: data_dir.into(), ..Self::default() }
    }

    pub fn with_page_max_rows(mut self, rows: usize) -> Self {
        self.page_max_rows = rows; self
    }
    pub fn with_short_key_interval(mut self, rows: u32) -> Self {
        self.short_key_interval = rows; self
    }
    pub fn with_segment_max_rows(mut self, rows: u64) -> Self {
        self.segment_max_rows = rows; self
    }
    pub fn with_compression(mut self, comp: CompressionType) -> Self {
        self.compression = comp; self
    }
    pub fn with_read_batch_size(mut self, rows: usize) -> Self {
        self.read_batch_size = rows; self
    }
    pub fn with_sync_meta(mut self, sync: bool) -> Self {
        self.sync_meta = sync; self
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_max_rows == 0 {
            return Err(OlapError::InvalidArgument("page_max_rows must be > 0".into()));
        }
        if self.short_key_interval == 0 {
            return Err(OlapError::InvalidArgument("short_key_interval must be > 0".into()));
        }
        if self.segment_max_rows == 0 {
            return Err(OlapError::InvalidArgument("segment_max_rows must be > 0".into()));
        }
        if self.read_batch_size == 0 {
            return Err(OlapError::InvalidArgument("read_batch_size must be > 0".into()));
        }
        if self.bloom_filter_bits_per_key == 0 {
            return Err(OlapError::InvalidArgument("bloom_filter_bits_per_key must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sizes_are_rejected() {
        assert!(StorageConfig::default().validate().is_ok());
        let bad = StorageConfig::default().with_page_max_rows(0);
        assert!(matches!(bad.validate(), Err(OlapError::InvalidArgument(_))));
        let bad = StorageConfig::new("/tmp/x").with_segment_max_rows(0);
        assert!(bad.validate().is_err());
    }
}
