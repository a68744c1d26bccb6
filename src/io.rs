//! 可按字节区间读写的存储资源抽象
//!
//! Segment / TabletMeta 只通过这里的 trait 访问文件，本地盘与远端存储遵守同一契约：
//! `open(path) -> handle`，`read_at(offset, len)`，`size()`。
//! 读越过文件末尾视为截断，返回 `Corruption`。

use std::collections::{BTreeSet, HashMap};
use std::fmt::Debug;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::common::{OlapError, Result};

pub trait FileReader: Send + Sync {
    fn path(&self) -> &str;
    fn size(&self) -> u64;
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>>;
}

pub trait FileWriter: Write + Send {
    /// 刷盘并关闭，返回写入的总字节数
    fn finalize(self: Box<Self>) -> Result<u64>;

    /// 关闭但不强制 fsync
    fn close(self: Box<Self>) -> Result<u64> {
        self.finalize()
    }
}

pub trait FileSystem: Send + Sync + Debug {
    fn open_file(&self, path: &str) -> Result<Arc<dyn FileReader>>;
    fn create_file(&self, path: &str) -> Result<Box<dyn FileWriter>>;
    fn rename(&self, from: &str, to: &str) -> Result<()>;
    /// 文件不存在时视为成功
    fn delete_file(&self, path: &str) -> Result<()>;
    fn exists(&self, path: &str) -> Result<bool>;
    /// 返回目录下直接子项的名字（不含路径前缀）
    fn list_dir(&self, dir: &str) -> Result<Vec<String>>;
    fn create_dir_all(&self, dir: &str) -> Result<()>;
    fn delete_dir_all(&self, dir: &str) -> Result<()>;
    /// 持久化目录项，rename 之后调用才能保证掉电不丢失新名字
    fn sync_dir(&self, _dir: &str) -> Result<()> { Ok(()) }
}

pub type FileSystemPtr = Arc<dyn FileSystem>;

pub fn join_path(dir: &str, name: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), name)
}

fn check_range(path: &str, offset: u64, len: usize, size: u64) -> Result<()> {
    let end = offset.checked_add(len as u64);
    match end {
        Some(end) if end <= size => Ok(()),
        _ => Err(OlapError::Corruption(format!(
            "read past end of {path}: offset={offset} len={len} size={size}"
        ))),
    }
}

// ── 本地文件系统 ──────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    pub fn new() -> Self { Self }
}

struct LocalFileReader {
    path: String,
    size: u64,
    file: Mutex<File>,
}

impl FileReader for LocalFileReader {
    fn path(&self) -> &str { &self.path }
    fn size(&self) -> u64 { self.size }

    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        check_range(&self.path, offset, len, self.size)?;
        let mut buf = vec![0u8; len];
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof =>
                OlapError::Corruption(format!("short read on {}: {e}", self.path)),
            _ => OlapError::Io(e),
        })?;
        Ok(buf)
    }
}

struct LocalFileWriter {
    inner:   BufWriter<File>,
    written: u64,
}

impl Write for LocalFileWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }
    fn flush(&mut self) -> std::io::Result<()> { self.inner.flush() }
}

impl FileWriter for LocalFileWriter {
    fn finalize(mut self: Box<Self>) -> Result<u64> {
        self.inner.flush()?;
        self.inner.get_ref().sync_all()?;
        Ok(self.written)
    }

    fn close(mut self: Box<Self>) -> Result<u64> {
        self.inner.flush()?;
        Ok(self.written)
    }
}

impl FileSystem for LocalFileSystem {
    fn open_file(&self, path: &str) -> Result<Arc<dyn FileReader>> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Arc::new(LocalFileReader { path: path.into(), size, file: Mutex::new(file) }))
    }

    fn create_file(&self, path: &str) -> Result<Box<dyn FileWriter>> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        Ok(Box::new(LocalFileWriter { inner: BufWriter::new(file), written: 0 }))
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        fs::rename(from, to)?;
        Ok(())
    }

    fn delete_file(&self, path: &str) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, path: &str) -> Result<bool> {
        Ok(std::path::Path::new(path).exists())
    }

    fn list_dir(&self, dir: &str) -> Result<Vec<String>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        for entry in entries {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn create_dir_all(&self, dir: &str) -> Result<()> {
        fs::create_dir_all(dir)?;
        Ok(())
    }

    fn delete_dir_all(&self, dir: &str) -> Result<()> {
        match fs::remove_dir_all(dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn sync_dir(&self, dir: &str) -> Result<()> {
        File::open(dir)?.sync_all()?;
        Ok(())
    }
}

// ── 内存文件系统 ──────────────────────────────────────────────────────────────

type MemFiles = Arc<RwLock<HashMap<String, Arc<Vec<u8>>>>>;

/// 进程内文件系统，记录 `read_at` 调用次数，供测试断言 I/O 没有重复
#[derive(Debug, Default, Clone)]
pub struct MemoryFileSystem {
    files: MemFiles,
    reads: Arc<AtomicU64>,
}

impl MemoryFileSystem {
    pub fn new() -> Self { Self::default() }

    /// `read_at` 累计调用次数
    pub fn read_count(&self) -> u64 { self.reads.load(Ordering::SeqCst) }

    /// 直接写入（或覆盖）一个文件的完整内容
    pub fn put(&self, path: &str, data: Vec<u8>) {
        self.files.write().insert(path.into(), Arc::new(data));
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.files.read().get(path).map(|d| d.as_ref().clone())
    }
}

struct MemFileReader {
    path:  String,
    data:  Arc<Vec<u8>>,
    reads: Arc<AtomicU64>,
}

impl FileReader for MemFileReader {
    fn path(&self) -> &str { &self.path }
    fn size(&self) -> u64 { self.data.len() as u64 }

    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        check_range(&self.path, offset, len, self.size())?;
        let start = offset as usize;
        Ok(self.data[start..start + len].to_vec())
    }
}

struct MemFileWriter {
    path:  String,
    buf:   Vec<u8>,
    files: MemFiles,
}

impl Write for MemFileWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> { Ok(()) }
}

impl FileWriter for MemFileWriter {
    fn finalize(self: Box<Self>) -> Result<u64> {
        let len = self.buf.len() as u64;
        self.files.write().insert(self.path, Arc::new(self.buf));
        Ok(len)
    }
}

impl FileSystem for MemoryFileSystem {
    fn open_file(&self, path: &str) -> Result<Arc<dyn FileReader>> {
        let data = self.files.read().get(path).cloned().ok_or_else(|| {
            OlapError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such file: {path}"),
            ))
        })?;
        Ok(Arc::new(MemFileReader { path: path.into(), data, reads: self.reads.clone() }))
    }

    fn create_file(&self, path: &str) -> Result<Box<dyn FileWriter>> {
        Ok(Box::new(MemFileWriter {
            path:  path.into(),
            buf:   Vec::new(),
            files: self.files.clone(),
        }))
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let mut files = self.files.write();
        let data = files.remove(from).ok_or_else(|| {
            OlapError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such file: {from}"),
            ))
        })?;
        files.insert(to.into(), data);
        Ok(())
    }

    fn delete_file(&self, path: &str) -> Result<()> {
        self.files.write().remove(path);
        Ok(())
    }

    fn exists(&self, path: &str) -> Result<bool> {
        let files = self.files.read();
        if files.contains_key(path) {
            return Ok(true);
        }
        let prefix = format!("{}/", path.trim_end_matches('/'));
        Ok(files.keys().any(|k| k.starts_with(&prefix)))
    }

    fn list_dir(&self, dir: &str) -> Result<Vec<String>> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        let names: BTreeSet<String> = self.files.read().keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter_map(|rest| rest.split('/').next())
            .map(str::to_owned)
            .collect();
        Ok(names.into_iter().collect())
    }

    fn create_dir_all(&self, _dir: &str) -> Result<()> { Ok(()) }

    fn delete_dir_all(&self, dir: &str) -> Result<()> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        self.files.write().retain(|k, _| !k.starts_with(&prefix));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn write_file(fs: &dyn FileSystem, path: &str, data: &[u8]) {
        let mut w = fs.create_file(path).unwrap();
        w.write_all(data).unwrap();
        w.finalize().unwrap();
    }

    #[test]
    fn memory_fs_read_past_end_is_corruption() {
        let fs = MemoryFileSystem::new();
        write_file(&fs, "t/a.seg", b"0123456789");
        let r = fs.open_file("t/a.seg").unwrap();
        assert_eq!(r.size(), 10);
        assert_eq!(r.read_at(2, 3).unwrap(), b"234");
        assert!(r.read_at(8, 3).unwrap_err().is_corruption());
        assert_eq!(fs.read_count(), 2);
    }

    #[test]
    fn memory_fs_list_and_delete_dir() {
        let fs = MemoryFileSystem::new();
        write_file(&fs, "data/1/a", b"a");
        write_file(&fs, "data/1/b", b"b");
        write_file(&fs, "data/2/c", b"c");
        assert_eq!(fs.list_dir("data").unwrap(), vec!["1".to_string(), "2".to_string()]);
        assert!(fs.exists("data/1").unwrap());
        fs.delete_dir_all("data/1").unwrap();
        assert!(!fs.exists("data/1").unwrap());
        assert_eq!(fs.list_dir("data").unwrap(), vec!["2".to_string()]);
    }

    #[test]
    fn local_fs_round_trip_and_rename() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path().to_string_lossy().into_owned();
        let fs = LocalFileSystem::new();
        let tmp = join_path(&root, "x/meta.tmp");
        write_file(&fs, &tmp, b"hello world");
        let dst = join_path(&root, "x/meta");
        fs.rename(&tmp, &dst).unwrap();
        assert!(!fs.exists(&tmp).unwrap());
        let r = fs.open_file(&dst).unwrap();
        assert_eq!(r.read_at(6, 5).unwrap(), b"world");
        assert!(r.read_at(6, 6).unwrap_err().is_corruption());
        assert_eq!(fs.list_dir(&join_path(&root, "x")).unwrap(), vec!["meta".to_string()]);
        fs.delete_file(&dst).unwrap();
        fs.delete_file(&dst).unwrap();
    }

    #[test]
    fn local_fs_syncs_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path().to_string_lossy().into_owned();
        let fs = LocalFileSystem::new();
        fs.sync_dir(&root).unwrap();
        assert!(fs.sync_dir(&join_path(&root, "missing")).is_err());
        // 内存实现没有目录项，直接成功
        MemoryFileSystem::new().sync_dir("nowhere").unwrap();
    }
}
