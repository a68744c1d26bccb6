//! 进程级内存统计的接入点
//!
//! 本层只把 footer / index 占用的字节报告给外部 tracker，不拥有它的状态。

use std::fmt::Debug;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

pub trait MemTracker: Send + Sync + Debug {
    fn consume(&self, bytes: i64);
    fn release(&self, bytes: i64);
    fn consumption(&self) -> i64;
}

pub type MemTrackerPtr = Arc<dyn MemTracker>;

#[derive(Debug, Default)]
pub struct NoopMemTracker;

impl MemTracker for NoopMemTracker {
    fn consume(&self, _bytes: i64) {}
    fn release(&self, _bytes: i64) {}
    fn consumption(&self) -> i64 { 0 }
}

/// 只做计数的 tracker
#[derive(Debug, Default)]
pub struct CountingMemTracker {
    bytes: AtomicI64,
}

impl CountingMemTracker {
    pub fn new() -> Self { Self::default() }
}

impl MemTracker for CountingMemTracker {
    fn consume(&self, bytes: i64) {
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }
    fn release(&self, bytes: i64) {
        self.bytes.fetch_sub(bytes, Ordering::Relaxed);
    }
    fn consumption(&self) -> i64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

pub fn noop() -> MemTrackerPtr { Arc::new(NoopMemTracker) }
