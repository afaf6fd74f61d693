//! Block timing counters written by the rendering thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::queue::RtQueue;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockTiming {
    pub blocks: u64,
    pub overruns: u64,
    pub last_block_ns: u64,
    pub max_block_ns: u64,
}

/// Shared, lock-free block timing collector.
///
/// Only the thread rendering blocks records; any thread may take snapshots or
/// drain the bounded history. The oldest history entries are evicted first.
#[derive(Clone)]
pub struct BlockMetrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    blocks: AtomicU64,
    overruns: AtomicU64,
    last_block_ns: AtomicU64,
    max_block_ns: AtomicU64,
    history: RtQueue<BlockTiming>,
}

impl BlockMetrics {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                blocks: AtomicU64::new(0),
                overruns: AtomicU64::new(0),
                last_block_ns: AtomicU64::new(0),
                max_block_ns: AtomicU64::new(0),
                history: RtQueue::with_capacity(history_capacity),
            }),
        }
    }

    pub fn snapshot(&self) -> BlockTiming {
        BlockTiming {
            blocks: self.inner.blocks.load(Ordering::Relaxed),
            overruns: self.inner.overruns.load(Ordering::Relaxed),
            last_block_ns: self.inner.last_block_ns.load(Ordering::Relaxed),
            max_block_ns: self.inner.max_block_ns.load(Ordering::Relaxed),
        }
    }

    /// Records one rendered block. A block that took longer than `budget`
    /// (the real-time duration of the block) counts as an overrun.
    pub fn record_block(&self, elapsed: Duration, budget: Duration) {
        let nanos = elapsed.as_nanos().min(u128::from(u64::MAX)) as u64;
        let budget_ns = budget.as_nanos().min(u128::from(u64::MAX)) as u64;
        let blocks = self.inner.blocks.fetch_add(1, Ordering::Relaxed) + 1;
        self.inner.last_block_ns.store(nanos, Ordering::Relaxed);
        let previous_max = self.inner.max_block_ns.fetch_max(nanos, Ordering::Relaxed);
        let overruns = if budget_ns > 0 && nanos > budget_ns {
            self.inner.overruns.fetch_add(1, Ordering::Relaxed) + 1
        } else {
            self.inner.overruns.load(Ordering::Relaxed)
        };
        self.inner.history.push_evicting(BlockTiming {
            blocks,
            overruns,
            last_block_ns: nanos,
            max_block_ns: previous_max.max(nanos),
        });
    }

    pub fn drain_history(&self) -> Vec<BlockTiming> {
        self.inner.history.take_all()
    }

    pub fn reset(&self) {
        self.inner.blocks.store(0, Ordering::Relaxed);
        self.inner.overruns.store(0, Ordering::Relaxed);
        self.inner.last_block_ns.store(0, Ordering::Relaxed);
        self.inner.max_block_ns.store(0, Ordering::Relaxed);
        self.inner.history.take_all();
    }
}
