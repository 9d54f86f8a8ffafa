//! Per-loop counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one consumption loop, shared with the orchestrator
#[derive(Debug, Default)]
pub struct LoopMetrics {
    fetched: AtomicU64,
    committed: AtomicU64,
    skipped: AtomicU64,
    handler_failures: AtomicU64,
    commit_failures: AtomicU64,
}

/// Point-in-time copy of [`LoopMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub fetched: u64,
    pub committed: u64,
    pub skipped: u64,
    pub handler_failures: u64,
    pub commit_failures: u64,
}

impl LoopMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_fetched(&self) {
        self.fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_committed(&self) {
        self.committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handler_failure(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_commit_failure(&self) {
        self.commit_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LoopStats {
        LoopStats {
            fetched: self.fetched.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            commit_failures: self.commit_failures.load(Ordering::Relaxed),
        }
    }
}
