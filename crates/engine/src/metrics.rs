//! Dispatch counters and per-processor timing aggregates.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;
use spool_core::protocol::ProcessorStats;

/// Counters shared by every dispatch component. All updates are relaxed
/// atomics; readers take a [`MetricsSnapshot`].
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    polls: AtomicU64,
    dispatched: AtomicU64,
    collisions: AtomicU64,
    auto_retries: AtomicU64,
    hard_failures: AtomicU64,
    orphans: AtomicU64,
    expired_jobs: AtomicU64,
    kill_requests: AtomicU64,
    kill_fallbacks: AtomicU64,
    processors: Mutex<BTreeMap<String, ProcessorTiming>>,
}

/// Running aggregate of the timings workers report for one processor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProcessorTiming {
    pub samples: u64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub polls: u64,
    pub dispatched: u64,
    pub collisions: u64,
    pub auto_retries: u64,
    pub hard_failures: u64,
    pub orphans: u64,
    pub expired_jobs: u64,
    pub kill_requests: u64,
    pub kill_fallbacks: u64,
    pub processors: BTreeMap<String, ProcessorTiming>,
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_poll(&self) {
        self.polls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_collision(&self) {
        self.collisions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_auto_retry(&self) {
        self.auto_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hard_failure(&self) {
        self.hard_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_orphans(&self, n: u64) {
        self.orphans.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_expired_jobs(&self, n: u64) {
        self.expired_jobs.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_kill_request(&self) {
        self.kill_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_kill_fallback(&self) {
        self.kill_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold a worker's stats event into the per-processor aggregates.
    pub fn record_stats(&self, stats: &[ProcessorStats]) {
        let Ok(mut processors) = self.processors.lock() else {
            return;
        };
        for s in stats {
            processors
                .entry(s.processor.clone())
                .and_modify(|t| {
                    let n = t.samples as f64;
                    t.avg = (t.avg * n + s.avg) / (n + 1.0);
                    t.min = t.min.min(s.min);
                    t.max = t.max.max(s.max);
                    t.samples += 1;
                })
                .or_insert(ProcessorTiming {
                    samples: 1,
                    min: s.min,
                    max: s.max,
                    avg: s.avg,
                });
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let processors = self
            .processors
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default();
        MetricsSnapshot {
            polls: self.polls.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            collisions: self.collisions.load(Ordering::Relaxed),
            auto_retries: self.auto_retries.load(Ordering::Relaxed),
            hard_failures: self.hard_failures.load(Ordering::Relaxed),
            orphans: self.orphans.load(Ordering::Relaxed),
            expired_jobs: self.expired_jobs.load(Ordering::Relaxed),
            kill_requests: self.kill_requests.load(Ordering::Relaxed),
            kill_fallbacks: self.kill_fallbacks.load(Ordering::Relaxed),
            processors,
        }
    }
}
