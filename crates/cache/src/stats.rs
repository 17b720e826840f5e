//! Cache diagnostics counters.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-lifetime cache counters. Cheap atomics, safe to read anytime.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub(crate) hits: AtomicU64,
    pub(crate) misses: AtomicU64,
    pub(crate) evictions: AtomicU64,
    pub(crate) demotions: AtomicU64,
    pub(crate) corruptions: AtomicU64,
    pub(crate) preloads_staged: AtomicU64,
    pub(crate) preloads_consumed: AtomicU64,
}

impl CacheStats {
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            demotions: self.demotions.load(Ordering::Relaxed),
            corruptions: self.corruptions.load(Ordering::Relaxed),
            preloads_staged: self.preloads_staged.load(Ordering::Relaxed),
            preloads_consumed: self.preloads_consumed.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// A point-in-time copy of the counters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub demotions: u64,
    pub corruptions: u64,
    pub preloads_staged: u64,
    pub preloads_consumed: u64,
}

impl CacheStatsSnapshot {
    /// Hit rate in [0.0, 1.0]; 0.0 when no lookups have happened.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
