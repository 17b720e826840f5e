//! # Gridiron Cache
//!
//! Multi-tier key→artifact store:
//!
//! 1. **L1 (hot)** — uncompressed entries, bounded by entry count
//! 2. **L2 (compressed)** — gzip-compressed entries, bounded by byte budget
//! 3. **L3 (predictive)** — speculatively staged entries, shortest TTL
//!
//! Eviction is cost-aware (recency decay × access frequency × recomputation
//! cost); an entry evicted from L1 is demoted to L2 when the byte budget
//! permits. `get_or_compute` guarantees a single in-flight computation per
//! key regardless of concurrent callers.

pub mod entry;
pub mod manager;
pub mod predictor;
pub mod stats;

pub use entry::{CacheEntry, Tier};
pub use manager::{CacheManager, ReconcileHandle};
pub use predictor::{PreloadFn, SequencePredictor};
pub use stats::{CacheStats, CacheStatsSnapshot};
