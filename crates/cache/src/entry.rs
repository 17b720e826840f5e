//! Cache entry model, cost scoring, and the L2 compression codec.

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use gridiron_core::Error;
use std::io::{Read, Write};
use std::time::Instant;

/// Which tier an entry currently lives in. A key exists in at most one tier
/// at a time; promotion/demotion is always a move, never a duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    L1Hot,
    L2Compressed,
    L3Predictive,
}

/// Payload representation per tier.
#[derive(Debug, Clone)]
pub(crate) enum Payload {
    Plain(serde_json::Value),
    Compressed(Vec<u8>),
}

/// A single cached artifact.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub tier: Tier,
    pub(crate) payload: Payload,
    pub size_bytes: usize,
    /// Caller-supplied recomputation cost weight (>= 1.0 is typical; an
    /// artifact that required an external network call scores higher than a
    /// pure local computation).
    pub cost_hint: f64,
    pub last_access: Instant,
    pub access_count: u64,
    pub expires_at: Instant,
}

/// Recency half-life for the cost score, in seconds.
const RECENCY_HALF_LIFE_SECS: f64 = 120.0;

impl CacheEntry {
    pub(crate) fn new_plain(
        key: String,
        value: serde_json::Value,
        cost_hint: f64,
        ttl: std::time::Duration,
        tier: Tier,
    ) -> Self {
        let size_bytes = approx_size(&value);
        let now = Instant::now();
        Self {
            key,
            tier,
            payload: Payload::Plain(value),
            size_bytes,
            cost_hint: cost_hint.max(1.0),
            last_access: now,
            access_count: 0,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Eviction priority: lower scores are evicted first.
    ///
    /// Combines exponential recency decay, ln-scaled access frequency, and
    /// the caller's recomputation-cost hint.
    pub fn cost_score(&self, now: Instant) -> f64 {
        let age_secs = now.duration_since(self.last_access).as_secs_f64();
        let recency = (-age_secs * std::f64::consts::LN_2 / RECENCY_HALF_LIFE_SECS).exp();
        let frequency = 1.0 + (self.access_count as f64).ln_1p();
        recency * frequency * self.cost_hint
    }

    pub(crate) fn touch(&mut self, now: Instant) {
        self.last_access = now;
        self.access_count += 1;
    }
}

/// Rough payload size used for the L2 byte budget.
pub(crate) fn approx_size(value: &serde_json::Value) -> usize {
    serde_json::to_string(value).map(|s| s.len()).unwrap_or(0)
}

/// Compress a payload for L2 residency.
pub(crate) fn compress(value: &serde_json::Value) -> Result<Vec<u8>, Error> {
    let raw = serde_json::to_vec(value)
        .map_err(|e| Error::CacheCorruption(format!("serialize failed: {e}")))?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder
        .write_all(&raw)
        .and_then(|_| encoder.finish())
        .map_err(|e| Error::CacheCorruption(format!("compress failed: {e}")))
}

/// Decompress an L2 payload. Failures surface as `CacheCorruption`, which
/// the manager converts into an eviction plus a miss.
pub(crate) fn decompress(bytes: &[u8]) -> Result<serde_json::Value, Error> {
    let mut decoder = GzDecoder::new(bytes);
    let mut raw = Vec::new();
    decoder
        .read_to_end(&mut raw)
        .map_err(|e| Error::CacheCorruption(format!("decompress failed: {e}")))?;
    serde_json::from_slice(&raw)
        .map_err(|e| Error::CacheCorruption(format!("deserialize failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn entry(cost_hint: f64) -> CacheEntry {
        CacheEntry::new_plain(
            "k".into(),
            serde_json::json!({"v": 1}),
            cost_hint,
            Duration::from_secs(60),
            Tier::L1Hot,
        )
    }

    #[test]
    fn fresh_entry_is_not_expired() {
        let e = entry(1.0);
        assert!(!e.is_expired(Instant::now()));
    }

    #[test]
    fn higher_cost_hint_scores_higher() {
        let now = Instant::now();
        let cheap = entry(1.0);
        let expensive = entry(5.0);
        assert!(expensive.cost_score(now) > cheap.cost_score(now));
    }

    #[test]
    fn touched_entry_scores_higher_than_untouched() {
        let now = Instant::now();
        let cold = entry(1.0);
        let mut hot = entry(1.0);
        for _ in 0..10 {
            hot.touch(now);
        }
        assert!(hot.cost_score(now) > cold.cost_score(now));
    }

    #[test]
    fn cost_hint_floor_is_one() {
        let e = entry(0.0);
        assert_eq!(e.cost_hint, 1.0);
    }

    #[test]
    fn compress_roundtrip() {
        let value = serde_json::json!({"teams": ["osu", "psu"], "spread": -3.5});
        let bytes = compress(&value).unwrap();
        let back = decompress(&bytes).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn truncated_stream_is_corruption() {
        let value = serde_json::json!({"a": [1, 2, 3, 4, 5, 6, 7, 8]});
        let bytes = compress(&value).unwrap();
        let err = decompress(&bytes[..bytes.len() / 2]).unwrap_err();
        assert!(matches!(err, Error::CacheCorruption(_)));
    }

    #[test]
    fn garbage_bytes_are_corruption() {
        let err = decompress(b"not gzip at all").unwrap_err();
        assert!(matches!(err, Error::CacheCorruption(_)));
    }
}
