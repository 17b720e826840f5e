//! The multi-tier cache manager.
//!
//! Storage is split into independent shards, each guarding its own slice of
//! every tier behind its own lock, so unrelated keys never contend on a
//! global lock. All tier invariants (single residency, bounded L1 count,
//! bounded L2 bytes) are enforced per shard.

use crate::entry::{self, CacheEntry, Payload, Tier};
use crate::predictor::{PreloadFn, SequencePredictor};
use crate::stats::{CacheStats, CacheStatsSnapshot};
use gridiron_config::CacheConfig;
use gridiron_core::{Error, Result};
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, warn};

/// One shard's slice of all three tiers.
#[derive(Default)]
struct Shard {
    l1: HashMap<String, CacheEntry>,
    l2: HashMap<String, CacheEntry>,
    l3: HashMap<String, CacheEntry>,
    /// Compressed bytes currently resident in this shard's L2.
    l2_bytes: usize,
}

type InflightResult = Option<Result<serde_json::Value>>;

/// The cache manager. Construct once, share via `Arc`.
pub struct CacheManager {
    shards: Vec<RwLock<Shard>>,
    l1_per_shard: usize,
    l2_bytes_per_shard: usize,
    default_ttl: Duration,
    l3_ttl: Duration,
    stats: CacheStats,
    /// In-flight computations per key for stampede prevention.
    inflight: Mutex<HashMap<String, watch::Receiver<InflightResult>>>,
    predictor: Mutex<SequencePredictor>,
}

/// Unregisters a leader's in-flight entry on drop, so the map never holds
/// a receiver for a computation that unwound without completing.
struct InflightCleanup {
    manager: Arc<CacheManager>,
    key: String,
}

impl Drop for InflightCleanup {
    fn drop(&mut self) {
        self.manager
            .inflight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
    }
}

impl CacheManager {
    pub fn new(config: &CacheConfig) -> Self {
        let shards = config.shards.max(1);
        Self {
            shards: (0..shards).map(|_| RwLock::new(Shard::default())).collect(),
            l1_per_shard: (config.l1_max_entries / shards).max(1),
            l2_bytes_per_shard: (config.l2_max_bytes / shards).max(1024),
            default_ttl: Duration::from_secs(config.entry_ttl_secs),
            l3_ttl: Duration::from_secs(config.l3_ttl_secs),
            stats: CacheStats::default(),
            inflight: Mutex::new(HashMap::new()),
            predictor: Mutex::new(SequencePredictor::new(1024, 1024)),
        }
    }

    fn shard_for(&self, key: &str) -> &RwLock<Shard> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    /// Look up a key across all tiers.
    ///
    /// An L2 hit is decompressed and promoted to L1; an L3 hit is promoted
    /// to L1 and counted as a consumed prediction. Expired or corrupt
    /// entries are removed and reported as misses — corruption is never
    /// fatal to the caller.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let now = Instant::now();
        let mut shard = self
            .shard_for(key)
            .write()
            .unwrap_or_else(|e| e.into_inner());

        if let Some(entry) = shard.l1.get_mut(key) {
            if entry.is_expired(now) {
                shard.l1.remove(key);
                CacheStats::bump(&self.stats.misses);
                return None;
            }
            entry.touch(now);
            CacheStats::bump(&self.stats.hits);
            if let Payload::Plain(value) = &entry.payload {
                return Some(value.clone());
            }
        }

        if let Some(entry) = shard.l2.remove(key) {
            shard.l2_bytes = shard.l2_bytes.saturating_sub(entry.size_bytes);
            if entry.is_expired(now) {
                CacheStats::bump(&self.stats.misses);
                return None;
            }
            let Payload::Compressed(bytes) = &entry.payload else {
                CacheStats::bump(&self.stats.misses);
                return None;
            };
            return match entry::decompress(bytes) {
                Ok(value) => {
                    let mut promoted = CacheEntry {
                        payload: Payload::Plain(value.clone()),
                        size_bytes: entry::approx_size(&value),
                        tier: Tier::L1Hot,
                        ..entry
                    };
                    promoted.touch(now);
                    self.insert_l1(&mut shard, promoted);
                    CacheStats::bump(&self.stats.hits);
                    Some(value)
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Corrupt cache entry evicted");
                    CacheStats::bump(&self.stats.corruptions);
                    CacheStats::bump(&self.stats.misses);
                    None
                }
            };
        }

        if let Some(entry) = shard.l3.remove(key) {
            if entry.is_expired(now) {
                CacheStats::bump(&self.stats.misses);
                return None;
            }
            if let Payload::Plain(value) = entry.payload.clone() {
                let mut promoted = CacheEntry {
                    tier: Tier::L1Hot,
                    ..entry
                };
                promoted.touch(now);
                self.insert_l1(&mut shard, promoted);
                CacheStats::bump(&self.stats.hits);
                CacheStats::bump(&self.stats.preloads_consumed);
                return Some(value);
            }
        }

        CacheStats::bump(&self.stats.misses);
        None
    }

    /// Insert a value into the hot tier with the default TTL.
    pub fn put(&self, key: &str, value: serde_json::Value, cost_hint: f64) {
        self.put_with_ttl(key, value, cost_hint, self.default_ttl);
    }

    /// Insert a value into the hot tier with an explicit TTL.
    pub fn put_with_ttl(
        &self,
        key: &str,
        value: serde_json::Value,
        cost_hint: f64,
        ttl: Duration,
    ) {
        let entry = CacheEntry::new_plain(key.to_string(), value, cost_hint, ttl, Tier::L1Hot);
        let mut shard = self
            .shard_for(key)
            .write()
            .unwrap_or_else(|e| e.into_inner());
        // Single-residency invariant: a put supersedes any other tier copy.
        if let Some(old) = shard.l2.remove(key) {
            shard.l2_bytes = shard.l2_bytes.saturating_sub(old.size_bytes);
        }
        shard.l3.remove(key);
        self.insert_l1(&mut shard, entry);
    }

    /// Remove a key from whichever tier holds it.
    pub fn invalidate(&self, key: &str) {
        let mut shard = self
            .shard_for(key)
            .write()
            .unwrap_or_else(|e| e.into_inner());
        shard.l1.remove(key);
        if let Some(old) = shard.l2.remove(key) {
            shard.l2_bytes = shard.l2_bytes.saturating_sub(old.size_bytes);
        }
        shard.l3.remove(key);
    }

    /// Compute-once lookup: if the key is cached, return it; otherwise run
    /// `compute` exactly once no matter how many callers race on the key.
    ///
    /// Concurrent callers subscribe to the single in-flight computation. The
    /// computation runs in a spawned task, so a caller that cancels does not
    /// abandon it — the result still lands in the cache for future callers.
    ///
    /// Returns the value and whether it was served from cache.
    pub async fn get_or_compute<F, Fut>(
        self: &Arc<Self>,
        key: &str,
        cost_hint: f64,
        compute: F,
    ) -> (Result<serde_json::Value>, bool)
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<serde_json::Value>> + Send + 'static,
    {
        if let Some(value) = self.get(key) {
            return (Ok(value), true);
        }

        let (lead_tx, mut rx) = {
            let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(rx) = inflight.get(key) {
                (None, rx.clone())
            } else {
                let (tx, rx) = watch::channel(None);
                inflight.insert(key.to_string(), rx.clone());
                (Some(tx), rx)
            }
        };

        if let Some(tx) = lead_tx {
            let fut = compute();
            let this = Arc::clone(self);
            let key = key.to_string();
            tokio::spawn(async move {
                // Removes the in-flight entry even if the computation
                // panics, so the key stays computable by later callers.
                let _cleanup = InflightCleanup {
                    manager: Arc::clone(&this),
                    key: key.clone(),
                };
                let result = fut.await;
                if let Ok(value) = &result {
                    this.put(&key, value.clone(), cost_hint);
                }
                let _ = tx.send(Some(result));
            });
        }

        loop {
            if let Some(result) = rx.borrow_and_update().clone() {
                return (result, false);
            }
            if rx.changed().await.is_err() {
                return (
                    Err(Error::Internal("in-flight cache computation dropped".into())),
                    false,
                );
            }
        }
    }

    /// Record that `user` consumed `key` and, when the sequence model knows
    /// a likely successor, speculatively rebuild it into L3. A prediction
    /// that fails or is never consumed is discarded silently.
    pub fn observe(self: &Arc<Self>, user_id: &str, key: &str, recipe: PreloadFn) {
        let predicted = {
            let mut predictor = self.predictor.lock().unwrap_or_else(|e| e.into_inner());
            predictor.observe(user_id, key, recipe)
        };

        let Some((next_key, next_recipe)) = predicted else {
            return;
        };
        if self.contains(&next_key) {
            return;
        }

        debug!(key = %next_key, user = %user_id, "Staging predicted artifact");
        let this = Arc::clone(self);
        tokio::spawn(async move {
            match next_recipe().await {
                Ok(value) => {
                    this.stage_predictive(&next_key, value);
                    CacheStats::bump(&this.stats.preloads_staged);
                }
                Err(e) => {
                    debug!(key = %next_key, error = %e, "Prediction recompute failed; discarded");
                }
            }
        });
    }

    /// Place a speculative value in L3 with the short predictive TTL.
    pub fn stage_predictive(&self, key: &str, value: serde_json::Value) {
        let entry =
            CacheEntry::new_plain(key.to_string(), value, 1.0, self.l3_ttl, Tier::L3Predictive);
        let mut shard = self
            .shard_for(key)
            .write()
            .unwrap_or_else(|e| e.into_inner());
        if shard.l1.contains_key(key) || shard.l2.contains_key(key) {
            return;
        }
        if shard.l3.len() >= self.l1_per_shard {
            let now = Instant::now();
            if let Some(victim) = lowest_score_key(&shard.l3, now) {
                shard.l3.remove(&victim);
                CacheStats::bump(&self.stats.evictions);
            }
        }
        shard.l3.insert(key.to_string(), entry);
    }

    /// Whether a non-expired entry exists in any tier. Does not touch
    /// recency.
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        let shard = self.shard_for(key).read().unwrap_or_else(|e| e.into_inner());
        [&shard.l1, &shard.l2, &shard.l3]
            .iter()
            .any(|tier| tier.get(key).is_some_and(|e| !e.is_expired(now)))
    }

    /// Sweep expired entries from every shard and tier.
    pub fn reconcile(&self) {
        let now = Instant::now();
        for lock in &self.shards {
            let mut shard = lock.write().unwrap_or_else(|e| e.into_inner());
            let before =
                shard.l1.len() + shard.l2.len() + shard.l3.len();
            shard.l1.retain(|_, e| !e.is_expired(now));
            let mut reclaimed = 0;
            shard.l2.retain(|_, e| {
                let keep = !e.is_expired(now);
                if !keep {
                    reclaimed += e.size_bytes;
                }
                keep
            });
            shard.l2_bytes = shard.l2_bytes.saturating_sub(reclaimed);
            shard.l3.retain(|_, e| !e.is_expired(now));
            let removed = before - (shard.l1.len() + shard.l2.len() + shard.l3.len());
            for _ in 0..removed {
                CacheStats::bump(&self.stats.evictions);
            }
        }
    }

    /// Run `reconcile` on an interval until the handle is shut down.
    pub fn spawn_reconcile(self: &Arc<Self>, interval: Duration) -> ReconcileHandle {
        let (tx, mut rx) = watch::channel(false);
        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => this.reconcile(),
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        ReconcileHandle { shutdown: tx, task }
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    // ── Internal tier plumbing ────────────────────────────────────────────

    /// Insert into L1, demoting the lowest-scored resident when full.
    fn insert_l1(&self, shard: &mut Shard, entry: CacheEntry) {
        shard.l1.remove(&entry.key);
        let now = Instant::now();
        while shard.l1.len() >= self.l1_per_shard {
            let Some(victim_key) = lowest_score_key(&shard.l1, now) else {
                break;
            };
            let victim = shard.l1.remove(&victim_key);
            if let Some(victim) = victim {
                self.demote_to_l2(shard, victim, now);
            }
        }
        shard.l1.insert(entry.key.clone(), entry);
    }

    /// Demote an L1 eviction into L2 if the byte budget permits, evicting
    /// strictly lower-scored L2 residents to make room. Dropped outright
    /// when it cannot fit.
    fn demote_to_l2(&self, shard: &mut Shard, mut entry: CacheEntry, now: Instant) {
        let Payload::Plain(value) = &entry.payload else {
            CacheStats::bump(&self.stats.evictions);
            return;
        };
        let bytes = match entry::compress(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %entry.key, error = %e, "Demotion compress failed; entry dropped");
                CacheStats::bump(&self.stats.evictions);
                return;
            }
        };
        if bytes.len() > self.l2_bytes_per_shard {
            CacheStats::bump(&self.stats.evictions);
            return;
        }

        let score = entry.cost_score(now);
        while shard.l2_bytes + bytes.len() > self.l2_bytes_per_shard {
            let Some(victim_key) = lowest_score_key(&shard.l2, now) else {
                break;
            };
            // Never churn a higher-valued resident out for a lower one.
            let victim_score = shard.l2[&victim_key].cost_score(now);
            if victim_score >= score {
                CacheStats::bump(&self.stats.evictions);
                return;
            }
            if let Some(victim) = shard.l2.remove(&victim_key) {
                shard.l2_bytes = shard.l2_bytes.saturating_sub(victim.size_bytes);
                CacheStats::bump(&self.stats.evictions);
            }
        }

        entry.size_bytes = bytes.len();
        entry.payload = Payload::Compressed(bytes);
        entry.tier = Tier::L2Compressed;
        shard.l2_bytes += entry.size_bytes;
        shard.l2.insert(entry.key.clone(), entry);
        CacheStats::bump(&self.stats.demotions);
    }
}

fn lowest_score_key(tier: &HashMap<String, CacheEntry>, now: Instant) -> Option<String> {
    tier.values()
        .min_by(|a, b| {
            a.cost_score(now)
                .partial_cmp(&b.cost_score(now))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|e| e.key.clone())
}

/// Handle for the background reconcile loop.
pub struct ReconcileHandle {
    shutdown: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl ReconcileHandle {
    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn small_config() -> gridiron_config::CacheConfig {
        gridiron_config::CacheConfig {
            l1_max_entries: 2,
            l2_max_bytes: 4096,
            l3_ttl_secs: 1,
            entry_ttl_secs: 60,
            shards: 1,
            reconcile_interval_secs: 1,
        }
    }

    fn manager() -> Arc<CacheManager> {
        Arc::new(CacheManager::new(&small_config()))
    }

    #[tokio::test]
    async fn put_then_get_roundtrip() {
        let cache = manager();
        cache.put("game_1", serde_json::json!({"winner": "osu"}), 1.0);
        assert_eq!(
            cache.get("game_1"),
            Some(serde_json::json!({"winner": "osu"}))
        );
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn missing_key_is_a_miss() {
        let cache = manager();
        assert_eq!(cache.get("nope"), None);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn invalidate_removes_entry() {
        let cache = manager();
        cache.put("k", serde_json::json!(1), 1.0);
        cache.invalidate("k");
        assert_eq!(cache.get("k"), None);
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss() {
        let cache = manager();
        cache.put_with_ttl("k", serde_json::json!(1), 1.0, Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get("k"), None);
    }

    #[tokio::test]
    async fn l1_overflow_demotes_to_l2_and_survives() {
        let cache = manager();
        // Capacity is 2; the third put must demote the coldest entry.
        cache.put("a", serde_json::json!("value_a"), 1.0);
        cache.put("b", serde_json::json!("value_b"), 1.0);
        cache.put("c", serde_json::json!("value_c"), 1.0);
        assert_eq!(cache.stats().demotions, 1);

        // All three keys are still retrievable — the demoted one comes back
        // from L2 via decompression.
        assert_eq!(cache.get("a"), Some(serde_json::json!("value_a")));
        assert_eq!(cache.get("b"), Some(serde_json::json!("value_b")));
        assert_eq!(cache.get("c"), Some(serde_json::json!("value_c")));
    }

    #[tokio::test]
    async fn put_supersedes_other_tiers() {
        let cache = manager();
        cache.stage_predictive("k", serde_json::json!("speculative"));
        cache.put("k", serde_json::json!("authoritative"), 1.0);
        assert_eq!(cache.get("k"), Some(serde_json::json!("authoritative")));
    }

    #[tokio::test]
    async fn corrupt_l2_entry_is_evicted_not_fatal() {
        let cache = manager();
        {
            let mut shard = cache.shards[0].write().unwrap();
            let now = Instant::now();
            shard.l2.insert(
                "bad".into(),
                CacheEntry {
                    key: "bad".into(),
                    tier: Tier::L2Compressed,
                    payload: Payload::Compressed(b"garbage".to_vec()),
                    size_bytes: 7,
                    cost_hint: 1.0,
                    last_access: now,
                    access_count: 0,
                    expires_at: now + Duration::from_secs(60),
                },
            );
            shard.l2_bytes += 7;
        }
        assert_eq!(cache.get("bad"), None);
        assert_eq!(cache.stats().corruptions, 1);
        // Entry is gone; a fresh put works fine.
        cache.put("bad", serde_json::json!("fresh"), 1.0);
        assert_eq!(cache.get("bad"), Some(serde_json::json!("fresh")));
    }

    #[tokio::test]
    async fn get_or_compute_runs_compute_once_per_key() {
        let cache = manager();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                let (result, _) = cache
                    .get_or_compute("team_a_vs_team_b", 2.0, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(serde_json::json!({"spread": -3.5}))
                    })
                    .await;
                result.unwrap()
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), serde_json::json!({"spread": -3.5}));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // Result was cached for later callers.
        assert!(cache.get("team_a_vs_team_b").is_some());
    }

    #[tokio::test]
    async fn get_or_compute_serves_cached_value() {
        let cache = manager();
        cache.put("k", serde_json::json!(7), 1.0);
        let (result, was_hit) = cache
            .get_or_compute("k", 1.0, || async { Ok(serde_json::json!(8)) })
            .await;
        assert_eq!(result.unwrap(), serde_json::json!(7));
        assert!(was_hit);
    }

    #[tokio::test]
    async fn failed_compute_is_not_cached() {
        let cache = manager();
        let (result, _) = cache
            .get_or_compute("k", 1.0, || async {
                Err(Error::Internal("model offline".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(cache.get("k"), None);
    }

    #[tokio::test]
    async fn panicking_compute_does_not_poison_the_key() {
        let cache = manager();
        let (first, _) = cache
            .get_or_compute("upset_odds", 1.0, || async { panic!("model blew up") })
            .await;
        assert!(first.is_err());
        // Let the unwound leader task finish unregistering itself.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (second, was_hit) = cache
            .get_or_compute("upset_odds", 1.0, || async { Ok(serde_json::json!(42)) })
            .await;
        assert_eq!(second.unwrap(), serde_json::json!(42));
        assert!(!was_hit);
    }

    #[tokio::test]
    async fn computation_outlives_cancelled_waiter() {
        let cache = manager();
        let waiter = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_compute("slow", 1.0, || async {
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Ok(serde_json::json!("done"))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        waiter.abort();

        // The spawned computation still completes and populates the cache.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.get("slow"), Some(serde_json::json!("done")));
    }

    #[tokio::test]
    async fn observed_sequences_stage_predictions() {
        let cache = manager();
        let recipe_for = |v: serde_json::Value| -> PreloadFn {
            Arc::new(move || {
                let v = v.clone();
                Box::pin(async move { Ok(v) })
            })
        };

        // Teach the model: a → b.
        cache.observe("u1", "a", recipe_for(serde_json::json!("a")));
        cache.observe("u1", "b", recipe_for(serde_json::json!("b")));

        // A second user hits "a"; "b" should get staged in L3.
        cache.observe("u2", "a", recipe_for(serde_json::json!("a")));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(cache.stats().preloads_staged, 1);
        // Consuming the staged entry promotes it and counts the prediction.
        assert_eq!(cache.get("b"), Some(serde_json::json!("b")));
        assert_eq!(cache.stats().preloads_consumed, 1);
    }

    #[tokio::test]
    async fn unconsumed_predictions_expire_silently() {
        let cache = manager();
        cache.stage_predictive("matchup:next", serde_json::json!("x"));
        // L3 TTL is 1s in the test config.
        std::thread::sleep(Duration::from_millis(1100));
        cache.reconcile();
        assert!(!cache.contains("matchup:next"));
    }

    #[tokio::test]
    async fn reconcile_loop_shuts_down() {
        let cache = manager();
        let handle = cache.spawn_reconcile(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.shutdown().await;
    }
}
