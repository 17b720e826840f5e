//! Per-user token-bucket rate limiter with bounded FIFO waiting.
//!
//! Each user gets a bucket of `capacity` tokens refilled continuously at
//! `refill_per_sec`. An `acquire` with no available token joins a bounded
//! FIFO queue and is woken by the background refill tick; a full queue or
//! an exhausted wait deadline rejects with a retry-after hint. The bucket
//! map is guarded by a `std::sync::Mutex` held only briefly, never across
//! an await.

use gridiron_config::RateLimitConfig;
use gridiron_core::{Error, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch};
use tracing::debug;

const TICK_INTERVAL: Duration = Duration::from_millis(25);

struct Bucket {
    tokens: f64,
    last_refill: Instant,
    waiters: VecDeque<oneshot::Sender<()>>,
}

impl Bucket {
    fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
            waiters: VecDeque::new(),
        }
    }

    fn refill(&mut self, capacity: f64, per_sec: f64, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * per_sec).min(capacity);
        self.last_refill = now;
    }

    /// Drop waiters whose receiver is gone (deadline hit, caller dropped)
    /// so abandoned slots never count against the queue depth.
    fn prune_dead(&mut self) {
        self.waiters.retain(|w| !w.is_closed());
    }

    /// Hand freshly refilled tokens to queued waiters, oldest first. A
    /// waiter whose receiver is gone (deadline hit) consumes nothing.
    fn serve_waiters(&mut self) {
        while self.tokens >= 1.0 {
            let Some(waiter) = self.waiters.pop_front() else {
                break;
            };
            if waiter.send(()).is_ok() {
                self.tokens -= 1.0;
            }
        }
    }
}

/// The rate limiter. Construct once via [`RateLimiter::new`] and share.
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Mutex<HashMap<String, Bucket>>,
    shutdown: watch::Sender<bool>,
    tick_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl RateLimiter {
    /// Create the limiter and start its background refill tick.
    pub fn new(config: RateLimitConfig) -> Arc<Self> {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let limiter = Arc::new(Self {
            config,
            buckets: Mutex::new(HashMap::new()),
            shutdown,
            tick_task: Mutex::new(None),
        });

        let tick_handle = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(TICK_INTERVAL);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => limiter.tick(),
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                break;
                            }
                        }
                    }
                }
            })
        };
        *limiter
            .tick_task
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(tick_handle);

        limiter
    }

    /// Acquire one request slot for `user_id`.
    ///
    /// Grants immediately when a token is available and nobody is queued
    /// ahead. Otherwise joins the FIFO queue, waking when the refill tick
    /// hands over a token. Rejects with `RateLimited` when the queue is
    /// full or the wait deadline passes.
    pub async fn acquire(&self, user_id: &str) -> Result<()> {
        let rx = {
            let now = Instant::now();
            let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
            let bucket = buckets
                .entry(user_id.to_string())
                .or_insert_with(|| Bucket::new(self.config.capacity as f64, now));
            bucket.refill(self.config.capacity as f64, self.config.refill_per_sec, now);

            if bucket.tokens >= 1.0 && bucket.waiters.is_empty() {
                bucket.tokens -= 1.0;
                return Ok(());
            }

            bucket.prune_dead();
            if bucket.waiters.len() >= self.config.queue_depth {
                let retry_after_ms = self.retry_after_hint(bucket);
                debug!(user = %user_id, retry_after_ms, "Rate limit queue full, rejecting");
                return Err(Error::RateLimited { retry_after_ms });
            }

            let (tx, rx) = oneshot::channel();
            bucket.waiters.push_back(tx);
            rx
        };

        let max_wait = Duration::from_millis(self.config.max_wait_ms);
        match tokio::time::timeout(max_wait, rx).await {
            Ok(Ok(())) => Ok(()),
            // Sender dropped: the limiter was closed.
            Ok(Err(_)) => Err(Error::RateLimited {
                retry_after_ms: self.config.max_wait_ms,
            }),
            Err(_) => Err(Error::RateLimited {
                retry_after_ms: self.config.max_wait_ms,
            }),
        }
    }

    /// Reject every queued waiter and stop the refill tick.
    pub async fn close(&self) {
        let _ = self.shutdown.send(true);
        {
            let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
            for bucket in buckets.values_mut() {
                // Dropping the senders wakes the waiters with rejection.
                bucket.waiters.clear();
            }
        }
        let task = self
            .tick_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    fn tick(&self) {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        for bucket in buckets.values_mut() {
            bucket.refill(self.config.capacity as f64, self.config.refill_per_sec, now);
            bucket.prune_dead();
            bucket.serve_waiters();
        }
        // Full idle buckets with no waiters carry no state worth keeping.
        buckets.retain(|_, b| {
            !b.waiters.is_empty() || b.tokens < self.config.capacity as f64
        });
    }

    /// Milliseconds until a rejected caller plausibly gets a token: the
    /// whole queue ahead of it plus one token's worth of refill.
    fn retry_after_hint(&self, bucket: &Bucket) -> u64 {
        let deficit = (bucket.waiters.len() + 1) as f64 - bucket.tokens.max(0.0);
        if self.config.refill_per_sec <= 0.0 {
            return self.config.max_wait_ms;
        }
        ((deficit / self.config.refill_per_sec) * 1000.0).ceil() as u64
    }
}
