//! Dynamically sized worker pool.
//!
//! Concurrency is bounded by a fair `tokio::sync::Semaphore` whose permit
//! count floats between `min_workers` and `max_workers`. A background sizer
//! task samples the load signal: queued waiters grow the pool immediately,
//! while shrinking back toward the floor only happens after a quiet cooldown
//! so bursty traffic does not thrash the size.

use gridiron_config::PoolConfig;
use gridiron_core::{Error, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, watch};
use tracing::{debug, info};

/// Decrements a load counter on drop.
struct CounterGuard<'a>(&'a AtomicUsize);

impl Drop for CounterGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    config: PoolConfig,
    size: AtomicUsize,
    waiting: AtomicUsize,
    in_flight: AtomicUsize,
    last_scale: Mutex<Instant>,
    shutdown: watch::Sender<bool>,
    sizer: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create the pool at its minimum size and start the sizer task.
    pub fn new(config: PoolConfig) -> Arc<Self> {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let pool = Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(config.min_workers)),
            size: AtomicUsize::new(config.min_workers),
            waiting: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            last_scale: Mutex::new(Instant::now()),
            shutdown,
            sizer: Mutex::new(None),
            config,
        });

        let sizer_handle = {
            let pool = Arc::clone(&pool);
            let interval = Duration::from_millis(pool.config.sample_interval_ms);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => pool.sample(),
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                break;
                            }
                        }
                    }
                }
            })
        };
        *pool.sizer.lock().unwrap_or_else(|e| e.into_inner()) = Some(sizer_handle);

        pool
    }

    /// Run a unit of work inside the pool, waiting FIFO for a slot.
    ///
    /// Load counters are guard-held: a caller cancelled while queued, or a
    /// task that panics mid-run, never leaves phantom pressure behind for
    /// the sizer.
    pub async fn run<T, Fut>(&self, fut: Fut) -> Result<T>
    where
        Fut: std::future::Future<Output = Result<T>>,
    {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let permit = {
            let _queued = CounterGuard(&self.waiting);
            self.semaphore.acquire().await
        };
        let permit = match permit {
            Ok(permit) => permit,
            Err(_) => return Err(Error::Internal("worker pool is shut down".into())),
        };

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let _running = CounterGuard(&self.in_flight);
        let result = fut.await;
        drop(permit);
        result
    }

    pub fn current_size(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Stop the sizer task. In-flight work finishes normally.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let task = self.sizer.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// One sizing decision based on the current load signal.
    fn sample(&self) {
        let waiting = self.waiting.load(Ordering::SeqCst);
        let in_flight = self.in_flight.load(Ordering::SeqCst);
        let size = self.size.load(Ordering::SeqCst);
        let now = Instant::now();

        if waiting > 0 && size < self.config.max_workers {
            // Pressure: grow by the whole backlog, up to the ceiling.
            let grow = waiting.min(self.config.max_workers - size);
            self.semaphore.add_permits(grow);
            self.size.fetch_add(grow, Ordering::SeqCst);
            *self.last_scale.lock().unwrap_or_else(|e| e.into_inner()) = now;
            info!(from = size, to = size + grow, waiting, "Worker pool scaled up");
            return;
        }

        if waiting == 0 && in_flight < size && size > self.config.min_workers {
            let mut last_scale = self.last_scale.lock().unwrap_or_else(|e| e.into_inner());
            let cooldown = Duration::from_millis(self.config.scale_down_cooldown_ms);
            if now.duration_since(*last_scale) < cooldown {
                return;
            }
            // Retire one idle slot per sample.
            if let Ok(permit) = self.semaphore.try_acquire() {
                permit.forget();
                self.size.fetch_sub(1, Ordering::SeqCst);
                *last_scale = now;
                debug!(from = size, to = size - 1, "Worker pool scaled down");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(min: usize, max: usize) -> PoolConfig {
        PoolConfig {
            min_workers: min,
            max_workers: max,
            task_timeout_ms: 5_000,
            max_attempts: 1,
            retry_base_ms: 10,
            sample_interval_ms: 20,
            scale_down_cooldown_ms: 60,
        }
    }

    /// Tracks the highest number of tasks observed running at once.
    struct ConcurrencyProbe {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ConcurrencyProbe {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            })
        }

        async fn occupy(&self, hold: Duration) {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(hold).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_the_ceiling() {
        let pool = WorkerPool::new(config(2, 2));
        let probe = ConcurrencyProbe::new();

        let mut handles = Vec::new();
        for _ in 0..6 {
            let pool = Arc::clone(&pool);
            let probe = Arc::clone(&probe);
            handles.push(tokio::spawn(async move {
                pool.run(async {
                    probe.occupy(Duration::from_millis(20)).await;
                    Ok(())
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(probe.peak.load(Ordering::SeqCst) <= 2);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn backlog_grows_the_pool() {
        let pool = WorkerPool::new(config(1, 4));
        assert_eq!(pool.current_size(), 1);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let pool = Arc::clone(&pool);
            handles.push(tokio::spawn(async move {
                pool.run(async {
                    tokio::time::sleep(Duration::from_millis(150)).await;
                    Ok(())
                })
                .await
            }));
        }

        // Give the sizer a few samples to react to the waiters.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(pool.current_size() > 1);
        assert!(pool.current_size() <= 4);

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn idle_pool_shrinks_back_after_cooldown() {
        let pool = WorkerPool::new(config(1, 4));

        // Build pressure to force growth.
        let mut handles = Vec::new();
        for _ in 0..4 {
            let pool = Arc::clone(&pool);
            handles.push(tokio::spawn(async move {
                pool.run(async {
                    tokio::time::sleep(Duration::from_millis(80)).await;
                    Ok(())
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        let grown = pool.current_size();
        assert!(grown > 1);

        // Idle past the cooldown; one slot retires per sample.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(pool.current_size() < grown);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn cancelled_waiter_leaves_no_phantom_pressure() {
        let pool = WorkerPool::new(config(1, 4));

        // Occupy the only slot.
        let slot = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                pool.run(async {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(())
                })
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        // A queued caller gives up before a slot frees.
        {
            let pool = Arc::clone(&pool);
            let queued: std::result::Result<Result<()>, _> =
                tokio::time::timeout(Duration::from_millis(20), pool.run(async { Ok(()) })).await;
            assert!(queued.is_err());
        }
        assert_eq!(pool.waiting.load(Ordering::SeqCst), 0);

        slot.await.unwrap().unwrap();
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn run_propagates_task_errors() {
        let pool = WorkerPool::new(config(1, 1));
        let result: Result<()> = pool
            .run(async { Err(Error::Internal("worker blew up".into())) })
            .await;
        assert!(result.is_err());
        pool.shutdown().await;
    }
}
