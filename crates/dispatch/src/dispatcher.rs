//! The dispatcher: classification, pooled execution, deadline enforcement,
//! and transient-failure retries.

use crate::classifier::{WorkerKind, classify};
use crate::pool::WorkerPool;
use crate::task::{TaskState, WorkerTask};
use crate::worker::WorkerRegistry;
use gridiron_config::PoolConfig;
use gridiron_context::ContextBundle;
use gridiron_core::{AnalyticsRequest, Error, Result};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// What a successful dispatch produced, for the response envelope.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub value: serde_json::Value,
    pub worker_used: WorkerKind,
    /// Retries performed beyond the first attempt.
    pub retries: u32,
}

pub struct Dispatcher {
    registry: WorkerRegistry,
    pool: Arc<WorkerPool>,
    config: PoolConfig,
}

impl Dispatcher {
    pub fn new(registry: WorkerRegistry, config: PoolConfig) -> Self {
        Self {
            registry,
            pool: WorkerPool::new(config.clone()),
            config,
        }
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Execute the request on the worker its query type maps to.
    ///
    /// Each attempt runs in a pool slot under the task deadline. A deadline
    /// timeout cancels the task outright; transient failures are retried
    /// with exponential backoff and jitter up to `max_attempts`; everything
    /// else fails immediately.
    pub async fn dispatch(
        &self,
        request: &AnalyticsRequest,
        context: &ContextBundle,
    ) -> Result<DispatchOutcome> {
        let kind = classify(request.query_type);
        let worker = self
            .registry
            .get(kind)
            .ok_or_else(|| Error::Internal(format!("no worker registered for '{kind}'")))?;

        let deadline = Duration::from_millis(self.config.task_timeout_ms);
        let mut task = WorkerTask::new(request.request_id.clone(), kind, deadline);

        loop {
            task.begin_attempt();
            debug!(
                task_id = %task.task_id,
                request_id = %task.request_id,
                worker = %kind,
                attempt = task.attempt_count,
                "Dispatching task"
            );

            let attempt = self
                .pool
                .run(async {
                    match tokio::time::timeout(deadline, worker.run(request, context)).await {
                        Ok(result) => result,
                        Err(_) => Err(Error::Timeout {
                            request_id: request.request_id.clone(),
                            timeout_ms: deadline.as_millis() as u64,
                        }),
                    }
                })
                .await;

            match attempt {
                Ok(value) => {
                    task.state = TaskState::Completed;
                    return Ok(DispatchOutcome {
                        value,
                        worker_used: kind,
                        retries: task.attempt_count - 1,
                    });
                }
                Err(err @ Error::Timeout { .. }) => {
                    // The deadline consumed the caller's patience; the task
                    // is cancelled, never retried.
                    task.state = TaskState::Cancelled;
                    warn!(
                        task_id = %task.task_id,
                        worker = %kind,
                        timeout_ms = deadline.as_millis() as u64,
                        "Task deadline exceeded, cancelled"
                    );
                    return Err(err);
                }
                Err(err) if err.is_transient() && task.attempt_count < self.config.max_attempts => {
                    let delay = backoff_delay(self.config.retry_base_ms, task.attempt_count);
                    warn!(
                        task_id = %task.task_id,
                        worker = %kind,
                        attempt = task.attempt_count,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    task.state = TaskState::Failed;
                    return Err(err);
                }
            }
        }
    }
}

/// Exponential backoff with jitter: `base * 2^(attempt-1)` plus up to half
/// a base interval of noise so synchronized retries spread out.
fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let shift = (attempt.saturating_sub(1)).min(10);
    let exp = base_ms.saturating_mul(1 << shift);
    let jitter = rand::rng().random_range(0..=base_ms.max(2) / 2);
    Duration::from_millis(exp + jitter)
}
