//! Task bookkeeping for dispatched work.

use crate::classifier::WorkerKind;
use std::time::Duration;
use uuid::Uuid;

/// Lifecycle of a dispatched task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    Running,
    Completed,
    Failed,
    /// Deadline expired; the task was abandoned, not retried.
    Cancelled,
}

/// One unit of dispatched work, tracked across retries.
#[derive(Debug, Clone)]
pub struct WorkerTask {
    pub task_id: String,
    pub request_id: String,
    pub worker_kind: WorkerKind,
    pub state: TaskState,
    /// Attempts started so far, including the current one.
    pub attempt_count: u32,
    pub deadline: Duration,
}

impl WorkerTask {
    pub fn new(request_id: impl Into<String>, worker_kind: WorkerKind, deadline: Duration) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            request_id: request_id.into(),
            worker_kind,
            state: TaskState::Queued,
            attempt_count: 0,
            deadline,
        }
    }

    pub fn begin_attempt(&mut self) {
        self.attempt_count += 1;
        self.state = TaskState::Running;
    }
}
