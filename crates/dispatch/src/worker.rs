//! The worker trait and registry.

use crate::classifier::WorkerKind;
use async_trait::async_trait;
use gridiron_context::ContextBundle;
use gridiron_core::{AnalyticsRequest, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// A specialist worker. Implementations are registered once at startup and
/// shared across all requests.
#[async_trait]
pub trait Worker: Send + Sync {
    fn kind(&self) -> WorkerKind;

    /// Run the request against its assembled context.
    async fn run(
        &self,
        request: &AnalyticsRequest,
        context: &ContextBundle,
    ) -> Result<serde_json::Value>;
}

/// Worker lookup by kind.
pub struct WorkerRegistry {
    workers: HashMap<WorkerKind, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            workers: HashMap::new(),
        }
    }

    /// Register a worker. Replaces any existing worker of the same kind.
    pub fn register(&mut self, worker: Arc<dyn Worker>) {
        self.workers.insert(worker.kind(), worker);
    }

    pub fn get(&self, kind: WorkerKind) -> Option<Arc<dyn Worker>> {
        self.workers.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<WorkerKind> {
        self.workers.keys().copied().collect()
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
