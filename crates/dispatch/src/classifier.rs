//! Query classification.
//!
//! Routing is a total match on the declared query type — never inferred
//! from the query text, so a new `QueryType` variant is a compile error
//! here until a worker kind is assigned.

use gridiron_core::QueryType;
use serde::{Deserialize, Serialize};

/// The specialist worker populations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    Predictor,
    Comparator,
    Explainer,
    Tutor,
    BatchRunner,
}

impl std::fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkerKind::Predictor => "predictor",
            WorkerKind::Comparator => "comparator",
            WorkerKind::Explainer => "explainer",
            WorkerKind::Tutor => "tutor",
            WorkerKind::BatchRunner => "batch_runner",
        };
        f.write_str(s)
    }
}

/// Map a query type onto the worker kind that serves it.
pub fn classify(query_type: QueryType) -> WorkerKind {
    match query_type {
        QueryType::Prediction => WorkerKind::Predictor,
        QueryType::Comparison => WorkerKind::Comparator,
        QueryType::Explanation => WorkerKind::Explainer,
        QueryType::Learning => WorkerKind::Tutor,
        QueryType::Batch => WorkerKind::BatchRunner,
    }
}
