//! Inbound analytics request — the unit of work for the whole core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// The kind of analytics a request asks for.
///
/// Classification into a worker kind is a total match on this enum —
/// routing is never inferred from the query text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    /// Single-game or season outcome prediction.
    Prediction,
    /// Head-to-head comparison between teams or players.
    Comparison,
    /// Explanation of an existing prediction (feature attribution).
    Explanation,
    /// Learning guidance — walk the user through the underlying model.
    Learning,
    /// Batch of predictions over a slate of games.
    Batch,
}

impl std::fmt::Display for QueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QueryType::Prediction => "prediction",
            QueryType::Comparison => "comparison",
            QueryType::Explanation => "explanation",
            QueryType::Learning => "learning",
            QueryType::Batch => "batch",
        };
        f.write_str(s)
    }
}

/// A single analytics request. Immutable once created.
///
/// `parameters` and `context_hints` are open maps: unrecognized keys are
/// ignored, not rejected, so external callers (CLIs, notebooks, a web front
/// end) can evolve independently of this core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsRequest {
    /// Unique request identifier.
    pub request_id: String,

    /// Opaque user identifier, used only for rate limiting.
    pub user_id: String,

    /// Free-text query from the caller.
    pub query_text: String,

    /// Declared query category.
    pub query_type: QueryType,

    /// Typed parameters (team names, week, model knobs). Order-irrelevant.
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,

    /// Caller-supplied hints; may carry an explicit `role` override.
    #[serde(default)]
    pub context_hints: HashMap<String, serde_json::Value>,

    /// Submission timestamp.
    pub submitted_at: DateTime<Utc>,
}

impl AnalyticsRequest {
    /// Create a new request with a generated id and the current timestamp.
    pub fn new(
        user_id: impl Into<String>,
        query_text: impl Into<String>,
        query_type: QueryType,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            query_text: query_text.into(),
            query_type,
            parameters: HashMap::new(),
            context_hints: HashMap::new(),
            submitted_at: Utc::now(),
        }
    }

    /// Add a typed parameter.
    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Add a context hint.
    pub fn with_hint(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context_hints.insert(key.into(), value);
        self
    }

    /// The `role` context hint, if the caller supplied one.
    pub fn role_hint(&self) -> Option<&str> {
        self.context_hints.get("role").and_then(|v| v.as_str())
    }
}
