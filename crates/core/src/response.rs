//! The unified response envelope returned by the orchestrator.
//!
//! Every response — success or failure — carries metadata describing the
//! path the request took (cache hit, retries, circuit state) so failures
//! are diagnosable without internal access.

use crate::error::ErrorKind;
use crate::health::DependencyHealthSnapshot;
use serde::{Deserialize, Serialize};

/// Terminal status of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Ok,
    Error,
    Rejected,
}

/// Diagnostic metadata attached to every response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMetadata {
    /// Which worker kind served the request, if dispatch was reached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_used: Option<String>,

    /// Whether the final artifact came from the cache.
    pub cache_hit: bool,

    /// Wall-clock latency of the whole `handle()` call.
    pub latency_ms: u64,

    /// Retry attempts beyond the first (0 = first attempt succeeded).
    pub retries: u32,

    /// Whether the context bundle dropped candidates to fit the budget.
    pub context_truncated: bool,

    /// Circuit-breaker state per dependency at response time.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub circuit_snapshot: Vec<DependencyHealthSnapshot>,

    /// For rate-limited rejections: when to try again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

/// The response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsResponse {
    pub request_id: String,
    pub status: ResponseStatus,

    /// Result payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// Error category on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,

    pub metadata: ResponseMetadata,
}

impl AnalyticsResponse {
    /// A successful response carrying a payload.
    pub fn ok(
        request_id: impl Into<String>,
        data: serde_json::Value,
        metadata: ResponseMetadata,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            status: ResponseStatus::Ok,
            data: Some(data),
            error_kind: None,
            metadata,
        }
    }

    /// A failed response. Rate-limit rejections use `Rejected`; everything
    /// else is `Error`.
    pub fn failed(
        request_id: impl Into<String>,
        kind: ErrorKind,
        metadata: ResponseMetadata,
    ) -> Self {
        let status = match kind {
            ErrorKind::RateLimited => ResponseStatus::Rejected,
            _ => ResponseStatus::Error,
        };
        Self {
            request_id: request_id.into(),
            status,
            data: None,
            error_kind: Some(kind),
            metadata,
        }
    }
}
