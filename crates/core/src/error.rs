//! Error types for the Gridiron domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Every variant is `Clone` so a single failure can be fanned out to all
//! subscribers of an in-flight cache computation.

use crate::service::ServiceError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The top-level error type for all Gridiron operations.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Malformed request — surfaced immediately, never retried.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Per-user rate limit exceeded and the waiting queue is full.
    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// A downstream dependency failed or its circuit is open.
    #[error("Dependency '{dependency}' unavailable: {reason}")]
    DependencyUnavailable { dependency: String, reason: String },

    /// A dispatched task exceeded its deadline and was cancelled.
    #[error("Task for request {request_id} timed out after {timeout_ms}ms")]
    Timeout { request_id: String, timeout_ms: u64 },

    /// A cache entry could not be decoded. Internal only — recovered by
    /// treating the entry as a miss, never surfaced to callers.
    #[error("Cache entry corrupted: {0}")]
    CacheCorruption(String),

    /// Configuration error at startup.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Generic internal failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the failure may succeed on a retry.
    ///
    /// Only dependency failures are retry-eligible: validation and
    /// classification errors are deterministic, and a deadline timeout has
    /// already consumed the caller's patience.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::DependencyUnavailable { .. })
    }

    /// The user-visible error category for the response envelope.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::RateLimited { .. } => ErrorKind::RateLimited,
            Error::DependencyUnavailable { .. } => ErrorKind::DependencyUnavailable,
            Error::Timeout { .. } => ErrorKind::Timeout,
            // CacheCorruption is recovered internally; if one ever reaches
            // the envelope it is reported as an internal fault.
            Error::CacheCorruption(_) | Error::Config { .. } | Error::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }
}

impl From<ServiceError> for Error {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::MalformedInput(reason) => Error::Validation(reason),
            other => Error::DependencyUnavailable {
                dependency: "service".into(),
                reason: other.to_string(),
            },
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// The error category carried in `AnalyticsResponse.error_kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    RateLimited,
    DependencyUnavailable,
    Timeout,
    Internal,
}
