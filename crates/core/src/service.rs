//! Outbound service traits — the seams to the statistical models and
//! external data APIs this core treats as opaque collaborators.
//!
//! Implementations live outside the workspace; tests use mocks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure modes a downstream service can report.
///
/// The dispatcher uses `is_transient()` to decide retry eligibility: a
/// network blip may clear on retry, malformed input never will.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Service resources exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Service call timed out: {0}")]
    Timeout(String),

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Service internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Whether a retry has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ServiceError::Network(_) | ServiceError::ResourceExhausted(_) | ServiceError::Timeout(_)
        )
    }
}

/// A model prediction with its confidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub result: serde_json::Value,
    /// Model confidence in [0.0, 1.0].
    pub confidence: f64,
}

/// The trained-model inference service: `predict(features) → result`.
#[async_trait]
pub trait PredictionService: Send + Sync {
    /// Dependency name, used as the circuit-breaker key.
    fn name(&self) -> &str;

    async fn predict(
        &self,
        features: &serde_json::Map<String, serde_json::Value>,
    ) -> std::result::Result<Prediction, ServiceError>;
}

/// The external data fetch service (e.g. a rate-limited upstream stats API).
#[async_trait]
pub trait DataFetchService: Send + Sync {
    /// Dependency name, used as the circuit-breaker key.
    fn name(&self) -> &str;

    async fn fetch(
        &self,
        resource: &str,
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> std::result::Result<serde_json::Value, ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transience_classification() {
        assert!(ServiceError::Network("reset".into()).is_transient());
        assert!(ServiceError::ResourceExhausted("429".into()).is_transient());
        assert!(ServiceError::Timeout("10s".into()).is_transient());
        assert!(!ServiceError::MalformedInput("bad feature".into()).is_transient());
        assert!(!ServiceError::Internal("bug".into()).is_transient());
    }

    #[test]
    fn prediction_serde_roundtrip() {
        let p = Prediction {
            result: serde_json::json!({"winner": "michigan"}),
            confidence: 0.83,
        };
        let json = serde_json::to_string(&p).unwrap();
        let back: Prediction = serde_json::from_str(&json).unwrap();
        assert_eq!(back.result["winner"], "michigan");
    }
}
