//! Dependency health reporting shared between the resilience layer and the
//! response envelope.

use serde::{Deserialize, Serialize};

/// Circuit-breaker state for a single downstream dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through; failures are counted.
    Closed,
    /// Calls fail fast until the cooldown elapses.
    Open,
    /// Exactly one trial call is allowed through.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        f.write_str(s)
    }
}

/// A point-in-time view of one dependency's breaker, carried in response
/// metadata. The live state machine lives in `gridiron-resilience`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyHealthSnapshot {
    pub dependency: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
}
