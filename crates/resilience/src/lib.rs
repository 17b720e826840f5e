//! Resilience primitives: per-dependency circuit breakers and a per-user
//! token-bucket rate limiter.

pub mod breaker;
pub mod limiter;

pub use breaker::{BreakerRegistry, CallGuard, CallKind, CircuitBreaker};
pub use limiter::RateLimiter;
