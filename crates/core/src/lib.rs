//! # Gridiron Core
//!
//! Domain types, traits, and error definitions for the Gridiron analytics
//! orchestration core. This crate has **zero framework dependencies** — it
//! defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every downstream collaborator (model inference, data fetch) is defined as
//! a trait here. Implementations live outside this workspace and are wired
//! in at the composition root. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod fingerprint;
pub mod health;
pub mod request;
pub mod response;
pub mod role;
pub mod service;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ErrorKind, Result};
pub use fingerprint::{combine_fingerprints, request_fingerprint};
pub use health::{CircuitState, DependencyHealthSnapshot};
pub use request::{AnalyticsRequest, QueryType};
pub use response::{AnalyticsResponse, ResponseMetadata, ResponseStatus};
pub use role::{DisclosureLevel, Role, RoleProfile, RoleProfileStore};
pub use service::{DataFetchService, Prediction, PredictionService, ServiceError};
