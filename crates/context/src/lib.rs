//! Context assembly for analytics requests.
//!
//! A context bundle collects the data slices and capability references a
//! worker needs to answer a request, packed greedily into the requesting
//! role's token budget. Bundles are fingerprinted and cached so repeated
//! requests skip assembly entirely.

pub mod builder;
pub mod token;

pub use builder::{
    Candidate, CandidateSource, CapabilitySource, ContextBuilder, ContextBundle, ContextElement,
};
