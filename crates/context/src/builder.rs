//! The context builder.
//!
//! Assembles a [`ContextBundle`] for a request by scoring candidates from
//! every registered source and packing them greedily, highest value per
//! token first, into the role's token budget. The assembled bundle is
//! written back to the cache under its fingerprint.

use crate::token;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gridiron_cache::CacheManager;
use gridiron_core::fingerprint::request_fingerprint;
use gridiron_core::{AnalyticsRequest, Error, Result, RoleProfile};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

// ── Types ─────────────────────────────────────────────────────────────────

/// A scored candidate for inclusion in a bundle.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Short label naming what this is ("stats:georgia", "tool:predict").
    pub label: String,
    /// The payload a worker would consume.
    pub content: serde_json::Value,
    /// Relevance to the request, higher is better.
    pub relevance: f64,
}

/// One packed element of an assembled bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextElement {
    pub label: String,
    pub content: serde_json::Value,
    pub relevance: f64,
    pub token_count: usize,
}

/// The assembled context for a single request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBundle {
    /// Fingerprint over (role, query type, normalized parameters).
    pub fingerprint: String,
    /// Elements in packing order (best value per token first).
    pub elements: Vec<ContextElement>,
    /// Estimated tokens across all elements. Never exceeds the role budget.
    pub token_count: usize,
    /// Whether any candidate was dropped to respect the budget.
    pub truncated: bool,
    pub built_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

/// A producer of context candidates.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    fn name(&self) -> &str;

    /// Candidates relevant to this request for this role. May hit external
    /// systems; a failure degrades the bundle rather than the request.
    async fn candidates(
        &self,
        request: &AnalyticsRequest,
        profile: &RoleProfile,
    ) -> Result<Vec<Candidate>>;
}

/// Built-in source emitting one reference per capability the role holds.
///
/// Workers use these to know which operations they may perform on behalf
/// of the requesting role.
pub struct CapabilitySource;

#[async_trait]
impl CandidateSource for CapabilitySource {
    fn name(&self) -> &str {
        "capabilities"
    }

    async fn candidates(
        &self,
        _request: &AnalyticsRequest,
        profile: &RoleProfile,
    ) -> Result<Vec<Candidate>> {
        Ok(profile
            .capability_set
            .iter()
            .map(|cap| Candidate {
                label: format!("tool:{cap}"),
                content: serde_json::json!({ "capability": cap }),
                relevance: 1.0,
            })
            .collect())
    }
}

// ── Builder ───────────────────────────────────────────────────────────────

/// The context builder. Stateless beyond its source list; create one and
/// share it.
pub struct ContextBuilder {
    sources: Vec<Arc<dyn CandidateSource>>,
    cache: Arc<CacheManager>,
    bundle_ttl: Duration,
}

impl ContextBuilder {
    pub fn new(cache: Arc<CacheManager>, bundle_ttl: Duration) -> Self {
        Self {
            sources: Vec::new(),
            cache,
            bundle_ttl,
        }
    }

    pub fn with_source(mut self, source: Arc<dyn CandidateSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Assemble (or fetch from cache) the bundle for this request.
    ///
    /// Cache-first: an unexpired bundle under the same fingerprint is
    /// returned as-is. Otherwise candidates are gathered from every source,
    /// sorted by relevance per token, and packed until the role's budget
    /// would be exceeded.
    pub async fn build(
        &self,
        request: &AnalyticsRequest,
        profile: &RoleProfile,
    ) -> Result<ContextBundle> {
        let fingerprint =
            request_fingerprint(profile.role, request.query_type, &request.parameters);
        let cache_key = format!("ctx:{fingerprint}");

        if let Some(cached) = self.cache.get(&cache_key) {
            match serde_json::from_value::<ContextBundle>(cached) {
                Ok(bundle) => return Ok(bundle),
                Err(e) => {
                    warn!(key = %cache_key, error = %e, "Cached bundle unreadable; rebuilding");
                    self.cache.invalidate(&cache_key);
                }
            }
        }

        let mut candidates: Vec<Candidate> = Vec::new();
        for source in &self.sources {
            match source.candidates(request, profile).await {
                Ok(mut found) => candidates.append(&mut found),
                Err(e) => {
                    // A failed source degrades context, it does not fail
                    // the request.
                    warn!(source = %source.name(), error = %e, "Candidate source failed; skipped");
                }
            }
        }

        let scored = candidates.len();
        let bundle = pack(fingerprint, candidates, profile.token_budget, self.bundle_ttl);

        debug!(
            fingerprint = %bundle.fingerprint,
            elements = bundle.elements.len(),
            tokens = bundle.token_count,
            truncated = bundle.truncated,
            "Assembled context bundle"
        );

        let value = serde_json::to_value(&bundle)
            .map_err(|e| Error::Internal(format!("bundle serialization failed: {e}")))?;
        let cost_hint = 1.0 + scored as f64 * 0.1;
        self.cache
            .put_with_ttl(&cache_key, value, cost_hint, self.bundle_ttl);

        Ok(bundle)
    }
}

/// Greedy packing: best relevance per token first, stop adding anything
/// that would push past the budget.
fn pack(
    fingerprint: String,
    mut candidates: Vec<Candidate>,
    token_budget: usize,
    ttl: Duration,
) -> ContextBundle {
    candidates.sort_by(|a, b| {
        let score_a = value_per_token(a);
        let score_b = value_per_token(b);
        score_b
            .partial_cmp(&score_a)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut elements = Vec::new();
    let mut used = 0;
    let mut truncated = false;

    for candidate in candidates {
        let tokens =
            token::estimate_tokens(&candidate.label) + token::estimate_value_tokens(&candidate.content);
        if used + tokens > token_budget {
            truncated = true;
            continue;
        }
        used += tokens;
        elements.push(ContextElement {
            label: candidate.label,
            content: candidate.content,
            relevance: candidate.relevance,
            token_count: tokens,
        });
    }

    ContextBundle {
        fingerprint,
        elements,
        token_count: used,
        truncated,
        built_at: Utc::now(),
        ttl_secs: ttl.as_secs(),
    }
}

fn value_per_token(candidate: &Candidate) -> f64 {
    let tokens = token::estimate_tokens(&candidate.label)
        + token::estimate_value_tokens(&candidate.content);
    candidate.relevance / tokens.max(1) as f64
}
