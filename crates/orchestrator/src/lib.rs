//! # Gridiron Orchestrator
//!
//! The composition root. Built once from [`AppConfig`] plus the two
//! downstream service implementations, it owns the cache, context builder,
//! rate limiter, breaker registry, and dispatcher, and drives every request
//! through the full pipeline:
//!
//! validate → resolve role → rate limit → build context → cache-or-compute
//! → dispatch → record for prediction → envelope.
//!
//! `handle` never panics and never leaks a raw error: every failure is
//! normalized into a response envelope with an error kind and diagnostics.

use gridiron_cache::{CacheManager, PreloadFn, ReconcileHandle};
use gridiron_config::AppConfig;
use gridiron_context::{CandidateSource, CapabilitySource, ContextBuilder};
use gridiron_core::{
    AnalyticsRequest, AnalyticsResponse, DataFetchService, Error, PredictionService,
    ResponseMetadata, Result, RoleProfileStore, combine_fingerprints, request_fingerprint,
};
use gridiron_dispatch::{Dispatcher, classify, default_registry};
use gridiron_resilience::{BreakerRegistry, RateLimiter};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// The orchestration core. Construct with [`Orchestrator::new`] inside a
/// tokio runtime (background tasks are spawned at construction), share via
/// `Arc`, and call [`Orchestrator::handle`] per request.
pub struct Orchestrator {
    roles: RoleProfileStore,
    cache: Arc<CacheManager>,
    context: ContextBuilder,
    dispatcher: Arc<Dispatcher>,
    limiter: Arc<RateLimiter>,
    breakers: Arc<BreakerRegistry>,
    reconcile: Mutex<Option<ReconcileHandle>>,
}

impl Orchestrator {
    /// Wire the whole pipeline from configuration and the two downstream
    /// services. Extra candidate sources enrich context assembly beyond the
    /// built-in capability source.
    pub fn new(
        config: AppConfig,
        prediction: Arc<dyn PredictionService>,
        data: Arc<dyn DataFetchService>,
        extra_sources: Vec<Arc<dyn CandidateSource>>,
    ) -> Arc<Self> {
        let cache = Arc::new(CacheManager::new(&config.cache));
        let breakers = Arc::new(BreakerRegistry::new(config.breaker.clone()));
        let roles = RoleProfileStore::new(
            config.roles.production_token_budget,
            config.roles.analyst_token_budget,
            config.roles.data_scientist_token_budget,
        );

        let mut context = ContextBuilder::new(
            Arc::clone(&cache),
            Duration::from_secs(config.cache.entry_ttl_secs),
        )
        .with_source(Arc::new(CapabilitySource));
        for source in extra_sources {
            context = context.with_source(source);
        }

        let registry = default_registry(prediction, data, Arc::clone(&breakers));
        let dispatcher = Arc::new(Dispatcher::new(registry, config.pool.clone()));
        let limiter = RateLimiter::new(config.rate_limit.clone());

        let reconcile = cache.spawn_reconcile(Duration::from_secs(
            config.cache.reconcile_interval_secs,
        ));

        info!("Orchestrator assembled");

        Arc::new(Self {
            roles,
            cache,
            context,
            dispatcher,
            limiter,
            breakers,
            reconcile: Mutex::new(Some(reconcile)),
        })
    }

    /// Process one request end to end. Always returns an envelope.
    pub async fn handle(self: &Arc<Self>, request: AnalyticsRequest) -> AnalyticsResponse {
        let started = Instant::now();
        let mut meta = ResponseMetadata::default();
        let result = self.process(&request, &mut meta).await;

        meta.latency_ms = started.elapsed().as_millis() as u64;
        meta.circuit_snapshot = self.breakers.snapshots();

        match result {
            Ok(data) => {
                debug!(
                    request_id = %request.request_id,
                    cache_hit = meta.cache_hit,
                    latency_ms = meta.latency_ms,
                    "Request completed"
                );
                AnalyticsResponse::ok(request.request_id, data, meta)
            }
            Err(err) => {
                if let Error::RateLimited { retry_after_ms } = &err {
                    meta.retry_after_ms = Some(*retry_after_ms);
                }
                warn!(
                    request_id = %request.request_id,
                    error = %err,
                    latency_ms = meta.latency_ms,
                    "Request failed"
                );
                AnalyticsResponse::failed(request.request_id, err.kind(), meta)
            }
        }
    }

    async fn process(
        self: &Arc<Self>,
        request: &AnalyticsRequest,
        meta: &mut ResponseMetadata,
    ) -> Result<serde_json::Value> {
        validate(request)?;

        // Unknown role hints fail closed to the production profile.
        let profile = self.roles.resolve(request.role_hint()).clone();

        self.limiter.acquire(&request.user_id).await?;

        let bundle = self.context.build(request, &profile).await?;
        meta.context_truncated = bundle.truncated;

        let request_fp =
            request_fingerprint(profile.role, request.query_type, &request.parameters);
        let result_key = combine_fingerprints(&request_fp, &bundle.fingerprint);

        // The leader of a computation reports its retry count here; cache
        // hits and stampede followers leave it at zero.
        let retries = Arc::new(Mutex::new(0u32));
        let (result, cache_hit) = {
            let dispatcher = Arc::clone(&self.dispatcher);
            let request = request.clone();
            let bundle = bundle.clone();
            let retries = Arc::clone(&retries);
            self.cache
                .get_or_compute(&result_key, cost_hint(request.query_type), move || async move {
                    let outcome = dispatcher.dispatch(&request, &bundle).await?;
                    *retries.lock().unwrap_or_else(|e| e.into_inner()) = outcome.retries;
                    Ok(outcome.value)
                })
                .await
        };
        meta.cache_hit = cache_hit;
        meta.retries = *retries.lock().unwrap_or_else(|e| e.into_inner());
        if !cache_hit {
            meta.worker_used = Some(classify(request.query_type).to_string());
        }

        let value = result?;

        // Teach the preloader this user's key sequence; a likely successor
        // gets rebuilt speculatively through the same dispatch path.
        self.cache.observe(
            &request.user_id,
            &result_key,
            preload_recipe(Arc::clone(&self.dispatcher), request.clone(), bundle),
        );

        Ok(value)
    }

    /// Diagnostic cache counters.
    pub fn cache_stats(&self) -> gridiron_cache::CacheStatsSnapshot {
        self.cache.stats()
    }

    /// Stop background tasks and reject queued rate-limiter waiters.
    /// In-flight requests finish normally.
    pub async fn shutdown(&self) {
        self.limiter.close().await;
        self.dispatcher.pool().shutdown().await;
        let reconcile = self
            .reconcile
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(reconcile) = reconcile {
            reconcile.shutdown().await;
        }
        info!("Orchestrator shut down");
    }
}

fn validate(request: &AnalyticsRequest) -> Result<()> {
    if request.user_id.trim().is_empty() {
        return Err(Error::Validation("user_id must not be empty".into()));
    }
    if request.query_text.trim().is_empty() {
        return Err(Error::Validation("query_text must not be empty".into()));
    }
    Ok(())
}

/// Relative recomputation cost per query type, used for eviction scoring.
fn cost_hint(query_type: gridiron_core::QueryType) -> f64 {
    match query_type {
        gridiron_core::QueryType::Batch => 4.0,
        gridiron_core::QueryType::Comparison => 3.0,
        _ => 2.0,
    }
}

/// Initialize structured logging for a host binary embedding the core.
/// `RUST_LOG` takes precedence over the `verbose` switch.
pub fn init_telemetry(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();
}

fn preload_recipe(
    dispatcher: Arc<Dispatcher>,
    request: AnalyticsRequest,
    bundle: gridiron_context::ContextBundle,
) -> PreloadFn {
    Arc::new(move || {
        let dispatcher = Arc::clone(&dispatcher);
        let request = request.clone();
        let bundle = bundle.clone();
        Box::pin(async move {
            dispatcher
                .dispatch(&request, &bundle)
                .await
                .map(|outcome| outcome.value)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gridiron_config::{PoolConfig, RateLimitConfig};
    use gridiron_core::{
        ErrorKind, Prediction, QueryType, ResponseStatus, ServiceError,
    };

    struct MockPrediction {
        fail: bool,
        delay: Duration,
        calls: Mutex<u32>,
    }

    impl MockPrediction {
        fn reliable() -> Arc<Self> {
            Arc::new(Self {
                fail: false,
                delay: Duration::ZERO,
                calls: Mutex::new(0),
            })
        }

        fn broken() -> Arc<Self> {
            Arc::new(Self {
                fail: true,
                delay: Duration::ZERO,
                calls: Mutex::new(0),
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                fail: false,
                delay,
                calls: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl PredictionService for MockPrediction {
        fn name(&self) -> &str {
            "model_inference"
        }

        async fn predict(
            &self,
            _features: &serde_json::Map<String, serde_json::Value>,
        ) -> std::result::Result<Prediction, ServiceError> {
            *self.calls.lock().unwrap() += 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                return Err(ServiceError::Network("connection refused".into()));
            }
            Ok(Prediction {
                result: serde_json::json!({"winner": "home", "margin": 6.5}),
                confidence: 0.74,
            })
        }
    }

    /// Panics on the first prediction, succeeds afterwards.
    struct PanickyPrediction {
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl PredictionService for PanickyPrediction {
        fn name(&self) -> &str {
            "model_inference"
        }

        async fn predict(
            &self,
            _features: &serde_json::Map<String, serde_json::Value>,
        ) -> std::result::Result<Prediction, ServiceError> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls
            };
            if call == 1 {
                panic!("inference engine aborted");
            }
            Ok(Prediction {
                result: serde_json::json!({"winner": "home"}),
                confidence: 0.5,
            })
        }
    }

    struct MockDataFetch;

    #[async_trait]
    impl DataFetchService for MockDataFetch {
        fn name(&self) -> &str {
            "stats_api"
        }

        async fn fetch(
            &self,
            resource: &str,
            _params: &serde_json::Map<String, serde_json::Value>,
        ) -> std::result::Result<serde_json::Value, ServiceError> {
            Ok(serde_json::json!({"resource": resource}))
        }
    }

    fn quick_config() -> AppConfig {
        AppConfig {
            pool: PoolConfig {
                max_attempts: 2,
                retry_base_ms: 5,
                task_timeout_ms: 500,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn orchestrator(prediction: Arc<MockPrediction>) -> Arc<Orchestrator> {
        Orchestrator::new(
            quick_config(),
            prediction,
            Arc::new(MockDataFetch),
            Vec::new(),
        )
    }

    fn prediction_request() -> AnalyticsRequest {
        AnalyticsRequest::new("fan_1", "who wins saturday", QueryType::Prediction)
            .with_parameter("home", serde_json::json!("georgia"))
            .with_parameter("away", serde_json::json!("alabama"))
    }

    #[tokio::test]
    async fn successful_request_gets_full_metadata() {
        let orch = orchestrator(MockPrediction::reliable());
        let response = orch.handle(prediction_request()).await;

        assert_eq!(response.status, ResponseStatus::Ok);
        let data = response.data.unwrap();
        assert_eq!(data["prediction"]["winner"], "home");
        assert_eq!(response.metadata.worker_used.as_deref(), Some("predictor"));
        assert!(!response.metadata.cache_hit);
        assert_eq!(response.metadata.retries, 0);
        // The model breaker shows up in the snapshot after the first call.
        assert!(
            response
                .metadata
                .circuit_snapshot
                .iter()
                .any(|s| s.dependency == "model_inference")
        );
        orch.shutdown().await;
    }

    #[tokio::test]
    async fn identical_request_is_a_cache_hit() {
        let service = MockPrediction::reliable();
        let orch = orchestrator(Arc::clone(&service));

        let first = orch.handle(prediction_request()).await;
        let second = orch.handle(prediction_request()).await;

        assert!(!first.metadata.cache_hit);
        assert!(second.metadata.cache_hit);
        assert_eq!(first.data, second.data);
        assert_eq!(*service.calls.lock().unwrap(), 1);
        orch.shutdown().await;
    }

    #[tokio::test]
    async fn empty_query_text_is_rejected_without_dispatch() {
        let service = MockPrediction::reliable();
        let orch = orchestrator(Arc::clone(&service));

        let request = AnalyticsRequest::new("fan_1", "   ", QueryType::Prediction);
        let response = orch.handle(request).await;

        assert_eq!(response.status, ResponseStatus::Error);
        assert_eq!(response.error_kind, Some(ErrorKind::Validation));
        assert_eq!(*service.calls.lock().unwrap(), 0);
        orch.shutdown().await;
    }

    #[tokio::test]
    async fn empty_user_id_is_rejected() {
        let orch = orchestrator(MockPrediction::reliable());
        let request = AnalyticsRequest::new("", "who wins", QueryType::Prediction);
        let response = orch.handle(request).await;
        assert_eq!(response.error_kind, Some(ErrorKind::Validation));
        orch.shutdown().await;
    }

    #[tokio::test]
    async fn panicking_service_becomes_an_error_envelope() {
        let service = Arc::new(PanickyPrediction {
            calls: Mutex::new(0),
        });
        let orch = Orchestrator::new(
            quick_config(),
            Arc::clone(&service) as Arc<dyn PredictionService>,
            Arc::new(MockDataFetch),
            Vec::new(),
        );

        let first = orch.handle(prediction_request()).await;
        assert_eq!(first.status, ResponseStatus::Error);
        assert_eq!(first.error_kind, Some(ErrorKind::Internal));

        // The panic did not poison the result key: the same request
        // computes normally on the next attempt.
        let second = orch.handle(prediction_request()).await;
        assert_eq!(second.status, ResponseStatus::Ok);
        assert!(!second.metadata.cache_hit);
        assert_eq!(second.data.unwrap()["prediction"]["winner"], "home");
        orch.shutdown().await;
    }

    #[tokio::test]
    async fn rate_limit_rejection_is_a_rejected_envelope() {
        let mut config = quick_config();
        config.rate_limit = RateLimitConfig {
            capacity: 1,
            refill_per_sec: 0.001,
            queue_depth: 0,
            max_wait_ms: 100,
        };
        let orch = Orchestrator::new(
            config,
            MockPrediction::reliable(),
            Arc::new(MockDataFetch),
            Vec::new(),
        );

        // Distinct parameters so the second request cannot hit the cache.
        let first = orch
            .handle(prediction_request().with_parameter("week", serde_json::json!(1)))
            .await;
        let second = orch
            .handle(prediction_request().with_parameter("week", serde_json::json!(2)))
            .await;

        assert_eq!(first.status, ResponseStatus::Ok);
        assert_eq!(second.status, ResponseStatus::Rejected);
        assert_eq!(second.error_kind, Some(ErrorKind::RateLimited));
        assert!(second.metadata.retry_after_ms.is_some());
        orch.shutdown().await;
    }

    #[tokio::test]
    async fn downstream_failure_normalizes_to_error_envelope() {
        let orch = orchestrator(MockPrediction::broken());
        let response = orch.handle(prediction_request()).await;

        assert_eq!(response.status, ResponseStatus::Error);
        assert_eq!(
            response.error_kind,
            Some(ErrorKind::DependencyUnavailable)
        );
        assert!(response.data.is_none());
        orch.shutdown().await;
    }

    #[tokio::test]
    async fn slow_worker_times_out_as_error_envelope() {
        let mut config = quick_config();
        config.pool.task_timeout_ms = 30;
        let orch = Orchestrator::new(
            config,
            MockPrediction::slow(Duration::from_millis(200)),
            Arc::new(MockDataFetch),
            Vec::new(),
        );

        let response = orch.handle(prediction_request()).await;
        assert_eq!(response.status, ResponseStatus::Error);
        assert_eq!(response.error_kind, Some(ErrorKind::Timeout));
        orch.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_role_hint_fails_closed_and_still_serves() {
        let orch = orchestrator(MockPrediction::reliable());
        let request = prediction_request().with_hint("role", serde_json::json!("superadmin"));
        let response = orch.handle(request).await;
        assert_eq!(response.status, ResponseStatus::Ok);
        orch.shutdown().await;
    }

    #[tokio::test]
    async fn role_changes_the_cache_identity() {
        let service = MockPrediction::reliable();
        let orch = orchestrator(Arc::clone(&service));

        let as_production = orch.handle(prediction_request()).await;
        let as_analyst = orch
            .handle(prediction_request().with_hint("role", serde_json::json!("analyst")))
            .await;

        assert_eq!(as_production.status, ResponseStatus::Ok);
        assert_eq!(as_analyst.status, ResponseStatus::Ok);
        // Different roles fingerprint differently, so no cache sharing.
        assert!(!as_analyst.metadata.cache_hit);
        assert_eq!(*service.calls.lock().unwrap(), 2);
        orch.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_parameter_keys_are_ignored() {
        let orch = orchestrator(MockPrediction::reliable());
        let request = prediction_request()
            .with_parameter("future_knob", serde_json::json!(true))
            .with_hint("unheard_of_hint", serde_json::json!("x"));
        let response = orch.handle(request).await;
        assert_eq!(response.status, ResponseStatus::Ok);
        orch.shutdown().await;
    }

    #[tokio::test]
    async fn learning_requests_route_to_the_tutor() {
        let service = MockPrediction::reliable();
        let orch = orchestrator(Arc::clone(&service));

        let request = AnalyticsRequest::new("fan_1", "explain epa to me", QueryType::Learning);
        let response = orch.handle(request).await;

        assert_eq!(response.status, ResponseStatus::Ok);
        assert_eq!(response.metadata.worker_used.as_deref(), Some("tutor"));
        // The tutor works from the context bundle alone.
        assert_eq!(*service.calls.lock().unwrap(), 0);
        orch.shutdown().await;
    }
}
