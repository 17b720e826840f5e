//! Built-in worker implementations.
//!
//! All downstream traffic goes through [`ServiceClients`], which wraps every
//! call in the circuit breaker registered for that dependency. Workers never
//! talk to a service directly.

use crate::classifier::WorkerKind;
use crate::worker::{Worker, WorkerRegistry};
use async_trait::async_trait;
use gridiron_context::ContextBundle;
use gridiron_core::{
    AnalyticsRequest, DataFetchService, Error, Prediction, PredictionService, Result, ServiceError,
};
use gridiron_resilience::BreakerRegistry;
use std::sync::Arc;

/// Breaker-wrapped access to the downstream services.
pub struct ServiceClients {
    prediction: Arc<dyn PredictionService>,
    data: Arc<dyn DataFetchService>,
    breakers: Arc<BreakerRegistry>,
}

impl ServiceClients {
    pub fn new(
        prediction: Arc<dyn PredictionService>,
        data: Arc<dyn DataFetchService>,
        breakers: Arc<BreakerRegistry>,
    ) -> Self {
        Self {
            prediction,
            data,
            breakers,
        }
    }

    pub async fn predict(
        &self,
        features: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Prediction> {
        let breaker = self.breakers.breaker(self.prediction.name());
        breaker
            .call(async {
                self.prediction
                    .predict(features)
                    .await
                    .map_err(|e| service_error(self.prediction.name(), e))
            })
            .await
    }

    pub async fn fetch(
        &self,
        resource: &str,
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let breaker = self.breakers.breaker(self.data.name());
        breaker
            .call(async {
                self.data
                    .fetch(resource, params)
                    .await
                    .map_err(|e| service_error(self.data.name(), e))
            })
            .await
    }
}

fn service_error(dependency: &str, err: ServiceError) -> Error {
    match err {
        ServiceError::MalformedInput(reason) => Error::Validation(reason),
        other => Error::DependencyUnavailable {
            dependency: dependency.to_string(),
            reason: other.to_string(),
        },
    }
}

fn features_of(request: &AnalyticsRequest) -> serde_json::Map<String, serde_json::Value> {
    request
        .parameters
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn string_param(request: &AnalyticsRequest, key: &str) -> Result<String> {
    request
        .parameters
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| Error::Validation(format!("parameter '{key}' must be a string")))
}

// ── Workers ───────────────────────────────────────────────────────────────

/// Single-outcome prediction.
pub struct PredictorWorker {
    clients: Arc<ServiceClients>,
}

#[async_trait]
impl Worker for PredictorWorker {
    fn kind(&self) -> WorkerKind {
        WorkerKind::Predictor
    }

    async fn run(
        &self,
        request: &AnalyticsRequest,
        _context: &ContextBundle,
    ) -> Result<serde_json::Value> {
        let prediction = self.clients.predict(&features_of(request)).await?;
        Ok(serde_json::json!({
            "prediction": prediction.result,
            "confidence": prediction.confidence,
        }))
    }
}

/// Head-to-head comparison: fetch both sides' stats, then score the matchup.
pub struct ComparatorWorker {
    clients: Arc<ServiceClients>,
}

#[async_trait]
impl Worker for ComparatorWorker {
    fn kind(&self) -> WorkerKind {
        WorkerKind::Comparator
    }

    async fn run(
        &self,
        request: &AnalyticsRequest,
        _context: &ContextBundle,
    ) -> Result<serde_json::Value> {
        let home = string_param(request, "home")?;
        let away = string_param(request, "away")?;

        let mut side = serde_json::Map::new();
        side.insert("team".into(), serde_json::json!(home));
        let home_stats = self.clients.fetch("team_stats", &side).await?;
        side.insert("team".into(), serde_json::json!(away));
        let away_stats = self.clients.fetch("team_stats", &side).await?;

        let mut features = features_of(request);
        features.insert("home_stats".into(), home_stats.clone());
        features.insert("away_stats".into(), away_stats.clone());
        let prediction = self.clients.predict(&features).await?;

        Ok(serde_json::json!({
            "home": { "team": home, "stats": home_stats },
            "away": { "team": away, "stats": away_stats },
            "matchup": prediction.result,
            "confidence": prediction.confidence,
        }))
    }
}

/// Explain an existing prediction: rerun the model and attach the context
/// elements that informed it.
pub struct ExplainerWorker {
    clients: Arc<ServiceClients>,
}

#[async_trait]
impl Worker for ExplainerWorker {
    fn kind(&self) -> WorkerKind {
        WorkerKind::Explainer
    }

    async fn run(
        &self,
        request: &AnalyticsRequest,
        context: &ContextBundle,
    ) -> Result<serde_json::Value> {
        let prediction = self.clients.predict(&features_of(request)).await?;
        let factors: Vec<&str> = context
            .elements
            .iter()
            .map(|e| e.label.as_str())
            .collect();
        Ok(serde_json::json!({
            "prediction": prediction.result,
            "confidence": prediction.confidence,
            "factors": factors,
        }))
    }
}

/// Learning guidance: assembled purely from the context bundle, no model
/// call needed.
pub struct TutorWorker;

#[async_trait]
impl Worker for TutorWorker {
    fn kind(&self) -> WorkerKind {
        WorkerKind::Tutor
    }

    async fn run(
        &self,
        request: &AnalyticsRequest,
        context: &ContextBundle,
    ) -> Result<serde_json::Value> {
        let references: Vec<serde_json::Value> = context
            .elements
            .iter()
            .map(|e| {
                serde_json::json!({
                    "label": e.label,
                    "content": e.content,
                })
            })
            .collect();
        Ok(serde_json::json!({
            "topic": request.query_text,
            "references": references,
        }))
    }
}

/// A slate of predictions, one model call per game.
pub struct BatchRunnerWorker {
    clients: Arc<ServiceClients>,
}

#[async_trait]
impl Worker for BatchRunnerWorker {
    fn kind(&self) -> WorkerKind {
        WorkerKind::BatchRunner
    }

    async fn run(
        &self,
        request: &AnalyticsRequest,
        _context: &ContextBundle,
    ) -> Result<serde_json::Value> {
        let games = request
            .parameters
            .get("games")
            .and_then(|v| v.as_array())
            .ok_or_else(|| Error::Validation("parameter 'games' must be an array".into()))?;

        let mut results = Vec::with_capacity(games.len());
        for game in games {
            let features = match game {
                serde_json::Value::Object(map) => map.clone(),
                other => {
                    return Err(Error::Validation(format!(
                        "each game must be an object, got {other}"
                    )));
                }
            };
            let prediction = self.clients.predict(&features).await?;
            results.push(serde_json::json!({
                "game": game,
                "prediction": prediction.result,
                "confidence": prediction.confidence,
            }));
        }

        Ok(serde_json::json!({ "results": results }))
    }
}

/// Create a registry with all five built-in workers wired to the given
/// services.
pub fn default_registry(
    prediction: Arc<dyn PredictionService>,
    data: Arc<dyn DataFetchService>,
    breakers: Arc<BreakerRegistry>,
) -> WorkerRegistry {
    let clients = Arc::new(ServiceClients::new(prediction, data, breakers));
    let mut registry = WorkerRegistry::new();
    registry.register(Arc::new(PredictorWorker {
        clients: Arc::clone(&clients),
    }));
    registry.register(Arc::new(ComparatorWorker {
        clients: Arc::clone(&clients),
    }));
    registry.register(Arc::new(ExplainerWorker {
        clients: Arc::clone(&clients),
    }));
    registry.register(Arc::new(TutorWorker));
    registry.register(Arc::new(BatchRunnerWorker { clients }));
    registry
}
