//! Backend Adapters
//!
//! One [`Backend`] implementation per LLM vendor, plus [`ProviderClient`],
//! the shared wrapper that owns the model-list TTL cache and the
//! per-attempt orchestration (build prompts, call, time, parse, record
//! health, map into the typed result).

mod groq;
mod ollama;
mod openrouter;

pub use groq::GroqBackend;
pub use ollama::OllamaBackend;
pub use openrouter::OpenRouterBackend;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex as TokioMutex;

use crate::error::ScoutError;
use crate::health::Model;
use crate::parse::parse_reply;
use crate::prompt::{build_analysis_prompt, build_selection_prompt};
use crate::store::{Persister, StateStore};
use crate::types::{
    CatalogEntry, CompletionRequest, ModelMetadata, ProviderKind, QueryAnalysis, QueryOutcome,
    RawCompletion, SlugSelection, TokenUsage,
};

/// Default time-to-live of a fetched model list.
pub const MODEL_LIST_TTL: Duration = Duration::from_secs(60 * 60);

/// Sampling temperature for both query tasks. Low: we want selection, not
/// creativity.
const TASK_TEMPERATURE: f32 = 0.2;

/// Response-token bound when the model does not declare its own.
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Per-vendor contract: credentials, model listing, and the completion call.
///
/// Implementations never track health or cache anything except their own
/// short-TTL model list, which lives in [`ProviderClient`].
#[async_trait]
pub trait Backend: Send + Sync {
    /// Which backend this is; used as the enum tag for adapter selection.
    fn kind(&self) -> ProviderKind;

    /// True iff the backend's credential/endpoint is configured. Never
    /// performs a network call.
    fn is_available(&self) -> bool;

    /// Fetch and map the vendor's model listing, applying the backend's
    /// inclusion rules and normalizing prices to cost per million tokens.
    async fn fetch_models(&self) -> Result<Vec<ModelMetadata>, ScoutError>;

    /// Issue one completion call. Transport and payload errors are surfaced
    /// verbatim, never swallowed.
    async fn call_api(
        &self,
        model: &ModelMetadata,
        request: &CompletionRequest,
    ) -> Result<RawCompletion, ScoutError>;
}

struct ModelListCache {
    models: Vec<Arc<TokioMutex<Model>>>,
    fetched_at: Instant,
}

/// Result of one successful model attempt.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub outcome: QueryOutcome,
    pub usage: Option<TokenUsage>,
    pub cost: f64,
    pub latency_ms: u64,
}

/// One backend plus the shared state the orchestrator needs around it: the
/// cached model list and the health-persistence hooks.
pub struct ProviderClient {
    backend: Arc<dyn Backend>,
    store: Arc<dyn StateStore>,
    persister: Persister,
    cache: TokioMutex<Option<ModelListCache>>,
    model_ttl: Duration,
}

impl ProviderClient {
    pub fn new(backend: Arc<dyn Backend>, store: Arc<dyn StateStore>, persister: Persister) -> Self {
        Self {
            backend,
            store,
            persister,
            cache: TokioMutex::new(None),
            model_ttl: MODEL_LIST_TTL,
        }
    }

    /// Override the model-list TTL (tests, aggressive refresh setups).
    pub fn with_model_ttl(mut self, ttl: Duration) -> Self {
        self.model_ttl = ttl;
        self
    }

    pub fn kind(&self) -> ProviderKind {
        self.backend.kind()
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_available()
    }

    /// The backend's models, fetched at most once per TTL.
    ///
    /// On a refresh failure the stale list is served if one exists; the
    /// error propagates only when there is no cache at all. Each refresh
    /// recreates the `Model` handles and reloads their health records.
    pub async fn models(&self) -> Result<Vec<Arc<TokioMutex<Model>>>, ScoutError> {
        {
            let cache = self.cache.lock().await;
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < self.model_ttl {
                    return Ok(cached.models.clone());
                }
            }
        }

        match self.backend.fetch_models().await {
            Ok(metadata) => {
                let mut models = Vec::with_capacity(metadata.len());
                for meta in metadata {
                    let model = Model::load(meta, &self.store, self.persister.clone()).await;
                    models.push(Arc::new(TokioMutex::new(model)));
                }
                let mut cache = self.cache.lock().await;
                *cache = Some(ModelListCache {
                    models: models.clone(),
                    fetched_at: Instant::now(),
                });
                Ok(models)
            }
            Err(err) => {
                let cache = self.cache.lock().await;
                if let Some(cached) = cache.as_ref() {
                    tracing::warn!(
                        provider = %self.backend.kind(),
                        error = %err,
                        "model list refresh failed, serving stale list"
                    );
                    Ok(cached.models.clone())
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Run one model attempt end to end: build the prompt pair for the task
    /// shape, call the backend, time it, parse the reply, record
    /// success/failure on the model, and map into the matching result shape.
    ///
    /// Errors are wrapped with the backend/model identity before re-throwing
    /// so the orchestrator's exhaustion error stays diagnosable.
    pub async fn process_query(
        &self,
        model: &TokioMutex<Model>,
        query: &str,
        candidates: Option<&[CatalogEntry]>,
    ) -> Result<Attempt, ScoutError> {
        let (metadata, qualified_id) = {
            let model = model.lock().await;
            (model.metadata().clone(), model.qualified_id())
        };

        let (system, user) = match candidates {
            Some(candidates) => build_selection_prompt(query, candidates),
            None => build_analysis_prompt(query),
        };
        let request = CompletionRequest {
            system,
            user,
            temperature: TASK_TEMPERATURE,
            max_tokens: metadata.max_output_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            force_json: metadata.supports_json_output,
        };

        let started = Instant::now();
        let completion = match self.backend.call_api(&metadata, &request).await {
            Ok(completion) => completion,
            Err(err) => {
                model.lock().await.record_failure();
                return Err(with_identity(&qualified_id, err));
            }
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        let value = parse_reply(&completion.text);
        model.lock().await.record_success(latency_ms);

        let outcome = match candidates {
            Some(_) => QueryOutcome::Selection(selection_from_value(&value, &completion.text)),
            None => QueryOutcome::Analysis(analysis_from_value(&value)),
        };
        let cost = call_cost(&metadata, completion.usage.as_ref());

        Ok(Attempt {
            outcome,
            usage: completion.usage,
            cost,
            latency_ms,
        })
    }
}

/// Actual cost when usage was reported, the fixed-mix estimate otherwise.
fn call_cost(metadata: &ModelMetadata, usage: Option<&TokenUsage>) -> f64 {
    match usage {
        Some(usage) => {
            (f64::from(usage.prompt_tokens) * metadata.input_cost_per_million
                + f64::from(usage.completion_tokens) * metadata.output_cost_per_million)
                / 1_000_000.0
        }
        None => metadata.estimated_cost_per_query(),
    }
}

fn with_identity(qualified_id: &str, err: ScoutError) -> ScoutError {
    match err {
        ScoutError::ApiError {
            code,
            message,
            details,
        } => ScoutError::ApiError {
            code,
            message: format!("[{qualified_id}] {message}"),
            details,
        },
        ScoutError::HttpError(message) => {
            ScoutError::HttpError(format!("[{qualified_id}] {message}"))
        }
        ScoutError::ParseError(message) => {
            ScoutError::ParseError(format!("[{qualified_id}] {message}"))
        }
        other => other,
    }
}

fn string_list(value: &serde_json::Value, field: &str) -> Vec<String> {
    value[field]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn confidence_of(value: &serde_json::Value) -> f64 {
    value["confidence"].as_f64().unwrap_or(0.3).clamp(0.0, 1.0)
}

fn selection_from_value(value: &serde_json::Value, raw_text: &str) -> SlugSelection {
    SlugSelection {
        selected_slugs: string_list(value, "selected_slugs"),
        reasoning: value["reasoning"]
            .as_str()
            .unwrap_or(raw_text)
            .to_string(),
        confidence: confidence_of(value),
    }
}

fn analysis_from_value(value: &serde_json::Value) -> QueryAnalysis {
    QueryAnalysis {
        capabilities: string_list(value, "capabilities"),
        similar_to: value["similar_to"].as_str().map(str::to_string),
        constraints: string_list(value, "constraints"),
        confidence: confidence_of(value),
    }
}
