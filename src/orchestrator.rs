//! Query Orchestration
//!
//! [`Scout`] composes the backend adapters and runs the full pipeline:
//! response-cache lookup, keyword extraction, the caller-supplied catalog
//! search, and the two-tier model fallback over the narrowing task.
//!
//! Fallback is strictly sequential: one model is attempted and awaited
//! before the next, healthy models in priority order first, problematic
//! models as a last resort, and the first success wins. The previously
//! successful model is pinned to the front of its tier on the next query.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::Mutex as TokioMutex;

use crate::error::ScoutError;
use crate::health::{Model, ModelHealth};
use crate::prompt::extract_search_keywords;
use crate::provider::{Backend, ProviderClient};
use crate::store::{MemoryStore, Persister, StateStore};
use crate::types::{
    CachedResponse, CatalogEntry, ModelMetadata, SearchFn, SlugSelection,
};

/// Default time-to-live of a cached final response.
pub const RESPONSE_TTL: Duration = Duration::from_secs(60 * 60);

/// Confidence reported when the search step yields no candidates.
const EMPTY_RESULT_CONFIDENCE: f64 = 0.1;

/// Point-in-time view of one model for diagnostics.
#[derive(Debug, Clone)]
pub struct ModelSnapshot {
    pub metadata: ModelMetadata,
    pub health: ModelHealth,
    pub is_healthy: bool,
    pub priority: f64,
}

impl ModelSnapshot {
    pub fn qualified_id(&self) -> String {
        self.metadata.qualified_id()
    }
}

/// Health counts across every configured backend.
#[derive(Debug, Clone)]
pub struct ScoutStats {
    pub total_models: usize,
    pub healthy_models: usize,
    pub problematic_models: usize,
    pub problems: Vec<ProblemDetail>,
}

/// Why one model currently counts as problematic.
#[derive(Debug, Clone)]
pub struct ProblemDetail {
    pub qualified_id: String,
    pub enabled: bool,
    pub consecutive_failures: u32,
    pub last_failure: Option<chrono::DateTime<chrono::Utc>>,
}

/// Builder for [`Scout`].
pub struct ScoutBuilder {
    backends: Vec<Arc<dyn Backend>>,
    store: Option<Arc<dyn StateStore>>,
    response_ttl: Duration,
    model_list_ttl: Option<Duration>,
    request_timeout: Option<Duration>,
}

impl ScoutBuilder {
    pub fn new() -> Self {
        Self {
            backends: Vec::new(),
            store: None,
            response_ttl: RESPONSE_TTL,
            model_list_ttl: None,
            request_timeout: None,
        }
    }

    /// Add one backend adapter.
    pub fn with_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backends.push(backend);
        self
    }

    /// Add every built-in backend, configured from the environment
    /// (`OPENROUTER_API_KEY`, `GROQ_API_KEY`, `OLLAMA_BASE_URL`).
    pub fn with_env_backends(mut self) -> Result<Self, ScoutError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = self.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| ScoutError::ConfigurationError(format!("HTTP client: {e}")))?;

        self.backends.push(Arc::new(
            crate::provider::OpenRouterBackend::from_env(http.clone()),
        ));
        self.backends
            .push(Arc::new(crate::provider::GroqBackend::from_env(http.clone())));
        self.backends
            .push(Arc::new(crate::provider::OllamaBackend::from_env(http)));
        Ok(self)
    }

    /// Use an external durable store instead of the in-memory default.
    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Override the final-response cache TTL.
    pub fn with_response_ttl(mut self, ttl: Duration) -> Self {
        self.response_ttl = ttl;
        self
    }

    /// Override the per-backend model-list TTL.
    pub fn with_model_list_ttl(mut self, ttl: Duration) -> Self {
        self.model_list_ttl = Some(ttl);
        self
    }

    /// Transport-level timeout for backend calls. The orchestrator itself
    /// imposes no deadline; a hung call is bounded here or not at all.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Assemble the orchestrator. Requires a running tokio runtime for the
    /// background persister.
    pub fn build(self) -> Scout {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn StateStore>);
        let persister = Persister::spawn(store.clone());

        let providers = self
            .backends
            .into_iter()
            .map(|backend| {
                let mut client =
                    ProviderClient::new(backend, store.clone(), persister.clone());
                if let Some(ttl) = self.model_list_ttl {
                    client = client.with_model_ttl(ttl);
                }
                Arc::new(client)
            })
            .collect();

        Scout {
            providers,
            store,
            response_ttl: self.response_ttl,
            last_successful_model: Mutex::new(None),
        }
    }
}

impl Default for ScoutBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The orchestrator: cross-backend fallback, sticky model preference, and
/// final-response caching.
pub struct Scout {
    providers: Vec<Arc<ProviderClient>>,
    store: Arc<dyn StateStore>,
    response_ttl: Duration,
    /// Written only on the success path of the fallback loop.
    last_successful_model: Mutex<Option<String>>,
}

impl Scout {
    pub fn builder() -> ScoutBuilder {
        ScoutBuilder::new()
    }

    /// Resolve a free-form query into a ranked slug selection.
    ///
    /// `search` supplies the candidate catalog records for the extracted
    /// keywords; it is required, and zero candidates short-circuits with a
    /// low-confidence empty result before any model is attempted.
    pub async fn process_query(
        &self,
        query: &str,
        search: &SearchFn,
    ) -> Result<SlugSelection, ScoutError> {
        let key = cache_key(query);
        match self.store.get_cached(&key).await {
            Ok(Some(cached)) => {
                tracing::debug!(query = %query, "serving cached response");
                return Ok(cached.selection);
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(error = %err, "response cache read failed, continuing");
            }
        }

        let keywords = extract_search_keywords(query);
        let candidates = search(keywords).await?;

        if candidates.is_empty() {
            return Ok(SlugSelection {
                selected_slugs: Vec::new(),
                reasoning: "No catalog entries matched the extracted keywords.".to_string(),
                confidence: EMPTY_RESULT_CONFIDENCE,
            });
        }

        let answered = self.narrow(query, &candidates).await?;

        let response = CachedResponse {
            query: query.to_string(),
            selection: answered.selection.clone(),
            timestamp: chrono::Utc::now(),
            provider: answered.provider,
            model_id: answered.model_id,
            cost: answered.cost,
            latency_ms: answered.latency_ms,
        };
        if let Err(err) = self.store.set_cached(&key, &response, self.response_ttl).await {
            tracing::warn!(error = %err, "response cache write failed");
        }

        Ok(answered.selection)
    }

    /// Two-tier fallback over every model of every available backend.
    async fn narrow(
        &self,
        query: &str,
        candidates: &[CatalogEntry],
    ) -> Result<AnsweredQuery, ScoutError> {
        let mut ranked = Vec::new();
        for provider in &self.providers {
            if !provider.is_available() {
                continue;
            }
            match provider.models().await {
                Ok(models) => {
                    for model in models {
                        let (id, healthy, priority) = {
                            let model = model.lock().await;
                            (model.qualified_id(), model.is_healthy(), model.priority())
                        };
                        ranked.push(RankedModel {
                            provider: provider.clone(),
                            model,
                            qualified_id: id,
                            healthy,
                            priority,
                        });
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        provider = %provider.kind(),
                        error = %err,
                        "model listing failed, skipping backend"
                    );
                }
            }
        }

        if ranked.is_empty() {
            return Err(ScoutError::NoModelsConfigured(
                "no backend has a configured credential and a usable model list".to_string(),
            ));
        }

        let sticky = self.last_successful_model.lock().expect("lock poisoned").clone();
        let (mut healthy, mut problematic): (Vec<_>, Vec<_>) =
            ranked.into_iter().partition(|m| m.healthy);
        sort_tier(&mut healthy, sticky.as_deref());
        sort_tier(&mut problematic, sticky.as_deref());

        tracing::debug!(
            healthy = healthy.len(),
            problematic = problematic.len(),
            "starting narrowing fallback"
        );

        let mut attempts = 0usize;
        let mut last_error: Option<ScoutError> = None;

        for tier in [healthy, problematic] {
            for ranked in tier {
                attempts += 1;
                match ranked
                    .provider
                    .process_query(&ranked.model, query, Some(candidates))
                    .await
                {
                    Ok(attempt) => {
                        *self.last_successful_model.lock().expect("lock poisoned") =
                            Some(ranked.qualified_id.clone());
                        let selection = attempt.outcome.into_selection()?;
                        let metadata = {
                            let model = ranked.model.lock().await;
                            model.metadata().clone()
                        };
                        tracing::info!(
                            model = %ranked.qualified_id,
                            attempts,
                            latency_ms = attempt.latency_ms,
                            "narrowing succeeded"
                        );
                        return Ok(AnsweredQuery {
                            selection,
                            provider: metadata.provider,
                            model_id: metadata.id,
                            cost: attempt.cost,
                            latency_ms: attempt.latency_ms,
                        });
                    }
                    Err(err) => {
                        tracing::debug!(
                            model = %ranked.qualified_id,
                            error = %err,
                            "model attempt failed, trying next"
                        );
                        last_error = Some(err);
                    }
                }
            }
        }

        Err(ScoutError::AllModelsFailed {
            attempts,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempt produced an error".to_string()),
        })
    }

    /// Every model across every available backend, with current health.
    pub async fn all_models(&self) -> Vec<ModelSnapshot> {
        let mut snapshots = Vec::new();
        for provider in &self.providers {
            if !provider.is_available() {
                continue;
            }
            let models = match provider.models().await {
                Ok(models) => models,
                Err(err) => {
                    tracing::warn!(provider = %provider.kind(), error = %err, "model listing failed");
                    continue;
                }
            };
            for model in models {
                let model = model.lock().await;
                snapshots.push(ModelSnapshot {
                    metadata: model.metadata().clone(),
                    health: model.health().clone(),
                    is_healthy: model.is_healthy(),
                    priority: model.priority(),
                });
            }
        }
        snapshots
    }

    /// Healthy/problematic counts with failure detail for the problem tier.
    pub async fn stats(&self) -> ScoutStats {
        let snapshots = self.all_models().await;
        let mut stats = ScoutStats {
            total_models: snapshots.len(),
            healthy_models: 0,
            problematic_models: 0,
            problems: Vec::new(),
        };
        for snapshot in snapshots {
            if snapshot.is_healthy {
                stats.healthy_models += 1;
            } else {
                stats.problematic_models += 1;
                stats.problems.push(ProblemDetail {
                    qualified_id: snapshot.qualified_id(),
                    enabled: snapshot.health.enabled,
                    consecutive_failures: snapshot.health.consecutive_failures,
                    last_failure: snapshot.health.last_failure,
                });
            }
        }
        stats
    }

    /// Clear the health record of every currently-unhealthy model. Returns
    /// how many were reset.
    pub async fn reset_problematic_models(&self) -> usize {
        let mut reset = 0;
        for provider in &self.providers {
            if !provider.is_available() {
                continue;
            }
            let models = match provider.models().await {
                Ok(models) => models,
                Err(_) => continue,
            };
            for model in models {
                let mut model = model.lock().await;
                if !model.is_healthy() {
                    model.reset();
                    reset += 1;
                }
            }
        }
        reset
    }
}

struct RankedModel {
    provider: Arc<ProviderClient>,
    model: Arc<TokioMutex<Model>>,
    qualified_id: String,
    healthy: bool,
    priority: f64,
}

struct AnsweredQuery {
    selection: SlugSelection,
    provider: crate::types::ProviderKind,
    model_id: String,
    cost: f64,
    latency_ms: u64,
}

/// Ascending priority, with the sticky model (if present in this tier)
/// forced to the front.
fn sort_tier(tier: &mut [RankedModel], sticky: Option<&str>) {
    tier.sort_by(|a, b| {
        let a_sticky = sticky == Some(a.qualified_id.as_str());
        let b_sticky = sticky == Some(b.qualified_id.as_str());
        b_sticky
            .cmp(&a_sticky)
            .then_with(|| a.priority.partial_cmp(&b.priority).unwrap_or(std::cmp::Ordering::Equal))
    });
}

/// Cache key: sha256 of the lowercased, trimmed query.
fn cache_key(query: &str) -> String {
    let normalized = query.trim().to_lowercase();
    let digest = Sha256::digest(normalized.as_bytes());
    format!("scout:query:{digest:x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_normalizes_case_and_whitespace() {
        assert_eq!(cache_key("  Calendar Tools "), cache_key("calendar tools"));
        assert_ne!(cache_key("calendar"), cache_key("email"));
    }

    #[test]
    fn cache_key_is_prefixed_hex() {
        let key = cache_key("anything");
        assert!(key.starts_with("scout:query:"));
        assert_eq!(key.len(), "scout:query:".len() + 64);
    }
}
