//! Model Health Tracking
//!
//! Each (backend, model-id) pair carries a persisted [`ModelHealth`] record
//! and moves through three states: healthy, cooling down after a recent
//! failure, and disabled once three consecutive failures circuit-break it.
//! A success re-enables the model and clears the failure streak; the
//! cooldown clears on its own ten minutes after the last failure.
//!
//! `priority()` is a hand-tuned scalarization favoring free,
//! recently-successful, reliable, cheap models; lower is tried first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::store::{Persister, StateStore};
use crate::types::ModelMetadata;

/// Consecutive failures before a model is disabled.
pub const FAILURE_THRESHOLD: u32 = 3;

/// Cooldown window after any failure.
pub const COOLDOWN_MINUTES: i64 = 10;

/// Window over which a recent success still earns a priority bonus.
pub const RECENCY_WINDOW_HOURS: f64 = 20.0;

/// Exponential smoothing weight kept by the old latency average.
const LATENCY_SMOOTHING: f64 = 0.8;

/// Persisted health/performance record for one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelHealth {
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub enabled: bool,
    pub avg_latency_ms: f64,
    pub success_rate: f64,
    pub total_successes: u64,
    pub total_failures: u64,
}

impl Default for ModelHealth {
    fn default() -> Self {
        Self {
            last_success: None,
            last_failure: None,
            consecutive_failures: 0,
            enabled: true,
            avg_latency_ms: 0.0,
            // Optimistic until evidence accumulates
            success_rate: 1.0,
            total_successes: 0,
            total_failures: 0,
        }
    }
}

impl ModelHealth {
    fn recompute_success_rate(&mut self) {
        let total = self.total_successes + self.total_failures;
        if total > 0 {
            self.success_rate = self.total_successes as f64 / total as f64;
        }
    }
}

/// Runtime handle for one callable (backend, model-id) pair.
///
/// Created when a backend adapter refreshes its model list; the health
/// record is loaded from the store at creation and written back (through the
/// background persister) after every success, failure, or reset.
#[derive(Debug, Clone)]
pub struct Model {
    metadata: ModelMetadata,
    health: ModelHealth,
    persister: Persister,
}

impl Model {
    /// Wrap freshly fetched metadata, loading any persisted health record.
    ///
    /// A failed load is logged and treated as a pristine record; health
    /// tracking is an optimization, not a correctness requirement.
    pub async fn load(
        metadata: ModelMetadata,
        store: &Arc<dyn StateStore>,
        persister: Persister,
    ) -> Self {
        let id = metadata.qualified_id();
        let health = match store.get_state(&id).await {
            Ok(Some(health)) => health,
            Ok(None) => ModelHealth::default(),
            Err(err) => {
                tracing::warn!(model_id = %id, error = %err, "failed to load model health, starting fresh");
                ModelHealth::default()
            }
        };
        Self {
            metadata,
            health,
            persister,
        }
    }

    /// Construct with an explicit health record, without touching the store.
    pub fn with_health(metadata: ModelMetadata, health: ModelHealth, persister: Persister) -> Self {
        Self {
            metadata,
            health,
            persister,
        }
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    pub fn health(&self) -> &ModelHealth {
        &self.health
    }

    /// `provider:model-id`, the store key for this model.
    pub fn qualified_id(&self) -> String {
        self.metadata.qualified_id()
    }

    /// A failure occurred within the cooldown window.
    pub fn is_cooling_down(&self) -> bool {
        self.is_cooling_down_at(Utc::now())
    }

    fn is_cooling_down_at(&self, now: DateTime<Utc>) -> bool {
        self.health
            .last_failure
            .map(|t| now.signed_duration_since(t) < chrono::Duration::minutes(COOLDOWN_MINUTES))
            .unwrap_or(false)
    }

    /// Not circuit-broken and not in cooldown.
    pub fn is_healthy(&self) -> bool {
        self.is_healthy_at(Utc::now())
    }

    fn is_healthy_at(&self, now: DateTime<Utc>) -> bool {
        self.health.enabled
            && self.health.consecutive_failures < FAILURE_THRESHOLD
            && !self.is_cooling_down_at(now)
    }

    /// Ranking score; lower is tried first.
    pub fn priority(&self) -> f64 {
        self.priority_at(Utc::now())
    }

    fn priority_at(&self, now: DateTime<Utc>) -> f64 {
        let mut score = 100.0;

        if self.metadata.is_free() {
            score -= 50.0;
        }

        // Up to 20 points for a recent success, decaying linearly over the
        // recency window.
        if let Some(last_success) = self.health.last_success {
            let hours = now.signed_duration_since(last_success).num_seconds() as f64 / 3600.0;
            let recency = (1.0 - hours / RECENCY_WINDOW_HOURS).clamp(0.0, 1.0);
            score -= 20.0 * recency;
        }

        score -= self.health.success_rate * 20.0;
        score += self.metadata.estimated_cost_per_query() * 1000.0;
        score += f64::from(self.health.consecutive_failures) * 10.0;

        score
    }

    /// Record a successful call: clears the failure streak, re-enables the
    /// model, folds the latency into the smoothed average, and persists.
    pub fn record_success(&mut self, latency_ms: u64) {
        self.health.last_success = Some(Utc::now());
        self.health.consecutive_failures = 0;
        self.health.enabled = true;
        self.health.total_successes += 1;
        let latency = latency_ms as f64;
        self.health.avg_latency_ms = if self.health.avg_latency_ms == 0.0 {
            latency
        } else {
            LATENCY_SMOOTHING * self.health.avg_latency_ms + (1.0 - LATENCY_SMOOTHING) * latency
        };
        self.health.recompute_success_rate();
        self.persist();
    }

    /// Record a failed call: starts the cooldown, bumps the streak, and
    /// disables the model once the streak reaches the threshold. Persists.
    pub fn record_failure(&mut self) {
        self.health.last_failure = Some(Utc::now());
        self.health.consecutive_failures += 1;
        self.health.total_failures += 1;
        self.health.recompute_success_rate();
        if self.health.consecutive_failures >= FAILURE_THRESHOLD {
            self.health.enabled = false;
            tracing::warn!(
                model_id = %self.qualified_id(),
                failures = self.health.consecutive_failures,
                "model disabled after consecutive failures"
            );
        }
        self.persist();
    }

    /// Clear the health record back to its pristine state and persist.
    pub fn reset(&mut self) {
        self.health = ModelHealth::default();
        self.persist();
    }

    fn persist(&self) {
        self.persister.save(&self.qualified_id(), &self.health);
    }

    #[cfg(test)]
    pub(crate) fn health_mut(&mut self) -> &mut ModelHealth {
        &mut self.health
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::ProviderKind;

    fn metadata(input: f64, output: f64) -> ModelMetadata {
        ModelMetadata {
            provider: ProviderKind::Groq,
            id: "llama-3.3-70b-versatile".to_string(),
            display_name: "Llama 3.3 70B".to_string(),
            context_window: Some(131_072),
            max_output_tokens: Some(8192),
            input_cost_per_million: input,
            output_cost_per_million: output,
            supports_json_output: true,
            supports_streaming: true,
        }
    }

    fn persister() -> Persister {
        Persister::spawn(Arc::new(MemoryStore::new()))
    }

    fn rewind_last_failure(model: &mut Model, minutes: i64) {
        let health = model.health_mut();
        health.last_failure = health
            .last_failure
            .map(|t| t - chrono::Duration::minutes(minutes));
    }

    #[tokio::test]
    async fn three_failures_break_the_circuit() {
        let mut model = Model::with_health(metadata(0.0, 0.0), ModelHealth::default(), persister());
        assert!(model.is_healthy());

        model.record_failure();
        model.record_failure();
        assert!(model.health().enabled);
        model.record_failure();

        assert!(!model.health().enabled);
        assert!(!model.is_healthy());
    }

    #[tokio::test]
    async fn success_restores_health_after_cooldown() {
        let mut model = Model::with_health(metadata(0.0, 0.0), ModelHealth::default(), persister());
        for _ in 0..3 {
            model.record_failure();
        }
        assert!(!model.is_healthy());

        model.record_success(300);
        // Streak cleared and re-enabled, but still inside the 10-minute
        // cooldown from the last failure.
        assert_eq!(model.health().consecutive_failures, 0);
        assert!(model.health().enabled);
        assert!(!model.is_healthy());

        rewind_last_failure(&mut model, COOLDOWN_MINUTES + 1);
        assert!(model.is_healthy());
    }

    #[tokio::test]
    async fn single_failure_triggers_cooldown() {
        let mut model = Model::with_health(metadata(0.0, 0.0), ModelHealth::default(), persister());
        model.record_failure();
        assert!(model.is_cooling_down());
        assert!(!model.is_healthy());

        rewind_last_failure(&mut model, COOLDOWN_MINUTES + 1);
        assert!(!model.is_cooling_down());
        assert!(model.is_healthy());
    }

    #[tokio::test]
    async fn latency_average_is_smoothed() {
        let mut model = Model::with_health(metadata(0.0, 0.0), ModelHealth::default(), persister());
        model.record_success(1000);
        assert_eq!(model.health().avg_latency_ms, 1000.0);

        model.record_success(500);
        // 0.8 * 1000 + 0.2 * 500
        assert!((model.health().avg_latency_ms - 900.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn priority_prefers_free_and_reliable() {
        let free = Model::with_health(metadata(0.0, 0.0), ModelHealth::default(), persister());
        let paid = Model::with_health(metadata(1.0, 2.0), ModelHealth::default(), persister());
        assert!(free.priority() < paid.priority());
    }

    #[tokio::test]
    async fn priority_monotonic_in_success_rate_and_failures() {
        let p = persister();
        let mut reliable = Model::with_health(metadata(0.0, 0.0), ModelHealth::default(), p.clone());
        let mut flaky = Model::with_health(metadata(0.0, 0.0), ModelHealth::default(), p.clone());
        reliable.health_mut().success_rate = 0.95;
        flaky.health_mut().success_rate = 0.40;
        assert!(reliable.priority() < flaky.priority());

        let mut failing = Model::with_health(metadata(0.0, 0.0), ModelHealth::default(), p);
        failing.health_mut().success_rate = 0.95;
        failing.health_mut().consecutive_failures = 2;
        assert!(reliable.priority() < failing.priority());
    }

    #[tokio::test]
    async fn recent_success_earns_recency_bonus() {
        let p = persister();
        let mut fresh = Model::with_health(metadata(0.0, 0.0), ModelHealth::default(), p.clone());
        let stale = Model::with_health(metadata(0.0, 0.0), ModelHealth::default(), p);
        fresh.health_mut().last_success = Some(Utc::now());
        assert!(fresh.priority() < stale.priority());
    }

    #[tokio::test]
    async fn health_round_trips_through_store() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        let persister = Persister::spawn(store.clone());

        let mut model = Model::load(metadata(0.5, 1.5), &store, persister.clone()).await;
        model.record_failure();
        model.record_success(250);
        model.record_failure();

        // Let the background persister drain.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let reloaded = Model::load(metadata(0.5, 1.5), &store, persister).await;
        assert_eq!(reloaded.is_healthy(), model.is_healthy());
        assert!((reloaded.priority() - model.priority()).abs() < 1e-9);
        assert_eq!(
            reloaded.health().consecutive_failures,
            model.health().consecutive_failures
        );
    }

    #[tokio::test]
    async fn reset_restores_pristine_record() {
        let mut model = Model::with_health(metadata(0.0, 0.0), ModelHealth::default(), persister());
        for _ in 0..3 {
            model.record_failure();
        }
        model.reset();
        assert!(model.is_healthy());
        assert_eq!(model.health().consecutive_failures, 0);
        assert!(model.health().last_failure.is_none());
    }
}
