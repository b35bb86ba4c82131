//! Shared data types used across backends and the orchestrator.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::error::ScoutError;

/// Assumed token mix for cost estimation: a narrowing prompt with a candidate
/// listing plus a short structured reply.
pub const ESTIMATE_INPUT_TOKENS: f64 = 2000.0;
pub const ESTIMATE_OUTPUT_TOKENS: f64 = 500.0;

/// The fixed set of supported backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenRouter,
    Groq,
    Ollama,
}

impl ProviderKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OpenRouter => "openrouter",
            Self::Groq => "groq",
            Self::Ollama => "ollama",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static description of one (backend, model-id) pair as reported by the
/// backend's model-listing endpoint, prices normalized to USD per million
/// tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub provider: ProviderKind,
    pub id: String,
    pub display_name: String,
    pub context_window: Option<u32>,
    pub max_output_tokens: Option<u32>,
    /// USD per million input tokens; 0.0 for free/local models
    pub input_cost_per_million: f64,
    /// USD per million output tokens; 0.0 for free/local models
    pub output_cost_per_million: f64,
    pub supports_json_output: bool,
    pub supports_streaming: bool,
}

impl ModelMetadata {
    /// Globally unique identifier, `provider:model-id`.
    pub fn qualified_id(&self) -> String {
        format!("{}:{}", self.provider, self.id)
    }

    /// True when both unit costs are zero.
    pub fn is_free(&self) -> bool {
        self.input_cost_per_million == 0.0 && self.output_cost_per_million == 0.0
    }

    /// Estimated USD cost of one query under the fixed token mix.
    pub fn estimated_cost_per_query(&self) -> f64 {
        (ESTIMATE_INPUT_TOKENS * self.input_cost_per_million
            + ESTIMATE_OUTPUT_TOKENS * self.output_cost_per_million)
            / 1_000_000.0
    }
}

/// Token usage counters, when the backend reports them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Raw output of one completion call, before parsing.
#[derive(Debug, Clone)]
pub struct RawCompletion {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

/// A single chat-style request: a system/user prompt pair plus generation
/// bounds. Built by the prompt module, consumed by backend adapters.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Ask the backend for structured JSON output when the model supports it
    pub force_json: bool,
}

/// One candidate catalog record as supplied by the caller's search function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub slug: String,
    pub name: String,
    pub description: String,
    pub capabilities: Vec<String>,
}

/// First-phase result: what the query is asking for, before any candidates
/// exist. Produced when `process_query` is called without candidates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub capabilities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similar_to: Option<String>,
    pub constraints: Vec<String>,
    pub confidence: f64,
}

/// Narrowing-phase result: the slugs the model selected from the candidate
/// list, with its reasoning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlugSelection {
    pub selected_slugs: Vec<String>,
    pub reasoning: String,
    pub confidence: f64,
}

/// Either shape of a model-assisted answer, distinguished by whether
/// candidates were supplied to the call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryOutcome {
    Selection(SlugSelection),
    Analysis(QueryAnalysis),
}

impl QueryOutcome {
    pub fn into_selection(self) -> Result<SlugSelection, ScoutError> {
        match self {
            Self::Selection(s) => Ok(s),
            Self::Analysis(_) => Err(ScoutError::InternalError(
                "expected a slug selection, got a query analysis".to_string(),
            )),
        }
    }
}

/// A cached final answer for one normalized query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    pub query: String,
    pub selection: SlugSelection,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub provider: ProviderKind,
    pub model_id: String,
    pub cost: f64,
    pub latency_ms: u64,
}

/// Caller-supplied catalog search: keywords in, candidate records out.
pub type SearchFuture = Pin<Box<dyn Future<Output = Result<Vec<CatalogEntry>, ScoutError>> + Send>>;
pub type SearchFn = dyn Fn(Vec<String>) -> SearchFuture + Send + Sync;

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(input: f64, output: f64) -> ModelMetadata {
        ModelMetadata {
            provider: ProviderKind::OpenRouter,
            id: "meta-llama/llama-3.3-70b".to_string(),
            display_name: "Llama 3.3 70B".to_string(),
            context_window: Some(131_072),
            max_output_tokens: Some(4096),
            input_cost_per_million: input,
            output_cost_per_million: output,
            supports_json_output: true,
            supports_streaming: true,
        }
    }

    #[test]
    fn free_model_has_zero_estimate() {
        let m = metadata(0.0, 0.0);
        assert!(m.is_free());
        assert_eq!(m.estimated_cost_per_query(), 0.0);
    }

    #[test]
    fn cost_estimate_uses_fixed_token_mix() {
        // $1/M input, $2/M output -> 2000*1 + 500*2 = 3000 micro-dollars
        let m = metadata(1.0, 2.0);
        assert!(!m.is_free());
        assert!((m.estimated_cost_per_query() - 0.003).abs() < 1e-9);
    }

    #[test]
    fn qualified_id_includes_provider() {
        let m = metadata(0.0, 0.0);
        assert_eq!(m.qualified_id(), "openrouter:meta-llama/llama-3.3-70b");
    }
}
