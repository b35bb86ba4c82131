//! Ollama Backend Adapter
//!
//! Local models over Ollama's native API. Available only when
//! `OLLAMA_BASE_URL` is configured; everything it serves is free.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::error::ScoutError;
use crate::types::{CompletionRequest, ModelMetadata, ProviderKind, RawCompletion, TokenUsage};

use super::Backend;

const BASE_URL_ENV: &str = "OLLAMA_BASE_URL";

pub struct OllamaBackend {
    base_url: Option<String>,
    http: reqwest::Client,
}

impl OllamaBackend {
    pub fn new(base_url: Option<String>, http: reqwest::Client) -> Self {
        Self { base_url, http }
    }

    /// Read `OLLAMA_BASE_URL` from the environment. Unset means this
    /// backend is not configured; there is no implicit localhost default.
    pub fn from_env(http: reqwest::Client) -> Self {
        Self::new(std::env::var(BASE_URL_ENV).ok(), http)
    }

    fn base(&self) -> Result<&str, ScoutError> {
        self.base_url
            .as_deref()
            .map(|s| s.trim_end_matches('/'))
            .ok_or_else(|| ScoutError::ConfigurationError(format!("missing {BASE_URL_ENV}")))
    }

    fn convert(model: OllamaModel) -> ModelMetadata {
        ModelMetadata {
            provider: ProviderKind::Ollama,
            display_name: model.name.clone(),
            // The tags endpoint does not report window or output bounds
            context_window: None,
            max_output_tokens: None,
            input_cost_per_million: 0.0,
            output_cost_per_million: 0.0,
            supports_json_output: true,
            supports_streaming: true,
            id: model.name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OllamaTagList {
    models: Vec<OllamaModel>,
}

#[derive(Debug, Deserialize)]
struct OllamaModel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    content: String,
}

#[async_trait]
impl Backend for OllamaBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    fn is_available(&self) -> bool {
        self.base_url.is_some()
    }

    async fn fetch_models(&self) -> Result<Vec<ModelMetadata>, ScoutError> {
        let url = format!("{}/api/tags", self.base()?);
        let response = self.http.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ScoutError::api_error(status.as_u16(), body));
        }

        let listing: OllamaTagList = response
            .json()
            .await
            .map_err(|e| ScoutError::ParseError(format!("malformed Ollama tag list: {e}")))?;

        Ok(listing.models.into_iter().map(Self::convert).collect())
    }

    async fn call_api(
        &self,
        model: &ModelMetadata,
        request: &CompletionRequest,
    ) -> Result<RawCompletion, ScoutError> {
        let url = format!("{}/api/chat", self.base()?);

        let mut body = json!({
            "model": model.id,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user},
            ],
            "stream": false,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            },
        });
        if request.force_json {
            body["format"] = json!("json");
        }

        let response = self.http.post(&url).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ScoutError::api_error(status.as_u16(), body));
        }

        let completion: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| ScoutError::ParseError(format!("malformed Ollama chat response: {e}")))?;

        let usage = match (completion.prompt_eval_count, completion.eval_count) {
            (Some(prompt_tokens), Some(completion_tokens)) => Some(TokenUsage {
                prompt_tokens,
                completion_tokens,
            }),
            _ => None,
        };

        Ok(RawCompletion {
            text: completion.message.content,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_without_base_url() {
        let backend = OllamaBackend::new(None, reqwest::Client::new());
        assert!(!backend.is_available());
    }

    #[test]
    fn local_models_are_free() {
        let metadata = OllamaBackend::convert(OllamaModel {
            name: "llama3.2:latest".to_string(),
        });
        assert!(metadata.is_free());
        assert_eq!(metadata.qualified_id(), "ollama:llama3.2:latest");
    }
}
