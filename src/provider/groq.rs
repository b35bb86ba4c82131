//! Groq Backend Adapter
//!
//! OpenAI-compatible API. Groq's listing reports no pricing, so its models
//! rank as free; audio and moderation models are filtered out of the list.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

use crate::error::ScoutError;
use crate::types::{CompletionRequest, ModelMetadata, ProviderKind, RawCompletion, TokenUsage};

use super::Backend;

const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";
const API_KEY_ENV: &str = "GROQ_API_KEY";

/// Model-id fragments that mark non-chat models.
const EXCLUDED_FRAGMENTS: &[&str] = &["whisper", "tts", "guard", "embedding"];

pub struct GroqBackend {
    api_key: Option<SecretString>,
    base_url: String,
    http: reqwest::Client,
}

impl GroqBackend {
    pub fn new(api_key: Option<SecretString>, http: reqwest::Client) -> Self {
        Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            http,
        }
    }

    /// Read `GROQ_API_KEY` from the environment.
    pub fn from_env(http: reqwest::Client) -> Self {
        let api_key = std::env::var(API_KEY_ENV).ok().map(SecretString::from);
        Self::new(api_key, http)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn key(&self) -> Result<&SecretString, ScoutError> {
        self.api_key
            .as_ref()
            .ok_or_else(|| ScoutError::ConfigurationError(format!("missing {API_KEY_ENV}")))
    }

    fn convert(model: GroqModel) -> Option<ModelMetadata> {
        if !model.active {
            return None;
        }
        let lower = model.id.to_lowercase();
        if EXCLUDED_FRAGMENTS.iter().any(|f| lower.contains(f)) {
            return None;
        }
        Some(ModelMetadata {
            provider: ProviderKind::Groq,
            display_name: model.id.clone(),
            context_window: model.context_window,
            max_output_tokens: model.max_completion_tokens,
            input_cost_per_million: 0.0,
            output_cost_per_million: 0.0,
            supports_json_output: true,
            supports_streaming: true,
            id: model.id,
        })
    }
}

#[derive(Debug, Deserialize)]
struct GroqModelList {
    data: Vec<GroqModel>,
}

#[derive(Debug, Deserialize)]
struct GroqModel {
    id: String,
    #[serde(default = "default_true")]
    active: bool,
    context_window: Option<u32>,
    max_completion_tokens: Option<u32>,
}

const fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageBody,
}

#[derive(Debug, Deserialize)]
struct ChatMessageBody {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[async_trait]
impl Backend for GroqBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Groq
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn fetch_models(&self) -> Result<Vec<ModelMetadata>, ScoutError> {
        let key = self.key()?;
        let url = format!("{}/models", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .get(&url)
            .bearer_auth(key.expose_secret())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ScoutError::api_error(status.as_u16(), body));
        }

        let listing: GroqModelList = response
            .json()
            .await
            .map_err(|e| ScoutError::ParseError(format!("malformed Groq model list: {e}")))?;

        Ok(listing.data.into_iter().filter_map(Self::convert).collect())
    }

    async fn call_api(
        &self,
        model: &ModelMetadata,
        request: &CompletionRequest,
    ) -> Result<RawCompletion, ScoutError> {
        let key = self.key()?;
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        let mut body = json!({
            "model": model.id,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user},
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        if request.force_json && model.supports_json_output {
            body["response_format"] = json!({"type": "json_object"});
        }

        let response = self
            .http
            .post(&url)
            .bearer_auth(key.expose_secret())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ScoutError::api_error(status.as_u16(), body));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ScoutError::ParseError(format!("malformed Groq completion: {e}")))?;

        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ScoutError::ParseError("Groq completion had no content".to_string()))?;

        Ok(RawCompletion {
            text,
            usage: completion.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_and_guard_models_excluded() {
        for id in ["whisper-large-v3", "playai-tts", "llama-guard-4-12b"] {
            let model = GroqModel {
                id: id.to_string(),
                active: true,
                context_window: Some(8192),
                max_completion_tokens: None,
            };
            assert!(GroqBackend::convert(model).is_none(), "{id} should be excluded");
        }
    }

    #[test]
    fn chat_models_are_free() {
        let model = GroqModel {
            id: "llama-3.3-70b-versatile".to_string(),
            active: true,
            context_window: Some(131_072),
            max_completion_tokens: Some(32_768),
        };
        let metadata = GroqBackend::convert(model).unwrap();
        assert!(metadata.is_free());
        assert_eq!(metadata.provider, ProviderKind::Groq);
    }

    #[test]
    fn inactive_models_excluded() {
        let model = GroqModel {
            id: "llama-3.1-8b-instant".to_string(),
            active: false,
            context_window: None,
            max_completion_tokens: None,
        };
        assert!(GroqBackend::convert(model).is_none());
    }
}
