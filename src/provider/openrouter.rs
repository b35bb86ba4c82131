//! OpenRouter Backend Adapter
//!
//! OpenRouter fronts many hosted models behind one OpenAI-style API and is
//! the only backend here that reports per-token pricing, as decimal strings,
//! which get normalized to USD per million tokens.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

use crate::error::ScoutError;
use crate::types::{CompletionRequest, ModelMetadata, ProviderKind, RawCompletion, TokenUsage};

use super::Backend;

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const API_KEY_ENV: &str = "OPENROUTER_API_KEY";

pub struct OpenRouterBackend {
    api_key: Option<SecretString>,
    base_url: String,
    http: reqwest::Client,
}

impl OpenRouterBackend {
    pub fn new(api_key: Option<SecretString>, http: reqwest::Client) -> Self {
        Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            http,
        }
    }

    /// Read `OPENROUTER_API_KEY` from the environment.
    pub fn from_env(http: reqwest::Client) -> Self {
        let api_key = std::env::var(API_KEY_ENV).ok().map(SecretString::from);
        Self::new(api_key, http)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn key(&self) -> Result<&SecretString, ScoutError> {
        self.api_key.as_ref().ok_or_else(|| {
            ScoutError::ConfigurationError(format!("missing {API_KEY_ENV}"))
        })
    }

    fn convert(&self, model: OpenRouterModel) -> Option<ModelMetadata> {
        // Chat-capable text models only: anything with an image or audio
        // modality is unsuitable for the selection task.
        let modality = model
            .architecture
            .as_ref()
            .and_then(|a| a.modality.as_deref())
            .unwrap_or("text->text");
        if modality.contains("image") || modality.contains("audio") {
            return None;
        }
        if model.id.contains("vision") {
            return None;
        }

        let supports_json = model
            .supported_parameters
            .iter()
            .any(|p| p == "response_format" || p == "structured_outputs");

        Some(ModelMetadata {
            provider: ProviderKind::OpenRouter,
            display_name: model.name.unwrap_or_else(|| model.id.clone()),
            context_window: model.context_length,
            max_output_tokens: model
                .top_provider
                .as_ref()
                .and_then(|t| t.max_completion_tokens),
            input_cost_per_million: per_million(model.pricing.as_ref().map(|p| p.prompt.as_str())),
            output_cost_per_million: per_million(
                model.pricing.as_ref().map(|p| p.completion.as_str()),
            ),
            supports_json_output: supports_json,
            supports_streaming: true,
            id: model.id,
        })
    }
}

/// OpenRouter reports prices as USD-per-token decimal strings.
fn per_million(price: Option<&str>) -> f64 {
    price
        .and_then(|p| p.parse::<f64>().ok())
        .map(|per_token| per_token * 1_000_000.0)
        .unwrap_or(0.0)
}

#[derive(Debug, Deserialize)]
struct OpenRouterModelList {
    data: Vec<OpenRouterModel>,
}

#[derive(Debug, Deserialize)]
struct OpenRouterModel {
    id: String,
    name: Option<String>,
    context_length: Option<u32>,
    pricing: Option<OpenRouterPricing>,
    architecture: Option<OpenRouterArchitecture>,
    top_provider: Option<OpenRouterTopProvider>,
    #[serde(default)]
    supported_parameters: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OpenRouterPricing {
    prompt: String,
    completion: String,
}

#[derive(Debug, Deserialize)]
struct OpenRouterArchitecture {
    modality: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenRouterTopProvider {
    max_completion_tokens: Option<u32>,
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
impl Backend for OpenRouterBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenRouter
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

        let listing: OpenRouterModelList = response.json().await.map_err(|e| {
            ScoutError::ParseError(format!("malformed OpenRouter model list: {e}"))
        })?;

        Ok(listing
            .data
            .into_iter()
            .filter_map(|m| self.convert(m))
            .collect())
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

        let completion: ChatCompletionResponse = response.json().await.map_err(|e| {
            ScoutError::ParseError(format!("malformed OpenRouter completion: {e}"))
        })?;

        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                ScoutError::ParseError("OpenRouter completion had no content".to_string())
            })?;

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
    fn price_strings_normalize_to_per_million() {
        assert!((per_million(Some("0.0000007")) - 0.7).abs() < 1e-9);
        assert_eq!(per_million(Some("0")), 0.0);
        assert_eq!(per_million(None), 0.0);
        assert_eq!(per_million(Some("garbage")), 0.0);
    }

    #[test]
    fn unavailable_without_key() {
        let backend = OpenRouterBackend::new(None, reqwest::Client::new());
        assert!(!backend.is_available());
    }

    #[test]
    fn image_modality_models_are_excluded() {
        let backend = OpenRouterBackend::new(
            Some(SecretString::from("k")),
            reqwest::Client::new(),
        );
        let model = OpenRouterModel {
            id: "some/image-model".to_string(),
            name: None,
            context_length: Some(8192),
            pricing: None,
            architecture: Some(OpenRouterArchitecture {
                modality: Some("text+image->text".to_string()),
            }),
            top_provider: None,
            supported_parameters: vec![],
        };
        assert!(backend.convert(model).is_none());
    }
}
