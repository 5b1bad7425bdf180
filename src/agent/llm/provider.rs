use super::ollama::OllamaProvider;
use super::openai::OpenAIProvider;
use super::types::{Completion, Message};
use crate::config::LlmSettings;
use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub(crate) const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct CompletionOptions {
    /// 0.0 is deterministic.
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub timeout: Duration,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: None,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Request timeout")]
    Timeout,

    #[error("Unsupported LLM provider: {0}")]
    UnsupportedProvider(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Connection(e.to_string())
        }
    }
}

/// A chat model reachable over HTTP.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Backend name, "ollama" or "openai".
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// Runs one completion over `messages` and returns the reply text.
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<Completion, LlmError>;

    async fn health_check(&self) -> Result<(), LlmError>;
}

/// Sends `request` and decodes a successful JSON body. 429 becomes
/// `RateLimited`, other non-2xx statuses become `Api` with the body text.
pub(crate) async fn dispatch<T: DeserializeOwned>(
    request: RequestBuilder,
    backend: &str,
) -> Result<T, LlmError> {
    let response = request.send().await?;
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(LlmError::RateLimited);
    }
    if !status.is_success() {
        return Err(LlmError::Api {
            status: status.as_u16(),
            message: response.text().await.unwrap_or_default(),
        });
    }
    response
        .json()
        .await
        .map_err(|e| LlmError::InvalidResponse(format!("Unreadable {} reply: {}", backend, e)))
}

/// Builds the provider named in the settings.
pub fn create_provider(settings: &LlmSettings) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let base_url = settings.base_url.trim_end_matches('/').to_string();
    match settings.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaProvider::new(base_url, &settings.model))),
        "openai" => {
            let provider = match &settings.api_key_command {
                Some(command) => {
                    OpenAIProvider::with_key_command(base_url, &settings.model, command.clone())
                }
                None => OpenAIProvider::new(base_url, &settings.model, settings.api_key.clone()),
            };
            Ok(Arc::new(provider))
        }
        other => Err(LlmError::UnsupportedProvider(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_known_providers() {
        let ollama = create_provider(&LlmSettings::default()).unwrap();
        assert_eq!(ollama.name(), "ollama");
        assert_eq!(ollama.model(), LlmSettings::default().model);

        let openai = create_provider(&LlmSettings {
            provider: "openai".to_string(),
            base_url: "https://api.openai.com/v1/".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: Some("sk-test".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(openai.name(), "openai");
        assert_eq!(openai.model(), "gpt-4o-mini");
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let result = create_provider(&LlmSettings {
            provider: "carrier-pigeon".to_string(),
            ..Default::default()
        });
        assert!(matches!(result, Err(LlmError::UnsupportedProvider(p)) if p == "carrier-pigeon"));
    }

    #[tokio::test]
    async fn test_dispatch_maps_connection_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let request = reqwest::Client::new().get(format!("http://{}/api/tags", addr));
        let result: Result<serde_json::Value, _> = dispatch(request, "ollama").await;
        assert!(matches!(result, Err(LlmError::Connection(_))));
    }
}
