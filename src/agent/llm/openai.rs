//! Chat completions client for OpenAI and compatible servers (OpenRouter,
//! vLLM, llama.cpp).

use super::provider::{dispatch, CompletionOptions, LlmError, LlmProvider, HEALTH_CHECK_TIMEOUT};
use super::types::{Completion, Message};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

const KEY_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Where the bearer token comes from.
#[derive(Debug, Clone)]
pub enum ApiKeySource {
    None,
    Static(String),
    /// Shell command printing the key, run before every request.
    Command(String),
}

impl ApiKeySource {
    async fn resolve(&self) -> Result<Option<String>, LlmError> {
        let command = match self {
            ApiKeySource::None => return Ok(None),
            ApiKeySource::Static(key) => return Ok(Some(key.clone())),
            ApiKeySource::Command(command) => command,
        };

        let output = tokio::time::timeout(
            KEY_COMMAND_TIMEOUT,
            Command::new("sh").arg("-c").arg(command).output(),
        )
        .await
        .map_err(|_| {
            warn!(command = %command, "api_key_command timed out");
            LlmError::Timeout
        })?
        .map_err(|e| LlmError::Connection(format!("Cannot run api_key_command: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(command = %command, stderr = %stderr, "api_key_command failed");
            return Err(LlmError::Connection(format!(
                "api_key_command exited with {}",
                output.status
            )));
        }
        let key = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if key.is_empty() {
            return Err(LlmError::Connection(
                "api_key_command printed nothing".to_string(),
            ));
        }
        Ok(Some(key))
    }
}

pub struct OpenAIProvider {
    client: Client,
    base_url: String,
    model: String,
    key: ApiKeySource,
}

impl OpenAIProvider {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self::with_source(
            base_url,
            model,
            api_key.map_or(ApiKeySource::None, ApiKeySource::Static),
        )
    }

    pub fn with_key_command(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key_command: String,
    ) -> Self {
        Self::with_source(base_url, model, ApiKeySource::Command(api_key_command))
    }

    fn with_source(base_url: impl Into<String>, model: impl Into<String>, key: ApiKeySource) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            key,
        }
    }

    async fn with_auth(&self, request: RequestBuilder) -> Result<RequestBuilder, LlmError> {
        Ok(match self.key.resolve().await? {
            Some(key) => request.bearer_auth(key),
            None => request,
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionReply {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

/// `content` is null when the model only produced a refusal or tool call.
#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    completion_tokens: u32,
}

impl TryFrom<ChatCompletionReply> for Completion {
    type Error = LlmError;

    fn try_from(reply: ChatCompletionReply) -> Result<Self, LlmError> {
        let choice = reply
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("reply has no choices".to_string()))?;
        Ok(Completion {
            text: choice.message.content.unwrap_or_default(),
            truncated: choice.finish_reason.as_deref() == Some("length"),
            completion_tokens: reply.usage.map(|u| u.completion_tokens),
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<Completion, LlmError> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };
        let request = self
            .with_auth(
                self.client
                    .post(format!("{}/chat/completions", self.base_url))
                    .json(&body)
                    .timeout(options.timeout),
            )
            .await?;

        let reply: ChatCompletionReply = dispatch(request, "openai").await?;
        let completion = Completion::try_from(reply)?;
        debug!(
            model = %self.model,
            tokens = ?completion.completion_tokens,
            truncated = completion.truncated,
            "OpenAI completion done"
        );
        Ok(completion)
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        let request = self
            .with_auth(
                self.client
                    .get(format!("{}/models", self.base_url))
                    .timeout(HEALTH_CHECK_TIMEOUT),
            )
            .await?;
        let _: serde_json::Value = dispatch(request, "openai").await?;
        Ok(())
    }
}
