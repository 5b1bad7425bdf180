use super::provider::{dispatch, CompletionOptions, LlmError, LlmProvider, HEALTH_CHECK_TIMEOUT};
use super::types::{Completion, Message};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Talks to a local Ollama server through `/api/chat`, non-streaming.
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaProvider {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            model: model.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    options: SamplingOptions,
}

#[derive(Debug, Serialize)]
struct SamplingOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    message: Message,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    eval_count: Option<u32>,
}

impl From<ChatReply> for Completion {
    fn from(reply: ChatReply) -> Self {
        Completion {
            text: reply.message.content,
            truncated: reply.done_reason.as_deref() == Some("length"),
            completion_tokens: reply.eval_count,
        }
    }
}

#[derive(Debug, Deserialize)]
struct InstalledModels {
    models: Vec<InstalledModel>,
}

#[derive(Debug, Deserialize)]
struct InstalledModel {
    name: String,
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<Completion, LlmError> {
        let body = ChatRequest {
            model: &self.model,
            messages,
            stream: false,
            options: SamplingOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens,
            },
        };
        let request = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .timeout(options.timeout);

        let reply: ChatReply = dispatch(request, "ollama").await?;
        let completion = Completion::from(reply);
        debug!(
            model = %self.model,
            tokens = ?completion.completion_tokens,
            truncated = completion.truncated,
            "Ollama completion done"
        );
        Ok(completion)
    }

    /// Reachability plus a warning when the configured model is not pulled.
    async fn health_check(&self) -> Result<(), LlmError> {
        let request = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(HEALTH_CHECK_TIMEOUT);
        let installed: InstalledModels = dispatch(request, "ollama").await?;

        if !installed.models.iter().any(|m| m.name == self.model) {
            warn!(
                model = %self.model,
                installed = ?installed.models.iter().map(|m| &m.name).collect::<Vec<_>>(),
                "Configured model is not installed in Ollama"
            );
        }
        Ok(())
    }
}
