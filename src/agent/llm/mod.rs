//! Single-turn chat completion over Ollama or any OpenAI-compatible API,
//! selected from `[llm]` settings.

mod ollama;
mod openai;
mod provider;
mod types;

pub use ollama::OllamaProvider;
pub use openai::{ApiKeySource, OpenAIProvider};
pub use provider::{create_provider, CompletionOptions, LlmError, LlmProvider};
pub use types::{Completion, Message, Role};
