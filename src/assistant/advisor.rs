use super::policy::ServiceError;
use crate::agent::llm::{CompletionOptions, LlmProvider, Message};
use crate::features::{AudioProfile, MusicalKey};
use async_trait::async_trait;
use std::fmt::Write;
use std::sync::Arc;
use tracing::warn;

/// What the advisor knows about the generated track.
#[derive(Debug, Clone)]
pub struct AdviceContext {
    pub description: Option<String>,
    pub genre: Option<String>,
    pub profile: AudioProfile,
    pub score: f64,
}

impl AdviceContext {
    fn to_prompt(&self) -> String {
        let p = &self.profile;
        let key = MusicalKey {
            pitch_class: p.key.rem_euclid(12.0) as u8,
            major: p.mode >= 0.5,
        };

        let mut prompt = String::new();
        if let Some(description) = &self.description {
            let _ = writeln!(prompt, "Description: {description}");
        }
        let _ = writeln!(
            prompt,
            "Genre: {}",
            self.genre.as_deref().unwrap_or("unspecified")
        );
        let _ = writeln!(prompt, "Tempo: {:.0} BPM", p.tempo);
        let _ = writeln!(prompt, "Key: {}", key.name());
        let _ = writeln!(prompt, "Duration: {:.0} seconds", p.duration_secs());
        let _ = writeln!(
            prompt,
            "Danceability {:.2}, energy {:.2}, valence {:.2}",
            p.danceability, p.energy, p.valence
        );
        let _ = write!(prompt, "Predicted popularity: {:.1} / 100", self.score);
        prompt
    }
}

#[async_trait]
pub trait CompositionAdvisor: Send + Sync {
    async fn advise(&self, context: &AdviceContext) -> Result<String, ServiceError>;
}

const ADVICE_PROMPT: &str = "You are an experienced music producer. Given the target \
parameters of a track, give three to five short, concrete composition and production tips \
(arrangement, instrumentation, hook, structure). Answer in plain text, one tip per line.";

pub struct LlmCompositionAdvisor {
    provider: Arc<dyn LlmProvider>,
    options: CompletionOptions,
}

impl LlmCompositionAdvisor {
    pub fn new(provider: Arc<dyn LlmProvider>, options: CompletionOptions) -> Self {
        Self { provider, options }
    }
}

#[async_trait]
impl CompositionAdvisor for LlmCompositionAdvisor {
    async fn advise(&self, context: &AdviceContext) -> Result<String, ServiceError> {
        let messages = [
            Message::system(ADVICE_PROMPT),
            Message::user(context.to_prompt()),
        ];
        let response = self.provider.complete(&messages, &self.options).await?;
        if response.truncated {
            warn!(provider = self.provider.name(), "Advice hit the token limit");
        }
        let advice = response.text.trim();
        if advice.is_empty() {
            return Err(ServiceError::InvalidResponse("empty advice".to_string()));
        }
        Ok(advice.to_string())
    }
}
