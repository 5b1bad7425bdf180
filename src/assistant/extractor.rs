use super::policy::ServiceError;
use crate::agent::llm::{CompletionOptions, LlmProvider, Message};
use crate::features::MusicalKey;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Musical constraints read from a free-text description. Absent fields mean
/// "no constraint".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedParameters {
    pub genre: Option<String>,
    pub tempo: Option<f64>,
    pub key: Option<String>,
    pub duration_secs: Option<f64>,
}

impl ExtractedParameters {
    pub fn is_empty(&self) -> bool {
        self.genre.is_none()
            && self.tempo.is_none()
            && self.key.is_none()
            && self.duration_secs.is_none()
    }

    pub fn musical_key(&self) -> Option<MusicalKey> {
        self.key.as_deref().and_then(MusicalKey::parse)
    }
}

#[async_trait]
pub trait ParameterExtractor: Send + Sync {
    async fn extract(&self, text: &str) -> Result<ExtractedParameters, ServiceError>;
}

const EXTRACTION_PROMPT: &str = "You extract musical parameters from a description of a song. \
Reply with a single JSON object and nothing else, using exactly these fields: \
\"genre\" (a lowercase genre name such as \"pop\", \"rock\", \"hip-hop\"), \
\"tempo\" (beats per minute, number), \
\"key\" (for example \"C major\" or \"F# minor\"), \
\"duration\" (length in seconds, number). \
Use null for anything the description does not mention.";

/// Parameter extraction backed by a chat model.
pub struct LlmParameterExtractor {
    provider: Arc<dyn LlmProvider>,
    options: CompletionOptions,
}

impl LlmParameterExtractor {
    pub fn new(provider: Arc<dyn LlmProvider>, options: CompletionOptions) -> Self {
        Self { provider, options }
    }
}

#[async_trait]
impl ParameterExtractor for LlmParameterExtractor {
    async fn extract(&self, text: &str) -> Result<ExtractedParameters, ServiceError> {
        let messages = [Message::system(EXTRACTION_PROMPT), Message::user(text)];
        let response = self.provider.complete(&messages, &self.options).await?;
        let parameters = parse_parameters(&response.text)?;
        debug!(
            provider = self.provider.name(),
            parameters = ?parameters,
            "Extracted parameters from description"
        );
        Ok(parameters)
    }
}

fn number_regex() -> &'static Regex {
    static NUMBER_RE: OnceLock<Regex> = OnceLock::new();
    NUMBER_RE.get_or_init(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("number pattern is valid"))
}

/// Reads the first JSON object found in a model reply.
///
/// Models wrap JSON in prose or code fences and quote numbers, so this
/// accepts "120", "120 bpm" and 120 alike. Blank strings and non-positive
/// tempo or duration count as absent.
pub fn parse_parameters(reply: &str) -> Result<ExtractedParameters, ServiceError> {
    let fields = first_json_object(reply)?;

    let field = |names: &[&str]| names.iter().find_map(|name| fields.get(*name));

    Ok(ExtractedParameters {
        genre: field(&["genre"])
            .and_then(text_value)
            .map(|g| g.to_lowercase()),
        tempo: field(&["tempo", "bpm"]).and_then(positive_number),
        key: field(&["key"]).and_then(text_value),
        duration_secs: field(&["duration", "duration_secs", "duration_seconds"])
            .and_then(positive_number),
    })
}

/// Tries every `{` in turn and streams one value from it, so nested objects
/// and braces inside strings end where the object really ends.
fn first_json_object(reply: &str) -> Result<Map<String, Value>, ServiceError> {
    let mut first_error = None;
    for (start, _) in reply.match_indices('{') {
        match serde_json::Deserializer::from_str(&reply[start..])
            .into_iter::<Map<String, Value>>()
            .next()
        {
            Some(Ok(fields)) => return Ok(fields),
            Some(Err(e)) => {
                first_error.get_or_insert(e);
            }
            None => {}
        }
    }
    Err(ServiceError::InvalidResponse(match first_error {
        Some(e) => format!("malformed JSON object: {e}"),
        None => "no JSON object in reply".to_string(),
    }))
}

fn text_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() && !s.trim().eq_ignore_ascii_case("null") => {
            Some(s.trim().to_string())
        }
        _ => None,
    }
}

fn positive_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => number_regex()
            .find(s)
            .and_then(|m| m.as_str().parse::<f64>().ok()),
        _ => None,
    }?;
    (number.is_finite() && number > 0.0).then_some(number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::llm::{Completion, LlmError};

    #[test]
    fn test_parse_clean_json() {
        let parsed = parse_parameters(
            r#"{"genre": "Pop", "tempo": 120, "key": "F# minor", "duration": 180}"#,
        )
        .unwrap();
        assert_eq!(
            parsed,
            ExtractedParameters {
                genre: Some("pop".to_string()),
                tempo: Some(120.0),
                key: Some("F# minor".to_string()),
                duration_secs: Some(180.0),
            }
        );
        assert_eq!(
            parsed.musical_key(),
            Some(MusicalKey {
                pitch_class: 6,
                major: false
            })
        );
    }

    #[test]
    fn test_parse_json_wrapped_in_prose() {
        let reply = "Sure! Here you go:\n```json\n{\"genre\": \"rock\", \"tempo\": \"128 bpm\", \
                     \"key\": null, \"duration\": \"3.5\"}\n```\nEnjoy.";
        let parsed = parse_parameters(reply).unwrap();
        assert_eq!(parsed.genre.as_deref(), Some("rock"));
        assert_eq!(parsed.tempo, Some(128.0));
        assert_eq!(parsed.key, None);
        assert_eq!(parsed.duration_secs, Some(3.5));
    }

    #[test]
    fn test_invalid_values_are_absent() {
        let parsed = parse_parameters(
            r#"{"genre": "  ", "tempo": -20, "key": "null", "duration": 0, "mood": "sad"}"#,
        )
        .unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_alternate_field_names() {
        let parsed = parse_parameters(r#"{"bpm": 95.5, "duration_secs": 200}"#).unwrap();
        assert_eq!(parsed.tempo, Some(95.5));
        assert_eq!(parsed.duration_secs, Some(200.0));
    }

    #[test]
    fn test_nested_objects_and_braces_in_strings() {
        let parsed = parse_parameters(
            r#"{"genre": "pop", "extra": {"mood": "happy"}, "key": "A {minor}", "tempo": 120}"#,
        )
        .unwrap();
        assert_eq!(parsed.genre.as_deref(), Some("pop"));
        assert_eq!(parsed.key.as_deref(), Some("A {minor}"));
        assert_eq!(parsed.tempo, Some(120.0));
    }

    #[test]
    fn test_skips_brace_in_prose_before_json() {
        let reply = "Template {like this} aside:\n{\"tempo\": 98, \"genre\": \"soul\"}";
        let parsed = parse_parameters(reply).unwrap();
        assert_eq!(parsed.tempo, Some(98.0));
        assert_eq!(parsed.genre.as_deref(), Some("soul"));
    }

    #[test]
    fn test_reply_without_json_is_invalid() {
        assert!(matches!(
            parse_parameters("I could not understand the description."),
            Err(ServiceError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_parameters("{genre: pop}"),
            Err(ServiceError::InvalidResponse(_))
        ));
    }

    struct CannedProvider(&'static str);

    #[async_trait]
    impl LlmProvider for CannedProvider {
        fn name(&self) -> &str {
            "canned"
        }

        fn model(&self) -> &str {
            "canned"
        }

        async fn complete(
            &self,
            messages: &[Message],
            _options: &CompletionOptions,
        ) -> Result<Completion, LlmError> {
            assert_eq!(messages.len(), 2);
            Ok(Completion::new(self.0))
        }

        async fn health_check(&self) -> Result<(), LlmError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_extract_through_provider() {
        let extractor = LlmParameterExtractor::new(
            Arc::new(CannedProvider(r#"{"genre": "house", "tempo": 124}"#)),
            CompletionOptions::default(),
        );
        let parsed = extractor.extract("a summer house tune").await.unwrap();
        assert_eq!(parsed.genre.as_deref(), Some("house"));
        assert_eq!(parsed.tempo, Some(124.0));
    }
}
