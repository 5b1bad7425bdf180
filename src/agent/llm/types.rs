//! Chat messages and completions shared by every backend.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat turn. Both the Ollama and the OpenAI chat APIs accept this shape
/// unchanged, so it doubles as the wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Text produced by a single-turn completion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub text: String,
    /// The backend stopped at its token limit, the text may be cut short.
    pub truncated: bool,
    pub completion_tokens: Option<u32>,
}

impl Completion {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_wire_format() {
        let json = serde_json::to_string(&Message::user("120 bpm please")).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"120 bpm please"}"#);

        let parsed: Message =
            serde_json::from_str(r#"{"role":"assistant","content":"ok"}"#).unwrap();
        assert_eq!(parsed.role, Role::Assistant);
    }

    #[test]
    fn test_completion_defaults() {
        let completion = Completion::new("Add a pre-chorus.");
        assert_eq!(completion.text, "Add a pre-chorus.");
        assert!(!completion.truncated);
        assert_eq!(completion.completion_tokens, None);
    }
}
