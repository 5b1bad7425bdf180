//! External collaborators of the studio: parameter extraction, composition
//! advice and audio synthesis. Each sits behind a trait and every call goes
//! through an [`ExternalCallPolicy`].

mod advisor;
mod extractor;
mod policy;
mod synthesis;

pub use advisor::{AdviceContext, CompositionAdvisor, LlmCompositionAdvisor};
pub use extractor::{parse_parameters, ExtractedParameters, LlmParameterExtractor, ParameterExtractor};
pub use policy::{ExternalCallPolicy, ServiceError};
pub use synthesis::{AudioClip, AudioSynthesizer, HttpAudioSynthesizer, SynthesisRequest};

use serde::Serialize;

/// How the parameters of a generation were obtained.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExtractionStatus {
    Extracted,
    /// Extraction failed; all parameters are absent.
    Degraded { reason: String },
    /// No description given, or no extractor configured.
    Skipped,
}

/// Result of an optional external service, reported next to the main result
/// instead of failing it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum ServiceOutcome<T> {
    Ok(T),
    Unavailable { reason: String },
    Disabled,
}

impl<T> ServiceOutcome<T> {
    pub fn from_result(result: Result<T, ServiceError>) -> Self {
        match result {
            Ok(value) => ServiceOutcome::Ok(value),
            Err(e) => ServiceOutcome::Unavailable {
                reason: e.to_string(),
            },
        }
    }

    pub fn ok(self) -> Option<T> {
        match self {
            ServiceOutcome::Ok(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ServiceOutcome<U> {
        match self {
            ServiceOutcome::Ok(value) => ServiceOutcome::Ok(f(value)),
            ServiceOutcome::Unavailable { reason } => ServiceOutcome::Unavailable { reason },
            ServiceOutcome::Disabled => ServiceOutcome::Disabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_status_serialization() {
        assert_eq!(
            serde_json::to_value(ExtractionStatus::Extracted).unwrap(),
            serde_json::json!({"status": "extracted"})
        );
        assert_eq!(
            serde_json::to_value(ExtractionStatus::Degraded {
                reason: "Request timed out".to_string()
            })
            .unwrap(),
            serde_json::json!({"status": "degraded", "reason": "Request timed out"})
        );
    }

    #[test]
    fn test_service_outcome() {
        let ok: ServiceOutcome<u32> = ServiceOutcome::from_result(Ok(3));
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            serde_json::json!({"status": "ok", "value": 3})
        );
        assert_eq!(ok.clone().map(|v| v * 2), ServiceOutcome::Ok(6));
        assert_eq!(ok.ok(), Some(3));

        let failed: ServiceOutcome<u32> = ServiceOutcome::from_result(Err(ServiceError::Timeout));
        assert_eq!(
            failed,
            ServiceOutcome::Unavailable {
                reason: "Request timed out".to_string()
            }
        );
        assert_eq!(failed.ok(), None);

        assert_eq!(
            serde_json::to_value(ServiceOutcome::<u32>::Disabled).unwrap(),
            serde_json::json!({"status": "disabled"})
        );
    }
}
