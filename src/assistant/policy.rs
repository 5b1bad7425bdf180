//! Timeout and bounded retry around every outbound call.

use crate::agent::llm::LlmError;
use crate::config::ExternalCallSettings;
use crate::server::metrics::record_external_call;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ServiceError {
    #[error("Request timed out")]
    Timeout,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Service error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Misconfigured service: {0}")]
    Misconfigured(String),
}

impl ServiceError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Timeout | ServiceError::Connection(_) | ServiceError::RateLimited => true,
            ServiceError::Api { status, .. } => *status >= 500,
            ServiceError::InvalidResponse(_) | ServiceError::Misconfigured(_) => false,
        }
    }
}

impl From<LlmError> for ServiceError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Timeout => ServiceError::Timeout,
            LlmError::Connection(msg) => ServiceError::Connection(msg),
            LlmError::RateLimited => ServiceError::RateLimited,
            LlmError::Api { status, message } => ServiceError::Api { status, message },
            LlmError::InvalidResponse(msg) => ServiceError::InvalidResponse(msg),
            LlmError::UnsupportedProvider(p) => ServiceError::Misconfigured(p),
        }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ServiceError::Timeout
        } else if e.is_decode() {
            ServiceError::InvalidResponse(e.to_string())
        } else {
            ServiceError::Connection(e.to_string())
        }
    }
}

/// Per-attempt timeout plus exponential backoff between attempts.
#[derive(Debug, Clone)]
pub struct ExternalCallPolicy {
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl ExternalCallPolicy {
    pub fn new(settings: &ExternalCallSettings, timeout: Duration) -> Self {
        Self {
            timeout,
            max_retries: settings.max_retries,
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            backoff_multiplier: settings.backoff_multiplier,
        }
    }

    /// `initial_backoff * multiplier^retry_count`. Invalid results become zero.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let secs = self.initial_backoff.as_secs_f64()
            * self.backoff_multiplier.powi(retry_count as i32);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
    }

    pub fn should_retry(&self, error: &ServiceError, retry_count: u32) -> bool {
        error.is_retryable() && retry_count < self.max_retries
    }

    /// Runs `call` until it succeeds, fails permanently or runs out of
    /// retries. Each attempt is bounded by `timeout`.
    pub async fn run<T, F, Fut>(&self, service: &'static str, mut call: F) -> Result<T, ServiceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let mut retry_count = 0;
        loop {
            let result = match tokio::time::timeout(self.timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(ServiceError::Timeout),
            };

            match result {
                Ok(value) => {
                    debug!(service, attempts = retry_count + 1, "External call succeeded");
                    record_external_call(service, "ok");
                    return Ok(value);
                }
                Err(e) if self.should_retry(&e, retry_count) => {
                    let wait = self.backoff(retry_count);
                    warn!(
                        service,
                        error = %e,
                        retry = retry_count + 1,
                        wait_ms = wait.as_millis() as u64,
                        "External call failed, retrying"
                    );
                    record_external_call(service, "retry");
                    tokio::time::sleep(wait).await;
                    retry_count += 1;
                }
                Err(e) => {
                    warn!(service, error = %e, "External call failed");
                    record_external_call(service, "error");
                    return Err(e);
                }
            }
        }
    }
}

impl Default for ExternalCallPolicy {
    fn default() -> Self {
        Self::new(&ExternalCallSettings::default(), Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> ExternalCallPolicy {
        ExternalCallPolicy {
            timeout: Duration::from_millis(200),
            max_retries,
            initial_backoff: Duration::from_millis(1),
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn test_new_from_settings() {
        let policy = ExternalCallPolicy::new(
            &ExternalCallSettings {
                max_retries: 3,
                initial_backoff_ms: 100,
                backoff_multiplier: 1.5,
            },
            Duration::from_secs(9),
        );
        assert_eq!(policy.timeout, Duration::from_secs(9));
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.initial_backoff, Duration::from_millis(100));
    }

    #[test]
    fn test_backoff_calculation() {
        let policy = ExternalCallPolicy {
            initial_backoff: Duration::from_millis(250),
            backoff_multiplier: 2.0,
            ..Default::default()
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(250));
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));

        let broken = ExternalCallPolicy {
            backoff_multiplier: f64::NAN,
            ..policy
        };
        assert_eq!(broken.backoff(1), Duration::ZERO);
    }

    #[test]
    fn test_retryable_errors() {
        assert!(ServiceError::Timeout.is_retryable());
        assert!(ServiceError::Connection("refused".to_string()).is_retryable());
        assert!(ServiceError::RateLimited.is_retryable());
        assert!(ServiceError::Api {
            status: 503,
            message: String::new()
        }
        .is_retryable());
        assert!(!ServiceError::Api {
            status: 400,
            message: String::new()
        }
        .is_retryable());
        assert!(!ServiceError::InvalidResponse("garbage".to_string()).is_retryable());
    }

    #[test]
    fn test_should_retry_respects_max_retries() {
        let policy = fast_policy(1);
        assert!(policy.should_retry(&ServiceError::Timeout, 0));
        assert!(!policy.should_retry(&ServiceError::Timeout, 1));
    }

    #[tokio::test]
    async fn test_retries_once_then_succeeds() {
        let attempts = AtomicU32::new(0);
        let counter = &attempts;
        let result = fast_policy(1)
            .run("test", move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ServiceError::Connection("reset".to_string()))
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result, Ok(42));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let attempts = AtomicU32::new(0);
        let counter = &attempts;
        let result: Result<(), _> = fast_policy(1)
            .run("test", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ServiceError::RateLimited)
            })
            .await;

        assert_eq!(result, Err(ServiceError::RateLimited));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let attempts = AtomicU32::new(0);
        let counter = &attempts;
        let result: Result<(), _> = fast_policy(3)
            .run("test", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ServiceError::InvalidResponse("not json".to_string()))
            })
            .await;

        assert!(matches!(result, Err(ServiceError::InvalidResponse(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_call_times_out() {
        let policy = ExternalCallPolicy {
            timeout: Duration::from_millis(20),
            ..fast_policy(0)
        };
        let result = policy
            .run("test", || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok("late")
            })
            .await;

        assert_eq!(result, Err(ServiceError::Timeout));
    }
}
