//! Error kinds and their retry/terminal policy.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Safety,
    RateLimit,
    Auth,
    Network,
    Timeout,
    ModelNotFound,
    ServiceUnavailable,
    Cancelled,
    Validation,
    GpuBusy,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimit | ErrorKind::Network | ErrorKind::Timeout
        )
    }

    /// Whether a failure of this kind is terminal for the whole job, as
    /// opposed to being absorbable at the single-candidate level.
    pub fn is_terminal_for_job(self) -> bool {
        !matches!(self, ErrorKind::GpuBusy)
    }
}

/// Classifies a raw provider error message into an [`ErrorKind`] by
/// substring matching against known provider error text.
pub fn classify(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();
    if lower.contains("safety") || lower.contains("safety_violation") {
        ErrorKind::Safety
    } else if lower.contains("429") || lower.contains("rate_limit") || lower.contains("quota") {
        ErrorKind::RateLimit
    } else if lower.contains("401") || lower.contains("unauthorized") || lower.contains("auth") {
        ErrorKind::Auth
    } else if lower.contains("timeout") || lower.contains("timed out") {
        ErrorKind::Timeout
    } else if lower.contains("model_not_found") || lower.contains("model not found") {
        ErrorKind::ModelNotFound
    } else if lower.contains("503") || lower.contains("service unavailable") {
        ErrorKind::ServiceUnavailable
    } else if lower.contains("cancelled") || lower.contains("canceled") {
        ErrorKind::Cancelled
    } else {
        ErrorKind::Network
    }
}

/// A provider-originated failure, carrying the classified kind plus the
/// raw message for internal logging. Never rendered to users untyped —
/// the boundary builds a [`UserFacingError`] from it instead.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct ProviderError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = classify(&message);
        Self { kind, message }
    }

    pub fn with_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::with_kind(ErrorKind::Cancelled, "operation cancelled")
    }
}

/// The sanitized shape surfaced to HTTP/WS clients; internal provider
/// text never crosses this boundary unrendered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserFacingError {
    pub message: String,
    pub suggestion: Option<String>,
    pub has_details: bool,
    pub details: Option<String>,
}

impl From<&ProviderError> for UserFacingError {
    fn from(err: &ProviderError) -> Self {
        let (message, suggestion) = match err.kind {
            ErrorKind::Safety => (
                "The request was blocked by a safety filter.".to_string(),
                Some("Try rephrasing the prompt to avoid restricted content.".to_string()),
            ),
            ErrorKind::Auth => (
                "Authentication with a model provider failed.".to_string(),
                Some("Check the configured API credentials.".to_string()),
            ),
            ErrorKind::ModelNotFound => (
                "A configured model could not be found.".to_string(),
                Some("Check the model name in the provider configuration.".to_string()),
            ),
            ErrorKind::ServiceUnavailable => (
                "A required local model service is not running.".to_string(),
                Some("Start the service from the services panel and retry.".to_string()),
            ),
            ErrorKind::Cancelled => ("The job was cancelled.".to_string(), None),
            ErrorKind::RateLimit | ErrorKind::Network | ErrorKind::Timeout => (
                "A transient error occurred after exhausting retries.".to_string(),
                Some("Retrying later may succeed.".to_string()),
            ),
            ErrorKind::Validation => ("The request parameters were invalid.".to_string(), None),
            ErrorKind::GpuBusy => ("The GPU is busy.".to_string(), None),
        };
        UserFacingError {
            message,
            suggestion,
            has_details: true,
            details: Some(err.message.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_maps_common_provider_messages() {
        assert_eq!(classify("HTTP 429 rate_limit exceeded"), ErrorKind::RateLimit);
        assert_eq!(classify("401 Unauthorized"), ErrorKind::Auth);
        assert_eq!(classify("request blocked: safety_violations"), ErrorKind::Safety);
        assert_eq!(classify("model_not_found: gpt-x"), ErrorKind::ModelNotFound);
        assert_eq!(classify("connection reset"), ErrorKind::Network);
    }

    #[test]
    fn retryable_kinds_match_spec_table() {
        assert!(ErrorKind::RateLimit.is_retryable());
        assert!(ErrorKind::Network.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(!ErrorKind::Safety.is_retryable());
        assert!(!ErrorKind::Auth.is_retryable());
    }
}
