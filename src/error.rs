//! Provider and transport failures, and how they are shown to the user.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::protocol::FailureKind;

#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("authentication failed: {message}")]
    Authentication { message: String },

    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("not found: {message}")]
    NotFound { message: String },

    #[error("conflict: {message}")]
    Conflict { message: String },

    #[error("unprocessable request: {message}")]
    Unprocessable { message: String },

    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("bad request: {message}")]
    BadRequest {
        message: String,
        param: Option<String>,
        code: Option<String>,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("stream interrupted: {0}")]
    Stream(String),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("unexpected status {status}: {message}")]
    Unexpected { status: u16, message: String },
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    param: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

impl ApiError {
    /// Classifies a non-success HTTP response.
    pub fn from_status(status: u16, retry_after: Option<Duration>, body: &str) -> Self {
        let (message, param, code) = match serde_json::from_str::<ErrorEnvelope>(body) {
            Ok(envelope) => (
                envelope.error.message.unwrap_or_else(|| body.to_string()),
                envelope.error.param,
                envelope.error.code,
            ),
            Err(_) => (body.to_string(), None, None),
        };

        match status {
            400 => ApiError::BadRequest {
                message,
                param,
                code,
            },
            401 | 403 => ApiError::Authentication { message },
            404 => ApiError::NotFound { message },
            408 | 504 => ApiError::Timeout,
            409 => ApiError::Conflict { message },
            422 => ApiError::Unprocessable { message },
            429 => ApiError::RateLimited {
                message,
                retry_after,
            },
            500..=599 => ApiError::Server { status, message },
            _ => ApiError::Unexpected { status, message },
        }
    }

    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else if err.is_builder() {
            ApiError::InvalidRequest(err.to_string())
        } else if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else if err.is_body() {
            ApiError::Stream(err.to_string())
        } else {
            ApiError::Connection(err.to_string())
        }
    }

    /// Errors worth retrying while no output has been delivered yet.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiError::RateLimited { .. }
                | ApiError::Connection(_)
                | ApiError::Timeout
                | ApiError::Server { .. }
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            ApiError::Authentication { .. } => FailureKind::Authentication,
            ApiError::RateLimited { .. } => FailureKind::RateLimited,
            ApiError::Timeout => FailureKind::Timeout,
            ApiError::Connection(_) => FailureKind::Connection,
            ApiError::NotFound { .. } => FailureKind::NotFound,
            ApiError::Conflict { .. } => FailureKind::Conflict,
            ApiError::Unprocessable { .. } => FailureKind::Unprocessable,
            ApiError::Server { .. } => FailureKind::Server,
            ApiError::BadRequest {
                message,
                param,
                code,
            } => bad_request_subcase(message, param.as_deref(), code.as_deref())
                .unwrap_or(FailureKind::BadRequest),
            ApiError::InvalidRequest(_) => FailureKind::Validation,
            ApiError::Stream(_) | ApiError::Decode(_) => FailureKind::Stream,
            ApiError::Unexpected { .. } => FailureKind::Unexpected,
        }
    }

    /// Actionable text for the transcript.
    pub fn user_message(&self) -> String {
        match self.kind() {
            FailureKind::Authentication => {
                "Authentication failed: the API key is invalid or lacks access. Check OPENAI_API_KEY."
                    .to_string()
            }
            FailureKind::RateLimited => {
                "Rate limit reached or quota exhausted. Wait a moment and retry, or check your account balance."
                    .to_string()
            }
            FailureKind::Timeout => "The server did not respond within the time limit.".to_string(),
            FailureKind::NotFound => format!(
                "Resource not found ({}). If a previous response expired, reset the context with /reset.",
                self.detail()
            ),
            FailureKind::UnsupportedReasoningEffort => {
                "The selected reasoning effort is not supported by this model.".to_string()
            }
            FailureKind::ContextLengthExceeded => {
                "The input and conversation history exceed the model's context window. Reset the context with /reset or narrow the question."
                    .to_string()
            }
            FailureKind::Connection => format!("Could not reach the API: {}", self.detail()),
            FailureKind::Server => format!("The API reported a server error: {}", self.detail()),
            _ => self.to_string(),
        }
    }

    fn detail(&self) -> String {
        match self {
            ApiError::Connection(message)
            | ApiError::Stream(message)
            | ApiError::Decode(message)
            | ApiError::InvalidRequest(message) => message.clone(),
            ApiError::Authentication { message }
            | ApiError::RateLimited { message, .. }
            | ApiError::NotFound { message }
            | ApiError::Conflict { message }
            | ApiError::Unprocessable { message }
            | ApiError::Server { message, .. }
            | ApiError::BadRequest { message, .. }
            | ApiError::Unexpected { message, .. } => message.clone(),
            ApiError::Timeout => "timeout".to_string(),
        }
    }
}

/// Recognizes the malformed-request cases the UI offers a fix for.
///
/// The provider's `code` and `param` decide when either is present. Message
/// text is only consulted for bare errors that carry neither.
pub fn bad_request_subcase(
    message: &str,
    param: Option<&str>,
    code: Option<&str>,
) -> Option<FailureKind> {
    if code.is_some() || param.is_some() {
        if code == Some("context_length_exceeded") {
            return Some(FailureKind::ContextLengthExceeded);
        }
        if param.is_some_and(|p| p.starts_with("reasoning")) {
            return Some(FailureKind::UnsupportedReasoningEffort);
        }
        return None;
    }

    let lower = message.to_lowercase();
    if lower.contains("reasoning") {
        return Some(FailureKind::UnsupportedReasoningEffort);
    }
    if lower.contains("maximum context length") || lower.contains("context window") {
        return Some(FailureKind::ContextLengthExceeded);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_taxonomy() {
        assert!(matches!(
            ApiError::from_status(401, None, "{}"),
            ApiError::Authentication { .. }
        ));
        assert!(matches!(
            ApiError::from_status(404, None, ""),
            ApiError::NotFound { .. }
        ));
        assert!(matches!(
            ApiError::from_status(409, None, ""),
            ApiError::Conflict { .. }
        ));
        assert!(matches!(
            ApiError::from_status(422, None, ""),
            ApiError::Unprocessable { .. }
        ));
        assert!(matches!(ApiError::from_status(504, None, ""), ApiError::Timeout));
        assert!(matches!(
            ApiError::from_status(502, None, "bad gateway"),
            ApiError::Server { status: 502, .. }
        ));
        assert!(matches!(
            ApiError::from_status(418, None, ""),
            ApiError::Unexpected { status: 418, .. }
        ));
    }

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(ApiError::from_status(429, None, "").is_transient());
        assert!(ApiError::from_status(500, None, "").is_transient());
        assert!(ApiError::Timeout.is_transient());
        assert!(ApiError::Connection("reset".into()).is_transient());
        assert!(!ApiError::from_status(401, None, "").is_transient());
        assert!(!ApiError::from_status(400, None, "").is_transient());
        assert!(!ApiError::from_status(404, None, "").is_transient());
        assert!(!ApiError::Stream("eof".into()).is_transient());
    }

    #[test]
    fn provider_error_envelope_is_parsed() {
        let body = r#"{"error": {"message": "Unsupported value: 'reasoning.effort' does not support 'none' with this model.", "type": "invalid_request_error", "param": "reasoning.effort", "code": "unsupported_value"}}"#;
        let err = ApiError::from_status(400, None, body);
        assert_eq!(err.kind(), FailureKind::UnsupportedReasoningEffort);
        assert!(err.to_string().contains("does not support 'none'"));
    }

    #[test]
    fn context_length_is_a_distinct_subcase() {
        let body = r#"{"error": {"message": "Your input exceeds the context window of this model.", "code": "context_length_exceeded"}}"#;
        let err = ApiError::from_status(400, None, body);
        assert_eq!(err.kind(), FailureKind::ContextLengthExceeded);
        assert!(err.user_message().contains("/reset"));
    }

    #[test]
    fn structured_fields_outrank_message_text() {
        assert_eq!(
            bad_request_subcase(
                "Request too large: reasoning tokens exceed the maximum context length",
                Some("input"),
                Some("context_length_exceeded"),
            ),
            Some(FailureKind::ContextLengthExceeded)
        );
        assert_eq!(
            bad_request_subcase("The reasoning summary is too large", Some("max_output_tokens"), None),
            None
        );
        assert_eq!(
            bad_request_subcase("Upload too large", None, Some("file_too_large")),
            None
        );
    }

    #[test]
    fn bare_messages_fall_back_to_text_with_reasoning_first() {
        assert_eq!(
            bad_request_subcase("reasoning input exceeds the maximum context length", None, None),
            Some(FailureKind::UnsupportedReasoningEffort)
        );
        assert_eq!(
            bad_request_subcase("This exceeds the model's context window", None, None),
            Some(FailureKind::ContextLengthExceeded)
        );
        assert_eq!(bad_request_subcase("Image too large", None, None), None);
    }

    #[test]
    fn plain_bad_request_stays_generic() {
        let err = ApiError::from_status(400, None, "missing field");
        assert_eq!(err.kind(), FailureKind::BadRequest);
        assert_eq!(err.to_string(), "bad request: missing field");
    }

    #[test]
    fn rate_limit_keeps_retry_after_hint() {
        let err = ApiError::from_status(429, Some(Duration::from_secs(3)), "slow down");
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
    }
}
