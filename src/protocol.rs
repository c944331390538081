use serde::{Deserialize, Serialize};

/// Token counters reported by a completed response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cached_tokens: u64,
}

impl Usage {
    /// Builds usage counters, clamping `cached_tokens` to `input_tokens`.
    pub fn new(input_tokens: u64, output_tokens: u64, total_tokens: u64, cached_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
            cached_tokens: cached_tokens.min(input_tokens),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Authentication,
    RateLimited,
    Timeout,
    Connection,
    NotFound,
    Conflict,
    Unprocessable,
    Server,
    BadRequest,
    UnsupportedReasoningEffort,
    ContextLengthExceeded,
    Validation,
    Stream,
    Unexpected,
}

impl FailureKind {
    pub fn label(self) -> &'static str {
        match self {
            FailureKind::Authentication => "Auth Error",
            FailureKind::RateLimited => "Rate Limited",
            FailureKind::Timeout => "Timeout",
            FailureKind::Connection => "Connection Error",
            FailureKind::NotFound => "Not Found",
            FailureKind::Conflict => "Conflict",
            FailureKind::Unprocessable => "Unprocessable Request",
            FailureKind::Server => "Server Error",
            FailureKind::BadRequest => "Bad Request",
            FailureKind::UnsupportedReasoningEffort => "Reasoning Effort",
            FailureKind::ContextLengthExceeded => "Context Length",
            FailureKind::Validation => "Validation Error",
            FailureKind::Stream => "Stream Error",
            FailureKind::Unexpected => "Unexpected Error",
        }
    }
}

/// One parsed item of a streamed response, in production order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamResult {
    TextDelta { text: String },
    ResponseCreated { response_id: String },
    Usage(Usage),
    Error { kind: FailureKind, message: String },
}

impl StreamResult {
    pub fn error(kind: FailureKind, message: impl Into<String>) -> Self {
        StreamResult::Error {
            kind,
            message: message.into(),
        }
    }
}

/// Items carried by the generation queue from the background task to the UI tick.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    Result(StreamResult),
    Notice(String),
    Finished,
}
