use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    InputText { text: String },
    OutputText { text: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "message")]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentPart::InputText { text: text.into() }],
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentPart::OutputText { text: text.into() }],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    None,
    Minimal,
    Low,
    Medium,
    High,
    #[serde(rename = "xhigh")]
    XHigh,
}

impl ReasoningEffort {
    pub const ALL: [ReasoningEffort; 6] = [
        ReasoningEffort::None,
        ReasoningEffort::Minimal,
        ReasoningEffort::Low,
        ReasoningEffort::Medium,
        ReasoningEffort::High,
        ReasoningEffort::XHigh,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ReasoningEffort::None => "none",
            ReasoningEffort::Minimal => "minimal",
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
            ReasoningEffort::XHigh => "xhigh",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|effort| effort.as_str().eq_ignore_ascii_case(value.trim()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reasoning {
    pub effort: ReasoningEffort,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchContextSize {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Tool {
    FileSearch {
        vector_store_ids: Vec<String>,
    },
    #[serde(rename = "web_search_preview")]
    WebSearch {
        search_context_size: SearchContextSize,
    },
}

impl Tool {
    /// File search over the given stores; duplicate ids are dropped, first occurrence wins.
    pub fn file_search<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut vector_store_ids: Vec<String> = Vec::new();
        for id in ids {
            let id = id.into();
            if !vector_store_ids.contains(&id) {
                vector_store_ids.push(id);
            }
        }
        Tool::FileSearch { vector_store_ids }
    }

    pub fn web_search(search_context_size: SearchContextSize) -> Self {
        Tool::WebSearch {
            search_context_size,
        }
    }
}

/// Body of `POST /responses`. Construct through `payload::PayloadBuilder`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestPayload {
    pub model: String,
    pub input: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<Reasoning>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
    pub stream: bool,
}

/// A single decoded server-sent event from the responses stream.
///
/// Only the JSON envelope and its `type` discriminator are decoded here. Typed
/// fields are read per known event kind, so unfamiliar or reshaped events
/// never fail the stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawEvent {
    pub kind: String,
    pub data: serde_json::Value,
}

impl RawEvent {
    pub fn from_value(data: serde_json::Value) -> Self {
        let kind = data
            .get("type")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();
        Self { kind, data }
    }

    /// A top-level field, treating an explicit `null` as absent.
    pub fn field(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key).filter(|value| !value.is_null())
    }

    /// Decodes a top-level field into `T`. A field of the wrong shape is
    /// reported as an error rather than silently dropped.
    pub fn typed<T: DeserializeOwned>(&self, key: &str) -> Option<Result<T, serde_json::Error>> {
        self.field(key).map(T::deserialize)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub usage: Option<RawUsage>,
}

/// Token counts as reported. Providers sometimes send `null` for counts they
/// did not compute, so every count is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawUsage {
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
    #[serde(default)]
    pub total_tokens: Option<u64>,
    #[serde(default)]
    pub input_tokens_details: Option<RawInputTokensDetails>,
}

impl RawUsage {
    pub fn cached_tokens(&self) -> u64 {
        self.input_tokens_details
            .as_ref()
            .and_then(|details| details.cached_tokens)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawInputTokensDetails {
    #[serde(default)]
    pub cached_tokens: Option<u64>,
}
