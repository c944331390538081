use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;

use crate::ai_sdk::{RawEvent, RawResponse, RequestPayload, ResponsesApi};
use crate::error::bad_request_subcase;
use crate::protocol::{FailureKind, StreamResult, Usage};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventKind {
    TextDelta,
    Created,
    Completed,
    Error,
}

/// Discriminators this client understands. Anything else is dropped.
const EVENT_KINDS: &[(&str, EventKind)] = &[
    ("response.output_text.delta", EventKind::TextDelta),
    ("response.created", EventKind::Created),
    ("response.completed", EventKind::Completed),
    ("error", EventKind::Error),
];

fn classify(discriminator: &str) -> Option<EventKind> {
    EVENT_KINDS
        .iter()
        .find(|(name, _)| *name == discriminator)
        .map(|(_, kind)| *kind)
}

/// Opens a streamed response and yields domain results in production order.
///
/// Opening the connection is retried under `policy`; once events flow, a
/// failure ends the sequence with a single `Error` so partial text is never
/// replayed. The returned stream is finite and cannot be restarted.
pub fn stream(
    api: Arc<dyn ResponsesApi>,
    payload: RequestPayload,
    policy: RetryPolicy,
) -> impl Stream<Item = StreamResult> + Send + 'static {
    async_stream::stream! {
        let opened = policy
            .run("create_response", |_| {
                let api = Arc::clone(&api);
                let payload = &payload;
                async move { api.create_response_stream(payload).await }
            })
            .await;

        let mut events = match opened {
            Ok(events) => events,
            Err(err) => {
                tracing::error!(error = %err, model = %payload.model, "could not open response stream");
                yield StreamResult::error(err.kind(), err.user_message());
                return;
            }
        };

        let mut finished = false;
        while let Some(item) = events.next().await {
            match item {
                Ok(event) => {
                    if let Some(result) = map_event(event) {
                        finished |= matches!(result, StreamResult::Usage(_) | StreamResult::Error { .. });
                        yield result;
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "response stream interrupted");
                    yield StreamResult::error(FailureKind::Stream, err.user_message());
                    return;
                }
            }
        }

        if !finished {
            tracing::warn!(model = %payload.model, "response stream ended without usage");
        }
    }
}

/// Maps one provider event to a domain result, or `None` if it carries nothing
/// the UI needs.
pub fn map_event(event: RawEvent) -> Option<StreamResult> {
    match classify(&event.kind)? {
        EventKind::TextDelta => typed::<String>(&event, "delta")
            .filter(|text| !text.is_empty())
            .map(|text| StreamResult::TextDelta { text }),
        EventKind::Created => typed::<RawResponse>(&event, "response")
            .and_then(|response| response.id)
            .filter(|id| !id.is_empty())
            .map(|response_id| StreamResult::ResponseCreated { response_id }),
        EventKind::Completed => {
            let usage = typed::<RawResponse>(&event, "response")?.usage?;
            Some(StreamResult::Usage(Usage::new(
                usage.input_tokens.unwrap_or(0),
                usage.output_tokens.unwrap_or(0),
                usage.total_tokens.unwrap_or(0),
                usage.cached_tokens(),
            )))
        }
        EventKind::Error => {
            let (message, param, code) = error_details(&event);
            let kind = bad_request_subcase(&message, param.as_deref(), code.as_deref())
                .unwrap_or(FailureKind::Stream);
            Some(StreamResult::error(kind, message))
        }
    }
}

/// Reads a field of a known event. A reshaped field drops the event.
fn typed<T: DeserializeOwned>(event: &RawEvent, key: &str) -> Option<T> {
    match event.typed(key)? {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(kind = %event.kind, field = key, error = %err, "ignoring reshaped event field");
            None
        }
    }
}

fn error_details(event: &RawEvent) -> (String, Option<String>, Option<String>) {
    let field = |value: &serde_json::Value, key: &str| {
        value.get(key).and_then(|v| v.as_str()).map(str::to_string)
    };

    match event.field("error") {
        Some(serde_json::Value::String(text)) => (text.clone(), None, None),
        Some(value @ serde_json::Value::Object(_)) => match field(value, "message") {
            Some(message) => (message, field(value, "param"), field(value, "code")),
            None => (value.to_string(), None, None),
        },
        Some(other) => (other.to_string(), None, None),
        None => (
            field(&event.data, "message").unwrap_or_else(|| "Unknown stream error".to_string()),
            None,
            None,
        ),
    }
}
