use thiserror::Error;

use crate::ai_sdk::{Message, Reasoning, ReasoningEffort, RequestPayload, Tool};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("model must not be empty")]
    EmptyModel,

    #[error("input must contain at least one message")]
    EmptyInput,

    #[error("message {index} has no content")]
    EmptyMessageContent { index: usize },

    #[error("file search is enabled but no vector store is selected")]
    NoVectorStore,

    #[error("vector store id must not be blank")]
    BlankVectorStoreId,
}

/// What the user submitted: either raw text or an already-built conversation.
#[derive(Debug, Clone, PartialEq)]
pub enum PromptInput {
    Text(String),
    Messages(Vec<Message>),
}

impl From<&str> for PromptInput {
    fn from(text: &str) -> Self {
        PromptInput::Text(text.to_string())
    }
}

impl From<String> for PromptInput {
    fn from(text: String) -> Self {
        PromptInput::Text(text)
    }
}

impl From<Vec<Message>> for PromptInput {
    fn from(messages: Vec<Message>) -> Self {
        PromptInput::Messages(messages)
    }
}

impl PromptInput {
    fn into_messages(self) -> Vec<Message> {
        match self {
            PromptInput::Text(text) if text.is_empty() => Vec::new(),
            PromptInput::Text(text) => vec![Message::user(text)],
            PromptInput::Messages(messages) => messages,
        }
    }
}

pub struct PayloadBuilder {
    model: String,
    input: PromptInput,
    instructions: Option<String>,
    reasoning: Option<ReasoningEffort>,
    tools: Vec<Tool>,
    previous_response_id: Option<String>,
}

impl PayloadBuilder {
    pub fn new(model: impl Into<String>, input: impl Into<PromptInput>) -> Self {
        Self {
            model: model.into(),
            input: input.into(),
            instructions: None,
            reasoning: None,
            tools: Vec::new(),
            previous_response_id: None,
        }
    }

    /// Blank instructions are omitted from the request.
    pub fn instructions(mut self, instructions: Option<String>) -> Self {
        self.instructions = instructions.filter(|text| !text.trim().is_empty());
        self
    }

    pub fn reasoning(mut self, effort: Option<ReasoningEffort>) -> Self {
        self.reasoning = effort;
        self
    }

    pub fn tool(mut self, tool: Tool) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tools(mut self, tools: impl IntoIterator<Item = Tool>) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn previous_response_id(mut self, id: Option<String>) -> Self {
        self.previous_response_id = id.filter(|id| !id.is_empty());
        self
    }

    pub fn build(self) -> Result<RequestPayload, ValidationError> {
        let model = self.model.trim().to_string();
        if model.is_empty() {
            return Err(ValidationError::EmptyModel);
        }

        let input = self.input.into_messages();
        if input.is_empty() {
            return Err(ValidationError::EmptyInput);
        }
        if let Some(index) = input.iter().position(|m| m.content.is_empty()) {
            return Err(ValidationError::EmptyMessageContent { index });
        }

        for tool in &self.tools {
            validate_tool(tool)?;
        }

        Ok(RequestPayload {
            model,
            input,
            instructions: self.instructions,
            reasoning: self.reasoning.map(|effort| Reasoning { effort }),
            tools: if self.tools.is_empty() {
                None
            } else {
                Some(self.tools)
            },
            previous_response_id: self.previous_response_id,
            stream: true,
        })
    }
}

fn validate_tool(tool: &Tool) -> Result<(), ValidationError> {
    match tool {
        Tool::FileSearch { vector_store_ids } => {
            if vector_store_ids.is_empty() {
                return Err(ValidationError::NoVectorStore);
            }
            if vector_store_ids.iter().any(|id| id.trim().is_empty()) {
                return Err(ValidationError::BlankVectorStoreId);
            }
            Ok(())
        }
        Tool::WebSearch { .. } => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai_sdk::{ContentPart, Role, SearchContextSize};
    use serde_json::json;

    #[test]
    fn raw_text_becomes_single_user_message() {
        for text in ["hello", "  spaced  ", "line one\nline two", "日本語のテキスト"] {
            let payload = PayloadBuilder::new("gpt-5.2", text).build().unwrap();
            assert_eq!(payload.input.len(), 1);
            assert_eq!(payload.input[0].role, Role::User);
            assert_eq!(
                payload.input[0].content,
                vec![ContentPart::InputText {
                    text: text.to_string()
                }]
            );
            assert!(payload.stream);
        }
    }

    #[test]
    fn prebuilt_messages_are_kept_in_order() {
        let messages = vec![
            Message::user("first"),
            Message::assistant("reply"),
            Message::user("second"),
        ];
        let payload = PayloadBuilder::new("gpt-5.2", messages.clone()).build().unwrap();
        assert_eq!(payload.input, messages);
    }

    #[test]
    fn empty_model_or_input_is_rejected() {
        assert_eq!(
            PayloadBuilder::new("  ", "hi").build().unwrap_err(),
            ValidationError::EmptyModel
        );
        assert_eq!(
            PayloadBuilder::new("gpt-5.2", "").build().unwrap_err(),
            ValidationError::EmptyInput
        );
        assert_eq!(
            PayloadBuilder::new("gpt-5.2", Vec::<Message>::new())
                .build()
                .unwrap_err(),
            ValidationError::EmptyInput
        );
        let hollow = Message {
            role: Role::User,
            content: Vec::new(),
        };
        assert_eq!(
            PayloadBuilder::new("gpt-5.2", vec![Message::user("ok"), hollow])
                .build()
                .unwrap_err(),
            ValidationError::EmptyMessageContent { index: 1 }
        );
    }

    #[test]
    fn file_search_requires_a_store() {
        let err = PayloadBuilder::new("gpt-5.2", "hi")
            .tool(Tool::file_search(Vec::<String>::new()))
            .build()
            .unwrap_err();
        assert_eq!(err, ValidationError::NoVectorStore);

        let err = PayloadBuilder::new("gpt-5.2", "hi")
            .tool(Tool::file_search([" "]))
            .build()
            .unwrap_err();
        assert_eq!(err, ValidationError::BlankVectorStoreId);
    }

    #[test]
    fn full_payload_serializes_to_wire_shape() {
        let payload = PayloadBuilder::new("gpt-5.2", "hello")
            .instructions(Some("Be brief.".to_string()))
            .reasoning(Some(ReasoningEffort::High))
            .tool(Tool::file_search(["vs_1"]))
            .tool(Tool::web_search(SearchContextSize::Medium))
            .previous_response_id(Some("resp_0".to_string()))
            .build()
            .unwrap();

        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({
                "model": "gpt-5.2",
                "input": [{
                    "type": "message",
                    "role": "user",
                    "content": [{"type": "input_text", "text": "hello"}]
                }],
                "instructions": "Be brief.",
                "reasoning": {"effort": "high"},
                "tools": [
                    {"type": "file_search", "vector_store_ids": ["vs_1"]},
                    {"type": "web_search_preview", "search_context_size": "medium"}
                ],
                "previous_response_id": "resp_0",
                "stream": true
            })
        );
    }

    #[test]
    fn optional_fields_are_omitted_when_unset() {
        let payload = PayloadBuilder::new("gpt-5-mini", "hello")
            .instructions(Some("   ".to_string()))
            .previous_response_id(Some(String::new()))
            .build()
            .unwrap();
        let value = serde_json::to_value(&payload).unwrap();
        let object = value.as_object().unwrap();
        assert!(!object.contains_key("instructions"));
        assert!(!object.contains_key("previous_response_id"));
        assert!(!object.contains_key("tools"));
        assert!(!object.contains_key("reasoning"));
    }
}
