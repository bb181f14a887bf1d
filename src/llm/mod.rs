//! Model client interface.
//!
//! The agent loop only depends on [`LlmClient`]: hand it the conversation and the
//! tool catalog, get back one complete [`ModelResponse`]. Backends live in
//! submodules.

mod openai_compat;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::ModelConfig;

pub use openai_compat::OpenAiCompatClient;

/// Failure contacting or decoding the model backend.
#[derive(Debug, Error)]
pub enum ModelBackendError {
    #[error("request to model backend failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode model response: {0}")]
    Decode(String),

    #[error("invalid model request: {0}")]
    InvalidRequest(String),

    #[error("model backend returned no choices")]
    EmptyResponse,
}

/// Conversation role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Function name plus the raw JSON argument string the model produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: function_kind(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// One entry of the conversation sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Assistant entry. An empty call list is stored as `None` so the
    /// serialized message stays valid for providers that reject `[]`.
    pub fn assistant(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
            tool_call_id: None,
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// Tool calls carried by this message, empty for non-assistant entries.
    pub fn calls(&self) -> &[ToolCall] {
        self.tool_calls.as_deref().unwrap_or(&[])
    }
}

/// A single, complete model reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl ModelResponse {
    /// Plain text reply with no tool calls.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Request/response contract to a language-model backend.
///
/// Implementations return one complete response per call and never retry;
/// a failure ends the agent run.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate the next assistant turn.
    ///
    /// `messages` must be non-empty and start with a system entry. `tools` may be empty.
    async fn generate(
        &self,
        messages: &[ChatMessage],
        tools: &[Value],
        config: &ModelConfig,
    ) -> Result<ModelResponse, ModelBackendError>;
}

/// Check the message-sequence precondition shared by every backend.
pub fn validate_messages(messages: &[ChatMessage]) -> Result<(), ModelBackendError> {
    match messages.first() {
        None => Err(ModelBackendError::InvalidRequest(
            "message list is empty".to_string(),
        )),
        Some(first) if first.role != Role::System => Err(ModelBackendError::InvalidRequest(
            format!("first message must be a system entry, got {:?}", first.role),
        )),
        Some(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn assistant_without_calls_serializes_without_tool_calls_key() {
        let msg = ChatMessage::assistant(Some("hi".into()), vec![]);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value, json!({"role": "assistant", "content": "hi"}));
    }

    #[test]
    fn tool_message_references_call_id() {
        let msg = ChatMessage::tool("call_1", "ok");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "tool");
        assert_eq!(value["tool_call_id"], "call_1");
    }

    #[test]
    fn tool_call_defaults_kind_when_missing() {
        let call: ToolCall = serde_json::from_value(json!({
            "id": "c1",
            "function": {"name": "read_file", "arguments": "{}"}
        }))
        .unwrap();
        assert_eq!(call.kind, "function");
        assert_eq!(call.function.name, "read_file");
    }

    #[test]
    fn validate_rejects_empty_and_non_system_start() {
        assert!(matches!(
            validate_messages(&[]),
            Err(ModelBackendError::InvalidRequest(_))
        ));
        assert!(matches!(
            validate_messages(&[ChatMessage::user("hi")]),
            Err(ModelBackendError::InvalidRequest(_))
        ));
        assert!(validate_messages(&[ChatMessage::system("s"), ChatMessage::user("u")]).is_ok());
    }
}
