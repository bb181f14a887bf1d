//! State threaded through the agent loop.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::{ChatMessage, Role};

use super::strategy::parse_structured;

/// Where a run stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Finished,
    BudgetExhausted,
}

/// Mutable record of one agent run.
///
/// `messages[0]` is the system prompt and `messages[1]` the task; the loop
/// never rewrites either.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    /// Conversation sent to the model
    pub messages: Vec<ChatMessage>,

    /// Completed rounds
    pub iteration: usize,

    /// Whether the model declared the task finished
    pub finished: bool,

    /// Running summary kept across pruning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scratchpad: Option<String>,

    pub status: RunStatus,
}

impl AgentState {
    /// Seed a run with the system prompt and the task.
    pub fn new(system_prompt: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::system(system_prompt), ChatMessage::user(task)],
            iteration: 0,
            finished: false,
            scratchpad: None,
            status: RunStatus::Running,
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn system_message(&self) -> &ChatMessage {
        &self.messages[0]
    }

    pub fn last_assistant(&self) -> Option<&ChatMessage> {
        self.messages.iter().rev().find(|m| m.role == Role::Assistant)
    }

    /// The model's final word: the `message` field of a structured reply, or
    /// the raw content of the last assistant turn.
    pub fn final_message(&self) -> Option<String> {
        let content = self.last_assistant()?.content.as_deref()?;
        match parse_structured(content) {
            Some(value) => Some(
                value
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| content.to_string()),
            ),
            None => Some(content.to_string()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == RunStatus::Running
    }
}
