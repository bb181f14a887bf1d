//! Execution events and observers.
//!
//! Observers see what the loop does and cannot change it: they receive
//! shared references and return nothing.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Events emitted by the agent loop.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// About to call the model.
    ModelRequest {
        iteration: usize,
        messages: usize,
        tools: usize,
    },
    /// Model replied.
    ModelResponse {
        iteration: usize,
        content: Option<String>,
        tool_calls: usize,
    },
    /// About to dispatch a tool call.
    ToolCall {
        id: String,
        name: String,
        args: String,
    },
    /// Tool dispatch completed.
    ToolResult {
        id: String,
        name: String,
        result: Value,
        is_error: bool,
    },
    /// The model declared the task finished.
    RunFinished { iterations: usize },
    /// The iteration budget ran out.
    BudgetExhausted { iterations: usize },
    /// The run failed.
    Error { message: String },
}

/// Side-effect-only observer of execution events.
pub trait ExecutionObserver: Send + Sync {
    fn observe(&self, _event: &ExecutionEvent) {}
}

/// Ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl ExecutionObserver for NullObserver {}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl ExecutionObserver for LogObserver {
    fn observe(&self, event: &ExecutionEvent) {
        match event {
            ExecutionEvent::ModelRequest {
                iteration,
                messages,
                tools,
            } => tracing::debug!(iteration, messages, tools, "Calling model"),
            ExecutionEvent::ModelResponse {
                iteration,
                tool_calls,
                ..
            } => tracing::debug!(iteration, tool_calls, "Model responded"),
            ExecutionEvent::ToolCall { id, name, args } => {
                tracing::info!(%id, "Calling tool: {} with args: {}", name, args)
            }
            ExecutionEvent::ToolResult {
                id, name, is_error, ..
            } => tracing::debug!(%id, is_error, "Tool {} returned", name),
            ExecutionEvent::RunFinished { iterations } => {
                tracing::info!(iterations, "Agent finished")
            }
            ExecutionEvent::BudgetExhausted { iterations } => {
                tracing::warn!(iterations, "Iteration budget exhausted")
            }
            ExecutionEvent::Error { message } => tracing::error!("Agent run failed: {}", message),
        }
    }
}

/// A recorded event with its timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: ExecutionEvent,
}

/// Keeps every event in memory, for tests and run logs.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    records: Mutex<Vec<EventRecord>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<EventRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.records().into_iter().map(|r| r.event).collect()
    }
}

impl ExecutionObserver for RecordingObserver {
    fn observe(&self, event: &ExecutionEvent) {
        let record = EventRecord {
            timestamp: Utc::now(),
            event: event.clone(),
        };
        match self.records.lock() {
            Ok(mut records) => records.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
    }
}
