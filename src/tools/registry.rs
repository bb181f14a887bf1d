//! Tool registry: name lookup, session injection and the dispatch boundary.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use serde_json::{json, Value};
use thiserror::Error;

use super::descriptor::{SchemaFormat, ToolDescriptor, SESSION_ID_PARAM};
use crate::llm::ToolCall;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("duplicate tool: {0}")]
    DuplicateTool(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid tool '{name}': {reason}")]
    InvalidDescriptor { name: String, reason: String },
}

/// Result of dispatching one tool call. Never an `Err`: failures are data.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Success(Value),
    Failure { message: String },
}

impl ToolOutcome {
    pub fn failure(message: impl Into<String>) -> Self {
        ToolOutcome::Failure {
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ToolOutcome::Failure { .. })
    }

    /// JSON form; failures become `{"error": true, "message": ...}`.
    pub fn to_value(&self) -> Value {
        match self {
            ToolOutcome::Success(value) => value.clone(),
            ToolOutcome::Failure { message } => json!({ "error": true, "message": message }),
        }
    }

    /// Text placed in the tool-result message. Plain strings are passed through unquoted.
    pub fn to_content(&self) -> String {
        match self {
            ToolOutcome::Success(Value::String(s)) => s.clone(),
            other => other.to_value().to_string(),
        }
    }
}

/// Named collection of tool descriptors.
///
/// Registration happens before a run starts; during the run the registry is
/// only read.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
    session_id: Option<String>,
    format: SchemaFormat,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a session id that is injected into session-aware tools.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_schema_format(mut self, format: SchemaFormat) -> Self {
        self.format = format;
        self
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn schema_format(&self) -> SchemaFormat {
        self.format
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Registered descriptors in registration order.
    pub fn list_tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// Register one tool. Fails without modifying the registry if the name is taken.
    pub fn register(&mut self, descriptor: ToolDescriptor) -> Result<(), RegistryError> {
        validate(&descriptor)?;
        if self.index.contains_key(descriptor.name()) {
            return Err(RegistryError::DuplicateTool(descriptor.name().to_string()));
        }
        self.index
            .insert(descriptor.name().to_string(), self.tools.len());
        self.tools.push(descriptor);
        Ok(())
    }

    /// Register a batch atomically: either every tool is added or none is.
    pub fn register_all(
        &mut self,
        descriptors: impl IntoIterator<Item = ToolDescriptor>,
    ) -> Result<(), RegistryError> {
        let batch: Vec<ToolDescriptor> = descriptors.into_iter().collect();

        let mut seen = std::collections::HashSet::new();
        for descriptor in &batch {
            validate(descriptor)?;
            if self.index.contains_key(descriptor.name()) || !seen.insert(descriptor.name()) {
                return Err(RegistryError::DuplicateTool(descriptor.name().to_string()));
            }
        }

        for descriptor in batch {
            self.index
                .insert(descriptor.name().to_string(), self.tools.len());
            self.tools.push(descriptor);
        }
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<&ToolDescriptor, RegistryError> {
        self.index
            .get(name)
            .map(|&i| &self.tools[i])
            .ok_or_else(|| RegistryError::UnknownTool(name.to_string()))
    }

    /// Resolve, bind, inject the session and invoke a tool.
    ///
    /// Every failure (unknown name, bad arguments, handler error or panic) is
    /// turned into [`ToolOutcome::Failure`].
    pub async fn dispatch(&self, name: &str, arguments: Value) -> ToolOutcome {
        let descriptor = match self.resolve(name) {
            Ok(d) => d,
            Err(e) => return ToolOutcome::failure(e.to_string()),
        };

        let mut args = match descriptor.bind(arguments) {
            Ok(args) => args,
            Err(reason) => {
                return ToolOutcome::failure(format!("invalid arguments for {}: {}", name, reason))
            }
        };

        if descriptor.takes_session() {
            match &self.session_id {
                Some(id) => args.insert(SESSION_ID_PARAM, Value::String(id.clone())),
                None => {
                    return ToolOutcome::failure(format!(
                        "tool {} needs a session but none is bound",
                        name
                    ))
                }
            }
        }

        match AssertUnwindSafe(descriptor.invoke(args)).catch_unwind().await {
            Ok(Ok(value)) => ToolOutcome::Success(value),
            Ok(Err(e)) => {
                tracing::warn!("Tool {} failed: {:#}", name, e);
                ToolOutcome::failure(format!("{:#}", e))
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "tool panicked".to_string());
                tracing::warn!("Tool {} panicked: {}", name, message);
                ToolOutcome::failure(format!("tool {} panicked: {}", name, message))
            }
        }
    }

    /// Dispatch a model-issued call, parsing its raw argument string first.
    pub async fn dispatch_call(&self, call: &ToolCall) -> ToolOutcome {
        let raw = call.function.arguments.trim();
        let arguments = if raw.is_empty() {
            Value::Null
        } else {
            match serde_json::from_str(raw) {
                Ok(value) => value,
                Err(e) => {
                    return ToolOutcome::failure(format!(
                        "invalid arguments for {}: {}",
                        call.function.name, e
                    ))
                }
            }
        };
        self.dispatch(&call.function.name, arguments).await
    }

    /// Schema array in the registry's configured shape, in registration order.
    pub fn catalog(&self) -> Vec<Value> {
        self.catalog_as(self.format)
    }

    pub fn catalog_as(&self, format: SchemaFormat) -> Vec<Value> {
        self.tools.iter().map(|t| t.schema(format)).collect()
    }

    /// Human-readable catalog for the system prompt, one tool per line.
    pub fn describe(&self) -> String {
        self.tools
            .iter()
            .map(|t| format!("- {}", t))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn validate(descriptor: &ToolDescriptor) -> Result<(), RegistryError> {
    let invalid = |reason: &str| RegistryError::InvalidDescriptor {
        name: descriptor.name().to_string(),
        reason: reason.to_string(),
    };

    if descriptor.name().trim().is_empty() {
        return Err(invalid("name is empty"));
    }
    let mut names = std::collections::HashSet::new();
    for p in descriptor.params() {
        if !names.insert(p.name.as_str()) {
            return Err(invalid(&format!("parameter '{}' declared twice", p.name)));
        }
    }
    Ok(())
}
