//! OpenAI-compatible chat completions backend.
//!
//! Groq, OpenAI and Gemini all expose this dialect, so one client covers the
//! three provider tags. The provider only decides the default base URL.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{validate_messages, ChatMessage, LlmClient, ModelBackendError, ModelResponse, ToolCall};
use crate::config::{Config, ModelConfig};

/// An [`LlmClient`] that talks to any OpenAI-compatible endpoint.
pub struct OpenAiCompatClient {
    api_key: String,
    base_url: String,
    client: Client,
}

impl OpenAiCompatClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    /// Build a client from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.api_key.clone(), config.resolved_base_url())
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        tools: &[Value],
        config: &ModelConfig,
    ) -> Result<ModelResponse, ModelBackendError> {
        validate_messages(messages)?;

        let body = build_request_body(messages, tools, config);
        tracing::debug!(
            model = %config.model,
            provider = %config.provider,
            messages = messages.len(),
            tools = tools.len(),
            "Sending chat completion request"
        );

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            if status.as_u16() == 400 {
                if let Some(message) = tool_use_failure(&text) {
                    tracing::warn!("Model produced an invalid tool call: {}", message);
                    return Ok(ModelResponse::text(format!(
                        "System Error: The model failed to generate a valid tool call. Raw Error: {}",
                        message
                    )));
                }
            }
            return Err(ModelBackendError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        parse_completion(&text)
    }
}

/// Assemble the JSON request body. `tools` is omitted when the catalog is empty.
fn build_request_body(messages: &[ChatMessage], tools: &[Value], config: &ModelConfig) -> Value {
    let mut body = json!({
        "model": config.model,
        "messages": messages,
        "temperature": config.temperature,
        "top_p": config.top_p,
        "max_tokens": config.max_tokens,
    });
    if !tools.is_empty() {
        body["tools"] = Value::Array(tools.to_vec());
    }
    body
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

/// Decode the first choice of a chat completion.
fn parse_completion(text: &str) -> Result<ModelResponse, ModelBackendError> {
    let parsed: CompletionResponse =
        serde_json::from_str(text).map_err(|e| ModelBackendError::Decode(e.to_string()))?;

    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or(ModelBackendError::EmptyResponse)?;

    Ok(ModelResponse {
        content: choice.message.content,
        tool_calls: choice.message.tool_calls.unwrap_or_default(),
    })
}

/// Groq reports malformed tool calls as a 400 with code `tool_use_failed`.
/// Those are turned into an assistant message so the model can react.
fn tool_use_failure(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let error = value.get("error")?;
    if error.get("code").and_then(Value::as_str) != Some("tool_use_failed") {
        return None;
    }
    Some(
        error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string(),
    )
}
