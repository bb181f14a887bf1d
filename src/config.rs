//! Configuration management for the tool agent.
//!
//! Configuration can be set via environment variables:
//! - `LLM_API_KEY` - Required. Falls back to the provider-specific key
//!   (`GROQ_API_KEY`, `OPENAI_API_KEY`, `GEMINI_API_KEY`).
//! - `LLM_PROVIDER` - Optional. `groq`, `openai` or `gemini`. Defaults to `groq`.
//! - `LLM_BASE_URL` - Optional. Overrides the provider's chat completions endpoint.
//! - `LLM_MODEL` - Optional. Defaults to `llama-3.3-70b-versatile`.
//! - `LLM_TEMPERATURE` - Optional. Sampling temperature in `0.0..=2.0`. Defaults to `0.7`.
//! - `LLM_TOP_P` - Optional. Nucleus sampling in `0.0..=1.0`. Defaults to `1.0`.
//! - `LLM_MAX_TOKENS` - Optional. Maximum output tokens. Defaults to `4096`.
//! - `TOOL_SCHEMA_FORMAT` - Optional. `function` or `flat`. Defaults to `function`.
//! - `AGENT_STRATEGY` - Optional. `full` or `scratchpad`. Defaults to `full`.
//! - `MAX_ITERATIONS` - Optional. Maximum agent loop iterations. Defaults to `100`.
//! - `WORKSPACE_PATH` - Optional. The workspace directory. Defaults to current directory.
//! - `SYSTEM_PROMPT_PATH` - Optional. System prompt template with a `{tools}` placeholder.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tools::SchemaFormat;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Supported model providers. All of them speak the OpenAI chat completions dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Groq,
    OpenAi,
    Gemini,
}

impl Provider {
    /// Default chat completions base URL for this provider.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::Groq => "https://api.groq.com/openai/v1",
            Provider::OpenAi => "https://api.openai.com/v1",
            Provider::Gemini => "https://generativelanguage.googleapis.com/v1beta/openai",
        }
    }

    /// Provider-specific API key variable used when `LLM_API_KEY` is unset.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            Provider::Groq => "GROQ_API_KEY",
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Gemini => "GEMINI_API_KEY",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Provider::Groq => "groq",
            Provider::OpenAi => "openai",
            Provider::Gemini => "gemini",
        };
        f.write_str(s)
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "groq" => Ok(Provider::Groq),
            "openai" => Ok(Provider::OpenAi),
            "gemini" => Ok(Provider::Gemini),
            other => Err(format!("unknown provider: {}", other)),
        }
    }
}

/// Which context strategy the agent loop uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Keep every message for the whole run.
    #[default]
    FullHistory,
    /// Collapse history to a scratchpad plus the latest tool round.
    Scratchpad,
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "full" | "full_history" => Ok(StrategyKind::FullHistory),
            "scratchpad" => Ok(StrategyKind::Scratchpad),
            other => Err(format!("unknown strategy: {}", other)),
        }
    }
}

/// Per-request generation settings passed to the model client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider tag
    pub provider: Provider,

    /// Model identifier understood by the provider
    pub model: String,

    /// Sampling temperature
    pub temperature: f32,

    /// Nucleus sampling probability
    pub top_p: f32,

    /// Maximum number of tokens to generate
    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Groq,
            model: "llama-3.3-70b-versatile".to_string(),
            temperature: 0.7,
            top_p: 1.0,
            max_tokens: 4096,
        }
    }
}

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// API key for the model provider
    pub api_key: String,

    /// Optional override of the provider's base URL
    pub base_url: Option<String>,

    /// Generation settings
    pub model: ModelConfig,

    /// Shape of the tool catalog sent to the model
    pub schema_format: SchemaFormat,

    /// Context strategy for the loop
    pub strategy: StrategyKind,

    /// Maximum iterations for the agent loop
    pub max_iterations: usize,

    /// Workspace directory for file operations
    pub workspace_path: PathBuf,

    /// Optional system prompt template file
    pub system_prompt_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if no API key is set and
    /// `ConfigError::InvalidValue` for values that fail to parse or are out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        let provider: Provider = parse_env("LLM_PROVIDER", Provider::Groq)?;

        let api_key = std::env::var("LLM_API_KEY")
            .or_else(|_| std::env::var(provider.api_key_env()))
            .map_err(|_| ConfigError::MissingEnvVar("LLM_API_KEY".to_string()))?;

        let base_url = std::env::var("LLM_BASE_URL").ok();

        let defaults = ModelConfig::default();
        let model = ModelConfig {
            provider,
            model: std::env::var("LLM_MODEL").unwrap_or(defaults.model),
            temperature: parse_env("LLM_TEMPERATURE", defaults.temperature)?,
            top_p: parse_env("LLM_TOP_P", defaults.top_p)?,
            max_tokens: parse_env("LLM_MAX_TOKENS", defaults.max_tokens)?,
        };

        if !(0.0..=2.0).contains(&model.temperature) {
            return Err(ConfigError::InvalidValue(
                "LLM_TEMPERATURE".to_string(),
                format!("{} is outside 0.0..=2.0", model.temperature),
            ));
        }
        if !(0.0..=1.0).contains(&model.top_p) {
            return Err(ConfigError::InvalidValue(
                "LLM_TOP_P".to_string(),
                format!("{} is outside 0.0..=1.0", model.top_p),
            ));
        }

        let schema_format = parse_env("TOOL_SCHEMA_FORMAT", SchemaFormat::Function)?;
        let strategy = parse_env("AGENT_STRATEGY", StrategyKind::FullHistory)?;
        let max_iterations = parse_env("MAX_ITERATIONS", 100usize)?;

        let workspace_path = std::env::var("WORKSPACE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        let system_prompt_path = std::env::var("SYSTEM_PROMPT_PATH").ok().map(PathBuf::from);

        Ok(Self {
            api_key,
            base_url,
            model,
            schema_format,
            strategy,
            max_iterations,
            workspace_path,
            system_prompt_path,
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(api_key: String, model: String, workspace_path: PathBuf) -> Self {
        Self {
            api_key,
            base_url: None,
            model: ModelConfig {
                model,
                ..ModelConfig::default()
            },
            schema_format: SchemaFormat::Function,
            strategy: StrategyKind::FullHistory,
            max_iterations: 100,
            workspace_path,
            system_prompt_path: None,
        }
    }

    /// Base URL of the chat completions endpoint, honoring the override.
    pub fn resolved_base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| self.model.provider.default_base_url().to_string())
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(key.to_string(), format!("{}", e))),
        Err(_) => Ok(default),
    }
}
