//! # Tool Agent
//!
//! A tool-calling agent core: the model is given a catalog of tools, asks
//! for calls, and sees their results until it declares the task done.
//!
//! This library provides:
//! - Tool descriptors and a registry that validates and dispatches calls
//! - A model client interface with an OpenAI-compatible implementation
//! - The agent loop with full-history and scratchpad context strategies
//! - Sessions that scope shared resources such as the web browser
//!
//! ## Example
//!
//! ```rust,ignore
//! use tool_agent::{agent::Agent, config::Config, llm::OpenAiCompatClient, tools::ToolRegistry};
//!
//! let config = Config::from_env()?;
//! let client = Arc::new(OpenAiCompatClient::from_config(&config));
//! let mut tools = ToolRegistry::new();
//! tools.register_all(tool_agent::tools::file::descriptors(&config.workspace_path))?;
//! let state = Agent::new(client, tools, config.model.clone())
//!     .run("Write unit tests for utils.py")
//!     .await?;
//! ```

pub mod agent;
pub mod config;
pub mod events;
pub mod llm;
pub mod session;
pub mod tools;

pub use config::Config;
