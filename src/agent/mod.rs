//! Agent module - the core autonomous agent logic.
//!
//! The agent follows a "tools in a loop" pattern:
//! 1. Seed the conversation with the system prompt and the task
//! 2. Call the model with the tool catalog
//! 3. Dispatch every requested tool call and feed the results back
//! 4. Repeat until the model declares the task finished or the budget runs out
//!
//! How the conversation is kept between rounds is up to the
//! [`ContextStrategy`]: [`FullHistory`] keeps everything, [`ScratchpadPruning`]
//! keeps only the latest round plus the model's own notes.

mod agent_loop;
mod prompt;
mod state;
mod strategy;

pub use agent_loop::{Agent, AgentError};
pub use prompt::{render_system_prompt, FULL_HISTORY_PROMPT, SCRATCHPAD_PROMPT, TOOLS_PLACEHOLDER};
pub use state::{AgentState, RunStatus};
pub use strategy::{
    completion_declared, extract_scratchpad, from_kind, parse_structured, ContextStrategy,
    FullHistory, ScratchpadPruning,
};
