//! Context strategies: how the conversation is kept bounded between rounds,
//! and when a reply counts as the end of the run.

use serde_json::Value;

use crate::config::StrategyKind;
use crate::llm::{ChatMessage, ModelResponse, Role};

use super::prompt::{FULL_HISTORY_PROMPT, SCRATCHPAD_PROMPT};
use super::state::AgentState;

/// Per-strategy hooks called by the loop.
pub trait ContextStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// System prompt template used when none is configured.
    fn default_prompt(&self) -> &'static str;

    /// Called before every round except the first.
    fn compact(&self, _state: &mut AgentState) {}

    /// Called after the round's assistant turn and tool results were appended.
    fn record_round(&self, _state: &mut AgentState, _response: &ModelResponse) {}

    /// Stop condition, evaluated on the latest reply.
    fn is_finished(&self, response: &ModelResponse) -> bool {
        completion_declared(response)
    }
}

/// Keeps every message. The conversation only grows.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullHistory;

impl ContextStrategy for FullHistory {
    fn name(&self) -> &'static str {
        "full_history"
    }

    fn default_prompt(&self) -> &'static str {
        FULL_HISTORY_PROMPT
    }
}

/// Collapses the conversation each round to system, task, one synthesized
/// assistant turn holding the scratchpad and the latest tool calls, and the
/// results of those calls. Older rounds are dropped for good.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScratchpadPruning;

impl ContextStrategy for ScratchpadPruning {
    fn name(&self) -> &'static str {
        "scratchpad"
    }

    fn default_prompt(&self) -> &'static str {
        SCRATCHPAD_PROMPT
    }

    fn compact(&self, state: &mut AgentState) {
        if state.messages.len() <= 2 {
            return;
        }

        let mut rest = state.messages.split_off(2);
        let Some(last) = rest.iter().rposition(|m| m.role == Role::Assistant) else {
            // Nothing to anchor tool results to; keep only system and task.
            return;
        };

        let results: Vec<ChatMessage> = rest
            .split_off(last + 1)
            .into_iter()
            .filter(|m| m.role == Role::Tool)
            .collect();
        let latest = rest.swap_remove(last);

        let content = state.scratchpad.clone().or(latest.content);
        let calls = latest.tool_calls.unwrap_or_default();

        let dropped = rest.len();
        state.push(ChatMessage::assistant(content, calls));
        state.messages.extend(results);

        tracing::debug!(
            dropped,
            kept = state.messages.len(),
            "Compacted conversation to scratchpad"
        );
    }

    fn record_round(&self, state: &mut AgentState, response: &ModelResponse) {
        if let Some(content) = response.content.as_deref() {
            if let Some(scratchpad) = extract_scratchpad(content) {
                state.scratchpad = Some(scratchpad);
            }
        }
    }
}

/// Strategy for a configured kind.
pub fn from_kind(kind: StrategyKind) -> Box<dyn ContextStrategy> {
    match kind {
        StrategyKind::FullHistory => Box::new(FullHistory),
        StrategyKind::Scratchpad => Box::new(ScratchpadPruning),
    }
}

/// Parse assistant content as JSON, tolerating one surrounding Markdown fence.
pub fn parse_structured(content: &str) -> Option<Value> {
    let trimmed = content.trim();
    let body = match trimmed.strip_prefix("```") {
        Some(fenced) => {
            let after_lang = fenced.split_once('\n').map(|(_, rest)| rest).unwrap_or("");
            after_lang.trim_end().strip_suffix("```").unwrap_or(after_lang)
        }
        None => trimmed,
    };
    serde_json::from_str(body.trim()).ok()
}

/// Whether the reply ends the run.
///
/// Structured replies end it only with `"finished": true`. Unstructured
/// replies end it when they request no tools and mention both "finished"
/// and "message". The keyword check is plain substring matching, so prose
/// like "not finished yet, the error message says..." also ends the run;
/// prompts should ask for the JSON form.
pub fn completion_declared(response: &ModelResponse) -> bool {
    let Some(content) = response.content.as_deref() else {
        return false;
    };
    match parse_structured(content) {
        Some(value) => value.get("finished").and_then(Value::as_bool) == Some(true),
        None => {
            if response.has_tool_calls() {
                return false;
            }
            let lower = content.to_lowercase();
            let looks_final = lower.contains("finished") && lower.contains("message");
            if !looks_final && !content.trim().is_empty() {
                tracing::debug!("Reply is not structured output; continuing");
            }
            looks_final
        }
    }
}

/// Scratchpad text of a reply: the `scratchpad` field when present, else the
/// whole (non-empty) content.
pub fn extract_scratchpad(content: &str) -> Option<String> {
    if content.trim().is_empty() {
        return None;
    }
    let from_json = parse_structured(content).and_then(|v| {
        v.get("scratchpad").map(|s| match s {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        })
    });
    Some(from_json.unwrap_or_else(|| content.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolCall;

    #[test]
    fn parses_plain_and_fenced_json() {
        assert_eq!(parse_structured(r#"{"finished": true}"#).unwrap()["finished"], true);
        let fenced = "```json\n{\"finished\": false, \"message\": \"wip\"}\n```";
        assert_eq!(parse_structured(fenced).unwrap()["message"], "wip");
        let bare_fence = "```\n[1, 2]\n```";
        assert_eq!(parse_structured(bare_fence).unwrap(), serde_json::json!([1, 2]));
        assert!(parse_structured("I am done").is_none());
    }

    #[test]
    fn structured_finished_flag_decides() {
        assert!(completion_declared(&ModelResponse::text(
            r#"{"finished": true, "message": "done"}"#
        )));
        assert!(!completion_declared(&ModelResponse::text(
            r#"{"finished": false, "message": "still going"}"#
        )));
        assert!(!completion_declared(&ModelResponse::text(r#"{"finished": "yes"}"#)));
    }

    #[test]
    fn unstructured_reply_needs_both_keywords_and_no_tools() {
        assert!(completion_declared(&ModelResponse::text(
            "Finished. Message: all 12 tests pass"
        )));
        assert!(!completion_declared(&ModelResponse::text("Let me look at the file")));
        assert!(!completion_declared(&ModelResponse::default()));

        let with_tools = ModelResponse {
            content: Some("finished writing, message follows".into()),
            tool_calls: vec![ToolCall::new("c1", "read_file", "{}")],
        };
        assert!(!completion_declared(&with_tools));
    }

    #[test]
    fn keyword_fallback_accepts_negated_prose() {
        let reply = ModelResponse::text(
            "I have not finished yet; the error message says test_a.py is missing. Let me retry.",
        );
        assert!(completion_declared(&reply));

        let structured = ModelResponse::text(
            r#"{"finished": false, "message": "not finished, error message pending"}"#,
        );
        assert!(!completion_declared(&structured));
    }

    #[test]
    fn scratchpad_field_is_preferred() {
        assert_eq!(
            extract_scratchpad(r#"{"scratchpad": "read a.py; 3 funcs", "finished": false}"#)
                .as_deref(),
            Some("read a.py; 3 funcs")
        );
        assert_eq!(extract_scratchpad(" notes ").as_deref(), Some("notes"));
        assert_eq!(extract_scratchpad("   "), None);
    }

    fn round(state: &mut AgentState, n: usize, calls: usize) {
        let tool_calls: Vec<ToolCall> = (0..calls)
            .map(|i| ToolCall::new(format!("r{}c{}", n, i), "t", "{}"))
            .collect();
        let content = format!(r#"{{"scratchpad": "after round {}"}}"#, n);
        state.push(ChatMessage::assistant(Some(content.clone()), tool_calls.clone()));
        for call in &tool_calls {
            state.push(ChatMessage::tool(&call.id, "ok"));
        }
        ScratchpadPruning.record_round(state, &ModelResponse::text(content));
    }

    #[test]
    fn compaction_keeps_system_task_scratchpad_and_latest_results() {
        let mut state = AgentState::new("sys", "task");
        round(&mut state, 1, 2);
        ScratchpadPruning.compact(&mut state);
        round(&mut state, 2, 3);
        ScratchpadPruning.compact(&mut state);

        assert_eq!(state.messages.len(), 3 + 3);
        assert_eq!(state.messages[0].content.as_deref(), Some("sys"));
        assert_eq!(state.messages[1].content.as_deref(), Some("task"));

        let synthesized = &state.messages[2];
        assert_eq!(synthesized.role, Role::Assistant);
        assert_eq!(synthesized.content.as_deref(), Some("after round 2"));
        assert_eq!(synthesized.calls().len(), 3);

        for (msg, call) in state.messages[3..].iter().zip(synthesized.calls()) {
            assert_eq!(msg.role, Role::Tool);
            assert_eq!(msg.tool_call_id.as_deref(), Some(call.id.as_str()));
        }
    }

    #[test]
    fn compaction_is_noop_for_fresh_state() {
        let mut state = AgentState::new("sys", "task");
        ScratchpadPruning.compact(&mut state);
        assert_eq!(state.messages.len(), 2);

        FullHistory.compact(&mut state);
        assert_eq!(state.messages.len(), 2);
    }
}
