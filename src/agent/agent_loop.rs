//! Core agent loop implementation.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::config::ModelConfig;
use crate::events::{ExecutionEvent, ExecutionObserver, NullObserver};
use crate::llm::{ChatMessage, LlmClient, ModelBackendError};
use crate::session::SessionError;
use crate::tools::ToolRegistry;

use super::prompt::render_system_prompt;
use super::state::{AgentState, RunStatus};
use super::strategy::{ContextStrategy, FullHistory};

const DEFAULT_MAX_ITERATIONS: usize = 100;

/// Failures that end a run. Tool failures never show up here.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("model backend failed in iteration {iteration}: {source}")]
    Backend {
        iteration: usize,
        #[source]
        source: ModelBackendError,
    },

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// The autonomous agent.
///
/// Each round calls the model once, dispatches the requested tools one after
/// another, and appends everything to the state. The run ends when the
/// strategy sees a finished reply or the iteration budget is spent.
pub struct Agent {
    llm: Arc<dyn LlmClient>,
    tools: ToolRegistry,
    model: ModelConfig,
    strategy: Box<dyn ContextStrategy>,
    max_iterations: usize,
    system_template: Option<String>,
    observer: Arc<dyn ExecutionObserver>,
}

impl Agent {
    /// Create an agent with the full-history strategy and default budget.
    pub fn new(llm: Arc<dyn LlmClient>, tools: ToolRegistry, model: ModelConfig) -> Self {
        Self {
            llm,
            tools,
            model,
            strategy: Box::new(FullHistory),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            system_template: None,
            observer: Arc::new(NullObserver),
        }
    }

    pub fn with_strategy(mut self, strategy: Box<dyn ContextStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Override the system prompt template. `{tools}` is replaced with the catalog.
    pub fn with_system_prompt(mut self, template: impl Into<String>) -> Self {
        self.system_template = Some(template.into());
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// The rendered system prompt for a new run.
    pub fn system_prompt(&self) -> String {
        let template = self
            .system_template
            .as_deref()
            .unwrap_or_else(|| self.strategy.default_prompt());
        render_system_prompt(template, &self.tools)
    }

    /// Initial state for `task`.
    pub fn seed(&self, task: &str) -> AgentState {
        AgentState::new(self.system_prompt(), task)
    }

    /// Run a task to a terminal state.
    ///
    /// Returns the final state whether the model finished or the budget ran
    /// out; check [`AgentState::finished`] to tell them apart. Model backend
    /// failures are returned as errors.
    pub async fn run(&self, task: &str) -> Result<AgentState, AgentError> {
        let mut state = self.seed(task);
        self.run_state(&mut state).await?;
        Ok(state)
    }

    /// Drive an already seeded state until it stops running.
    pub async fn run_state(&self, state: &mut AgentState) -> Result<(), AgentError> {
        let catalog = self.tools.catalog();

        tracing::info!(
            strategy = self.strategy.name(),
            tools = self.tools.len(),
            max_iterations = self.max_iterations,
            "Starting agent run"
        );

        self.check_budget(state);
        while state.is_running() {
            self.run_round(state, &catalog).await?;
        }
        Ok(())
    }

    /// One generate-dispatch-update round.
    async fn run_round(&self, state: &mut AgentState, catalog: &[Value]) -> Result<(), AgentError> {
        if state.iteration > 0 {
            self.strategy.compact(state);
        }

        let iteration = state.iteration + 1;
        tracing::debug!("Agent iteration {}", iteration);

        self.observer.observe(&ExecutionEvent::ModelRequest {
            iteration,
            messages: state.messages.len(),
            tools: catalog.len(),
        });

        let response = match self.llm.generate(&state.messages, catalog, &self.model).await {
            Ok(response) => response,
            Err(source) => {
                self.observer.observe(&ExecutionEvent::Error {
                    message: source.to_string(),
                });
                return Err(AgentError::Backend { iteration, source });
            }
        };

        self.observer.observe(&ExecutionEvent::ModelResponse {
            iteration,
            content: response.content.clone(),
            tool_calls: response.tool_calls.len(),
        });

        state.push(ChatMessage::assistant(
            response.content.clone(),
            response.tool_calls.clone(),
        ));

        for call in &response.tool_calls {
            self.observer.observe(&ExecutionEvent::ToolCall {
                id: call.id.clone(),
                name: call.function.name.clone(),
                args: call.function.arguments.clone(),
            });

            let outcome = self.tools.dispatch_call(call).await;

            self.observer.observe(&ExecutionEvent::ToolResult {
                id: call.id.clone(),
                name: call.function.name.clone(),
                result: outcome.to_value(),
                is_error: outcome.is_error(),
            });

            state.push(ChatMessage::tool(&call.id, outcome.to_content()));
        }

        self.strategy.record_round(state, &response);
        state.iteration += 1;

        if self.strategy.is_finished(&response) {
            state.finished = true;
            state.status = RunStatus::Finished;
            self.observer.observe(&ExecutionEvent::RunFinished {
                iterations: state.iteration,
            });
        } else {
            self.check_budget(state);
        }
        Ok(())
    }

    fn check_budget(&self, state: &mut AgentState) {
        if state.is_running() && state.iteration >= self.max_iterations {
            state.status = RunStatus::BudgetExhausted;
            self.observer.observe(&ExecutionEvent::BudgetExhausted {
                iterations: state.iteration,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use crate::agent::strategy::ScratchpadPruning;
    use crate::events::RecordingObserver;
    use crate::llm::{ModelResponse, Role, ToolCall};
    use crate::tools::{from_fn, ParamSpec, ToolDescriptor, ValueType};

    /// Replays scripted responses and records every conversation it is sent.
    struct ScriptedClient {
        script: Mutex<VecDeque<Result<ModelResponse, ModelBackendError>>>,
        fallback: ModelResponse,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedClient {
        fn new(script: Vec<Result<ModelResponse, ModelBackendError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                fallback: ModelResponse::text("still working"),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn repeating(response: ModelResponse) -> Self {
            Self {
                script: Mutex::new(VecDeque::new()),
                fallback: response,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }

        fn seen(&self) -> Vec<Vec<ChatMessage>> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        async fn generate(
            &self,
            messages: &[ChatMessage],
            _tools: &[Value],
            _config: &ModelConfig,
        ) -> Result<ModelResponse, ModelBackendError> {
            crate::llm::validate_messages(messages)?;
            self.seen.lock().unwrap().push(messages.to_vec());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(self.fallback.clone()))
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry
            .register_all(vec![
                ToolDescriptor::new(
                    "read_file",
                    "Read a file.",
                    from_fn(|args| Ok(json!({"success": true, "result": format!("contents of {}", args.str("file_path")?)}))),
                )
                .param(ParamSpec::required("file_path", ValueType::Str))
                .returns(ValueType::Dict),
                ToolDescriptor::new(
                    "explode",
                    "Always fails.",
                    from_fn(|_| Err(anyhow::anyhow!("tool crashed"))),
                ),
            ])
            .unwrap();
        registry
    }

    fn calls(round: usize, n: usize) -> Vec<ToolCall> {
        (0..n)
            .map(|i| {
                ToolCall::new(
                    format!("call_{}_{}", round, i),
                    "read_file",
                    format!(r#"{{"file_path": "f{}.py"}}"#, i),
                )
            })
            .collect()
    }

    fn with_calls(content: &str, tool_calls: Vec<ToolCall>) -> ModelResponse {
        ModelResponse {
            content: Some(content.to_string()),
            tool_calls,
        }
    }

    fn agent(client: Arc<ScriptedClient>) -> Agent {
        Agent::new(client, registry(), ModelConfig::default())
    }

    #[tokio::test]
    async fn stops_after_one_round_on_finished() {
        let client = Arc::new(ScriptedClient::new(vec![Ok(ModelResponse::text(
            r#"{"finished": true, "message": "done"}"#,
        ))]));
        let state = agent(client.clone()).run("write tests").await.unwrap();

        assert!(state.finished);
        assert_eq!(state.status, RunStatus::Finished);
        assert_eq!(state.iteration, 1);
        assert_eq!(client.calls(), 1);
        assert_eq!(state.final_message().as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_and_loop_continues() {
        let client = Arc::new(ScriptedClient::new(vec![
            Ok(with_calls("", vec![ToolCall::new("c1", "nonexistent_tool", "{}")])),
            Ok(ModelResponse::text(r#"{"finished": true, "message": "ok"}"#)),
        ]));
        let state = agent(client.clone()).run("task").await.unwrap();

        assert_eq!(client.calls(), 2);
        assert_eq!(state.iteration, 2);
        assert!(state.finished);

        let tool_msg = &state.messages[3];
        assert_eq!(tool_msg.role, Role::Tool);
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("c1"));
        let payload: Value = serde_json::from_str(tool_msg.content.as_deref().unwrap()).unwrap();
        assert_eq!(
            payload,
            json!({"error": true, "message": "unknown tool: nonexistent_tool"})
        );

        // The second request carried the error back to the model.
        assert_eq!(client.seen()[1].len(), 4);
    }

    #[tokio::test]
    async fn failing_tool_adds_exactly_one_result() {
        let client = Arc::new(ScriptedClient::new(vec![Ok(with_calls(
            "trying",
            vec![ToolCall::new("x1", "explode", "")],
        ))]));
        let state = agent(client)
            .with_max_iterations(1)
            .run("task")
            .await
            .unwrap();

        assert_eq!(state.messages.len(), 4);
        let content = state.messages[3].content.as_deref().unwrap();
        assert!(content.contains("tool crashed"));
        assert_eq!(state.status, RunStatus::BudgetExhausted);
    }

    #[tokio::test]
    async fn exhausts_budget_without_completion() {
        let client = Arc::new(ScriptedClient::repeating(ModelResponse::text("thinking...")));
        let state = agent(client.clone())
            .with_max_iterations(3)
            .run("task")
            .await
            .unwrap();

        assert_eq!(client.calls(), 3);
        assert_eq!(state.iteration, 3);
        assert!(!state.finished);
        assert_eq!(state.status, RunStatus::BudgetExhausted);
    }

    #[tokio::test]
    async fn zero_budget_never_calls_model() {
        let client = Arc::new(ScriptedClient::repeating(ModelResponse::text("x")));
        let state = agent(client.clone())
            .with_max_iterations(0)
            .run("task")
            .await
            .unwrap();
        assert_eq!(client.calls(), 0);
        assert_eq!(state.status, RunStatus::BudgetExhausted);
    }

    #[tokio::test]
    async fn backend_error_propagates() {
        let client = Arc::new(ScriptedClient::new(vec![
            Ok(with_calls("", calls(1, 1))),
            Err(ModelBackendError::Status {
                status: 503,
                body: "overloaded".into(),
            }),
        ]));
        let observer = Arc::new(RecordingObserver::new());
        let err = agent(client)
            .with_observer(observer.clone())
            .run("task")
            .await
            .unwrap_err();

        match err {
            AgentError::Backend { iteration, source } => {
                assert_eq!(iteration, 2);
                assert!(matches!(source, ModelBackendError::Status { status: 503, .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(
            observer.events().last(),
            Some(ExecutionEvent::Error { .. })
        ));
    }

    #[tokio::test]
    async fn full_history_grows_and_keeps_system_message() {
        let client = Arc::new(ScriptedClient::new(vec![
            Ok(with_calls("", calls(1, 2))),
            Ok(with_calls("", calls(2, 1))),
            Ok(ModelResponse::text("no tools this time")),
        ]));
        let agent = agent(client.clone()).with_max_iterations(3);
        let system = agent.system_prompt();
        let state = agent.run("task").await.unwrap();

        let lengths: Vec<usize> = client.seen().iter().map(Vec::len).collect();
        assert_eq!(lengths, vec![2, 5, 7]);
        for conversation in client.seen() {
            assert_eq!(conversation[0], ChatMessage::system(system.clone()));
        }
        assert_eq!(state.messages.len(), 8);
        assert_eq!(state.status, RunStatus::BudgetExhausted);
    }

    #[tokio::test]
    async fn scratchpad_context_stays_bounded() {
        let rounds = 8;
        let script = (1..=rounds)
            .map(|r| {
                Ok(with_calls(
                    &format!(r#"{{"scratchpad": "notes {}", "finished": false}}"#, r),
                    calls(r, 2),
                ))
            })
            .collect();
        let client = Arc::new(ScriptedClient::new(script));
        let agent = agent(client.clone())
            .with_strategy(Box::new(ScratchpadPruning))
            .with_max_iterations(rounds);
        let system = agent.system_prompt();
        let state = agent.run("task").await.unwrap();

        let seen = client.seen();
        assert_eq!(seen.len(), rounds);
        for (k, conversation) in seen.iter().enumerate().skip(1) {
            // system + task + synthesized assistant + two results of the previous round
            assert_eq!(conversation.len(), 5, "round {}", k + 1);
            assert_eq!(conversation[0], ChatMessage::system(system.clone()));
            assert_eq!(conversation[1], ChatMessage::user("task"));
            assert_eq!(conversation[2].content.as_deref(), Some(format!("notes {}", k).as_str()));
            assert_eq!(conversation[3].tool_call_id.as_deref(), Some(format!("call_{}_0", k).as_str()));
        }
        assert_eq!(state.scratchpad.as_deref(), Some("notes 8"));
        assert_eq!(state.status, RunStatus::BudgetExhausted);
    }

    #[tokio::test]
    async fn scratchpad_stops_on_finished_reply() {
        let client = Arc::new(ScriptedClient::new(vec![
            Ok(with_calls(r#"{"scratchpad": "reading", "finished": false}"#, calls(1, 1))),
            Ok(ModelResponse::text(
                "```json\n{\"scratchpad\": \"done\", \"finished\": true, \"message\": \"3 tests pass\"}\n```",
            )),
        ]));
        let state = agent(client.clone())
            .with_strategy(Box::new(ScratchpadPruning))
            .run("task")
            .await
            .unwrap();

        assert!(state.finished);
        assert_eq!(state.iteration, 2);
        assert_eq!(client.calls(), 2);
        assert_eq!(state.final_message().as_deref(), Some("3 tests pass"));
    }

    #[tokio::test]
    async fn observer_sees_every_step_in_order() {
        let client = Arc::new(ScriptedClient::new(vec![
            Ok(with_calls("", calls(1, 1))),
            Ok(ModelResponse::text(r#"{"finished": true, "message": "m"}"#)),
        ]));
        let observer = Arc::new(RecordingObserver::new());
        agent(client)
            .with_observer(observer.clone())
            .run("task")
            .await
            .unwrap();

        let kinds: Vec<&str> = observer
            .events()
            .iter()
            .map(|e| match e {
                ExecutionEvent::ModelRequest { .. } => "request",
                ExecutionEvent::ModelResponse { .. } => "response",
                ExecutionEvent::ToolCall { .. } => "tool_call",
                ExecutionEvent::ToolResult { .. } => "tool_result",
                ExecutionEvent::RunFinished { .. } => "finished",
                ExecutionEvent::BudgetExhausted { .. } => "budget",
                ExecutionEvent::Error { .. } => "error",
            })
            .collect();
        assert_eq!(
            kinds,
            vec!["request", "response", "tool_call", "tool_result", "request", "response", "finished"]
        );
    }

    #[tokio::test]
    async fn custom_prompt_template_is_rendered() {
        let client = Arc::new(ScriptedClient::new(vec![Ok(ModelResponse::text(
            r#"{"finished": true, "message": "m"}"#,
        ))]));
        let agent = agent(client.clone()).with_system_prompt("QA agent. Tools:\n{tools}");
        agent.run("task").await.unwrap();

        let system = client.seen()[0][0].content.clone().unwrap();
        assert!(system.starts_with("QA agent. Tools:\n- read_file(file_path: str) -> dict"));
    }
}
