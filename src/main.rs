//! Tool Agent - command line entry point.
//!
//! Runs one task to completion against the configured model and prints a
//! JSON summary of the final state.

use std::sync::Arc;

use anyhow::bail;
use serde_json::json;
use tool_agent::{
    agent::{from_kind, Agent},
    config::Config,
    events::LogObserver,
    llm::OpenAiCompatClient,
    session::Session,
    tools::{builtin_descriptors, HttpBrowser, ToolRegistry},
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tool_agent=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let task = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if task.trim().is_empty() {
        bail!("usage: tool-agent <task...>");
    }

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Loaded configuration: provider={}, model={}, strategy={:?}",
        config.model.provider, config.model.model, config.strategy
    );

    let browser = Arc::new(HttpBrowser::new()?);
    let session = Session::new().with_resource(browser.clone());

    let mut tools = ToolRegistry::new()
        .with_session(session.id())
        .with_schema_format(config.schema_format);
    tools.register_all(builtin_descriptors(&config.workspace_path, browser))?;

    let client = Arc::new(OpenAiCompatClient::from_config(&config));
    let mut agent = Agent::new(client, tools, config.model.clone())
        .with_strategy(from_kind(config.strategy))
        .with_max_iterations(config.max_iterations)
        .with_observer(Arc::new(LogObserver));

    if let Some(path) = &config.system_prompt_path {
        let template = tokio::fs::read_to_string(path).await?;
        agent = agent.with_system_prompt(template);
    }

    let state = session.scope(|_| agent.run(&task)).await?;

    let summary = json!({
        "status": state.status,
        "iterations": state.iteration,
        "finished": state.finished,
        "final_message": state.final_message(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
