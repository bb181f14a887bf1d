//! Code execution tools: run a Python file or a pytest suite.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;

use super::descriptor::{ParamSpec, ToolArgs, ToolDescriptor, ToolHandler, ValueType};
use super::file::resolve_path;

const DEFAULT_INTERPRETER: &str = "python3";
const DEFAULT_TIMEOUT_SECS: u64 = 120;
const MAX_OUTPUT_LEN: usize = 10000;

/// Interpreter and timeout shared by the code tools.
#[derive(Debug, Clone)]
pub struct CodeRunner {
    workspace: PathBuf,
    interpreter: String,
    timeout: Duration,
}

impl CodeRunner {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            interpreter: DEFAULT_INTERPRETER.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run the interpreter with `args` in the workspace and capture both streams.
    async fn run(&self, args: &[&str]) -> anyhow::Result<String> {
        tracing::info!("Executing: {} {}", self.interpreter, args.join(" "));

        let output = tokio::time::timeout(
            self.timeout,
            Command::new(&self.interpreter)
                .args(args)
                .current_dir(&self.workspace)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Command timed out after {} seconds", self.timeout.as_secs()))?
        .map_err(|e| anyhow::anyhow!("Failed to execute {}: {}", self.interpreter, e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        let mut result = format!("Stdout:\n{}\nStderr:\n{}", stdout, stderr)
            .trim()
            .to_string();
        if result.len() > MAX_OUTPUT_LEN {
            let mut cut = MAX_OUTPUT_LEN;
            while !result.is_char_boundary(cut) {
                cut -= 1;
            }
            result.truncate(cut);
            result.push_str("\n... [output truncated]");
        }
        Ok(result)
    }
}

/// Run a Python file.
pub struct RunPythonFile {
    runner: CodeRunner,
}

#[async_trait]
impl ToolHandler for RunPythonFile {
    async fn call(&self, args: ToolArgs) -> anyhow::Result<Value> {
        let file_path = args.str("file_path")?;
        let full = resolve_path(&self.runner.workspace, file_path);

        if !full.is_file() {
            return Ok(json!({ "success": false, "error": format!("File not found: {}", file_path) }));
        }

        let full = full.to_string_lossy().to_string();
        let output = self.runner.run(&[&full]).await?;
        Ok(json!({ "success": true, "result": output }))
    }
}

/// Run pytest in a directory.
pub struct RunPytestTests {
    runner: CodeRunner,
}

#[async_trait]
impl ToolHandler for RunPytestTests {
    async fn call(&self, args: ToolArgs) -> anyhow::Result<Value> {
        let directory = args.str_or("directory", ".");
        let full = resolve_path(&self.runner.workspace, directory);

        if !full.is_dir() {
            return Ok(json!({ "success": false, "error": format!("Directory not found: {}", directory) }));
        }

        let full = full.to_string_lossy().to_string();
        let output = self.runner.run(&["-m", "pytest", &full]).await?;
        Ok(json!({ "success": true, "result": output }))
    }
}

/// Descriptors for the code tools.
pub fn descriptors(runner: CodeRunner) -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor::new(
            "run_python_file",
            "Run a Python file and return its stdout and stderr. \
             Returns output as a dictionary with success/error status and result/message.",
            Arc::new(RunPythonFile {
                runner: runner.clone(),
            }),
        )
        .param(ParamSpec::required("file_path", ValueType::Str))
        .returns(ValueType::Dict),
        ToolDescriptor::new(
            "run_pytest_tests",
            "Run pytest in the given directory and return its output. \
             Returns output as a dictionary with success/error status and result/message.",
            Arc::new(RunPytestTests { runner }),
        )
        .param(ParamSpec::optional("directory", ValueType::Str, json!(".")))
        .returns(ValueType::Dict),
    ]
}

/// Shorthand for [`descriptors`] with the default runner.
pub fn default_descriptors(workspace: &Path) -> Vec<ToolDescriptor> {
    descriptors(CodeRunner::new(workspace))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolRegistry;

    #[tokio::test]
    async fn missing_script_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = ToolRegistry::new();
        registry.register_all(default_descriptors(dir.path())).unwrap();

        let out = registry
            .dispatch("run_python_file", json!({"file_path": "missing.py"}))
            .await;
        assert_eq!(out.to_value()["success"], false);

        let out = registry
            .dispatch("run_pytest_tests", json!({"directory": "no_such_dir"}))
            .await;
        assert_eq!(out.to_value()["error"], "Directory not found: no_such_dir");
    }

    #[tokio::test]
    async fn missing_interpreter_becomes_tool_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.py"), "print('hi')\n").unwrap();
        let runner = CodeRunner::new(dir.path()).with_interpreter("definitely-not-a-python-binary");
        let mut registry = ToolRegistry::new();
        registry.register_all(descriptors(runner)).unwrap();

        let out = registry
            .dispatch("run_python_file", json!({"file_path": "main.py"}))
            .await;
        assert!(out.is_error());
        assert!(out.to_content().contains("Failed to execute"));
    }

    #[tokio::test]
    async fn captures_stdout_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("run.sh"), "echo out; echo err 1>&2\n").unwrap();
        let runner = CodeRunner::new(dir.path()).with_interpreter("sh");

        let output = runner.run(&["run.sh"]).await.unwrap();
        assert_eq!(output, "Stdout:\nout\n\nStderr:\nerr");
    }
}
