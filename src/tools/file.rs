//! File system tools: list, read, write, create and remove.
//!
//! Expected conditions (missing file, folder already exists) are reported in
//! the result as `{"success": false, "error": ...}`. Unexpected I/O errors are
//! returned as errors and surface through the registry boundary.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use walkdir::WalkDir;

use super::descriptor::{ParamSpec, ToolArgs, ToolDescriptor, ToolHandler, ValueType};

/// Resolve a tool-supplied path against the workspace. Absolute paths are kept.
pub(crate) fn resolve_path(workspace: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        workspace.join(p)
    }
}

fn ok(result: Value) -> Value {
    json!({ "success": true, "result": result })
}

fn fail(error: String) -> Value {
    json!({ "success": false, "error": error })
}

/// List files and directories up to a depth.
pub struct ListDirectoryFiles {
    workspace: PathBuf,
}

#[async_trait]
impl ToolHandler for ListDirectoryFiles {
    async fn call(&self, args: ToolArgs) -> anyhow::Result<Value> {
        let path = args.str_or("path", ".").to_string();
        let depth = args.i64_or("depth", 1).max(0) as usize;
        let base = resolve_path(&self.workspace, &path);

        if !base.exists() {
            return Ok(fail(format!("Path not found: {}", path)));
        }

        let entries = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<String>> {
            let mut entries = Vec::new();
            for entry in WalkDir::new(&base)
                .min_depth(1)
                .max_depth(depth)
                .sort_by_file_name()
            {
                let entry = entry?;
                let relative = entry.path().strip_prefix(&base).unwrap_or(entry.path());
                entries.push(Path::new(&path).join(relative).display().to_string());
            }
            Ok(entries)
        })
        .await??;

        Ok(ok(json!(entries)))
    }
}

/// Read a file's content.
pub struct ReadFile {
    workspace: PathBuf,
}

#[async_trait]
impl ToolHandler for ReadFile {
    async fn call(&self, args: ToolArgs) -> anyhow::Result<Value> {
        let file_path = args.str("file_path")?;
        let full = resolve_path(&self.workspace, file_path);

        if !full.is_file() {
            return Ok(fail(format!("File not found: {}", file_path)));
        }

        let content = tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", file_path, e))?;
        Ok(ok(json!(content)))
    }
}

/// Write content to a file, creating parent directories.
pub struct WriteFile {
    workspace: PathBuf,
}

#[async_trait]
impl ToolHandler for WriteFile {
    async fn call(&self, args: ToolArgs) -> anyhow::Result<Value> {
        let file_path = args.str("file_path")?;
        let content = args.str("content")?;
        let full = resolve_path(&self.workspace, file_path);

        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, content)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to write {}: {}", file_path, e))?;

        tracing::debug!("Wrote {} bytes to {}", content.len(), full.display());
        Ok(ok(json!(true)))
    }
}

/// Create a new folder.
pub struct CreateFolder {
    workspace: PathBuf,
}

#[async_trait]
impl ToolHandler for CreateFolder {
    async fn call(&self, args: ToolArgs) -> anyhow::Result<Value> {
        let folder_path = args.str("folder_path")?;
        let full = resolve_path(&self.workspace, folder_path);

        if full.exists() {
            return Ok(fail(format!("Folder already exists: {}", folder_path)));
        }
        tokio::fs::create_dir_all(&full).await?;
        Ok(ok(json!(true)))
    }
}

/// Remove a folder and everything below it.
pub struct RemoveFolder {
    workspace: PathBuf,
}

#[async_trait]
impl ToolHandler for RemoveFolder {
    async fn call(&self, args: ToolArgs) -> anyhow::Result<Value> {
        let folder_path = args.str("folder_path")?;
        let full = resolve_path(&self.workspace, folder_path);

        if !full.is_dir() {
            return Ok(fail(format!("Folder not found: {}", folder_path)));
        }
        tokio::fs::remove_dir_all(&full).await?;
        Ok(ok(json!(true)))
    }
}

/// Remove a single file.
pub struct RemoveFile {
    workspace: PathBuf,
}

#[async_trait]
impl ToolHandler for RemoveFile {
    async fn call(&self, args: ToolArgs) -> anyhow::Result<Value> {
        let file_path = args.str("file_path")?;
        let full = resolve_path(&self.workspace, file_path);

        if !full.is_file() {
            return Ok(fail(format!("File not found: {}", file_path)));
        }
        tokio::fs::remove_file(&full).await?;
        Ok(ok(json!(true)))
    }
}

/// Descriptors for every file tool, rooted at `workspace`.
pub fn descriptors(workspace: &Path) -> Vec<ToolDescriptor> {
    let ws = || workspace.to_path_buf();
    vec![
        ToolDescriptor::new(
            "list_directory_files",
            "List files and directories in the given path up to a certain depth. \
             Returns a dictionary with success/error status and result/message.",
            Arc::new(ListDirectoryFiles { workspace: ws() }),
        )
        .param(ParamSpec::optional("path", ValueType::Str, json!(".")))
        .param(ParamSpec::optional("depth", ValueType::Int, json!(1)))
        .returns(ValueType::Dict),
        ToolDescriptor::new(
            "read_file",
            "Read the content of a file. \
             Returns a dictionary with success/error status and result/message.",
            Arc::new(ReadFile { workspace: ws() }),
        )
        .param(ParamSpec::required("file_path", ValueType::Str))
        .returns(ValueType::Dict),
        ToolDescriptor::new(
            "write_file",
            "Write content to a file, creating parent folders as needed. \
             Returns a dictionary with success/error status and result/message.",
            Arc::new(WriteFile { workspace: ws() }),
        )
        .param(ParamSpec::required("file_path", ValueType::Str))
        .param(ParamSpec::required("content", ValueType::Str))
        .returns(ValueType::Dict),
        ToolDescriptor::new(
            "create_folder",
            "Create a new folder (directory) at the specified path. \
             Returns a dictionary with success/error status and result/message.",
            Arc::new(CreateFolder { workspace: ws() }),
        )
        .param(ParamSpec::required("folder_path", ValueType::Str))
        .returns(ValueType::Dict),
        ToolDescriptor::new(
            "remove_folder",
            "Remove a folder (directory) and all its contents at the specified path. \
             Returns a dictionary with success/error status and result/message.",
            Arc::new(RemoveFolder { workspace: ws() }),
        )
        .param(ParamSpec::required("folder_path", ValueType::Str))
        .returns(ValueType::Dict),
        ToolDescriptor::new(
            "remove_file",
            "Remove a file at the specified path. \
             Returns a dictionary with success/error status and result/message.",
            Arc::new(RemoveFile { workspace: ws() }),
        )
        .param(ParamSpec::required("file_path", ValueType::Str))
        .returns(ValueType::Dict),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolRegistry;

    fn registry(dir: &Path) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register_all(descriptors(dir)).unwrap();
        registry
    }

    #[tokio::test]
    async fn write_then_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());

        let written = registry
            .dispatch(
                "write_file",
                json!({"file_path": "tests/test_a.py", "content": "def test(): pass\n"}),
            )
            .await;
        assert_eq!(written.to_value(), json!({"success": true, "result": true}));

        let read = registry
            .dispatch("read_file", json!({"file_path": "tests/test_a.py"}))
            .await;
        assert_eq!(read.to_value()["result"], "def test(): pass\n");
    }

    #[tokio::test]
    async fn missing_file_is_reported_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());

        let out = registry
            .dispatch("read_file", json!({"file_path": "nope.txt"}))
            .await;
        assert!(!out.is_error());
        assert_eq!(out.to_value()["success"], false);
        assert_eq!(out.to_value()["error"], "File not found: nope.txt");

        let out = registry
            .dispatch("remove_file", json!({"file_path": "nope.txt"}))
            .await;
        assert_eq!(out.to_value()["success"], false);
    }

    #[tokio::test]
    async fn list_respects_depth() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("pkg/sub")).unwrap();
        std::fs::write(dir.path().join("pkg/a.py"), "").unwrap();
        std::fs::write(dir.path().join("pkg/sub/b.py"), "").unwrap();
        let registry = registry(dir.path());

        let shallow = registry
            .dispatch("list_directory_files", json!({"path": "pkg"}))
            .await
            .to_value();
        assert_eq!(shallow["result"], json!(["pkg/a.py", "pkg/sub"]));

        let deep = registry
            .dispatch("list_directory_files", json!({"path": "pkg", "depth": 2}))
            .await
            .to_value();
        assert_eq!(deep["result"], json!(["pkg/a.py", "pkg/sub", "pkg/sub/b.py"]));
    }

    #[tokio::test]
    async fn folder_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());

        let created = registry
            .dispatch("create_folder", json!({"folder_path": "out"}))
            .await;
        assert_eq!(created.to_value()["success"], true);

        let again = registry
            .dispatch("create_folder", json!({"folder_path": "out"}))
            .await;
        assert_eq!(again.to_value()["error"], "Folder already exists: out");

        let removed = registry
            .dispatch("remove_folder", json!({"folder_path": "out"}))
            .await;
        assert_eq!(removed.to_value()["success"], true);
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn absolute_paths_bypass_workspace() {
        let ws = Path::new("/workspace");
        assert_eq!(resolve_path(ws, "/etc/hosts"), PathBuf::from("/etc/hosts"));
        assert_eq!(resolve_path(ws, "a/b"), PathBuf::from("/workspace/a/b"));
    }
}
