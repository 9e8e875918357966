//! File commands: search, read and write inside the agent's workspace.

use async_trait::async_trait;
use relaymind_core::command::{
    Arguments, Command, CommandDescriptor, CommandModule, CommandOutput, InjectedContext,
    ParamSpec, ParamType,
};
use relaymind_core::error::CommandError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::workspace;

/// Files larger than this are skipped by search and truncated by read.
const MAX_FILE_BYTES: u64 = 1024 * 1024;
const DEFAULT_SEARCH_LIMIT: usize = 20;

fn str_arg<'a>(arguments: &'a Arguments, name: &str) -> &'a str {
    arguments.get(name).and_then(|v| v.as_str()).unwrap_or_default()
}

fn failed(command: &str, reason: impl std::fmt::Display) -> CommandError {
    CommandError::ExecutionFailed {
        command: command.into(),
        reason: reason.to_string(),
    }
}

/// Groups the file commands into one module.
pub struct FilesModule;

impl CommandModule for FilesModule {
    fn name(&self) -> &str {
        "files"
    }

    fn commands(&self) -> Vec<Arc<dyn Command>> {
        vec![
            Arc::new(SearchFiles::new()),
            Arc::new(ReadFile::new()),
            Arc::new(WriteFile::new()),
        ]
    }
}

// --- Search Files ---

pub struct SearchFiles {
    descriptor: CommandDescriptor,
}

impl SearchFiles {
    pub fn new() -> Self {
        Self {
            descriptor: CommandDescriptor::new(
                "Search Files",
                "Search the workspace for files whose name or contents contain the query (case-insensitive).",
                vec![
                    ParamSpec::required("query", ParamType::String, "Text to look for"),
                    ParamSpec::optional("limit", ParamType::Integer, "Maximum number of matches (default 20)"),
                    ParamSpec::optional("extension", ParamType::String, "Only search files with this extension, e.g. 'rs'"),
                ],
            ),
        }
    }
}

impl Default for SearchFiles {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, PartialEq)]
struct SearchHit {
    path: String,
    line: Option<usize>,
    text: String,
}

fn search_tree(root: &Path, query: &str, extension: Option<&str>, limit: usize) -> Vec<SearchHit> {
    let needle = query.to_lowercase();
    let mut hits = Vec::new();
    let mut stack: Vec<PathBuf> = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        let mut entries: Vec<_> = entries.flatten().collect();
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            if hits.len() >= limit {
                return hits;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                stack.push(path);
                continue;
            }
            if !file_type.is_file() {
                continue;
            }
            if let Some(ext) = extension
                && path.extension().and_then(|e| e.to_str()) != Some(ext.trim_start_matches('.'))
            {
                continue;
            }

            let shown = workspace::display(root, &path);
            if name.to_lowercase().contains(&needle) {
                hits.push(SearchHit {
                    path: shown.clone(),
                    line: None,
                    text: String::new(),
                });
                continue;
            }

            let too_big = entry.metadata().map(|m| m.len() > MAX_FILE_BYTES).unwrap_or(true);
            if too_big {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            for (i, line) in content.lines().enumerate() {
                if line.to_lowercase().contains(&needle) {
                    hits.push(SearchHit {
                        path: shown.clone(),
                        line: Some(i + 1),
                        text: line.trim().chars().take(200).collect(),
                    });
                    if hits.len() >= limit {
                        return hits;
                    }
                }
            }
        }
    }
    hits
}

#[async_trait]
impl Command for SearchFiles {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.descriptor
    }

    async fn call(
        &self,
        arguments: Arguments,
        context: &InjectedContext,
    ) -> Result<CommandOutput, CommandError> {
        let query = str_arg(&arguments, "query").to_string();
        if query.trim().is_empty() {
            return Err(CommandError::Argument {
                parameter: "query".into(),
                reason: "query must not be empty".into(),
            });
        }
        let limit = arguments
            .get("limit")
            .and_then(|v| v.as_i64())
            .map(|l| l.clamp(1, 200) as usize)
            .unwrap_or(DEFAULT_SEARCH_LIMIT);
        let extension = arguments
            .get("extension")
            .and_then(|v| v.as_str())
            .map(String::from);

        let root = workspace::resolve(&context.workspace, ".", "Search Files")?;
        debug!(query = %query, root = %root.display(), "Searching workspace");

        let hits = tokio::task::spawn_blocking(move || {
            search_tree(&root, &query, extension.as_deref(), limit)
        })
        .await
        .map_err(|e| failed("Search Files", e))?;

        if hits.is_empty() {
            return Ok(CommandOutput::text("No matches found."));
        }

        let lines: Vec<String> = hits
            .iter()
            .map(|h| match h.line {
                Some(n) => format!("{}:{}: {}", h.path, n, h.text),
                None => h.path.clone(),
            })
            .collect();
        let data = serde_json::json!(
            hits.iter()
                .map(|h| serde_json::json!({"path": h.path, "line": h.line, "text": h.text}))
                .collect::<Vec<_>>()
        );
        Ok(CommandOutput::text(format!("{} match(es):\n{}", hits.len(), lines.join("\n"))).with_data(data))
    }
}

// --- Read File ---

pub struct ReadFile {
    descriptor: CommandDescriptor,
}

impl ReadFile {
    pub fn new() -> Self {
        Self {
            descriptor: CommandDescriptor::new(
                "Read File",
                "Read a text file from the workspace.",
                vec![
                    ParamSpec::required("path", ParamType::String, "Path relative to the workspace"),
                    ParamSpec::optional("max_bytes", ParamType::Integer, "Truncate after this many bytes"),
                ],
            ),
        }
    }
}

impl Default for ReadFile {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Command for ReadFile {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.descriptor
    }

    async fn call(
        &self,
        arguments: Arguments,
        context: &InjectedContext,
    ) -> Result<CommandOutput, CommandError> {
        let requested = str_arg(&arguments, "path");
        let path = workspace::resolve(&context.workspace, requested, "Read File")?;
        let max_bytes = arguments
            .get("max_bytes")
            .and_then(|v| v.as_u64())
            .unwrap_or(MAX_FILE_BYTES)
            .min(MAX_FILE_BYTES) as usize;

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| failed("Read File", format!("{requested}: {e}")))?;
        let truncated = bytes.len() > max_bytes;
        let mut text = String::from_utf8_lossy(&bytes[..bytes.len().min(max_bytes)]).to_string();
        if truncated {
            text.push_str("\n[truncated]");
        }
        Ok(CommandOutput::text(text).with_data(serde_json::json!({
            "path": workspace::display(&context.workspace, &path),
            "bytes": bytes.len(),
            "truncated": truncated,
        })))
    }
}

// --- Write File ---

pub struct WriteFile {
    descriptor: CommandDescriptor,
}

impl WriteFile {
    pub fn new() -> Self {
        Self {
            descriptor: CommandDescriptor::new(
                "Write File",
                "Write text to a file in the workspace, creating parent directories as needed.",
                vec![
                    ParamSpec::required("path", ParamType::String, "Path relative to the workspace"),
                    ParamSpec::required("content", ParamType::String, "Text to write"),
                    ParamSpec::optional("append", ParamType::Boolean, "Append instead of overwrite"),
                ],
            ),
        }
    }
}

impl Default for WriteFile {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Command for WriteFile {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.descriptor
    }

    async fn call(
        &self,
        arguments: Arguments,
        context: &InjectedContext,
    ) -> Result<CommandOutput, CommandError> {
        let requested = str_arg(&arguments, "path");
        let content = str_arg(&arguments, "content");
        let append = arguments.get("append").and_then(|v| v.as_bool()).unwrap_or(false);
        let path = workspace::resolve(&context.workspace, requested, "Write File")?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| failed("Write File", e))?;
        }

        if append {
            use tokio::io::AsyncWriteExt;
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .map_err(|e| failed("Write File", e))?;
            file.write_all(content.as_bytes())
                .await
                .map_err(|e| failed("Write File", e))?;
        } else {
            tokio::fs::write(&path, content)
                .await
                .map_err(|e| failed("Write File", e))?;
        }

        let shown = workspace::display(&context.workspace, &path);
        Ok(CommandOutput::text(format!(
            "Wrote {} bytes to {}",
            content.len(),
            shown
        )))
    }
}
