//! Workspace confinement for file commands.
//!
//! Commands receive a workspace handle through the injected context. Paths
//! supplied by the model are always interpreted relative to it and must stay
//! inside it, after symlinks are resolved.

use relaymind_core::error::CommandError;
use std::path::{Component, Path, PathBuf};

/// Resolve a model-supplied path inside `workspace`.
///
/// Rejects parent-directory components, absolute paths that do not point
/// into the workspace, and existing paths whose canonical form escapes it
/// (a symlink pointing outside). Non-existent targets are accepted as long as
/// their nearest existing ancestor is inside.
pub fn resolve(workspace: &Path, requested: &str, command: &str) -> Result<PathBuf, CommandError> {
    let denied = |reason: String| CommandError::PermissionDenied {
        command: command.to_string(),
        reason,
    };

    let trimmed = requested.trim();
    if trimmed.is_empty() {
        return Err(CommandError::Argument {
            parameter: "path".into(),
            reason: "path must not be empty".into(),
        });
    }

    let normalized = trimmed.replace('\\', "/");
    let raw = Path::new(&normalized);
    if raw.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(denied(format!("path traversal in '{requested}'")));
    }

    let root = workspace
        .canonicalize()
        .map_err(|e| denied(format!("workspace unavailable: {e}")))?;

    let joined = if raw.is_absolute() {
        let stripped = raw
            .strip_prefix(&root)
            .or_else(|_| raw.strip_prefix(workspace))
            .map_err(|_| denied(format!("'{requested}' is outside the workspace")))?;
        root.join(stripped)
    } else {
        root.join(raw)
    };

    // Canonicalize the deepest existing ancestor to catch symlink escapes.
    let mut existing = joined.as_path();
    let mut tail: Vec<&std::ffi::OsStr> = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name);
                existing = parent;
            }
            _ => break,
        }
    }
    let mut resolved = existing
        .canonicalize()
        .map_err(|e| denied(format!("cannot resolve '{requested}': {e}")))?;
    if !resolved.starts_with(&root) {
        return Err(denied(format!("'{requested}' resolves outside the workspace")));
    }
    for name in tail.into_iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}

/// Render `path` relative to the workspace for display to the model.
pub fn display(workspace: &Path, path: &Path) -> String {
    let root = workspace
        .canonicalize()
        .unwrap_or_else(|_| workspace.to_path_buf());
    path.strip_prefix(&root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}
