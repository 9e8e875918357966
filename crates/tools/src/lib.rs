//! Built-in command modules for relaymind.
//!
//! Commands give the agent the ability to act: search, read and write files
//! inside its workspace, and do arithmetic. Each module exposes a static
//! descriptor list; [`default_catalog`] collects them for the registry.

pub mod calculator;
pub mod files;
pub mod workspace;

use relaymind_core::command::{CommandModule, CommandRegistry};
use std::sync::Arc;
use std::time::Duration;

pub use calculator::{Calculate, MathModule};
pub use files::{FilesModule, ReadFile, SearchFiles, WriteFile};

/// All built-in command modules.
pub fn default_catalog() -> Vec<Arc<dyn CommandModule>> {
    vec![Arc::new(FilesModule), Arc::new(MathModule)]
}

/// A registry over the built-in catalog with the given per-command timeout.
pub fn default_registry(command_timeout: Duration) -> CommandRegistry {
    CommandRegistry::new(default_catalog()).with_timeout(command_timeout)
}
