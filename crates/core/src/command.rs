//! Command trait and registry: the abstraction over agent capabilities.
//!
//! Commands are named, described, typed functions the model can invoke from
//! an `execute` block. They are contributed by [`CommandModule`]s, each of
//! which exposes a static descriptor list. The [`CommandRegistry`] builds one
//! immutable catalog from those modules on first use, and keeps per-agent
//! enablement as a separate overlay.
//!
//! Execution never fails outward: lookup misses, bad arguments, timeouts and
//! even panics inside a command come back as an [`ExecutionResult`] in
//! failure state, so the orchestrator can feed them to the model.

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

use crate::coerce::coerce_arguments;
use crate::error::CommandError;

/// Caller-visible argument surface of a command invocation.
pub type Arguments = serde_json::Map<String, serde_json::Value>;

/// Semantic type of a declared parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    /// A JSON object or array
    Structured,
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ParamType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

impl ParamSpec {
    pub fn required(name: &str, ty: ParamType, description: &str) -> Self {
        Self {
            name: name.into(),
            ty,
            description: description.into(),
            required: true,
        }
    }

    pub fn optional(name: &str, ty: ParamType, description: &str) -> Self {
        Self {
            name: name.into(),
            ty,
            description: description.into(),
            required: false,
        }
    }
}

/// Static description of a local command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandDescriptor {
    /// Display name, unique within the catalog (e.g. "Search Files")
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParamSpec>,
}

impl CommandDescriptor {
    pub fn new(name: &str, description: &str, parameters: Vec<ParamSpec>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// A tool declared by the caller and executed on the caller's device.
///
/// Same name/parameter contract as [`CommandDescriptor`] but no local
/// execution handle: invoking it means emitting an event and awaiting the
/// caller's answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ParamSpec>,
}

/// Secrets handed to commands at call time.
#[derive(Clone, Default)]
pub struct Credentials(HashMap<String, String>);

impl Credentials {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self(values)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<&String> = self.0.keys().collect();
        keys.sort();
        f.debug_struct("Credentials")
            .field("keys", &keys)
            .field("values", &"[REDACTED]")
            .finish()
    }
}

/// Context merged into every call but never part of the argument surface.
///
/// The model can only influence [`Arguments`]; identity, workspace and
/// credentials always come from here.
#[derive(Debug, Clone)]
pub struct InjectedContext {
    pub agent_id: String,
    pub conversation_id: String,
    pub workspace: PathBuf,
    pub credentials: Credentials,
}

impl InjectedContext {
    pub fn new(
        agent_id: impl Into<String>,
        conversation_id: impl Into<String>,
        workspace: impl Into<PathBuf>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            conversation_id: conversation_id.into(),
            workspace: workspace.into(),
            credentials: Credentials::default(),
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }
}

/// A command invocation as extracted from model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub command: String,
    #[serde(default)]
    pub arguments: Arguments,
}

/// What a command produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl CommandOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// The outcome of an invocation, success or typed failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub command: String,
    /// Human-readable output (or failure message)
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CommandError>,
}

impl ExecutionResult {
    pub fn success(command: impl Into<String>, output: CommandOutput) -> Self {
        Self {
            command: command.into(),
            output: output.text,
            data: output.data,
            error: None,
        }
    }

    pub fn failure(command: impl Into<String>, error: CommandError) -> Self {
        Self {
            command: command.into(),
            output: format!("Error: {error}"),
            data: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// The core Command trait.
///
/// `call` receives arguments already coerced to the declared types; the
/// registry has done validation before the command runs.
#[async_trait]
pub trait Command: Send + Sync {
    fn descriptor(&self) -> &CommandDescriptor;

    async fn call(
        &self,
        arguments: Arguments,
        context: &InjectedContext,
    ) -> Result<CommandOutput, CommandError>;
}

/// A group of commands registered together (one per tool module).
pub trait CommandModule: Send + Sync {
    fn name(&self) -> &str;

    fn commands(&self) -> Vec<Arc<dyn Command>>;
}

/// Immutable name → command map, built once.
pub struct CommandCatalog {
    commands: BTreeMap<String, Arc<dyn Command>>,
}

impl CommandCatalog {
    fn build(modules: &[Arc<dyn CommandModule>]) -> Self {
        let mut commands: BTreeMap<String, Arc<dyn Command>> = BTreeMap::new();
        for module in modules {
            for command in module.commands() {
                let name = command.descriptor().name.clone();
                if commands.contains_key(&name) {
                    warn!(module = module.name(), command = %name, "Duplicate command name, keeping first");
                    continue;
                }
                commands.insert(name, command);
            }
        }
        debug!(count = commands.len(), "Command catalog built");
        Self { commands }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Command>> {
        self.commands.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.commands.keys().map(String::as_str).collect()
    }

    pub fn descriptors(&self) -> Vec<CommandDescriptor> {
        self.commands
            .values()
            .map(|c| c.descriptor().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Catalog plus per-agent enablement overlay.
///
/// Resolution is a case-sensitive exact match against the agent's enabled
/// set. An agent with no overlay entry sees the whole catalog.
pub struct CommandRegistry {
    modules: Vec<Arc<dyn CommandModule>>,
    catalog: OnceLock<CommandCatalog>,
    overlays: RwLock<HashMap<String, HashSet<String>>>,
    command_timeout: Duration,
}

impl CommandRegistry {
    pub fn new(modules: Vec<Arc<dyn CommandModule>>) -> Self {
        Self {
            modules,
            catalog: OnceLock::new(),
            overlays: RwLock::new(HashMap::new()),
            command_timeout: Duration::from_secs(300),
        }
    }

    /// Bound each local command invocation.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// The catalog, built from the modules on first access.
    pub fn catalog(&self) -> &CommandCatalog {
        self.catalog.get_or_init(|| CommandCatalog::build(&self.modules))
    }

    /// Replace the enabled set for an agent.
    pub fn set_enabled<I, S>(&self, agent_id: &str, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: HashSet<String> = names.into_iter().map(Into::into).collect();
        let mut overlays = self.overlays.write().unwrap_or_else(|e| e.into_inner());
        overlays.insert(agent_id.to_string(), set);
    }

    /// Enable one command for an agent that already has an overlay.
    /// Creates an overlay containing only this command otherwise.
    pub fn enable(&self, agent_id: &str, name: &str) {
        let mut overlays = self.overlays.write().unwrap_or_else(|e| e.into_inner());
        overlays
            .entry(agent_id.to_string())
            .or_default()
            .insert(name.to_string());
    }

    /// Disable one command for an agent.
    pub fn disable(&self, agent_id: &str, name: &str) {
        let all: HashSet<String> = self.catalog().names().into_iter().map(String::from).collect();
        let mut overlays = self.overlays.write().unwrap_or_else(|e| e.into_inner());
        overlays
            .entry(agent_id.to_string())
            .or_insert(all)
            .remove(name);
    }

    /// Drop an agent's overlay so it sees the whole catalog again.
    pub fn clear_overlay(&self, agent_id: &str) {
        let mut overlays = self.overlays.write().unwrap_or_else(|e| e.into_inner());
        overlays.remove(agent_id);
    }

    pub fn is_enabled(&self, agent_id: &str, name: &str) -> bool {
        if self.catalog().get(name).is_none() {
            return false;
        }
        let overlays = self.overlays.read().unwrap_or_else(|e| e.into_inner());
        overlays.get(agent_id).is_none_or(|set| set.contains(name))
    }

    /// Descriptors of every command the agent may call, sorted by name.
    pub fn enabled_descriptors(&self, agent_id: &str) -> Vec<CommandDescriptor> {
        let catalog = self.catalog();
        let overlays = self.overlays.read().unwrap_or_else(|e| e.into_inner());
        let overlay = overlays.get(agent_id);
        catalog
            .commands
            .iter()
            .filter(|(name, _)| overlay.is_none_or(|set| set.contains(name.as_str())))
            .map(|(_, c)| c.descriptor().clone())
            .collect()
    }

    /// Look up an enabled command by exact name.
    pub fn resolve(&self, agent_id: &str, name: &str) -> Result<Arc<dyn Command>, CommandError> {
        if !self.is_enabled(agent_id, name) {
            return Err(CommandError::NotFound { name: name.into() });
        }
        self.catalog()
            .get(name)
            .cloned()
            .ok_or_else(|| CommandError::NotFound { name: name.into() })
    }

    /// Resolve, coerce and run a command. Never returns an error: every
    /// failure is folded into the [`ExecutionResult`].
    pub async fn execute(
        &self,
        agent_id: &str,
        request: &ExecutionRequest,
        context: &InjectedContext,
    ) -> ExecutionResult {
        let command = match self.resolve(agent_id, &request.command) {
            Ok(c) => c,
            Err(e) => {
                debug!(agent = agent_id, command = %request.command, "Command not resolvable");
                return ExecutionResult::failure(&request.command, e);
            }
        };

        let arguments = match coerce_arguments(&command.descriptor().parameters, &request.arguments)
        {
            Ok(a) => a,
            Err(e) => return ExecutionResult::failure(&request.command, e),
        };

        let call = AssertUnwindSafe(command.call(arguments, context)).catch_unwind();
        match tokio::time::timeout(self.command_timeout, call).await {
            Ok(Ok(Ok(output))) => ExecutionResult::success(&request.command, output),
            Ok(Ok(Err(e))) => {
                warn!(command = %request.command, error = %e, "Command failed");
                ExecutionResult::failure(&request.command, e)
            }
            Ok(Err(panic)) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "command panicked".to_string());
                warn!(command = %request.command, %reason, "Command panicked");
                ExecutionResult::failure(
                    &request.command,
                    CommandError::ExecutionFailed {
                        command: request.command.clone(),
                        reason,
                    },
                )
            }
            Err(_) => ExecutionResult::failure(
                &request.command,
                CommandError::Timeout {
                    command: request.command.clone(),
                    timeout_secs: self.command_timeout.as_secs(),
                },
            ),
        }
    }
}
