//! Configuration loading, validation, and management for relaymind.
//!
//! Loads configuration from `~/.relaymind/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use relaymind_core::command::Arguments;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.relaymind/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default LLM provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Root directory handed to local commands as their workspace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_dir: Option<PathBuf>,

    /// Model selection per tier
    #[serde(default)]
    pub models: ModelsConfig,

    /// Provider-boundary retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Reasoning loop limits
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Agent profile cache
    #[serde(default)]
    pub cache: CacheConfig,

    /// Seed knowledge for memory recall
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Secrets handed to commands through injected context, never as arguments
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub credentials: HashMap<String, String>,

    /// Agent profiles
    #[serde(default)]
    pub agents: Vec<AgentProfileConfig>,

    /// Named command/prompt chains
    #[serde(default)]
    pub chains: Vec<ChainConfig>,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_true() -> bool {
    true
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

fn credential_keys(credentials: &HashMap<String, String>) -> Vec<&str> {
    let mut keys: Vec<&str> = credentials.keys().map(String::as_str).collect();
    keys.sort_unstable();
    keys
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("workspace_dir", &self.workspace_dir)
            .field("models", &self.models)
            .field("retry", &self.retry)
            .field("orchestrator", &self.orchestrator)
            .field("gateway", &self.gateway)
            .field("cache", &self.cache)
            .field("memory", &self.memory)
            .field("providers", &self.providers)
            .field("credentials", &credential_keys(&self.credentials))
            .field("agents", &self.agents)
            .field("chains", &self.chains)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Model for LOW and MEDIUM tiers
    #[serde(default = "default_model")]
    pub default: String,

    /// Most capable model, used for HIGH tier and review passes
    #[serde(default = "default_advanced_model")]
    pub advanced: String,
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_advanced_model() -> String {
    "gpt-4o".into()
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            default: default_model(),
            advanced: default_advanced_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    500
}
fn default_max_backoff_ms() -> u64 {
    8000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// How long a remote tool call may stay pending
    #[serde(default = "default_remote_timeout_secs")]
    pub remote_timeout_secs: u64,

    /// Early answer/execute rejections before the run is terminated
    #[serde(default = "default_max_interventions")]
    pub max_interventions: u32,

    /// Hard ceiling on provider invocations per request
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    /// Bound on a single local command
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// Run the self-critique pass for HIGH tier answers
    #[serde(default = "default_true")]
    pub review_enabled: bool,

    /// Snippets injected from memory recall (0 disables recall)
    #[serde(default = "default_recall_limit")]
    pub recall_limit: usize,

    /// Nested chain depth before failing with a recursion error
    #[serde(default = "default_max_chain_depth")]
    pub max_chain_depth: usize,
}

fn default_remote_timeout_secs() -> u64 {
    120
}
fn default_max_interventions() -> u32 {
    5
}
fn default_max_rounds() -> u32 {
    25
}
fn default_command_timeout_secs() -> u64 {
    300
}
fn default_recall_limit() -> usize {
    5
}
fn default_max_chain_depth() -> usize {
    4
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            remote_timeout_secs: default_remote_timeout_secs(),
            max_interventions: default_max_interventions(),
            max_rounds: default_max_rounds(),
            command_timeout_secs: default_command_timeout_secs(),
            review_enabled: true,
            recall_limit: default_recall_limit(),
            max_chain_depth: default_max_chain_depth(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    7410
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_agent_ttl_secs")]
    pub agent_ttl_secs: u64,

    #[serde(default = "default_agent_capacity")]
    pub agent_capacity: u64,
}

fn default_agent_ttl_secs() -> u64 {
    300
}
fn default_agent_capacity() -> u64 {
    1024
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            agent_ttl_secs: default_agent_ttl_secs(),
            agent_capacity: default_agent_capacity(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Knowledge snippets loaded into keyword recall at startup
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub snippets: Vec<String>,
}

/// One agent profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfileConfig {
    pub id: String,

    #[serde(default)]
    pub name: String,

    /// System persona prepended to the tag protocol
    #[serde(default)]
    pub persona: String,

    /// Model override for LOW/MEDIUM tiers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Commands this agent may call; absent means the whole catalog
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_commands: Option<Vec<String>>,
}

/// A named sequence of steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub steps: Vec<ChainStepConfig>,
}

/// One chain step. String fields accept `{input}` and `{previous}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChainStepConfig {
    /// Run a local command
    Command {
        command: String,
        #[serde(default)]
        arguments: Arguments,
    },
    /// Run another chain
    Chain {
        chain: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<String>,
    },
    /// Send a prompt to the model
    Prompt { prompt: String },
}

impl AppConfig {
    /// Load configuration from the default path (~/.relaymind/config.toml).
    ///
    /// Also checks environment variables:
    /// - `RELAYMIND_API_KEY` (highest priority), then `OPENAI_API_KEY`
    /// - `RELAYMIND_PROVIDER` overrides `default_provider`
    /// - `RELAYMIND_MODEL` overrides `models.default`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if self.api_key.is_none() {
            self.api_key = std::env::var("RELAYMIND_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(provider) = std::env::var("RELAYMIND_PROVIDER") {
            self.default_provider = provider;
        }

        if let Ok(model) = std::env::var("RELAYMIND_MODEL") {
            self.models.default = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".relaymind")
    }

    /// The workspace handed to local commands.
    pub fn workspace(&self) -> PathBuf {
        self.workspace_dir
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("workspace"))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        let o = &self.orchestrator;
        if o.remote_timeout_secs == 0 || o.command_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "orchestrator timeouts must be greater than zero".into(),
            ));
        }
        if o.max_rounds == 0 {
            return Err(ConfigError::ValidationError(
                "orchestrator.max_rounds must be at least 1".into(),
            ));
        }

        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(ConfigError::ValidationError(
                "retry.initial_backoff_ms must not exceed retry.max_backoff_ms".into(),
            ));
        }

        let mut ids = HashSet::new();
        for agent in &self.agents {
            if !ids.insert(agent.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate agent id '{}'",
                    agent.id
                )));
            }
        }

        let mut names = HashSet::new();
        for chain in &self.chains {
            if !names.insert(chain.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate chain name '{}'",
                    chain.name
                )));
            }
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            workspace_dir: None,
            models: ModelsConfig::default(),
            retry: RetryConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            gateway: GatewayConfig::default(),
            cache: CacheConfig::default(),
            memory: MemoryConfig::default(),
            providers: HashMap::new(),
            credentials: HashMap::new(),
            agents: vec![],
            chains: vec![],
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
