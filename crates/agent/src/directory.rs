//! Agent directory: profile lookup behind an expiring cache.
//!
//! Profiles come from an [`AgentStore`] and are held in a `moka` cache owned
//! by the directory. Loading a profile (on a cache miss) also applies its
//! command enablement overlay to the [`CommandRegistry`].

use async_trait::async_trait;
use moka::future::Cache;
use relaymind_config::AgentProfileConfig;
use relaymind_core::command::CommandRegistry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// How one agent behaves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,
    pub name: String,
    pub persona: String,
    /// Model override for LOW and MEDIUM tiers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// `None` enables the whole catalog
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_commands: Option<Vec<String>>,
}

impl AgentProfile {
    /// Profile used for ids the store does not know.
    pub fn fallback(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            persona: String::new(),
            model: None,
            enabled_commands: None,
        }
    }
}

impl From<&AgentProfileConfig> for AgentProfile {
    fn from(config: &AgentProfileConfig) -> Self {
        Self {
            id: config.id.clone(),
            name: if config.name.is_empty() {
                config.id.clone()
            } else {
                config.name.clone()
            },
            persona: config.persona.clone(),
            model: config.model.clone(),
            enabled_commands: config.enabled_commands.clone(),
        }
    }
}

/// Where agent profiles live.
#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn load(&self, id: &str) -> Option<AgentProfile>;

    async fn list(&self) -> Vec<AgentProfile>;
}

/// Profiles declared in the `[[agents]]` config section.
pub struct ConfigAgentStore {
    profiles: HashMap<String, AgentProfile>,
}

impl ConfigAgentStore {
    pub fn new(agents: &[AgentProfileConfig]) -> Self {
        Self {
            profiles: agents
                .iter()
                .map(|a| (a.id.clone(), AgentProfile::from(a)))
                .collect(),
        }
    }
}

#[async_trait]
impl AgentStore for ConfigAgentStore {
    async fn load(&self, id: &str) -> Option<AgentProfile> {
        self.profiles.get(id).cloned()
    }

    async fn list(&self) -> Vec<AgentProfile> {
        let mut profiles: Vec<AgentProfile> = self.profiles.values().cloned().collect();
        profiles.sort_by(|a, b| a.id.cmp(&b.id));
        profiles
    }
}

/// Cached profile lookup.
pub struct AgentDirectory {
    store: Arc<dyn AgentStore>,
    cache: Cache<String, Arc<AgentProfile>>,
    commands: Arc<CommandRegistry>,
}

impl AgentDirectory {
    pub fn new(
        store: Arc<dyn AgentStore>,
        commands: Arc<CommandRegistry>,
        ttl: Duration,
        capacity: u64,
    ) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .build();
        Self {
            store,
            cache,
            commands,
        }
    }

    /// Profile for `id`, loading and applying its overlay on a miss.
    ///
    /// Unknown ids get [`AgentProfile::fallback`].
    pub async fn get(&self, id: &str) -> Arc<AgentProfile> {
        if let Some(profile) = self.cache.get(id).await {
            debug!(agent = id, "Agent cache hit");
            return profile;
        }
        debug!(agent = id, "Agent cache miss");

        let profile = match self.store.load(id).await {
            Some(profile) => profile,
            None => {
                debug!(agent = id, "Unknown agent, using fallback profile");
                AgentProfile::fallback(id)
            }
        };
        match &profile.enabled_commands {
            Some(names) => self.commands.set_enabled(id, names.iter().cloned()),
            None => self.commands.clear_overlay(id),
        }

        let profile = Arc::new(profile);
        self.cache.insert(id.to_string(), Arc::clone(&profile)).await;
        profile
    }

    /// Forget a cached profile so the next lookup reloads it.
    pub async fn invalidate(&self, id: &str) {
        self.cache.invalidate(id).await;
    }

    pub async fn list(&self) -> Vec<AgentProfile> {
        self.store.list().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaymind_core::command::{
        Command, CommandDescriptor, CommandModule, CommandOutput, InjectedContext,
    };
    use relaymind_core::error::CommandError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Named(CommandDescriptor);

    #[async_trait]
    impl Command for Named {
        fn descriptor(&self) -> &CommandDescriptor {
            &self.0
        }

        async fn call(
            &self,
            _arguments: relaymind_core::command::Arguments,
            _context: &InjectedContext,
        ) -> Result<CommandOutput, CommandError> {
            Ok(CommandOutput::text("ok"))
        }
    }

    struct Module;

    impl CommandModule for Module {
        fn name(&self) -> &str {
            "test"
        }

        fn commands(&self) -> Vec<Arc<dyn Command>> {
            ["Search Files", "Calculate"]
                .into_iter()
                .map(|n| Arc::new(Named(CommandDescriptor::new(n, "", vec![]))) as Arc<dyn Command>)
                .collect()
        }
    }

    struct CountingStore {
        inner: ConfigAgentStore,
        loads: AtomicUsize,
    }

    #[async_trait]
    impl AgentStore for CountingStore {
        async fn load(&self, id: &str) -> Option<AgentProfile> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.inner.load(id).await
        }

        async fn list(&self) -> Vec<AgentProfile> {
            self.inner.list().await
        }
    }

    fn setup() -> (Arc<CountingStore>, Arc<CommandRegistry>, AgentDirectory) {
        let store = Arc::new(CountingStore {
            inner: ConfigAgentStore::new(&[AgentProfileConfig {
                id: "researcher".into(),
                name: String::new(),
                persona: "You research things.".into(),
                model: Some("gpt-4o-mini".into()),
                enabled_commands: Some(vec!["Search Files".into()]),
            }]),
            loads: AtomicUsize::new(0),
        });
        let commands = Arc::new(CommandRegistry::new(vec![Arc::new(Module)]));
        let directory = AgentDirectory::new(
            store.clone(),
            commands.clone(),
            Duration::from_secs(300),
            16,
        );
        (store, commands, directory)
    }

    #[tokio::test]
    async fn loads_once_and_applies_overlay() {
        let (store, commands, directory) = setup();

        let profile = directory.get("researcher").await;
        assert_eq!(profile.name, "researcher");
        assert!(commands.is_enabled("researcher", "Search Files"));
        assert!(!commands.is_enabled("researcher", "Calculate"));

        directory.get("researcher").await;
        assert_eq!(store.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_agent_gets_fallback_with_full_catalog() {
        let (_store, commands, directory) = setup();
        let profile = directory.get("stranger").await;
        assert_eq!(*profile, AgentProfile::fallback("stranger"));
        assert!(commands.is_enabled("stranger", "Calculate"));
    }

    #[tokio::test]
    async fn invalidate_forces_reload() {
        let (store, _commands, directory) = setup();
        directory.get("researcher").await;
        directory.invalidate("researcher").await;
        directory.get("researcher").await;
        assert_eq!(store.loads.load(Ordering::SeqCst), 2);
    }
}
