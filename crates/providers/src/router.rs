//! Provider router: resolves the backend named in config.
//!
//! Every provider built from config is wrapped in a [`RetryProvider`] so
//! transient failures are absorbed at the provider boundary.

use crate::openai_compat::OpenAiCompatProvider;
use crate::retry::RetryProvider;
use relaymind_config::{AppConfig, ProviderConfig};
use relaymind_core::provider::Provider;
use std::collections::BTreeMap;
use std::sync::Arc;

/// OpenAI-compatible endpoints known by name.
const KNOWN_ENDPOINTS: &[(&str, &str)] = &[
    ("openai", "https://api.openai.com/v1"),
    ("openrouter", "https://openrouter.ai/api/v1"),
    ("groq", "https://api.groq.com/openai/v1"),
    ("deepseek", "https://api.deepseek.com/v1"),
    ("together", "https://api.together.xyz/v1"),
    ("ollama", "http://localhost:11434/v1"),
    ("vllm", "http://localhost:8000/v1"),
];

/// Named providers plus the one used when a request does not pick.
pub struct ProviderRouter {
    providers: BTreeMap<String, Arc<dyn Provider>>,
    default_provider: String,
}

impl ProviderRouter {
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: BTreeMap::new(),
            default_provider: default_provider.into(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    /// The provider named by `default_provider`, if registered.
    pub fn default(&self) -> Option<Arc<dyn Provider>> {
        self.get(&self.default_provider)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    /// Registered names in order.
    pub fn names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }
}

/// Build every `[providers.<name>]` entry, plus the default provider even
/// when it has no section of its own.
pub fn build_from_config(config: &AppConfig) -> ProviderRouter {
    let mut router = ProviderRouter::new(&config.default_provider);

    for (name, section) in &config.providers {
        router.register(name.clone(), build_one(config, name, section));
    }
    if router.default().is_none() {
        let name = &config.default_provider;
        router.register(name.clone(), build_one(config, name, &ProviderConfig::default()));
    }

    router
}

fn build_one(config: &AppConfig, name: &str, section: &ProviderConfig) -> Arc<dyn Provider> {
    let api_key = section
        .api_key
        .as_deref()
        .or(config.api_key.as_deref())
        .unwrap_or_default();
    let base_url = section
        .api_url
        .clone()
        .unwrap_or_else(|| endpoint_for(name));

    let inner = Arc::new(OpenAiCompatProvider::new(name, &base_url, api_key));
    Arc::new(
        RetryProvider::new(inner)
            .with_max_retries(config.retry.max_retries)
            .with_backoff(config.retry.initial_backoff(), config.retry.max_backoff()),
    )
}

/// Base URL for a known provider name; unknown names fall back to a local
/// OpenAI-compatible server.
fn endpoint_for(name: &str) -> String {
    KNOWN_ENDPOINTS
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(_, url)| (*url).to_string())
        .unwrap_or_else(|| "http://localhost:8080/v1".into())
}
