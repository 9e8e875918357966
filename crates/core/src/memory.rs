//! Memory recall: a function from a query to ranked text.
//!
//! The vector store behind a real deployment is an external collaborator.
//! The orchestrator only needs "give me the N most relevant snippets for this
//! text", which is what [`MemoryRecall`] expresses.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::RwLock;

use crate::error::MemoryError;

/// One recalled piece of knowledge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    pub content: String,

    /// Relevance score, higher is better
    #[serde(default)]
    pub score: f32,

    /// Where the snippet came from (document, conversation, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// The recall interface consumed by the orchestrator.
#[async_trait]
pub trait MemoryRecall: Send + Sync {
    /// Up to `limit` snippets for `query`, best first.
    async fn recall(&self, query: &str, limit: usize) -> Result<Vec<Snippet>, MemoryError>;
}

/// Keyword-overlap recall over a fixed in-process corpus.
///
/// Useful for tests and small deployments that seed knowledge from config.
#[derive(Default)]
pub struct KeywordRecall {
    entries: RwLock<Vec<Snippet>>,
}

impl KeywordRecall {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remember(&self, content: impl Into<String>, source: Option<String>) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.push(Snippet {
            content: content.into(),
            score: 0.0,
            source,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl MemoryRecall for KeywordRecall {
    async fn recall(&self, query: &str, limit: usize) -> Result<Vec<Snippet>, MemoryError> {
        let wanted = terms(query);
        if wanted.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut hits: Vec<Snippet> = entries
            .iter()
            .filter_map(|entry| {
                let have = terms(&entry.content);
                let overlap = wanted.intersection(&have).count();
                (overlap > 0).then(|| Snippet {
                    score: overlap as f32 / wanted.len() as f32,
                    ..entry.clone()
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }
}
