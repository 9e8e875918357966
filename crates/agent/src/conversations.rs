//! Conversation registry: at most one in-flight task per conversation.
//!
//! Registration hands back a [`TaskGuard`] that removes the entry when it is
//! dropped, whichever way the task ends. Cancellation is cooperative: the
//! task observes its [`CancellationToken`] at token, tag and remote-await
//! boundaries.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use relaymind_core::error::RegistryError;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Registry entry for one running orchestration.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationTask {
    pub conversation_id: String,
    pub owner: String,
    pub agent_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip)]
    task_id: Uuid,
    #[serde(skip)]
    cancel: CancellationToken,
}

impl ConversationTask {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Identifies this run, distinct from any later run of the same conversation.
    pub fn task_id(&self) -> Uuid {
        self.task_id
    }
}

/// Process-wide map from conversation id to its running task.
#[derive(Default)]
pub struct ConversationRegistry {
    tasks: DashMap<String, ConversationTask>,
}

impl ConversationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a conversation for a new task.
    ///
    /// Fails with [`RegistryError::AlreadyActive`] if another task holds it.
    pub fn register(
        self: &Arc<Self>,
        conversation_id: &str,
        owner: &str,
        agent_id: &str,
    ) -> Result<TaskGuard, RegistryError> {
        match self.tasks.entry(conversation_id.to_string()) {
            Entry::Occupied(_) => Err(RegistryError::AlreadyActive(conversation_id.to_string())),
            Entry::Vacant(slot) => {
                let task_id = Uuid::new_v4();
                let token = CancellationToken::new();
                slot.insert(ConversationTask {
                    conversation_id: conversation_id.to_string(),
                    owner: owner.to_string(),
                    agent_id: agent_id.to_string(),
                    started_at: Utc::now(),
                    task_id,
                    cancel: token.clone(),
                });
                debug!(conversation_id, owner, agent_id, "Conversation task registered");
                Ok(TaskGuard {
                    registry: Arc::clone(self),
                    conversation_id: conversation_id.to_string(),
                    task_id,
                    token,
                })
            }
        }
    }

    /// Signal a conversation's task to stop and forget it.
    ///
    /// Returns the removed entry so the caller can clean up after that task.
    pub fn cancel(&self, conversation_id: &str) -> Option<ConversationTask> {
        let (_, task) = self.tasks.remove(conversation_id)?;
        task.cancel.cancel();
        info!(conversation_id, owner = %task.owner, "Conversation cancelled");
        Some(task)
    }

    /// Cancel every task owned by `owner` and return the removed entries.
    pub fn cancel_all(&self, owner: &str) -> Vec<ConversationTask> {
        let ids: Vec<String> = self
            .tasks
            .iter()
            .filter(|entry| entry.owner == owner)
            .map(|entry| entry.key().clone())
            .collect();
        ids.iter().filter_map(|id| self.cancel(id)).collect()
    }

    /// Active tasks of `owner`, oldest first.
    pub fn list(&self, owner: &str) -> Vec<ConversationTask> {
        let mut tasks: Vec<ConversationTask> = self
            .tasks
            .iter()
            .filter(|entry| entry.owner == owner)
            .map(|entry| entry.value().clone())
            .collect();
        tasks.sort_by_key(|t| t.started_at);
        tasks
    }

    pub fn get(&self, conversation_id: &str) -> Option<ConversationTask> {
        self.tasks.get(conversation_id).map(|t| t.value().clone())
    }

    pub fn contains(&self, conversation_id: &str) -> bool {
        self.tasks.contains_key(conversation_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Scope-exit cleanup for a registered task.
///
/// Dropping the guard removes the entry, but only if it still belongs to this
/// task: a cancelled conversation may already have been claimed again.
pub struct TaskGuard {
    registry: Arc<ConversationRegistry>,
    conversation_id: String,
    task_id: Uuid,
    token: CancellationToken,
}

impl TaskGuard {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn task_id(&self) -> Uuid {
        self.task_id
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        let task_id = self.task_id;
        if self
            .registry
            .tasks
            .remove_if(&self.conversation_id, |_, t| t.task_id == task_id)
            .is_some()
        {
            debug!(conversation_id = %self.conversation_id, "Conversation task finished");
        }
    }
}
