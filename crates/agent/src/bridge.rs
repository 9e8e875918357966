//! Remote command bridge: rendezvous between an outbound tool request and the
//! caller's inbound result.
//!
//! Each outstanding call is keyed by a single-use correlation id. The
//! orchestrator suspends on [`RemoteCommandBridge::wait`] until the result
//! arrives, the deadline passes, or the conversation is cancelled. A late or
//! duplicate resolution is a no-op.
//!
//! Calls also record the task that issued them. A stopped conversation can be
//! claimed again before its old task has unwound, so cleanup is per task.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result submitted by the caller for a remote tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteResult {
    #[serde(default)]
    pub output: String,

    #[serde(default = "default_success")]
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

fn default_success() -> bool {
    true
}

impl RemoteResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            success: true,
            data: None,
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            success: false,
            data: None,
        }
    }
}

/// How a pending call ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteResolution {
    Resolved(RemoteResult),
    TimedOut,
    Cancelled,
}

impl RemoteResolution {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Resolved(_) => "resolved",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }
}

struct PendingCall {
    conversation_id: String,
    task_id: Uuid,
    tool: String,
    sender: oneshot::Sender<RemoteResult>,
    created_at: Instant,
}

/// Correlates remote tool requests with their results.
#[derive(Default)]
pub struct RemoteCommandBridge {
    pending: DashMap<String, PendingCall>,
}

impl RemoteCommandBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending call and return its correlation id.
    pub fn invoke(
        &self,
        conversation_id: &str,
        task_id: Uuid,
        tool: &str,
    ) -> (String, oneshot::Receiver<RemoteResult>) {
        let request_id = uuid::Uuid::new_v4().to_string();
        let (sender, receiver) = oneshot::channel();
        self.pending.insert(
            request_id.clone(),
            PendingCall {
                conversation_id: conversation_id.to_string(),
                task_id,
                tool: tool.to_string(),
                sender,
                created_at: Instant::now(),
            },
        );
        debug!(conversation_id, request_id = %request_id, tool, "Remote call pending");
        (request_id, receiver)
    }

    /// Deliver a result. Returns false for unknown, already resolved, or
    /// foreign-conversation ids.
    pub fn resolve(&self, conversation_id: &str, request_id: &str, result: RemoteResult) -> bool {
        let Some((_, call)) = self
            .pending
            .remove_if(request_id, |_, call| call.conversation_id == conversation_id)
        else {
            debug!(conversation_id, request_id, "Ignoring result for unknown remote call");
            return false;
        };
        info!(
            conversation_id,
            request_id,
            tool = %call.tool,
            success = result.success,
            elapsed_ms = call.created_at.elapsed().as_millis() as u64,
            "Remote call resolved"
        );
        call.sender.send(result).is_ok()
    }

    /// Suspend until the call resolves, times out, or `cancel` fires.
    ///
    /// The correlation entry is always gone when this returns.
    pub async fn wait(
        &self,
        request_id: &str,
        receiver: oneshot::Receiver<RemoteResult>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> RemoteResolution {
        let resolution = tokio::select! {
            biased;
            _ = cancel.cancelled() => RemoteResolution::Cancelled,
            received = tokio::time::timeout(timeout, receiver) => match received {
                Ok(Ok(result)) => RemoteResolution::Resolved(result),
                // Sender dropped: the entry was discarded by a cancellation.
                Ok(Err(_)) => RemoteResolution::Cancelled,
                Err(_) => {
                    warn!(request_id, timeout_secs = timeout.as_secs(), "Remote call timed out");
                    RemoteResolution::TimedOut
                }
            },
        };
        self.pending.remove(request_id);
        resolution
    }

    /// Drop a pending call without resolving it.
    pub fn discard(&self, request_id: &str) -> bool {
        self.pending.remove(request_id).is_some()
    }

    /// Drop every pending call issued by one task. Returns how many were dropped.
    pub fn cancel_task(&self, task_id: Uuid) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, call| call.task_id != task_id);
        let dropped = before.saturating_sub(self.pending.len());
        if dropped > 0 {
            debug!(task_id = %task_id, dropped, "Discarded pending remote calls");
        }
        dropped
    }

    pub fn is_pending(&self, request_id: &str) -> bool {
        self.pending.contains_key(request_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
