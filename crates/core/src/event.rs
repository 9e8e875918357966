//! Domain event system: decoupled observation of the runtime.
//!
//! Events are published when something interesting happens inside an
//! orchestration. They are not the caller-facing event protocol; they feed
//! logs and operator views (the gateway exposes them at `/v1/logs`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    /// An orchestration task was registered and started streaming
    ConversationStarted {
        conversation_id: String,
        owner: String,
        agent_id: String,
        tier: String,
        timestamp: DateTime<Utc>,
    },

    /// An orchestration task reached a terminal state
    ConversationFinished {
        conversation_id: String,
        outcome: String,
        reasoning_steps: usize,
        timestamp: DateTime<Utc>,
    },

    /// A local command was executed
    CommandExecuted {
        conversation_id: String,
        command: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A remote tool call left the pending state
    RemoteCommandResolved {
        conversation_id: String,
        request_id: String,
        tool: String,
        /// "resolved", "timed_out" or "cancelled"
        resolution: String,
        timestamp: DateTime<Utc>,
    },

    /// The orchestrator rejected an early answer/execute and asked for more reasoning
    InterventionInjected {
        conversation_id: String,
        steps_taken: usize,
        steps_required: usize,
        timestamp: DateTime<Utc>,
    },

    /// An error occurred
    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
/// Slow subscribers lag and lose old events rather than blocking publishers.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::CommandExecuted {
            conversation_id: "c1".into(),
            command: "Search Files".into(),
            success: true,
            duration_ms: 42,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::CommandExecuted { command, success, .. } => {
                assert_eq!(command, "Search Files");
                assert!(success);
            }
            _ => panic!("Expected CommandExecuted event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::ErrorOccurred {
            context: "test".into(),
            error_message: "no subscribers".into(),
            timestamp: Utc::now(),
        });
    }

    #[test]
    fn events_serialize_with_tag() {
        let event = DomainEvent::InterventionInjected {
            conversation_id: "c1".into(),
            steps_taken: 1,
            steps_required: 3,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""event":"intervention_injected""#));
    }
}
