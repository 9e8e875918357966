//! The caller-facing event protocol.
//!
//! One ordered stream of `AgentStreamEvent`s per request, serialized as JSON
//! objects tagged with a kebab-case `type`. The gateway forwards them over SSE
//! or WebSocket unchanged.
//!
//! - `text-delta`             incremental answer text
//! - `activity`               visible but non-final reasoning content
//! - `audio-header` / `audio-chunk` / `audio-end`   spoken-output side channel
//! - `remote-command-request` the caller must run a tool and post a result
//! - `remote-command-pending` the stream is paused awaiting that result
//! - `error`                  fatal failure, always followed by `done`
//! - `done`                   terminal sentinel, always last

use relaymind_core::provider::Usage;
use relaymind_core::speech::AudioFormat;
use serde::{Deserialize, Serialize};

use crate::complexity::Tier;

/// What a piece of activity content is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Thinking,
    Reflection,
    /// A command is being executed
    Execution,
    /// A command result
    Output,
    /// The runtime asked the model for more reasoning
    Intervention,
    /// HIGH tier self-critique pass
    Review,
}

impl ActivityKind {
    /// Kinds whose content arrives as token fragments.
    pub fn is_streamed(self) -> bool {
        matches!(self, Self::Thinking | Self::Reflection)
    }
}

/// How an orchestration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Completed,
    Cancelled,
    Failed,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

/// Events emitted by the orchestrator during a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AgentStreamEvent {
    /// Incremental answer text.
    TextDelta { content: String },

    /// Reasoning visible to the caller but distinct from the answer.
    Activity {
        kind: ActivityKind,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step: Option<usize>,
    },

    /// Spoken output is starting; sent once before the first chunk.
    AudioHeader { format: AudioFormat },

    /// Base64-encoded audio, numbered from 0.
    AudioChunk { sequence: u64, data: String },

    /// No more audio for this request.
    AudioEnd { chunks: u64 },

    /// The caller must execute `tool` and submit a result keyed by `request_id`.
    RemoteCommandRequest {
        request_id: String,
        conversation_id: String,
        tool: String,
        arguments: serde_json::Value,
    },

    /// Orchestration is suspended until the result arrives or `timeout_secs` pass.
    RemoteCommandPending {
        request_id: String,
        tool: String,
        timeout_secs: u64,
    },

    /// Unrecoverable failure. Followed by `done` with outcome `failed`.
    Error { message: String },

    /// Terminal sentinel.
    Done {
        conversation_id: String,
        outcome: Outcome,
        tier: Tier,
        reasoning_steps: usize,
        commands_executed: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
}

impl AgentStreamEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TextDelta { .. } => "text-delta",
            Self::Activity { .. } => "activity",
            Self::AudioHeader { .. } => "audio-header",
            Self::AudioChunk { .. } => "audio-chunk",
            Self::AudioEnd { .. } => "audio-end",
            Self::RemoteCommandRequest { .. } => "remote-command-request",
            Self::RemoteCommandPending { .. } => "remote-command-pending",
            Self::Error { .. } => "error",
            Self::Done { .. } => "done",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. })
    }

    pub(crate) fn activity(kind: ActivityKind, content: impl Into<String>) -> Self {
        Self::Activity {
            kind,
            content: content.into(),
            step: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serialization_text_delta() {
        let event = AgentStreamEvent::TextDelta {
            content: "Hello".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"text-delta""#));
        assert!(json.contains(r#""content":"Hello""#));
    }

    #[test]
    fn event_serialization_remote_request() {
        let event = AgentStreamEvent::RemoteCommandRequest {
            request_id: "r1".into(),
            conversation_id: "c1".into(),
            tool: "get_system_info".into(),
            arguments: serde_json::json!({"detail": "full"}),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"remote-command-request""#));
        assert!(json.contains(r#""tool":"get_system_info""#));
    }

    #[test]
    fn event_serialization_done() {
        let event = AgentStreamEvent::Done {
            conversation_id: "abc".into(),
            outcome: Outcome::Cancelled,
            tier: Tier::Medium,
            reasoning_steps: 3,
            commands_executed: 1,
            usage: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"done""#));
        assert!(json.contains(r#""outcome":"cancelled""#));
        assert!(json.contains(r#""tier":"MEDIUM""#));
        assert!(!json.contains("usage"));
        assert!(event.is_terminal());
    }

    #[test]
    fn activity_kind_is_lowercase() {
        let event = AgentStreamEvent::Activity {
            kind: ActivityKind::Reflection,
            content: "hmm".into(),
            step: Some(2),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""kind":"reflection""#));
        assert!(json.contains(r#""step":2"#));
    }

    #[test]
    fn event_type_matches_serialized_tag() {
        let events = vec![
            AgentStreamEvent::TextDelta { content: "x".into() },
            AgentStreamEvent::activity(ActivityKind::Thinking, "x"),
            AgentStreamEvent::AudioHeader {
                format: AudioFormat::default(),
            },
            AgentStreamEvent::AudioChunk {
                sequence: 0,
                data: "AA==".into(),
            },
            AgentStreamEvent::AudioEnd { chunks: 1 },
            AgentStreamEvent::RemoteCommandPending {
                request_id: "r".into(),
                tool: "t".into(),
                timeout_secs: 1,
            },
            AgentStreamEvent::Error {
                message: "boom".into(),
            },
        ];
        for event in events {
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["type"], event.event_type());
        }
    }

    #[test]
    fn event_deserialization() {
        let json = r#"{"type":"text-delta","content":"hi"}"#;
        let event: AgentStreamEvent = serde_json::from_str(json).unwrap();
        match event {
            AgentStreamEvent::TextDelta { content } => assert_eq!(content, "hi"),
            _ => panic!("Wrong variant"),
        }
    }
}
