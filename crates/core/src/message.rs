//! Message and Request domain types.
//!
//! These are the value objects that enter the runtime: a caller submits a
//! [`Request`] (ordered messages plus routing data), the orchestrator turns it
//! into provider calls and streams events back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::command::RemoteToolDescriptor;

/// Conversation id value that asks the runtime to create a new conversation.
pub const NEW_CONVERSATION: &str = "-";

/// Opaque identifier of a conversation owned by an external store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// System instructions (persona, tag protocol, command catalog)
    System,
}

/// One typed part of a message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image { url: String },
    Audio { url: String },
    File {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Who sent this message
    pub role: Role,

    /// Ordered content parts
    pub content: Vec<ContentPart>,

    /// Timestamp
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn with_role(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentPart::text(text)],
            timestamp: Utc::now(),
        }
    }

    /// Create a new user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::with_role(Role::User, text)
    }

    /// Create a new assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, text)
    }

    /// Create a new system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self::with_role(Role::System, text)
    }

    /// Concatenated text parts. Non-text parts are rendered as short
    /// reference markers so the model knows they exist.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for part in &self.content {
            let piece = match part {
                ContentPart::Text { text } => text.clone(),
                ContentPart::Image { url } => format!("[image: {url}]"),
                ContentPart::Audio { url } => format!("[audio: {url}]"),
                ContentPart::File { url, name } => match name {
                    Some(name) => format!("[file {name}: {url}]"),
                    None => format!("[file: {url}]"),
                },
            };
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&piece);
        }
        out
    }
}

/// An inbound orchestration request. Immutable once accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Ordered conversation messages, oldest first
    pub messages: Vec<Message>,

    /// Which agent profile handles this request
    pub agent_id: String,

    /// Existing conversation, or `None` / [`NEW_CONVERSATION`] to create one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    /// Whether the caller wants incremental events
    #[serde(default)]
    pub stream: bool,

    /// Tools the caller executes on its own device
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remote_tools: Vec<RemoteToolDescriptor>,
}

impl Request {
    /// Convenience constructor for a single user turn.
    pub fn single(agent_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(text)],
            agent_id: agent_id.into(),
            conversation_id: None,
            stream: true,
            remote_tools: Vec::new(),
        }
    }

    /// Resolve the conversation id, minting a fresh one for the sentinel.
    pub fn conversation_or_new(&self) -> ConversationId {
        match self.conversation_id.as_deref() {
            None | Some(NEW_CONVERSATION) | Some("") => ConversationId::new(),
            Some(id) => ConversationId::from(id),
        }
    }

    /// Text of the most recent user message (empty if there is none).
    pub fn latest_user_text(&self) -> String {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(Message::text)
            .unwrap_or_default()
    }

    /// Rough token estimate for the whole request (4 chars ≈ 1 token).
    pub fn estimated_tokens(&self) -> usize {
        self.messages.iter().map(|m| m.text().len() / 4).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_message() {
        let msg = Message::user("Hello, agent!");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.text(), "Hello, agent!");
    }

    #[test]
    fn text_renders_non_text_parts() {
        let msg = Message {
            role: Role::User,
            content: vec![
                ContentPart::text("look at this"),
                ContentPart::Image {
                    url: "https://example.com/cat.png".into(),
                },
            ],
            timestamp: Utc::now(),
        };
        let text = msg.text();
        assert!(text.starts_with("look at this"));
        assert!(text.contains("[image: https://example.com/cat.png]"));
    }

    #[test]
    fn sentinel_creates_new_conversation() {
        let mut req = Request::single("default", "hi");
        req.conversation_id = Some(NEW_CONVERSATION.into());
        let first = req.conversation_or_new();
        let second = req.conversation_or_new();
        assert_ne!(first, second);

        req.conversation_id = Some("conv-7".into());
        assert_eq!(req.conversation_or_new().as_str(), "conv-7");
    }

    #[test]
    fn latest_user_text_skips_assistant_turns() {
        let req = Request {
            messages: vec![
                Message::user("first"),
                Message::assistant("reply"),
                Message::user("second"),
                Message::assistant("another reply"),
            ],
            agent_id: "default".into(),
            conversation_id: None,
            stream: false,
            remote_tools: vec![],
        };
        assert_eq!(req.latest_user_text(), "second");
    }

    #[test]
    fn request_deserializes_with_defaults() {
        let json = r#"{"messages":[{"role":"user","content":[{"type":"text","text":"hey"}]}],"agent_id":"a1"}"#;
        let req: Request = serde_json::from_str(json).unwrap();
        assert!(!req.stream);
        assert!(req.remote_tools.is_empty());
        assert!(req.conversation_id.is_none());
        assert_eq!(req.latest_user_text(), "hey");
    }

    #[test]
    fn request_token_estimate() {
        // 20 chars ≈ 5 tokens
        let req = Request::single("a", "12345678901234567890");
        assert_eq!(req.estimated_tokens(), 5);
    }
}
