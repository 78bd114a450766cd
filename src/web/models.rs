use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "assistant")]
    Assistant,
    #[serde(rename = "system")]
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessagePart {
    Text { text: String },
    /// Any part type this server does not render; carried but ignored.
    #[serde(other)]
    Other,
}

/// One chat message. Only the trailing assistant message is ever modified,
/// by appending streamed text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireMessage")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub parts: Vec<MessagePart>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

// Accepts the shorthand `{ "role": "user", "text": "Hi" }` as well as the full form.
#[derive(Deserialize)]
struct WireMessage {
    id: Option<String>,
    role: Role,
    #[serde(default)]
    parts: Vec<MessagePart>,
    #[serde(alias = "content")]
    text: Option<String>,
    #[serde(rename = "createdAt")]
    created_at: Option<DateTime<Utc>>,
}

impl From<WireMessage> for Message {
    fn from(wire: WireMessage) -> Self {
        let mut parts = wire.parts;
        if let Some(text) = wire.text {
            parts.push(MessagePart::Text { text });
        }
        Self {
            id: wire.id.unwrap_or_else(new_id),
            role: wire.role,
            parts,
            created_at: wire.created_at.unwrap_or_else(Utc::now),
        }
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

impl Message {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            role,
            parts: vec![MessagePart::Text { text: text.into() }],
            created_at: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    /// An empty assistant message, opened when a reply starts streaming.
    pub fn assistant_reply(id: Option<String>) -> Self {
        Self {
            id: id.unwrap_or_else(new_id),
            role: Role::Assistant,
            parts: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// All text parts, concatenated in order.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                MessagePart::Text { text } => Some(text.as_str()),
                MessagePart::Other => None,
            })
            .collect()
    }

    pub fn append_text(&mut self, delta: &str) {
        if let Some(MessagePart::Text { text }) = self.parts.last_mut() {
            text.push_str(delta);
        } else {
            self.parts.push(MessagePart::Text {
                text: delta.to_string(),
            });
        }
    }
}

/// Body of `POST /chat`.
#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub messages: &'a [Message],
}

/// One frame of a streamed reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamEvent {
    /// Sent once, right before the first text fragment.
    Start {
        #[serde(rename = "messageId")]
        message_id: String,
    },
    TextDelta { delta: String },
    /// The reply was aborted after streaming had begun.
    Error { error: ErrorKind, message: String },
    Finish,
}

impl StreamEvent {
    pub fn to_json(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => json,
            Err(_) => r#"{"type":"error","error":"InternalError","message":"unencodable event"}"#
                .to_string(),
        }
    }
}
