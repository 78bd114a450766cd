//! Checks on an incoming `POST /chat` body, before any provider is contacted.

use serde::Deserialize;
use serde_json::Value;

use crate::error::ApiError;
use crate::web::models::{Message, Role};

pub const MISSING_MESSAGES: &str = "Messages array is required and must not be empty";
pub const NO_USER_MESSAGE: &str = "At least one user message is required";
pub const INVALID_JSON: &str = "Request body must be valid JSON";
pub const BODY_TOO_LARGE: &str = "Request body is too large";

/// Largest accepted `POST /chat` body; a whole conversation is resent every turn.
pub const MAX_BODY_BYTES: usize = 1 << 20;

/// A conversation that passed validation: non-empty, with at least one user
/// message. Only [`validate`] constructs it.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation(Vec<Message>);

impl Conversation {
    pub fn messages(&self) -> &[Message] {
        &self.0
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.0
    }
}

/// Validate a raw request body.
pub fn validate_body(body: &[u8]) -> Result<Conversation, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ApiError::bad_request(MISSING_MESSAGES));
    }
    let payload: Value =
        serde_json::from_slice(body).map_err(|_| ApiError::bad_request(INVALID_JSON))?;
    validate(&payload)
}

pub fn validate(payload: &Value) -> Result<Conversation, ApiError> {
    let raw = match payload.get("messages").and_then(Value::as_array) {
        Some(raw) if !raw.is_empty() => raw,
        _ => return Err(ApiError::bad_request(MISSING_MESSAGES)),
    };

    let messages = raw
        .iter()
        .map(Message::deserialize)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ApiError::bad_request(format!("Invalid message format: {e}")))?;

    if !messages.iter().any(|message| message.role == Role::User) {
        return Err(ApiError::bad_request(NO_USER_MESSAGE));
    }

    Ok(Conversation(messages))
}
