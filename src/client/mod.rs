//! Client side of the chat: a session controller that talks to `POST /chat`
//! and keeps the conversation a UI renders.

mod session;
mod transport;

use thiserror::Error;

use crate::error::ErrorKind;

pub use session::{ChatSession, SessionView, Status, Submission};
pub use transport::{decode_events, ChatTransport, EventStream, HttpTransport};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Transport(String),

    /// The server answered with an error status instead of a stream.
    #[error("server rejected the request ({status} {kind}): {message}")]
    Rejected {
        status: u16,
        kind: ErrorKind,
        message: String,
    },

    /// The server aborted a stream that had already started.
    #[error("reply aborted ({kind}): {message}")]
    Aborted { kind: ErrorKind, message: String },

    #[error("reply ended before it finished")]
    Interrupted,

    #[error("malformed stream event: {0}")]
    Protocol(String),

    #[error("reply cancelled")]
    Cancelled,
}
