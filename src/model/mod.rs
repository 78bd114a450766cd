//! The provider seam: something that turns a conversation into a stream of
//! generated text fragments.

mod openai;
#[cfg(test)]
pub(crate) mod scripted;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use openai::OpenAiModel;

use crate::web::models::Role;

/// Generated text, one fragment per item, in provider order.
pub type FragmentStream = BoxStream<'static, Result<String, ProviderError>>;

/// A message in the shape providers expect: one role, one flat text body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<ModelMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("no API key configured")]
    MissingCredential,

    #[error("provider returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed provider response: {0}")]
    Decode(String),
}

impl ProviderError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            ProviderError::MissingCredential | ProviderError::Status { status: 401, .. }
        )
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ProviderError::Status { status: 429, .. })
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Start a generation. Returns once the provider has accepted the request,
    /// before any text has been produced.
    async fn stream_chat(&self, request: ModelRequest) -> Result<FragmentStream, ProviderError>;
}
