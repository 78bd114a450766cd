use std::fmt::Display;
use std::future;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use log::debug;
use reqwest::Client;

use super::ClientError;
use crate::error::{ErrorBody, ErrorKind};
use crate::sse;
use crate::web::models::{ChatRequest, Message, StreamEvent};

pub type EventStream = BoxStream<'static, Result<StreamEvent, ClientError>>;

/// Opens one streamed exchange. Dropping the returned stream must release the
/// underlying connection.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn open(&self, messages: &[Message]) -> Result<EventStream, ClientError>;
}

/// Talks to a running server over HTTP.
pub struct HttpTransport {
    endpoint: String,
    client: Client,
}

impl HttpTransport {
    pub fn new(server_url: &str) -> Self {
        Self {
            endpoint: format!("{}/chat", server_url.trim_end_matches('/')),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn open(&self, messages: &[Message]) -> Result<EventStream, ClientError> {
        debug!("POST {} with {} messages", self.endpoint, messages.len());

        let response = self
            .client
            .post(&self.endpoint)
            .json(&ChatRequest { messages })
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(rejection(status.as_u16(), &body));
        }

        Ok(decode_events(response.bytes_stream()))
    }
}

fn rejection(status: u16, body: &str) -> ClientError {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody { error, message }) => ClientError::Rejected {
            status,
            kind: error,
            message,
        },
        Err(_) => ClientError::Rejected {
            status,
            kind: ErrorKind::from_status(status),
            message: body.trim().to_string(),
        },
    }
}

/// Decode an SSE response body into stream events, stopping at `[DONE]`.
pub fn decode_events<S, E>(bytes: S) -> EventStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    sse::data_frames(bytes)
        .take_while(|frame| future::ready(!matches!(frame, Ok(data) if data == sse::DONE)))
        .map(|frame| match frame {
            Ok(data) => serde_json::from_str::<StreamEvent>(&data)
                .map_err(|e| ClientError::Protocol(format!("{e}: {data}"))),
            Err(e) => Err(ClientError::Transport(e.to_string())),
        })
        .boxed()
}
