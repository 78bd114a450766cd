use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, info};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::json;

use super::{ChatModel, FragmentStream, ModelMessage, ModelRequest, ProviderError};
use crate::config::ProviderConfig;
use crate::sse;
use crate::web::models::Role;

// Provider error bodies can be large; only this much is kept for logs.
const MAX_ERROR_BODY: usize = 512;

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiModel {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
}

impl OpenAiModel {
    pub fn new(config: &ProviderConfig) -> Self {
        info!("Using chat completions API at: {}", config.base_url);

        Self {
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            client: Client::new(),
        }
    }

    fn payload(request: &ModelRequest) -> serde_json::Value {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if !request.system.is_empty() {
            messages.push(ModelMessage {
                role: Role::System,
                content: request.system.clone(),
            });
        }
        messages.extend(request.messages.iter().cloned());

        json!({
            "model": request.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": true
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiModel {
    async fn stream_chat(&self, request: ModelRequest) -> Result<FragmentStream, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(ProviderError::MissingCredential)?;

        let url = format!("{}/chat/completions", self.base_url);
        let payload = Self::payload(&request);

        info!(
            "Sending {} messages to {} with max_tokens: {}",
            request.messages.len(),
            request.model,
            request.max_tokens
        );
        debug!("Payload: {}", payload);

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let mut frames = Box::pin(sse::data_frames(response.bytes_stream()));

        Ok(Box::pin(async_stream::stream! {
            while let Some(frame) = frames.next().await {
                let data = match frame {
                    Ok(data) => data,
                    Err(e) => {
                        yield Err(ProviderError::Http(e));
                        return;
                    }
                };
                if data.trim() == sse::DONE {
                    return;
                }
                match parse_chunk(&data) {
                    Ok(Some(content)) => yield Ok(content),
                    Ok(None) => {}
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        }))
    }
}

async fn status_error(response: Response) -> ProviderError {
    let status = response.status().as_u16();
    let mut message = response.text().await.unwrap_or_default();
    if message.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        message.truncate(cut);
        message.push_str("... [truncated]");
    }
    ProviderError::Status { status, message }
}

/// Extract the text content of one streamed completion chunk, if it has any.
fn parse_chunk(data: &str) -> Result<Option<String>, ProviderError> {
    let chunk: StreamChunk =
        serde_json::from_str(data).map_err(|e| ProviderError::Decode(e.to_string()))?;
    let content: String = chunk
        .choices
        .into_iter()
        .filter_map(|choice| choice.delta.content)
        .collect();
    Ok(if content.is_empty() { None } else { Some(content) })
}
