//! Forwards a validated conversation to the model and republishes the reply as
//! a stream of [`StreamEvent`]s.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use log::{error, info, warn};
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::ChatConfig;
use crate::error::{ApiError, ErrorKind};
use crate::model::{ChatModel, FragmentStream, ModelMessage, ModelRequest};
use crate::web::models::StreamEvent;
use crate::web::validate::Conversation;

pub type EventStream = BoxStream<'static, StreamEvent>;

#[derive(Clone)]
pub struct Relay {
    model: Arc<dyn ChatModel>,
    config: Arc<ChatConfig>,
}

impl Relay {
    pub fn new(model: Arc<dyn ChatModel>, config: Arc<ChatConfig>) -> Self {
        Self { model, config }
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Call the model and return its reply as events.
    ///
    /// Errors here happen before anything was streamed and become the HTTP
    /// status. Anything that goes wrong afterwards is reported in-band with a
    /// final [`StreamEvent::Error`].
    pub async fn open(&self, conversation: Conversation) -> Result<EventStream, ApiError> {
        let budget = self.config.relay_timeout;
        let deadline = Instant::now() + budget;
        let request = self.request_for(conversation);

        let upstream = match tokio::time::timeout_at(deadline, self.model.stream_chat(request)).await {
            Ok(Ok(upstream)) => upstream,
            Ok(Err(e)) => {
                error!("Provider refused chat request: {}", e);
                return Err(ApiError::from(e));
            }
            Err(_) => {
                warn!("Provider did not answer within {:?}", budget);
                return Err(ApiError::internal(timeout_message(budget)));
            }
        };

        info!("Relaying reply from {}", self.config.model);
        Ok(relay_events(upstream, deadline, budget))
    }

    fn request_for(&self, conversation: Conversation) -> ModelRequest {
        ModelRequest {
            model: self.config.model.clone(),
            system: self.config.system_prompt.clone(),
            messages: to_model_messages(conversation),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        }
    }
}

pub fn to_model_messages(conversation: Conversation) -> Vec<ModelMessage> {
    conversation
        .into_messages()
        .into_iter()
        .map(|message| ModelMessage {
            role: message.role,
            content: message.text(),
        })
        .collect()
}

fn timeout_message(budget: Duration) -> String {
    format!("Response exceeded the {}s time limit", budget.as_secs())
}

fn relay_events(mut upstream: FragmentStream, deadline: Instant, budget: Duration) -> EventStream {
    Box::pin(async_stream::stream! {
        let expired = tokio::time::sleep_until(deadline);
        tokio::pin!(expired);
        let mut started = false;
        let mut fragments = 0usize;

        loop {
            let next = tokio::select! {
                biased;
                _ = &mut expired => None,
                next = upstream.next() => Some(next),
            };

            match next {
                None => {
                    warn!("Relay exceeded {:?} after {} fragments", budget, fragments);
                    yield StreamEvent::Error {
                        error: ErrorKind::InternalError,
                        message: timeout_message(budget),
                    };
                    break;
                }
                Some(Some(Ok(fragment))) => {
                    if fragment.is_empty() {
                        continue;
                    }
                    if !started {
                        started = true;
                        yield StreamEvent::Start { message_id: Uuid::new_v4().to_string() };
                    }
                    fragments += 1;
                    yield StreamEvent::TextDelta { delta: fragment };
                }
                Some(Some(Err(e))) => {
                    error!("Provider failed mid-stream after {} fragments: {}", fragments, e);
                    let err = ApiError::from(e);
                    yield StreamEvent::Error { error: err.kind, message: err.message };
                    break;
                }
                Some(None) => {
                    info!("Reply complete after {} fragments", fragments);
                    yield StreamEvent::Finish;
                    break;
                }
            }
        }
    })
}
