//! Deterministic in-memory model for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use super::{ChatModel, FragmentStream, ModelRequest, ProviderError};

/// What a single fragment of a scripted reply does.
#[derive(Debug, Clone)]
pub enum Step {
    Text(String),
    /// Fail mid-stream with this provider status.
    Fail(u16),
    /// Never produce anything more.
    Hang,
}

/// Replays the same reply for every call, or refuses the call outright.
pub struct ScriptedModel {
    steps: Vec<Step>,
    refuse_with: Option<u16>,
    delay: Duration,
    calls: AtomicUsize,
    requests: Mutex<VecDeque<ModelRequest>>,
}

impl ScriptedModel {
    pub fn replying(fragments: &[&str]) -> Self {
        Self::from_steps(fragments.iter().map(|f| Step::Text(f.to_string())).collect())
    }

    pub fn from_steps(steps: Vec<Step>) -> Self {
        Self {
            steps,
            refuse_with: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(VecDeque::new()),
        }
    }

    pub fn refusing(status: u16) -> Self {
        Self {
            refuse_with: Some(status),
            ..Self::from_steps(Vec::new())
        }
    }

    /// Wait this long before accepting each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<ModelRequest> {
        self.requests.lock().unwrap().back().cloned()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn stream_chat(&self, request: ModelRequest) -> Result<FragmentStream, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push_back(request);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(status) = self.refuse_with {
            return Err(ProviderError::Status {
                status,
                message: "refused".to_string(),
            });
        }

        let steps = self.steps.clone();
        Ok(async_stream::stream! {
            for step in steps {
                tokio::task::yield_now().await;
                match step {
                    Step::Text(text) => yield Ok(text),
                    Step::Fail(status) => {
                        yield Err(ProviderError::Status { status, message: "failed".to_string() });
                        return;
                    }
                    Step::Hang => {
                        futures::future::pending::<()>().await;
                    }
                }
            }
        }
        .boxed())
    }
}
