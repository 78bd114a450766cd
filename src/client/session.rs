use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use log::{debug, warn};
use tokio::sync::watch;

use super::{ChatTransport, ClientError};
use crate::web::models::{Message, Role, StreamEvent};

/// Where the current exchange stands. Input is only accepted in `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ready,
    Submitted,
    Streaming,
    Error,
}

/// Everything a UI needs to render a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub messages: Vec<Message>,
    pub status: Status,
    pub error: Option<ClientError>,
    // Bumped by `clear`; updates from an older exchange are dropped.
    generation: u64,
    // Set by `stop` while an exchange is in flight.
    stop_requested: bool,
}

impl Default for SessionView {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            status: Status::Ready,
            error: None,
            generation: 0,
            stop_requested: false,
        }
    }
}

impl SessionView {
    /// The assistant reply currently being written, if any.
    pub fn streaming_reply(&self) -> Option<&Message> {
        match self.status {
            Status::Streaming => self.messages.last().filter(|m| m.role == Role::Assistant),
            _ => None,
        }
    }
}

/// Result of [`ChatSession::send`] when nothing went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Blank text, or another exchange was still in flight.
    Ignored,
    Completed,
}

/// A conversation with the chat server.
///
/// Cloning yields another handle to the same session, so one task can drive
/// `send` while another calls `stop` or renders from `subscribe`.
pub struct ChatSession<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    transport: T,
    state: watch::Sender<SessionView>,
}

impl<T> Clone for ChatSession<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: ChatTransport + 'static> ChatSession<T> {
    pub fn new(transport: T) -> Self {
        let (state, _) = watch::channel(SessionView::default());
        Self {
            inner: Arc::new(Inner {
                transport,
                state,
            }),
        }
    }

    pub fn snapshot(&self) -> SessionView {
        self.inner.state.borrow().clone()
    }

    pub fn status(&self) -> Status {
        self.inner.state.borrow().status
    }

    pub fn messages(&self) -> Vec<Message> {
        self.inner.state.borrow().messages.clone()
    }

    pub fn last_error(&self) -> Option<ClientError> {
        self.inner.state.borrow().error.clone()
    }

    /// Receive a fresh view after every change.
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.inner.state.subscribe()
    }

    /// Send `text` as a user message and stream the reply into the session.
    ///
    /// The message is accepted (or ignored) before this returns, so a `stop`
    /// issued right after always reaches the new exchange, even when the
    /// returned future is spawned and has not been polled yet. The future
    /// resolves once the exchange is over. Failures are also recorded in the
    /// session view, where they stay until [`clear`](Self::clear).
    pub fn send(
        &self,
        text: &str,
    ) -> impl Future<Output = Result<Submission, ClientError>> + Send + 'static {
        let accepted = self.accept(text).map(|(generation, history)| {
            let guard = ExchangeGuard {
                session: self.clone(),
                generation,
                armed: true,
            };
            (guard, history)
        });

        async move {
            let Some((mut guard, history)) = accepted else {
                return Ok(Submission::Ignored);
            };
            let session = guard.session.clone();
            let generation = guard.generation;

            let mut updates = session.subscribe();
            let stopped = async move {
                let _ = updates
                    .wait_for(|view| view.stop_requested || view.generation != generation)
                    .await;
            };

            let outcome = tokio::select! {
                biased;
                _ = stopped => Err(ClientError::Cancelled),
                outcome = session.exchange(&history, generation) => outcome,
            };

            guard.armed = false;
            session.finish(generation, outcome.clone());
            outcome.map(|()| Submission::Completed)
        }
    }

    /// Push the user message if the session is `Ready`.
    fn accept(&self, text: &str) -> Option<(u64, Vec<Message>)> {
        if text.trim().is_empty() {
            return None;
        }

        let mut accepted = None;
        self.inner.state.send_if_modified(|view| {
            if view.status != Status::Ready {
                return false;
            }
            view.messages.push(Message::user(text));
            view.status = Status::Submitted;
            view.error = None;
            view.stop_requested = false;
            accepted = Some((view.generation, view.messages.clone()));
            true
        });
        if accepted.is_none() {
            debug!("Ignoring submission while an exchange is in flight");
        }
        accepted
    }

    /// Abort the in-flight exchange, keeping whatever text already arrived.
    pub fn stop(&self) {
        self.inner.state.send_if_modified(|view| {
            let busy = matches!(view.status, Status::Submitted | Status::Streaming);
            if !busy || view.stop_requested {
                return false;
            }
            view.stop_requested = true;
            true
        });
    }

    /// Abort anything in flight and start over with an empty conversation.
    pub fn clear(&self) {
        self.inner.state.send_modify(|view| {
            *view = SessionView {
                generation: view.generation + 1,
                ..SessionView::default()
            };
        });
    }

    async fn exchange(&self, history: &[Message], generation: u64) -> Result<(), ClientError> {
        let mut events = self.inner.transport.open(history).await?;
        let mut finished = false;

        while let Some(event) = events.next().await {
            match event? {
                StreamEvent::Start { message_id } => {
                    self.update(generation, |view| open_reply(view, Some(message_id)));
                }
                StreamEvent::TextDelta { delta } => {
                    self.update(generation, |view| {
                        if view.status != Status::Streaming {
                            open_reply(view, None);
                        }
                        if let Some(reply) = view.messages.last_mut() {
                            reply.append_text(&delta);
                        }
                    });
                }
                StreamEvent::Error { error, message } => {
                    return Err(ClientError::Aborted {
                        kind: error,
                        message,
                    });
                }
                StreamEvent::Finish => finished = true,
            }
        }

        if finished {
            Ok(())
        } else {
            Err(ClientError::Interrupted)
        }
    }

    fn update(&self, generation: u64, apply: impl FnOnce(&mut SessionView)) {
        self.inner.state.send_if_modified(|view| {
            if view.generation != generation {
                return false;
            }
            apply(view);
            true
        });
    }

    fn finish(&self, generation: u64, outcome: Result<(), ClientError>) {
        match &outcome {
            Ok(()) => debug!("Exchange complete"),
            Err(e) => warn!("Exchange failed: {}", e),
        }
        self.update(generation, |view| {
            view.stop_requested = false;
            match outcome {
                Ok(()) => view.status = Status::Ready,
                Err(e) => {
                    view.status = Status::Error;
                    view.error = Some(e);
                }
            }
        });
    }
}

fn open_reply(view: &mut SessionView, id: Option<String>) {
    view.messages.push(Message::assistant_reply(id));
    view.status = Status::Streaming;
}

/// Marks the exchange cancelled if the `send` future is dropped before it
/// settles.
struct ExchangeGuard<T> {
    session: ChatSession<T>,
    generation: u64,
    armed: bool,
}

impl<T> Drop for ExchangeGuard<T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.session.inner.state.send_if_modified(|view| {
            let busy = matches!(view.status, Status::Submitted | Status::Streaming);
            if view.generation != self.generation || !busy {
                return false;
            }
            view.status = Status::Error;
            view.error = Some(ClientError::Cancelled);
            view.stop_requested = false;
            true
        });
    }
}
