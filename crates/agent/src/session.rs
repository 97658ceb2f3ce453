//! One streamed request, end to end.
//!
//! ```text
//! Idle ──start()──▶ Requesting ──first chunk──▶ Streaming ──┬─▶ Completed
//!                        │                                  ├─▶ Failed
//!                        └──────────────────────────────────┴─▶ TimedOut
//! ```
//!
//! A session is single-use. Its state machine is the only thing that
//! decides termination: the first terminal transition wins, every later one
//! (a second timeout, a late error) is a no-op, and no chunk reaches the
//! callback after it.

use crate::transport::{StreamTransport, TransportEvent, TransportRequest};
use marginalia_bridge::StreamOptions;
use marginalia_core::error::StreamError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Requesting,
    Streaming,
    Completed,
    Failed,
    TimedOut,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }
}

/// Per-call options for [`StreamSession::start`].
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub stream: StreamOptions,
    /// Overrides the transport's default timeout.
    pub timeout: Option<Duration>,
}

/// What a session resolved with.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamOutput {
    /// Every chunk, concatenated in arrival order.
    pub text: String,
    /// Set when the stream broke after text had already been delivered.
    /// The text is then partial; show it and offer a retry.
    pub interruption: Option<StreamError>,
}

impl StreamOutput {
    pub fn is_partial(&self) -> bool {
        self.interruption.is_some()
    }
}

/// Drives one request through a [`StreamTransport`].
pub struct StreamSession {
    id: String,
    transport: Arc<dyn StreamTransport>,
    timeout: Duration,
    state: SessionState,
    chunks_delivered: usize,
}

impl StreamSession {
    pub fn new(transport: Arc<dyn StreamTransport>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timeout: transport.default_timeout(),
            transport,
            state: SessionState::Idle,
            chunks_delivered: 0,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn chunks_delivered(&self) -> usize {
        self.chunks_delivered
    }

    /// Move to a terminal state unless one was already reached.
    fn try_terminate(&mut self, next: SessionState) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = next;
        true
    }

    /// The timer path into `TimedOut`. Returns whether it took effect.
    pub fn fire_timeout(&mut self) -> bool {
        self.try_terminate(SessionState::TimedOut)
    }

    /// Stream `prompt`, calling `on_chunk` for each text delta in order.
    ///
    /// Resolves with the full text on completion. A transport failure or
    /// timeout after at least one chunk resolves with the partial text and
    /// the error in [`StreamOutput::interruption`]; with no chunks, or for
    /// auth and API errors, the error is returned.
    pub async fn start<F>(
        &mut self,
        prompt: &str,
        mut on_chunk: F,
        options: SessionOptions,
    ) -> Result<StreamOutput, StreamError>
    where
        F: FnMut(&str) + Send,
    {
        if self.state != SessionState::Idle {
            return Err(StreamError::InvalidState(format!(
                "session '{}' was already started ({:?})",
                self.id, self.state
            )));
        }

        self.state = SessionState::Requesting;
        let timeout = options.timeout.unwrap_or(self.timeout);
        let started = Instant::now();
        let deadline = tokio::time::sleep_until(started + timeout);
        tokio::pin!(deadline);

        debug!(session_id = %self.id, transport = %self.transport.name(), ?timeout, "Stream session started");

        let request = TransportRequest {
            session_id: self.id.clone(),
            prompt: prompt.to_string(),
            options: options.stream,
        };

        let opened = tokio::select! {
            _ = &mut deadline => None,
            opened = self.transport.open(request) => Some(opened),
        };

        let mut events = match opened {
            Some(Ok(events)) => events,
            Some(Err(err)) => return self.fail(String::new(), err, SessionState::Failed),
            None => return self.time_out(String::new(), started),
        };

        let mut text = String::new();
        loop {
            let event = tokio::select! {
                _ = &mut deadline => None,
                event = events.recv() => Some(event),
            };

            match event {
                None => return self.time_out(text, started),
                Some(Some(TransportEvent::Chunk(chunk))) => {
                    self.state = SessionState::Streaming;
                    self.chunks_delivered += 1;
                    on_chunk(&chunk);
                    text.push_str(&chunk);
                }
                Some(Some(TransportEvent::Complete)) => {
                    self.try_terminate(SessionState::Completed);
                    debug!(session_id = %self.id, chunks = self.chunks_delivered, "Stream session completed");
                    return Ok(StreamOutput {
                        text,
                        interruption: None,
                    });
                }
                Some(Some(TransportEvent::Error(err))) => {
                    return self.fail(text, err, SessionState::Failed);
                }
                Some(None) => {
                    let err = StreamError::Transport("transport closed without completion".into());
                    return self.fail(text, err, SessionState::Failed);
                }
            }
        }
    }

    fn time_out(&mut self, text: String, started: Instant) -> Result<StreamOutput, StreamError> {
        self.fire_timeout();
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.resolve(text, StreamError::Timeout { elapsed_ms })
    }

    fn fail(
        &mut self,
        text: String,
        err: StreamError,
        terminal: SessionState,
    ) -> Result<StreamOutput, StreamError> {
        self.try_terminate(terminal);
        self.resolve(text, err)
    }

    /// Apply the partial-result policy.
    fn resolve(&self, text: String, err: StreamError) -> Result<StreamOutput, StreamError> {
        let partial = self.chunks_delivered > 0
            && matches!(err, StreamError::Transport(_) | StreamError::Timeout { .. });

        warn!(
            session_id = %self.id,
            state = ?self.state,
            chunks = self.chunks_delivered,
            error = %err,
            partial,
            "Stream session ended early"
        );

        if partial {
            Ok(StreamOutput {
                text,
                interruption: Some(err),
            })
        } else {
            Err(err)
        }
    }
}
