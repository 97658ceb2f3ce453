//! The channel bridge: one duplex channel per session id.
//!
//! `connect()` hands the requester a [`RequesterPort`] and queues the matching
//! [`ExecutorPort`] for whatever serves the bridge. Dropping either port is a
//! disconnect: its registry entry is released and the peer observes the
//! closed channel. The requester dropping its port is the only cancellation
//! signal there is.

use crate::protocol::{ServerMessage, StreamOptions, StreamRequest};
use crate::registry::SessionRegistry;
use marginalia_core::error::BridgeError;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Addressable duplex transport between requesters and an executor.
#[derive(Clone)]
pub struct ChannelBridge {
    registry: Arc<SessionRegistry>,
    executor_tx: mpsc::Sender<ExecutorPort>,
    capacity: usize,
}

impl ChannelBridge {
    /// Create a bridge. The returned receiver yields one [`ExecutorPort`]
    /// per connected session; hand it to the executor.
    ///
    /// `capacity` bounds the buffered server messages per session.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ExecutorPort>) {
        let (executor_tx, executor_rx) = mpsc::channel(capacity.max(1));
        let bridge = Self {
            registry: Arc::new(SessionRegistry::new()),
            executor_tx,
            capacity: capacity.max(1),
        };
        (bridge, executor_rx)
    }

    /// The registry of live sessions.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Open a session. Fails if the id is already live or nothing serves
    /// the bridge any more.
    pub async fn connect(&self, session_id: impl Into<String>) -> Result<RequesterPort, BridgeError> {
        let session_id = session_id.into();
        let generation = self.registry.register(&session_id)?;

        let (request_tx, request_rx) = mpsc::channel(1);
        let (message_tx, message_rx) = mpsc::channel(self.capacity);

        let requester = RequesterPort {
            session_id: session_id.clone(),
            generation,
            registry: self.registry.clone(),
            request_tx: Some(request_tx),
            messages: message_rx,
            finished: false,
        };

        let executor = ExecutorPort {
            session_id: session_id.clone(),
            generation,
            registry: self.registry.clone(),
            requests: request_rx,
            messages: message_tx,
            finished: false,
        };

        if self.executor_tx.send(executor).await.is_err() {
            warn!(session_id = %session_id, "No executor is serving the bridge");
            return Err(BridgeError::Disconnected(session_id));
        }

        debug!(session_id = %session_id, "Bridge session connected");
        Ok(requester)
    }
}

/// The requester's end of a session.
#[derive(Debug)]
pub struct RequesterPort {
    session_id: String,
    generation: u64,
    registry: Arc<SessionRegistry>,
    request_tx: Option<mpsc::Sender<StreamRequest>>,
    messages: mpsc::Receiver<ServerMessage>,
    finished: bool,
}

impl RequesterPort {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Send the session's one and only request.
    pub async fn send_request(
        &mut self,
        prompt: impl Into<String>,
        options: StreamOptions,
    ) -> Result<(), BridgeError> {
        let tx = self.request_tx.take().ok_or_else(|| {
            BridgeError::InvalidMessage(format!(
                "session '{}' already sent its request",
                self.session_id
            ))
        })?;

        let request = StreamRequest {
            prompt: prompt.into(),
            options,
            stream_id: self.session_id.clone(),
        };

        tx.send(request)
            .await
            .map_err(|_| BridgeError::Disconnected(self.session_id.clone()))
    }

    /// Receive the next server message.
    ///
    /// - `Ok(Some(_))`: a message, delivered in send order.
    /// - `Ok(None)`: the executor went away after a terminal message.
    /// - `Err(Disconnected)`: the executor went away before one.
    ///
    /// Nothing is yielded after a terminal message.
    pub async fn recv(&mut self) -> Result<Option<ServerMessage>, BridgeError> {
        if self.finished {
            return Ok(None);
        }

        match self.messages.recv().await {
            Some(message) => {
                if message.is_terminal() {
                    self.finished = true;
                }
                Ok(Some(message))
            }
            None => {
                debug!(session_id = %self.session_id, "Executor disconnected before completion");
                Err(BridgeError::Disconnected(self.session_id.clone()))
            }
        }
    }

    /// Whether a terminal message has been received.
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Drop for RequesterPort {
    fn drop(&mut self) {
        self.registry.release(&self.session_id, self.generation);
    }
}

/// The executor's end of a session.
#[derive(Debug)]
pub struct ExecutorPort {
    session_id: String,
    generation: u64,
    registry: Arc<SessionRegistry>,
    requests: mpsc::Receiver<StreamRequest>,
    messages: mpsc::Sender<ServerMessage>,
    finished: bool,
}

impl ExecutorPort {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Wait for the requester's request. `None` if it disconnected first.
    pub async fn request(&mut self) -> Option<StreamRequest> {
        self.requests.recv().await
    }

    /// Deliver a message to the requester.
    ///
    /// Never fails loudly: a dead requester or a message after the terminal
    /// one is logged and dropped. Returns whether the message was delivered.
    pub async fn deliver(&mut self, message: ServerMessage) -> bool {
        if self.finished {
            debug!(session_id = %self.session_id, "Dropping message after terminal signal");
            return false;
        }

        if message.is_terminal() {
            self.finished = true;
            self.registry.mark_finished(&self.session_id, self.generation);
        }

        match self.messages.send(message).await {
            Ok(()) => true,
            Err(_) => {
                debug!(session_id = %self.session_id, "Requester gone; dropping message");
                false
            }
        }
    }

    /// Resolves once the requester has disconnected.
    pub async fn closed(&self) {
        self.messages.closed().await
    }

    /// Whether the requester has disconnected.
    pub fn is_closed(&self) -> bool {
        self.messages.is_closed()
    }

    /// Whether a terminal message has been delivered.
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Drop for ExecutorPort {
    fn drop(&mut self) {
        self.registry.release(&self.session_id, self.generation);
    }
}
