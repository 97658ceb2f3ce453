//! Stream transports: how a session reaches the model.
//!
//! Both transports hand a session the same lazy, finite sequence of
//! [`TransportEvent`]s on a channel. Dropping the receiver is cancellation:
//! the relay task notices, drops its upstream handle, and the HTTP read is
//! aborted.

use async_trait::async_trait;
use marginalia_bridge::{ChannelBridge, ServerMessage, StreamOptions};
use marginalia_core::error::StreamError;
use marginalia_core::provider::{ModelSettings, Provider};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Default timeout when talking to the provider directly.
pub const DIRECT_TIMEOUT: Duration = Duration::from_secs(120);

/// Default timeout when routed through the bridge.
pub const BRIDGE_TIMEOUT: Duration = Duration::from_secs(30);

const EVENT_CAPACITY: usize = 64;

/// One step of a stream as seen by a session.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Chunk(String),
    Complete,
    Error(StreamError),
}

/// What a session asks a transport to open.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub session_id: String,
    pub prompt: String,
    pub options: StreamOptions,
}

/// Opens streams for sessions.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    fn name(&self) -> &str;

    /// Timeout sessions use unless told otherwise.
    fn default_timeout(&self) -> Duration;

    /// Open a stream. Errors here mean nothing was streamed at all.
    async fn open(
        &self,
        request: TransportRequest,
    ) -> Result<mpsc::Receiver<TransportEvent>, StreamError>;
}

/// Streams straight from a provider in this process.
pub struct ProviderTransport {
    provider: Arc<dyn Provider>,
    defaults: ModelSettings,
    timeout: Duration,
}

impl ProviderTransport {
    pub fn new(provider: Arc<dyn Provider>, defaults: ModelSettings) -> Self {
        Self {
            provider,
            defaults,
            timeout: DIRECT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl StreamTransport for ProviderTransport {
    fn name(&self) -> &str {
        "direct"
    }

    fn default_timeout(&self) -> Duration {
        self.timeout
    }

    async fn open(
        &self,
        request: TransportRequest,
    ) -> Result<mpsc::Receiver<TransportEvent>, StreamError> {
        let mut provider_request = request
            .options
            .resolve(&self.defaults)
            .request(request.prompt, request.options.system_prompt.as_deref());
        provider_request.stream = true;

        let mut chunks = self.provider.stream(provider_request).await?;
        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
        let session_id = request.session_id;

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = tx.closed() => {
                        debug!(session_id = %session_id, "Session gone; dropping provider stream");
                        return;
                    }
                    item = chunks.recv() => match item {
                        Some(Ok(chunk)) => {
                            if let Some(text) = chunk.content.filter(|t| !t.is_empty()) {
                                if tx.send(TransportEvent::Chunk(text)).await.is_err() {
                                    return;
                                }
                            }
                            if !chunk.done {
                                continue;
                            }
                            TransportEvent::Complete
                        }
                        Some(Err(e)) => TransportEvent::Error(e.into()),
                        None => TransportEvent::Error(StreamError::Transport(
                            "provider stream ended without completion".into(),
                        )),
                    }
                };
                let _ = tx.send(event).await;
                return;
            }
        });

        Ok(rx)
    }
}

/// Streams through a [`ChannelBridge`] to whatever executor serves it.
pub struct BridgeTransport {
    bridge: ChannelBridge,
    timeout: Duration,
}

impl BridgeTransport {
    pub fn new(bridge: ChannelBridge) -> Self {
        Self {
            bridge,
            timeout: BRIDGE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl StreamTransport for BridgeTransport {
    fn name(&self) -> &str {
        "bridge"
    }

    fn default_timeout(&self) -> Duration {
        self.timeout
    }

    async fn open(
        &self,
        request: TransportRequest,
    ) -> Result<mpsc::Receiver<TransportEvent>, StreamError> {
        let mut port = self.bridge.connect(request.session_id.clone()).await?;
        port.send_request(request.prompt, request.options).await?;

        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);

        // The port moves into the relay; dropping it disconnects the session.
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = tx.closed() => {
                        debug!(session_id = %port.session_id(), "Session gone; disconnecting bridge port");
                        return;
                    }
                    message = port.recv() => match message {
                        Ok(Some(ServerMessage::Chunk { chunk, .. })) => {
                            if tx.send(TransportEvent::Chunk(chunk)).await.is_err() {
                                return;
                            }
                            continue;
                        }
                        Ok(Some(ServerMessage::Complete)) => TransportEvent::Complete,
                        Ok(Some(error @ ServerMessage::Error { .. })) => {
                            let err = error.as_stream_error().unwrap_or_else(|| {
                                StreamError::Transport("malformed error message".into())
                            });
                            TransportEvent::Error(err)
                        }
                        // Executor left after its terminal message.
                        Ok(None) => return,
                        Err(e) => {
                            warn!(session_id = %port.session_id(), error = %e, "Bridge disconnected mid-stream");
                            TransportEvent::Error(e.into())
                        }
                    }
                };
                let _ = tx.send(event).await;
                return;
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marginalia_bridge::BridgeExecutor;
    use marginalia_core::error::ProviderError;
    use marginalia_core::message::Message;
    use marginalia_core::provider::{ChunkReceiver, ProviderRequest, ProviderResponse, StreamChunk};

    struct ScriptedProvider(Vec<Result<StreamChunk, ProviderError>>);

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            Ok(ProviderResponse {
                message: Message::assistant(""),
                usage: None,
                model: request.model,
            })
        }

        async fn stream(&self, _request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
            let (tx, rx) = mpsc::channel(16);
            let script = self.0.clone();
            tokio::spawn(async move {
                for item in script {
                    if tx.send(item).await.is_err() {
                        break;
                    }
                }
            });
            Ok(rx)
        }
    }

    fn request(id: &str) -> TransportRequest {
        TransportRequest {
            session_id: id.into(),
            prompt: "Explain".into(),
            options: StreamOptions::default(),
        }
    }

    async fn drain(mut rx: mpsc::Receiver<TransportEvent>) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn defaults() -> ModelSettings {
        ModelSettings::new("m", 0.7, None)
    }

    #[tokio::test]
    async fn direct_transport_relays_and_completes() {
        let provider = Arc::new(ScriptedProvider(vec![
            Ok(StreamChunk::text("Hi")),
            Ok(StreamChunk::text("")),
            Ok(StreamChunk::text(" there")),
            Ok(StreamChunk::finished()),
        ]));
        let transport = ProviderTransport::new(provider, defaults());
        assert_eq!(transport.default_timeout(), DIRECT_TIMEOUT);

        let events = drain(transport.open(request("d1")).await.unwrap()).await;
        assert_eq!(
            events,
            vec![
                TransportEvent::Chunk("Hi".into()),
                TransportEvent::Chunk(" there".into()),
                TransportEvent::Complete,
            ]
        );
    }

    #[tokio::test]
    async fn direct_transport_maps_provider_errors() {
        let provider = Arc::new(ScriptedProvider(vec![
            Ok(StreamChunk::text("Hi")),
            Err(ProviderError::ApiError {
                status_code: 401,
                message: "expired".into(),
            }),
        ]));
        let transport = ProviderTransport::new(provider, defaults());
        let events = drain(transport.open(request("d1")).await.unwrap()).await;
        assert_eq!(
            events.last(),
            Some(&TransportEvent::Error(StreamError::Auth("expired".into())))
        );
    }

    #[tokio::test]
    async fn bridge_transport_end_to_end() {
        let provider = Arc::new(ScriptedProvider(vec![
            Ok(StreamChunk::text("via ")),
            Ok(StreamChunk::text("bridge")),
            Ok(StreamChunk::finished()),
        ]));
        let (bridge, incoming) = ChannelBridge::new(8);
        BridgeExecutor::new(provider, defaults()).spawn(incoming);
        let transport = BridgeTransport::new(bridge.clone());
        assert_eq!(transport.default_timeout(), BRIDGE_TIMEOUT);

        let events = drain(transport.open(request("b1")).await.unwrap()).await;
        assert_eq!(
            events,
            vec![
                TransportEvent::Chunk("via ".into()),
                TransportEvent::Chunk("bridge".into()),
                TransportEvent::Complete,
            ]
        );
    }

    #[tokio::test]
    async fn bridge_disconnect_before_completion_is_transport_error() {
        let (bridge, mut incoming) = ChannelBridge::new(8);
        let transport = BridgeTransport::new(bridge.clone());

        let server = tokio::spawn(async move {
            let mut port = incoming.recv().await.unwrap();
            port.request().await.unwrap();
            port.deliver(ServerMessage::chunk("half")).await;
            // Port dropped here without a terminal message.
        });

        let events = drain(transport.open(request("b1")).await.unwrap()).await;
        server.await.unwrap();
        assert_eq!(events[0], TransportEvent::Chunk("half".into()));
        assert!(matches!(
            events.last(),
            Some(TransportEvent::Error(StreamError::Transport(_)))
        ));
    }

    #[tokio::test]
    async fn dropping_the_receiver_releases_the_bridge_session() {
        let (bridge, mut incoming) = ChannelBridge::new(8);
        let transport = BridgeTransport::new(bridge.clone());
        let rx = transport.open(request("b1")).await.unwrap();
        let port = incoming.recv().await.unwrap();

        drop(rx);
        port.closed().await;
        assert!(!bridge.registry().is_active("b1"));
    }

    #[tokio::test]
    async fn duplicate_bridge_session_is_invalid_state() {
        let (bridge, _incoming) = ChannelBridge::new(8);
        let transport = BridgeTransport::new(bridge.clone());
        let _first = transport.open(request("same")).await.unwrap();
        let err = transport.open(request("same")).await.unwrap_err();
        assert!(matches!(err, StreamError::InvalidState(_)));
    }
}
