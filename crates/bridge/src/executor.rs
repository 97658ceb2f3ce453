//! The privileged side of the bridge.
//!
//! The executor owns the provider (and therefore the credentials). It serves
//! every [`ExecutorPort`] the bridge hands it on its own task: read the one
//! request, open the upstream stream, relay text chunks in arrival order,
//! finish with exactly one `Complete` or `Error`.

use crate::bridge::ExecutorPort;
use crate::protocol::{ServerMessage, StreamRequest};
use marginalia_core::error::StreamError;
use marginalia_core::provider::{ModelSettings, Provider, ProviderRequest};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Serves bridge sessions against one provider.
pub struct BridgeExecutor {
    provider: Arc<dyn Provider>,
    defaults: ModelSettings,
}

impl BridgeExecutor {
    /// `defaults` fill in whatever a request's options leave unset.
    pub fn new(provider: Arc<dyn Provider>, defaults: ModelSettings) -> Self {
        Self { provider, defaults }
    }

    /// Serve `incoming` on a background task until the bridge is dropped.
    pub fn spawn(self, incoming: mpsc::Receiver<ExecutorPort>) -> JoinHandle<()> {
        tokio::spawn(Arc::new(self).serve(incoming))
    }

    /// Accept ports until the bridge is dropped, one task per session.
    pub async fn serve(self: Arc<Self>, mut incoming: mpsc::Receiver<ExecutorPort>) {
        info!(provider = %self.provider.name(), "Bridge executor started");
        while let Some(port) = incoming.recv().await {
            let this = self.clone();
            tokio::spawn(async move { this.handle(port).await });
        }
        debug!("Bridge closed; executor stopping");
    }

    /// Run one session to its terminal message.
    pub async fn handle(&self, mut port: ExecutorPort) {
        let Some(request) = port.request().await else {
            debug!(session_id = %port.session_id(), "Requester left before sending a request");
            return;
        };

        if request.stream_id != port.session_id() {
            let err = StreamError::InvalidState(format!(
                "request for stream '{}' arrived on session '{}'",
                request.stream_id,
                port.session_id()
            ));
            warn!(session_id = %port.session_id(), "{err}");
            port.deliver(ServerMessage::error(&err)).await;
            return;
        }

        let provider_request = self.build_request(request);
        debug!(
            session_id = %port.session_id(),
            model = %provider_request.model,
            "Opening upstream stream"
        );

        let opened = tokio::select! {
            _ = port.closed() => {
                debug!(session_id = %port.session_id(), "Requester left while connecting");
                return;
            }
            opened = self.provider.stream(provider_request) => opened,
        };

        let mut chunks = match opened {
            Ok(chunks) => chunks,
            Err(e) => {
                let err = StreamError::from(e);
                warn!(session_id = %port.session_id(), error = %err, "Upstream stream failed to open");
                port.deliver(ServerMessage::error(&err)).await;
                return;
            }
        };

        loop {
            tokio::select! {
                // Dropping `chunks` stops the pump, which drops the HTTP body.
                _ = port.closed() => {
                    debug!(session_id = %port.session_id(), "Requester disconnected; cancelling upstream read");
                    return;
                }
                item = chunks.recv() => match item {
                    Some(Ok(chunk)) => {
                        if let Some(text) = chunk.content.filter(|t| !t.is_empty()) {
                            if !port.deliver(ServerMessage::chunk(text)).await {
                                return;
                            }
                        }
                        if chunk.done {
                            port.deliver(ServerMessage::Complete).await;
                            debug!(session_id = %port.session_id(), "Stream complete");
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        let err = StreamError::from(e);
                        warn!(session_id = %port.session_id(), error = %err, "Upstream stream failed");
                        port.deliver(ServerMessage::error(&err)).await;
                        return;
                    }
                    None => {
                        let err = StreamError::Transport("upstream stream ended without completion".into());
                        warn!(session_id = %port.session_id(), "{err}");
                        port.deliver(ServerMessage::error(&err)).await;
                        return;
                    }
                }
            }
        }
    }

    fn build_request(&self, request: StreamRequest) -> ProviderRequest {
        let mut provider_request = request
            .options
            .resolve(&self.defaults)
            .request(request.prompt, request.options.system_prompt.as_deref());
        provider_request.stream = true;
        provider_request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::ChannelBridge;
    use crate::protocol::StreamOptions;
    use async_trait::async_trait;
    use marginalia_core::error::ProviderError;
    use marginalia_core::message::Message;
    use marginalia_core::provider::{ChunkReceiver, ProviderResponse, StreamChunk};
    use std::sync::Mutex;

    /// Replays a fixed script of chunks and records the last request.
    struct ScriptedProvider {
        script: Vec<Result<StreamChunk, ProviderError>>,
        open_error: Option<ProviderError>,
        last_request: Mutex<Option<ProviderRequest>>,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<StreamChunk, ProviderError>>) -> Self {
            Self {
                script,
                open_error: None,
                last_request: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            _request: ProviderRequest,
        ) -> Result<ProviderResponse, ProviderError> {
            Ok(ProviderResponse {
                message: Message::assistant(""),
                usage: None,
                model: "scripted".into(),
            })
        }

        async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
            *self.last_request.lock().unwrap() = Some(request);
            if let Some(err) = &self.open_error {
                return Err(err.clone());
            }
            let (tx, rx) = mpsc::channel(16);
            let script = self.script.clone();
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

    fn defaults() -> ModelSettings {
        ModelSettings::new("test-model", 0.7, None)
    }

    async fn collect(
        bridge: &ChannelBridge,
        id: &str,
        options: StreamOptions,
    ) -> Vec<ServerMessage> {
        let mut port = bridge.connect(id).await.unwrap();
        port.send_request("Explain", options).await.unwrap();
        let mut out = Vec::new();
        while let Ok(Some(message)) = port.recv().await {
            out.push(message);
        }
        out
    }

    fn chunk_texts(messages: &[ServerMessage]) -> Vec<&str> {
        messages
            .iter()
            .filter_map(|m| match m {
                ServerMessage::Chunk { chunk, .. } => Some(chunk.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn relays_chunks_then_complete() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(StreamChunk::text("Hel")),
            Ok(StreamChunk::text("lo")),
            Ok(StreamChunk::finished()),
        ]));
        let (bridge, incoming) = ChannelBridge::new(8);
        BridgeExecutor::new(provider, defaults()).spawn(incoming);

        let messages = collect(&bridge, "s1", StreamOptions::default()).await;
        assert_eq!(chunk_texts(&messages), vec!["Hel", "lo"]);
        assert_eq!(messages.last(), Some(&ServerMessage::Complete));
    }

    #[tokio::test]
    async fn options_override_defaults() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(StreamChunk::finished())]));
        let (bridge, incoming) = ChannelBridge::new(8);
        let defaults = ModelSettings::new("default-model", 0.2, Some(100));
        BridgeExecutor::new(provider.clone(), defaults).spawn(incoming);

        let options = StreamOptions {
            model: Some("custom-model".into()),
            system_prompt: Some("Be brief".into()),
            ..StreamOptions::default()
        };
        collect(&bridge, "s1", options).await;

        let request = provider.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.model, "custom-model");
        assert_eq!(request.max_tokens, Some(100));
        assert!((request.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(request.messages[0].content, "Be brief");
        assert!(request.stream);
    }

    #[tokio::test]
    async fn auth_failure_keeps_its_code() {
        let mut provider = ScriptedProvider::new(vec![]);
        provider.open_error = Some(ProviderError::AuthenticationFailed("expired".into()));
        let (bridge, incoming) = ChannelBridge::new(8);
        BridgeExecutor::new(Arc::new(provider), defaults()).spawn(incoming);

        let messages = collect(&bridge, "s1", StreamOptions::default()).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0].as_stream_error(),
            Some(StreamError::Auth("expired".into()))
        );
    }

    #[tokio::test]
    async fn mid_stream_failure_after_chunks() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(StreamChunk::text("partial")),
            Err(ProviderError::StreamInterrupted("reset by peer".into())),
        ]));
        let (bridge, incoming) = ChannelBridge::new(8);
        BridgeExecutor::new(provider, defaults()).spawn(incoming);

        let messages = collect(&bridge, "s1", StreamOptions::default()).await;
        assert_eq!(chunk_texts(&messages), vec!["partial"]);
        assert!(matches!(
            messages.last().and_then(ServerMessage::as_stream_error),
            Some(StreamError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn upstream_ending_without_done_is_an_error() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(StreamChunk::text("cut"))]));
        let (bridge, incoming) = ChannelBridge::new(8);
        BridgeExecutor::new(provider, defaults()).spawn(incoming);

        let messages = collect(&bridge, "s1", StreamOptions::default()).await;
        assert!(messages.last().is_some_and(ServerMessage::is_terminal));
        assert!(messages.last().and_then(ServerMessage::as_stream_error).is_some());
    }

    #[tokio::test]
    async fn concurrent_sessions_do_not_mix() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(StreamChunk::text("a")),
            Ok(StreamChunk::text("b")),
            Ok(StreamChunk::finished()),
        ]));
        let (bridge, incoming) = ChannelBridge::new(8);
        BridgeExecutor::new(provider, defaults()).spawn(incoming);

        let (one, two) = tokio::join!(
            collect(&bridge, "one", StreamOptions::default()),
            collect(&bridge, "two", StreamOptions::default()),
        );
        assert_eq!(chunk_texts(&one), vec!["a", "b"]);
        assert_eq!(chunk_texts(&two), vec!["a", "b"]);
        assert!(bridge.registry().is_empty());
    }
}
