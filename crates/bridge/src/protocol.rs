//! Wire messages exchanged over a bridge session.
//!
//! A requester sends exactly one [`StreamRequest`] and thereafter only
//! receives [`ServerMessage`]s: any number of `Chunk`s followed by at most
//! one terminal `Complete` or `Error`.

use marginalia_core::error::StreamError;
use marginalia_core::provider::ModelSettings;
use serde::{Deserialize, Serialize};

/// Per-request overrides. Unset fields fall back to the executor defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl StreamOptions {
    /// Overlay these options on `defaults`.
    pub fn resolve(&self, defaults: &ModelSettings) -> ModelSettings {
        ModelSettings {
            model: self.model.clone().unwrap_or_else(|| defaults.model.clone()),
            temperature: self.temperature.unwrap_or(defaults.temperature),
            max_tokens: self.max_tokens.or(defaults.max_tokens),
        }
    }
}

/// The single request a requester sends after connecting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRequest {
    pub prompt: String,
    #[serde(default)]
    pub options: StreamOptions,
    pub stream_id: String,
}

/// Messages flowing from the executor back to the requester.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// One text delta, stamped with the executor's wall clock (ms).
    Chunk { chunk: String, timestamp: i64 },

    /// The upstream stream ended normally.
    Complete,

    /// The upstream stream failed. `code` is [`StreamError::code`].
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl ServerMessage {
    /// A chunk stamped with the current time.
    pub fn chunk(text: impl Into<String>) -> Self {
        Self::Chunk {
            chunk: text.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// An error message carrying the typed error's wire code.
    pub fn error(err: &StreamError) -> Self {
        let error = match err {
            StreamError::Transport(msg) | StreamError::Auth(msg) | StreamError::InvalidState(msg) => {
                msg.clone()
            }
            StreamError::Api { message, .. } => message.clone(),
            StreamError::Timeout { .. } => err.to_string(),
        };
        Self::Error {
            error,
            code: Some(err.code().to_string()),
        }
    }

    /// `Complete` and `Error` end a session.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Chunk { .. })
    }

    /// Rebuild the typed error carried by an `Error` message.
    pub fn as_stream_error(&self) -> Option<StreamError> {
        match self {
            Self::Error { error, code } => Some(StreamError::from_code(code.as_deref(), error)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_uses_camel_case_on_the_wire() {
        let request = StreamRequest {
            prompt: "Summarize".into(),
            options: StreamOptions {
                max_tokens: Some(500),
                system_prompt: Some("Be brief".into()),
                ..StreamOptions::default()
            },
            stream_id: "s-1".into(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["streamId"], "s-1");
        assert_eq!(json["options"]["maxTokens"], 500);
        assert_eq!(json["options"]["systemPrompt"], "Be brief");
        assert!(json["options"].get("model").is_none());
    }

    #[test]
    fn request_without_options_parses() {
        let request: StreamRequest =
            serde_json::from_str(r#"{"prompt":"Hi","streamId":"abc"}"#).unwrap();
        assert_eq!(request.options, StreamOptions::default());
    }

    #[test]
    fn options_overlay_defaults() {
        let defaults = ModelSettings::new("base", 0.7, Some(1024));
        let options = StreamOptions {
            temperature: Some(0.1),
            ..StreamOptions::default()
        };
        let resolved = options.resolve(&defaults);
        assert_eq!(resolved.model, "base");
        assert_eq!(resolved.max_tokens, Some(1024));
        assert!((resolved.temperature - 0.1).abs() < f32::EPSILON);
    }

    #[test]
    fn server_messages_are_tagged() {
        let json = serde_json::to_value(ServerMessage::Complete).unwrap();
        assert_eq!(json, serde_json::json!({"type": "complete"}));

        let chunk: ServerMessage =
            serde_json::from_str(r#"{"type":"chunk","chunk":"Hel","timestamp":1}"#).unwrap();
        assert!(!chunk.is_terminal());
    }

    #[test]
    fn error_keeps_auth_across_the_wire() {
        let msg = ServerMessage::error(&StreamError::Auth("token expired".into()));
        let text = serde_json::to_string(&msg).unwrap();
        let back: ServerMessage = serde_json::from_str(&text).unwrap();

        assert!(back.is_terminal());
        assert_eq!(
            back.as_stream_error(),
            Some(StreamError::Auth("token expired".into()))
        );
    }

    #[test]
    fn error_without_code_is_transport() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"error","error":"socket closed"}"#).unwrap();
        assert_eq!(
            msg.as_stream_error(),
            Some(StreamError::Transport("socket closed".into()))
        );
    }
}
