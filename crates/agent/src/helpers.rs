//! Non-streaming helpers: one `complete()` round trip, no session.

use marginalia_config::AppConfig;
use marginalia_core::error::StreamError;
use marginalia_core::provider::{ModelSettings, Provider};
use tracing::debug;

const SUMMARY_INSTRUCTIONS: &str = "You summarize articles for a reader. \
Write a short, faithful summary of the text in plain prose. \
Do not add facts that are not in the text.";

const ANSWER_INSTRUCTIONS: &str = "You answer a reader's question about an article. \
Use only the supplied context. If the context does not contain the answer, say so.";

/// Model settings taken from the loaded configuration.
pub fn model_settings(config: &AppConfig) -> ModelSettings {
    ModelSettings::new(
        config.model.clone(),
        config.temperature,
        Some(config.max_response_tokens),
    )
}

/// Summarize `text` in one request.
pub async fn summarize_text(
    provider: &dyn Provider,
    text: &str,
    settings: &ModelSettings,
) -> Result<String, StreamError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(StreamError::InvalidState("nothing to summarize".into()));
    }

    let prompt = format!("Summarize the following text:\n\n{text}");
    complete(provider, prompt, SUMMARY_INSTRUCTIONS, settings).await
}

/// Answer `question` against `context` in one request.
pub async fn answer_question(
    provider: &dyn Provider,
    question: &str,
    context: &str,
    settings: &ModelSettings,
) -> Result<String, StreamError> {
    let question = question.trim();
    if question.is_empty() {
        return Err(StreamError::InvalidState("question is empty".into()));
    }

    let prompt = match context.trim() {
        "" => format!("Question: {question}"),
        context => format!("Context:\n{context}\n\nQuestion: {question}"),
    };
    complete(provider, prompt, ANSWER_INSTRUCTIONS, settings).await
}

async fn complete(
    provider: &dyn Provider,
    prompt: String,
    instructions: &str,
    settings: &ModelSettings,
) -> Result<String, StreamError> {
    let request = settings.request(prompt, Some(instructions));
    debug!(provider = %provider.name(), model = %request.model, "Sending completion request");

    let response = provider.complete(request).await?;
    Ok(response.message.content.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use marginalia_core::error::ProviderError;
    use marginalia_core::message::{Message, Role};
    use marginalia_core::provider::{ChunkReceiver, ProviderRequest, ProviderResponse};
    use std::sync::Mutex;

    /// Echoes a fixed reply and records the last request.
    struct RecordingProvider {
        reply: Result<String, ProviderError>,
        last: Mutex<Option<ProviderRequest>>,
    }

    impl RecordingProvider {
        fn replying(reply: &str) -> Self {
            Self {
                reply: Ok(reply.into()),
                last: Mutex::new(None),
            }
        }

        fn failing(err: ProviderError) -> Self {
            Self {
                reply: Err(err),
                last: Mutex::new(None),
            }
        }

        fn last_request(&self) -> ProviderRequest {
            self.last.lock().unwrap().clone().unwrap()
        }
    }

    #[async_trait]
    impl Provider for RecordingProvider {
        fn name(&self) -> &str {
            "recording"
        }

        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            let model = request.model.clone();
            *self.last.lock().unwrap() = Some(request);
            let content = self.reply.clone()?;
            Ok(ProviderResponse {
                message: Message::assistant(content),
                usage: None,
                model,
            })
        }

        async fn stream(&self, _request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
            Err(ProviderError::Network("streaming not scripted".into()))
        }
    }

    fn settings() -> ModelSettings {
        ModelSettings::new("summary-model", 0.2, Some(256))
    }

    #[tokio::test]
    async fn summarize_sends_one_request_and_trims_the_reply() {
        let provider = RecordingProvider::replying("  A short summary.\n");
        let summary = summarize_text(&provider, "Long text here.", &settings())
            .await
            .unwrap();
        assert_eq!(summary, "A short summary.");

        let request = provider.last_request();
        assert!(!request.stream);
        assert_eq!(request.model, "summary-model");
        assert_eq!(request.max_tokens, Some(256));
        assert_eq!(request.messages[0].role, Role::System);
        assert!(request.messages[1].content.ends_with("Long text here."));
    }

    #[tokio::test]
    async fn answer_includes_context_and_question() {
        let provider = RecordingProvider::replying("Paris.");
        let answer = answer_question(
            &provider,
            "Where is it set?",
            "The story takes place in Paris.",
            &settings(),
        )
        .await
        .unwrap();
        assert_eq!(answer, "Paris.");

        let prompt = &provider.last_request().messages[1].content;
        assert_eq!(
            prompt,
            "Context:\nThe story takes place in Paris.\n\nQuestion: Where is it set?"
        );
    }

    #[tokio::test]
    async fn blank_input_is_rejected_without_a_request() {
        let provider = RecordingProvider::replying("unused");
        let err = summarize_text(&provider, "   ", &settings()).await.unwrap_err();
        assert!(matches!(err, StreamError::InvalidState(_)));

        let err = answer_question(&provider, "", "ctx", &settings())
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::InvalidState(_)));
        assert!(provider.last.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn provider_errors_are_mapped() {
        let provider = RecordingProvider::failing(ProviderError::AuthenticationFailed(
            "bad key".into(),
        ));
        let err = summarize_text(&provider, "text", &settings()).await.unwrap_err();
        assert!(err.requires_reauth());
    }

    #[test]
    fn settings_from_config() {
        let config = AppConfig::default();
        let settings = model_settings(&config);
        assert_eq!(settings.model, config.model);
        assert_eq!(settings.max_tokens, Some(config.max_response_tokens));
    }
}
