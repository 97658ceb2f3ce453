//! `ReadingAssistant`: a context store and a transport behind one `ask()`.

use crate::context::{ContextBudget, ContextMessage, ContextStore};
use crate::session::{SessionOptions, StreamOutput, StreamSession};
use crate::transport::StreamTransport;
use marginalia_config::AppConfig;
use marginalia_core::error::StreamError;
use std::sync::Arc;
use tracing::info;

/// Instructions used when none are configured.
pub const DEFAULT_INSTRUCTIONS: &str = "You are a reading assistant. \
Answer the reader's questions about the article in the context. \
Be accurate and concise, and say so when the article does not cover something.";

/// Answers questions about one article, keeping the conversation in budget.
pub struct ReadingAssistant {
    store: ContextStore,
    transport: Arc<dyn StreamTransport>,
    instructions: Option<String>,
    options: SessionOptions,
}

impl ReadingAssistant {
    pub fn new(transport: Arc<dyn StreamTransport>, budget: ContextBudget) -> Self {
        Self {
            store: ContextStore::new(budget),
            transport,
            instructions: Some(DEFAULT_INSTRUCTIONS.to_string()),
            options: SessionOptions::default(),
        }
    }

    /// Budget taken from the `[context]` section.
    pub fn from_config(transport: Arc<dyn StreamTransport>, config: &AppConfig) -> Self {
        Self::new(transport, ContextBudget::from(&config.context))
    }

    /// `None` renders prompts without an instructions block.
    pub fn with_instructions(mut self, instructions: Option<String>) -> Self {
        self.instructions = instructions;
        self
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> &ContextStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ContextStore {
        &mut self.store
    }

    pub fn set_article(
        &mut self,
        title: &str,
        raw_content: &str,
        url: Option<&str>,
        language: Option<&str>,
    ) {
        self.store.set_article_context(title, raw_content, url, language);
    }

    /// The prompt the next `ask()` would send, minus the new question.
    pub fn preview_prompt(&self) -> String {
        self.store.build_prompt(self.instructions.as_deref())
    }

    /// Ask a question and stream the answer through `on_chunk`.
    ///
    /// The question is recorded before sending. Any answer text that came
    /// back, partial or not, is recorded as a reply.
    pub async fn ask<F>(&mut self, question: &str, on_chunk: F) -> Result<StreamOutput, StreamError>
    where
        F: FnMut(&str) + Send,
    {
        let question = question.trim();
        if question.is_empty() {
            return Err(StreamError::InvalidState("question is empty".into()));
        }

        self.store.add_message(ContextMessage::question(question));
        let prompt = self.store.build_prompt(self.instructions.as_deref());

        let mut session = StreamSession::new(Arc::clone(&self.transport));
        let output = session.start(&prompt, on_chunk, self.options.clone()).await?;

        if !output.text.trim().is_empty() {
            self.store.add_message(ContextMessage::reply(output.text.trim()));
        }

        let stats = self.store.stats();
        info!(
            session_id = %session.id(),
            partial = output.is_partial(),
            context_tokens = stats.total_tokens,
            messages = stats.message_count,
            "Answer received"
        );

        Ok(output)
    }
}
