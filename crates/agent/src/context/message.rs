//! Prioritized context messages.

use crate::context::token::estimate_tokens;
use marginalia_core::message::Role;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a message is, which fixes how hard pruning tries to keep it.
///
/// Priorities are compared by [`Priority::value`]; two kinds may share a
/// value (article metadata and visible content both sit at 8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    SystemInstruction,
    CurrentQuestion,
    ArticleMetadata,
    VisibleContent,
    ArticleContent,
    RecentExchange,
    CodeContext,
    HistoricalExchange,
    PeripheralInfo,
}

impl Priority {
    /// Retention weight. Higher is kept longer under pressure.
    pub const fn value(self) -> u8 {
        match self {
            Self::SystemInstruction => 10,
            Self::CurrentQuestion => 9,
            Self::ArticleMetadata | Self::VisibleContent => 8,
            Self::ArticleContent => 7,
            Self::RecentExchange => 6,
            Self::CodeContext => 5,
            Self::HistoricalExchange => 3,
            Self::PeripheralInfo => 1,
        }
    }

    /// Whether pruning must never drop a message of this priority.
    pub const fn is_critical(self) -> bool {
        self.value() >= Self::CurrentQuestion.value()
    }
}

/// One message held by a [`ContextStore`](crate::context::ContextStore).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub priority: Priority,
    /// Estimated tokens of `content`; 0 means "not computed yet".
    pub token_count: usize,
    /// Creation time, milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl ContextMessage {
    /// Create a message stamped now, with its token count computed.
    pub fn new(role: Role, content: impl Into<String>, priority: Priority) -> Self {
        let content = content.into();
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            token_count: estimate_tokens(&content),
            content,
            priority,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn system_instruction(content: impl Into<String>) -> Self {
        Self::new(Role::System, content, Priority::SystemInstruction)
    }

    pub fn question(content: impl Into<String>) -> Self {
        Self::new(Role::User, content, Priority::CurrentQuestion)
    }

    /// An assistant reply from the current exchange.
    pub fn reply(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content, Priority::RecentExchange)
    }

    /// Override the creation time.
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Fill in `token_count` if it was left at zero.
    pub(crate) fn ensure_token_count(&mut self) {
        if self.token_count == 0 {
            self.token_count = estimate_tokens(&self.content);
        }
    }
}
