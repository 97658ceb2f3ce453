//! The reading assistant's engine.
//!
//! A question travels through three layers:
//!
//! 1. **Context**: a [`ContextStore`] keeps the article and conversation
//!    inside a token budget and renders them into one prompt.
//! 2. **Transport**: a [`StreamTransport`] opens a stream, either straight
//!    to the provider or through the channel bridge.
//! 3. **Session**: a [`StreamSession`] drives that stream to exactly one
//!    outcome, under a timeout, delivering chunks in order.
//!
//! [`ReadingAssistant`] ties the three together; [`helpers`] covers the
//! one-shot, non-streaming calls.

pub mod assistant;
pub mod context;
pub mod helpers;
pub mod session;
pub mod transport;

pub use assistant::{DEFAULT_INSTRUCTIONS, ReadingAssistant};
pub use context::{
    ArticleContextInfo, ContextBudget, ContextMessage, ContextSnapshot, ContextStats, ContextStore,
    Priority, PromptBuilder, PruneReport, estimate_tokens,
};
pub use helpers::{answer_question, model_settings, summarize_text};
pub use session::{SessionOptions, SessionState, StreamOutput, StreamSession};
pub use transport::{
    BRIDGE_TIMEOUT, BridgeTransport, DIRECT_TIMEOUT, ProviderTransport, StreamTransport,
    TransportEvent, TransportRequest,
};
