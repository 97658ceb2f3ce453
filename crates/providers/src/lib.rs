//! LLM provider implementations for marginalia.
//!
//! All providers implement the `marginalia_core::Provider` trait and share
//! one SSE decoder ([`sse::StreamProtocolParser`]), so every upstream hands
//! back the same normalized text chunks.
//! The factory selects the correct provider based on configuration.

mod http;

pub mod anthropic;
pub mod factory;
pub mod openai_compat;
pub mod sse;

pub use anthropic::AnthropicProvider;
pub use factory::build_from_config;
pub use openai_compat::OpenAiCompatProvider;
pub use sse::{StreamEvent, StreamProtocolParser, extract_text, spawn_sse_pump};
