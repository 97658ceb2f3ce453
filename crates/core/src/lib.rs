//! # marginalia core
//!
//! Domain types, traits, and error definitions shared by every marginalia
//! crate. Nothing in here performs I/O; the crate defines the model that
//! the provider, bridge and agent crates implement against.
//!
//! ## Layout
//!
//! - [`message`]: chat roles and provider-facing messages
//! - [`provider`]: the `Provider` trait plus request/response/chunk types
//! - [`error`]: the error taxonomy surfaced to callers

pub mod error;
pub mod message;
pub mod provider;

// Re-export key types at crate root for ergonomics
pub use error::{BridgeError, ProviderError, StreamError};
pub use message::{Message, Role};
pub use provider::{
    ChunkReceiver, ModelSettings, Provider, ProviderRequest, ProviderResponse, StaticToken,
    StreamChunk, TokenProvider, Usage,
};
