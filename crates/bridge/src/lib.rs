//! Session-addressed channel bridge for marginalia.
//!
//! Carries one streaming request per session from a requester to the
//! privileged executor that owns the provider, and the resulting chunks
//! back. Many sessions run concurrently over the same bridge; each is
//! identified by its `streamId` and tracked in a [`SessionRegistry`].
//!
//! ```text
//! requester ── StreamRequest ──▶ ExecutorPort ──▶ BridgeExecutor ──▶ Provider
//!     ▲                                                      │
//!     └──────── Chunk* (Complete | Error) ◀──────────────────┘
//! ```

pub mod bridge;
pub mod executor;
pub mod protocol;
pub mod registry;

pub use bridge::{ChannelBridge, ExecutorPort, RequesterPort};
pub use executor::BridgeExecutor;
pub use protocol::{ServerMessage, StreamOptions, StreamRequest};
pub use registry::{SessionPhase, SessionRegistry};
