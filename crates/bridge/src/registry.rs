//! Session registry: tracks every live bridge session by id.
//!
//! The registry is the one structure shared across sessions, so it sits on a
//! concurrent map. Each registration gets a fresh generation number; release
//! only removes the entry carrying that generation, so a port belonging to a
//! finished session can never evict a newer session that reused its id.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use marginalia_core::error::BridgeError;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Lifecycle of a registered session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Connected, no terminal message delivered yet.
    Open,
    /// A terminal message has been delivered.
    Finished,
}

#[derive(Debug)]
struct SessionEntry {
    generation: u64,
    phase: SessionPhase,
}

/// Concurrent map of live sessions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, SessionEntry>,
    next_generation: AtomicU64,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session id. Fails if the id is already live.
    pub fn register(&self, session_id: &str) -> Result<u64, BridgeError> {
        match self.sessions.entry(session_id.to_string()) {
            Entry::Occupied(_) => Err(BridgeError::DuplicateSession(session_id.to_string())),
            Entry::Vacant(slot) => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                slot.insert(SessionEntry {
                    generation,
                    phase: SessionPhase::Open,
                });
                debug!(session_id = %session_id, generation, "Registered bridge session");
                Ok(generation)
            }
        }
    }

    /// Record that a terminal message was delivered.
    pub fn mark_finished(&self, session_id: &str, generation: u64) {
        if let Some(mut entry) = self.sessions.get_mut(session_id) {
            if entry.generation == generation {
                entry.phase = SessionPhase::Finished;
            }
        }
    }

    /// Drop the entry for `session_id` if it still belongs to `generation`.
    ///
    /// Returns whether anything was removed; releasing twice is harmless.
    pub fn release(&self, session_id: &str, generation: u64) -> bool {
        let removed = self
            .sessions
            .remove_if(session_id, |_, entry| entry.generation == generation)
            .is_some();
        if removed {
            debug!(session_id = %session_id, generation, "Released bridge session");
        }
        removed
    }

    /// Current phase of a session, if it is registered.
    pub fn phase(&self, session_id: &str) -> Option<SessionPhase> {
        self.sessions.get(session_id).map(|entry| entry.phase)
    }

    /// Whether a session id is currently registered.
    pub fn is_active(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// All registered session ids.
    pub fn list(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
