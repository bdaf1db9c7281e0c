//! Mining sessions.
//!
//! A session fences one mining round. Every message in the pipeline
//! carries the session id of the round that scheduled it; workers drop
//! anything tagged with a dead session, and a dead session's solutions
//! are never sealed.

use std::sync::{Arc, RwLock};

use alloy_primitives::B256;

/// Unique id of one mining round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(B256);

impl SessionId {
    /// A fresh random id.
    pub fn random() -> Self {
        Self(B256::from(rand::random::<[u8; 32]>()))
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

/// Immutable per-round state published to workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    /// Timestamp of the latest candidate refresh.
    pub timestamp: u64,
}

/// Single-writer cell the controller publishes the current session
/// through; workers read it on every message they fence.
#[derive(Debug, Clone)]
pub struct SessionTracker(Arc<RwLock<Arc<Session>>>);

impl SessionTracker {
    pub fn new(timestamp: u64) -> Self {
        let session = Session {
            id: SessionId::random(),
            timestamp,
        };
        Self(Arc::new(RwLock::new(Arc::new(session))))
    }

    /// The session as of now.
    pub fn current(&self) -> Arc<Session> {
        self.0
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Whether `id` names the live round.
    pub fn is_current(&self, id: SessionId) -> bool {
        self.current().id == id
    }

    /// Publish a refreshed timestamp for the same round.
    pub fn refresh(&self, timestamp: u64) {
        let mut cell = self
            .0
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let id = cell.id;
        *cell = Arc::new(Session { id, timestamp });
    }

    /// Invalidate the round: publish a fresh id. All in-flight work tagged
    /// with the old id is dead from here on.
    pub fn rotate(&self, timestamp: u64) -> SessionId {
        let id = SessionId::random();
        let mut cell = self
            .0
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *cell = Arc::new(Session { id, timestamp });
        id
    }
}
