//! Live-session registry.
//!
//! Sessions are owned by their tasks; this registry holds observer-only
//! entries (id, peer, transport label, cancellation token) so
//! `kill-session` and shutdown can reach into other tasks without
//! touching their transports.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

pub struct SessionEntry {
    pub id: u32,
    pub peer: String,
    pub transport: &'static str,
    pub created_at: DateTime<Utc>,
    cancel: CancellationToken,
}

#[derive(Default)]
pub struct SessionManager {
    next_id: AtomicU32,
    sessions: RwLock<HashMap<u32, SessionEntry>>,
}

impl SessionManager {
    pub fn new() -> Self {
        SessionManager {
            // Session ids are positive.
            next_id: AtomicU32::new(1),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Allocate the next session id; unique for the process lifetime.
    pub fn allocate_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn register(
        &self,
        id: u32,
        peer: String,
        transport: &'static str,
        cancel: CancellationToken,
    ) {
        tracing::info!(session_id = id, peer = %peer, transport, "session registered");
        self.sessions.write().insert(
            id,
            SessionEntry {
                id,
                peer,
                transport,
                created_at: Utc::now(),
                cancel,
            },
        );
    }

    pub fn remove(&self, id: u32) {
        if self.sessions.write().remove(&id).is_some() {
            tracing::info!(session_id = id, "session removed");
        }
    }

    /// Force-close another session by cancelling its transport; its
    /// task observes the cancellation and tears itself down.
    pub fn kill(&self, id: u32) -> bool {
        let sessions = self.sessions.read();
        match sessions.get(&id) {
            Some(entry) => {
                tracing::warn!(session_id = id, peer = %entry.peer, "killing session");
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: u32) -> bool {
        self.sessions.read().contains_key(&id)
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Cancel everything (shutdown path).
    pub fn kill_all(&self) {
        for entry in self.sessions.read().values() {
            entry.cancel.cancel();
        }
    }
}
