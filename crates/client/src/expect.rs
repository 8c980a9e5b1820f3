//! Client-side reply expectations.
//!
//! Every outbound RPC registers an expectation keyed by
//! `(session-id, message-id)` with a TTL. A background reaper expires
//! stale entries; delivery, cancellation, expiry and session loss all
//! resolve the waiter exactly once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use netd_yang::Response;

/// Why an expectation resolved without a response.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ExpectFailure {
    #[error("timed out waiting for reply to message {message_id}")]
    Timeout { message_id: String },

    #[error("session lost: {0}")]
    SessionLost(String),

    #[error("expectation canceled")]
    Canceled,
}

type ExpectResult = Result<Response, ExpectFailure>;

struct Pending {
    created: Instant,
    ttl: Duration,
    tx: oneshot::Sender<ExpectResult>,
}

/// Waiter side of one registered expectation.
pub struct ExpectHandle {
    key: (u32, String),
    rx: oneshot::Receiver<ExpectResult>,
}

impl ExpectHandle {
    pub fn message_id(&self) -> &str {
        &self.key.1
    }

    /// Wait for resolution. The registry guarantees every registered
    /// expectation is resolved (delivery, expiry, cancel or session
    /// loss), so a dropped sender is a bug worth surfacing as `Canceled`.
    pub async fn wait(self) -> ExpectResult {
        self.rx.await.unwrap_or(Err(ExpectFailure::Canceled))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct ExpectationRegistry {
    pending: Mutex<HashMap<(u32, String), Pending>>,
}

impl ExpectationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an expectation. A second registration for the same
    /// `(session, message-id)` pair replaces the first and cancels its
    /// waiter; message-ids are monotonic, so this only happens on
    /// misuse.
    pub fn register(&self, session_id: u32, message_id: &str, ttl: Duration) -> ExpectHandle {
        let (tx, rx) = oneshot::channel();
        let key = (session_id, message_id.to_string());
        let previous = self.pending.lock().insert(
            key.clone(),
            Pending {
                created: Instant::now(),
                ttl,
                tx,
            },
        );
        if let Some(previous) = previous {
            tracing::warn!(session_id, message_id, "duplicate expectation replaced");
            let _ = previous.tx.send(Err(ExpectFailure::Canceled));
        }
        ExpectHandle { key, rx }
    }

    /// Route an inbound reply to its waiter. `false` means nothing was
    /// outstanding (late, duplicate or unsolicited reply).
    pub fn deliver(&self, session_id: u32, message_id: &str, response: Response) -> bool {
        let pending = self
            .pending
            .lock()
            .remove(&(session_id, message_id.to_string()));
        match pending {
            Some(pending) => {
                let _ = pending.tx.send(Ok(response));
                true
            }
            None => false,
        }
    }

    /// Drop an expectation. A reply arriving later is logged and
    /// discarded by `deliver` returning false.
    pub fn cancel(&self, handle: &ExpectHandle) {
        if let Some(pending) = self.pending.lock().remove(&handle.key) {
            let _ = pending.tx.send(Err(ExpectFailure::Canceled));
        }
    }

    /// Resolve everything belonging to a session; no expectation
    /// outlives its session.
    pub fn fail_session(&self, session_id: u32, reason: &str) -> usize {
        let mut pending = self.pending.lock();
        let keys: Vec<_> = pending
            .keys()
            .filter(|(sid, _)| *sid == session_id)
            .cloned()
            .collect();
        let count = keys.len();
        for key in keys {
            if let Some(p) = pending.remove(&key) {
                let _ = p.tx.send(Err(ExpectFailure::SessionLost(reason.to_string())));
            }
        }
        if count > 0 {
            tracing::warn!(session_id, failed = count, reason, "failed in-flight expectations");
        }
        count
    }

    /// Expire entries whose `created + ttl` has passed. Runs under the
    /// same lock as `deliver`, so the reaper can never race a delivery
    /// in progress.
    pub fn reap(&self, now: Instant) -> usize {
        let mut pending = self.pending.lock();
        let expired: Vec<_> = pending
            .iter()
            .filter(|(_, p)| now.duration_since(p.created) >= p.ttl)
            .map(|(k, _)| k.clone())
            .collect();
        let count = expired.len();
        for key in expired {
            if let Some(p) = pending.remove(&key) {
                tracing::warn!(
                    session_id = key.0,
                    message_id = %key.1,
                    "expectation expired"
                );
                let _ = p.tx.send(Err(ExpectFailure::Timeout {
                    message_id: key.1.clone(),
                }));
            }
        }
        count
    }

    pub fn active_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Background reaper at a bounded interval. Aborted by dropping the
    /// returned handle's task (the client does this on close).
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                registry.reap(Instant::now());
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netd_yang::RpcError;

    #[tokio::test]
    async fn deliver_wakes_waiter() {
        let registry = ExpectationRegistry::new();
        let handle = registry.register(1, "42", Duration::from_secs(8));
        assert!(registry.deliver(1, "42", Response::Ok));
        assert_eq!(handle.wait().await.unwrap(), Response::Ok);
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn unmatched_reply_is_dropped() {
        let registry = ExpectationRegistry::new();
        let _handle = registry.register(1, "42", Duration::from_secs(8));
        assert!(!registry.deliver(1, "43", Response::Ok));
        assert!(!registry.deliver(2, "42", Response::Ok));
        assert_eq!(registry.active_count(), 1);
    }

    #[tokio::test]
    async fn reap_expires_only_stale_entries() {
        let registry = ExpectationRegistry::new();
        let stale = registry.register(1, "1", Duration::from_millis(0));
        let fresh = registry.register(1, "2", Duration::from_secs(60));

        assert_eq!(registry.reap(Instant::now()), 1);
        assert!(matches!(
            stale.wait().await.unwrap_err(),
            ExpectFailure::Timeout { .. }
        ));
        assert_eq!(registry.active_count(), 1);

        // Late reply to the reaped id is not deliverable.
        assert!(!registry.deliver(1, "1", Response::Ok));
        // The fresh one still is.
        assert!(registry.deliver(1, "2", Response::Ok));
        assert!(fresh.wait().await.is_ok());
    }

    #[tokio::test]
    async fn cancel_then_late_reply() {
        let registry = ExpectationRegistry::new();
        let handle = registry.register(7, "9", Duration::from_secs(8));
        registry.cancel(&handle);
        assert_eq!(handle.wait().await.unwrap_err(), ExpectFailure::Canceled);
        assert!(!registry.deliver(7, "9", Response::Ok));
    }

    #[tokio::test]
    async fn fail_session_drains_only_that_session() {
        let registry = ExpectationRegistry::new();
        let a1 = registry.register(1, "1", Duration::from_secs(8));
        let a2 = registry.register(1, "2", Duration::from_secs(8));
        let b1 = registry.register(2, "1", Duration::from_secs(8));

        assert_eq!(registry.fail_session(1, "transport error"), 2);
        assert!(matches!(
            a1.wait().await.unwrap_err(),
            ExpectFailure::SessionLost(_)
        ));
        assert!(matches!(
            a2.wait().await.unwrap_err(),
            ExpectFailure::SessionLost(_)
        ));
        assert_eq!(registry.active_count(), 1);
        assert!(registry.deliver(2, "1", Response::error(RpcError::too_big())));
        assert!(matches!(b1.wait().await.unwrap(), Response::Errors(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn reaper_task_expires_within_bound() {
        let registry = Arc::new(ExpectationRegistry::new());
        let reaper = registry.spawn_reaper(Duration::from_secs(1));
        let handle = registry.register(1, "5", Duration::from_secs(8));

        // creation + ttl + reap interval
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(registry.active_count(), 0);
        assert!(matches!(
            handle.wait().await.unwrap_err(),
            ExpectFailure::Timeout { .. }
        ));
        reaper.abort();
    }
}
