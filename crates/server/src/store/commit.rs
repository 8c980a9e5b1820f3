//! The commit pipeline: candidate → running → backend, with confirmed
//! commits and rollback.
//!
//! Tree locks are never held across the backend apply: the pipeline
//! snapshots, releases, applies, then re-acquires to publish. A
//! dedicated async mutex serializes whole pipelines so two commits
//! cannot interleave around the suspension point.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use netd_yang::message::Commit as CommitRequest;
use netd_yang::tree::DataNode;
use netd_yang::{validate, Datastore, ErrorTag, ErrorType, Response, RpcError};

use crate::backend::NativeBackend;

use super::DatastoreManager;

/// A confirmed commit awaiting its confirming `commit`.
pub struct ConfirmedCommit {
    owner: u32,
    persist: Option<String>,
    /// Running as it was before the first confirmed commit in the
    /// chain; this is what an expiry reverts to.
    pre_image: DataNode,
    timer: JoinHandle<()>,
}

impl Drop for ConfirmedCommit {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

impl DatastoreManager {
    /// Execute `commit` (RFC 6241 §8.3/§8.4 for the confirmed
    /// variants): promote candidate to running, apply through the
    /// backend, revert on failure.
    pub async fn commit(
        self: &Arc<Self>,
        backend: Arc<dyn NativeBackend>,
        session: u32,
        request: CommitRequest,
        default_confirm_timeout: Duration,
    ) -> Result<Response, RpcError> {
        let _serial = self.commit_serial.lock().await;

        // Write intent on both stores; reads stay unrestricted.
        for store in [Datastore::Candidate, Datastore::Running] {
            if let Some(holder) = self.lock_holder(store) {
                if holder != session {
                    return Err(RpcError::new(ErrorType::Protocol, ErrorTag::InUse)
                        .with_message(format!("{store} is locked by session {holder}"))
                        .with_info("session-id", holder.to_string()));
                }
            }
        }

        // A bare commit first resolves any pending confirmed commit.
        let confirmed_base = self.take_pending_for(session, &request)?;

        let candidate = self.snapshot(Datastore::Candidate);
        let running_pre = self.snapshot(Datastore::Running);

        if candidate == running_pre && !request.confirmed {
            // Nothing staged; confirming an earlier confirmed commit is
            // already done above.
            return Ok(Response::Ok);
        }

        validate::validate_config_forest(&candidate.children, &self.registry)?;

        // No tree lock is held here: the apply may take a while.
        if let Err(apply) = backend.apply_diff(&running_pre, &candidate).await {
            tracing::warn!(session_id = session, error = %apply, "backend rejected commit");
            // Running was never touched, so the pre-commit state holds.
            return Err(
                RpcError::new(ErrorType::Application, ErrorTag::OperationFailed)
                    .with_message("backend refused to apply configuration")
                    .with_info("reason", apply.reason),
            );
        }

        self.publish(Datastore::Running, candidate.clone());
        tracing::info!(session_id = session, confirmed = request.confirmed, "commit applied");

        if request.confirmed {
            let timeout = Duration::from_secs(
                request
                    .confirm_timeout
                    .unwrap_or(default_confirm_timeout.as_secs()),
            );
            // A follow-up confirmed commit keeps the original pre-image
            // so expiry rewinds the whole chain.
            let pre_image = confirmed_base.unwrap_or(running_pre);
            self.arm_confirmed(
                backend,
                session,
                request.persist.clone(),
                pre_image,
                timeout,
            );
        }

        Ok(Response::Ok)
    }

    /// Take the pending confirmed commit if this request may confirm
    /// it. Returns its pre-image for re-arming when the request is
    /// itself confirmed.
    fn take_pending_for(
        &self,
        session: u32,
        request: &CommitRequest,
    ) -> Result<Option<DataNode>, RpcError> {
        let mut pending_slot = self.confirmed.lock();
        let Some(pending) = pending_slot.take() else {
            if request.persist_id.is_some() {
                return Err(RpcError::invalid_value(
                    "persist-id given but no confirmed commit is pending",
                ));
            }
            return Ok(None);
        };

        let authorized = match (&pending.persist, &request.persist_id) {
            (Some(token), Some(given)) => token == given,
            (Some(_), None) => pending.owner == session,
            (None, _) => pending.owner == session,
        };
        if !authorized {
            let owner = pending.owner;
            *pending_slot = Some(pending);
            return Err(RpcError::new(ErrorType::Protocol, ErrorTag::InUse)
                .with_message("a confirmed commit by another session is pending")
                .with_info("session-id", owner.to_string()));
        }

        tracing::debug!(session_id = session, "pending confirmed commit resolved");
        Ok(Some(pending.pre_image.clone()))
    }

    fn arm_confirmed(
        self: &Arc<Self>,
        backend: Arc<dyn NativeBackend>,
        session: u32,
        persist: Option<String>,
        pre_image: DataNode,
        timeout: Duration,
    ) {
        let manager = Arc::clone(self);
        let revert_image = pre_image.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            tracing::warn!(
                session_id = session,
                timeout_secs = timeout.as_secs(),
                "confirmed commit expired, reverting running"
            );
            manager.revert_running(&backend, revert_image).await;
        });

        let replaced = self.confirmed.lock().replace(ConfirmedCommit {
            owner: session,
            persist,
            pre_image,
            timer,
        });
        drop(replaced); // Drop aborts the superseded timer.
        tracing::info!(
            session_id = session,
            timeout_secs = timeout.as_secs(),
            "confirmed commit armed"
        );
    }

    /// Push `image` back into running and tell the backend. Used by
    /// confirmed-commit expiry and by session loss.
    async fn revert_running(self: &Arc<Self>, backend: &Arc<dyn NativeBackend>, image: DataNode) {
        let _serial = self.commit_serial.lock().await;
        let current = self.snapshot(Datastore::Running);
        if let Err(e) = backend.apply_diff(&current, &image).await {
            // The host keeps the unconfirmed config; the stores revert
            // regardless so the next commit reconciles.
            tracing::error!(error = %e, "backend failed to apply rollback");
        }
        self.publish(Datastore::Running, image.clone());
        self.publish(Datastore::Candidate, image);
    }

    /// Session teardown: a pending confirmed commit owned by the
    /// session reverts immediately unless a persist token detaches it
    /// from the session's lifetime.
    pub async fn abort_confirmed_for_session(
        self: &Arc<Self>,
        backend: &Arc<dyn NativeBackend>,
        session: u32,
    ) {
        let pending = {
            let mut slot = self.confirmed.lock();
            match &*slot {
                Some(p) if p.owner == session && p.persist.is_none() => slot.take(),
                _ => None,
            }
        };
        if let Some(pending) = pending {
            tracing::warn!(
                session_id = session,
                "session closed with unconfirmed commit, reverting"
            );
            self.revert_running(backend, pending.pre_image.clone()).await;
        }
    }

    /// Whether a confirmed commit is pending (used by tests and logs).
    pub fn confirmed_pending(&self) -> bool {
        self.confirmed.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use netd_yang::message::{DefaultOperation, EditConfig, ErrorOption, TestOption};
    use netd_yang::{xml, SchemaRegistry};

    const IF_NS: &str = "urn:ietf:params:xml:ns:yang:ietf-interfaces";

    fn manager() -> Arc<DatastoreManager> {
        let dir = tempfile::tempdir().unwrap();
        Arc::new(DatastoreManager::in_memory(
            Arc::new(SchemaRegistry::bundled()),
            dir.path().join("startup.xml"),
        ))
    }

    fn stage_eth0(manager: &DatastoreManager, enabled: &str) {
        let body = format!(
            r#"<interfaces xmlns="{IF_NS}"><interface><name>eth0</name><enabled>{enabled}</enabled></interface></interfaces>"#
        );
        let config = xml::parse(format!("<config>{body}</config>").as_bytes()).unwrap();
        manager
            .edit_config(
                1,
                &EditConfig {
                    target: Datastore::Candidate,
                    config,
                    default_operation: DefaultOperation::Merge,
                    error_option: ErrorOption::StopOnError,
                    test_option: TestOption::TestThenSet,
                },
            )
            .unwrap();
    }

    fn bare_commit() -> CommitRequest {
        CommitRequest::default()
    }

    #[tokio::test]
    async fn commit_promotes_candidate_and_applies() {
        let manager = manager();
        let backend: Arc<MemoryBackend> = Arc::new(MemoryBackend::new());
        stage_eth0(&manager, "true");

        let response = manager
            .commit(backend.clone(), 1, bare_commit(), Duration::from_secs(600))
            .await
            .unwrap();
        assert_eq!(response, Response::Ok);
        assert_eq!(backend.applied_count(), 1);
        assert_eq!(
            manager.snapshot(Datastore::Running),
            manager.snapshot(Datastore::Candidate)
        );
    }

    #[tokio::test]
    async fn failed_apply_leaves_running_bit_for_bit() {
        let manager = manager();
        let backend: Arc<MemoryBackend> = Arc::new(MemoryBackend::new());
        stage_eth0(&manager, "true");
        let pre = manager.snapshot(Datastore::Running);

        backend.reject_next("vrf limit exceeded");
        let err = manager
            .commit(backend.clone(), 1, bare_commit(), Duration::from_secs(600))
            .await
            .unwrap_err();
        assert_eq!(err.tag, ErrorTag::OperationFailed);
        assert!(err
            .info
            .iter()
            .any(|(k, v)| k == "reason" && v == "vrf limit exceeded"));
        assert_eq!(manager.snapshot(Datastore::Running), pre);
    }

    #[tokio::test]
    async fn commit_bounces_when_candidate_locked_elsewhere() {
        let manager = manager();
        let backend: Arc<MemoryBackend> = Arc::new(MemoryBackend::new());
        stage_eth0(&manager, "true");
        manager.lock(Datastore::Candidate, 9).unwrap();

        let err = manager
            .commit(backend, 1, bare_commit(), Duration::from_secs(600))
            .await
            .unwrap_err();
        assert_eq!(err.tag, ErrorTag::InUse);
    }

    #[tokio::test(start_paused = true)]
    async fn confirmed_commit_expiry_reverts() {
        let manager = manager();
        let backend: Arc<MemoryBackend> = Arc::new(MemoryBackend::new());
        let pre = manager.snapshot(Datastore::Running);
        stage_eth0(&manager, "true");

        let request = CommitRequest {
            confirmed: true,
            confirm_timeout: Some(5),
            persist: None,
            persist_id: None,
        };
        manager
            .commit(backend.clone(), 1, request, Duration::from_secs(600))
            .await
            .unwrap();
        assert!(manager.confirmed_pending());
        assert_ne!(manager.snapshot(Datastore::Running), pre);

        // No confirming commit arrives within the window.
        tokio::time::sleep(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;
        assert_eq!(manager.snapshot(Datastore::Running), pre);
        // The revert also went through the backend.
        assert_eq!(backend.applied_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn bare_commit_confirms_in_time() {
        let manager = manager();
        let backend: Arc<MemoryBackend> = Arc::new(MemoryBackend::new());
        stage_eth0(&manager, "true");
        let staged = manager.snapshot(Datastore::Candidate);

        let request = CommitRequest {
            confirmed: true,
            confirm_timeout: Some(5),
            persist: None,
            persist_id: None,
        };
        manager
            .commit(backend.clone(), 1, request, Duration::from_secs(600))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        manager
            .commit(backend.clone(), 1, bare_commit(), Duration::from_secs(600))
            .await
            .unwrap();
        assert!(!manager.confirmed_pending());

        // Long after the original window, running still holds.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(manager.snapshot(Datastore::Running), staged);
    }

    #[tokio::test(start_paused = true)]
    async fn persist_token_gates_cross_session_confirm() {
        let manager = manager();
        let backend: Arc<MemoryBackend> = Arc::new(MemoryBackend::new());
        stage_eth0(&manager, "true");

        let request = CommitRequest {
            confirmed: true,
            confirm_timeout: Some(300),
            persist: Some("tok-1".into()),
            persist_id: None,
        };
        manager
            .commit(backend.clone(), 1, request, Duration::from_secs(600))
            .await
            .unwrap();

        // Another session without the token is refused.
        let err = manager
            .commit(backend.clone(), 2, bare_commit(), Duration::from_secs(600))
            .await
            .unwrap_err();
        assert_eq!(err.tag, ErrorTag::InUse);

        // With the token it confirms, even though session 1 is gone.
        manager.abort_confirmed_for_session(&(backend.clone() as Arc<dyn NativeBackend>), 1).await;
        assert!(manager.confirmed_pending());
        let confirm = CommitRequest {
            confirmed: false,
            confirm_timeout: None,
            persist: None,
            persist_id: Some("tok-1".into()),
        };
        manager
            .commit(backend, 2, confirm, Duration::from_secs(600))
            .await
            .unwrap();
        assert!(!manager.confirmed_pending());
    }

    #[tokio::test]
    async fn session_loss_reverts_unpersisted_confirm() {
        let manager = manager();
        let backend: Arc<MemoryBackend> = Arc::new(MemoryBackend::new());
        let pre = manager.snapshot(Datastore::Running);
        stage_eth0(&manager, "true");

        let request = CommitRequest {
            confirmed: true,
            confirm_timeout: Some(600),
            persist: None,
            persist_id: None,
        };
        manager
            .commit(backend.clone(), 1, request, Duration::from_secs(600))
            .await
            .unwrap();

        let dyn_backend: Arc<dyn NativeBackend> = backend.clone();
        manager.abort_confirmed_for_session(&dyn_backend, 1).await;
        assert!(!manager.confirmed_pending());
        assert_eq!(manager.snapshot(Datastore::Running), pre);
    }
}
