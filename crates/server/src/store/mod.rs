//! The three configuration datastores and their lock discipline.
//!
//! `startup` is read-only in the protocol path (only `copy-config` may
//! target it, writing through to disk), `running` mirrors what the
//! backend applied, `candidate` is the staging tree. Reads clone a
//! consistent snapshot; writes take the entry's lock for their (sync)
//! duration. Nothing here suspends while holding a store lock.

pub mod commit;

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;

use netd_yang::edit::apply_edit;
use netd_yang::message::{EditConfig, ErrorOption, TestOption};
use netd_yang::tree::DataNode;
use netd_yang::{validate, Datastore, ErrorTag, ErrorType, Response, RpcError, SchemaRegistry};

use crate::backend::{ApplyError, NativeBackend};
use crate::startup::{self, StartupError};

#[derive(Debug, thiserror::Error)]
pub enum BootError {
    #[error("startup configuration: {0}")]
    Startup(#[from] StartupError),

    #[error("backend enumeration: {0}")]
    Backend(#[from] ApplyError),
}

struct StoreEntry {
    tree: DataNode,
    lock: Option<u32>,
}

impl StoreEntry {
    fn new(tree: DataNode) -> Self {
        StoreEntry { tree, lock: None }
    }

    /// Mutation by `session` requires the store be unlocked or locked
    /// by that same session. Reads are always permitted.
    fn check_writable(&self, session: u32) -> Result<(), RpcError> {
        match self.lock {
            Some(holder) if holder != session => Err(RpcError::lock_denied(holder)),
            _ => Ok(()),
        }
    }
}

fn empty_root() -> DataNode {
    DataNode::container("data")
}

pub struct DatastoreManager {
    registry: Arc<SchemaRegistry>,
    startup_path: PathBuf,
    running: RwLock<StoreEntry>,
    candidate: RwLock<StoreEntry>,
    startup: RwLock<StoreEntry>,
    /// Serializes commit pipelines (which must release the tree locks
    /// across the backend apply).
    commit_serial: tokio::sync::Mutex<()>,
    confirmed: parking_lot::Mutex<Option<commit::ConfirmedCommit>>,
}

impl DatastoreManager {
    /// Boot order: startup document if present, else a snapshot
    /// enumerated from the backend; running starts as startup and
    /// candidate as running.
    pub async fn boot(
        registry: Arc<SchemaRegistry>,
        startup_path: PathBuf,
        backend: &dyn NativeBackend,
    ) -> Result<Self, BootError> {
        let startup_tree = match startup::load(&startup_path, &registry)? {
            Some(tree) => tree,
            None => {
                tracing::info!("no startup document, seeding from backend enumeration");
                let mut root = empty_root();
                root.children = crate::backend::enumerate_to_forest(backend).await?;
                root
            }
        };

        Ok(DatastoreManager {
            registry,
            startup_path,
            running: RwLock::new(StoreEntry::new(startup_tree.clone())),
            candidate: RwLock::new(StoreEntry::new(startup_tree.clone())),
            startup: RwLock::new(StoreEntry::new(startup_tree)),
            commit_serial: tokio::sync::Mutex::new(()),
            confirmed: parking_lot::Mutex::new(None),
        })
    }

    /// In-memory manager for tests and embedded use.
    pub fn in_memory(registry: Arc<SchemaRegistry>, startup_path: PathBuf) -> Self {
        DatastoreManager {
            registry,
            startup_path,
            running: RwLock::new(StoreEntry::new(empty_root())),
            candidate: RwLock::new(StoreEntry::new(empty_root())),
            startup: RwLock::new(StoreEntry::new(empty_root())),
            commit_serial: tokio::sync::Mutex::new(()),
            confirmed: parking_lot::Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    fn entry(&self, store: Datastore) -> &RwLock<StoreEntry> {
        match store {
            Datastore::Running => &self.running,
            Datastore::Candidate => &self.candidate,
            Datastore::Startup => &self.startup,
        }
    }

    // ── snapshots ───────────────────────────────────────────────────

    /// Consistent deep copy of a store.
    pub fn snapshot(&self, store: Datastore) -> DataNode {
        self.entry(store).read().tree.clone()
    }

    pub(crate) fn publish(&self, store: Datastore, tree: DataNode) {
        self.entry(store).write().tree = tree;
    }

    // ── locks ───────────────────────────────────────────────────────

    pub fn lock(&self, store: Datastore, session: u32) -> Result<(), RpcError> {
        let mut entry = self.entry(store).write();
        match entry.lock {
            None => {
                entry.lock = Some(session);
                tracing::debug!(store = %store, session_id = session, "datastore locked");
                Ok(())
            }
            Some(holder) => Err(RpcError::lock_denied(holder)),
        }
    }

    pub fn unlock(&self, store: Datastore, session: u32) -> Result<(), RpcError> {
        let mut entry = self.entry(store).write();
        match entry.lock {
            Some(holder) if holder == session => {
                entry.lock = None;
                tracing::debug!(store = %store, session_id = session, "datastore unlocked");
                Ok(())
            }
            Some(holder) => Err(RpcError::lock_denied(holder)),
            None => Err(RpcError::operation_failed(format!(
                "{store} is not locked"
            ))),
        }
    }

    /// Locks held by a closing session evaporate with it.
    pub fn release_locks(&self, session: u32) {
        for store in [Datastore::Running, Datastore::Candidate, Datastore::Startup] {
            let mut entry = self.entry(store).write();
            if entry.lock == Some(session) {
                entry.lock = None;
                tracing::debug!(store = %store, session_id = session, "lock released on close");
            }
        }
    }

    pub fn lock_holder(&self, store: Datastore) -> Option<u32> {
        self.entry(store).read().lock
    }

    // ── edit-config ─────────────────────────────────────────────────

    /// Apply an edit to its target store. The caller has already
    /// checked capability gating; running-target backend propagation
    /// also lives with the caller.
    pub fn edit_config(&self, session: u32, edit: &EditConfig) -> Result<Response, RpcError> {
        if edit.target == Datastore::Startup {
            return Err(RpcError::new(ErrorType::Protocol, ErrorTag::AccessDenied)
                .with_message("startup is read-only; use copy-config"));
        }

        let mut entry = self.entry(edit.target).write();
        entry.check_writable(session)?;

        let continue_on_error = edit.error_option == ErrorOption::ContinueOnError;

        match edit.test_option {
            TestOption::TestOnly => {
                let mut scratch = entry.tree.clone();
                let errors = apply_edit(
                    &mut scratch,
                    &edit.config,
                    edit.default_operation,
                    continue_on_error,
                    &self.registry,
                );
                if errors.is_empty() {
                    Ok(Response::Ok)
                } else {
                    Ok(Response::Errors(errors))
                }
            }
            TestOption::TestThenSet => {
                let mut scratch = entry.tree.clone();
                let errors = apply_edit(
                    &mut scratch,
                    &edit.config,
                    edit.default_operation,
                    continue_on_error,
                    &self.registry,
                );
                if errors.is_empty() {
                    entry.tree = scratch;
                    Ok(Response::Ok)
                } else {
                    Ok(Response::Errors(errors))
                }
            }
            TestOption::Set => {
                // Direct set: stop-on-error leaves prior edits applied,
                // rollback-on-error restores the pre-image.
                let rollback = edit.error_option == ErrorOption::RollbackOnError;
                let pre_image = rollback.then(|| entry.tree.clone());
                let errors = apply_edit(
                    &mut entry.tree,
                    &edit.config,
                    edit.default_operation,
                    continue_on_error,
                    &self.registry,
                );
                if errors.is_empty() {
                    Ok(Response::Ok)
                } else {
                    if let Some(pre_image) = pre_image {
                        entry.tree = pre_image;
                    }
                    Ok(Response::Errors(errors))
                }
            }
        }
    }

    // ── copy / delete / discard / validate ──────────────────────────

    pub fn copy_config(
        &self,
        session: u32,
        source: Datastore,
        target: Datastore,
    ) -> Result<Response, RpcError> {
        if source == target {
            return Err(RpcError::invalid_value(format!(
                "copy-config source and target are both {source}"
            )));
        }
        let source_tree = self.snapshot(source);
        {
            let mut entry = self.entry(target).write();
            entry.check_writable(session)?;
            entry.tree = source_tree.clone();
        }
        if target == Datastore::Startup {
            startup::save(&self.startup_path, &source_tree)
                .map_err(|e| RpcError::operation_failed(e.to_string()))?;
        }
        tracing::info!(%source, %target, session_id = session, "copy-config");
        Ok(Response::Ok)
    }

    pub fn delete_config(&self, session: u32, target: Datastore) -> Result<Response, RpcError> {
        if target == Datastore::Running {
            return Err(RpcError::invalid_value(
                "delete-config of running is not permitted",
            ));
        }
        {
            let mut entry = self.entry(target).write();
            entry.check_writable(session)?;
            entry.tree = empty_root();
        }
        if target == Datastore::Startup {
            startup::save(&self.startup_path, &empty_root())
                .map_err(|e| RpcError::operation_failed(e.to_string()))?;
        }
        Ok(Response::Ok)
    }

    /// Restore candidate from a deep copy of running.
    pub fn discard_changes(&self, session: u32) -> Result<Response, RpcError> {
        let running = self.snapshot(Datastore::Running);
        let mut entry = self.candidate.write();
        entry.check_writable(session)?;
        entry.tree = running;
        Ok(Response::Ok)
    }

    /// Schema- and constraint-check a store.
    pub fn validate_store(&self, source: Datastore) -> Result<Response, RpcError> {
        let snapshot = self.snapshot(source);
        validate::validate_config_forest(&snapshot.children, &self.registry)?;
        Ok(Response::Ok)
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use netd_yang::message::DefaultOperation;
    use netd_yang::xml;

    const IF_NS: &str = "urn:ietf:params:xml:ns:yang:ietf-interfaces";

    fn manager() -> DatastoreManager {
        let dir = tempfile::tempdir().unwrap();
        DatastoreManager::in_memory(
            Arc::new(SchemaRegistry::bundled()),
            dir.path().join("startup.xml"),
        )
    }

    fn edit(target: Datastore, body: &str) -> EditConfig {
        let config = xml::parse(format!("<config>{body}</config>").as_bytes()).unwrap();
        EditConfig {
            target,
            config,
            default_operation: DefaultOperation::Merge,
            error_option: ErrorOption::StopOnError,
            test_option: TestOption::TestThenSet,
        }
    }

    fn eth0(enabled: &str) -> String {
        format!(
            r#"<interfaces xmlns="{IF_NS}"><interface><name>eth0</name><enabled>{enabled}</enabled></interface></interfaces>"#
        )
    }

    #[test]
    fn edit_candidate_leaves_running_untouched() {
        let manager = manager();
        let response = manager
            .edit_config(1, &edit(Datastore::Candidate, &eth0("true")))
            .unwrap();
        assert_eq!(response, Response::Ok);
        assert!(manager
            .snapshot(Datastore::Candidate)
            .child("interfaces")
            .is_some());
        assert!(manager
            .snapshot(Datastore::Running)
            .child("interfaces")
            .is_none());
    }

    #[test]
    fn lock_exclusivity_and_release() {
        let manager = manager();
        manager.lock(Datastore::Candidate, 1).unwrap();

        let err = manager.lock(Datastore::Candidate, 2).unwrap_err();
        assert_eq!(err.tag, ErrorTag::LockDenied);
        assert_eq!(err.info, vec![("session-id".to_string(), "1".to_string())]);

        // Writes by another session bounce; reads do not.
        let err = manager
            .edit_config(2, &edit(Datastore::Candidate, &eth0("true")))
            .unwrap_err();
        assert_eq!(err.tag, ErrorTag::LockDenied);
        let _ = manager.snapshot(Datastore::Candidate);

        // The holder may still edit.
        manager
            .edit_config(1, &edit(Datastore::Candidate, &eth0("true")))
            .unwrap();

        manager.release_locks(1);
        manager.lock(Datastore::Candidate, 2).unwrap();
        manager.unlock(Datastore::Candidate, 2).unwrap();
    }

    #[test]
    fn unlock_by_non_holder_is_denied() {
        let manager = manager();
        manager.lock(Datastore::Running, 1).unwrap();
        let err = manager.unlock(Datastore::Running, 2).unwrap_err();
        assert_eq!(err.tag, ErrorTag::LockDenied);

        let err = manager.unlock(Datastore::Candidate, 1).unwrap_err();
        assert_eq!(err.tag, ErrorTag::OperationFailed);
    }

    #[test]
    fn edit_startup_is_rejected() {
        let manager = manager();
        let err = manager
            .edit_config(1, &edit(Datastore::Startup, &eth0("true")))
            .unwrap_err();
        assert_eq!(err.tag, ErrorTag::AccessDenied);
    }

    #[test]
    fn test_only_reports_without_modifying() {
        let manager = manager();
        let mut spec = edit(Datastore::Candidate, &eth0("true"));
        spec.test_option = TestOption::TestOnly;
        assert_eq!(manager.edit_config(1, &spec).unwrap(), Response::Ok);
        assert!(manager
            .snapshot(Datastore::Candidate)
            .child("interfaces")
            .is_none());
    }

    #[test]
    fn rollback_on_error_restores_pre_image() {
        let manager = manager();
        manager
            .edit_config(1, &edit(Datastore::Candidate, &eth0("true")))
            .unwrap();

        // Two edits: one fine, one failing (delete of a missing entry),
        // in set mode with rollback.
        let body = format!(
            r#"<interfaces xmlns="{IF_NS}"><interface><name>eth0</name><enabled>false</enabled></interface><interface operation="delete"><name>eth9</name></interface></interfaces>"#
        );
        let mut spec = edit(Datastore::Candidate, &body);
        spec.test_option = TestOption::Set;
        spec.error_option = ErrorOption::RollbackOnError;

        let Response::Errors(errors) = manager.edit_config(1, &spec).unwrap() else {
            panic!("expected errors");
        };
        assert_eq!(errors[0].tag, ErrorTag::DataMissing);

        // The first (valid) half of the edit was rolled back too.
        let candidate = manager.snapshot(Datastore::Candidate);
        let entry = candidate
            .child("interfaces")
            .unwrap()
            .find_entry("interface", &[("name".into(), "eth0".into())])
            .unwrap();
        assert_eq!(entry.child_value("enabled"), Some("true"));
    }

    #[test]
    fn discard_restores_candidate_from_running() {
        let manager = manager();
        manager
            .edit_config(1, &edit(Datastore::Candidate, &eth0("true")))
            .unwrap();
        manager.discard_changes(1).unwrap();
        assert_eq!(
            manager.snapshot(Datastore::Candidate),
            manager.snapshot(Datastore::Running)
        );
    }

    #[test]
    fn copy_config_to_startup_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("startup.xml");
        let manager = DatastoreManager::in_memory(Arc::new(SchemaRegistry::bundled()), path.clone());

        manager
            .edit_config(1, &edit(Datastore::Candidate, &eth0("true")))
            .unwrap();
        manager
            .copy_config(1, Datastore::Candidate, Datastore::Startup)
            .unwrap();

        assert!(path.exists());
        let loaded = startup::load(&path, manager.registry()).unwrap().unwrap();
        assert!(loaded.child("interfaces").is_some());
        assert_eq!(manager.snapshot(Datastore::Startup), loaded);
    }

    #[test]
    fn delete_config_running_is_rejected() {
        let manager = manager();
        let err = manager.delete_config(1, Datastore::Running).unwrap_err();
        assert_eq!(err.tag, ErrorTag::InvalidValue);
        manager.delete_config(1, Datastore::Candidate).unwrap();
    }
}
