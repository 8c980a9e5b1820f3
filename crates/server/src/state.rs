//! Shared server state, built once at startup and passed down.
//!
//! No process-wide singletons: everything a handler needs travels in
//! this struct behind an `Arc`.

use std::sync::Arc;
use std::time::Duration;

use netd_domain::{CapabilitySet, Config};
use netd_yang::SchemaRegistry;

use crate::backend::{BackendRegistry, NativeBackend};
use crate::sessions::SessionManager;
use crate::store::{BootError, DatastoreManager};

pub struct ServerState {
    pub registry: Arc<SchemaRegistry>,
    pub stores: Arc<DatastoreManager>,
    pub sessions: Arc<SessionManager>,
    pub backend: Arc<dyn NativeBackend>,
    /// server_base plus one YANG-library URI per loaded module.
    pub capabilities: CapabilitySet,
    pub confirm_timeout: Duration,
    pub max_frame: usize,
}

impl ServerState {
    pub async fn build(config: &Config) -> Result<Arc<Self>, BootError> {
        let registry = Arc::new(SchemaRegistry::bundled());
        let backend = BackendRegistry::builtin().select(config.backend.kind);
        let stores = Arc::new(
            DatastoreManager::boot(
                registry.clone(),
                config.datastore.startup_path.clone(),
                backend.as_ref(),
            )
            .await?,
        );

        let mut capabilities = CapabilitySet::server_base();
        for uri in registry.capability_uris() {
            capabilities.insert(uri);
        }

        Ok(Arc::new(ServerState {
            registry,
            stores,
            sessions: Arc::new(SessionManager::new()),
            backend,
            capabilities,
            confirm_timeout: Duration::from_secs(config.datastore.confirm_timeout_secs),
            max_frame: config.limits.max_message_bytes,
        }))
    }

    /// State over an in-memory store, for tests.
    pub fn for_tests(
        backend: Arc<dyn NativeBackend>,
        startup_path: std::path::PathBuf,
    ) -> Arc<Self> {
        let registry = Arc::new(SchemaRegistry::bundled());
        let stores = Arc::new(DatastoreManager::in_memory(
            registry.clone(),
            startup_path,
        ));
        let mut capabilities = CapabilitySet::server_base();
        for uri in registry.capability_uris() {
            capabilities.insert(uri);
        }
        Arc::new(ServerState {
            registry,
            stores,
            sessions: Arc::new(SessionManager::new()),
            backend,
            capabilities,
            confirm_timeout: Duration::from_secs(600),
            max_frame: 16 * 1024 * 1024,
        })
    }
}
