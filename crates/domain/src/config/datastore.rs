use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Datastores
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatastoreConfig {
    /// Where the startup configuration document lives on disk.
    #[serde(default = "d_startup_path")]
    pub startup_path: PathBuf,
    /// Default window for `<commit confirmed/>` before automatic revert.
    #[serde(default = "d_confirm_timeout")]
    pub confirm_timeout_secs: u64,
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            startup_path: d_startup_path(),
            confirm_timeout_secs: d_confirm_timeout(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_startup_path() -> PathBuf {
    PathBuf::from("/var/db/netd/startup.xml")
}

fn d_confirm_timeout() -> u64 {
    600
}
