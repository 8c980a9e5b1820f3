use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client-side timeouts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// How long a registered reply expectation lives before it resolves
    /// with a timeout error.
    #[serde(default = "d_expect_ttl")]
    pub expect_ttl_secs: u64,
    /// How often the expectation reaper wakes.
    #[serde(default = "d_reap_interval")]
    pub reap_interval_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            expect_ttl_secs: d_expect_ttl(),
            reap_interval_secs: d_reap_interval(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_expect_ttl() -> u64 {
    8
}

fn d_reap_interval() -> u64 {
    1
}
