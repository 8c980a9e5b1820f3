use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Resource limits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Hard cap on a single framed NETCONF message. Messages larger than
    /// this fail with `too-big` before any partial parse.
    #[serde(default = "d_max_message_bytes")]
    pub max_message_bytes: usize,
    /// Bound on queued outbound messages per session. The session task
    /// suspends on a full queue; enqueue from elsewhere answers
    /// `resource-denied`.
    #[serde(default = "d_outbound_queue")]
    pub outbound_queue: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_bytes: d_max_message_bytes(),
            outbound_queue: d_outbound_queue(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_max_message_bytes() -> usize {
    16 * 1024 * 1024
}

fn d_outbound_queue() -> usize {
    1
}
