use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::ConfigError;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Listen bindings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which transports the daemon listens on. Each binding is independent;
/// any subset may be enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    /// Unix-domain socket path. Peer identity is the connecting user id.
    #[serde(default = "d_local_socket")]
    pub local: Option<PathBuf>,
    /// TCP with mutual TLS.
    #[serde(default)]
    pub tls: Option<TlsListen>,
    /// UDP with DTLS.
    #[serde(default)]
    pub dtls: Option<DtlsListen>,
    /// HTTP(S); one framed message per POST.
    #[serde(default)]
    pub http: Option<HttpListen>,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            local: d_local_socket(),
            tls: None,
            dtls: None,
            http: None,
        }
    }
}

impl ListenConfig {
    pub fn is_empty(&self) -> bool {
        self.local.is_none() && self.tls.is_none() && self.dtls.is_none() && self.http.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsListen {
    /// `host:port` to bind.
    pub addr: String,
    pub cert: PathBuf,
    pub key: PathBuf,
    /// CA bundle used to verify client certificates (mutual TLS).
    pub ca: PathBuf,
}

impl TlsListen {
    pub(super) fn validate(&self, section: &str) -> Result<(), ConfigError> {
        if self.addr.is_empty() {
            return Err(ConfigError::Invalid(format!("{section}.addr is empty")));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DtlsListen {
    pub addr: String,
    pub cert: PathBuf,
    pub key: PathBuf,
    pub ca: PathBuf,
    /// Path MTU for DTLS record sizing.
    #[serde(default = "d_mtu")]
    pub mtu: usize,
}

impl DtlsListen {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.mtu < 576 {
            return Err(ConfigError::Invalid(format!(
                "listen.dtls.mtu = {} is below the IPv4 minimum of 576",
                self.mtu
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpListen {
    pub addr: String,
    /// When set, serve HTTPS; `ca` additionally enables client-cert auth.
    #[serde(default)]
    pub cert: Option<PathBuf>,
    #[serde(default)]
    pub key: Option<PathBuf>,
    #[serde(default)]
    pub ca: Option<PathBuf>,
}

// ── serde default helpers ───────────────────────────────────────────

fn d_local_socket() -> Option<PathBuf> {
    Some(PathBuf::from("/var/run/netd.sock"))
}

fn d_mtu() -> usize {
    1400
}
