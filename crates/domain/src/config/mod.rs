//! Daemon and client configuration, loaded from a TOML file.
//!
//! Every section has serde defaults so an empty file (or a missing one)
//! yields a usable local-socket-only configuration.

mod backend;
mod client;
mod datastore;
mod limits;
mod listen;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use backend::{BackendConfig, BackendKind};
pub use client::ClientConfig;
pub use datastore::DatastoreConfig;
pub use limits::LimitsConfig;
pub use listen::{DtlsListen, HttpListen, ListenConfig, TlsListen};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("parse {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Root config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub datastore: DatastoreConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub backend: BackendConfig,
}

impl Config {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    source: e,
                })
            }
        };
        let config: Config = toml::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Cross-field checks that serde defaults cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.is_empty() {
            return Err(ConfigError::Invalid(
                "no listen binding configured (need at least one of \
                 listen.local, listen.tls, listen.dtls, listen.http)"
                    .into(),
            ));
        }
        if let Some(tls) = &self.listen.tls {
            tls.validate("listen.tls")?;
        }
        if let Some(dtls) = &self.listen.dtls {
            dtls.validate()?;
        }
        if let Some(http) = &self.listen.http {
            let given = [&http.cert, &http.key, &http.ca];
            if given.iter().any(|p| p.is_some()) && !given.iter().all(|p| p.is_some()) {
                return Err(ConfigError::Invalid(
                    "listen.http TLS needs all of cert, key and ca".into(),
                ));
            }
        }
        if self.limits.max_message_bytes < 1024 {
            return Err(ConfigError::Invalid(
                "limits.max_message_bytes must be at least 1024".into(),
            ));
        }
        if self.datastore.confirm_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "datastore.confirm_timeout_secs must be nonzero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_local_default() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.listen.local.is_some());
        assert!(config.listen.tls.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn rejects_tiny_message_limit() {
        let config: Config = toml::from_str("[limits]\nmax_message_bytes = 16").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_full_listen_config() {
        let raw = r#"
[listen]
local = "/tmp/netd.sock"

[listen.tls]
addr = "0.0.0.0:6513"
cert = "/etc/netd/server.crt"
key = "/etc/netd/server.key"
ca = "/etc/netd/ca.crt"

[listen.dtls]
addr = "0.0.0.0:6514"
cert = "/etc/netd/server.crt"
key = "/etc/netd/server.key"
ca = "/etc/netd/ca.crt"
mtu = 1400

[listen.http]
addr = "127.0.0.1:8080"
"#;
        let config: Config = toml::from_str(raw).unwrap();
        config.validate().unwrap();
        assert_eq!(config.listen.dtls.unwrap().mtu, 1400);
    }
}
