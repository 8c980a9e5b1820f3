//! NETCONF capability URIs and hello-time negotiation.
//!
//! A capability is a plain URI string exchanged in `<hello>`. Both peers
//! advertise a set; the intersection decides the wire framing and which
//! optional operations a session may use.

use std::collections::BTreeSet;
use std::fmt;

/// Well-known capability URIs (RFC 6241 §8, RFC 6022).
pub mod urns {
    pub const BASE_1_0: &str = "urn:ietf:params:netconf:base:1.0";
    pub const BASE_1_1: &str = "urn:ietf:params:netconf:base:1.1";
    pub const CANDIDATE: &str = "urn:ietf:params:netconf:capability:candidate:1.0";
    pub const CONFIRMED_COMMIT: &str = "urn:ietf:params:netconf:capability:confirmed-commit:1.1";
    pub const ROLLBACK_ON_ERROR: &str = "urn:ietf:params:netconf:capability:rollback-on-error:1.0";
    pub const VALIDATE: &str = "urn:ietf:params:netconf:capability:validate:1.1";
    pub const STARTUP: &str = "urn:ietf:params:netconf:capability:startup:1.0";
    pub const XPATH: &str = "urn:ietf:params:netconf:capability:xpath:1.0";
    pub const WRITABLE_RUNNING: &str = "urn:ietf:params:netconf:capability:writable-running:1.0";
    pub const NOTIFICATION: &str = "urn:ietf:params:netconf:capability:notification:1.0";
    pub const MONITORING: &str = "urn:ietf:params:xml:ns:yang:ietf-netconf-monitoring";
}

/// An ordered set of capability URIs.
///
/// Ordering is lexicographic (BTreeSet) so serialized hellos are
/// byte-stable run to run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    uris: BTreeSet<String>,
}

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The capability set a netd server advertises, before per-module
    /// YANG-library URIs are appended by the schema registry.
    pub fn server_base() -> Self {
        let mut set = Self::new();
        for uri in [
            urns::BASE_1_0,
            urns::BASE_1_1,
            urns::CANDIDATE,
            urns::CONFIRMED_COMMIT,
            urns::ROLLBACK_ON_ERROR,
            urns::VALIDATE,
            urns::STARTUP,
            urns::XPATH,
            urns::WRITABLE_RUNNING,
            urns::MONITORING,
        ] {
            set.insert(uri);
        }
        set
    }

    /// What the netd client advertises. Feature capabilities are
    /// intersected at hello time, so the client lists everything it
    /// knows how to drive.
    pub fn client_base() -> Self {
        let mut set = Self::new();
        for uri in [
            urns::BASE_1_0,
            urns::BASE_1_1,
            urns::CANDIDATE,
            urns::CONFIRMED_COMMIT,
            urns::ROLLBACK_ON_ERROR,
            urns::VALIDATE,
            urns::STARTUP,
            urns::XPATH,
            urns::WRITABLE_RUNNING,
        ] {
            set.insert(uri);
        }
        set
    }

    pub fn insert(&mut self, uri: impl Into<String>) {
        self.uris.insert(uri.into());
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.uris.contains(uri)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.uris.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.uris.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uris.is_empty()
    }

    /// Intersect with a peer's advertised set and derive the features a
    /// session may rely on. Base 1.0 support is implied by RFC 6241 even
    /// when a peer lists only 1.1.
    pub fn negotiate(&self, peer: &CapabilitySet) -> Negotiated {
        let both = |uri: &str| self.contains(uri) && peer.contains(uri);
        Negotiated {
            base_1_1: both(urns::BASE_1_1),
            candidate: both(urns::CANDIDATE),
            confirmed_commit: both(urns::CONFIRMED_COMMIT),
            rollback_on_error: both(urns::ROLLBACK_ON_ERROR),
            validate: both(urns::VALIDATE),
            startup: both(urns::STARTUP),
            xpath: both(urns::XPATH),
            writable_running: both(urns::WRITABLE_RUNNING),
            notification: both(urns::NOTIFICATION),
        }
    }
}

impl FromIterator<String> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = String>>(iter: T) -> Self {
        Self {
            uris: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for uri in &self.uris {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{uri}")?;
            first = false;
        }
        Ok(())
    }
}

/// The feature set both sides of a session agreed on at hello time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Negotiated {
    /// Chunked framing (RFC 6242 §4.2); end-of-message otherwise.
    pub base_1_1: bool,
    pub candidate: bool,
    pub confirmed_commit: bool,
    pub rollback_on_error: bool,
    pub validate: bool,
    pub startup: bool,
    pub xpath: bool,
    pub writable_running: bool,
    pub notification: bool,
}

/// Build the YANG-library capability URI for a loaded module:
/// `<namespace>?module=<name>&revision=<date>[&features=f1,f2]`.
pub fn module_capability_uri(
    namespace: &str,
    module: &str,
    revision: &str,
    features: &[String],
) -> String {
    let mut uri = format!("{namespace}?module={module}&revision={revision}");
    if !features.is_empty() {
        uri.push_str("&features=");
        uri.push_str(&features.join(","));
    }
    uri
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiate_requires_both_sides() {
        let server = CapabilitySet::server_base();
        let mut peer = CapabilitySet::new();
        peer.insert(urns::BASE_1_0);
        peer.insert(urns::BASE_1_1);
        peer.insert(urns::CANDIDATE);

        let n = server.negotiate(&peer);
        assert!(n.base_1_1);
        assert!(n.candidate);
        assert!(!n.confirmed_commit);
        assert!(!n.xpath);
    }

    #[test]
    fn negotiate_falls_back_to_base_1_0() {
        let server = CapabilitySet::server_base();
        let mut peer = CapabilitySet::new();
        peer.insert(urns::BASE_1_0);

        let n = server.negotiate(&peer);
        assert!(!n.base_1_1);
    }

    #[test]
    fn display_is_sorted() {
        let mut set = CapabilitySet::new();
        set.insert("urn:b");
        set.insert("urn:a");
        assert_eq!(set.to_string(), "urn:a, urn:b");
    }

    #[test]
    fn module_uri_with_features() {
        let uri = module_capability_uri(
            "urn:ietf:params:xml:ns:yang:ietf-interfaces",
            "ietf-interfaces",
            "2018-02-20",
            &["arbitrary-names".to_string()],
        );
        assert_eq!(
            uri,
            "urn:ietf:params:xml:ns:yang:ietf-interfaces?module=ietf-interfaces&revision=2018-02-20&features=arbitrary-names"
        );
    }
}
