//! Pluggable NETCONF transports and RFC 6242 framing.
//!
//! One trait, four bindings:
//! - **Local**: Unix-domain socket; peer identity from socket credentials.
//! - **Stream+TLS**: TCP with mutual rustls; identity from the client
//!   certificate subject.
//! - **Datagram+DTLS**: UDP with webrtc-dtls; identity as above.
//! - **HTTP(S)**: one framed message per POST body; axum/hyper on the
//!   server, reqwest on the client.
//!
//! The framing layer ([`framing`]) and message pump ([`MessageStream`])
//! are transport-agnostic; everything above them sees discrete messages.

pub mod dtls;
pub mod framing;
pub mod http;
pub mod local;
pub mod stream;
pub mod tls;

use std::fmt;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use framing::{encode_frame, FrameCodec, FrameError, FramingMode};
pub use stream::{MessageStream, StreamTransport};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Peer identity
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Who is on the other end, as established by the transport before the
/// first NETCONF byte. Policy on top of this is out of scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerIdentity {
    Anonymous,
    LocalUser { uid: u32, gid: u32 },
    CertSubject(String),
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerIdentity::Anonymous => write!(f, "anonymous"),
            PeerIdentity::LocalUser { uid, .. } => write!(f, "uid:{uid}"),
            PeerIdentity::CertSubject(subject) => write!(f, "cert:{subject}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub address: String,
    pub identity: PeerIdentity,
}

impl PeerInfo {
    pub fn new(address: impl Into<String>, identity: PeerIdentity) -> Self {
        PeerInfo {
            address: address.into(),
            identity,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed by peer")]
    Closed,

    #[error("operation canceled")]
    Canceled,

    #[error("TLS: {0}")]
    Tls(String),

    #[error("DTLS: {0}")]
    Dtls(String),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("bad address `{0}`")]
    InvalidAddress(String),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Traits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A connected byte transport. Owned by one session; send and recv are
/// independently synchronized inside each binding so a reader task and
/// a writer task can share the handle. All calls fail fast with
/// [`TransportError::Canceled`] once the cancellation token fires, and
/// with `Closed` after EOF.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, buf: &[u8]) -> Result<(), TransportError>;

    /// Read some bytes into `buf`; `Ok(0)` signals an orderly close.
    async fn recv(&self, buf: &mut [u8]) -> Result<usize, TransportError>;

    async fn close(&self) -> Result<(), TransportError>;

    fn peer(&self) -> &PeerInfo;

    /// Cancelling this token from any task aborts in-flight I/O.
    fn cancellation(&self) -> CancellationToken;
}

/// A bound listener producing connected transports.
#[async_trait]
pub trait TransportListener: Send {
    async fn accept(&mut self) -> Result<Box<dyn Transport>, TransportError>;

    /// Human-readable bound address, for logs.
    fn local_address(&self) -> String;
}
