//! Local (Unix-domain socket) binding.
//!
//! Peer credentials are read from the accepted socket before the first
//! byte is processed; they become the session's peer identity.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::net::{UnixListener, UnixStream};

use crate::stream::StreamTransport;
use crate::{PeerIdentity, PeerInfo, Transport, TransportError, TransportListener};

pub struct LocalListener {
    listener: UnixListener,
    path: PathBuf,
}

impl LocalListener {
    /// Bind the socket, replacing a stale file from a previous run.
    pub fn bind(path: &Path) -> Result<Self, TransportError> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(path)?;
        tracing::info!(path = %path.display(), "listening on local socket");
        Ok(LocalListener {
            listener,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for LocalListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[async_trait]
impl TransportListener for LocalListener {
    async fn accept(&mut self) -> Result<Box<dyn Transport>, TransportError> {
        let (stream, _addr) = self.listener.accept().await?;
        // Credentials come off the socket option, not the wire.
        let cred = stream.peer_cred()?;
        let peer = PeerInfo::new(
            self.path.display().to_string(),
            PeerIdentity::LocalUser {
                uid: cred.uid(),
                gid: cred.gid(),
            },
        );
        tracing::debug!(peer = %peer.identity, "accepted local connection");
        Ok(Box::new(StreamTransport::new(stream, peer)))
    }

    fn local_address(&self) -> String {
        self.path.display().to_string()
    }
}

/// Client side: connect to the daemon's socket.
pub async fn connect(path: &Path) -> Result<Box<dyn Transport>, TransportError> {
    let stream = UnixStream::connect(path).await?;
    let peer = PeerInfo::new(path.display().to_string(), PeerIdentity::Anonymous);
    Ok(Box::new(StreamTransport::new(stream, peer)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessageStream;

    #[tokio::test]
    async fn connect_accept_and_exchange() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("netd-test.sock");
        let mut listener = LocalListener::bind(&path).unwrap();

        let client_path = path.clone();
        let client = tokio::spawn(async move {
            let transport = connect(&client_path).await.unwrap();
            let mut stream = MessageStream::new(transport, 1 << 20);
            stream.write_message(b"<hello/>").await.unwrap();
            stream.next_message().await.unwrap().unwrap()
        });

        let transport = listener.accept().await.unwrap();
        // Peer credentials are our own uid in this test.
        match transport.peer().identity {
            PeerIdentity::LocalUser { uid, .. } => {
                assert_eq!(uid, unsafe { libc_getuid() });
            }
            ref other => panic!("expected local user identity, got {other}"),
        }
        let mut stream = MessageStream::new(transport, 1 << 20);
        let got = stream.next_message().await.unwrap().unwrap();
        assert_eq!(&got[..], b"<hello/>");
        stream.write_message(b"<ok/>").await.unwrap();

        let reply = client.await.unwrap();
        assert_eq!(&reply[..], b"<ok/>");
    }

    /// Minimal shim so the test does not need the libc crate.
    unsafe fn libc_getuid() -> u32 {
        extern "C" {
            fn getuid() -> u32;
        }
        getuid()
    }

    #[tokio::test]
    async fn stale_socket_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.sock");
        std::fs::write(&path, b"").unwrap();
        let listener = LocalListener::bind(&path).unwrap();
        assert_eq!(listener.local_address(), path.display().to_string());
    }
}
