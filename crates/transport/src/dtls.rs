//! Datagram binding: UDP with DTLS.
//!
//! Uses webrtc-dtls over a demultiplexing UDP listener. The server
//! handshake includes the HelloVerifyRequest cookie exchange; the MTU
//! from the daemon config bounds record sizing. Identity comes from the
//! client certificate subject, as with the stream binding.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use webrtc_dtls::config::{ClientAuthType, Config};
use webrtc_dtls::conn::DTLSConn;
use webrtc_dtls::crypto::Certificate;
use webrtc_util::conn::conn_udp_listener::ListenConfig;
use webrtc_util::conn::{Conn, Listener};

use crate::tls::{load_root_store, subject_of, IdentityFiles};
use crate::{PeerIdentity, PeerInfo, Transport, TransportError, TransportListener};

fn certificate_from_files(identity: &IdentityFiles) -> Result<Certificate, TransportError> {
    let cert_pem = std::fs::read_to_string(&identity.cert)?;
    let key_pem = std::fs::read_to_string(&identity.key)?;
    Certificate::from_pem(&format!("{key_pem}{cert_pem}"))
        .map_err(|e| TransportError::Dtls(format!("bad DTLS identity: {e}")))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Listener
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct DtlsListener {
    inner: Box<dyn Listener + Send + Sync>,
    config: Config,
    address: String,
}

impl DtlsListener {
    pub async fn bind(
        addr: &str,
        identity: &IdentityFiles,
        mtu: usize,
    ) -> Result<Self, TransportError> {
        let certificate = certificate_from_files(identity)?;
        let client_cas = load_root_store(&identity.ca)?;
        let config = Config {
            certificates: vec![certificate],
            client_auth: ClientAuthType::RequireAnyClientCert,
            client_cas,
            mtu,
            ..Default::default()
        };

        let inner = ListenConfig::default()
            .listen(addr.to_string())
            .await
            .map_err(|e| TransportError::Dtls(format!("bind {addr}: {e}")))?;
        tracing::info!(addr, "listening on DTLS");
        Ok(DtlsListener {
            inner: Box::new(inner),
            config,
            address: addr.to_string(),
        })
    }
}

#[async_trait]
impl TransportListener for DtlsListener {
    async fn accept(&mut self) -> Result<Box<dyn Transport>, TransportError> {
        let (conn, remote) = self
            .inner
            .accept()
            .await
            .map_err(|e| TransportError::Dtls(format!("accept: {e}")))?;

        // Cookie exchange and handshake happen here, before any
        // NETCONF byte is read.
        let dtls = DTLSConn::new(conn, self.config.clone(), false, None)
            .await
            .map_err(|e| TransportError::Dtls(format!("handshake with {remote}: {e}")))?;

        let state = dtls.connection_state().await;
        let identity = match state.peer_certificates.first() {
            Some(der) => PeerIdentity::CertSubject(subject_of(der)?),
            None => PeerIdentity::Anonymous,
        };
        let peer = PeerInfo::new(remote.to_string(), identity);
        tracing::debug!(peer = %peer.identity, remote = %remote, "accepted DTLS connection");
        Ok(Box::new(DtlsTransport::new(dtls, peer)))
    }

    fn local_address(&self) -> String {
        self.address.clone()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn connect(
    addr: &str,
    server_name: &str,
    identity: &IdentityFiles,
    mtu: usize,
) -> Result<Box<dyn Transport>, TransportError> {
    let certificate = certificate_from_files(identity)?;
    let roots_cas = load_root_store(&identity.ca)?;
    let config = Config {
        certificates: vec![certificate],
        server_name: server_name.to_string(),
        roots_cas,
        mtu,
        ..Default::default()
    };

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(addr).await?;
    let conn: Arc<dyn Conn + Send + Sync> = Arc::new(socket);
    let dtls = DTLSConn::new(conn, config, true, None)
        .await
        .map_err(|e| TransportError::Dtls(format!("handshake: {e}")))?;

    let peer = PeerInfo::new(addr.to_string(), PeerIdentity::Anonymous);
    Ok(Box::new(DtlsTransport::new(dtls, peer)))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transport adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct DtlsTransport {
    conn: DTLSConn,
    peer: PeerInfo,
    cancel: CancellationToken,
    closed: std::sync::atomic::AtomicBool,
}

impl DtlsTransport {
    fn new(conn: DTLSConn, peer: PeerInfo) -> Self {
        DtlsTransport {
            conn,
            peer,
            cancel: CancellationToken::new(),
            closed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for DtlsTransport {
    async fn send(&self, buf: &[u8]) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(TransportError::Canceled),
            res = self.conn.send(buf) => {
                res.map_err(|e| TransportError::Dtls(e.to_string()))?;
                Ok(())
            }
        }
    }

    async fn recv(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(TransportError::Canceled),
            res = self.conn.recv(buf) => match res {
                Ok(n) => Ok(n),
                // A closed DTLS conn surfaces as an error; report EOF.
                Err(e) if self.cancel.is_cancelled() => {
                    tracing::debug!(error = %e, "recv after cancel");
                    Err(TransportError::Canceled)
                }
                Err(e) => {
                    let text = e.to_string();
                    if text.contains("closed") || text.contains("Closed") {
                        Ok(0)
                    } else {
                        Err(TransportError::Dtls(text))
                    }
                }
            },
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.closed.swap(true, std::sync::atomic::Ordering::SeqCst) {
            self.cancel.cancel();
            let _ = self.conn.close().await;
        }
        Ok(())
    }

    fn peer(&self) -> &PeerInfo {
        &self.peer
    }

    fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::test_pki;
    use crate::MessageStream;

    #[tokio::test]
    async fn dtls_exchange_with_client_cert_identity() {
        let pki = test_pki::generate("dtls-client");
        // Bind on an OS-assigned port via a throwaway socket first.
        let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = probe.local_addr().unwrap().to_string();
        drop(probe);

        let mut listener = DtlsListener::bind(&addr, &pki.server, 1400).await.unwrap();

        let client_identity = pki.client.clone();
        let client_addr = addr.clone();
        let client = tokio::spawn(async move {
            let transport = connect(&client_addr, "localhost", &client_identity, 1400)
                .await
                .unwrap();
            let mut stream = MessageStream::new(transport, 1 << 20);
            stream.write_message(b"<hello/>").await.unwrap();
            stream.next_message().await.unwrap().unwrap()
        });

        let transport = listener.accept().await.unwrap();
        assert_eq!(
            transport.peer().identity,
            PeerIdentity::CertSubject("dtls-client".into())
        );
        let mut stream = MessageStream::new(transport, 1 << 20);
        let got = stream.next_message().await.unwrap().unwrap();
        assert_eq!(&got[..], b"<hello/>");
        stream.write_message(b"<ok/>").await.unwrap();

        assert_eq!(&client.await.unwrap()[..], b"<ok/>");
    }
}
