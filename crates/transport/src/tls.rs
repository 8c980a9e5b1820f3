//! Stream binding: TCP with mutual TLS.
//!
//! Both sides authenticate: the server verifies client certificates
//! against the configured CA and the client certificate's subject CN
//! becomes the peer identity.

use std::io::BufReader;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::stream::StreamTransport;
use crate::{PeerIdentity, PeerInfo, Transport, TransportError, TransportListener};

/// PEM file triple shared by the TLS and DTLS bindings.
#[derive(Debug, Clone)]
pub struct IdentityFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
    pub ca: PathBuf,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PEM loading
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TransportError> {
    let file = std::fs::File::open(path)?;
    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<_, _>>()
        .map_err(|e| TransportError::Tls(format!("bad certificate in {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(TransportError::Tls(format!(
            "no certificates in {}",
            path.display()
        )));
    }
    Ok(certs)
}

pub(crate) fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TransportError> {
    let file = std::fs::File::open(path)?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| TransportError::Tls(format!("bad key in {}: {e}", path.display())))?
        .ok_or_else(|| TransportError::Tls(format!("no private key in {}", path.display())))
}

pub(crate) fn load_root_store(path: &Path) -> Result<RootCertStore, TransportError> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(path)? {
        roots
            .add(cert)
            .map_err(|e| TransportError::Tls(format!("bad CA cert in {}: {e}", path.display())))?;
    }
    Ok(roots)
}

/// Subject CN of the first peer certificate, falling back to the full
/// subject DN when no CN is present.
pub(crate) fn subject_of(der: &[u8]) -> Result<String, TransportError> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| TransportError::Tls(format!("unparseable peer certificate: {e}")))?;
    let subject = cert.subject();
    let result = subject
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| subject.to_string());
    Ok(result)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Listener
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TlsListener {
    tcp: TcpListener,
    acceptor: TlsAcceptor,
    local: SocketAddr,
}

impl TlsListener {
    pub async fn bind(addr: &str, identity: &IdentityFiles) -> Result<Self, TransportError> {
        let certs = load_certs(&identity.cert)?;
        let key = load_key(&identity.key)?;
        let client_roots = load_root_store(&identity.ca)?;

        let verifier = WebPkiClientVerifier::builder(Arc::new(client_roots))
            .build()
            .map_err(|e| TransportError::Tls(format!("client verifier: {e}")))?;
        let config = ServerConfig::builder()
            .with_client_cert_verifier(verifier)
            .with_single_cert(certs, key)
            .map_err(|e| TransportError::Tls(e.to_string()))?;

        let tcp = TcpListener::bind(addr).await?;
        let local = tcp.local_addr()?;
        tracing::info!(%local, "listening on TLS");
        Ok(TlsListener {
            tcp,
            acceptor: TlsAcceptor::from(Arc::new(config)),
            local,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }
}

#[async_trait]
impl TransportListener for TlsListener {
    async fn accept(&mut self) -> Result<Box<dyn Transport>, TransportError> {
        let (tcp, remote) = self.tcp.accept().await?;
        let stream = self
            .acceptor
            .accept(tcp)
            .await
            .map_err(|e| TransportError::Tls(format!("handshake with {remote}: {e}")))?;

        let identity = match stream.get_ref().1.peer_certificates() {
            Some([first, ..]) => PeerIdentity::CertSubject(subject_of(first)?),
            _ => PeerIdentity::Anonymous,
        };
        let peer = PeerInfo::new(remote.to_string(), identity);
        tracing::debug!(peer = %peer.identity, remote = %remote, "accepted TLS connection");
        Ok(Box::new(StreamTransport::new(stream, peer)))
    }

    fn local_address(&self) -> String {
        self.local.to_string()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Connect with mutual TLS. `server_name` must match the server
/// certificate (SNI + verification).
pub async fn connect(
    addr: &str,
    server_name: &str,
    identity: &IdentityFiles,
) -> Result<Box<dyn Transport>, TransportError> {
    let roots = load_root_store(&identity.ca)?;
    let certs = load_certs(&identity.cert)?;
    let key = load_key(&identity.key)?;
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_client_auth_cert(certs, key)
        .map_err(|e| TransportError::Tls(e.to_string()))?;

    let tcp = TcpStream::connect(addr).await?;
    let name = ServerName::try_from(server_name.to_string())
        .map_err(|_| TransportError::InvalidAddress(server_name.to_string()))?;
    let stream = TlsConnector::from(Arc::new(config))
        .connect(name, tcp)
        .await
        .map_err(|e| TransportError::Tls(format!("handshake: {e}")))?;

    let peer = PeerInfo::new(addr.to_string(), PeerIdentity::Anonymous);
    Ok(Box::new(StreamTransport::new(stream, peer)))
}

#[cfg(test)]
pub(crate) mod test_pki {
    //! Throwaway PKI for transport tests.

    use std::path::PathBuf;

    use super::IdentityFiles;

    pub struct TestPki {
        pub dir: tempfile::TempDir,
        pub server: IdentityFiles,
        pub client: IdentityFiles,
    }

    pub fn generate(client_cn: &str) -> TestPki {
        let dir = tempfile::tempdir().unwrap();

        let ca_key = rcgen::KeyPair::generate().unwrap();
        let mut ca_params = rcgen::CertificateParams::new(Vec::new()).unwrap();
        ca_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        ca_params
            .distinguished_name
            .push(rcgen::DnType::CommonName, "netd test ca");
        let ca_cert = ca_params.self_signed(&ca_key).unwrap();

        let issue = |cn: &str, sans: Vec<String>| {
            let key = rcgen::KeyPair::generate().unwrap();
            let mut params = rcgen::CertificateParams::new(sans).unwrap();
            params
                .distinguished_name
                .push(rcgen::DnType::CommonName, cn);
            let cert = params.signed_by(&key, &ca_cert, &ca_key).unwrap();
            (cert.pem(), key.serialize_pem())
        };

        let write = |name: &str, contents: &str| -> PathBuf {
            let path = dir.path().join(name);
            std::fs::write(&path, contents).unwrap();
            path
        };

        let ca_path = write("ca.pem", &ca_cert.pem());
        let (server_pem, server_key) = issue("netd server", vec!["localhost".into()]);
        let (client_pem, client_key) = issue(client_cn, vec!["client".into()]);

        TestPki {
            server: IdentityFiles {
                cert: write("server.pem", &server_pem),
                key: write("server.key", &server_key),
                ca: ca_path.clone(),
            },
            client: IdentityFiles {
                cert: write("client.pem", &client_pem),
                key: write("client.key", &client_key),
                ca: ca_path,
            },
            dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessageStream;

    #[tokio::test]
    async fn mutual_tls_exchange_and_identity() {
        let pki = test_pki::generate("ops@example");
        let mut listener = TlsListener::bind("127.0.0.1:0", &pki.server).await.unwrap();
        let addr = listener.local_addr().to_string();

        let client_identity = pki.client.clone();
        let client = tokio::spawn(async move {
            let transport = connect(&addr, "localhost", &client_identity).await.unwrap();
            let mut stream = MessageStream::new(transport, 1 << 20);
            stream.write_message(b"<hello/>").await.unwrap();
            stream.next_message().await.unwrap().unwrap()
        });

        let transport = listener.accept().await.unwrap();
        assert_eq!(
            transport.peer().identity,
            PeerIdentity::CertSubject("ops@example".into())
        );
        let mut stream = MessageStream::new(transport, 1 << 20);
        let got = stream.next_message().await.unwrap().unwrap();
        assert_eq!(&got[..], b"<hello/>");
        stream.write_message(b"<ok/>").await.unwrap();

        assert_eq!(&client.await.unwrap()[..], b"<ok/>");
    }

    #[tokio::test]
    async fn handshake_without_client_cert_fails() {
        let pki = test_pki::generate("nobody");
        let mut listener = TlsListener::bind("127.0.0.1:0", &pki.server).await.unwrap();
        let addr = listener.local_addr();

        // A raw TCP client that never speaks TLS.
        let probe = tokio::spawn(async move {
            let sock = TcpStream::connect(addr).await.unwrap();
            drop(sock);
        });
        let res = listener.accept().await;
        assert!(res.is_err());
        probe.await.unwrap();
    }
}
