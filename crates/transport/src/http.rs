//! HTTP(S) binding.
//!
//! Each framed NETCONF message travels as one POST body to `/netconf`;
//! the reply rides back in the HTTP response. Session continuity uses
//! the `x-netd-session` header: the first POST creates a session (and a
//! server-side transport), later POSTs carrying the header are routed
//! to it. With TLS enabled the accept loop runs its own handshake so
//! the client certificate subject reaches the session as peer identity.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes as AxumBytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Extension, Router};
use bytes::{Buf, Bytes, BytesMut};
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use crate::tls::{load_certs, load_key, load_root_store, subject_of, IdentityFiles};
use crate::{PeerIdentity, PeerInfo, Transport, TransportError, TransportListener};

/// Session-continuity header.
pub const SESSION_HEADER: &str = "x-netd-session";

/// How long a POST waits for the session's reply before giving up.
const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(60);

const NETCONF_PATH: &str = "/netconf";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bridge state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One POST in flight: the request body and the slot for its reply.
type Exchange = (Bytes, oneshot::Sender<Bytes>);

struct Bridge {
    sessions: Mutex<HashMap<String, mpsc::Sender<Exchange>>>,
    accept_tx: mpsc::Sender<Box<dyn Transport>>,
    next_token: AtomicU64,
    /// Per-POST body cap, matching the framing layer's message limit.
    max_body: usize,
}

impl Bridge {
    fn mint_token(&self) -> String {
        format!("s{}", self.next_token.fetch_add(1, Ordering::Relaxed))
    }
}

async fn netconf_post(
    State(bridge): State<Arc<Bridge>>,
    Extension(identity): Extension<PeerIdentity>,
    headers: HeaderMap,
    body: AxumBytes,
) -> Response {
    let provided = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let (token, tx) = match provided {
        Some(token) => {
            let sessions = bridge.sessions.lock().await;
            match sessions.get(&token) {
                Some(tx) => (token, tx.clone()),
                None => {
                    return (StatusCode::GONE, "unknown session").into_response();
                }
            }
        }
        None => {
            // First message: create the session-side transport and hand
            // it to whoever is accepting.
            let token = bridge.mint_token();
            let (tx, rx) = mpsc::channel::<Exchange>(4);
            let transport = HttpServerTransport {
                recv_state: Mutex::new(RecvState {
                    rx,
                    buffer: BytesMut::new(),
                }),
                pending: Mutex::new(None),
                peer: PeerInfo::new("http", identity),
                cancel: CancellationToken::new(),
                closed: AtomicBool::new(false),
            };
            if bridge.accept_tx.send(Box::new(transport)).await.is_err() {
                return (StatusCode::SERVICE_UNAVAILABLE, "listener shut down").into_response();
            }
            bridge
                .sessions
                .lock()
                .await
                .insert(token.clone(), tx.clone());
            (token, tx)
        }
    };

    let (reply_tx, reply_rx) = oneshot::channel();
    if tx.send((body, reply_tx)).await.is_err() {
        bridge.sessions.lock().await.remove(&token);
        return (StatusCode::GONE, "session closed").into_response();
    }

    match tokio::time::timeout(EXCHANGE_TIMEOUT, reply_rx).await {
        Ok(Ok(reply)) => ([(SESSION_HEADER, token)], reply).into_response(),
        Ok(Err(_)) => {
            bridge.sessions.lock().await.remove(&token);
            (StatusCode::GONE, "session closed").into_response()
        }
        Err(_) => (StatusCode::GATEWAY_TIMEOUT, "no reply from session").into_response(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Listener
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct HttpListener {
    accept_rx: mpsc::Receiver<Box<dyn Transport>>,
    local: SocketAddr,
    shutdown: CancellationToken,
}

impl HttpListener {
    /// Plain HTTP, or HTTPS when `tls` is set. A `ca` in the identity
    /// files enables client-certificate verification; the subject then
    /// becomes the peer identity of sessions on that connection.
    /// `max_body` should match the framing layer's message limit.
    pub async fn bind(
        addr: &str,
        tls: Option<&IdentityFiles>,
        max_body: usize,
    ) -> Result<Self, TransportError> {
        let tcp = TcpListener::bind(addr).await?;
        let local = tcp.local_addr()?;

        let acceptor = match tls {
            Some(identity) => {
                let certs = load_certs(&identity.cert)?;
                let key = load_key(&identity.key)?;
                let client_roots = load_root_store(&identity.ca)?;
                let verifier =
                    rustls::server::WebPkiClientVerifier::builder(Arc::new(client_roots))
                        .allow_unauthenticated()
                        .build()
                        .map_err(|e| TransportError::Tls(format!("client verifier: {e}")))?;
                let config = rustls::ServerConfig::builder()
                    .with_client_cert_verifier(verifier)
                    .with_single_cert(certs, key)
                    .map_err(|e| TransportError::Tls(e.to_string()))?;
                Some(TlsAcceptor::from(Arc::new(config)))
            }
            None => None,
        };

        let (accept_tx, accept_rx) = mpsc::channel(16);
        let bridge = Arc::new(Bridge {
            sessions: Mutex::new(HashMap::new()),
            accept_tx,
            next_token: AtomicU64::new(1),
            max_body,
        });
        let shutdown = CancellationToken::new();

        tokio::spawn(serve_loop(tcp, acceptor, bridge, shutdown.clone()));
        tracing::info!(%local, tls = tls.is_some(), "listening on HTTP");
        Ok(HttpListener {
            accept_rx,
            local,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }
}

impl Drop for HttpListener {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn serve_loop(
    tcp: TcpListener,
    acceptor: Option<TlsAcceptor>,
    bridge: Arc<Bridge>,
    shutdown: CancellationToken,
) {
    loop {
        let (stream, remote) = tokio::select! {
            _ = shutdown.cancelled() => return,
            accepted = tcp.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(error = %e, "HTTP accept failed");
                    continue;
                }
            },
        };

        let acceptor = acceptor.clone();
        let bridge = bridge.clone();
        tokio::spawn(async move {
            match acceptor {
                Some(acceptor) => {
                    let tls = match acceptor.accept(stream).await {
                        Ok(tls) => tls,
                        Err(e) => {
                            tracing::debug!(%remote, error = %e, "TLS handshake failed");
                            return;
                        }
                    };
                    let identity = match tls.get_ref().1.peer_certificates() {
                        Some([first, ..]) => match subject_of(first) {
                            Ok(subject) => PeerIdentity::CertSubject(subject),
                            Err(_) => PeerIdentity::Anonymous,
                        },
                        _ => PeerIdentity::Anonymous,
                    };
                    serve_connection(TokioIo::new(tls), bridge, identity).await;
                }
                None => {
                    serve_connection(TokioIo::new(stream), bridge, PeerIdentity::Anonymous).await;
                }
            }
        });
    }
}

/// Serve one accepted connection with the bridge router.
async fn serve_connection<I>(
    io: TokioIo<I>,
    bridge: Arc<Bridge>,
    identity: PeerIdentity,
) where
    I: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let app = Router::new()
        .route(NETCONF_PATH, post(netconf_post))
        .layer(axum::extract::DefaultBodyLimit::max(bridge.max_body))
        .layer(Extension(identity))
        .with_state(bridge);
    let service = TowerToHyperService::new(app);
    if let Err(e) = hyper::server::conn::http1::Builder::new()
        .serve_connection(io, service)
        .await
    {
        tracing::debug!(error = %e, "HTTP connection ended");
    }
}

#[async_trait]
impl TransportListener for HttpListener {
    async fn accept(&mut self) -> Result<Box<dyn Transport>, TransportError> {
        self.accept_rx
            .recv()
            .await
            .ok_or(TransportError::Closed)
    }

    fn local_address(&self) -> String {
        self.local.to_string()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server-side transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct RecvState {
    rx: mpsc::Receiver<Exchange>,
    buffer: BytesMut,
}

struct HttpServerTransport {
    recv_state: Mutex<RecvState>,
    /// Reply slot of the exchange currently being answered.
    pending: Mutex<Option<oneshot::Sender<Bytes>>>,
    peer: PeerInfo,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl HttpServerTransport {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Pull the next exchange, buffering its request bytes and parking
    /// its reply slot.
    async fn pull(&self, state: &mut RecvState) -> Result<bool, TransportError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(TransportError::Canceled),
            next = state.rx.recv() => match next {
                Some((bytes, reply_tx)) => {
                    state.buffer.extend_from_slice(&bytes);
                    *self.pending.lock().await = Some(reply_tx);
                    Ok(true)
                }
                None => Ok(false),
            },
        }
    }
}

#[async_trait]
impl Transport for HttpServerTransport {
    async fn send(&self, buf: &[u8]) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        // Server-initiated sends (the hello) consume the reply slot of
        // the exchange that opened the session.
        if self.pending.lock().await.is_none() {
            let mut state = self.recv_state.lock().await;
            if !self.pull(&mut state).await? {
                return Err(TransportError::Closed);
            }
        }
        let slot = self
            .pending
            .lock()
            .await
            .take()
            .ok_or(TransportError::Closed)?;
        slot.send(Bytes::copy_from_slice(buf))
            .map_err(|_| TransportError::Closed)
    }

    async fn recv(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let mut state = self.recv_state.lock().await;
        if state.buffer.is_empty() && !self.pull(&mut state).await? {
            return Ok(0);
        }
        let n = state.buffer.len().min(buf.len());
        buf[..n].copy_from_slice(&state.buffer[..n]);
        state.buffer.advance(n);
        Ok(n)
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.cancel.cancel();
            self.recv_state.lock().await.rx.close();
            *self.pending.lock().await = None;
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

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client-side transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct HttpClientTransport {
    client: reqwest::Client,
    url: String,
    session: Mutex<Option<String>>,
    buffer: Mutex<BytesMut>,
    filled: Notify,
    peer: PeerInfo,
    cancel: CancellationToken,
    closed: AtomicBool,
}

/// Connect to `http(s)://host:port`. TLS verification uses `identity`'s
/// CA; its cert/key pair is presented for mutual TLS when given.
pub async fn connect(
    url: &str,
    identity: Option<&IdentityFiles>,
) -> Result<Box<dyn Transport>, TransportError> {
    let mut builder = reqwest::Client::builder();
    if let Some(identity) = identity {
        let ca = std::fs::read(&identity.ca)?;
        builder = builder.add_root_certificate(
            reqwest::Certificate::from_pem(&ca)
                .map_err(|e| TransportError::Http(format!("bad CA: {e}")))?,
        );
        let mut pem = std::fs::read(&identity.key)?;
        pem.extend(std::fs::read(&identity.cert)?);
        builder = builder.identity(
            reqwest::Identity::from_pem(&pem)
                .map_err(|e| TransportError::Http(format!("bad client identity: {e}")))?,
        );
    }
    let client = builder
        .build()
        .map_err(|e| TransportError::Http(e.to_string()))?;

    Ok(Box::new(HttpClientTransport {
        client,
        url: format!("{}{NETCONF_PATH}", url.trim_end_matches('/')),
        session: Mutex::new(None),
        buffer: Mutex::new(BytesMut::new()),
        filled: Notify::new(),
        peer: PeerInfo::new(url.to_string(), PeerIdentity::Anonymous),
        cancel: CancellationToken::new(),
        closed: AtomicBool::new(false),
    }))
}

#[async_trait]
impl Transport for HttpClientTransport {
    async fn send(&self, buf: &[u8]) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let mut request = self.client.post(&self.url).body(buf.to_vec());
        if let Some(session) = self.session.lock().await.as_deref() {
            request = request.header(SESSION_HEADER, session);
        }

        let response = tokio::select! {
            _ = self.cancel.cancelled() => return Err(TransportError::Canceled),
            res = request.send() => res.map_err(|e| TransportError::Http(e.to_string()))?,
        };
        if response.status() == StatusCode::GONE {
            self.closed.store(true, Ordering::SeqCst);
            return Err(TransportError::Closed);
        }
        if !response.status().is_success() {
            return Err(TransportError::Http(format!(
                "server answered {}",
                response.status()
            )));
        }
        if let Some(token) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session.lock().await = Some(token.to_string());
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        self.buffer.lock().await.extend_from_slice(&body);
        self.filled.notify_waiters();
        Ok(())
    }

    async fn recv(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        loop {
            let notified = self.filled.notified();
            {
                let mut buffer = self.buffer.lock().await;
                if !buffer.is_empty() {
                    let n = buffer.len().min(buf.len());
                    buf[..n].copy_from_slice(&buffer[..n]);
                    buffer.advance(n);
                    return Ok(n);
                }
            }
            if self.closed.load(Ordering::SeqCst) {
                return Ok(0);
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(TransportError::Canceled),
                _ = notified => {}
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        self.cancel.cancel();
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
    use crate::MessageStream;

    #[tokio::test]
    async fn post_per_message_exchange() {
        let mut listener = HttpListener::bind("127.0.0.1:0", None, 1 << 20).await.unwrap();
        let url = format!("http://{}", listener.local_addr());

        let client = tokio::spawn(async move {
            let transport = connect(&url, None).await.unwrap();
            let mut stream = MessageStream::new(transport, 1 << 20);
            stream.write_message(b"<hello-from-client/>").await.unwrap();
            let first = stream.next_message().await.unwrap().unwrap();
            stream.write_message(b"<rpc message-id=\"1\"/>").await.unwrap();
            let second = stream.next_message().await.unwrap().unwrap();
            (first, second)
        });

        let transport = listener.accept().await.unwrap();
        assert_eq!(transport.peer().identity, PeerIdentity::Anonymous);
        let mut stream = MessageStream::new(transport, 1 << 20);
        // Server speaks first, riding the session-opening exchange.
        stream.write_message(b"<hello-from-server/>").await.unwrap();
        let hello = stream.next_message().await.unwrap().unwrap();
        assert_eq!(&hello[..], b"<hello-from-client/>");
        let rpc = stream.next_message().await.unwrap().unwrap();
        assert_eq!(&rpc[..], b"<rpc message-id=\"1\"/>");
        stream.write_message(b"<rpc-reply message-id=\"1\"/>").await.unwrap();

        let (first, second) = client.await.unwrap();
        assert_eq!(&first[..], b"<hello-from-server/>");
        assert_eq!(&second[..], b"<rpc-reply message-id=\"1\"/>");
    }
}
