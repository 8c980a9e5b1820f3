//! NETCONF client: connect, hello, send RPCs, await correlated replies.
//!
//! The session lives in a driver task that owns the transport; callers
//! hand it requests over a channel and wait on expectation handles.
//! This keeps per-session message processing single-threaded and
//! strictly ordered while callers stay free to pipeline.

pub mod expect;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use netd_domain::config::ClientConfig;
use netd_domain::CapabilitySet;
use netd_session::{Session, SessionError};
use netd_transport::MessageStream;
use netd_yang::SchemaRegistry;
use netd_yang::message::{Commit, DefaultOperation, EditConfig, ErrorOption, TestOption};
use netd_yang::tree::DataNode;
use netd_yang::{Datastore, Filter, Message, Request, Response};

pub use expect::{ExpectFailure, ExpectHandle, ExpectationRegistry};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("session: {0}")]
    Session(#[from] SessionError),

    #[error("not connected")]
    NotConnected,

    #[error(transparent)]
    Expect(#[from] ExpectFailure),
}

enum Command {
    Send {
        request: Request,
        reply: oneshot::Sender<Result<ExpectHandle, ClientError>>,
    },
    Close,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Handle to a connected NETCONF session. Cheap to clone; the terminal
/// UI, CLI and LLDP consumers each hold one.
#[derive(Clone)]
pub struct NetconfClient {
    session_id: u32,
    commands: mpsc::Sender<Command>,
    connected: Arc<AtomicBool>,
    ttl: Duration,
}

impl NetconfClient {
    /// Connect over the daemon's local socket with default client
    /// capabilities.
    pub async fn connect_local(
        path: &Path,
        registry: Arc<SchemaRegistry>,
        config: &ClientConfig,
        max_frame: usize,
    ) -> Result<Self, ClientError> {
        let transport = netd_transport::local::connect(path)
            .await
            .map_err(SessionError::Transport)?;
        let stream = MessageStream::new(transport, max_frame);
        let session = Session::new(0, stream, registry, CapabilitySet::client_base());
        Self::start(session, config).await
    }

    /// Run the hello exchange over an established session and start the
    /// driver and reaper tasks.
    pub async fn start(mut session: Session, config: &ClientConfig) -> Result<Self, ClientError> {
        session.client_handshake().await?;
        // The server names the session; fall back to our local id for
        // transports that lost the hello session-id (none do today).
        let session_id = session.peer_session_id().unwrap_or_else(|| session.id());
        let (reader, writer) = session.split()?;

        let registry = Arc::new(ExpectationRegistry::new());
        let reaper = registry.spawn_reaper(Duration::from_secs(config.reap_interval_secs.max(1)));
        let connected = Arc::new(AtomicBool::new(true));
        let (commands, command_rx) = mpsc::channel(16);

        tokio::spawn(drive(
            reader,
            writer,
            session_id,
            command_rx,
            Arc::clone(&registry),
            Arc::clone(&connected),
            Duration::from_secs(config.expect_ttl_secs),
            reaper,
        ));

        Ok(NetconfClient {
            session_id,
            commands,
            connected,
            ttl: Duration::from_secs(config.expect_ttl_secs),
        })
    }

    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Send one RPC and wait for its correlated reply (or a timeout /
    /// transport failure from the expectation layer).
    pub async fn send_rpc(&self, request: Request) -> Result<Response, ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Send {
                request,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ClientError::NotConnected)?;
        let handle = reply_rx.await.map_err(|_| ClientError::NotConnected)??;
        Ok(handle.wait().await?)
    }

    /// Graceful shutdown: `close-session`, then tear down the driver.
    pub async fn close(&self) -> Result<(), ClientError> {
        if self.is_connected() {
            let _ = self.send_rpc(Request::CloseSession).await;
        }
        let _ = self.commands.send(Command::Close).await;
        Ok(())
    }

    // ── typed convenience wrappers ──────────────────────────────────

    pub async fn get(&self, filter: Option<Filter>) -> Result<Response, ClientError> {
        self.send_rpc(Request::Get { filter }).await
    }

    pub async fn get_config(
        &self,
        source: Datastore,
        filter: Option<Filter>,
    ) -> Result<Response, ClientError> {
        self.send_rpc(Request::GetConfig { source, filter }).await
    }

    pub async fn edit_config(
        &self,
        target: Datastore,
        config: DataNode,
        default_operation: DefaultOperation,
        error_option: ErrorOption,
        test_option: TestOption,
    ) -> Result<Response, ClientError> {
        self.send_rpc(Request::EditConfig(EditConfig {
            target,
            config,
            default_operation,
            error_option,
            test_option,
        }))
        .await
    }

    pub async fn copy_config(
        &self,
        source: Datastore,
        target: Datastore,
    ) -> Result<Response, ClientError> {
        self.send_rpc(Request::CopyConfig { source, target }).await
    }

    pub async fn delete_config(&self, target: Datastore) -> Result<Response, ClientError> {
        self.send_rpc(Request::DeleteConfig { target }).await
    }

    pub async fn lock(&self, target: Datastore) -> Result<Response, ClientError> {
        self.send_rpc(Request::Lock { target }).await
    }

    pub async fn unlock(&self, target: Datastore) -> Result<Response, ClientError> {
        self.send_rpc(Request::Unlock { target }).await
    }

    pub async fn commit(&self, commit: Commit) -> Result<Response, ClientError> {
        self.send_rpc(Request::Commit(commit)).await
    }

    pub async fn discard_changes(&self) -> Result<Response, ClientError> {
        self.send_rpc(Request::DiscardChanges).await
    }

    pub async fn validate(&self, source: Datastore) -> Result<Response, ClientError> {
        self.send_rpc(Request::Validate { source }).await
    }

    pub async fn kill_session(&self, session_id: u32) -> Result<Response, ClientError> {
        self.send_rpc(Request::KillSession { session_id }).await
    }

    pub async fn get_schema(
        &self,
        identifier: &str,
        version: Option<&str>,
    ) -> Result<Response, ClientError> {
        self.send_rpc(Request::GetSchema {
            identifier: identifier.to_string(),
            version: version.map(str::to_string),
            format: None,
        })
        .await
    }

    #[doc(hidden)]
    pub fn expect_ttl(&self) -> Duration {
        self.ttl
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Driver task
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[allow(clippy::too_many_arguments)]
async fn drive(
    mut reader: netd_session::SessionReader,
    mut writer: netd_session::SessionWriter,
    session_id: u32,
    mut commands: mpsc::Receiver<Command>,
    registry: Arc<ExpectationRegistry>,
    connected: Arc<AtomicBool>,
    ttl: Duration,
    reaper: JoinHandle<()>,
) {
    let disconnect_reason;
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Send { request, reply }) => {
                    match writer.send_request(&request).await {
                        Ok(message_id) => {
                            // Register before this loop can observe the
                            // reply; the reader arm only runs after the
                            // handler returns.
                            let handle = registry.register(session_id, &message_id, ttl);
                            let _ = reply.send(Ok(handle));
                        }
                        Err(e) => {
                            let fatal = matches!(e, SessionError::Transport(_));
                            let _ = reply.send(Err(e.into()));
                            if fatal {
                                disconnect_reason = "send failed".to_string();
                                break;
                            }
                        }
                    }
                }
                Some(Command::Close) | None => {
                    disconnect_reason = "closed".to_string();
                    break;
                }
            },
            inbound = reader.next_message() => match inbound {
                Ok(Some(Message::Reply { message_id, envelope })) => {
                    match Response::from_envelope(&envelope) {
                        Ok(response) => {
                            if !registry.deliver(session_id, &message_id, response) {
                                tracing::warn!(
                                    session_id,
                                    message_id = %message_id,
                                    "dropping reply with no outstanding request"
                                );
                            }
                        }
                        Err(e) => {
                            tracing::warn!(session_id, error = %e, "unparseable rpc-reply");
                        }
                    }
                }
                Ok(Some(other)) => {
                    tracing::warn!(
                        session_id,
                        "ignoring unexpected server-initiated message: {other:?}"
                    );
                }
                Ok(None) => {
                    disconnect_reason = "peer closed".to_string();
                    break;
                }
                Err(e) => {
                    disconnect_reason = e.to_string();
                    break;
                }
            },
        }
    }

    connected.store(false, Ordering::SeqCst);
    registry.fail_session(session_id, &disconnect_reason);
    reaper.abort();
    if let Err(e) = reader.close().await {
        tracing::debug!(session_id, error = %e, "error closing session transport");
    }
    tracing::debug!(session_id, reason = %disconnect_reason, "client session ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use netd_transport::{PeerIdentity, PeerInfo, StreamTransport, Transport};
    use netd_yang::{Datastore, Message, Request, Response};

    fn client_config() -> ClientConfig {
        ClientConfig {
            expect_ttl_secs: 1,
            reap_interval_secs: 1,
        }
    }

    /// A server half speaking raw sessions over a duplex pipe.
    fn pipe() -> (Session, Session) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let registry = Arc::new(SchemaRegistry::bundled());
        let mk = |s| {
            let transport = Box::new(StreamTransport::new(
                s,
                PeerInfo::new("pipe", PeerIdentity::Anonymous),
            )) as Box<dyn Transport>;
            MessageStream::new(transport, 1 << 20)
        };
        let server = Session::new(
            7,
            mk(a),
            registry.clone(),
            CapabilitySet::server_base(),
        );
        let client = Session::new(0, mk(b), registry, CapabilitySet::client_base());
        (server, client)
    }

    #[tokio::test]
    async fn send_rpc_resolves_with_reply() {
        let (mut server, client_session) = pipe();
        let server_task = tokio::spawn(async move {
            server.server_handshake().await.unwrap();
            // Answer exactly one request with <ok/>.
            let Some(Message::Rpc { message_id, .. }) = server.next_message().await.unwrap()
            else {
                panic!("expected rpc");
            };
            server.send_reply(&message_id, &Response::Ok).await.unwrap();
            server
        });

        let client = NetconfClient::start(client_session, &client_config())
            .await
            .unwrap();
        assert!(client.is_connected());
        assert_eq!(client.session_id(), 7);

        let response = client.lock(Datastore::Candidate).await.unwrap();
        assert_eq!(response, Response::Ok);
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn silent_server_times_out_and_late_reply_is_dropped() {
        let (mut server, client_session) = pipe();
        let server_task = tokio::spawn(async move {
            server.server_handshake().await.unwrap();
            // Swallow the request, reply only after the client's TTL.
            let Some(Message::Rpc { message_id, .. }) = server.next_message().await.unwrap()
            else {
                panic!("expected rpc");
            };
            tokio::time::sleep(Duration::from_millis(2500)).await;
            let _ = server.send_reply(&message_id, &Response::Ok).await;
            server
        });

        let client = NetconfClient::start(client_session, &client_config())
            .await
            .unwrap();
        let err = client.get(None).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Expect(ExpectFailure::Timeout { .. })
        ));
        // The late reply must not wake anyone; the client just logs it.
        server_task.await.unwrap();
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn transport_loss_fails_in_flight_rpcs() {
        let (mut server, client_session) = pipe();
        let server_task = tokio::spawn(async move {
            server.server_handshake().await.unwrap();
            let _ = server.next_message().await;
            // Drop the connection without replying.
            server.close().await.unwrap();
        });

        let client = NetconfClient::start(client_session, &client_config())
            .await
            .unwrap();
        let err = client.get_config(Datastore::Running, None).await.unwrap_err();
        // Depending on timing the loss surfaces at send, at the
        // expectation, or as an already-dead driver.
        assert!(matches!(
            err,
            ClientError::Expect(ExpectFailure::SessionLost(_))
                | ClientError::Expect(ExpectFailure::Timeout { .. })
                | ClientError::Session(_)
                | ClientError::NotConnected
        ));
        server_task.await.unwrap();
        // Give the driver a beat to finish tearing down.
        for _ in 0..50 {
            if !client.is_connected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!client.is_connected());
    }
}

