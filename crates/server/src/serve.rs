//! Accept loops and the per-session task.
//!
//! Each configured binding gets an accept loop; every accepted
//! transport becomes one session task. Within a task, requests are
//! processed strictly in receive order and the reply is written before
//! the next request is read. That, plus the transport's own send
//! suspension, is the per-session backpressure bound.

use std::sync::Arc;

use netd_session::{Session, SessionError};
use netd_transport::tls::IdentityFiles;
use netd_transport::{
    FrameError, MessageStream, Transport, TransportError, TransportListener,
};
use netd_yang::{xml, Message, Request, Response, RpcError, NETCONF_NS};

use crate::dispatch::{self, Caller, DispatchOutcome};
use crate::state::ServerState;

/// Bind every configured listener and serve until `shutdown` resolves.
pub async fn run(
    state: Arc<ServerState>,
    config: &netd_domain::Config,
    shutdown: impl std::future::Future<Output = ()>,
) -> anyhow::Result<()> {
    let mut loops = Vec::new();

    if let Some(path) = &config.listen.local {
        let listener = netd_transport::local::LocalListener::bind(path)?;
        loops.push(tokio::spawn(accept_loop(
            Box::new(listener) as Box<dyn TransportListener>,
            state.clone(),
            "local",
        )));
    }
    if let Some(tls) = &config.listen.tls {
        let identity = IdentityFiles {
            cert: tls.cert.clone(),
            key: tls.key.clone(),
            ca: tls.ca.clone(),
        };
        let listener = netd_transport::tls::TlsListener::bind(&tls.addr, &identity).await?;
        loops.push(tokio::spawn(accept_loop(
            Box::new(listener) as Box<dyn TransportListener>,
            state.clone(),
            "tls",
        )));
    }
    if let Some(dtls) = &config.listen.dtls {
        let identity = IdentityFiles {
            cert: dtls.cert.clone(),
            key: dtls.key.clone(),
            ca: dtls.ca.clone(),
        };
        let listener =
            netd_transport::dtls::DtlsListener::bind(&dtls.addr, &identity, dtls.mtu).await?;
        loops.push(tokio::spawn(accept_loop(
            Box::new(listener) as Box<dyn TransportListener>,
            state.clone(),
            "dtls",
        )));
    }
    if let Some(http) = &config.listen.http {
        let identity = match (&http.cert, &http.key, &http.ca) {
            (Some(cert), Some(key), Some(ca)) => Some(IdentityFiles {
                cert: cert.clone(),
                key: key.clone(),
                ca: ca.clone(),
            }),
            _ => None,
        };
        let listener =
            netd_transport::http::HttpListener::bind(&http.addr, identity.as_ref(), state.max_frame)
                .await?;
        loops.push(tokio::spawn(accept_loop(
            Box::new(listener) as Box<dyn TransportListener>,
            state.clone(),
            "http",
        )));
    }

    anyhow::ensure!(!loops.is_empty(), "no listeners configured");
    tracing::info!(listeners = loops.len(), "netd serving");

    shutdown.await;
    tracing::info!("shutting down, closing sessions");
    state.sessions.kill_all();
    for task in loops {
        task.abort();
    }
    Ok(())
}

pub async fn accept_loop(
    mut listener: Box<dyn TransportListener>,
    state: Arc<ServerState>,
    label: &'static str,
) {
    loop {
        match listener.accept().await {
            Ok(transport) => {
                tokio::spawn(session_task(state.clone(), transport, label));
            }
            Err(TransportError::Closed) => {
                tracing::info!(transport = label, "listener closed");
                return;
            }
            Err(e) => {
                // Handshake failures are per-connection; keep accepting.
                tracing::warn!(transport = label, error = %e, "accept failed");
            }
        }
    }
}

pub async fn session_task(state: Arc<ServerState>, transport: Box<dyn Transport>, label: &'static str) {
    let session_id = state.sessions.allocate_id();
    let peer = transport.peer().clone();
    let stream = MessageStream::new(transport, state.max_frame);
    let mut session = Session::new(
        session_id,
        stream,
        state.registry.clone(),
        state.capabilities.clone(),
    );
    state.sessions.register(
        session_id,
        format!("{} ({})", peer.address, peer.identity),
        label,
        session.cancellation(),
    );

    if let Err(e) = session.server_handshake().await {
        tracing::warn!(session_id, error = %e, "hello exchange failed");
        if matches!(e, SessionError::NotAHello) {
            let err = RpcError::new(
                netd_yang::ErrorType::Protocol,
                netd_yang::ErrorTag::OperationFailed,
            )
            .with_message("expected hello before any rpc");
            let _ = session.send_raw(&unaddressed_error_reply(err)).await;
        }
        finish(&state, session, session_id).await;
        return;
    }

    loop {
        match session.next_message().await {
            Ok(Some(Message::Rpc {
                message_id,
                envelope,
            })) => {
                let caller = Caller {
                    session_id,
                    negotiated: session.negotiated(),
                };
                let outcome = match Request::from_envelope(&envelope, state.registry.as_ref()) {
                    Ok(request) => {
                        tracing::debug!(
                            session_id,
                            message_id = %message_id,
                            operation = request.operation_name(),
                            "rpc"
                        );
                        dispatch::handle(&state, caller, request).await
                    }
                    Err(err) => DispatchOutcome {
                        response: Response::error(err),
                        close: false,
                    },
                };
                if let Err(e) = session.send_reply(&message_id, &outcome.response).await {
                    tracing::warn!(session_id, error = %e, "reply send failed");
                    break;
                }
                if outcome.close {
                    session.begin_close();
                    break;
                }
            }
            Ok(Some(Message::Hello(_))) => {
                // A second hello is not answerable; drop the session.
                tracing::warn!(session_id, "unexpected hello on active session");
                let _ = session
                    .send_raw(&unaddressed_error_reply(RpcError::malformed_message()))
                    .await;
                break;
            }
            Ok(Some(Message::Reply { message_id, .. })) => {
                tracing::warn!(
                    session_id,
                    message_id = %message_id,
                    "ignoring rpc-reply sent by client"
                );
            }
            Ok(None) => {
                tracing::debug!(session_id, "peer closed");
                break;
            }
            Err(SessionError::Codec(e)) => {
                // Message-id was unrecoverable: answer unaddressed,
                // then close.
                tracing::warn!(session_id, error = %e, "malformed message");
                let _ = session
                    .send_raw(&unaddressed_error_reply(RpcError::malformed_message()))
                    .await;
                break;
            }
            Err(SessionError::Transport(TransportError::Frame(FrameError::TooBig {
                size,
                limit,
            }))) => {
                tracing::warn!(session_id, size, limit, "oversized message");
                let _ = session
                    .send_raw(&unaddressed_error_reply(RpcError::too_big()))
                    .await;
                break;
            }
            Err(e) => {
                tracing::warn!(session_id, error = %e, "session error");
                break;
            }
        }
    }

    finish(&state, session, session_id).await;
}

/// Common teardown: locks evaporate, unconfirmed commits revert, the
/// registry entry goes away.
async fn finish(state: &Arc<ServerState>, mut session: Session, session_id: u32) {
    state.stores.release_locks(session_id);
    state
        .stores
        .abort_confirmed_for_session(&state.backend, session_id)
        .await;
    state.sessions.remove(session_id);
    session.begin_close();
    if let Err(e) = session.close().await {
        tracing::debug!(session_id, error = %e, "transport close failed");
    }
}

/// An `rpc-reply` with no message-id, for errors where the id could not
/// be recovered.
fn unaddressed_error_reply(err: RpcError) -> Vec<u8> {
    let reply = netd_yang::tree::DataNode::container("rpc-reply")
        .with_namespace(NETCONF_NS)
        .with_child(err.to_tree());
    xml::serialize(&reply)
}
