//! NETCONF session layer: one object per connected peer.
//!
//! A session owns its transport exclusively, walks the hello exchange,
//! enforces the state machine, and allocates monotonic message-ids.
//! Both the daemon and the client build on this crate; only the
//! direction of the handshake differs.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use netd_domain::{CapabilitySet, Negotiated};
use netd_transport::{FramingMode, MessageStream, PeerInfo, TransportError};
use netd_yang::{Hello, Message, Request, Response, SchemaRegistry};
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("codec: {0}")]
    Codec(#[from] netd_yang::CodecError),

    #[error("peer closed during hello exchange")]
    HelloAborted,

    #[error("expected hello, peer sent something else")]
    NotAHello,

    #[error("peer advertises no common base capability")]
    NoCommonBase,

    #[error("session state {0:?} does not allow {1}")]
    BadState(SessionState, &'static str),

    #[error("illegal state transition {0:?} -> {1:?}")]
    BadTransition(SessionState, SessionState),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State machine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initializing,
    HelloSent,
    HelloReceived,
    Active,
    Closing,
    Closed,
}

impl SessionState {
    fn rank(self) -> u8 {
        match self {
            SessionState::Initializing => 0,
            SessionState::HelloSent | SessionState::HelloReceived => 1,
            SessionState::Active => 2,
            SessionState::Closing => 3,
            SessionState::Closed => 4,
        }
    }

    /// States may only move forward; closing/closed are reachable from
    /// anywhere.
    fn allows(self, next: SessionState) -> bool {
        match next {
            SessionState::Closing | SessionState::Closed => true,
            _ => next.rank() == self.rank() + 1 && self != SessionState::Closing,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Session {
    id: u32,
    stream: MessageStream,
    registry: Arc<SchemaRegistry>,
    state: SessionState,
    local_capabilities: CapabilitySet,
    peer_capabilities: CapabilitySet,
    negotiated: Negotiated,
    next_message_id: u64,
    /// Session id the server advertised (client side only).
    peer_session_id: Option<u32>,
    created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        id: u32,
        stream: MessageStream,
        registry: Arc<SchemaRegistry>,
        local_capabilities: CapabilitySet,
    ) -> Self {
        Session {
            id,
            stream,
            registry,
            state: SessionState::Initializing,
            local_capabilities,
            peer_capabilities: CapabilitySet::new(),
            negotiated: Negotiated::default(),
            next_message_id: 0,
            peer_session_id: None,
            created_at: Utc::now(),
        }
    }

    // ── accessors ───────────────────────────────────────────────────

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn peer(&self) -> &PeerInfo {
        self.stream.peer()
    }

    pub fn peer_capabilities(&self) -> &CapabilitySet {
        &self.peer_capabilities
    }

    pub fn negotiated(&self) -> Negotiated {
        self.negotiated
    }

    pub fn peer_session_id(&self) -> Option<u32> {
        self.peer_session_id
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Strictly monotonic, starting at 1.
    pub fn next_message_id(&mut self) -> String {
        self.next_message_id += 1;
        self.next_message_id.to_string()
    }

    fn transition(&mut self, next: SessionState) -> Result<(), SessionError> {
        if !self.state.allows(next) {
            return Err(SessionError::BadTransition(self.state, next));
        }
        tracing::trace!(session_id = self.id, from = ?self.state, to = ?next, "session state");
        self.state = next;
        Ok(())
    }

    // ── hello exchange ──────────────────────────────────────────────

    /// Server side: send our hello (with session-id), then require the
    /// peer's. Framing switches to chunked when both ends speak 1.1.
    pub async fn server_handshake(&mut self) -> Result<(), SessionError> {
        let hello = Hello::new(self.local_capabilities.clone()).with_session_id(self.id);
        self.stream.write_message(&hello.to_xml()).await?;
        self.transition(SessionState::HelloSent)?;

        let peer_hello = self.read_hello().await?;
        self.finish_handshake(peer_hello)
    }

    /// Client side: the server speaks first; we answer.
    pub async fn client_handshake(&mut self) -> Result<(), SessionError> {
        let peer_hello = self.read_hello().await?;
        self.transition(SessionState::HelloReceived)?;
        self.peer_session_id = peer_hello.session_id;

        let hello = Hello::new(self.local_capabilities.clone());
        self.stream.write_message(&hello.to_xml()).await?;
        self.finish_handshake(peer_hello)
    }

    async fn read_hello(&mut self) -> Result<Hello, SessionError> {
        let bytes = self
            .stream
            .next_message()
            .await?
            .ok_or(SessionError::HelloAborted)?;
        match Message::parse(&bytes)? {
            Message::Hello(hello) => Ok(hello),
            _ => Err(SessionError::NotAHello),
        }
    }

    fn finish_handshake(&mut self, peer_hello: Hello) -> Result<(), SessionError> {
        use netd_domain::capability::urns;

        let caps = peer_hello.capabilities;
        if !caps.contains(urns::BASE_1_0) && !caps.contains(urns::BASE_1_1) {
            return Err(SessionError::NoCommonBase);
        }
        self.negotiated = self.local_capabilities.negotiate(&caps);
        self.peer_capabilities = caps;
        self.transition(SessionState::Active)?;

        if self.negotiated.base_1_1 {
            self.stream.set_mode(FramingMode::Chunked);
        }
        tracing::debug!(
            session_id = self.id,
            peer = %self.peer().identity,
            chunked = self.negotiated.base_1_1,
            "session active"
        );
        Ok(())
    }

    // ── message I/O ─────────────────────────────────────────────────

    /// Next inbound message. `Ok(None)` is an orderly peer EOF.
    pub async fn next_message(&mut self) -> Result<Option<Message>, SessionError> {
        if matches!(self.state, SessionState::Closed) {
            return Err(SessionError::BadState(self.state, "recv"));
        }
        let Some(bytes) = self.stream.next_message().await? else {
            return Ok(None);
        };
        Ok(Some(Message::parse(&bytes)?))
    }

    /// Client side: allocate an id, send the request, return the id.
    pub async fn send_request(&mut self, request: &Request) -> Result<String, SessionError> {
        if !self.is_active() {
            return Err(SessionError::BadState(self.state, "send-request"));
        }
        let id = self.next_message_id();
        let envelope = request.to_envelope(&id);
        self.stream
            .write_message(&netd_yang::xml::serialize(&envelope))
            .await?;
        Ok(id)
    }

    /// Server side: reply to a request, echoing its message-id.
    pub async fn send_reply(
        &mut self,
        message_id: &str,
        response: &Response,
    ) -> Result<(), SessionError> {
        if !matches!(self.state, SessionState::Active | SessionState::Closing) {
            return Err(SessionError::BadState(self.state, "send-reply"));
        }
        self.stream
            .write_message(&response.to_xml(message_id))
            .await?;
        Ok(())
    }

    /// Send raw pre-rendered XML (used for error replies built before
    /// the request could be fully lifted).
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        self.stream.write_message(bytes).await?;
        Ok(())
    }

    // ── teardown ────────────────────────────────────────────────────

    pub fn begin_close(&mut self) {
        if self.state.allows(SessionState::Closing) && self.state != SessionState::Closed {
            let _ = self.transition(SessionState::Closing);
        }
    }

    pub async fn close(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Closed {
            let _ = self.transition(SessionState::Closed);
            self.stream.close().await?;
        }
        Ok(())
    }

    /// Cancellation token of the underlying transport; cancelling it
    /// from another task aborts this session's blocked I/O.
    pub fn cancellation(&self) -> CancellationToken {
        self.stream.cancellation()
    }

    /// Split an active session for concurrent receive and send (the
    /// client's reader task and RPC writers). The transport's internal
    /// synchronization keeps the halves independent.
    pub fn split(self) -> Result<(SessionReader, SessionWriter), SessionError> {
        if self.state != SessionState::Active {
            return Err(SessionError::BadState(self.state, "split"));
        }
        let writer = SessionWriter {
            id: self.id,
            transport: self.stream.transport(),
            mode: self.stream.mode(),
            max_frame: self.stream.max_frame(),
            next_message_id: self.next_message_id,
        };
        let reader = SessionReader {
            id: self.id,
            stream: self.stream,
        };
        Ok((reader, writer))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Split halves
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Receive half of a split session.
pub struct SessionReader {
    id: u32,
    stream: MessageStream,
}

impl SessionReader {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub async fn next_message(&mut self) -> Result<Option<Message>, SessionError> {
        let Some(bytes) = self.stream.next_message().await? else {
            return Ok(None);
        };
        Ok(Some(Message::parse(&bytes)?))
    }

    pub async fn close(&mut self) -> Result<(), SessionError> {
        self.stream.close().await?;
        Ok(())
    }
}

/// Send half of a split session; keeps the message-id counter.
pub struct SessionWriter {
    id: u32,
    transport: std::sync::Arc<dyn netd_transport::Transport>,
    mode: FramingMode,
    max_frame: usize,
    next_message_id: u64,
}

impl SessionWriter {
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Allocate an id, frame and send the request, return the id.
    pub async fn send_request(&mut self, request: &Request) -> Result<String, SessionError> {
        self.next_message_id += 1;
        let message_id = self.next_message_id.to_string();
        let envelope = request.to_envelope(&message_id);
        let payload = netd_yang::xml::serialize(&envelope);

        let mut wire = bytes::BytesMut::with_capacity(payload.len() + 16);
        netd_transport::encode_frame(self.mode, self.max_frame, &payload, &mut wire)
            .map_err(TransportError::Frame)?;
        self.transport.send(&wire).await?;
        Ok(message_id)
    }
}
