//! Generic stream transport and the message pump.
//!
//! [`StreamTransport`] adapts any `AsyncRead + AsyncWrite` stream (Unix
//! socket, TLS-over-TCP) to the [`Transport`] trait: the stream is
//! split into halves behind independent locks so sends and receives do
//! not serialize against each other. [`MessageStream`] layers the
//! framing codec over any transport and is what sessions hold.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;

use crate::framing::{encode_frame, FrameCodec, FramingMode};
use crate::{PeerInfo, Transport, TransportError};

use async_trait::async_trait;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// StreamTransport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct StreamTransport<S> {
    read: Mutex<ReadHalf<S>>,
    write: Mutex<WriteHalf<S>>,
    peer: PeerInfo,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send,
{
    pub fn new(stream: S, peer: PeerInfo) -> Self {
        let (read, write) = tokio::io::split(stream);
        StreamTransport {
            read: Mutex::new(read),
            write: Mutex::new(write),
            peer,
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + Sync,
{
    async fn send(&self, buf: &[u8]) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(TransportError::Canceled),
            res = async {
                let mut write = self.write.lock().await;
                write.write_all(buf).await?;
                write.flush().await
            } => {
                res?;
                Ok(())
            }
        }
    }

    async fn recv(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(TransportError::Canceled),
            res = async { self.read.lock().await.read(buf).await } => Ok(res?),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.cancel.cancel();
            let _ = self.write.lock().await.shutdown().await;
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
// MessageStream
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const READ_CHUNK: usize = 8 * 1024;

/// Discrete NETCONF messages over any transport. Single reader: the
/// decode buffer lives here, not in the transport.
pub struct MessageStream {
    transport: Arc<dyn Transport>,
    codec: FrameCodec,
    rd: BytesMut,
    max_frame: usize,
}

impl MessageStream {
    pub fn new(transport: Box<dyn Transport>, max_frame: usize) -> Self {
        MessageStream {
            transport: Arc::from(transport),
            codec: FrameCodec::new(max_frame),
            rd: BytesMut::with_capacity(READ_CHUNK),
            max_frame,
        }
    }

    pub fn peer(&self) -> &PeerInfo {
        self.transport.peer()
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.transport.cancellation()
    }

    pub fn mode(&self) -> FramingMode {
        self.codec.mode()
    }

    pub fn max_frame(&self) -> usize {
        self.max_frame
    }

    /// Shared handle to the transport, for a writer that lives apart
    /// from this reader.
    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    /// Switch framing after the hello exchange.
    pub fn set_mode(&mut self, mode: FramingMode) {
        self.codec.set_mode(mode);
    }

    /// Next complete message, `Ok(None)` on orderly EOF between
    /// messages. EOF mid-message is an error.
    pub async fn next_message(&mut self) -> Result<Option<Bytes>, TransportError> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.rd)? {
                return Ok(Some(frame));
            }
            let mut buf = [0u8; READ_CHUNK];
            let n = self.transport.recv(&mut buf).await?;
            if n == 0 {
                if self.rd.is_empty() {
                    return Ok(None);
                }
                return Err(crate::framing::FrameError::TruncatedMessage.into());
            }
            self.rd.extend_from_slice(&buf[..n]);
        }
    }

    /// Frame and send one message. The transport suspends until the
    /// peer drains it; that suspension is the backpressure bound.
    pub async fn write_message(&mut self, message: &[u8]) -> Result<(), TransportError> {
        let mut wire = BytesMut::with_capacity(message.len() + 16);
        encode_frame(self.codec.mode(), self.max_frame, message, &mut wire)?;
        self.transport.send(&wire).await
    }

    pub async fn close(&mut self) -> Result<(), TransportError> {
        self.transport.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PeerIdentity;

    fn pipe_pair() -> (MessageStream, MessageStream) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let mk = |s| {
            Box::new(StreamTransport::new(
                s,
                PeerInfo::new("duplex", PeerIdentity::Anonymous),
            )) as Box<dyn Transport>
        };
        (
            MessageStream::new(mk(a), 1 << 20),
            MessageStream::new(mk(b), 1 << 20),
        )
    }

    #[tokio::test]
    async fn messages_cross_the_pipe() {
        let (mut left, mut right) = pipe_pair();
        left.write_message(b"<hello/>").await.unwrap();
        let got = right.next_message().await.unwrap().unwrap();
        assert_eq!(&got[..], b"<hello/>");
    }

    #[tokio::test]
    async fn chunked_mode_roundtrip() {
        let (mut left, mut right) = pipe_pair();
        left.set_mode(FramingMode::Chunked);
        right.set_mode(FramingMode::Chunked);
        left.write_message(b"<rpc message-id=\"1\"><get/></rpc>")
            .await
            .unwrap();
        let got = right.next_message().await.unwrap().unwrap();
        assert_eq!(&got[..], b"<rpc message-id=\"1\"><get/></rpc>");
    }

    #[tokio::test]
    async fn orderly_eof_yields_none() {
        let (mut left, mut right) = pipe_pair();
        left.write_message(b"<bye/>").await.unwrap();
        left.close().await.unwrap();
        assert_eq!(
            right.next_message().await.unwrap().as_deref(),
            Some(&b"<bye/>"[..])
        );
        assert!(right.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancellation_aborts_pending_recv() {
        let (_left, mut right) = pipe_pair();
        let token = right.cancellation();
        let reader = tokio::spawn(async move { right.next_message().await });
        token.cancel();
        let err = reader.await.unwrap().unwrap_err();
        assert!(matches!(err, TransportError::Canceled));
    }

    #[tokio::test]
    async fn concurrent_send_and_recv_share_the_transport() {
        let (left, mut right) = pipe_pair();
        let transport = left.transport();

        // A writer sending through the shared handle while a reader
        // sits in recv on the same transport.
        let reader = tokio::spawn(async move {
            let mut out = Vec::new();
            while let Some(frame) = right.next_message().await.unwrap() {
                out.push(frame);
            }
            out
        });

        let mut wire = BytesMut::new();
        encode_frame(FramingMode::EndOfMessage, 1 << 20, b"<one/>", &mut wire).unwrap();
        encode_frame(FramingMode::EndOfMessage, 1 << 20, b"<two/>", &mut wire).unwrap();
        transport.send(&wire).await.unwrap();
        transport.close().await.unwrap();

        let frames = reader.await.unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0][..], b"<one/>");
        assert_eq!(&frames[1][..], b"<two/>");
    }
}
