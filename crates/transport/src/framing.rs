//! RFC 6242 message framing.
//!
//! Two modes: end-of-message (`]]>]]>` delimiter, NETCONF 1.0) and
//! chunked (`\n#<len>\n … \n##\n`, NETCONF 1.1). Sessions start in
//! end-of-message and switch after the hello exchange when both sides
//! advertise base 1.1.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// The legacy end-of-message delimiter.
pub const EOM_DELIMITER: &[u8] = b"]]>]]>";

/// Largest chunk length the chunked grammar admits (RFC 6242 §4.2).
pub const MAX_CHUNK_LEN: u64 = 4_294_967_295;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FramingMode {
    #[default]
    EndOfMessage,
    Chunked,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("message of {size} bytes exceeds the {limit}-byte limit")]
    TooBig { size: usize, limit: usize },

    #[error("malformed chunk framing: {0}")]
    BadChunk(String),

    #[error("message body contains the end-of-message delimiter")]
    DelimiterInMessage,

    #[error("peer closed mid-message")]
    TruncatedMessage,

    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Codec
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Stateful framing codec usable with any buffered byte source.
#[derive(Debug)]
pub struct FrameCodec {
    mode: FramingMode,
    max_frame: usize,
    /// Chunked-mode reassembly buffer.
    assembled: BytesMut,
    /// Bytes still owed by the chunk being read.
    chunk_remaining: usize,
    /// Whether at least one chunk was seen for the current message.
    saw_chunk: bool,
}

impl FrameCodec {
    pub fn new(max_frame: usize) -> Self {
        FrameCodec {
            mode: FramingMode::EndOfMessage,
            max_frame,
            assembled: BytesMut::new(),
            chunk_remaining: 0,
            saw_chunk: false,
        }
    }

    pub fn mode(&self) -> FramingMode {
        self.mode
    }

    /// Switch framing (at hello time). Any partially assembled message
    /// is discarded; the switch is only legal on a message boundary.
    pub fn set_mode(&mut self, mode: FramingMode) {
        self.mode = mode;
        self.assembled.clear();
        self.chunk_remaining = 0;
        self.saw_chunk = false;
    }

    // ── end-of-message ──────────────────────────────────────────────

    fn decode_eom(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, FrameError> {
        if let Some(pos) = find_subsequence(src, EOM_DELIMITER) {
            if pos > self.max_frame {
                return Err(FrameError::TooBig {
                    size: pos,
                    limit: self.max_frame,
                });
            }
            let frame = src.split_to(pos).freeze();
            src.advance(EOM_DELIMITER.len());
            return Ok(Some(frame));
        }
        // No delimiter yet: bound the buffer so a peer cannot grow it
        // without ever terminating a message.
        if src.len() > self.max_frame + EOM_DELIMITER.len() {
            return Err(FrameError::TooBig {
                size: src.len(),
                limit: self.max_frame,
            });
        }
        Ok(None)
    }

    // ── chunked ─────────────────────────────────────────────────────

    fn decode_chunked(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, FrameError> {
        loop {
            // Finish the chunk in progress first.
            if self.chunk_remaining > 0 {
                let take = self.chunk_remaining.min(src.len());
                self.assembled.extend_from_slice(&src[..take]);
                src.advance(take);
                self.chunk_remaining -= take;
                if self.chunk_remaining > 0 {
                    return Ok(None);
                }
            }

            match parse_chunk_header(src)? {
                ChunkHeader::NeedMore => return Ok(None),
                ChunkHeader::EndOfChunks => {
                    if !self.saw_chunk {
                        return Err(FrameError::BadChunk(
                            "end-of-chunks before any chunk".into(),
                        ));
                    }
                    self.saw_chunk = false;
                    return Ok(Some(self.assembled.split().freeze()));
                }
                ChunkHeader::Chunk(len) => {
                    let len = usize::try_from(len).map_err(|_| FrameError::TooBig {
                        size: usize::MAX,
                        limit: self.max_frame,
                    })?;
                    if self.assembled.len() + len > self.max_frame {
                        return Err(FrameError::TooBig {
                            size: self.assembled.len() + len,
                            limit: self.max_frame,
                        });
                    }
                    self.saw_chunk = true;
                    self.chunk_remaining = len;
                }
            }
        }
    }
}

enum ChunkHeader {
    NeedMore,
    EndOfChunks,
    Chunk(u64),
}

/// Parse `\n#<len>\n` or `\n##\n` off the front of `src`, consuming it.
fn parse_chunk_header(src: &mut BytesMut) -> Result<ChunkHeader, FrameError> {
    if src.len() < 3 {
        return Ok(ChunkHeader::NeedMore);
    }
    if !src.starts_with(b"\n#") {
        return Err(FrameError::BadChunk(format!(
            "expected chunk header, got {:?}",
            &src[..src.len().min(8)]
        )));
    }
    if src[2] == b'#' {
        if src.len() < 4 {
            return Ok(ChunkHeader::NeedMore);
        }
        if src[3] != b'\n' {
            return Err(FrameError::BadChunk("bad end-of-chunks marker".into()));
        }
        src.advance(4);
        return Ok(ChunkHeader::EndOfChunks);
    }

    // Decimal length, 1..=10 digits, terminated by '\n'.
    let mut idx = 2;
    while idx < src.len() && src[idx].is_ascii_digit() {
        idx += 1;
        if idx - 2 > 10 {
            return Err(FrameError::BadChunk("chunk length too long".into()));
        }
    }
    if idx == 2 {
        return Err(FrameError::BadChunk("non-decimal chunk length".into()));
    }
    if idx >= src.len() {
        return Ok(ChunkHeader::NeedMore);
    }
    if src[idx] != b'\n' {
        return Err(FrameError::BadChunk("non-decimal chunk length".into()));
    }

    let digits = std::str::from_utf8(&src[2..idx]).expect("digits are ASCII");
    let len: u64 = digits
        .parse()
        .map_err(|_| FrameError::BadChunk(format!("bad chunk length `{digits}`")))?;
    if len == 0 || len > MAX_CHUNK_LEN {
        return Err(FrameError::BadChunk(format!(
            "chunk length {len} outside 1..{MAX_CHUNK_LEN}"
        )));
    }
    src.advance(idx + 1);
    Ok(ChunkHeader::Chunk(len))
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, FrameError> {
        if src.is_empty() && self.chunk_remaining == 0 && !self.saw_chunk {
            return Ok(None);
        }
        match self.mode {
            FramingMode::EndOfMessage => self.decode_eom(src),
            FramingMode::Chunked => self.decode_chunked(src),
        }
    }
}

/// Frame one message. Shared by the codec and by writers that only
/// carry a mode, not decode state.
pub fn encode_frame(
    mode: FramingMode,
    max_frame: usize,
    item: &[u8],
    dst: &mut BytesMut,
) -> Result<(), FrameError> {
    if item.len() > max_frame {
        return Err(FrameError::TooBig {
            size: item.len(),
            limit: max_frame,
        });
    }
    match mode {
        FramingMode::EndOfMessage => {
            if find_subsequence(item, EOM_DELIMITER).is_some() {
                return Err(FrameError::DelimiterInMessage);
            }
            dst.reserve(item.len() + EOM_DELIMITER.len());
            dst.put_slice(item);
            dst.put_slice(EOM_DELIMITER);
        }
        FramingMode::Chunked => {
            if item.is_empty() {
                return Err(FrameError::BadChunk("cannot frame an empty message".into()));
            }
            let header = format!("\n#{}\n", item.len());
            dst.reserve(header.len() + item.len() + 4);
            dst.put_slice(header.as_bytes());
            dst.put_slice(item);
            dst.put_slice(b"\n##\n");
        }
    }
    Ok(())
}

impl Encoder<&[u8]> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<(), FrameError> {
        encode_frame(self.mode, self.max_frame, item, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: usize = 1024;

    fn decode_all(codec: &mut FrameCodec, input: &[u8]) -> Result<Vec<Bytes>, FrameError> {
        let mut src = BytesMut::from(input);
        let mut out = Vec::new();
        while let Some(frame) = codec.decode(&mut src)? {
            out.push(frame);
        }
        Ok(out)
    }

    #[test]
    fn eom_roundtrip() {
        let mut codec = FrameCodec::new(LIMIT);
        let mut wire = BytesMut::new();
        codec.encode(b"<hello/>", &mut wire).unwrap();
        assert_eq!(&wire[..], b"<hello/>]]>]]>");

        let frames = decode_all(&mut codec, &wire).unwrap();
        assert_eq!(frames, vec![Bytes::from_static(b"<hello/>")]);
    }

    #[test]
    fn eom_split_across_reads() {
        let mut codec = FrameCodec::new(LIMIT);
        let mut src = BytesMut::from(&b"<rpc>...</rpc>]]>"[..]);
        assert!(codec.decode(&mut src).unwrap().is_none());
        src.extend_from_slice(b"]]>");
        let frame = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(&frame[..], b"<rpc>...</rpc>");
    }

    #[test]
    fn eom_encoder_rejects_embedded_delimiter() {
        let mut codec = FrameCodec::new(LIMIT);
        let mut wire = BytesMut::new();
        let err = codec.encode(b"bad ]]>]]> body", &mut wire).unwrap_err();
        assert!(matches!(err, FrameError::DelimiterInMessage));
    }

    #[test]
    fn eom_unterminated_overflow_is_too_big() {
        let mut codec = FrameCodec::new(16);
        let mut src = BytesMut::from(&b"x"[..]);
        src.extend_from_slice(&[b'y'; 64]);
        let err = codec.decode(&mut src).unwrap_err();
        assert!(matches!(err, FrameError::TooBig { .. }));
    }

    #[test]
    fn chunked_roundtrip() {
        let mut codec = FrameCodec::new(LIMIT);
        codec.set_mode(FramingMode::Chunked);
        let mut wire = BytesMut::new();
        codec.encode(b"<rpc message-id=\"1\"/>", &mut wire).unwrap();
        assert!(wire.starts_with(b"\n#21\n"));
        assert!(wire.ends_with(b"\n##\n"));

        let frames = decode_all(&mut codec, &wire).unwrap();
        assert_eq!(frames, vec![Bytes::from_static(b"<rpc message-id=\"1\"/>")]);
    }

    #[test]
    fn chunked_reassembles_multiple_chunks() {
        let mut codec = FrameCodec::new(LIMIT);
        codec.set_mode(FramingMode::Chunked);
        let frames =
            decode_all(&mut codec, b"\n#5\nhello\n#6\n world\n##\n").unwrap();
        assert_eq!(frames, vec![Bytes::from_static(b"hello world")]);
    }

    #[test]
    fn chunk_of_size_one_is_accepted() {
        let mut codec = FrameCodec::new(LIMIT);
        codec.set_mode(FramingMode::Chunked);
        let frames = decode_all(&mut codec, b"\n#1\nA\n##\n").unwrap();
        assert_eq!(frames, vec![Bytes::from_static(b"A")]);
    }

    #[test]
    fn declared_max_chunk_length_parses() {
        // The grammar's ceiling must be *declarable*; the body then
        // trips the implementation limit, not the parser.
        let mut codec = FrameCodec::new(LIMIT);
        codec.set_mode(FramingMode::Chunked);
        let mut src = BytesMut::from(&b"\n#4294967295\n"[..]);
        let err = codec.decode(&mut src).unwrap_err();
        assert!(matches!(err, FrameError::TooBig { .. }));
    }

    #[test]
    fn zero_chunk_length_is_rejected() {
        let mut codec = FrameCodec::new(LIMIT);
        codec.set_mode(FramingMode::Chunked);
        let mut src = BytesMut::from(&b"\n#0\nx\n##\n"[..]);
        let err = codec.decode(&mut src).unwrap_err();
        assert!(matches!(err, FrameError::BadChunk(_)));
    }

    #[test]
    fn non_decimal_chunk_length_is_rejected() {
        let mut codec = FrameCodec::new(LIMIT);
        codec.set_mode(FramingMode::Chunked);
        let cases: [&[u8]; 3] = [b"\n#ff\nxx\n##\n", b"\n#-1\nx\n##\n", b"\n# 5\nhello\n##\n"];
        for bad in cases {
            let mut src = BytesMut::from(bad);
            assert!(
                matches!(codec.decode(&mut src), Err(FrameError::BadChunk(_))),
                "accepted {:?}",
                bad
            );
            codec.set_mode(FramingMode::Chunked);
        }
    }

    #[test]
    fn end_of_chunks_without_chunk_is_rejected() {
        let mut codec = FrameCodec::new(LIMIT);
        codec.set_mode(FramingMode::Chunked);
        let mut src = BytesMut::from(&b"\n##\n"[..]);
        assert!(matches!(
            codec.decode(&mut src),
            Err(FrameError::BadChunk(_))
        ));
    }

    #[test]
    fn oversized_declared_chunk_fails_without_partial_parse() {
        let mut codec = FrameCodec::new(16);
        codec.set_mode(FramingMode::Chunked);
        let mut src = BytesMut::from(&b"\n#1000\n"[..]);
        let err = codec.decode(&mut src).unwrap_err();
        assert!(matches!(err, FrameError::TooBig { .. }));
    }

    #[test]
    fn chunked_header_split_across_reads() {
        let mut codec = FrameCodec::new(LIMIT);
        codec.set_mode(FramingMode::Chunked);
        let mut src = BytesMut::from(&b"\n#1"[..]);
        assert!(codec.decode(&mut src).unwrap().is_none());
        src.extend_from_slice(b"1\nhello world\n##\n");
        let frame = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(&frame[..], b"hello world");
    }
}
