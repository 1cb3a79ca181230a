//! `tokio_util` framing for post-handshake channel traffic.
//!
//! Every message is a data header followed by exactly `size` payload
//! bytes. The header flavour is fixed per channel once link negotiation
//! has told us whether the server speaks the mini header.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::SpiceError;
use crate::header::{DataHeader, HeaderKind, MiniHeader};

/// Upper bound on a single message body. Display surfaces top out well
/// below this even for uncompressed 4K frames.
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

// ── Message ──────────────────────────────────────────────────────

/// A framed message: type code plus its complete payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub msg_type: u16,
    pub payload: Bytes,
}

impl Message {
    pub fn new(msg_type: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            msg_type,
            payload: payload.into(),
        }
    }

    /// A message with no body (e.g. `ACK`).
    pub fn empty(msg_type: u16) -> Self {
        Self {
            msg_type,
            payload: Bytes::new(),
        }
    }
}

// ── SpiceCodec ───────────────────────────────────────────────────

#[derive(Debug)]
pub struct SpiceCodec {
    kind: HeaderKind,
    /// Serial stamped on the next outbound full-header message.
    next_serial: u64,
}

impl SpiceCodec {
    pub fn new(kind: HeaderKind) -> Self {
        Self {
            kind,
            next_serial: 1,
        }
    }

    pub fn mini() -> Self {
        Self::new(HeaderKind::Mini)
    }

    pub fn full() -> Self {
        Self::new(HeaderKind::Full)
    }

    pub fn kind(&self) -> HeaderKind {
        self.kind
    }

    /// Serial the next encoded message will carry (full header only).
    pub fn next_serial(&self) -> u64 {
        self.next_serial
    }

    /// `src` already holds at least one complete message.
    pub fn has_message(&self, src: &[u8]) -> bool {
        let header_len = self.kind.size();
        if src.len() < header_len {
            return false;
        }
        let (_, size) = self.peek_header(src);
        src.len() - header_len >= size
    }

    fn peek_header(&self, src: &[u8]) -> (u16, usize) {
        match self.kind {
            HeaderKind::Mini => {
                let mut raw = [0u8; MiniHeader::SIZE];
                raw.copy_from_slice(&src[..MiniHeader::SIZE]);
                let hdr = MiniHeader::from_bytes(&raw);
                (hdr.msg_type, hdr.size as usize)
            }
            HeaderKind::Full => {
                let mut raw = [0u8; DataHeader::SIZE];
                raw.copy_from_slice(&src[..DataHeader::SIZE]);
                let hdr = DataHeader::from_bytes(&raw);
                (hdr.msg_type, hdr.size as usize)
            }
        }
    }
}

impl Decoder for SpiceCodec {
    type Item = Message;
    type Error = SpiceError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let header_len = self.kind.size();
        if src.len() < header_len {
            return Ok(None);
        }

        let (msg_type, size) = self.peek_header(src);
        if size > MAX_PAYLOAD_SIZE {
            return Err(SpiceError::PayloadTooLarge {
                size,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let frame_len = header_len + size;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(header_len);
        let payload = src.split_to(size).freeze();
        Ok(Some(Message { msg_type, payload }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(msg) => Ok(Some(msg)),
            None if src.is_empty() => Ok(None),
            // Header announced more than the peer delivered before closing.
            None => Err(SpiceError::ConnectionClosed),
        }
    }
}

impl Encoder<Message> for SpiceCodec {
    type Error = SpiceError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let size = item.payload.len();
        if size > MAX_PAYLOAD_SIZE {
            return Err(SpiceError::PayloadTooLarge {
                size,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        dst.reserve(self.kind.size() + size);
        match self.kind {
            HeaderKind::Mini => {
                let hdr = MiniHeader {
                    msg_type: item.msg_type,
                    size: size as u32,
                };
                dst.put_slice(&hdr.to_bytes());
            }
            HeaderKind::Full => {
                let hdr = DataHeader {
                    serial: self.next_serial,
                    msg_type: item.msg_type,
                    size: size as u32,
                    sub_list: 0,
                };
                self.next_serial += 1;
                dst.put_slice(&hdr.to_bytes());
            }
        }
        dst.put_slice(&item.payload);
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
