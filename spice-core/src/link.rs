//! Per-channel link handshake and ticket authentication.
//!
//! # Wire Protocol
//!
//! ```text
//! Client ──[LinkHeader + LinkMess + caps]────► Server
//!   LinkMess: connection_id u32 | channel_type u8 | channel_id u8
//!             | num_common_caps u32 | num_channel_caps u32 | caps_offset u32
//!
//! Server ──[LinkHeader + LinkReply + caps]────► Client
//!   LinkReply: error u32 | pub_key [u8; 162]
//!              | num_common_caps u32 | num_channel_caps u32 | caps_offset u32
//!
//! Client ──[RSA-OAEP(ticket), 128 bytes]──────► Server
//! Server ──[result u32]───────────────────────► Client
//! ```
//!
//! `caps_offset` counts from the start of the link body (just past the
//! header). Capability words are only sent for non-zero masks.

use rsa::pkcs8::DecodePublicKey;
use rsa::{Oaep, RsaPublicKey};
use sha1::Sha1;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::caps::{CommonCaps, ServerCapabilities};
use crate::channel::ChannelType;
use crate::error::{LinkError, SpiceError};
use crate::header::{LinkHeader, le_u32};
use crate::protocol::{MAX_LINK_REPLY_SIZE, MAX_PASSWORD_LENGTH, TICKET_PUBKEY_BYTES};
use crate::reader::{read_packet, read_vec};

// ── LinkMess ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkMess {
    pub connection_id: u32,
    pub channel_type: u8,
    pub channel_id: u8,
    pub num_common_caps: u32,
    pub num_channel_caps: u32,
    pub caps_offset: u32,
}

impl LinkMess {
    pub const SIZE: usize = 18;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.connection_id.to_le_bytes());
        buf[4] = self.channel_type;
        buf[5] = self.channel_id;
        buf[6..10].copy_from_slice(&self.num_common_caps.to_le_bytes());
        buf[10..14].copy_from_slice(&self.num_channel_caps.to_le_bytes());
        buf[14..18].copy_from_slice(&self.caps_offset.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        Self {
            connection_id: le_u32(bytes, 0),
            channel_type: bytes[4],
            channel_id: bytes[5],
            num_common_caps: le_u32(bytes, 6),
            num_channel_caps: le_u32(bytes, 10),
            caps_offset: le_u32(bytes, 14),
        }
    }
}

// ── LinkReply ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkReply {
    pub error: u32,
    /// DER `SubjectPublicKeyInfo` of the server's RSA-1024 ticket key.
    pub pub_key: [u8; TICKET_PUBKEY_BYTES],
    pub num_common_caps: u32,
    pub num_channel_caps: u32,
    pub caps_offset: u32,
}

impl LinkReply {
    pub const SIZE: usize = 4 + TICKET_PUBKEY_BYTES + 12;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.error.to_le_bytes());
        buf[4..166].copy_from_slice(&self.pub_key);
        buf[166..170].copy_from_slice(&self.num_common_caps.to_le_bytes());
        buf[170..174].copy_from_slice(&self.num_channel_caps.to_le_bytes());
        buf[174..178].copy_from_slice(&self.caps_offset.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let mut pub_key = [0u8; TICKET_PUBKEY_BYTES];
        pub_key.copy_from_slice(&bytes[4..166]);
        Self {
            error: le_u32(bytes, 0),
            pub_key,
            num_common_caps: le_u32(bytes, 166),
            num_channel_caps: le_u32(bytes, 170),
            caps_offset: le_u32(bytes, 174),
        }
    }
}

// ── LinkRequest ──────────────────────────────────────────────────

/// What a channel asks for when it links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkRequest {
    pub channel_type: ChannelType,
    pub channel_id: u8,
    /// Zero for the main channel, the server-assigned session id otherwise.
    pub connection_id: u32,
    pub common_caps: CommonCaps,
    pub channel_caps: u32,
}

impl LinkRequest {
    pub fn new(channel_type: ChannelType, connection_id: u32) -> Self {
        Self {
            channel_type,
            channel_id: 0,
            connection_id,
            common_caps: CommonCaps::empty(),
            channel_caps: 0,
        }
    }

    pub fn with_common_caps(mut self, caps: CommonCaps) -> Self {
        self.common_caps = caps;
        self
    }

    pub fn with_channel_caps(mut self, caps: u32) -> Self {
        self.channel_caps = caps;
        self
    }

    fn link_mess(&self) -> LinkMess {
        LinkMess {
            connection_id: self.connection_id,
            channel_type: self.channel_type as u8,
            channel_id: self.channel_id,
            num_common_caps: u32::from(!self.common_caps.is_empty()),
            num_channel_caps: u32::from(self.channel_caps != 0),
            caps_offset: LinkMess::SIZE as u32,
        }
    }

    /// Header, link body and capability words, ready to write.
    pub fn encode(&self) -> Vec<u8> {
        let mess = self.link_mess();
        let mut caps = Vec::with_capacity(8);
        if mess.num_common_caps != 0 {
            caps.extend_from_slice(&self.common_caps.bits().to_le_bytes());
        }
        if mess.num_channel_caps != 0 {
            caps.extend_from_slice(&self.channel_caps.to_le_bytes());
        }

        let header = LinkHeader::new((LinkMess::SIZE + caps.len()) as u32);
        let mut out = Vec::with_capacity(LinkHeader::SIZE + LinkMess::SIZE + caps.len());
        out.extend_from_slice(&header.to_bytes());
        out.extend_from_slice(&mess.to_bytes());
        out.extend_from_slice(&caps);
        out
    }
}

// ── Ticket ───────────────────────────────────────────────────────

/// Encrypt `ticket` for the server key with RSA-OAEP (SHA-1 digest and
/// MGF1, empty label).
pub fn encrypt_ticket(pub_key_der: &[u8], ticket: &[u8]) -> Result<Vec<u8>, SpiceError> {
    if ticket.len() > MAX_PASSWORD_LENGTH {
        return Err(SpiceError::AuthFailed(format!(
            "ticket is {} bytes, limit is {MAX_PASSWORD_LENGTH}",
            ticket.len()
        )));
    }
    let key = RsaPublicKey::from_public_key_der(pub_key_der)
        .map_err(|e| SpiceError::AuthFailed(format!("bad server public key: {e}")))?;
    let mut rng = rand::thread_rng();
    key.encrypt(&mut rng, Oaep::new::<Sha1>(), ticket)
        .map_err(|e| SpiceError::AuthFailed(format!("ticket encryption: {e}")))
}

// ── Negotiation ──────────────────────────────────────────────────

/// Run the full link handshake for one channel on a connected stream.
///
/// On success the stream is positioned at the first post-handshake
/// message and the server's advertised capabilities are returned.
pub async fn negotiate<S>(
    stream: &mut S,
    request: &LinkRequest,
    ticket: &[u8],
) -> Result<ServerCapabilities, SpiceError>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let channel = request.channel_type;
    trace!(%channel, caps = ?request.common_caps, channel_caps = request.channel_caps, "sending link message");
    stream.write_all(&request.encode()).await?;
    stream.flush().await?;

    let mut raw = [0u8; LinkHeader::SIZE];
    read_packet(stream, &mut raw).await?;
    let header = LinkHeader::from_bytes(&raw)?;
    let body_len = header.size as usize;
    if body_len < LinkReply::SIZE {
        return Err(SpiceError::Protocol("link reply shorter than fixed body"));
    }
    if body_len > MAX_LINK_REPLY_SIZE {
        return Err(SpiceError::Protocol("link reply larger than allowed"));
    }

    let mut raw = [0u8; LinkReply::SIZE];
    read_packet(stream, &mut raw).await?;
    let reply = LinkReply::from_bytes(&raw);

    match LinkError::try_from(reply.error)? {
        LinkError::Ok => {}
        code => {
            debug!(%channel, %code, "link rejected");
            return Err(SpiceError::LinkRejected(code));
        }
    }

    // Everything the header announced past the fixed reply: optional
    // padding, then the capability words at `caps_offset`.
    let tail = read_vec(stream, body_len - LinkReply::SIZE).await?;
    let caps_offset = reply.caps_offset as usize;
    if caps_offset < LinkReply::SIZE || caps_offset > body_len {
        return Err(SpiceError::Protocol("link reply caps_offset out of range"));
    }
    let server_caps = ServerCapabilities::parse(
        &tail[caps_offset - LinkReply::SIZE..],
        reply.num_common_caps,
        reply.num_channel_caps,
    );
    debug!(
        %channel,
        common = ?server_caps.common_words(),
        specific = ?server_caps.channel_words(),
        "server capabilities"
    );

    let encrypted = encrypt_ticket(&reply.pub_key, ticket)?;
    stream.write_all(&encrypted).await?;
    stream.flush().await?;

    let mut result = [0u8; 4];
    read_packet(stream, &mut result).await?;
    let code = u32::from_le_bytes(result);
    if code != LinkError::Ok as u32 {
        let reason = LinkError::try_from(code)
            .map(|e| e.to_string())
            .unwrap_or_else(|_| format!("code {code}"));
        return Err(SpiceError::AuthFailed(format!("ticket rejected: {reason}")));
    }

    debug!(%channel, "channel linked");
    Ok(server_caps)
}

// ── Tests ────────────────────────────────────────────────────────
