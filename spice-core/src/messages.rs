//! Fixed-layout message bodies for the main and display channels.
//!
//! # Wire Protocol
//!
//! ## Keepalive (any channel)
//! ```text
//! Server ──[PING]──────────────────────────► Client
//!   Payload: id u32 | time u64 (+ optional padding)
//!
//! Client ──[PONG]──────────────────────────► Server
//!   Payload: id u32 | time u64   (echoed byte-for-byte)
//! ```
//!
//! ## Flow control (any channel)
//! ```text
//! Server ──[SET_ACK]───────────────────────► Client
//!   Payload: generation u32 | window u32
//!
//! Client ──[ACK_SYNC]──────────────────────► Server
//!   Payload: generation u32
//!
//! Client ──[ACK]───────────────────────────► Server   (every `window` messages)
//!   Payload: empty
//! ```

use bytes::{BufMut, BytesMut};

use crate::codec::Message;
use crate::cursor::WireCursor;
use crate::error::SpiceError;
use crate::protocol::{msg, msgc};

/// Check the message type before decoding a fixed body.
pub fn expect_type(msg: &Message, expected: u16) -> Result<(), SpiceError> {
    if msg.msg_type != expected {
        return Err(SpiceError::UnexpectedMessage {
            expected,
            actual: msg.msg_type,
        });
    }
    Ok(())
}

// ── Ping / Pong ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ping {
    pub id: u32,
    pub time: u64,
}

impl Ping {
    pub const SIZE: usize = 12;

    /// Decode the leading `id`/`time` pair. Trailing bandwidth-probe
    /// padding is ignored.
    pub fn decode(body: &[u8]) -> Result<Self, SpiceError> {
        let mut cur = WireCursor::new(body);
        Ok(Self {
            id: cur.u32()?,
            time: cur.u64()?,
        })
    }

    /// The `PONG` reply echoing this ping.
    pub fn pong(&self) -> Message {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        buf.put_u32_le(self.id);
        buf.put_u64_le(self.time);
        Message::new(msgc::PONG, buf.freeze())
    }
}

// ── Acknowledgement ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetAck {
    pub generation: u32,
    pub window: u32,
}

impl SetAck {
    pub fn decode(body: &[u8]) -> Result<Self, SpiceError> {
        let mut cur = WireCursor::new(body);
        Ok(Self {
            generation: cur.u32()?,
            window: cur.u32()?,
        })
    }

    /// `ACK_SYNC` echoing the generation.
    pub fn ack_sync(&self) -> Message {
        Message::new(msgc::ACK_SYNC, self.generation.to_le_bytes().to_vec())
    }
}

/// The zero-length flow-control acknowledgement.
pub fn ack() -> Message {
    Message::empty(msgc::ACK)
}

// ── Disconnecting ────────────────────────────────────────────────

/// Sent by either side before closing a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disconnecting {
    /// Milliseconds on the sender's monotonic clock.
    pub time_stamp: u64,
    /// A link error code; `0` for an orderly close.
    pub reason: u32,
}

impl Disconnecting {
    pub fn decode(body: &[u8]) -> Result<Self, SpiceError> {
        let mut cur = WireCursor::new(body);
        Ok(Self {
            time_stamp: cur.u64()?,
            reason: cur.u32()?,
        })
    }

    pub fn to_message(&self) -> Message {
        let mut buf = BytesMut::with_capacity(12);
        buf.put_u64_le(self.time_stamp);
        buf.put_u32_le(self.reason);
        Message::new(msgc::DISCONNECTING, buf.freeze())
    }
}

// ── Main channel ─────────────────────────────────────────────────

/// First message on the main channel after linking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MainInit {
    pub session_id: u32,
    pub display_channels_hint: u32,
    pub supported_mouse_modes: u32,
    pub current_mouse_mode: u32,
    pub agent_connected: u32,
    pub agent_tokens: u32,
    pub multi_media_time: u32,
    pub ram_hint: u32,
}

impl MainInit {
    pub const SIZE: usize = 32;

    pub fn decode(body: &[u8]) -> Result<Self, SpiceError> {
        let mut cur = WireCursor::new(body);
        Ok(Self {
            session_id: cur.u32()?,
            display_channels_hint: cur.u32()?,
            supported_mouse_modes: cur.u32()?,
            current_mouse_mode: cur.u32()?,
            agent_connected: cur.u32()?,
            agent_tokens: cur.u32()?,
            multi_media_time: cur.u32()?,
            ram_hint: cur.u32()?,
        })
    }
}

pub fn mouse_mode_request(mode: u16) -> Message {
    Message::new(msgc::main::MOUSE_MODE_REQUEST, mode.to_le_bytes().to_vec())
}

/// Server notification that the active mouse mode changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseMode {
    pub supported_modes: u16,
    pub current_mode: u16,
}

impl MouseMode {
    pub fn decode(body: &[u8]) -> Result<Self, SpiceError> {
        let mut cur = WireCursor::new(body);
        Ok(Self {
            supported_modes: cur.u16()?,
            current_mode: cur.u16()?,
        })
    }
}

// ── Display channel ──────────────────────────────────────────────

/// `DISPLAY_INIT` with every cache disabled.
pub fn display_init() -> Message {
    // cache_id u8 | cache_size i64 | dictionary_id u8 | dictionary_window_size u32
    Message::new(msgc::display::INIT, vec![0u8; 14])
}

pub fn preferred_compression(compression: u8) -> Message {
    Message::new(msgc::display::PREFERRED_COMPRESSION, vec![compression])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayMode {
    pub x_res: u32,
    pub y_res: u32,
    pub bits: u32,
}

impl DisplayMode {
    pub fn decode(body: &[u8]) -> Result<Self, SpiceError> {
        let mut cur = WireCursor::new(body);
        Ok(Self {
            x_res: cur.u32()?,
            y_res: cur.u32()?,
            bits: cur.u32()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceCreate {
    pub surface_id: u32,
    pub width: u32,
    pub height: u32,
    pub format: u32,
    pub flags: u32,
}

impl SurfaceCreate {
    pub fn decode(body: &[u8]) -> Result<Self, SpiceError> {
        let mut cur = WireCursor::new(body);
        Ok(Self {
            surface_id: cur.u32()?,
            width: cur.u32()?,
            height: cur.u32()?,
            format: cur.u32()?,
            flags: cur.u32()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceDestroy {
    pub surface_id: u32,
}

impl SurfaceDestroy {
    pub fn decode(body: &[u8]) -> Result<Self, SpiceError> {
        let mut cur = WireCursor::new(body);
        Ok(Self {
            surface_id: cur.u32()?,
        })
    }
}

/// Human-readable name for common message types, used in trace output.
pub fn describe(msg_type: u16) -> &'static str {
    match msg_type {
        msg::MIGRATE => "MIGRATE",
        msg::MIGRATE_DATA => "MIGRATE_DATA",
        msg::SET_ACK => "SET_ACK",
        msg::PING => "PING",
        msg::WAIT_FOR_CHANNELS => "WAIT_FOR_CHANNELS",
        msg::DISCONNECTING => "DISCONNECTING",
        msg::NOTIFY => "NOTIFY",
        _ => "channel-specific",
    }
}

// ── Tests ────────────────────────────────────────────────────────
