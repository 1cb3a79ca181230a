//! Fixed-size headers: the link header that opens every channel, and the
//! two flavours of per-message data header used after the handshake.
//!
//! ```text
//! LinkHeader (16):  magic u32 | major u32 | minor u32 | size u32
//! MiniHeader  (6):  type u16  | size u32
//! DataHeader (18):  serial u64 | type u16 | size u32 | sub_list u32
//! ```
//!
//! All integers are little-endian.

use crate::error::SpiceError;
use crate::protocol::{MAGIC, VERSION_MAJOR, VERSION_MINOR};

pub(crate) fn le_u16(b: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([b[at], b[at + 1]])
}

pub(crate) fn le_u32(b: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

pub(crate) fn le_u64(b: &[u8], at: usize) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&b[at..at + 8]);
    u64::from_le_bytes(word)
}

// ── LinkHeader ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkHeader {
    pub magic: u32,
    pub major_version: u32,
    pub minor_version: u32,
    /// Byte count of the link body that follows.
    pub size: u32,
}

pub type LinkHeaderBytes = [u8; LinkHeader::SIZE];

impl LinkHeader {
    pub const SIZE: usize = 16;

    pub fn new(size: u32) -> Self {
        Self {
            magic: MAGIC,
            major_version: VERSION_MAJOR,
            minor_version: VERSION_MINOR,
            size,
        }
    }

    pub fn to_bytes(&self) -> LinkHeaderBytes {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.major_version.to_le_bytes());
        buf[8..12].copy_from_slice(&self.minor_version.to_le_bytes());
        buf[12..16].copy_from_slice(&self.size.to_le_bytes());
        buf
    }

    /// Decode and validate the magic.
    pub fn from_bytes(bytes: &LinkHeaderBytes) -> Result<Self, SpiceError> {
        let header = Self {
            magic: le_u32(bytes, 0),
            major_version: le_u32(bytes, 4),
            minor_version: le_u32(bytes, 8),
            size: le_u32(bytes, 12),
        };
        if header.magic != MAGIC {
            return Err(SpiceError::Protocol("invalid link magic"));
        }
        Ok(header)
    }
}

// ── Data headers ─────────────────────────────────────────────────

/// Which per-message header a channel uses, decided by the negotiated
/// `MINI_HEADER` common capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderKind {
    Mini,
    Full,
}

impl HeaderKind {
    pub const fn size(self) -> usize {
        match self {
            HeaderKind::Mini => MiniHeader::SIZE,
            HeaderKind::Full => DataHeader::SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MiniHeader {
    pub msg_type: u16,
    pub size: u32,
}

impl MiniHeader {
    pub const SIZE: usize = 6;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..2].copy_from_slice(&self.msg_type.to_le_bytes());
        buf[2..6].copy_from_slice(&self.size.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        Self {
            msg_type: le_u16(bytes, 0),
            size: le_u32(bytes, 2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHeader {
    pub serial: u64,
    pub msg_type: u16,
    pub size: u32,
    pub sub_list: u32,
}

impl DataHeader {
    pub const SIZE: usize = 18;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..8].copy_from_slice(&self.serial.to_le_bytes());
        buf[8..10].copy_from_slice(&self.msg_type.to_le_bytes());
        buf[10..14].copy_from_slice(&self.size.to_le_bytes());
        buf[14..18].copy_from_slice(&self.sub_list.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        Self {
            serial: le_u64(bytes, 0),
            msg_type: le_u16(bytes, 8),
            size: le_u32(bytes, 10),
            sub_list: le_u32(bytes, 14),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
