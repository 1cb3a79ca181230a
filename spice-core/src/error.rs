//! Domain-specific error types for the SPICE client engine.
//!
//! All fallible operations return `Result<T, SpiceError>`.
//! No panics on peer-controlled input: every malformed structure maps to a
//! typed, recoverable error.

use std::fmt;

use thiserror::Error;

/// The canonical error type for the SPICE client engine.
#[derive(Debug, Error)]
pub enum SpiceError {
    // ── Connection Errors ────────────────────────────────────────
    /// The TCP/IO layer reported an error (refused, reset, ...).
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// The peer closed the stream before the expected bytes arrived.
    #[error("connection closed by peer")]
    ConnectionClosed,

    // ── Link Errors ──────────────────────────────────────────────
    /// The server answered the link message with a non-OK error code.
    #[error("link rejected: {0}")]
    LinkRejected(LinkError),

    /// The ticket could not be encrypted or the server refused it.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    // ── Protocol Errors ──────────────────────────────────────────
    /// A message or structure violated protocol rules.
    #[error("protocol violation: {0}")]
    Protocol(&'static str),

    /// A specific message type was required but another one arrived.
    #[error("unexpected message type: expected {expected}, got {actual}")]
    UnexpectedMessage { expected: u16, actual: u16 },

    /// A numeric value did not map to any known enum variant.
    #[error("unknown {type_name} discriminant: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: u64 },

    /// The announced payload exceeds the codec limit.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    // ── Decode Errors ────────────────────────────────────────────
    /// A read or offset resolution fell outside the message body.
    #[error("truncated structure: need {needed} bytes at offset {offset}, body is {len} bytes")]
    Truncated {
        offset: usize,
        needed: usize,
        len: usize,
    },

    /// A draw command was well-framed but could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

impl SpiceError {
    /// Whether this error belongs to the draw-command decoding family,
    /// which the display channel tolerates without tearing down.
    pub fn is_decode(&self) -> bool {
        matches!(self, SpiceError::Decode(_) | SpiceError::Truncated { .. })
    }
}

// ── LinkError ────────────────────────────────────────────────────

/// Error codes carried in a link reply (and in the final auth result).
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkError {
    Ok = 0,
    Generic = 1,
    InvalidMagic = 2,
    InvalidData = 3,
    VersionMismatch = 4,
    NeedSecured = 5,
    NeedUnsecured = 6,
    PermissionDenied = 7,
    BadConnectionId = 8,
    ChannelNotAvailable = 9,
}

impl TryFrom<u32> for LinkError {
    type Error = SpiceError;

    fn try_from(value: u32) -> Result<Self, SpiceError> {
        match value {
            0 => Ok(LinkError::Ok),
            1 => Ok(LinkError::Generic),
            2 => Ok(LinkError::InvalidMagic),
            3 => Ok(LinkError::InvalidData),
            4 => Ok(LinkError::VersionMismatch),
            5 => Ok(LinkError::NeedSecured),
            6 => Ok(LinkError::NeedUnsecured),
            7 => Ok(LinkError::PermissionDenied),
            8 => Ok(LinkError::BadConnectionId),
            9 => Ok(LinkError::ChannelNotAvailable),
            _ => Err(SpiceError::UnknownVariant {
                type_name: "LinkError",
                value: value as u64,
            }),
        }
    }
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            LinkError::Ok => "ok",
            LinkError::Generic => "generic error",
            LinkError::InvalidMagic => "invalid magic",
            LinkError::InvalidData => "invalid data",
            LinkError::VersionMismatch => "version mismatch",
            LinkError::NeedSecured => "secured channel required",
            LinkError::NeedUnsecured => "unsecured channel required",
            LinkError::PermissionDenied => "permission denied",
            LinkError::BadConnectionId => "bad connection id",
            LinkError::ChannelNotAvailable => "channel not available",
        };
        write!(f, "{text} ({})", *self as u32)
    }
}
