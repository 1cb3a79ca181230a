//! Channel plumbing shared by the main, display and inputs channels.
//!
//! Each channel is its own TCP connection that runs the link handshake
//! and then exchanges framed messages. The receive loops poll with a
//! one-second timeout so a cancelled session is noticed promptly even
//! when the server is silent.

pub mod display;
pub mod inputs;
pub mod main;

use std::fmt;
use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, trace};

use crate::caps::{CommonCaps, ServerCapabilities};
use crate::codec::{Message, SpiceCodec};
use crate::error::SpiceError;
use crate::header::HeaderKind;
use crate::messages::Disconnecting;

/// Receive-loop wake-up interval; the cancellation check point.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

// ── ChannelType ──────────────────────────────────────────────────

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelType {
    Main = 1,
    Display = 2,
    Inputs = 3,
}

impl TryFrom<u8> for ChannelType {
    type Error = SpiceError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ChannelType::Main),
            2 => Ok(ChannelType::Display),
            3 => Ok(ChannelType::Inputs),
            _ => Err(SpiceError::UnknownVariant {
                type_name: "ChannelType",
                value: u64::from(value),
            }),
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelType::Main => write!(f, "main"),
            ChannelType::Display => write!(f, "display"),
            ChannelType::Inputs => write!(f, "inputs"),
        }
    }
}

// ── Geometry ─────────────────────────────────────────────────────

/// A display size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
}

impl Geometry {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// ── AckWindow ────────────────────────────────────────────────────

/// Server-driven flow control.
///
/// After `SET_ACK` the client owes one `ACK` per `window` processed
/// messages. A window of zero means acknowledgements are off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AckWindow {
    window: u32,
    received: u32,
}

impl AckWindow {
    pub fn set(&mut self, window: u32) {
        self.window = window;
        self.received = 0;
    }

    /// Count one processed message. Returns `true` when an `ACK` is due,
    /// in which case the counter has been reset.
    pub fn record(&mut self) -> bool {
        if self.window == 0 {
            return false;
        }
        self.received += 1;
        if self.received >= self.window {
            self.received = 0;
            return true;
        }
        false
    }

    pub fn window(&self) -> u32 {
        self.window
    }

    /// Messages processed since the last `ACK`.
    pub fn pending(&self) -> u32 {
        self.received
    }
}

// ── Connection helpers ───────────────────────────────────────────

pub type ChannelStream<S = TcpStream> = Framed<S, SpiceCodec>;

/// Open a TCP connection to the server with Nagle disabled.
pub async fn connect(endpoint: SocketAddr) -> Result<TcpStream, SpiceError> {
    let stream = TcpStream::connect(endpoint).await?;
    stream.set_nodelay(true)?;
    trace!(%endpoint, "tcp connected");
    Ok(stream)
}

/// Pick the data header flavour from what we asked for and what the
/// server granted.
pub fn header_kind(requested: CommonCaps, server: &ServerCapabilities) -> HeaderKind {
    if requested.contains(CommonCaps::MINI_HEADER) && server.has_common(CommonCaps::MINI_HEADER) {
        HeaderKind::Mini
    } else {
        HeaderKind::Full
    }
}

/// Milliseconds since this process first asked, on a monotonic clock.
pub(crate) fn monotonic_ms() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_millis() as u64
}

/// Tell the server we are leaving and shut down our write half.
pub async fn disconnect<S>(framed: &mut ChannelStream<S>, kind: ChannelType) -> Result<(), SpiceError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let goodbye = Disconnecting {
        time_stamp: monotonic_ms(),
        reason: 0,
    };
    framed.send(goodbye.to_message()).await?;
    framed.get_mut().shutdown().await?;
    debug!(channel = %kind, "channel disconnected");
    Ok(())
}

/// Queue `replies` and flush once.
pub(crate) async fn send_all<S>(
    framed: &mut ChannelStream<S>,
    replies: Vec<Message>,
) -> Result<(), SpiceError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if replies.is_empty() {
        return Ok(());
    }
    for reply in replies {
        trace!(msg_type = reply.msg_type, size = reply.payload.len(), "send");
        framed.feed(reply).await?;
    }
    SinkExt::<Message>::flush(framed).await
}

pub(crate) enum Received {
    Message(Message),
    /// Nothing arrived within [`POLL_INTERVAL`].
    Idle,
    /// The peer closed the stream on a message boundary.
    Closed,
}

/// Wait up to [`POLL_INTERVAL`] for the next complete message.
pub(crate) async fn next_message<S>(framed: &mut ChannelStream<S>) -> Result<Received, SpiceError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match tokio::time::timeout(POLL_INTERVAL, framed.next()).await {
        Err(_) => Ok(Received::Idle),
        Ok(None) => Ok(Received::Closed),
        Ok(Some(msg)) => msg.map(Received::Message),
    }
}

// ── Tests ────────────────────────────────────────────────────────
