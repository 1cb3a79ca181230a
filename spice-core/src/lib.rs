//! # spice-core
//!
//! Client-side protocol engine for SPICE remote displays.
//!
//! This crate contains:
//! - **Wire types**: link header/message/reply, mini and full data headers
//! - **Codec**: `SpiceCodec` for framed TCP I/O via `tokio_util`
//! - **Link**: per-channel handshake with RSA-OAEP ticket authentication
//! - **Channels**: main (session init, keepalive, flow control), display
//!   (surfaces, draw-copy, relink) and inputs (keyboard/mouse encoding)
//! - **Framebuffer**: BMP-layout surface mirror published over `watch`
//! - **Session**: ties the channels to one server connection
//! - **Error**: `SpiceError`, a typed `thiserror`-based hierarchy

pub mod caps;
pub mod channel;
pub mod codec;
pub mod cursor;
pub mod draw;
pub mod error;
pub mod framebuffer;
pub mod header;
pub mod link;
pub mod messages;
pub mod protocol;
pub mod reader;
pub mod session;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use caps::{CommonCaps, DisplayCaps, ServerCapabilities};
pub use channel::display::{DisplayAction, DisplayChannel, DisplayPhase, DisplayState};
pub use channel::inputs::InputChannel;
pub use channel::main::{MainChannel, MainState};
pub use channel::{AckWindow, ChannelType, Geometry};
pub use codec::{MAX_PAYLOAD_SIZE, Message, SpiceCodec};
pub use error::{LinkError, SpiceError};
pub use framebuffer::{Frame, FrameReceiver, Framebuffer};
pub use header::{DataHeader, HeaderKind, LinkHeader, MiniHeader};
pub use link::{LinkRequest, negotiate};
pub use reader::read_packet;
pub use session::{DEFAULT_TICKET, Session, SessionOptions};
