//! One client connection to a SPICE server.
//!
//! A [`Session`] holds what every channel needs (endpoint, ticket,
//! session id, cancellation) and the consumer-facing outputs. The main
//! and display channels are handed out as owned values so each can run
//! on its own task:
//!
//! ```no_run
//! # async fn demo() -> Result<(), spice_core::SpiceError> {
//! use spice_core::Session;
//!
//! let mut session = Session::new("127.0.0.1", 5900)?;
//! let main = session.channel_init_main().await?;
//! session.channel_init_inputs().await?;
//! let display = session.display_channel()?;
//!
//! tokio::spawn(main.run());
//! tokio::spawn(display.run());
//!
//! let mut frames = session.frames();
//! while let Ok(frame) = frames.changed().await {
//!     if let Some(frame) = frame {
//!         println!("{}x{} frame", frame.width(), frame.height());
//!     }
//! }
//! session.deinit().await;
//! # Ok(())
//! # }
//! ```

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::caps::CommonCaps;
use crate::channel::display::DisplayChannel;
use crate::channel::inputs::InputChannel;
use crate::channel::main::MainChannel;
use crate::channel::{ChannelType, Geometry, connect, header_kind};
use crate::codec::SpiceCodec;
use crate::error::SpiceError;
use crate::framebuffer::{FrameReceiver, FrameSender, frame_channel};
use crate::link::{LinkRequest, negotiate};
use crate::protocol::{DEFAULT_ADDR, DEFAULT_PORT};

/// Credential used when none is configured.
pub const DEFAULT_TICKET: &str = "password";

// ── SessionOptions ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// IPv4 or IPv6 literal.
    pub address: String,
    pub port: u16,
    pub ticket: String,
    /// Size of the local view, for pointer rescaling.
    pub local_geometry: Geometry,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDR.to_string(),
            port: DEFAULT_PORT,
            ticket: DEFAULT_TICKET.to_string(),
            local_geometry: Geometry::default(),
        }
    }
}

// ── Session ──────────────────────────────────────────────────────

pub struct Session {
    endpoint: SocketAddr,
    ticket: Vec<u8>,
    session_id: Option<u32>,
    cancel: CancellationToken,
    local: Geometry,
    frames_tx: Arc<FrameSender>,
    frames_rx: FrameReceiver,
    remote_tx: Arc<watch::Sender<Option<Geometry>>>,
    remote_rx: watch::Receiver<Option<Geometry>>,
    inputs: Option<InputChannel>,
}

impl Session {
    pub fn init(options: SessionOptions) -> Result<Self, SpiceError> {
        let ip: IpAddr = options.address.parse().map_err(|_| {
            SpiceError::Connection(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid server address {:?}", options.address),
            ))
        })?;
        let (frames_tx, frames_rx) = frame_channel();
        let (remote_tx, remote_rx) = watch::channel(None);
        Ok(Self {
            endpoint: SocketAddr::new(ip, options.port),
            ticket: options.ticket.into_bytes(),
            session_id: None,
            cancel: CancellationToken::new(),
            local: options.local_geometry,
            frames_tx: Arc::new(frames_tx),
            frames_rx,
            remote_tx: Arc::new(remote_tx),
            remote_rx,
            inputs: None,
        })
    }

    /// Session with the default ticket and no local geometry yet.
    pub fn new(address: &str, port: u16) -> Result<Self, SpiceError> {
        Self::init(SessionOptions {
            address: address.to_string(),
            port,
            ..SessionOptions::default()
        })
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// Assigned by the server during main-channel setup.
    pub fn session_id(&self) -> Option<u32> {
        self.session_id
    }

    pub fn local_geometry(&self) -> Geometry {
        self.local
    }

    pub fn set_local_geometry(&mut self, geometry: Geometry) {
        self.local = geometry;
    }

    /// Size of the server surface, once one exists.
    pub fn remote_geometry(&self) -> Option<Geometry> {
        *self.remote_rx.borrow()
    }

    pub fn frames(&self) -> FrameReceiver {
        self.frames_rx.clone()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    // ── Channels ─────────────────────────────────────────────────

    /// Open a TCP connection for `channel`.
    pub async fn connect(&self, channel: ChannelType) -> Result<TcpStream, SpiceError> {
        debug!(%channel, endpoint = %self.endpoint, "connecting");
        connect(self.endpoint).await
    }

    /// Link the main channel and read the session id from it.
    pub async fn channel_init_main(&mut self) -> Result<MainChannel, SpiceError> {
        let mut stream = self.connect(ChannelType::Main).await?;
        let common = CommonCaps::MINI_HEADER;
        let request = LinkRequest::new(ChannelType::Main, 0).with_common_caps(common);
        let caps = negotiate(&mut stream, &request, &self.ticket).await?;

        let framed = Framed::new(stream, SpiceCodec::new(header_kind(common, &caps)));
        let main = MainChannel::start(framed, self.cancel.clone()).await?;
        self.session_id = Some(main.session_id());
        Ok(main)
    }

    /// Link the inputs channel. Requires the main channel.
    pub async fn channel_init_inputs(&mut self) -> Result<(), SpiceError> {
        let session_id = self.require_session()?;
        let mut stream = self.connect(ChannelType::Inputs).await?;
        let request = LinkRequest::new(ChannelType::Inputs, session_id);
        let caps = negotiate(&mut stream, &request, &self.ticket).await?;

        let framed = Framed::new(stream, SpiceCodec::new(header_kind(CommonCaps::empty(), &caps)));
        self.inputs = Some(InputChannel::new(framed));
        info!(session_id, "inputs channel linked");
        Ok(())
    }

    /// The display channel, ready to link and run on its own task.
    /// Requires the main channel.
    pub fn display_channel(&self) -> Result<DisplayChannel, SpiceError> {
        let session_id = self.require_session()?;
        Ok(DisplayChannel::new(
            self.endpoint,
            session_id,
            self.ticket.clone(),
            self.cancel.clone(),
            Arc::clone(&self.frames_tx),
            Arc::clone(&self.remote_tx),
        ))
    }

    fn require_session(&self) -> Result<u32, SpiceError> {
        self.session_id
            .ok_or(SpiceError::Protocol("main channel not initialised"))
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Ask every channel loop to stop at its next poll.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop all channels, say goodbye on inputs and drop the frame.
    pub async fn deinit(mut self) {
        self.cancel.cancel();
        if let Some(mut inputs) = self.inputs.take() {
            if let Err(e) = inputs.disconnect().await {
                debug!(error = %e, "inputs disconnect");
            }
        }
        self.frames_tx.send_replace(None);
        info!(endpoint = %self.endpoint, "session closed");
    }

    // ── Input ────────────────────────────────────────────────────

    fn inputs(&mut self) -> Result<&mut InputChannel, SpiceError> {
        self.inputs
            .as_mut()
            .ok_or(SpiceError::Protocol("inputs channel not initialised"))
    }

    /// Key press or release for an X11 keycode/keysym pair.
    pub async fn send_key(&mut self, keycode: u32, keysym: u32, release: bool) -> Result<(), SpiceError> {
        self.inputs()?.send_key(keycode, keysym, release).await
    }

    /// Pointer motion in local coordinates.
    pub async fn send_mouse_motion(&mut self, x: i32, y: i32) -> Result<(), SpiceError> {
        let local = self.local;
        let remote = self.remote_geometry();
        self.inputs()?.send_mouse_motion(x, y, local, remote).await
    }

    pub async fn send_mouse_button(&mut self, button: u8, release: bool) -> Result<(), SpiceError> {
        self.inputs()?.send_mouse_button(button, release).await
    }

    /// Serial of the next input event, once inputs are linked.
    pub fn input_serial(&self) -> Option<u64> {
        self.inputs.as_ref().map(InputChannel::next_serial)
    }

    pub fn button_state(&self) -> u16 {
        self.inputs.as_ref().map_or(0, InputChannel::buttons)
    }
}

// ── Tests ────────────────────────────────────────────────────────
