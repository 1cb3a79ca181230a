//! Display channel: surface lifecycle, draw-copy painting, relinking.
//!
//! ```text
//!  Linking ──► AwaitHeader ──(SURFACE_DESTROY)──► Relinking
//!     ▲             │                                │
//!     │             ▼ (stop / fatal error)           │
//!     │          Closed                              │
//!     └──────────────────────────────────────────────┘
//! ```
//!
//! Destroying the mirrored surface tears the channel down and links it
//! again, matching how the server expects a client to pick up the next
//! primary surface.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::caps::{CommonCaps, DisplayCaps};
use crate::channel::{
    AckWindow, ChannelStream, ChannelType, Geometry, Received, connect, disconnect, header_kind,
    next_message, send_all,
};
use crate::codec::{Message, SpiceCodec};
use crate::draw::{Clip, DrawCopy};
use crate::error::SpiceError;
use crate::framebuffer::{Frame, FrameSender, Framebuffer};
use crate::link::{LinkRequest, negotiate};
use crate::messages::{self, DisplayMode, Ping, SetAck, SurfaceCreate, SurfaceDestroy};
use crate::protocol::{compression, msg};

// ── DisplayPhase ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayPhase {
    /// Handshake in progress (or not yet started).
    #[default]
    Linking,
    /// Linked; processing messages.
    AwaitHeader,
    /// The mirrored surface was destroyed; the channel must link again.
    Relinking,
    /// Stopped. Terminal.
    Closed,
}

impl std::fmt::Display for DisplayPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Linking => write!(f, "Linking"),
            Self::AwaitHeader => write!(f, "AwaitHeader"),
            Self::Relinking => write!(f, "Relinking"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

// ── DisplayAction ────────────────────────────────────────────────

/// Side effects the I/O layer must carry out for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayAction {
    Send(Message),
    /// A surface now exists with this size.
    SurfaceReady(Geometry),
    /// The surface is gone; clear published state and relink.
    SurfaceGone,
}

// ── DisplayState ─────────────────────────────────────────────────

/// I/O-free display-channel logic.
#[derive(Debug, Default)]
pub struct DisplayState {
    phase: DisplayPhase,
    ack: AckWindow,
    surface_id: u32,
    surface: Option<Framebuffer>,
    /// Painted since the last [`DisplayState::take_frame`].
    dirty: bool,
}

impl DisplayState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> DisplayPhase {
        self.phase
    }

    pub fn surface(&self) -> Option<&Framebuffer> {
        self.surface.as_ref()
    }

    pub fn ack_window(&self) -> &AckWindow {
        &self.ack
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Handshake finished.
    ///
    /// Valid from: `Linking`, `Relinking`. Flow control restarts with
    /// every link.
    pub fn linked(&mut self) -> Result<(), SpiceError> {
        match self.phase {
            DisplayPhase::Linking | DisplayPhase::Relinking => {
                self.phase = DisplayPhase::AwaitHeader;
                self.ack = AckWindow::default();
                Ok(())
            }
            _ => Err(SpiceError::Protocol(
                "cannot complete display link: not linking",
            )),
        }
    }

    /// Stop for good, dropping any surface.
    pub fn close(&mut self) {
        self.surface = None;
        self.dirty = false;
        self.phase = DisplayPhase::Closed;
    }

    /// Snapshot of the surface if it was painted since the last call.
    ///
    /// Draw-copies only mark the surface; the I/O layer takes one frame
    /// per drained batch of messages.
    pub fn take_frame(&mut self) -> Option<Frame> {
        if !std::mem::take(&mut self.dirty) {
            return None;
        }
        self.surface.as_ref().map(Framebuffer::snapshot)
    }

    // ── Messages ─────────────────────────────────────────────────

    pub fn handle(&mut self, m: &Message) -> Result<Vec<DisplayAction>, SpiceError> {
        if self.phase != DisplayPhase::AwaitHeader {
            return Err(SpiceError::Protocol(
                "display message outside AwaitHeader",
            ));
        }

        let mut actions = Vec::new();
        match m.msg_type {
            msg::SET_ACK => {
                let set_ack = SetAck::decode(&m.payload)?;
                debug!(generation = set_ack.generation, window = set_ack.window, "display ack window");
                self.ack.set(set_ack.window);
                actions.push(DisplayAction::Send(set_ack.ack_sync()));
                return Ok(actions);
            }
            msg::PING => {
                let ping = Ping::decode(&m.payload)?;
                trace!(id = ping.id, "display ping");
                actions.push(DisplayAction::Send(ping.pong()));
            }
            msg::display::SURFACE_CREATE => {
                if let Some(geometry) = self.surface_create(&m.payload)? {
                    actions.push(DisplayAction::SurfaceReady(geometry));
                }
            }
            msg::display::SURFACE_DESTROY => {
                let destroy = SurfaceDestroy::decode(&m.payload)?;
                if self.surface.is_some() && destroy.surface_id != self.surface_id {
                    debug!(surface_id = destroy.surface_id, "destroy for secondary surface");
                } else {
                    info!(surface_id = destroy.surface_id, "surface destroyed, relinking");
                    self.surface = None;
                    self.dirty = false;
                    self.phase = DisplayPhase::Relinking;
                    actions.push(DisplayAction::SurfaceGone);
                    // The channel is about to be torn down; nothing left to ack.
                    return Ok(actions);
                }
            }
            msg::display::DRAW_COPY => self.draw_copy(&m.payload),
            msg::display::MODE => match DisplayMode::decode(&m.payload) {
                Ok(mode) => info!(x_res = mode.x_res, y_res = mode.y_res, bits = mode.bits, "display mode"),
                Err(e) => warn!(error = %e, "malformed display mode"),
            },
            other => {
                trace!(msg_type = other, kind = messages::describe(other), size = m.payload.len(), "display: ignored");
            }
        }

        if self.ack.record() {
            trace!("display ack");
            actions.push(DisplayAction::Send(messages::ack()));
        }
        Ok(actions)
    }

    fn surface_create(&mut self, body: &[u8]) -> Result<Option<Geometry>, SpiceError> {
        let create = SurfaceCreate::decode(body)?;
        info!(
            surface_id = create.surface_id,
            width = create.width,
            height = create.height,
            format = create.format,
            "surface created"
        );
        if self.surface.is_some() && create.surface_id != self.surface_id {
            debug!(surface_id = create.surface_id, "ignoring secondary surface");
            return Ok(None);
        }
        match Framebuffer::new(create.width, create.height) {
            Ok(fb) => {
                self.surface = Some(fb);
                self.surface_id = create.surface_id;
                Ok(Some(Geometry::new(create.width, create.height)))
            }
            Err(e) => {
                warn!(error = %e, "surface not mirrored");
                Ok(None)
            }
        }
    }

    /// Paint one draw-copy. Malformed commands are logged and skipped;
    /// the current image is still marked for publishing.
    fn draw_copy(&mut self, body: &[u8]) {
        let Some(fb) = self.surface.as_mut() else {
            warn!("draw copy before any surface");
            return;
        };

        match DrawCopy::decode(body) {
            Ok(draw) if draw.surface_id != self.surface_id => {
                trace!(surface_id = draw.surface_id, "draw copy to untracked surface");
                return;
            }
            Ok(draw) => {
                if let Clip::Rects(rects) = &draw.clip {
                    warn!(
                        rects = rects.len(),
                        "clip rectangles are not applied; painting unclipped \
                         (a virtio display device avoids them)"
                    );
                }
                match draw.bitmap() {
                    Some(bitmap) => {
                        trace!(
                            top = draw.bbox.top,
                            left = draw.bbox.left,
                            w = bitmap.x,
                            h = bitmap.y,
                            top_down = bitmap.is_top_down(),
                            "draw copy"
                        );
                        if let Err(e) = fb.blit(bitmap, draw.bbox.left, draw.bbox.top) {
                            warn!(error = %e, "draw copy not painted");
                        }
                    }
                    None => warn!("draw copy source is not a bitmap"),
                }
            }
            Err(e) => warn!(error = %e, "malformed draw copy"),
        }
        self.dirty = true;
    }
}

// ── DisplayChannel ───────────────────────────────────────────────

enum LoopExit {
    Stopped,
    Relink,
}

/// The display channel task. Owns its socket and the framebuffer.
pub struct DisplayChannel {
    endpoint: SocketAddr,
    session_id: u32,
    ticket: Vec<u8>,
    cancel: CancellationToken,
    frames: Arc<FrameSender>,
    remote: Arc<watch::Sender<Option<Geometry>>>,
    state: DisplayState,
}

impl DisplayChannel {
    pub fn new(
        endpoint: SocketAddr,
        session_id: u32,
        ticket: Vec<u8>,
        cancel: CancellationToken,
        frames: Arc<FrameSender>,
        remote: Arc<watch::Sender<Option<Geometry>>>,
    ) -> Self {
        Self {
            endpoint,
            session_id,
            ticket,
            cancel,
            frames,
            remote,
            state: DisplayState::new(),
        }
    }

    /// Link, then service the channel until the session is cancelled,
    /// relinking each time the mirrored surface is destroyed.
    pub async fn run(mut self) -> Result<(), SpiceError> {
        let result = self.run_cycles().await;
        self.state.close();
        self.frames.send_replace(None);
        self.remote.send_replace(None);
        if let Err(e) = &result {
            warn!(error = %e, "display channel ended");
        }
        result
    }

    async fn run_cycles(&mut self) -> Result<(), SpiceError> {
        loop {
            let mut framed = self.link().await?;
            match self.receive(&mut framed).await? {
                LoopExit::Stopped => {
                    info!("stopping display channel");
                    if let Err(e) = disconnect(&mut framed, ChannelType::Display).await {
                        debug!(error = %e, "display disconnect");
                    }
                    return Ok(());
                }
                LoopExit::Relink => {
                    if let Err(e) = disconnect(&mut framed, ChannelType::Display).await {
                        debug!(error = %e, "display disconnect before relink");
                    }
                    if self.cancel.is_cancelled() {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn link(&mut self) -> Result<ChannelStream<TcpStream>, SpiceError> {
        debug!(phase = %self.state.phase(), "linking display channel");
        let mut stream = connect(self.endpoint).await?;

        let common = CommonCaps::MINI_HEADER;
        let request = LinkRequest::new(ChannelType::Display, self.session_id)
            .with_common_caps(common)
            .with_channel_caps(DisplayCaps::PREF_COMPRESSION.bits());
        let server_caps = negotiate(&mut stream, &request, &self.ticket).await?;

        let mut framed = Framed::new(stream, SpiceCodec::new(header_kind(common, &server_caps)));
        let mut hello = vec![messages::display_init()];
        if server_caps.has_display(DisplayCaps::PREF_COMPRESSION) {
            hello.push(messages::preferred_compression(compression::OFF));
        } else {
            debug!("server lacks preferred-compression; not requesting raw bitmaps");
        }
        send_all(&mut framed, hello).await?;

        self.state.linked()?;
        info!(session_id = self.session_id, "display channel linked");
        Ok(framed)
    }

    async fn receive(&mut self, framed: &mut ChannelStream<TcpStream>) -> Result<LoopExit, SpiceError> {
        while !self.cancel.is_cancelled() {
            let m = match next_message(framed).await? {
                Received::Idle => {
                    self.publish_frame();
                    continue;
                }
                Received::Closed => return Err(SpiceError::ConnectionClosed),
                Received::Message(m) => m,
            };
            trace!(msg_type = m.msg_type, size = m.payload.len(), "display: recv");

            let mut replies = Vec::new();
            let mut relink = false;
            for action in self.state.handle(&m)? {
                match action {
                    DisplayAction::Send(reply) => replies.push(reply),
                    DisplayAction::SurfaceReady(geometry) => {
                        self.remote.send_replace(Some(geometry));
                    }
                    DisplayAction::SurfaceGone => {
                        self.frames.send_replace(None);
                        self.remote.send_replace(None);
                        relink = true;
                    }
                }
            }
            send_all(framed, replies).await?;
            if relink {
                return Ok(LoopExit::Relink);
            }
            // Publish once the burst already on the wire has been drained.
            if !framed.codec().has_message(framed.read_buffer()) {
                self.publish_frame();
            }
        }
        Ok(LoopExit::Stopped)
    }

    fn publish_frame(&mut self) {
        if let Some(frame) = self.state.take_frame() {
            self.frames.send_replace(Some(frame));
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
