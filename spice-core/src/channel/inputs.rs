//! Inputs channel: keyboard and mouse event encoding.
//!
//! The inputs channel links without capabilities, so every message
//! carries the full data header and its serial number.

use bytes::{BufMut, BytesMut};
use futures::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, trace};

use crate::channel::{ChannelStream, ChannelType, Geometry, disconnect};
use crate::codec::Message;
use crate::error::SpiceError;
use crate::protocol::{mouse_button, msgc};

/// X11 keycodes are PC/AT scan codes shifted by eight.
pub const X11_KEYCODE_OFFSET: u32 = 8;
/// Set on a scan code to mark a key release.
pub const SCANCODE_RELEASE: u8 = 0x80;

const XK_LEFT: u32 = 0xff51;
const XK_UP: u32 = 0xff52;
const XK_RIGHT: u32 = 0xff53;
const XK_DOWN: u32 = 0xff54;

const SCAN_UP: u8 = 0x48;
const SCAN_LEFT: u8 = 0x4b;
const SCAN_RIGHT: u8 = 0x4d;
const SCAN_DOWN: u8 = 0x50;

// ── Encoders ─────────────────────────────────────────────────────

/// Scan code for an X11 keycode, with arrow keysyms pinned to their
/// fixed codes.
pub fn scan_code(keycode: u32, keysym: u32, release: bool) -> u8 {
    let base = match keysym {
        XK_UP => SCAN_UP,
        XK_LEFT => SCAN_LEFT,
        XK_RIGHT => SCAN_RIGHT,
        XK_DOWN => SCAN_DOWN,
        _ => keycode.wrapping_sub(X11_KEYCODE_OFFSET) as u8,
    };
    if release { base | SCANCODE_RELEASE } else { base }
}

pub fn key_event(keycode: u32, keysym: u32, release: bool) -> Message {
    let code = scan_code(keycode, keysym, release);
    let msg_type = if release {
        msgc::inputs::KEY_UP
    } else {
        msgc::inputs::KEY_DOWN
    };
    Message::new(msg_type, vec![code, 0, 0, 0])
}

/// Map a local pointer position onto the remote surface, scaling each
/// axis independently and clamping to `[0, dim - 1]`.
pub fn scale_position(x: i32, y: i32, local: Geometry, remote: Geometry) -> (u32, u32) {
    fn axis(v: i32, local: u32, remote: u32) -> u32 {
        let ratio = if local == 0 {
            1.0
        } else {
            f64::from(remote) / f64::from(local)
        };
        let scaled = (f64::from(v) * ratio).round();
        let max = f64::from(remote.saturating_sub(1));
        scaled.clamp(0.0, max) as u32
    }
    (
        axis(x, local.width, remote.width),
        axis(y, local.height, remote.height),
    )
}

pub fn mouse_position(x: u32, y: u32, buttons: u16) -> Message {
    let mut buf = BytesMut::with_capacity(11);
    buf.put_u32_le(x);
    buf.put_u32_le(y);
    buf.put_u16_le(buttons);
    buf.put_u8(0); // display id
    Message::new(msgc::inputs::MOUSE_POSITION, buf.freeze())
}

/// State-mask bit for a button id, if it is one we track.
pub fn button_mask(button: u8) -> Option<u16> {
    match button {
        mouse_button::LEFT => Some(mouse_button::MASK_LEFT),
        mouse_button::MIDDLE => Some(mouse_button::MASK_MIDDLE),
        mouse_button::RIGHT => Some(mouse_button::MASK_RIGHT),
        _ => None,
    }
}

/// Fold a press or release into the running mask.
pub fn update_buttons(buttons: u16, button: u8, release: bool) -> u16 {
    match button_mask(button) {
        Some(bit) if release => buttons & !bit,
        Some(bit) => buttons | bit,
        None => buttons,
    }
}

pub fn button_event(button: u8, buttons: u16, release: bool) -> Message {
    let mut buf = BytesMut::with_capacity(3);
    buf.put_u8(button);
    buf.put_u16_le(buttons);
    let msg_type = if release {
        msgc::inputs::MOUSE_RELEASE
    } else {
        msgc::inputs::MOUSE_PRESS
    };
    Message::new(msg_type, buf.freeze())
}

// ── InputChannel ─────────────────────────────────────────────────

/// A linked inputs channel. Sends never retry.
pub struct InputChannel<S = tokio::net::TcpStream> {
    framed: ChannelStream<S>,
    buttons: u16,
}

impl<S> InputChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(framed: ChannelStream<S>) -> Self {
        Self { framed, buttons: 0 }
    }

    /// Serial the next event will carry.
    pub fn next_serial(&self) -> u64 {
        self.framed.codec().next_serial()
    }

    pub fn buttons(&self) -> u16 {
        self.buttons
    }

    async fn send(&mut self, msg: Message) -> Result<(), SpiceError> {
        trace!(msg_type = msg.msg_type, serial = self.next_serial(), "input");
        self.framed.send(msg).await
    }

    pub async fn send_key(&mut self, keycode: u32, keysym: u32, release: bool) -> Result<(), SpiceError> {
        self.send(key_event(keycode, keysym, release)).await
    }

    /// Send a pointer position. Dropped when the remote size is unknown.
    pub async fn send_mouse_motion(
        &mut self,
        x: i32,
        y: i32,
        local: Geometry,
        remote: Option<Geometry>,
    ) -> Result<(), SpiceError> {
        let Some(remote) = remote.filter(|g| !g.is_empty()) else {
            debug!(x, y, "no remote surface; motion dropped");
            return Ok(());
        };
        let (rx, ry) = scale_position(x, y, local, remote);
        self.send(mouse_position(rx, ry, self.buttons)).await
    }

    pub async fn send_mouse_button(&mut self, button: u8, release: bool) -> Result<(), SpiceError> {
        self.buttons = update_buttons(self.buttons, button, release);
        self.send(button_event(button, self.buttons, release)).await
    }

    pub async fn disconnect(&mut self) -> Result<(), SpiceError> {
        disconnect(&mut self.framed, ChannelType::Inputs).await
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::SpiceCodec;
    use crate::header::{DataHeader, le_u32};
    use tokio_util::codec::Framed;

    #[test]
    fn key_release_sets_high_bit() {
        const K: u32 = 38; // 'a'
        assert_eq!(scan_code(K, 0x61, false), (K - X11_KEYCODE_OFFSET) as u8);
        assert_eq!(
            scan_code(K, 0x61, true),
            (K - X11_KEYCODE_OFFSET) as u8 | SCANCODE_RELEASE
        );
        assert_eq!(scan_code(K, 0x61, false) & SCANCODE_RELEASE, 0);

        let up = key_event(K, 0x61, true);
        assert_eq!(up.msg_type, msgc::inputs::KEY_UP);
        assert_eq!(&up.payload[..], &[30 | 0x80, 0, 0, 0]);
    }

    #[test]
    fn arrows_use_fixed_codes() {
        assert_eq!(scan_code(111, XK_UP, false), 0x48);
        assert_eq!(scan_code(113, XK_LEFT, false), 0x4b);
        assert_eq!(scan_code(114, XK_RIGHT, true), 0x4d | 0x80);
        assert_eq!(scan_code(116, XK_DOWN, false), 0x50);
    }

    #[test]
    fn scaling_stays_inside_remote_bounds() {
        let local = Geometry::new(1000, 1000);
        let remote = Geometry::new(500, 500);
        let (x, y) = scale_position(999, 1, local, remote);
        assert!(x <= 499 && y <= 499);
        assert_eq!((x, y), (499, 1));

        assert_eq!(scale_position(-40, 5000, local, remote), (0, 499));
        assert_eq!(scale_position(500, 500, local, remote), (250, 250));
    }

    #[test]
    fn button_mask_tracks_presses() {
        let mut mask = 0;
        mask = update_buttons(mask, mouse_button::LEFT, false);
        mask = update_buttons(mask, mouse_button::RIGHT, false);
        assert_eq!(mask, 0b101);
        mask = update_buttons(mask, mouse_button::LEFT, true);
        assert_eq!(mask, 0b100);
        assert_eq!(update_buttons(mask, 9, false), mask);

        let msg = button_event(mouse_button::RIGHT, mask, true);
        assert_eq!(msg.msg_type, msgc::inputs::MOUSE_RELEASE);
        assert_eq!(&msg.payload[..], &[3, 4, 0]);
    }

    #[test]
    fn mouse_position_layout() {
        let msg = mouse_position(10, 20, 1);
        assert_eq!(msg.payload.len(), 11);
        assert_eq!(le_u32(&msg.payload, 0), 10);
        assert_eq!(le_u32(&msg.payload, 4), 20);
    }

    #[tokio::test]
    async fn events_carry_increasing_serials() {
        use tokio::io::AsyncReadExt;

        let (client, mut server) = tokio::io::duplex(1024);
        let mut inputs = InputChannel::new(Framed::new(client, SpiceCodec::full()));
        assert_eq!(inputs.next_serial(), 1);

        inputs.send_key(38, 0x61, false).await.unwrap();
        inputs.send_mouse_button(mouse_button::LEFT, false).await.unwrap();
        // No remote geometry: nothing sent, no serial consumed.
        inputs
            .send_mouse_motion(5, 5, Geometry::new(10, 10), None)
            .await
            .unwrap();
        assert_eq!(inputs.next_serial(), 3);
        assert_eq!(inputs.buttons(), mouse_button::MASK_LEFT);
        drop(inputs);

        let mut wire = Vec::new();
        server.read_to_end(&mut wire).await.unwrap();
        assert_eq!(wire.len(), 2 * DataHeader::SIZE + 4 + 3);

        let mut hdr = [0u8; DataHeader::SIZE];
        hdr.copy_from_slice(&wire[..DataHeader::SIZE]);
        let key = DataHeader::from_bytes(&hdr);
        assert_eq!((key.serial, key.msg_type, key.size), (1, msgc::inputs::KEY_DOWN, 4));

        let at = DataHeader::SIZE + 4;
        hdr.copy_from_slice(&wire[at..at + DataHeader::SIZE]);
        let press = DataHeader::from_bytes(&hdr);
        assert_eq!((press.serial, press.msg_type), (2, msgc::inputs::MOUSE_PRESS));
        assert_eq!(&wire[at + DataHeader::SIZE..], &[1, 1, 0]);
    }
}
