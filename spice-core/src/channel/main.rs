//! Main channel: session bootstrap, keepalive and flow control.
//!
//! ```text
//! link ──► SESSION_INIT ──► [MOUSE_MODE_REQUEST] ──► AwaitHeader ◄─┐
//!                                                       │         │
//!                                   PING / SET_ACK / other ────────┘
//! ```

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::channel::{AckWindow, ChannelStream, ChannelType, Received, disconnect, next_message, send_all};
use crate::codec::Message;
use crate::error::SpiceError;
use crate::messages::{self, Disconnecting, MainInit, MouseMode, Ping, SetAck};
use crate::protocol::{mouse_mode, msg};

// ── MainState ────────────────────────────────────────────────────

/// I/O-free main-channel logic: maps each inbound message to the replies
/// it requires.
#[derive(Debug)]
pub struct MainState {
    init: MainInit,
    ack: AckWindow,
    current_mouse_mode: u16,
}

impl MainState {
    pub fn new(init: MainInit) -> Self {
        Self {
            init,
            ack: AckWindow::default(),
            current_mouse_mode: init.current_mouse_mode as u16,
        }
    }

    pub fn session_id(&self) -> u32 {
        self.init.session_id
    }

    pub fn init(&self) -> &MainInit {
        &self.init
    }

    pub fn ack_window(&self) -> &AckWindow {
        &self.ack
    }

    pub fn mouse_mode(&self) -> u16 {
        self.current_mouse_mode
    }

    /// Replies owed right after `SESSION_INIT`.
    pub fn on_init(&self) -> Vec<Message> {
        if self.current_mouse_mode == mouse_mode::CLIENT {
            return Vec::new();
        }
        debug!(current = self.current_mouse_mode, "requesting client mouse mode");
        vec![messages::mouse_mode_request(mouse_mode::CLIENT)]
    }

    pub fn handle(&mut self, m: &Message) -> Result<Vec<Message>, SpiceError> {
        let mut replies = Vec::new();
        match m.msg_type {
            msg::SET_ACK => {
                let set_ack = SetAck::decode(&m.payload)?;
                debug!(generation = set_ack.generation, window = set_ack.window, "main ack window");
                self.ack.set(set_ack.window);
                replies.push(set_ack.ack_sync());
                // SET_ACK itself does not count toward the window.
                return Ok(replies);
            }
            msg::PING => {
                let ping = Ping::decode(&m.payload)?;
                trace!(id = ping.id, time = ping.time, "main ping");
                replies.push(ping.pong());
            }
            msg::main::MOUSE_MODE => match MouseMode::decode(&m.payload) {
                Ok(mode) => {
                    info!(
                        supported = mode.supported_modes,
                        current = mode.current_mode,
                        "mouse mode changed"
                    );
                    self.current_mouse_mode = mode.current_mode;
                }
                Err(e) => warn!(error = %e, "malformed mouse mode message"),
            },
            msg::DISCONNECTING => {
                if let Ok(d) = Disconnecting::decode(&m.payload) {
                    info!(reason = d.reason, "server is disconnecting");
                }
            }
            other => {
                debug!(msg_type = other, kind = messages::describe(other), size = m.payload.len(), "main: ignored");
            }
        }

        if self.ack.record() {
            trace!("main ack");
            replies.push(messages::ack());
        }
        Ok(replies)
    }
}

// ── MainChannel ──────────────────────────────────────────────────

/// A linked main channel, ready to run its receive loop.
pub struct MainChannel<S = tokio::net::TcpStream> {
    framed: ChannelStream<S>,
    state: MainState,
    cancel: CancellationToken,
}

impl<S> MainChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Read `SESSION_INIT` from a freshly linked stream and send any
    /// required replies.
    pub async fn start(
        mut framed: ChannelStream<S>,
        cancel: CancellationToken,
    ) -> Result<Self, SpiceError> {
        let first = match futures::StreamExt::next(&mut framed).await {
            Some(m) => m?,
            None => return Err(SpiceError::ConnectionClosed),
        };
        messages::expect_type(&first, msg::main::INIT)?;
        let init = MainInit::decode(&first.payload)?;
        info!(
            session_id = init.session_id,
            mouse_mode = init.current_mouse_mode,
            agent = init.agent_connected,
            "session initialised"
        );

        let state = MainState::new(init);
        send_all(&mut framed, state.on_init()).await?;
        Ok(Self {
            framed,
            state,
            cancel,
        })
    }

    pub fn session_id(&self) -> u32 {
        self.state.session_id()
    }

    pub fn state(&self) -> &MainState {
        &self.state
    }

    /// Service the main channel until the session is cancelled.
    ///
    /// An orderly close by the server ends the session: the token is
    /// cancelled and `Ok` returned. Any other I/O failure ends only this
    /// loop.
    pub async fn run(mut self) -> Result<(), SpiceError> {
        info!("main channel running");
        while !self.cancel.is_cancelled() {
            match next_message(&mut self.framed).await? {
                Received::Idle => trace!("main: idle"),
                Received::Closed => {
                    info!("main channel closed by server");
                    self.cancel.cancel();
                    return Ok(());
                }
                Received::Message(m) => {
                    trace!(msg_type = m.msg_type, size = m.payload.len(), "main: recv");
                    let replies = self.state.handle(&m)?;
                    send_all(&mut self.framed, replies).await?;
                }
            }
        }

        info!("stopping main channel");
        if let Err(e) = disconnect(&mut self.framed, ChannelType::Main).await {
            debug!(error = %e, "main disconnect");
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::msgc;

    fn init(mode: u32) -> MainInit {
        MainInit {
            session_id: 77,
            display_channels_hint: 1,
            supported_mouse_modes: 3,
            current_mouse_mode: mode,
            agent_connected: 0,
            agent_tokens: 0,
            multi_media_time: 0,
            ram_hint: 0,
        }
    }

    fn set_ack(generation: u32, window: u32) -> Message {
        let mut body = generation.to_le_bytes().to_vec();
        body.extend_from_slice(&window.to_le_bytes());
        Message::new(msg::SET_ACK, body)
    }

    fn ping(id: u32) -> Message {
        let mut body = id.to_le_bytes().to_vec();
        body.extend_from_slice(&99u64.to_le_bytes());
        Message::new(msg::PING, body)
    }

    #[test]
    fn server_mouse_mode_triggers_request() {
        let state = MainState::new(init(u32::from(mouse_mode::SERVER)));
        let replies = state.on_init();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].msg_type, msgc::main::MOUSE_MODE_REQUEST);
        assert_eq!(&replies[0].payload[..], &[2, 0]);

        let state = MainState::new(init(u32::from(mouse_mode::CLIENT)));
        assert!(state.on_init().is_empty());
    }

    #[test]
    fn ping_gets_pong() {
        let mut state = MainState::new(init(2));
        let replies = state.handle(&ping(5)).unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].msg_type, msgc::PONG);
        assert_eq!(&replies[0].payload[..4], &5u32.to_le_bytes());
    }

    #[test]
    fn ack_after_window_messages() {
        let mut state = MainState::new(init(2));
        let sync = state.handle(&set_ack(9, 2)).unwrap();
        assert_eq!(sync.len(), 1);
        assert_eq!(sync[0].msg_type, msgc::ACK_SYNC);
        assert_eq!(state.ack_window().pending(), 0);

        let first = state.handle(&Message::empty(msg::NOTIFY)).unwrap();
        assert!(first.is_empty());

        let second = state.handle(&ping(1)).unwrap();
        let types: Vec<u16> = second.iter().map(|m| m.msg_type).collect();
        assert_eq!(types, vec![msgc::PONG, msgc::ACK]);
        assert!(second[1].payload.is_empty());
        assert_eq!(state.ack_window().pending(), 0);
    }

    #[test]
    fn mouse_mode_notification_is_tracked() {
        let mut state = MainState::new(init(1));
        let body = [3u8, 0, 2, 0];
        state.handle(&Message::new(msg::main::MOUSE_MODE, body.to_vec())).unwrap();
        assert_eq!(state.mouse_mode(), mouse_mode::CLIENT);
    }

    #[test]
    fn truncated_ping_is_fatal() {
        let mut state = MainState::new(init(2));
        let bad = Message::new(msg::PING, vec![0u8; 3]);
        assert!(state.handle(&bad).is_err());
    }

    #[tokio::test]
    async fn start_rejects_wrong_first_message() {
        use crate::codec::SpiceCodec;
        use futures::SinkExt;
        use tokio_util::codec::Framed;

        let (client, server) = tokio::io::duplex(256);
        let mut srv = Framed::new(server, SpiceCodec::mini());
        srv.send(ping(1)).await.unwrap();

        let framed = Framed::new(client, SpiceCodec::mini());
        let err = MainChannel::start(framed, CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            SpiceError::UnexpectedMessage {
                expected: 103,
                actual: 4
            }
        ));
    }

    #[tokio::test]
    async fn peer_close_cancels_session() {
        use crate::codec::SpiceCodec;
        use futures::SinkExt;
        use tokio_util::codec::Framed;

        let (client, server) = tokio::io::duplex(256);
        let mut srv = Framed::new(server, SpiceCodec::mini());
        let body: Vec<u8> = [77u32, 1, 3, 2, 0, 0, 0, 0]
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .collect();
        srv.send(Message::new(msg::main::INIT, body)).await.unwrap();

        let cancel = CancellationToken::new();
        let chan = MainChannel::start(Framed::new(client, SpiceCodec::mini()), cancel.clone())
            .await
            .unwrap();
        assert_eq!(chan.session_id(), 77);

        drop(srv);
        chan.run().await.unwrap();
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_stops_run_with_disconnect() {
        use crate::codec::SpiceCodec;
        use futures::{SinkExt, StreamExt};
        use tokio_util::codec::Framed;

        let (client, server) = tokio::io::duplex(256);
        let mut srv = Framed::new(server, SpiceCodec::mini());
        let body: Vec<u8> = [77u32, 1, 3, 2, 0, 0, 0, 0]
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .collect();
        srv.send(Message::new(msg::main::INIT, body)).await.unwrap();

        let cancel = CancellationToken::new();
        let chan = MainChannel::start(Framed::new(client, SpiceCodec::mini()), cancel.clone())
            .await
            .unwrap();
        cancel.cancel();
        chan.run().await.unwrap();

        let mut seen = Vec::new();
        while let Some(m) = srv.next().await {
            seen.push(m.unwrap().msg_type);
        }
        assert_eq!(seen.last(), Some(&msgc::DISCONNECTING));
    }
}
