//! Integration tests: a scripted SPICE server on localhost exercising the
//! link handshake, ticket authentication and the three channels over real
//! TCP connections.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rsa::pkcs8::EncodePublicKey;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use spice_core::link::{LinkMess, LinkReply};
use spice_core::protocol::{TICKET_PUBKEY_BYTES, msg, msgc};
use spice_core::{
    ChannelType, CommonCaps, DataHeader, DisplayCaps, LinkError, LinkHeader, Message, Session,
    SessionOptions, SpiceCodec, SpiceError,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_util::codec::Framed;

const SESSION_ID: u32 = 42;
const TIMEOUT: Duration = Duration::from_secs(5);

// ── Helpers ──────────────────────────────────────────────────────

struct TicketKey {
    private: RsaPrivateKey,
    der: [u8; TICKET_PUBKEY_BYTES],
}

fn ticket_key() -> TicketKey {
    let private = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
    let doc = RsaPublicKey::from(&private).to_public_key_der().unwrap();
    let mut der = [0u8; TICKET_PUBKEY_BYTES];
    der.copy_from_slice(doc.as_bytes());
    TicketKey { private, der }
}

async fn ephemeral_listener() -> (TcpListener, Session) {
    ephemeral_listener_with(SessionOptions::default()).await
}

async fn ephemeral_listener_with(options: SessionOptions) -> (TcpListener, Session) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let session = Session::init(SessionOptions {
        address: addr.ip().to_string(),
        port: addr.port(),
        ..options
    })
    .unwrap();
    (listener, session)
}

/// What the client sent in its link message.
struct Linked {
    mess: LinkMess,
    caps: Vec<u32>,
}

/// Play the server side of one link handshake.
///
/// Replies with `error`; when that is `Ok`, grants `common`/`channel`
/// capability words and checks the ticket against `"password"`.
async fn serve_link(
    stream: &mut TcpStream,
    key: &TicketKey,
    error: LinkError,
    common: u32,
    channel: u32,
) -> Linked {
    let mut raw = [0u8; LinkHeader::SIZE];
    stream.read_exact(&mut raw).await.unwrap();
    let header = LinkHeader::from_bytes(&raw).unwrap();
    let mut body = vec![0u8; header.size as usize];
    stream.read_exact(&mut body).await.unwrap();

    let mut mess_raw = [0u8; LinkMess::SIZE];
    mess_raw.copy_from_slice(&body[..LinkMess::SIZE]);
    let mess = LinkMess::from_bytes(&mess_raw);
    let caps = body[mess.caps_offset as usize..]
        .chunks_exact(4)
        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        .collect();

    let reply = LinkReply {
        error: error as u32,
        pub_key: key.der,
        num_common_caps: 1,
        num_channel_caps: 1,
        caps_offset: LinkReply::SIZE as u32,
    };
    let mut out = LinkHeader::new((LinkReply::SIZE + 8) as u32).to_bytes().to_vec();
    out.extend_from_slice(&reply.to_bytes());
    out.extend_from_slice(&common.to_le_bytes());
    out.extend_from_slice(&channel.to_le_bytes());
    stream.write_all(&out).await.unwrap();

    if error == LinkError::Ok {
        let mut encrypted = [0u8; 128];
        stream.read_exact(&mut encrypted).await.unwrap();
        let ticket = key
            .private
            .decrypt(Oaep::new::<Sha1>(), &encrypted)
            .unwrap();
        let result = if ticket == b"password" {
            LinkError::Ok
        } else {
            LinkError::PermissionDenied
        };
        stream.write_all(&(result as u32).to_le_bytes()).await.unwrap();
    }

    Linked { mess, caps }
}

fn main_init(mouse_mode: u32) -> Message {
    let body: Vec<u8> = [SESSION_ID, 1, 3, mouse_mode, 0, 10, 0, 0]
        .iter()
        .flat_map(|w| w.to_le_bytes())
        .collect();
    Message::new(msg::main::INIT, body)
}

/// Accept and link the main channel, then send `SESSION_INIT`.
async fn serve_main(
    listener: &TcpListener,
    key: &TicketKey,
    mouse_mode: u32,
) -> Framed<TcpStream, SpiceCodec> {
    let (mut stream, _) = listener.accept().await.unwrap();
    let linked = serve_link(
        &mut stream,
        key,
        LinkError::Ok,
        CommonCaps::MINI_HEADER.bits(),
        0,
    )
    .await;
    assert_eq!(linked.mess.channel_type, ChannelType::Main as u8);
    assert_eq!(linked.mess.connection_id, 0);

    let mut framed = Framed::new(stream, SpiceCodec::mini());
    framed.send(main_init(mouse_mode)).await.unwrap();
    framed
}

async fn recv(framed: &mut Framed<TcpStream, SpiceCodec>) -> Message {
    tokio::time::timeout(TIMEOUT, framed.next())
        .await
        .expect("timeout")
        .expect("stream ended")
        .unwrap()
}

fn u32s(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

/// A `DRAW_COPY` body painting a `w` x `h` 32-bit bitmap at the origin.
/// Source row `r` is filled with byte `r + 1`.
fn draw_copy_body(w: u32, h: u32, top_down: bool) -> Vec<u8> {
    let mut body = u32s(&[0]);
    body.extend(u32s(&[0, 0, h, w])); // bbox top, left, bottom, right
    body.push(0); // clip none
    let image_offset_at = body.len();
    body.extend(u32s(&[0])); // src image offset, patched below
    body.extend(u32s(&[0, 0, h, w])); // src area
    body.extend_from_slice(&[0, 0, 0]); // rop u16, scale_mode u8
    body.push(0); // mask flags
    body.extend(u32s(&[0, 0, 0])); // mask pos, mask image offset

    let image_offset = body.len() as u32;
    body[image_offset_at..image_offset_at + 4].copy_from_slice(&image_offset.to_le_bytes());
    body.extend_from_slice(&7u64.to_le_bytes());
    body.extend_from_slice(&[0, 0]); // BITMAP, no flags
    body.extend(u32s(&[w, h]));
    body.push(8); // 32-bit
    body.push(if top_down { 4 } else { 0 });
    body.extend(u32s(&[w, h, w * 4, 0]));
    for r in 0..h {
        body.extend(std::iter::repeat_n(r as u8 + 1, (w * 4) as usize));
    }
    body
}

// ── Link negotiation ─────────────────────────────────────────────

#[tokio::test]
async fn main_channel_links_and_learns_session_id() {
    let key = ticket_key();
    let (listener, mut session) = ephemeral_listener().await;

    let server = tokio::spawn(async move {
        let mut main = serve_main(&listener, &key, 1).await;
        // Server mouse mode was reported, so the client asks for client mode.
        let req = recv(&mut main).await;
        assert_eq!(req.msg_type, msgc::main::MOUSE_MODE_REQUEST);
        assert_eq!(&req.payload[..], &[2, 0]);
        main
    });

    let _main = session.channel_init_main().await.unwrap();
    assert_eq!(session.session_id(), Some(SESSION_ID));
    server.await.unwrap();
}

#[tokio::test]
async fn wrong_ticket_is_auth_failure() {
    let key = ticket_key();
    let (listener, mut session) = ephemeral_listener_with(SessionOptions {
        ticket: "letmein".into(),
        ..SessionOptions::default()
    })
    .await;

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        serve_link(&mut stream, &key, LinkError::Ok, 0, 0).await;
    });

    let err = session.channel_init_main().await.err().unwrap();
    assert!(matches!(err, SpiceError::AuthFailed(_)), "got {err}");
    assert!(session.session_id().is_none());
    server.await.unwrap();
}

#[tokio::test]
async fn link_rejection_reports_code() {
    let key = ticket_key();
    let (listener, mut session) = ephemeral_listener().await;

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        serve_link(&mut stream, &key, LinkError::ChannelNotAvailable, 0, 0).await;
    });

    let err = session.channel_init_main().await.err().unwrap();
    assert!(matches!(
        err,
        SpiceError::LinkRejected(LinkError::ChannelNotAvailable)
    ));
    server.await.unwrap();
}

// ── Main channel ─────────────────────────────────────────────────

#[tokio::test]
async fn main_loop_pongs_acks_and_ends_on_server_close() {
    let key = ticket_key();
    let (listener, mut session) = ephemeral_listener().await;

    let server = tokio::spawn(async move {
        let mut main = serve_main(&listener, &key, 2).await;

        let mut ping = u32s(&[11]);
        ping.extend_from_slice(&0x1122_3344_5566_7788u64.to_le_bytes());
        main.send(Message::new(msg::PING, ping.clone())).await.unwrap();
        let pong = recv(&mut main).await;
        assert_eq!(pong.msg_type, msgc::PONG);
        assert_eq!(&pong.payload[..], &ping[..]);

        main.send(Message::new(msg::SET_ACK, u32s(&[3, 2]))).await.unwrap();
        let sync = recv(&mut main).await;
        assert_eq!(sync.msg_type, msgc::ACK_SYNC);
        assert_eq!(&sync.payload[..], &u32s(&[3])[..]);

        main.send(Message::empty(msg::NOTIFY)).await.unwrap();
        main.send(Message::empty(msg::main::MULTI_MEDIA_TIME)).await.unwrap();
        let ack = recv(&mut main).await;
        assert_eq!(ack.msg_type, msgc::ACK);
        assert!(ack.payload.is_empty());
        // Dropping `main` closes the socket.
    });

    let main = session.channel_init_main().await.unwrap();
    let loop_result = tokio::time::timeout(TIMEOUT, main.run()).await.expect("timeout");
    assert!(loop_result.is_ok());
    assert!(session.is_canceled());
    server.await.unwrap();
}

// ── Display channel ──────────────────────────────────────────────

#[tokio::test]
async fn display_paints_then_relinks_after_destroy() {
    let key = ticket_key();
    let (listener, mut session) = ephemeral_listener().await;
    let (painted_tx, painted_rx) = oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        let main = serve_main(&listener, &key, 2).await;

        // First display link.
        let (mut stream, _) = listener.accept().await.unwrap();
        let linked = serve_link(
            &mut stream,
            &key,
            LinkError::Ok,
            CommonCaps::MINI_HEADER.bits(),
            DisplayCaps::PREF_COMPRESSION.bits(),
        )
        .await;
        assert_eq!(linked.mess.channel_type, ChannelType::Display as u8);
        assert_eq!(linked.mess.connection_id, SESSION_ID);
        assert_eq!(
            linked.caps,
            vec![CommonCaps::MINI_HEADER.bits(), DisplayCaps::PREF_COMPRESSION.bits()]
        );

        let mut display = Framed::new(stream, SpiceCodec::mini());
        let init = recv(&mut display).await;
        assert_eq!(init.msg_type, msgc::display::INIT);
        let comp = recv(&mut display).await;
        assert_eq!(comp.msg_type, msgc::display::PREFERRED_COMPRESSION);
        assert_eq!(&comp.payload[..], &[1]);

        display
            .send(Message::new(msg::display::SURFACE_CREATE, u32s(&[0, 4, 3, 32, 1])))
            .await
            .unwrap();
        display
            .send(Message::new(msg::display::DRAW_COPY, draw_copy_body(4, 3, false)))
            .await
            .unwrap();

        painted_rx.await.unwrap();
        display
            .send(Message::new(msg::display::SURFACE_DESTROY, u32s(&[0])))
            .await
            .unwrap();
        let bye = recv(&mut display).await;
        assert_eq!(bye.msg_type, msgc::DISCONNECTING);

        // The client links again on a fresh connection.
        let (mut stream, _) = listener.accept().await.unwrap();
        let relinked = serve_link(
            &mut stream,
            &key,
            LinkError::Ok,
            CommonCaps::MINI_HEADER.bits(),
            DisplayCaps::PREF_COMPRESSION.bits(),
        )
        .await;
        assert_eq!(relinked.mess.connection_id, SESSION_ID);
        let mut display = Framed::new(stream, SpiceCodec::mini());
        assert_eq!(recv(&mut display).await.msg_type, msgc::display::INIT);
        assert_eq!(
            recv(&mut display).await.msg_type,
            msgc::display::PREFERRED_COMPRESSION
        );
        (main, display)
    });

    let _main = session.channel_init_main().await.unwrap();
    let display = tokio::spawn(session.display_channel().unwrap().run());
    let mut frames = session.frames();

    let frame = loop {
        let next = tokio::time::timeout(TIMEOUT, frames.changed())
            .await
            .expect("timeout")
            .unwrap();
        if let Some(frame) = next {
            break frame;
        }
    };
    assert_eq!((frame.width(), frame.height()), (4, 3));
    // Bottom-up source: its first row is the bottom screen row.
    assert_eq!(frame.pixel(0, 2), Some(&[1, 1, 1, 1][..]));
    assert_eq!(frame.pixel(3, 0), Some(&[3, 3, 3, 3][..]));
    assert_eq!(session.remote_geometry().map(|g| (g.width, g.height)), Some((4, 3)));

    painted_tx.send(()).unwrap();
    let cleared = tokio::time::timeout(TIMEOUT, frames.changed())
        .await
        .expect("timeout")
        .unwrap();
    assert!(cleared.is_none());
    assert!(!frames.is_ready());

    let (_main_srv, mut display_srv) = server.await.unwrap();

    session.cancel();
    let result = tokio::time::timeout(TIMEOUT, display).await.expect("timeout").unwrap();
    assert!(result.is_ok());
    assert_eq!(recv(&mut display_srv).await.msg_type, msgc::DISCONNECTING);
    assert!(session.remote_geometry().is_none());
}

// ── Inputs channel ───────────────────────────────────────────────

#[tokio::test]
async fn inputs_use_full_header_with_serials() {
    let key = ticket_key();
    let (listener, mut session) = ephemeral_listener().await;

    let server = tokio::spawn(async move {
        let main = serve_main(&listener, &key, 2).await;

        let (mut stream, _) = listener.accept().await.unwrap();
        let linked = serve_link(&mut stream, &key, LinkError::Ok, 0, 0).await;
        assert_eq!(linked.mess.channel_type, ChannelType::Inputs as u8);
        assert_eq!(linked.mess.connection_id, SESSION_ID);
        assert_eq!(linked.mess.num_common_caps + linked.mess.num_channel_caps, 0);

        let mut events = Vec::new();
        for _ in 0..2 {
            let mut raw = [0u8; DataHeader::SIZE];
            stream.read_exact(&mut raw).await.unwrap();
            let header = DataHeader::from_bytes(&raw);
            let mut body = vec![0u8; header.size as usize];
            stream.read_exact(&mut body).await.unwrap();
            events.push((header, body));
        }
        drop(main);
        events
    });

    let _main = session.channel_init_main().await.unwrap();
    session.channel_init_inputs().await.unwrap();
    assert_eq!(session.input_serial(), Some(1));

    session.send_key(38, 0x61, false).await.unwrap();
    // No display surface yet: motion is dropped without using a serial.
    session.send_mouse_motion(10, 10).await.unwrap();
    session.send_mouse_button(1, false).await.unwrap();
    assert_eq!(session.input_serial(), Some(3));
    assert_eq!(session.button_state(), 1);

    let events = tokio::time::timeout(TIMEOUT, server).await.expect("timeout").unwrap();
    let (key_hdr, key_body) = &events[0];
    assert_eq!(key_hdr.serial, 1);
    assert_eq!(key_hdr.msg_type, msgc::inputs::KEY_DOWN);
    assert_eq!(key_body, &vec![30, 0, 0, 0]);

    let (btn_hdr, btn_body) = &events[1];
    assert_eq!(btn_hdr.serial, 2);
    assert_eq!(btn_hdr.msg_type, msgc::inputs::MOUSE_PRESS);
    assert_eq!(btn_body, &vec![1, 1, 0]);

    session.deinit().await;
}
