//! SPICE wire constants.
//!
//! Values mirror the upstream `spice-protocol` headers. Server → client
//! message types live in [`msg`], client → server types in [`msgc`].
//! Types below 100 are shared by every channel; each channel numbers its
//! own messages from 101.

/// `"REDQ"` read as a little-endian `u32`.
pub const MAGIC: u32 = u32::from_le_bytes(*b"REDQ");
pub const VERSION_MAJOR: u32 = 2;
pub const VERSION_MINOR: u32 = 2;

/// DER-encoded RSA-1024 `SubjectPublicKeyInfo` carried in the link reply.
pub const TICKET_PUBKEY_BYTES: usize = 162;
/// Longest plaintext ticket the server accepts.
pub const MAX_PASSWORD_LENGTH: usize = 60;
/// Largest link reply body accepted: the fixed reply plus room for
/// capability words and padding.
pub const MAX_LINK_REPLY_SIZE: usize = 4 + TICKET_PUBKEY_BYTES + 12 + 4096;

/// Default server port for SPICE displays.
pub const DEFAULT_PORT: u16 = 5900;
pub const DEFAULT_ADDR: &str = "127.0.0.1";

/// Server → client message types.
pub mod msg {
    pub const MIGRATE: u16 = 1;
    pub const MIGRATE_DATA: u16 = 2;
    pub const SET_ACK: u16 = 3;
    pub const PING: u16 = 4;
    pub const WAIT_FOR_CHANNELS: u16 = 5;
    pub const DISCONNECTING: u16 = 6;
    pub const NOTIFY: u16 = 7;

    pub mod main {
        pub const INIT: u16 = 103;
        pub const CHANNELS_LIST: u16 = 104;
        pub const MOUSE_MODE: u16 = 105;
        pub const MULTI_MEDIA_TIME: u16 = 106;
    }

    pub mod display {
        pub const MODE: u16 = 101;
        pub const MARK: u16 = 102;
        pub const RESET: u16 = 103;
        pub const DRAW_COPY: u16 = 304;
        pub const SURFACE_CREATE: u16 = 314;
        pub const SURFACE_DESTROY: u16 = 315;
    }
}

/// Client → server message types.
pub mod msgc {
    pub const ACK_SYNC: u16 = 1;
    pub const ACK: u16 = 2;
    pub const PONG: u16 = 3;
    pub const DISCONNECTING: u16 = 6;

    pub mod main {
        pub const MOUSE_MODE_REQUEST: u16 = 105;
    }

    pub mod display {
        pub const INIT: u16 = 101;
        pub const PREFERRED_COMPRESSION: u16 = 103;
    }

    pub mod inputs {
        pub const KEY_DOWN: u16 = 101;
        pub const KEY_UP: u16 = 102;
        pub const MOUSE_POSITION: u16 = 112;
        pub const MOUSE_PRESS: u16 = 113;
        pub const MOUSE_RELEASE: u16 = 114;
    }
}

/// Mouse modes. Session init reports them widened to `u32`.
pub mod mouse_mode {
    pub const SERVER: u16 = 1;
    pub const CLIENT: u16 = 2;
}

/// Image compression preferences.
pub mod compression {
    pub const INVALID: u8 = 0;
    pub const OFF: u8 = 1;
}

/// Draw-command clip types.
pub mod clip {
    pub const NONE: u8 = 0;
    pub const RECTS: u8 = 1;
}

/// Image descriptor types.
pub mod image_type {
    pub const BITMAP: u8 = 0;
}

/// Bitmap pixel formats.
pub mod bitmap_fmt {
    pub const BPP_24: u8 = 7;
    pub const BPP_32: u8 = 8;
    pub const RGBA: u8 = 9;
}

/// Bitmap flag bits.
pub mod bitmap_flags {
    pub const PAL_CACHE_ME: u8 = 1 << 0;
    pub const PAL_FROM_CACHE: u8 = 1 << 1;
    pub const TOP_DOWN: u8 = 1 << 2;
}

/// Mouse button ids and the matching state-mask bits.
pub mod mouse_button {
    pub const LEFT: u8 = 1;
    pub const MIDDLE: u8 = 2;
    pub const RIGHT: u8 = 3;

    pub const MASK_LEFT: u16 = 1 << 0;
    pub const MASK_MIDDLE: u16 = 1 << 1;
    pub const MASK_RIGHT: u16 = 1 << 2;
}
