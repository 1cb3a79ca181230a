//! The client-side mirror of the primary display surface.
//!
//! The buffer is a complete 32-bit BMP image: a 54-byte header followed
//! by BGRA rows. Rows are stored top-down, which the header records with
//! a negative height, so a published [`Frame`] can be written straight to
//! a `.bmp` file or handed to an image encoder.

use bytes::Bytes;
use tokio::sync::watch;

use crate::draw::Bitmap;
use crate::error::SpiceError;

pub const BMP_HEADER_SIZE: usize = 54;
const DIB_HEADER_SIZE: u32 = 40;
const BYTES_PER_PIXEL: usize = 4;

/// Refuse surfaces larger than 16k on either axis.
pub const MAX_SURFACE_DIM: u32 = 16_384;

fn bmp_header(width: u32, height: u32) -> [u8; BMP_HEADER_SIZE] {
    let image_size = width * height * BYTES_PER_PIXEL as u32;
    let mut h = [0u8; BMP_HEADER_SIZE];
    h[0..2].copy_from_slice(b"BM");
    h[2..6].copy_from_slice(&(BMP_HEADER_SIZE as u32 + image_size).to_le_bytes());
    h[10..14].copy_from_slice(&(BMP_HEADER_SIZE as u32).to_le_bytes());
    h[14..18].copy_from_slice(&DIB_HEADER_SIZE.to_le_bytes());
    h[18..22].copy_from_slice(&(width as i32).to_le_bytes());
    h[22..26].copy_from_slice(&(-(height as i32)).to_le_bytes());
    h[26..28].copy_from_slice(&1u16.to_le_bytes());
    h[28..30].copy_from_slice(&32u16.to_le_bytes());
    h[34..38].copy_from_slice(&image_size.to_le_bytes());
    h
}

// ── Framebuffer ──────────────────────────────────────────────────

#[derive(Debug)]
pub struct Framebuffer {
    width: u32,
    height: u32,
    buf: Vec<u8>,
}

impl Framebuffer {
    /// Allocate a black surface with its BMP header in place.
    pub fn new(width: u32, height: u32) -> Result<Self, SpiceError> {
        if width == 0 || height == 0 || width > MAX_SURFACE_DIM || height > MAX_SURFACE_DIM {
            return Err(SpiceError::Decode(format!(
                "surface {width}x{height} outside 1..={MAX_SURFACE_DIM}"
            )));
        }
        let pixels = width as usize * height as usize * BYTES_PER_PIXEL;
        let mut buf = Vec::with_capacity(BMP_HEADER_SIZE + pixels);
        buf.extend_from_slice(&bmp_header(width, height));
        buf.resize(BMP_HEADER_SIZE + pixels, 0);
        Ok(Self { width, height, buf })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Header plus pixel rows.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn pixels(&self) -> &[u8] {
        &self.buf[BMP_HEADER_SIZE..]
    }

    fn row_stride(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL
    }

    /// Copy `bitmap` with its top-left corner at (`left`, `top`).
    ///
    /// Destination row `top + n` receives the bitmap's `n`th screen row.
    /// Anything falling outside the surface is dropped.
    pub fn blit(&mut self, bitmap: &Bitmap<'_>, left: i32, top: i32) -> Result<(), SpiceError> {
        let src_bpp = bitmap.bytes_per_pixel()?;
        let width = i64::from(self.width);
        let height = i64::from(self.height);

        let first_col = (-i64::from(left)).clamp(0, i64::from(bitmap.x));
        let last_col = (width - i64::from(left)).clamp(0, i64::from(bitmap.x));
        if first_col >= last_col {
            return Ok(());
        }
        let cols = (last_col - first_col) as usize;
        let dst_x = (i64::from(left) + first_col) as usize;
        let stride = self.row_stride();

        for n in 0..bitmap.y {
            let dst_y = i64::from(top) + i64::from(n);
            if dst_y < 0 {
                continue;
            }
            if dst_y >= height {
                break;
            }
            let Some(src_row) = bitmap.row(n) else {
                break;
            };
            let src_start = first_col as usize * src_bpp;
            let Some(src) = src_row.get(src_start..src_start + cols * src_bpp) else {
                return Err(SpiceError::Decode(format!(
                    "bitmap stride {} too small for {} pixels",
                    bitmap.stride, bitmap.x
                )));
            };

            let dst_start = BMP_HEADER_SIZE + dst_y as usize * stride + dst_x * BYTES_PER_PIXEL;
            let dst = &mut self.buf[dst_start..dst_start + cols * BYTES_PER_PIXEL];
            if src_bpp == BYTES_PER_PIXEL {
                dst.copy_from_slice(src);
            } else {
                for (out, px) in dst.chunks_exact_mut(4).zip(src.chunks_exact(3)) {
                    out[..3].copy_from_slice(px);
                    out[3] = 0xff;
                }
            }
        }
        Ok(())
    }

    /// Immutable copy of the current image for the consumer.
    pub fn snapshot(&self) -> Frame {
        Frame {
            width: self.width,
            height: self.height,
            data: Bytes::copy_from_slice(&self.buf),
        }
    }
}

// ── Frame ────────────────────────────────────────────────────────

/// A finished frame: BMP header plus top-down BGRA rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Bytes,
}

impl Frame {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// The complete `.bmp` image.
    pub fn as_bmp(&self) -> &[u8] {
        &self.data
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data[BMP_HEADER_SIZE..]
    }

    /// One screen row, top first. `None` past the bottom edge.
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.height {
            return None;
        }
        let stride = self.width as usize * BYTES_PER_PIXEL;
        let start = y as usize * stride;
        self.pixels().get(start..start + stride)
    }

    /// BGRA bytes of one pixel, or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width {
            return None;
        }
        let start = x as usize * BYTES_PER_PIXEL;
        self.row(y)?.get(start..start + BYTES_PER_PIXEL)
    }
}

// ── Handoff ──────────────────────────────────────────────────────

/// Producer side held by the display channel.
pub type FrameSender = watch::Sender<Option<Frame>>;

/// Consumer view of the display output. `Some` means a frame is ready.
#[derive(Debug, Clone)]
pub struct FrameReceiver {
    rx: watch::Receiver<Option<Frame>>,
}

pub fn frame_channel() -> (FrameSender, FrameReceiver) {
    let (tx, rx) = watch::channel(None);
    (tx, FrameReceiver { rx })
}

impl FrameReceiver {
    pub fn is_ready(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// The most recent frame, if a surface currently exists.
    pub fn latest(&self) -> Option<Frame> {
        self.rx.borrow().clone()
    }

    /// Wait for the next publish (frame or clear).
    ///
    /// Errors with `ConnectionClosed` once the display channel is gone.
    pub async fn changed(&mut self) -> Result<Option<Frame>, SpiceError> {
        self.rx
            .changed()
            .await
            .map_err(|_| SpiceError::ConnectionClosed)?;
        Ok(self.rx.borrow_and_update().clone())
    }
}

// ── Tests ────────────────────────────────────────────────────────
