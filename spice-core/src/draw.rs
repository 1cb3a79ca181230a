//! Draw-copy decoding.
//!
//! A `DRAW_COPY` body is laid out in this order:
//!
//! ```text
//! surface_id u32 | bbox Rect | clip_type u8 [| num_rects u32 | Rect * n]
//! | src_image off u32 | src_area Rect | rop u16 | scale_mode u8
//! | mask_flags u8 | mask_pos Point | mask_image off u32
//! ```
//!
//! Image, palette and mask sub-records are referenced by byte offset from
//! the start of the body; offset zero means absent. A bitmap's pixel rows
//! follow its header inline.

use crate::cursor::WireCursor;
use crate::error::SpiceError;
use crate::protocol::{bitmap_flags, bitmap_fmt, clip, image_type};

// ── Geometry ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub top: i32,
    pub left: i32,
    pub bottom: i32,
    pub right: i32,
}

impl Rect {
    fn read(cur: &mut WireCursor<'_>) -> Result<Self, SpiceError> {
        Ok(Self {
            top: cur.i32()?,
            left: cur.i32()?,
            bottom: cur.i32()?,
            right: cur.i32()?,
        })
    }

    pub fn width(&self) -> i32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> i32 {
        self.bottom.saturating_sub(self.top)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clip {
    None,
    /// Parsed but not applied when painting.
    Rects(Vec<Rect>),
}

impl Clip {
    fn read(cur: &mut WireCursor<'_>) -> Result<Self, SpiceError> {
        match cur.u8()? {
            clip::NONE => Ok(Clip::None),
            clip::RECTS => {
                let count = cur.u32()? as usize;
                // Each rect is 16 bytes; reject counts the body cannot hold
                // before allocating.
                if count > cur.remaining() / 16 {
                    return Err(SpiceError::Truncated {
                        offset: cur.position(),
                        needed: count.saturating_mul(16),
                        len: cur.position() + cur.remaining(),
                    });
                }
                let rects = (0..count)
                    .map(|_| Rect::read(cur))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Clip::Rects(rects))
            }
            other => Err(SpiceError::UnknownVariant {
                type_name: "ClipType",
                value: u64::from(other),
            }),
        }
    }
}

// ── Palette ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Palette {
    /// Server asked us to reuse a palette cached under this id.
    Cached(u64),
    Inline { unique: u64, entries: Vec<u32> },
}

impl Palette {
    fn read_at(body: &WireCursor<'_>, offset: u32) -> Result<Self, SpiceError> {
        let mut cur = body.at(offset)?;
        let unique = cur.u64()?;
        let count = cur.u16()?;
        let entries = (0..count)
            .map(|_| cur.u32())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Palette::Inline { unique, entries })
    }
}

// ── Bitmap ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap<'a> {
    pub format: u8,
    pub flags: u8,
    /// Width in pixels.
    pub x: u32,
    /// Height in rows.
    pub y: u32,
    pub stride: u32,
    pub palette: Option<Palette>,
    /// `stride * y` bytes of pixel rows.
    pub data: &'a [u8],
}

impl<'a> Bitmap<'a> {
    fn read(body: &WireCursor<'a>, cur: &mut WireCursor<'a>) -> Result<Self, SpiceError> {
        let format = cur.u8()?;
        let flags = cur.u8()?;
        let x = cur.u32()?;
        let y = cur.u32()?;
        let stride = cur.u32()?;

        let palette = if flags & bitmap_flags::PAL_FROM_CACHE != 0 {
            Some(Palette::Cached(cur.u64()?))
        } else {
            match cur.u32()? {
                0 => None,
                offset => Some(Palette::read_at(body, offset)?),
            }
        };

        let data_len = (stride as usize)
            .checked_mul(y as usize)
            .ok_or_else(|| SpiceError::Decode(format!("bitmap {stride}x{y} overflows")))?;
        let data = cur.bytes(data_len)?;

        Ok(Self {
            format,
            flags,
            x,
            y,
            stride,
            palette,
            data,
        })
    }

    pub fn is_top_down(&self) -> bool {
        self.flags & bitmap_flags::TOP_DOWN != 0
    }

    /// Bytes per pixel for the formats we can paint.
    pub fn bytes_per_pixel(&self) -> Result<usize, SpiceError> {
        match self.format {
            bitmap_fmt::BPP_32 | bitmap_fmt::RGBA => Ok(4),
            bitmap_fmt::BPP_24 => Ok(3),
            other => Err(SpiceError::Decode(format!(
                "unsupported bitmap format {other}"
            ))),
        }
    }

    /// Source row that lands on destination row `n`.
    ///
    /// Bottom-up bitmaps store the last screen row first.
    pub fn row(&self, n: u32) -> Option<&'a [u8]> {
        if n >= self.y {
            return None;
        }
        let src = if self.is_top_down() { n } else { self.y - 1 - n };
        let start = src as usize * self.stride as usize;
        self.data.get(start..start + self.stride as usize)
    }
}

// ── Image ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub id: u64,
    pub image_type: u8,
    pub flags: u8,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image<'a> {
    pub descriptor: ImageDescriptor,
    /// Present only for uncompressed bitmap images.
    pub bitmap: Option<Bitmap<'a>>,
}

impl<'a> Image<'a> {
    fn read_at(body: &WireCursor<'a>, offset: u32) -> Result<Option<Self>, SpiceError> {
        if offset == 0 {
            return Ok(None);
        }
        let mut cur = body.at(offset)?;
        let descriptor = ImageDescriptor {
            id: cur.u64()?,
            image_type: cur.u8()?,
            flags: cur.u8()?,
            width: cur.u32()?,
            height: cur.u32()?,
        };
        let bitmap = if descriptor.image_type == image_type::BITMAP {
            Some(Bitmap::read(body, &mut cur)?)
        } else {
            None
        };
        Ok(Some(Self { descriptor, bitmap }))
    }
}

// ── DrawCopy ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask<'a> {
    pub flags: u8,
    pub pos: Point,
    pub image: Option<Image<'a>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawCopy<'a> {
    pub surface_id: u32,
    pub bbox: Rect,
    pub clip: Clip,
    pub src_image: Option<Image<'a>>,
    pub src_area: Rect,
    pub rop_descriptor: u16,
    pub scale_mode: u8,
    pub mask: Mask<'a>,
}

impl<'a> DrawCopy<'a> {
    pub fn decode(body: &'a [u8]) -> Result<Self, SpiceError> {
        let root = WireCursor::new(body);
        let mut cur = root;

        let surface_id = cur.u32()?;
        let bbox = Rect::read(&mut cur)?;
        let clip = Clip::read(&mut cur)?;

        let src_image = Image::read_at(&root, cur.u32()?)?;
        let src_area = Rect::read(&mut cur)?;
        let rop_descriptor = cur.u16()?;
        let scale_mode = cur.u8()?;

        let mask_flags = cur.u8()?;
        let pos = Point {
            x: cur.i32()?,
            y: cur.i32()?,
        };
        let mask_image = Image::read_at(&root, cur.u32()?)?;

        Ok(Self {
            surface_id,
            bbox,
            clip,
            src_image,
            src_area,
            rop_descriptor,
            scale_mode,
            mask: Mask {
                flags: mask_flags,
                pos,
                image: mask_image,
            },
        })
    }

    /// The bitmap to paint, if the source image is one.
    pub fn bitmap(&self) -> Option<&Bitmap<'a>> {
        self.src_image.as_ref().and_then(|img| img.bitmap.as_ref())
    }
}

// ── Test support ─────────────────────────────────────────────────


// ── Tests ────────────────────────────────────────────────────────
