//! Bounds-checked reads over a message body.
//!
//! SPICE draw commands reference sub-records (images, bitmaps, palettes,
//! clip lists) by byte offset from the start of the message body. Every
//! such resolution goes through [`WireCursor::at`], and every field read
//! checks the remaining length, so a hostile offset or a short body turns
//! into [`SpiceError::Truncated`] instead of an out-of-bounds access.

use crate::error::SpiceError;

#[derive(Debug, Clone, Copy)]
pub struct WireCursor<'a> {
    body: &'a [u8],
    pos: usize,
}

impl<'a> WireCursor<'a> {
    pub fn new(body: &'a [u8]) -> Self {
        Self { body, pos: 0 }
    }

    /// A new cursor positioned at `offset` within the same body.
    pub fn at(&self, offset: u32) -> Result<WireCursor<'a>, SpiceError> {
        let offset = offset as usize;
        if offset > self.body.len() {
            return Err(SpiceError::Truncated {
                offset,
                needed: 0,
                len: self.body.len(),
            });
        }
        Ok(Self {
            body: self.body,
            pos: offset,
        })
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.body.len() - self.pos
    }

    /// Borrow the next `n` bytes and advance past them.
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], SpiceError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.body.len())
            .ok_or(SpiceError::Truncated {
                offset: self.pos,
                needed: n,
                len: self.body.len(),
            })?;
        let out = &self.body[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> Result<(), SpiceError> {
        self.bytes(n).map(|_| ())
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], SpiceError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, SpiceError> {
        Ok(self.array::<1>()?[0])
    }

    pub fn u16(&mut self) -> Result<u16, SpiceError> {
        self.array().map(u16::from_le_bytes)
    }

    pub fn u32(&mut self) -> Result<u32, SpiceError> {
        self.array().map(u32::from_le_bytes)
    }

    pub fn i32(&mut self) -> Result<i32, SpiceError> {
        self.array().map(i32::from_le_bytes)
    }

    pub fn u64(&mut self) -> Result<u64, SpiceError> {
        self.array().map(u64::from_le_bytes)
    }

    pub fn i64(&mut self) -> Result<i64, SpiceError> {
        self.array().map(i64::from_le_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian_fields() {
        let body = [0x01, 0x02, 0x03, 0x04, 0x05, 0xff, 0xff, 0xff, 0xff];
        let mut cur = WireCursor::new(&body);
        assert_eq!(cur.u8().unwrap(), 0x01);
        assert_eq!(cur.u16().unwrap(), 0x0302);
        assert_eq!(cur.u16().unwrap(), 0x0504);
        assert_eq!(cur.i32().unwrap(), -1);
        assert_eq!(cur.remaining(), 0);
    }

    #[test]
    fn short_read_is_truncated() {
        let body = [0u8; 3];
        let mut cur = WireCursor::new(&body);
        let err = cur.u32().unwrap_err();
        assert!(matches!(
            err,
            SpiceError::Truncated {
                offset: 0,
                needed: 4,
                len: 3
            }
        ));
        // A failed read does not move the cursor.
        assert_eq!(cur.position(), 0);
    }

    #[test]
    fn offset_past_end_is_truncated() {
        let body = [0u8; 8];
        let cur = WireCursor::new(&body);
        assert!(cur.at(8).is_ok());
        assert!(matches!(cur.at(9), Err(SpiceError::Truncated { .. })));
    }

    #[test]
    fn at_is_relative_to_body_start() {
        let body = [0, 0, 0, 0, 0x2a, 0, 0, 0];
        let mut cur = WireCursor::new(&body);
        cur.skip(2).unwrap();
        let mut sub = cur.at(4).unwrap();
        assert_eq!(sub.u32().unwrap(), 42);
        assert_eq!(cur.position(), 2);
    }

    #[test]
    fn huge_length_does_not_overflow() {
        let body = [0u8; 4];
        let mut cur = WireCursor::new(&body);
        cur.skip(1).unwrap();
        assert!(cur.bytes(usize::MAX).is_err());
    }
}
