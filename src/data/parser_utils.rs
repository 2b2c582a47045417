//! Shared byte-level helpers used by the ILFF container, model and archive codecs.

use std::fmt;

use thiserror::Error;
use winnow::Parser;
use winnow::binary::{le_f32, le_i32, le_u16, le_u32};
use winnow::error::ContextError;
use winnow::token::take;

/// Common result type for winnow parsers.
pub type WResult<T> = Result<T, winnow::error::ErrMode<ContextError>>;

/// Errors raised by [`ByteCursor`] and [`ByteWriter`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CursorError {
    #[error("read of {requested} bytes at 0x{position:X} runs past buffer end 0x{length:X}")]
    OutOfBounds {
        position: usize,
        requested: usize,
        length: usize,
    },
    #[error("seek to {target} is outside of buffer (len 0x{length:X})")]
    InvalidSeek { target: i64, length: usize },
}

/// Round `len` up to the next multiple of four.
pub const fn align4(len: usize) -> usize {
    (len + 3) & !3
}

/// A four byte chunk / record identifier, compared by exact bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(pub [u8; 4]);

impl Tag {
    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:02X}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag(\"{self}\")")
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Tag {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Sequential little-endian reader over an immutable buffer.
///
/// Every read is bounds checked up front; a failed read leaves the position
/// untouched. Cursors over the same buffer are fully independent.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        ByteCursor { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn parse_fixed<T>(
        &mut self,
        width: usize,
        parser: impl FnOnce(&mut &'a [u8]) -> WResult<T>,
    ) -> Result<T, CursorError> {
        let out_of_bounds = CursorError::OutOfBounds {
            position: self.pos,
            requested: width,
            length: self.data.len(),
        };
        if width > self.remaining() {
            return Err(out_of_bounds);
        }

        let input = &mut &self.data[self.pos..];
        let value = parser(input).map_err(|_| out_of_bounds)?;
        self.pos += width;
        Ok(value)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], CursorError> {
        self.parse_fixed(n, |input| take(n).parse_next(input))
    }

    pub fn read_i32_le(&mut self) -> Result<i32, CursorError> {
        self.parse_fixed(4, |input| le_i32.parse_next(input))
    }

    pub fn read_u32_le(&mut self) -> Result<u32, CursorError> {
        self.parse_fixed(4, |input| le_u32.parse_next(input))
    }

    pub fn read_u16_le(&mut self) -> Result<u16, CursorError> {
        self.parse_fixed(2, |input| le_u16.parse_next(input))
    }

    pub fn read_f32_le(&mut self) -> Result<f32, CursorError> {
        self.parse_fixed(4, |input| le_f32.parse_next(input))
    }

    pub fn read_tag(&mut self) -> Result<Tag, CursorError> {
        let bytes = self.read_bytes(4)?;
        Ok(Tag([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read `n` bytes as single-byte characters (each byte maps to the code point
    /// of the same value, never UTF-8).
    pub fn read_fixed_string(&mut self, n: usize) -> Result<String, CursorError> {
        let bytes = self.read_bytes(n)?;
        Ok(bytes.iter().map(|&b| b as char).collect())
    }

    /// Move to `offset`, either absolute or relative to the current position.
    /// Landing exactly on the end of the buffer is allowed.
    pub fn seek(&mut self, offset: i64, relative: bool) -> Result<usize, CursorError> {
        let target = if relative {
            self.pos as i64 + offset
        } else {
            offset
        };
        if target < 0 || target > self.data.len() as i64 {
            return Err(CursorError::InvalidSeek {
                target,
                length: self.data.len(),
            });
        }
        self.pos = target as usize;
        Ok(self.pos)
    }
}

/// Little-endian writer that grows an owned buffer.
#[derive(Debug, Clone, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        ByteWriter {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_tag(&mut self, tag: Tag) {
        self.buf.extend_from_slice(tag.as_bytes());
    }

    pub fn write_i32_le(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u32_le(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u16_le(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_f32_le(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Append zero bytes until the length is a multiple of `align`.
    pub fn pad_to(&mut self, align: usize) {
        let rem = self.buf.len() % align;
        if rem != 0 {
            self.buf.resize(self.buf.len() + align - rem, 0);
        }
    }

    /// Overwrite four already-written bytes at `offset`.
    pub fn patch_u32_le(&mut self, offset: usize, v: u32) -> Result<(), CursorError> {
        let length = self.buf.len();
        let slot = offset
            .checked_add(4)
            .and_then(|end| self.buf.get_mut(offset..end))
            .ok_or(CursorError::OutOfBounds {
                position: offset,
                requested: 4,
                length,
            })?;
        slot.copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian() {
        let data = [0x01, 0x00, 0x00, 0x00, 0xFE, 0xFF, b'A', b'B'];
        let mut cursor = ByteCursor::new(&data);
        assert_eq!(cursor.read_i32_le(), Ok(1));
        assert_eq!(cursor.read_u16_le(), Ok(0xFFFE));
        assert_eq!(cursor.read_fixed_string(2).as_deref(), Ok("AB"));
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn out_of_bounds_read_keeps_position() {
        let data = [0u8; 6];
        let mut cursor = ByteCursor::new(&data);
        cursor.read_i32_le().unwrap();
        assert_eq!(
            cursor.read_i32_le(),
            Err(CursorError::OutOfBounds {
                position: 4,
                requested: 4,
                length: 6
            })
        );
        assert_eq!(cursor.position(), 4);
        assert_eq!(cursor.read_u16_le(), Ok(0));
    }

    #[test]
    fn fixed_string_is_single_byte() {
        let data = [0xE9, b'x'];
        let mut cursor = ByteCursor::new(&data);
        assert_eq!(cursor.read_fixed_string(2).unwrap(), "\u{e9}x");
    }

    #[test]
    fn seek_bounds() {
        let data = [0u8; 8];
        let mut cursor = ByteCursor::new(&data);
        assert_eq!(cursor.seek(8, false), Ok(8));
        assert_eq!(cursor.seek(-3, true), Ok(5));
        assert!(matches!(
            cursor.seek(4, true),
            Err(CursorError::InvalidSeek { target: 9, .. })
        ));
        assert!(cursor.seek(-1, false).is_err());
        assert_eq!(cursor.position(), 5);
    }

    #[test]
    fn writer_pads_and_patches() {
        let mut w = ByteWriter::new();
        w.write_tag(Tag(*b"NAME"));
        w.write_u32_le(0);
        w.write_bytes(b"abc");
        w.pad_to(4);
        assert_eq!(w.len(), 12);
        w.patch_u32_le(4, 0xAABBCCDD).unwrap();
        assert!(w.patch_u32_le(10, 1).is_err());
        assert_eq!(
            w.patch_u32_le(usize::MAX - 1, 1),
            Err(CursorError::OutOfBounds {
                position: usize::MAX - 1,
                requested: 4,
                length: 12
            })
        );

        let out = w.into_inner();
        assert_eq!(&out[4..8], &[0xDD, 0xCC, 0xBB, 0xAA]);
        assert_eq!(&out[8..12], b"abc\0");
    }

    #[test]
    fn tag_display_escapes_control_bytes() {
        assert_eq!(Tag(*b"IL\0F").to_string(), "IL\\x00F");
        assert_eq!(Tag(*b"AB  ").to_string(), "AB  ");
        assert_eq!(format!("{:?}", Tag(*b"BODY")), "Tag(\"BODY\")");
    }

    #[test]
    fn align4_rounds_up() {
        assert_eq!(align4(0), 0);
        assert_eq!(align4(1), 4);
        assert_eq!(align4(4), 4);
        assert_eq!(align4(13), 16);
    }
}
