//! Primitive field encoding shared by every message body
//!
//! All integers are little-endian. Strings are a signed 32-bit count of
//! UTF-16 code units followed by the units themselves; a negative count
//! stands for an absent (null) string.

use bytes::{Buf, BufMut, BytesMut};

use super::CodecError;

/// Length prefix written for a null string
pub const NULL_STRING_LEN: i32 = -1;

/// Append a signed 32-bit integer
pub fn put_i32(buf: &mut BytesMut, value: i32) {
    buf.put_i32_le(value);
}

/// Append a string field. `None` is written as a null string.
pub fn put_string(buf: &mut BytesMut, value: Option<&str>) {
    match value {
        None => buf.put_i32_le(NULL_STRING_LEN),
        Some(s) => {
            let units: Vec<u16> = s.encode_utf16().collect();
            buf.put_i32_le(units.len() as i32);
            buf.reserve(units.len() * 2);
            for unit in units {
                buf.put_u16_le(unit);
            }
        }
    }
}

/// Cursor over a message body that never reads past the end.
///
/// Every accessor fails with [`CodecError::TruncatedPayload`] instead of
/// panicking when the body is shorter than the field being read.
#[derive(Debug)]
pub struct BodyReader<'a> {
    buf: &'a [u8],
}

impl<'a> BodyReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn require(&self, needed: usize) -> Result<(), CodecError> {
        if self.buf.remaining() < needed {
            return Err(CodecError::TruncatedPayload {
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        self.require(4)?;
        Ok(self.buf.get_i32_le())
    }

    /// Read a string field; a negative length yields `None`.
    pub fn read_string(&mut self) -> Result<Option<String>, CodecError> {
        let count = self.read_i32()?;
        if count < 0 {
            return Ok(None);
        }

        let count = count as usize;
        self.require(count.saturating_mul(2))?;

        let units: Vec<u16> = (0..count).map(|_| self.buf.get_u16_le()).collect();
        String::from_utf16(&units)
            .map(Some)
            .map_err(|_| CodecError::InvalidString)
    }
}
