//! Little-endian primitives and length-prefixed framing.

use super::CodecError;

#[derive(Default)]
pub(super) struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub(super) fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub(super) fn u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub(super) fn bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    pub(super) fn u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub(super) fn i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub(super) fn u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub(super) fn i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub(super) fn f64(&mut self, value: f64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub(super) fn bytes(&mut self, value: &[u8]) {
        self.buf.extend_from_slice(value);
    }

    pub(super) fn count(&mut self, len: usize) {
        self.u32(len as u32);
    }

    /// Writes `body` prefixed by its own `u32` byte length.
    pub(super) fn record(&mut self, body: impl FnOnce(&mut Writer)) {
        let start = self.buf.len();
        self.u32(0);
        body(self);
        let len = (self.buf.len() - start - 4) as u32;
        self.buf[start..start + 4].copy_from_slice(&len.to_le_bytes());
    }
}

pub(super) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    /// Absolute offset of `buf[0]` in the whole input, for error reporting.
    base: usize,
}

impl<'a> Reader<'a> {
    pub(super) fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0, base: 0 }
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], CodecError> {
        let available = self.buf.len() - self.pos;
        if needed > available {
            return Err(CodecError::Truncated {
                offset: self.base + self.pos,
                needed,
                available,
            });
        }
        let slice = &self.buf[self.pos..self.pos + needed];
        self.pos += needed;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut raw = [0u8; N];
        raw.copy_from_slice(self.take(N)?);
        Ok(raw)
    }

    pub(super) fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub(super) fn bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.u8()? != 0)
    }

    pub(super) fn u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub(super) fn i32(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    pub(super) fn u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub(super) fn i64(&mut self) -> Result<i64, CodecError> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    pub(super) fn f64(&mut self) -> Result<f64, CodecError> {
        Ok(f64::from_le_bytes(self.array()?))
    }

    pub(super) fn bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        self.take(len)
    }

    /// Reads a count that prefixes `width`-byte items, rejecting counts the input cannot hold.
    pub(super) fn count(&mut self, width: usize) -> Result<usize, CodecError> {
        let count = self.u32()? as usize;
        let available = self.buf.len() - self.pos;
        if count.saturating_mul(width) > available {
            return Err(CodecError::Truncated {
                offset: self.base + self.pos,
                needed: count.saturating_mul(width),
                available,
            });
        }
        Ok(count)
    }

    /// Splits off the next length-prefixed record. Unread bytes at the end of the record are
    /// skipped when the caller moves on.
    pub(super) fn record(&mut self) -> Result<Reader<'a>, CodecError> {
        let len = self.u32()? as usize;
        let base = self.base + self.pos;
        let body = self.take(len)?;
        Ok(Reader {
            buf: body,
            pos: 0,
            base,
        })
    }

    /// Splits off exactly `len` bytes as a nested reader.
    pub(super) fn block(&mut self, len: usize) -> Result<Reader<'a>, CodecError> {
        let base = self.base + self.pos;
        let body = self.take(len)?;
        Ok(Reader {
            buf: body,
            pos: 0,
            base,
        })
    }

    pub(super) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}
