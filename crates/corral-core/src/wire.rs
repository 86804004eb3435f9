//! Typed byte-buffer packing for wire images.
//!
//! Everything the credential subsystem puts on the wire goes through
//! [`PackBuf`] / [`UnpackBuf`]: big-endian integers, length-prefixed
//! strings and arrays, raw byte runs. Decoding validates every length
//! against the remaining input and a hard cap BEFORE allocating, so a
//! hostile length prefix cannot drive memory exhaustion.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Sentinel length marking an absent string.
const NO_VAL: u32 = u32::MAX;

/// Hard cap on a single string or byte-run payload (16 MiB).
pub const MAX_STR_LEN: usize = 16 * 1024 * 1024;

/// Hard cap on a single array's element count.
pub const MAX_ARRAY_LEN: usize = 1 << 20;

/// Errors raised while decoding a wire image.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// The input ended before a field did.
    #[error("truncated input: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Bytes the field required.
        needed: usize,
        /// Bytes left in the input.
        remaining: usize,
    },

    /// A length prefix past the allowed cap.
    #[error("length {len} exceeds limit {max}")]
    LengthOutOfBounds {
        /// Declared length.
        len: usize,
        /// Applicable cap.
        max: usize,
    },

    /// A string field that is not valid UTF-8.
    #[error("string field is not valid UTF-8")]
    BadUtf8,

    /// Input left over after a complete decode.
    #[error("{remaining} trailing bytes after decode")]
    TrailingBytes {
        /// Bytes left unconsumed.
        remaining: usize,
    },
}

/// Growable output buffer with typed big-endian writers.
#[derive(Debug, Default)]
pub struct PackBuf {
    buf: BytesMut,
}

impl PackBuf {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a buffer with `capacity` bytes pre-reserved.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Bytes written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` when nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// View of the bytes written so far.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Freezes the buffer into an immutable byte image.
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }

    /// Writes a `u16`.
    pub fn pack_u16(&mut self, v: u16) {
        self.buf.put_u16(v);
    }

    /// Writes a `u32`.
    pub fn pack_u32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    /// Writes a `u64`.
    pub fn pack_u64(&mut self, v: u64) {
        self.buf.put_u64(v);
    }

    /// Writes a unix timestamp (seconds).
    pub fn pack_time(&mut self, v: u64) {
        self.buf.put_u64(v);
    }

    /// Writes a boolean as one byte.
    pub fn pack_bool(&mut self, v: bool) {
        self.buf.put_u8(u8::from(v));
    }

    /// Writes an optional string: `u32` length then bytes, or the absent
    /// sentinel for `None`.
    pub fn pack_str(&mut self, v: Option<&str>) {
        match v {
            None => self.buf.put_u32(NO_VAL),
            Some(s) => {
                debug_assert!(s.len() < NO_VAL as usize);
                self.buf.put_u32(s.len() as u32);
                self.buf.put_slice(s.as_bytes());
            }
        }
    }

    /// Writes a byte run: `u32` length then bytes.
    pub fn pack_bytes(&mut self, v: &[u8]) {
        debug_assert!(v.len() < NO_VAL as usize);
        self.buf.put_u32(v.len() as u32);
        self.buf.put_slice(v);
    }

    /// Writes a `u16` array: `u32` count then elements.
    pub fn pack_u16_array(&mut self, v: &[u16]) {
        self.buf.put_u32(v.len() as u32);
        for e in v {
            self.buf.put_u16(*e);
        }
    }

    /// Writes a `u32` array: `u32` count then elements.
    pub fn pack_u32_array(&mut self, v: &[u32]) {
        self.buf.put_u32(v.len() as u32);
        for e in v {
            self.buf.put_u32(*e);
        }
    }

    /// Writes a `u64` array: `u32` count then elements.
    pub fn pack_u64_array(&mut self, v: &[u64]) {
        self.buf.put_u32(v.len() as u32);
        for e in v {
            self.buf.put_u64(*e);
        }
    }
}

/// Bounds-checked reader over a wire image.
#[derive(Debug)]
pub struct UnpackBuf<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> UnpackBuf<'a> {
    /// Wraps `data` for decoding.
    #[must_use]
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Bytes consumed so far.
    #[must_use]
    pub const fn consumed(&self) -> usize {
        self.pos
    }

    /// The full underlying input, independent of position.
    #[must_use]
    pub const fn raw(&self) -> &'a [u8] {
        self.data
    }

    /// Fails with [`WireError::TrailingBytes`] unless fully consumed.
    pub fn finish(&self) -> Result<(), WireError> {
        if self.remaining() != 0 {
            return Err(WireError::TrailingBytes {
                remaining: self.remaining(),
            });
        }
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::Truncated {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Reads a `u16`.
    pub fn unpack_u16(&mut self) -> Result<u16, WireError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    /// Reads a `u32`.
    pub fn unpack_u32(&mut self) -> Result<u32, WireError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a `u64`.
    pub fn unpack_u64(&mut self) -> Result<u64, WireError> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_be_bytes(raw))
    }

    /// Reads a unix timestamp (seconds).
    pub fn unpack_time(&mut self) -> Result<u64, WireError> {
        self.unpack_u64()
    }

    /// Reads a boolean byte; any nonzero value is `true`.
    pub fn unpack_bool(&mut self) -> Result<bool, WireError> {
        Ok(self.take(1)?[0] != 0)
    }

    /// Reads an optional string written by [`PackBuf::pack_str`].
    pub fn unpack_str(&mut self) -> Result<Option<String>, WireError> {
        let len = self.unpack_u32()?;
        if len == NO_VAL {
            return Ok(None);
        }
        let len = len as usize;
        if len > MAX_STR_LEN {
            return Err(WireError::LengthOutOfBounds {
                len,
                max: MAX_STR_LEN,
            });
        }
        let bytes = self.take(len)?;
        let s = std::str::from_utf8(bytes).map_err(|_| WireError::BadUtf8)?;
        Ok(Some(s.to_string()))
    }

    /// Reads a byte run written by [`PackBuf::pack_bytes`].
    pub fn unpack_bytes(&mut self) -> Result<Vec<u8>, WireError> {
        let len = self.unpack_u32()? as usize;
        if len > MAX_STR_LEN {
            return Err(WireError::LengthOutOfBounds {
                len,
                max: MAX_STR_LEN,
            });
        }
        Ok(self.take(len)?.to_vec())
    }

    /// Reads a `u16` array.
    pub fn unpack_u16_array(&mut self) -> Result<Vec<u16>, WireError> {
        let count = self.checked_count(2)?;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.unpack_u16()?);
        }
        Ok(out)
    }

    /// Reads a `u32` array.
    pub fn unpack_u32_array(&mut self) -> Result<Vec<u32>, WireError> {
        let count = self.checked_count(4)?;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.unpack_u32()?);
        }
        Ok(out)
    }

    /// Reads a `u64` array.
    pub fn unpack_u64_array(&mut self) -> Result<Vec<u64>, WireError> {
        let count = self.checked_count(8)?;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.unpack_u64()?);
        }
        Ok(out)
    }

    /// Validates an element count against the cap AND the bytes actually
    /// present, so `Vec::with_capacity` is safe to call.
    fn checked_count(&mut self, elem_size: usize) -> Result<usize, WireError> {
        let count = self.unpack_u32()? as usize;
        if count > MAX_ARRAY_LEN {
            return Err(WireError::LengthOutOfBounds {
                len: count,
                max: MAX_ARRAY_LEN,
            });
        }
        let needed = count * elem_size;
        if self.remaining() < needed {
            return Err(WireError::Truncated {
                needed,
                remaining: self.remaining(),
            });
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_round_trip() {
        let mut pb = PackBuf::new();
        pb.pack_u16(0xBEEF);
        pb.pack_u32(7);
        pb.pack_u64(u64::MAX);
        pb.pack_time(1_700_000_000);
        pb.pack_bool(true);

        let bytes = pb.into_bytes();
        let mut ub = UnpackBuf::new(&bytes);
        assert_eq!(ub.unpack_u16().unwrap(), 0xBEEF);
        assert_eq!(ub.unpack_u32().unwrap(), 7);
        assert_eq!(ub.unpack_u64().unwrap(), u64::MAX);
        assert_eq!(ub.unpack_time().unwrap(), 1_700_000_000);
        assert!(ub.unpack_bool().unwrap());
        ub.finish().unwrap();
    }

    #[test]
    fn test_str_round_trip() {
        let mut pb = PackBuf::new();
        pb.pack_str(Some("n[1-2]"));
        pb.pack_str(None);
        pb.pack_str(Some(""));

        let bytes = pb.into_bytes();
        let mut ub = UnpackBuf::new(&bytes);
        assert_eq!(ub.unpack_str().unwrap().as_deref(), Some("n[1-2]"));
        assert_eq!(ub.unpack_str().unwrap(), None);
        assert_eq!(ub.unpack_str().unwrap().as_deref(), Some(""));
    }

    #[test]
    fn test_array_round_trip() {
        let mut pb = PackBuf::new();
        pb.pack_u16_array(&[1, 2]);
        pb.pack_u32_array(&[]);
        pb.pack_u64_array(&[1024, 2048]);

        let bytes = pb.into_bytes();
        let mut ub = UnpackBuf::new(&bytes);
        assert_eq!(ub.unpack_u16_array().unwrap(), vec![1, 2]);
        assert_eq!(ub.unpack_u32_array().unwrap(), Vec::<u32>::new());
        assert_eq!(ub.unpack_u64_array().unwrap(), vec![1024, 2048]);
    }

    #[test]
    fn test_truncated_scalar() {
        let mut ub = UnpackBuf::new(&[0u8; 3]);
        assert!(matches!(
            ub.unpack_u32(),
            Err(WireError::Truncated {
                needed: 4,
                remaining: 3
            })
        ));
    }

    #[test]
    fn test_hostile_string_length_rejected_before_allocation() {
        // Length prefix claims 2^31 bytes with a 4-byte payload.
        let mut pb = PackBuf::new();
        pb.pack_u32(0x8000_0000);
        pb.pack_u32(0);
        let bytes = pb.into_bytes();

        let mut ub = UnpackBuf::new(&bytes);
        assert!(matches!(
            ub.unpack_str(),
            Err(WireError::LengthOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_hostile_array_count_rejected() {
        let mut pb = PackBuf::new();
        pb.pack_u32(u32::MAX - 1);
        let bytes = pb.into_bytes();

        let mut ub = UnpackBuf::new(&bytes);
        assert!(matches!(
            ub.unpack_u64_array(),
            Err(WireError::LengthOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_array_count_beyond_input_rejected() {
        // Count within the cap, but the input cannot hold the elements.
        let mut pb = PackBuf::new();
        pb.pack_u32(1000);
        pb.pack_u32(0);
        let bytes = pb.into_bytes();

        let mut ub = UnpackBuf::new(&bytes);
        assert!(matches!(
            ub.unpack_u32_array(),
            Err(WireError::Truncated { .. })
        ));
    }

    #[test]
    fn test_bad_utf8() {
        let mut pb = PackBuf::new();
        pb.pack_u32(2);
        let mut raw = pb.into_bytes().to_vec();
        raw.extend_from_slice(&[0xFF, 0xFE]);

        let mut ub = UnpackBuf::new(&raw);
        assert_eq!(ub.unpack_str(), Err(WireError::BadUtf8));
    }

    #[test]
    fn test_trailing_bytes() {
        let mut pb = PackBuf::new();
        pb.pack_u16(1);
        pb.pack_u16(2);
        let bytes = pb.into_bytes();

        let mut ub = UnpackBuf::new(&bytes);
        ub.unpack_u16().unwrap();
        assert_eq!(ub.finish(), Err(WireError::TrailingBytes { remaining: 2 }));
    }
}
