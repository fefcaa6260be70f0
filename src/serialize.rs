//! Deterministic wire codec.
//!
//! Every persistent record and every hashed structure in Caligo is encoded
//! through this module: integers as unsigned LEB128 varints, byte arrays
//! length-prefixed, variant tags as a single byte. The encoding has exactly
//! one representation per value, so `hash(serialize(x))` is stable.

use thiserror::Error;

/// Errors from reading the wire format.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("input truncated: needed {needed} more bytes")]
    Truncated { needed: usize },
    #[error("varint exceeds 64 bits")]
    VarintOverflow,
    #[error("declared length {got} exceeds limit {max}")]
    LengthOutOfRange { got: usize, max: usize },
}

/// Append-only buffer for the canonical encoding.
#[derive(Default)]
pub struct BufferWriter {
    buf: Vec<u8>,
}

impl BufferWriter {
    pub fn new() -> Self {
        BufferWriter { buf: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        BufferWriter {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn write_byte(&mut self, b: u8) {
        self.buf.push(b);
    }

    /// Write raw bytes with no length prefix (fixed-size fields).
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Write a uvarint length prefix followed by the bytes.
    pub fn write_var_bytes(&mut self, bytes: &[u8]) {
        self.write_uvarint(bytes.len() as u64);
        self.buf.extend_from_slice(bytes);
    }

    /// Unsigned LEB128.
    pub fn write_uvarint(&mut self, mut value: u64) {
        loop {
            let mut byte = (value & 0x7f) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            self.buf.push(byte);
            if value == 0 {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over a canonical encoding.
pub struct BufferReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BufferReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        BufferReader { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_byte(&mut self) -> Result<u8, CodecError> {
        let bytes = self.read_bytes(1)?;
        Ok(bytes[0])
    }

    /// Read exactly `n` bytes.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::Truncated {
                needed: n - self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Read a fixed-size array.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let slice = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    /// Read a uvarint length prefix, bounded by `max`, then that many bytes.
    pub fn read_var_bytes(&mut self, max: usize) -> Result<&'a [u8], CodecError> {
        let len = self.read_uvarint()? as usize;
        if len > max {
            return Err(CodecError::LengthOutOfRange { got: len, max });
        }
        self.read_bytes(len)
    }

    /// Unsigned LEB128, at most 10 bytes.
    pub fn read_uvarint(&mut self) -> Result<u64, CodecError> {
        let mut value: u64 = 0;
        let mut shift: u32 = 0;
        loop {
            let byte = self.read_byte()?;
            if shift == 63 && byte > 1 {
                return Err(CodecError::VarintOverflow);
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift > 63 {
                return Err(CodecError::VarintOverflow);
            }
        }
    }
}

/// Types with a canonical wire encoding.
pub trait Serializable: Sized {
    fn write_to(&self, w: &mut BufferWriter);
    fn read_from(r: &mut BufferReader<'_>) -> Result<Self, CodecError>;

    fn to_bytes(&self) -> Vec<u8> {
        let mut w = BufferWriter::new();
        self.write_to(&mut w);
        w.into_bytes()
    }

    /// Decode from a buffer that must be fully consumed.
    fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = BufferReader::new(bytes);
        let value = Self::read_from(&mut r)?;
        if !r.is_empty() {
            return Err(CodecError::LengthOutOfRange {
                got: bytes.len(),
                max: bytes.len() - r.remaining(),
            });
        }
        Ok(value)
    }
}
