//! Bounds-checked scalar reads honouring the session's byte order.

use crate::error::{MergeError, MergeResult};
use crate::Endianness;

/// Read-only view over a named blob.
#[derive(Debug, Clone, Copy)]
pub struct ByteView<'a> {
    name: &'a str,
    bytes: &'a [u8],
    endianness: Endianness,
}

impl<'a> ByteView<'a> {
    pub fn new(name: &'a str, bytes: &'a [u8], endianness: Endianness) -> Self {
        Self {
            name,
            bytes,
            endianness,
        }
    }

    pub fn name(&self) -> &'a str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// Borrow `len` bytes at `offset`, or fail with [`MergeError::MalformedBinary`].
    pub fn slice(&self, offset: usize, len: usize) -> MergeResult<&'a [u8]> {
        offset
            .checked_add(len)
            .and_then(|end| self.bytes.get(offset..end))
            .ok_or_else(|| {
                MergeError::malformed(
                    self.name,
                    format!(
                        "range {offset}..{} outside {} bytes",
                        offset.saturating_add(len),
                        self.bytes.len()
                    ),
                )
            })
    }

    pub fn read_u32(&self, offset: usize) -> MergeResult<u32> {
        let b = self.slice(offset, 4)?;
        Ok(decode_u32([b[0], b[1], b[2], b[3]], self.endianness))
    }

    pub fn read_f32(&self, offset: usize) -> MergeResult<f32> {
        self.read_u32(offset).map(f32::from_bits)
    }
}

pub fn decode_u32(b: [u8; 4], endianness: Endianness) -> u32 {
    match endianness {
        Endianness::Little => u32::from_le_bytes(b),
        Endianness::Big => u32::from_be_bytes(b),
    }
}

pub fn decode_u16(b: [u8; 2], endianness: Endianness) -> u16 {
    match endianness {
        Endianness::Little => u16::from_le_bytes(b),
        Endianness::Big => u16::from_be_bytes(b),
    }
}

pub fn encode_u32(v: u32, endianness: Endianness) -> [u8; 4] {
    match endianness {
        Endianness::Little => v.to_le_bytes(),
        Endianness::Big => v.to_be_bytes(),
    }
}

pub fn encode_u16(v: u16, endianness: Endianness) -> [u8; 2] {
    match endianness {
        Endianness::Little => v.to_le_bytes(),
        Endianness::Big => v.to_be_bytes(),
    }
}
