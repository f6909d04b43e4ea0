//! Append-only byte arena with a precomputed capacity.

use crate::error::{MergeError, MergeResult};

use super::descriptor::ByteRange;

/// Alignment between blocks.
pub const BLOCK_ALIGN: usize = 4;

/// Bytes drained from an arena since the previous drain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArenaBlock {
    /// Absolute offset of `bytes[0]` in the arena.
    pub base: u64,
    pub bytes: Vec<u8>,
}

impl ArenaBlock {
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// One growing buffer per physical file.
///
/// Offsets are absolute from the start of the arena. Drained bytes are
/// released, so only the undrained tail lives in memory.
#[derive(Debug)]
pub struct PackedArena {
    name: String,
    capacity: usize,
    /// Absolute offset of `pending[0]`.
    base: usize,
    pending: Vec<u8>,
}

impl PackedArena {
    pub fn with_capacity(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity,
            base: 0,
            pending: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Absolute write cursor.
    pub fn cursor(&self) -> usize {
        self.base + self.pending.len()
    }

    fn check(&self, len: usize) -> MergeResult<()> {
        if self.cursor() + len > self.capacity {
            return Err(MergeError::ArenaOverflow {
                file: self.name.clone(),
                cursor: self.cursor(),
                requested: len,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    pub fn append(&mut self, bytes: &[u8]) -> MergeResult<ByteRange> {
        self.check(bytes.len())?;
        let offset = self.cursor();
        self.pending.extend_from_slice(bytes);
        Ok(ByteRange::new(offset as u64, bytes.len() as u64))
    }

    pub fn append_zeros(&mut self, len: usize) -> MergeResult<ByteRange> {
        self.check(len)?;
        let offset = self.cursor();
        self.pending.resize(self.pending.len() + len, 0);
        Ok(ByteRange::new(offset as u64, len as u64))
    }

    /// Reserve `len` zeroed bytes and hand them out for in-place writes.
    pub fn reserve(&mut self, len: usize) -> MergeResult<(ByteRange, &mut [u8])> {
        let range = self.append_zeros(len)?;
        let start = self.pending.len() - len;
        Ok((range, &mut self.pending[start..]))
    }

    /// Drop bytes written after `cursor`, which must not precede the last drain.
    pub fn truncate(&mut self, cursor: usize) {
        if cursor >= self.base {
            self.pending.truncate(cursor - self.base);
        }
    }

    /// Pad with zeros up to the next multiple of [`BLOCK_ALIGN`].
    pub fn align(&mut self) -> MergeResult<()> {
        let pad = (BLOCK_ALIGN - self.cursor() % BLOCK_ALIGN) % BLOCK_ALIGN;
        if pad > 0 {
            self.append_zeros(pad)?;
        }
        Ok(())
    }

    /// Take everything written since the previous drain.
    pub fn drain_block(&mut self) -> ArenaBlock {
        let bytes = std::mem::take(&mut self.pending);
        let block = ArenaBlock {
            base: self.base as u64,
            bytes,
        };
        self.base += block.bytes.len();
        block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_align() {
        let mut arena = PackedArena::with_capacity("mesh0.bin", 16);
        let r = arena.append(&[1, 2, 3]).unwrap();
        assert_eq!(r, ByteRange::new(0, 3));
        arena.align().unwrap();
        assert_eq!(arena.cursor(), 4);
        let r = arena.append(&[9; 4]).unwrap();
        assert_eq!(r.offset, 4);
        arena.align().unwrap();
        assert_eq!(arena.cursor(), 8);
    }

    #[test]
    fn test_overflow() {
        let mut arena = PackedArena::with_capacity("mesh0.bin", 4);
        arena.append(&[0; 3]).unwrap();
        let err = arena.append(&[0; 2]).unwrap_err();
        assert!(matches!(
            err,
            MergeError::ArenaOverflow {
                cursor: 3,
                requested: 2,
                capacity: 4,
                ..
            }
        ));
    }

    #[test]
    fn test_drain_blocks_are_contiguous() {
        let mut arena = PackedArena::with_capacity("mesh0.bin", 64);
        arena.append(&[1; 8]).unwrap();
        let first = arena.drain_block();
        let (range, slot) = arena.reserve(4).unwrap();
        slot.copy_from_slice(&[7; 4]);
        let second = arena.drain_block();

        assert_eq!(first.base, 0);
        assert_eq!(first.bytes.len(), 8);
        assert_eq!(second.base, 8);
        assert_eq!(second.bytes, vec![7; 4]);
        assert_eq!(range.offset, 8);
        assert!(arena.drain_block().is_empty());
    }

    #[test]
    fn test_truncate_rolls_back() {
        let mut arena = PackedArena::with_capacity("mesh0.bin", 64);
        arena.append(&[1; 8]).unwrap();
        let mark = arena.cursor();
        arena.append(&[2; 8]).unwrap();
        arena.truncate(mark);
        assert_eq!(arena.cursor(), 8);
    }
}
