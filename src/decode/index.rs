//! Index stream decoding, remapping and re-widening.

use crate::error::{MergeError, MergeResult};
use crate::scene::bytes::{decode_u16, decode_u32};
use crate::scene::IndexWidth;
use crate::Endianness;

/// Decode an encoded index stream into `out`, replacing its contents.
pub fn read_indices(src: &[u8], width: IndexWidth, endianness: Endianness, out: &mut Vec<u32>) {
    out.clear();
    match width {
        IndexWidth::U8 => out.extend(src.iter().map(|&b| b as u32)),
        IndexWidth::U16 => out.extend(
            src.chunks_exact(2)
                .map(|c| decode_u16([c[0], c[1]], endianness) as u32),
        ),
        IndexWidth::U32 => out.extend(
            src.chunks_exact(4)
                .map(|c| decode_u32([c[0], c[1], c[2], c[3]], endianness)),
        ),
    }
}

/// Offset `indices` by `base` and encode them little-endian at `target`
/// width into `out`, replacing its contents.
///
/// Fails with [`MergeError::DecodeMismatch`] when an index points past the
/// node's own `vertex_count` or the remapped value does not fit `target`.
/// `out` is left unspecified on failure; callers write it to an arena only
/// on success.
pub fn remap_indices(
    node: u32,
    indices: &[u32],
    base: u64,
    vertex_count: u32,
    target: IndexWidth,
    out: &mut Vec<u8>,
) -> MergeResult<()> {
    out.clear();
    out.reserve(indices.len() * target.bytes() as usize);

    for &index in indices {
        let value = base + index as u64;
        if index >= vertex_count || !target.fits(value) {
            return Err(MergeError::DecodeMismatch {
                node,
                value,
                width: target.bytes() as u8,
            });
        }
        match target {
            IndexWidth::U8 => out.push(value as u8),
            IndexWidth::U16 => out.extend_from_slice(&(value as u16).to_le_bytes()),
            IndexWidth::U32 => out.extend_from_slice(&(value as u32).to_le_bytes()),
        }
    }
    Ok(())
}
