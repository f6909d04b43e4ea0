//! Vertex decompression and transform baking.
//!
//! Output vertices are always little-endian. With compressed normals the
//! output drops the 4-byte normal word and stores the three snorm8 normal
//! components in byte 0 of the position's x, y and z floats; every channel
//! after the normal moves 4 bytes forward.

use glam::Vec3;

use super::transform::NodeTransform;
use crate::scene::bytes::{decode_u16, decode_u32};
use crate::scene::{Attribute, AttributeLayout, AttributeSemantic, ComponentType};
use crate::Endianness;

const SNORM8: f32 = 127.0;
const SNORM16: f32 = 32767.0;

/// Decodes interleaved vertices of one attribute layout.
#[derive(Debug, Clone)]
pub struct VertexDecoder<'a> {
    layout: &'a AttributeLayout,
    endianness: Endianness,
    compressed: bool,
    in_stride: usize,
    out_stride: usize,
}

impl<'a> VertexDecoder<'a> {
    pub fn new(layout: &'a AttributeLayout, endianness: Endianness, compressed_normals: bool) -> Self {
        Self {
            layout,
            endianness,
            compressed: layout.is_compressed(compressed_normals),
            in_stride: layout.stride() as usize,
            out_stride: layout.output_stride(compressed_normals) as usize,
        }
    }

    pub fn input_stride(&self) -> usize {
        self.in_stride
    }

    pub fn output_stride(&self) -> usize {
        self.out_stride
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Bytes needed to hold `vertex_count` decoded vertices.
    pub fn output_len(&self, vertex_count: usize) -> usize {
        vertex_count * self.out_stride
    }

    /// Decode every whole vertex of `src` into `dst`, applying `transform`.
    ///
    /// `dst` must hold exactly `output_len(src.len() / input_stride())` bytes.
    pub fn decode(&self, src: &[u8], dst: &mut [u8], transform: &NodeTransform) {
        let count = src.len() / self.in_stride;
        debug_assert_eq!(dst.len(), self.output_len(count));

        if transform.is_identity() && !self.compressed && self.endianness == Endianness::Little {
            dst.copy_from_slice(&src[..count * self.in_stride]);
            return;
        }

        for (s, d) in src
            .chunks_exact(self.in_stride)
            .zip(dst.chunks_exact_mut(self.out_stride))
        {
            self.decode_vertex(s, d, transform);
        }
    }

    fn decode_vertex(&self, s: &[u8], d: &mut [u8], transform: &NodeTransform) {
        let position = Vec3::new(
            self.read_f32(s, 0),
            self.read_f32(s, 4),
            self.read_f32(s, 8),
        );
        let position = transform.transform_point(position);
        for (i, v) in position.to_array().iter().enumerate() {
            d[i * 4..i * 4 + 4].copy_from_slice(&v.to_le_bytes());
        }

        for attribute in &self.layout.attributes {
            match attribute.semantic {
                AttributeSemantic::Position => {}
                AttributeSemantic::Normal => self.decode_normal(attribute, s, d, transform),
                AttributeSemantic::TexCoord | AttributeSemantic::Color => {
                    let offset = attribute.offset as usize;
                    let out = if self.compressed { offset - 4 } else { offset };
                    let size = attribute.size() as usize;
                    copy_components(
                        &s[offset..offset + size],
                        &mut d[out..out + size],
                        attribute.component.size() as usize,
                        self.endianness,
                    );
                }
            }
        }
    }

    fn decode_normal(&self, attribute: &Attribute, s: &[u8], d: &mut [u8], transform: &NodeTransform) {
        let offset = attribute.offset as usize;

        if self.compressed {
            let bytes = if transform.preserves_normals() {
                [s[offset], s[offset + 1], s[offset + 2]]
            } else {
                let n = transform.transform_normal(self.read_normal(attribute, s));
                n.to_array().map(|c| snorm8(c) as u8)
            };
            // low byte of each little-endian position float
            d[0] = bytes[0];
            d[4] = bytes[1];
            d[8] = bytes[2];
            return;
        }

        let size = attribute.size() as usize;
        let component = attribute.component.size() as usize;
        if transform.preserves_normals() {
            copy_components(
                &s[offset..offset + size],
                &mut d[offset..offset + size],
                component,
                self.endianness,
            );
            return;
        }

        let n = transform.transform_normal(self.read_normal(attribute, s));
        let out = &mut d[offset..offset + size];
        match attribute.component {
            ComponentType::F32 => {
                for (i, v) in n.to_array().iter().enumerate() {
                    out[i * 4..i * 4 + 4].copy_from_slice(&v.to_le_bytes());
                }
            }
            ComponentType::I16 => {
                for (i, v) in n.to_array().iter().enumerate() {
                    out[i * 2..i * 2 + 2].copy_from_slice(&snorm16(*v).to_le_bytes());
                }
                copy_components(&s[offset + 6..offset + 8], &mut out[6..8], 2, self.endianness);
            }
            _ => {
                for (i, v) in n.to_array().iter().enumerate() {
                    out[i] = snorm8(*v) as u8;
                }
                out[3] = s[offset + 3];
            }
        }
    }

    fn read_normal(&self, attribute: &Attribute, s: &[u8]) -> Vec3 {
        let offset = attribute.offset as usize;
        match attribute.component {
            ComponentType::F32 => Vec3::new(
                self.read_f32(s, offset),
                self.read_f32(s, offset + 4),
                self.read_f32(s, offset + 8),
            ),
            ComponentType::I16 => {
                let c = |i: usize| {
                    decode_u16([s[offset + i * 2], s[offset + i * 2 + 1]], self.endianness) as i16
                        as f32
                        / SNORM16
                };
                Vec3::new(c(0), c(1), c(2))
            }
            _ => Vec3::new(
                s[offset] as i8 as f32 / SNORM8,
                s[offset + 1] as i8 as f32 / SNORM8,
                s[offset + 2] as i8 as f32 / SNORM8,
            ),
        }
    }

    fn read_f32(&self, s: &[u8], offset: usize) -> f32 {
        f32::from_bits(decode_u32(
            [s[offset], s[offset + 1], s[offset + 2], s[offset + 3]],
            self.endianness,
        ))
    }
}

fn snorm8(v: f32) -> i8 {
    (v * SNORM8).round().clamp(-SNORM8, SNORM8) as i8
}

fn snorm16(v: f32) -> i16 {
    (v * SNORM16).round().clamp(-SNORM16, SNORM16) as i16
}

/// Copy components of `size` bytes, converting to little-endian.
pub(crate) fn copy_components(src: &[u8], dst: &mut [u8], size: usize, endianness: Endianness) {
    if size <= 1 || endianness == Endianness::Little {
        dst.copy_from_slice(src);
        return;
    }
    for (s, d) in src.chunks_exact(size).zip(dst.chunks_exact_mut(size)) {
        for (i, b) in s.iter().rev().enumerate() {
            d[i] = *b;
        }
    }
}
