//! Interleaved vertex layouts described by the scene's attribute table.
//!
//! Every mesh references one attribute layout by id. Layouts are always a
//! single interleaved stream:
//!
//! | channel  | format                                   | present when        |
//! |----------|------------------------------------------|---------------------|
//! | position | float3                                   | always, offset 0    |
//! | normal   | snorm8x4, snorm16x4 or float3            | normal type >= 0    |
//! | uv       | 2 components of the uv type              | uv type >= 0        |
//! | color    | 4 components of the color type           | color type >= 0     |
//!
//! A layout with an 8-bit normal can be *compressed*: the normal word is
//! dropped and its three bytes overwrite the least significant byte of the
//! position's x, y and z floats. The compressed stride is 4 bytes shorter.
//!
//! # Example
//!
//! ```ignore
//! // triangles, int8 normal, float uv, no color
//! let layout = AttributeLayout::from_descriptor(0, [4, 0, 7, -1, 0, 0, 0, 0])?;
//! assert_eq!(layout.stride(), 24);
//! assert_eq!(layout.output_stride(true), 20);
//! ```

use crate::error::{MergeError, MergeResult};

/// Primitive topology of a layout's meshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Points,
    Lines,
    Triangles,
}

impl Primitive {
    /// Codes 1..=3 are all line variants.
    pub fn from_code(code: i8) -> Option<Self> {
        match code {
            0 => Some(Self::Points),
            1..=3 => Some(Self::Lines),
            4 => Some(Self::Triangles),
            _ => None,
        }
    }

    pub fn code(&self) -> i8 {
        match self {
            Self::Points => 0,
            Self::Lines => 1,
            Self::Triangles => 4,
        }
    }
}

/// Scalar component type of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
}

impl ComponentType {
    /// Decode a descriptor type code. Negative means the channel is absent;
    /// code 6 (half float) is not supported.
    pub fn from_code(code: i8) -> Option<Self> {
        match code {
            0 => Some(Self::I8),
            1 => Some(Self::U8),
            2 => Some(Self::I16),
            3 => Some(Self::U16),
            4 => Some(Self::I32),
            5 => Some(Self::U32),
            7 => Some(Self::F32),
            _ => None,
        }
    }

    pub fn code(&self) -> i8 {
        match self {
            Self::I8 => 0,
            Self::U8 => 1,
            Self::I16 => 2,
            Self::U16 => 3,
            Self::I32 => 4,
            Self::U32 => 5,
            Self::F32 => 7,
        }
    }

    /// Size in bytes of one component.
    pub fn size(&self) -> u32 {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
        }
    }
}

/// Semantic meaning of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeSemantic {
    Position,
    Normal,
    TexCoord,
    Color,
}

/// One channel of an interleaved vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Attribute {
    pub semantic: AttributeSemantic,
    pub component: ComponentType,
    pub components: u32,
    /// Byte offset within the vertex.
    pub offset: u32,
}

impl Attribute {
    pub fn size(&self) -> u32 {
        self.component.size() * self.components
    }
}

/// Interleaved layout of one attribute-table entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeLayout {
    /// Index in the attribute table.
    pub id: u8,
    pub primitive: Primitive,
    /// Channels in vertex order, position first.
    pub attributes: Vec<Attribute>,
    stride: u32,
}

impl AttributeLayout {
    /// Build the interleaved layout for the given optional channels.
    ///
    /// Non-float normals carry a fourth padding component so the channel
    /// stays 4-byte aligned.
    pub fn builtin(
        id: u8,
        primitive: Primitive,
        normal: Option<ComponentType>,
        uv: Option<ComponentType>,
        color: Option<ComponentType>,
    ) -> Self {
        let mut attributes = vec![Attribute {
            semantic: AttributeSemantic::Position,
            component: ComponentType::F32,
            components: 3,
            offset: 0,
        }];
        let mut offset = 12;

        if let Some(component) = normal {
            let components = if component == ComponentType::F32 { 3 } else { 4 };
            attributes.push(Attribute {
                semantic: AttributeSemantic::Normal,
                component,
                components,
                offset,
            });
            offset += component.size() * components;
        }
        if let Some(component) = uv {
            attributes.push(Attribute {
                semantic: AttributeSemantic::TexCoord,
                component,
                components: 2,
                offset,
            });
            offset += component.size() * 2;
        }
        if let Some(component) = color {
            attributes.push(Attribute {
                semantic: AttributeSemantic::Color,
                component,
                components: 4,
                offset,
            });
            offset += component.size() * 4;
        }

        Self {
            id,
            primitive,
            attributes,
            stride: offset,
        }
    }

    /// Parse one 8-byte descriptor: primitive, normal type, uv type, color
    /// type, four padding bytes.
    pub fn from_descriptor(id: u8, descriptor: [i8; 8]) -> MergeResult<Self> {
        let malformed =
            |reason: String| MergeError::malformed("attribute table", format!("layout {id}: {reason}"));

        let primitive = Primitive::from_code(descriptor[0])
            .ok_or_else(|| malformed(format!("unknown primitive {}", descriptor[0])))?;

        let channel = |code: i8, name: &str| -> MergeResult<Option<ComponentType>> {
            if code < 0 {
                return Ok(None);
            }
            ComponentType::from_code(code)
                .map(Some)
                .ok_or_else(|| malformed(format!("unsupported {name} type {code}")))
        };

        let normal = channel(descriptor[1], "normal")?;
        if let Some(component) = normal {
            if !matches!(
                component,
                ComponentType::I8 | ComponentType::I16 | ComponentType::F32
            ) {
                return Err(malformed(format!("normals of type {component:?} are not signed")));
            }
        }
        let uv = channel(descriptor[2], "uv")?;
        let color = channel(descriptor[3], "color")?;

        Ok(Self::builtin(id, primitive, normal, uv, color))
    }

    /// Parse a whole attribute table of consecutive 8-byte descriptors.
    pub fn parse_table(bytes: &[u8]) -> MergeResult<Vec<AttributeLayout>> {
        if bytes.len() % 8 != 0 {
            return Err(MergeError::malformed(
                "attribute table",
                format!("{} bytes is not a multiple of 8", bytes.len()),
            ));
        }
        if bytes.len() / 8 > u8::MAX as usize + 1 {
            return Err(MergeError::malformed(
                "attribute table",
                "more than 256 layouts",
            ));
        }
        bytes
            .chunks_exact(8)
            .enumerate()
            .map(|(i, chunk)| {
                let mut descriptor = [0i8; 8];
                for (d, b) in descriptor.iter_mut().zip(chunk) {
                    *d = *b as i8;
                }
                Self::from_descriptor(i as u8, descriptor)
            })
            .collect()
    }

    /// Encode back to the 8-byte descriptor.
    pub fn descriptor(&self) -> [i8; 8] {
        let code = |semantic| self.get(semantic).map_or(-1, |a| a.component.code());
        [
            self.primitive.code(),
            code(AttributeSemantic::Normal),
            code(AttributeSemantic::TexCoord),
            code(AttributeSemantic::Color),
            0,
            0,
            0,
            0,
        ]
    }

    /// Input vertex stride in bytes.
    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn get(&self, semantic: AttributeSemantic) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.semantic == semantic)
    }

    pub fn has(&self, semantic: AttributeSemantic) -> bool {
        self.get(semantic).is_some()
    }

    /// Whether the normal can fold into the position floats.
    pub fn can_compress(&self) -> bool {
        self.get(AttributeSemantic::Normal)
            .is_some_and(|n| n.component == ComponentType::I8)
    }

    /// Whether output vertices use the compressed form in this session.
    pub fn is_compressed(&self, compressed_normals: bool) -> bool {
        compressed_normals && self.can_compress()
    }

    /// Output vertex stride in bytes.
    pub fn output_stride(&self, compressed_normals: bool) -> u32 {
        if self.is_compressed(compressed_normals) {
            self.stride - 4
        } else {
            self.stride
        }
    }

    /// Offset of a channel in the output vertex. A compressed normal reports
    /// offset 0 since it lives inside the position.
    pub fn output_offset(&self, semantic: AttributeSemantic, compressed_normals: bool) -> Option<u32> {
        let attribute = self.get(semantic)?;
        if !self.is_compressed(compressed_normals) {
            return Some(attribute.offset);
        }
        match semantic {
            AttributeSemantic::Position | AttributeSemantic::Normal => Some(0),
            _ => Some(attribute.offset - 4),
        }
    }
}
