//! Drawable descriptors handed to the scene graph.

use super::arena::ArenaBlock;
use crate::math::Aabb;
use crate::scene::IndexWidth;

/// Which per-file buffer pair a drawable lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferRef {
    pub file_index: u16,
}

/// Vertex or index half of a buffer pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BufferKind {
    Vertex,
    Index,
}

/// Absolute byte range in an arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

/// Where one folded-in node sits inside a merged drawable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberRange {
    pub node: u32,
    /// First index of the member, relative to the drawable's index range.
    pub first_index: u32,
    pub index_count: u32,
    /// First vertex of the member, relative to the drawable's vertex range.
    pub first_vertex: u32,
    pub vertex_count: u32,
}

/// One instance of an instanced drawable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Instance {
    pub node: u32,
    /// Column-major 3x4 world transform, `None` for identity.
    pub transform: Option<[f32; 12]>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawableKind {
    /// One node drawn with its own transform.
    Standalone {
        /// Column-major 3x4 world transform, `None` for identity.
        transform: Option<[f32; 12]>,
    },
    /// Several nodes baked into world space.
    Merged {
        members: Vec<MemberRange>,
        /// One byte per vertex a renderer can toggle per member.
        visibility_range: ByteRange,
    },
    /// One shared mesh drawn once per instance.
    Instanced { instances: Vec<Instance> },
}

/// Everything the scene graph needs to issue one draw.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawableDescriptor {
    /// Node id, or the first emitted member of a merged drawable.
    pub node: u32,
    pub buffer: BufferRef,
    pub vertex_range: ByteRange,
    pub index_range: ByteRange,
    pub index_width: IndexWidth,
    pub vertex_count: u32,
    pub index_count: u32,
    pub attribute_layout: u8,
    /// Vertices use the compressed-normal form.
    pub compressed: bool,
    pub material: u16,
    pub layer: u16,
    /// World-space bounds.
    pub bbox: Aabb,
    /// Vertices are already in world space.
    pub identity: bool,
    pub kind: DrawableKind,
}

impl DrawableDescriptor {
    pub fn is_merged(&self) -> bool {
        matches!(self.kind, DrawableKind::Merged { .. })
    }

    /// Node ids this drawable covers.
    pub fn nodes(&self) -> Vec<u32> {
        match &self.kind {
            DrawableKind::Standalone { .. } => vec![self.node],
            DrawableKind::Merged { members, .. } => members.iter().map(|m| m.node).collect(),
            DrawableKind::Instanced { instances } => instances.iter().map(|i| i.node).collect(),
        }
    }
}

/// A batch of drawables and the arena bytes written since the previous batch.
#[derive(Debug, Clone, Default)]
pub struct NodeBatch {
    pub file_index: u16,
    pub drawables: Vec<DrawableDescriptor>,
    pub vertex_block: ArenaBlock,
    pub index_block: ArenaBlock,
}

impl NodeBatch {
    pub fn buffer(&self) -> BufferRef {
        BufferRef {
            file_index: self.file_index,
        }
    }
}
