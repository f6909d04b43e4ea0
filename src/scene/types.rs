//! Decoded records of the binary scene tables.

/// Width of one index value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum IndexWidth {
    U8,
    #[default]
    U16,
    U32,
}

impl IndexWidth {
    /// Parse an encoded byte width (1, 2 or 4).
    pub fn from_bytes(bytes: u32) -> Option<Self> {
        match bytes {
            1 => Some(Self::U8),
            2 => Some(Self::U16),
            4 => Some(Self::U32),
            _ => None,
        }
    }

    /// Size of one index in bytes.
    pub fn bytes(&self) -> u32 {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }

    /// Number of distinct vertices this width can address.
    pub fn capacity(&self) -> u64 {
        match self {
            Self::U8 => 1 << 8,
            Self::U16 => 1 << 16,
            Self::U32 => 1 << 32,
        }
    }

    /// Narrowest width addressing `vertex_count` vertices.
    pub fn for_vertex_count(vertex_count: u64) -> Self {
        if vertex_count <= Self::U8.capacity() {
            Self::U8
        } else if vertex_count <= Self::U16.capacity() {
            Self::U16
        } else {
            Self::U32
        }
    }

    /// Whether `value` is representable.
    pub fn fits(&self, value: u64) -> bool {
        value < self.capacity()
    }
}

/// Per-node flag word.
///
/// Bit 31 billboard, bit 30 identity transform, bit 29 mergeable hint,
/// bits 28..25 region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct NodeFlags {
    pub billboard: bool,
    pub identity: bool,
    pub mergeable: bool,
    pub region: u8,
}

impl NodeFlags {
    const BILLBOARD: u32 = 1 << 31;
    const IDENTITY: u32 = 1 << 30;
    const MERGEABLE: u32 = 1 << 29;
    const REGION_SHIFT: u32 = 25;
    const REGION_MASK: u32 = 0x0f;

    pub fn from_bits(bits: u32) -> Self {
        Self {
            billboard: bits & Self::BILLBOARD != 0,
            identity: bits & Self::IDENTITY != 0,
            mergeable: bits & Self::MERGEABLE != 0,
            region: ((bits >> Self::REGION_SHIFT) & Self::REGION_MASK) as u8,
        }
    }

    pub fn to_bits(&self) -> u32 {
        let mut bits = (self.region as u32 & Self::REGION_MASK) << Self::REGION_SHIFT;
        if self.billboard {
            bits |= Self::BILLBOARD;
        }
        if self.identity {
            bits |= Self::IDENTITY;
        }
        if self.mergeable {
            bits |= Self::MERGEABLE;
        }
        bits
    }
}

/// Fixed part of a node record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeData {
    pub material: u16,
    pub layer: u16,
    pub mesh_index: u32,
    pub flags: NodeFlags,
}

/// One entry of the mesh table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshData {
    pub index_width: IndexWidth,
    pub attribute: u8,
    /// Which mesh-bin file holds the streams.
    pub file_index: u16,
    pub vertex_offset: u32,
    pub vertex_bytes: u32,
    pub index_offset: u32,
    pub index_bytes: u32,
}

impl MeshData {
    /// Encoded vertex plus index bytes.
    pub fn total_bytes(&self) -> u64 {
        self.vertex_bytes as u64 + self.index_bytes as u64
    }

    pub fn index_count(&self) -> u32 {
        self.index_bytes / self.index_width.bytes()
    }
}
