//! Buffer assembly: per-file arenas, drawable descriptors and the resource
//! manager they are handed to.

pub mod arena;
pub mod assembler;
pub mod descriptor;
pub mod resource;

pub use arena::{ArenaBlock, PackedArena, BLOCK_ALIGN};
pub use assembler::{ArenaCapacity, BufferAssembler};
pub use descriptor::{
    BufferKind, BufferRef, ByteRange, DrawableDescriptor, DrawableKind, Instance, MemberRange,
    NodeBatch,
};
pub use resource::{BufferHandle, InMemoryResourceManager, ResourceManager};
