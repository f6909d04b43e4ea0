//! Geometry decompression: vertex decode with baked transforms and index
//! remapping for merged chains.

pub mod index;
pub mod transform;
pub mod vertex;

pub use index::{read_indices, remap_indices};
pub use transform::{affine_from_array, NodeTransform, TRANSFORM_EPSILON};
pub use vertex::VertexDecoder;
