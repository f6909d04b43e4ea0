//! Accessors over `model.bin`.
//!
//! Layout (all words 32-bit, byte order per session):
//!
//! ```text
//! header      mesh_count, node_count
//! meshes      mesh_count x 5 words
//!             [index_width:u8 | attribute:u8 | file_index:u16], v_offset, v_bytes, i_offset, i_bytes
//! nodes       node_count x 21 words
//!             [material:u16 | layer:u16], mesh, flags, bbox[6], transform[12]
//! ```
//!
//! The transform is a column-major 3x4 affine: three basis columns followed
//! by the translation.

use log::debug;

use super::bytes::ByteView;
use super::types::{IndexWidth, MeshData, NodeData, NodeFlags};
use crate::error::{MergeError, MergeResult};
use crate::math::Aabb;
use crate::Endianness;

pub(crate) const HEADER_BYTES: usize = 8;
pub(crate) const MESH_RECORD_WORDS: usize = 5;
pub(crate) const NODE_RECORD_WORDS: usize = 21;
const NODE_BBOX_WORD: usize = 3;
const NODE_TRANSFORM_WORD: usize = 9;

pub(crate) const MODEL_BIN: &str = "model.bin";

/// Read-only view over the node and mesh tables.
#[derive(Debug, Clone, Copy)]
pub struct SceneReader<'a> {
    view: ByteView<'a>,
    mesh_count: u32,
    node_count: u32,
}

impl<'a> SceneReader<'a> {
    /// Validate the header and wrap the blob.
    pub fn new(bytes: &'a [u8], endianness: Endianness) -> MergeResult<Self> {
        let view = ByteView::new(MODEL_BIN, bytes, endianness);
        let mesh_count = view.read_u32(0)?;
        let node_count = view.read_u32(4)?;

        let required = (mesh_count as u64 * MESH_RECORD_WORDS as u64
            + node_count as u64 * NODE_RECORD_WORDS as u64)
            * 4
            + HEADER_BYTES as u64;
        if required > bytes.len() as u64 {
            return Err(MergeError::malformed(
                MODEL_BIN,
                format!(
                    "{mesh_count} meshes and {node_count} nodes need {required} bytes, got {}",
                    bytes.len()
                ),
            ));
        }

        debug!("model.bin: {mesh_count} meshes, {node_count} nodes");

        Ok(Self {
            view,
            mesh_count,
            node_count,
        })
    }

    pub fn mesh_count(&self) -> u32 {
        self.mesh_count
    }

    pub fn node_count(&self) -> u32 {
        self.node_count
    }

    pub fn endianness(&self) -> Endianness {
        self.view.endianness()
    }

    fn node_word(&self, index: u32, word: usize) -> MergeResult<usize> {
        if index >= self.node_count {
            return Err(MergeError::malformed(
                MODEL_BIN,
                format!("node {index} out of range ({} nodes)", self.node_count),
            ));
        }
        let nodes = HEADER_BYTES + self.mesh_count as usize * MESH_RECORD_WORDS * 4;
        Ok(nodes + (index as usize * NODE_RECORD_WORDS + word) * 4)
    }

    fn read_floats<const N: usize>(&self, offset: usize) -> MergeResult<[f32; N]> {
        let mut out = [0.0f32; N];
        for (i, v) in out.iter_mut().enumerate() {
            *v = self.view.read_f32(offset + i * 4)?;
        }
        Ok(out)
    }

    /// Material, mesh index and flags of node `index`.
    pub fn read_node_data(&self, index: u32) -> MergeResult<NodeData> {
        let offset = self.node_word(index, 0)?;
        let packed = self.view.read_u32(offset)?;
        let mesh_index = self.view.read_u32(offset + 4)?;
        let flags = self.view.read_u32(offset + 8)?;

        if mesh_index >= self.mesh_count {
            return Err(MergeError::malformed(
                MODEL_BIN,
                format!(
                    "node {index} references mesh {mesh_index} of {}",
                    self.mesh_count
                ),
            ));
        }

        Ok(NodeData {
            material: (packed & 0xffff) as u16,
            layer: (packed >> 16) as u16,
            mesh_index,
            flags: NodeFlags::from_bits(flags),
        })
    }

    /// Mesh table entry `index`.
    pub fn read_mesh(&self, index: u32) -> MergeResult<MeshData> {
        if index >= self.mesh_count {
            return Err(MergeError::malformed(
                MODEL_BIN,
                format!("mesh {index} out of range ({} meshes)", self.mesh_count),
            ));
        }
        let offset = HEADER_BYTES + index as usize * MESH_RECORD_WORDS * 4;
        let packed = self.view.read_u32(offset)?;

        let index_width = IndexWidth::from_bytes(packed & 0xff).ok_or_else(|| {
            MergeError::malformed(
                MODEL_BIN,
                format!("mesh {index} has index width {}", packed & 0xff),
            )
        })?;

        let mesh = MeshData {
            index_width,
            attribute: ((packed >> 8) & 0xff) as u8,
            file_index: (packed >> 16) as u16,
            vertex_offset: self.view.read_u32(offset + 4)?,
            vertex_bytes: self.view.read_u32(offset + 8)?,
            index_offset: self.view.read_u32(offset + 12)?,
            index_bytes: self.view.read_u32(offset + 16)?,
        };

        if mesh.index_bytes % index_width.bytes() != 0 {
            return Err(MergeError::malformed(
                MODEL_BIN,
                format!(
                    "mesh {index}: {} index bytes is not a multiple of {}",
                    mesh.index_bytes,
                    index_width.bytes()
                ),
            ));
        }

        Ok(mesh)
    }

    /// World transform of node `index`, or `None` for identity nodes.
    pub fn read_node_transform(&self, index: u32) -> MergeResult<Option<[f32; 12]>> {
        let data = self.read_node_data(index)?;
        if data.flags.identity {
            return Ok(None);
        }
        let offset = self.node_word(index, NODE_TRANSFORM_WORD)?;
        self.read_floats::<12>(offset).map(Some)
    }

    /// World-space bounding box of node `index`.
    pub fn read_node_bbox(&self, index: u32) -> MergeResult<Aabb> {
        let offset = self.node_word(index, NODE_BBOX_WORD)?;
        self.read_floats::<6>(offset).map(Aabb::from_array)
    }

    /// Encoded bytes of every mesh in the table.
    pub fn total_mesh_bytes(&self) -> MergeResult<u64> {
        (0..self.mesh_count).try_fold(0u64, |acc, i| Ok(acc + self.read_mesh(i)?.total_bytes()))
    }

    /// Encoded mesh bytes grouped by mesh-bin file index.
    pub fn mesh_bytes_per_file(&self) -> MergeResult<Vec<u64>> {
        let mut per_file: Vec<u64> = Vec::new();
        for i in 0..self.mesh_count {
            let mesh = self.read_mesh(i)?;
            let file = mesh.file_index as usize;
            if per_file.len() <= file {
                per_file.resize(file + 1, 0);
            }
            per_file[file] += mesh.total_bytes();
        }
        Ok(per_file)
    }

    /// Fail with [`MergeError::FatalCapacity`] when the unmerged meshes alone
    /// exceed `ceiling`. Returns the total on success.
    pub fn check_capacity(&self, ceiling: u64) -> MergeResult<u64> {
        let required = self.total_mesh_bytes()?;
        if required > ceiling {
            return Err(MergeError::FatalCapacity { required, ceiling });
        }
        Ok(required)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::builder::{MeshSpec, SceneBuilder};
    use glam::Vec3;

    fn two_node_scene(endianness: Endianness) -> Vec<u8> {
        let mut builder = SceneBuilder::new(endianness);
        let layout = builder.add_layout([4, 0, -1, -1, 0, 0, 0, 0]).unwrap();
        let mesh = builder.add_mesh(0, MeshSpec::grid(layout, 4, IndexWidth::U16)).unwrap();
        builder.add_node(mesh, 3).with_layer(2).with_region(7);
        builder
            .add_node(mesh, 4)
            .with_translation(Vec3::new(1.0, 2.0, 3.0));
        builder.build().model_bin
    }

    #[test]
    fn test_read_tables() {
        for endianness in [Endianness::Little, Endianness::Big] {
            let bytes = two_node_scene(endianness);
            let reader = SceneReader::new(&bytes, endianness).unwrap();
            assert_eq!(reader.mesh_count(), 1);
            assert_eq!(reader.node_count(), 2);

            let node = reader.read_node_data(0).unwrap();
            assert_eq!(node.material, 3);
            assert_eq!(node.layer, 2);
            assert_eq!(node.flags.region, 7);
            assert!(node.flags.identity);

            let mesh = reader.read_mesh(0).unwrap();
            assert_eq!(mesh.index_width, IndexWidth::U16);
            assert_eq!(mesh.vertex_bytes, 4 * 16);

            assert_eq!(reader.read_node_transform(0).unwrap(), None);
            let t = reader.read_node_transform(1).unwrap().unwrap();
            assert_eq!(&t[9..], &[1.0, 2.0, 3.0]);
        }
    }

    #[test]
    fn test_truncated_header() {
        let bytes = two_node_scene(Endianness::Little);
        let err = SceneReader::new(&bytes[..bytes.len() - 4], Endianness::Little).unwrap_err();
        assert!(matches!(err, MergeError::MalformedBinary { .. }));
    }

    #[test]
    fn test_out_of_range_node() {
        let bytes = two_node_scene(Endianness::Little);
        let reader = SceneReader::new(&bytes, Endianness::Little).unwrap();
        assert!(reader.read_node_data(2).is_err());
        assert!(reader.read_mesh(1).is_err());
    }

    #[test]
    fn test_check_capacity() {
        let bytes = two_node_scene(Endianness::Little);
        let reader = SceneReader::new(&bytes, Endianness::Little).unwrap();
        let total = reader.total_mesh_bytes().unwrap();
        assert_eq!(reader.check_capacity(total), Ok(total));
        assert_eq!(
            reader.check_capacity(total - 1),
            Err(MergeError::FatalCapacity {
                required: total,
                ceiling: total - 1
            })
        );
    }
}
