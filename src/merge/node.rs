//! Node records and the arena that links them into chains.
//!
//! Chains are singly linked through `next_in_chain` indices into the table,
//! never through references, so records can be mutated in place during
//! grouping and planning.

use crate::error::{MergeError, MergeResult};
use crate::math::Aabb;
use crate::scene::{AttributeLayout, IndexWidth, MeshData, NodeFlags, SceneReader};

/// Mutable per-node planning state.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub id: u32,
    pub mesh_index: u32,
    pub material: u16,
    pub layer: u16,
    pub attribute: u8,
    pub file_index: u16,
    /// Encoded index width of the node's mesh.
    pub index_width: IndexWidth,
    pub flags: NodeFlags,
    /// Column-major 3x4 world transform, `None` for identity nodes.
    pub transform: Option<[f32; 12]>,
    /// World-space bounds.
    pub bbox: Aabb,
    pub vertex_count: u32,
    pub index_count: u32,
    pub vertex_bytes: u32,
    pub index_bytes: u32,
    /// Standalone draw or chain head. Folded-in members are not valid.
    pub valid: bool,
    pub next_in_chain: Option<u32>,
    /// Length of the chain this node heads; 1 for standalone nodes.
    pub chain_member_count: u32,
}

/// All node records of a session plus the mesh table they reference.
#[derive(Debug, Clone, Default)]
pub struct NodeTable {
    records: Vec<NodeRecord>,
    meshes: Vec<MeshData>,
}

impl NodeTable {
    /// Read every node and mesh record.
    pub fn from_reader(reader: &SceneReader<'_>, layouts: &[AttributeLayout]) -> MergeResult<Self> {
        let meshes = (0..reader.mesh_count())
            .map(|i| reader.read_mesh(i))
            .collect::<MergeResult<Vec<_>>>()?;

        for (i, mesh) in meshes.iter().enumerate() {
            let layout = layouts.get(mesh.attribute as usize).ok_or_else(|| {
                MergeError::malformed(
                    "model.bin",
                    format!(
                        "mesh {i} uses attribute layout {} of {}",
                        mesh.attribute,
                        layouts.len()
                    ),
                )
            })?;
            if mesh.vertex_bytes % layout.stride() != 0 {
                return Err(MergeError::malformed(
                    "model.bin",
                    format!(
                        "mesh {i}: {} vertex bytes is not a multiple of stride {}",
                        mesh.vertex_bytes,
                        layout.stride()
                    ),
                ));
            }
        }

        let mut records = Vec::with_capacity(reader.node_count() as usize);
        for id in 0..reader.node_count() {
            let data = reader.read_node_data(id)?;
            let mesh = meshes[data.mesh_index as usize];
            let stride = layouts[mesh.attribute as usize].stride();

            records.push(NodeRecord {
                id,
                mesh_index: data.mesh_index,
                material: data.material,
                layer: data.layer,
                attribute: mesh.attribute,
                file_index: mesh.file_index,
                index_width: mesh.index_width,
                flags: data.flags,
                transform: reader.read_node_transform(id)?,
                bbox: reader.read_node_bbox(id)?,
                vertex_count: mesh.vertex_bytes / stride,
                index_count: mesh.index_count(),
                vertex_bytes: mesh.vertex_bytes,
                index_bytes: mesh.index_bytes,
                valid: true,
                next_in_chain: None,
                chain_member_count: 1,
            });
        }

        Ok(Self { records, meshes })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: u32) -> Option<&NodeRecord> {
        self.records.get(id as usize)
    }

    pub fn records(&self) -> &[NodeRecord] {
        &self.records
    }

    pub fn meshes(&self) -> &[MeshData] {
        &self.meshes
    }

    pub fn mesh(&self, index: u32) -> Option<&MeshData> {
        self.meshes.get(index as usize)
    }

    /// Highest file index referenced by any mesh, plus one.
    pub fn file_count(&self) -> usize {
        self.meshes
            .iter()
            .map(|m| m.file_index as usize + 1)
            .max()
            .unwrap_or(0)
    }

    /// Ids of the nodes whose mesh lives in `file_index`, in table order.
    pub fn file_nodes(&self, file_index: u16) -> Vec<u32> {
        self.records
            .iter()
            .filter(|r| r.file_index == file_index)
            .map(|r| r.id)
            .collect()
    }

    /// Link `members` into a chain headed by the first id.
    pub fn link(&mut self, members: &[u32]) {
        let Some((&head, rest)) = members.split_first() else {
            return;
        };
        for pair in members.windows(2) {
            self.records[pair[0] as usize].next_in_chain = Some(pair[1]);
        }
        if let Some(&last) = members.last() {
            self.records[last as usize].next_in_chain = None;
        }
        for &id in rest {
            let record = &mut self.records[id as usize];
            record.valid = false;
            record.chain_member_count = 1;
        }
        let record = &mut self.records[head as usize];
        record.valid = true;
        record.chain_member_count = members.len() as u32;
    }

    /// Dissolve the chain headed by `head`; every member becomes a valid
    /// standalone node again. Returns the former members.
    pub fn unlink(&mut self, head: u32) -> Vec<u32> {
        let members: Vec<u32> = self.chain(head).collect();
        for &id in &members {
            let record = &mut self.records[id as usize];
            record.valid = true;
            record.next_in_chain = None;
            record.chain_member_count = 1;
        }
        members
    }

    /// Walk a chain from its head.
    pub fn chain(&self, head: u32) -> ChainIter<'_> {
        ChainIter {
            table: self,
            next: self.get(head).map(|r| r.id),
            remaining: self.records.len(),
        }
    }
}

/// Iterator over the members of one chain, head first.
pub struct ChainIter<'a> {
    table: &'a NodeTable,
    next: Option<u32>,
    remaining: usize,
}

impl Iterator for ChainIter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        // guards against a cycle in corrupted links
        if self.remaining == 0 {
            return None;
        }
        let current = self.next?;
        self.remaining -= 1;
        self.next = self.table.get(current).and_then(|r| r.next_in_chain);
        Some(current)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::scene::{MeshSpec, SceneBuilder};
    use crate::Endianness;

    pub(crate) fn table_of(builder: SceneBuilder) -> NodeTable {
        let scene = builder.build();
        let reader = SceneReader::new(&scene.model_bin, Endianness::Little).unwrap();
        NodeTable::from_reader(&reader, &scene.layouts).unwrap()
    }

    #[test]
    fn test_from_reader() {
        let mut builder = SceneBuilder::new(Endianness::Little);
        let layout = builder.add_layout([4, 0, -1, -1, 0, 0, 0, 0]).unwrap();
        let mesh = builder.add_mesh(1, MeshSpec::grid(layout, 10, IndexWidth::U8)).unwrap();
        builder.add_node(mesh, 5);
        builder.add_node(mesh, 6).with_region(3);
        let table = table_of(builder);

        assert_eq!(table.len(), 2);
        assert_eq!(table.file_count(), 2);
        let record = table.get(1).unwrap();
        assert_eq!(record.material, 6);
        assert_eq!(record.vertex_count, 10);
        assert_eq!(record.index_count, 24);
        assert_eq!(record.flags.region, 3);
        assert!(record.valid);
        assert_eq!(table.file_nodes(1), vec![0, 1]);
        assert!(table.file_nodes(0).is_empty());
    }

    #[test]
    fn test_link_and_unlink() {
        let mut builder = SceneBuilder::new(Endianness::Little);
        let layout = builder.add_layout([4, -1, -1, -1, 0, 0, 0, 0]).unwrap();
        let mesh = builder.add_mesh(0, MeshSpec::grid(layout, 3, IndexWidth::U8)).unwrap();
        for _ in 0..4 {
            builder.add_node(mesh, 0);
        }
        let mut table = table_of(builder);

        table.link(&[2, 0, 3]);
        assert_eq!(table.chain(2).collect::<Vec<_>>(), vec![2, 0, 3]);
        assert_eq!(table.get(2).unwrap().chain_member_count, 3);
        assert!(table.get(2).unwrap().valid);
        assert!(!table.get(0).unwrap().valid);
        assert!(!table.get(3).unwrap().valid);
        assert!(table.get(1).unwrap().valid);

        let members = table.unlink(2);
        assert_eq!(members, vec![2, 0, 3]);
        assert!(table.records().iter().all(|r| r.valid && r.next_in_chain.is_none()));
    }
}
