//! Packs decoded geometry of one mesh-bin file into its arenas.
//!
//! Capacity is computed from the plan before anything is written, so an
//! arena never reallocates past it and an overrun is a hard error rather
//! than silent growth.
//!
//! Standalone and instanced drawables share one decoded copy per mesh.
//! Merged drawables write their members back to back in ascending region
//! order, followed by one visibility byte per vertex.

use std::collections::{HashMap, HashSet};

use log::{debug, trace, warn};

use super::arena::{PackedArena, BLOCK_ALIGN};
use super::descriptor::{
    BufferRef, ByteRange, DrawableDescriptor, DrawableKind, Instance, MemberRange, NodeBatch,
};
use crate::decode::{read_indices, remap_indices, NodeTransform, VertexDecoder};
use crate::error::{MergeError, MergeResult};
use crate::math::Aabb;
use crate::merge::{NodeRecord, NodeTable, PlanItem, PlanKind};
use crate::scene::{AttributeLayout, ByteView, IndexWidth, MeshData};
use crate::stats::MergeStats;
use crate::MergeConfig;

/// A mesh decoded once for standalone or instanced use.
#[derive(Debug, Clone, Copy)]
struct MeshSlot {
    vertex_range: ByteRange,
    index_range: ByteRange,
    vertex_count: u32,
    index_count: u32,
    index_width: IndexWidth,
}

/// Arena capacities needed to assemble a list of plan items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaCapacity {
    pub vertex_bytes: usize,
    pub index_bytes: usize,
}

impl ArenaCapacity {
    /// Upper bound on the bytes `items` will write, alignment included.
    pub fn for_items(
        items: &[PlanItem],
        table: &NodeTable,
        layouts: &[AttributeLayout],
        compressed_normals: bool,
    ) -> Self {
        let pad = BLOCK_ALIGN - 1;
        let out_stride = |record: &NodeRecord| {
            layouts
                .get(record.attribute as usize)
                .map_or(0, |l| l.output_stride(compressed_normals) as usize)
        };

        let mut capacity = Self::default();
        let mut meshes = HashSet::new();
        let mut add_mesh = |record: &NodeRecord, capacity: &mut Self| {
            if meshes.insert(record.mesh_index) {
                capacity.vertex_bytes += record.vertex_count as usize * out_stride(record) + pad;
                capacity.index_bytes += record.index_bytes as usize + pad;
            }
        };

        for item in items {
            match item.kind {
                PlanKind::Standalone { node: id } | PlanKind::Instanced { head: id } => {
                    if let Some(record) = table.get(id) {
                        add_mesh(record, &mut capacity);
                    }
                }
                PlanKind::Merged { head, index_width } => {
                    for record in table.chain(head).filter_map(|id| table.get(id)) {
                        let vertices = record.vertex_count as usize;
                        // vertices plus one visibility byte each
                        capacity.vertex_bytes += vertices * (out_stride(record) + 1);
                        capacity.index_bytes +=
                            record.index_count as usize * index_width.bytes() as usize;
                    }
                    capacity.vertex_bytes += pad;
                    capacity.index_bytes += pad;
                }
            }
        }
        capacity
    }
}

/// Builds the vertex and index arenas of one physical file.
pub struct BufferAssembler<'a> {
    file_index: u16,
    payload: ByteView<'a>,
    table: &'a NodeTable,
    layouts: &'a [AttributeLayout],
    compressed_normals: bool,
    vertices: PackedArena,
    indices: PackedArena,
    meshes: HashMap<u32, Option<MeshSlot>>,
    pending: Vec<DrawableDescriptor>,
    stats: MergeStats,
    scratch_indices: Vec<u32>,
    scratch_bytes: Vec<u8>,
}

impl<'a> BufferAssembler<'a> {
    /// Prepare arenas sized for `items`.
    pub fn new(
        file_index: u16,
        file_name: &'a str,
        payload: &'a [u8],
        table: &'a NodeTable,
        layouts: &'a [AttributeLayout],
        config: &MergeConfig,
        items: &[PlanItem],
    ) -> Self {
        let capacity = ArenaCapacity::for_items(items, table, layouts, config.compressed_normals);
        debug!(
            "{file_name}: {} items, arena capacity {} vertex / {} index bytes",
            items.len(),
            capacity.vertex_bytes,
            capacity.index_bytes
        );

        Self {
            file_index,
            payload: ByteView::new(file_name, payload, config.endianness),
            table,
            layouts,
            compressed_normals: config.compressed_normals,
            vertices: PackedArena::with_capacity(format!("{file_name} vertices"), capacity.vertex_bytes),
            indices: PackedArena::with_capacity(format!("{file_name} indices"), capacity.index_bytes),
            meshes: HashMap::new(),
            pending: Vec::new(),
            stats: MergeStats {
                files: 1,
                ..Default::default()
            },
            scratch_indices: Vec::new(),
            scratch_bytes: Vec::new(),
        }
    }

    fn buffer(&self) -> BufferRef {
        BufferRef {
            file_index: self.file_index,
        }
    }

    fn record(&self, id: u32) -> MergeResult<&'a NodeRecord> {
        self.table.get(id).ok_or_else(|| {
            MergeError::malformed(self.payload.name(), format!("plan references unknown node {id}"))
        })
    }

    fn layout(&self, record: &NodeRecord) -> MergeResult<&'a AttributeLayout> {
        self.layouts.get(record.attribute as usize).ok_or_else(|| {
            MergeError::malformed(
                self.payload.name(),
                format!("node {} uses unknown layout {}", record.id, record.attribute),
            )
        })
    }

    fn mesh(&self, record: &NodeRecord) -> MergeResult<&'a MeshData> {
        self.table.mesh(record.mesh_index).ok_or_else(|| {
            MergeError::malformed(
                self.payload.name(),
                format!("node {} uses unknown mesh {}", record.id, record.mesh_index),
            )
        })
    }

    /// Source vertex and index bytes of a node's mesh.
    fn sources(&self, record: &NodeRecord, layout: &AttributeLayout) -> MergeResult<(&'a [u8], &'a [u8])> {
        let mesh = self.mesh(record)?;
        let vertices = self.payload.slice(
            mesh.vertex_offset as usize,
            record.vertex_count as usize * layout.stride() as usize,
        )?;
        let indices = self
            .payload
            .slice(mesh.index_offset as usize, mesh.index_bytes as usize)?;
        Ok((vertices, indices))
    }

    /// Assemble one plan item into the pending batch.
    pub fn push(&mut self, item: &PlanItem) -> MergeResult<()> {
        match item.kind {
            PlanKind::Standalone { node } => self.push_standalone(node),
            PlanKind::Instanced { head } => self.push_instanced(head),
            PlanKind::Merged { head, index_width } => self.push_merged(head, index_width),
        }
    }

    fn push_standalone(&mut self, node: u32) -> MergeResult<()> {
        let record = self.record(node)?;
        let Some(slot) = self.mesh_slot(record)? else {
            self.stats.dropped_nodes += 1;
            return Ok(());
        };
        let descriptor = self.descriptor(
            record,
            &slot,
            record.bbox,
            DrawableKind::Standalone {
                transform: record.transform,
            },
        );
        self.pending.push(descriptor);
        Ok(())
    }

    fn push_instanced(&mut self, head: u32) -> MergeResult<()> {
        let record = self.record(head)?;
        let members: Vec<&'a NodeRecord> = self
            .table
            .chain(head)
            .filter_map(|id| self.table.get(id))
            .collect();

        let Some(slot) = self.mesh_slot(record)? else {
            self.stats.dropped_nodes += members.len() as u64;
            return Ok(());
        };

        let bbox = members
            .iter()
            .fold(Aabb::EMPTY, |acc, m| acc.union(&m.bbox));
        let instances = members
            .iter()
            .map(|m| Instance {
                node: m.id,
                transform: m.transform,
            })
            .collect();

        let mut descriptor = self.descriptor(record, &slot, bbox, DrawableKind::Instanced { instances });
        descriptor.identity = members.iter().all(|m| m.transform.is_none());
        self.pending.push(descriptor);
        Ok(())
    }

    fn push_merged(&mut self, head: u32, index_width: IndexWidth) -> MergeResult<()> {
        let table = self.table;
        let head_record = self.record(head)?;
        let layout = self.layout(head_record)?;
        let decoder = VertexDecoder::new(layout, self.payload.endianness(), self.compressed_normals);

        // stable: equal regions keep chain order
        let mut members: Vec<&'a NodeRecord> =
            table.chain(head).filter_map(|id| table.get(id)).collect();
        members.sort_by_key(|r| r.flags.region);

        let vertex_start = self.vertices.cursor();
        let index_start = self.indices.cursor();
        let mut scratch_indices = std::mem::take(&mut self.scratch_indices);
        let mut scratch_bytes = std::mem::take(&mut self.scratch_bytes);

        let mut ranges = Vec::with_capacity(members.len());
        let mut bbox = Aabb::EMPTY;
        let mut vertex_count = 0u32;
        let mut index_count = 0u32;

        for record in &members {
            let (vertex_src, index_src) = self.sources(record, layout)?;
            read_indices(
                index_src,
                record.index_width,
                self.payload.endianness(),
                &mut scratch_indices,
            );
            match remap_indices(
                record.id,
                &scratch_indices,
                vertex_count as u64,
                record.vertex_count,
                index_width,
                &mut scratch_bytes,
            ) {
                Ok(()) => {}
                Err(e @ MergeError::DecodeMismatch { .. }) => {
                    warn!("{}: dropping node {}: {e}", self.payload.name(), record.id);
                    self.stats.dropped_nodes += 1;
                    continue;
                }
                Err(e) => return Err(e),
            }

            let transform = NodeTransform::classify(record.transform.as_ref());
            let (_, dst) = self
                .vertices
                .reserve(decoder.output_len(record.vertex_count as usize))?;
            decoder.decode(vertex_src, dst, &transform);
            self.indices.append(&scratch_bytes)?;

            ranges.push(MemberRange {
                node: record.id,
                first_index: index_count,
                index_count: scratch_indices.len() as u32,
                first_vertex: vertex_count,
                vertex_count: record.vertex_count,
            });
            bbox = bbox.union(&record.bbox);
            vertex_count += record.vertex_count;
            index_count += scratch_indices.len() as u32;
        }

        self.scratch_indices = scratch_indices;
        self.scratch_bytes = scratch_bytes;

        let Some(first) = ranges.first() else {
            self.vertices.truncate(vertex_start);
            self.indices.truncate(index_start);
            return Ok(());
        };
        let first_node = first.node;

        let vertex_range = ByteRange::new(
            vertex_start as u64,
            decoder.output_len(vertex_count as usize) as u64,
        );
        let visibility_range = self.vertices.append_zeros(vertex_count as usize)?;
        self.vertices.align()?;
        self.indices.align()?;

        self.pending.push(DrawableDescriptor {
            node: first_node,
            buffer: self.buffer(),
            vertex_range,
            index_range: ByteRange::new(
                index_start as u64,
                index_count as u64 * index_width.bytes() as u64,
            ),
            index_width,
            vertex_count,
            index_count,
            attribute_layout: head_record.attribute,
            compressed: decoder.is_compressed(),
            material: head_record.material,
            layer: head_record.layer,
            bbox,
            identity: true,
            kind: DrawableKind::Merged {
                members: ranges,
                visibility_range,
            },
        });
        Ok(())
    }

    /// Decode a node's mesh on first use. `None` when its indices are corrupt.
    fn mesh_slot(&mut self, record: &NodeRecord) -> MergeResult<Option<MeshSlot>> {
        if let Some(slot) = self.meshes.get(&record.mesh_index) {
            return Ok(*slot);
        }

        let layout = self.layout(record)?;
        let (vertex_src, index_src) = self.sources(record, layout)?;
        let decoder = VertexDecoder::new(layout, self.payload.endianness(), self.compressed_normals);

        read_indices(
            index_src,
            record.index_width,
            self.payload.endianness(),
            &mut self.scratch_indices,
        );
        match remap_indices(
            record.id,
            &self.scratch_indices,
            0,
            record.vertex_count,
            record.index_width,
            &mut self.scratch_bytes,
        ) {
            Ok(()) => {}
            Err(e @ MergeError::DecodeMismatch { .. }) => {
                warn!(
                    "{}: mesh {} unusable, dropping node {}: {e}",
                    self.payload.name(),
                    record.mesh_index,
                    record.id
                );
                self.meshes.insert(record.mesh_index, None);
                return Ok(None);
            }
            Err(e) => return Err(e),
        }

        let (vertex_range, dst) = self
            .vertices
            .reserve(decoder.output_len(record.vertex_count as usize))?;
        decoder.decode(vertex_src, dst, &NodeTransform::Identity);
        self.vertices.align()?;
        let index_range = self.indices.append(&self.scratch_bytes)?;
        self.indices.align()?;

        let slot = MeshSlot {
            vertex_range,
            index_range,
            vertex_count: record.vertex_count,
            index_count: self.scratch_indices.len() as u32,
            index_width: record.index_width,
        };
        self.meshes.insert(record.mesh_index, Some(slot));
        Ok(Some(slot))
    }

    fn descriptor(
        &self,
        record: &NodeRecord,
        slot: &MeshSlot,
        bbox: Aabb,
        kind: DrawableKind,
    ) -> DrawableDescriptor {
        let compressed = self
            .layouts
            .get(record.attribute as usize)
            .is_some_and(|l| l.is_compressed(self.compressed_normals));
        DrawableDescriptor {
            node: record.id,
            buffer: self.buffer(),
            vertex_range: slot.vertex_range,
            index_range: slot.index_range,
            index_width: slot.index_width,
            vertex_count: slot.vertex_count,
            index_count: slot.index_count,
            attribute_layout: record.attribute,
            compressed,
            material: record.material,
            layer: record.layer,
            bbox,
            identity: record.transform.is_none(),
            kind,
        }
    }

    /// Drawables assembled since the last drain.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Hand out pending drawables with the arena bytes written since the
    /// previous drain.
    pub fn drain_batch(&mut self) -> NodeBatch {
        let batch = NodeBatch {
            file_index: self.file_index,
            drawables: std::mem::take(&mut self.pending),
            vertex_block: self.vertices.drain_block(),
            index_block: self.indices.drain_block(),
        };
        trace!(
            "{}: batch of {} drawables, {} vertex / {} index bytes",
            self.payload.name(),
            batch.drawables.len(),
            batch.vertex_block.bytes.len(),
            batch.index_block.bytes.len()
        );
        self.stats.draw_calls_after += batch.drawables.len() as u64;
        batch
    }

    fn finish_stats(&mut self) -> MergeStats {
        self.stats.vertex_arena_bytes = self.vertices.cursor() as u64;
        self.stats.index_arena_bytes = self.indices.cursor() as u64;
        debug!(
            "{}: {} drawables, {} vertex / {} index bytes of {} / {}",
            self.payload.name(),
            self.stats.draw_calls_after,
            self.stats.vertex_arena_bytes,
            self.stats.index_arena_bytes,
            self.vertices.capacity(),
            self.indices.capacity()
        );
        std::mem::take(&mut self.stats)
    }

    /// Assemble `items`, handing a batch to `sink` every `batch_size`
    /// drawables and once more for the remainder.
    pub fn assemble_streaming<F>(
        mut self,
        items: &[PlanItem],
        batch_size: usize,
        mut sink: F,
    ) -> MergeResult<MergeStats>
    where
        F: FnMut(NodeBatch) -> MergeResult<()>,
    {
        for item in items {
            self.push(item)?;
            if self.pending.len() >= batch_size {
                sink(self.drain_batch())?;
            }
        }
        let last = self.drain_batch();
        if !last.drawables.is_empty() || !last.vertex_block.is_empty() || !last.index_block.is_empty() {
            sink(last)?;
        }
        Ok(self.finish_stats())
    }

    /// Assemble `items` into one batch holding the whole file.
    pub fn assemble_all(mut self, items: &[PlanItem]) -> MergeResult<(NodeBatch, MergeStats)> {
        for item in items {
            self.push(item)?;
        }
        let batch = self.drain_batch();
        Ok((batch, self.finish_stats()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::{group_by_material, GpuMemoryBudget, MergePlanner};
    use crate::scene::{BuiltScene, MeshSpec, SceneBuilder, SceneReader};
    use crate::Endianness;
    use glam::Vec3;

    struct Fixture {
        scene: BuiltScene,
        table: NodeTable,
        items: Vec<PlanItem>,
    }

    fn plan(builder: SceneBuilder, config: &MergeConfig) -> Fixture {
        let scene = builder.build();
        let reader = SceneReader::new(&scene.model_bin, Endianness::Little).unwrap();
        let mut table = NodeTable::from_reader(&reader, &scene.layouts).unwrap();
        let nodes: Vec<u32> = (0..table.len() as u32).collect();
        let grouping = group_by_material(&mut table, &nodes, config.max_vertices_per_group);
        let mut budget = GpuMemoryBudget::new(config.gpu_memory_budget);
        let plan = MergePlanner::new(config).plan(&mut table, &grouping, &mut budget).unwrap();
        Fixture {
            scene,
            table,
            items: plan.items,
        }
    }

    #[test]
    fn test_merged_chain_remaps_and_orders_by_region() {
        let mut builder = SceneBuilder::new(Endianness::Little);
        let layout = builder.add_layout([4, 0, -1, -1, 0, 0, 0, 0]).unwrap();
        let a = builder.add_mesh(0, MeshSpec::grid(layout, 3, IndexWidth::U8)).unwrap();
        let b = builder.add_mesh(0, MeshSpec::grid(layout, 4, IndexWidth::U8)).unwrap();
        builder.add_node(a, 0).with_region(2);
        builder
            .add_node(b, 0)
            .with_region(1)
            .with_translation(Vec3::new(0.0, 0.0, 10.0));
        let config = MergeConfig::default();
        let f = plan(builder, &config);
        let name = BuiltScene::file_name(0);

        let assembler = BufferAssembler::new(0, &name, &f.scene.files[0], &f.table, &f.scene.layouts, &config, &f.items);
        let (batch, stats) = assembler.assemble_all(&f.items).unwrap();
        assert_eq!(batch.drawables.len(), 1);
        assert_eq!(stats.dropped_nodes, 0);

        let d = &batch.drawables[0];
        assert_eq!(d.node, 1);
        assert_eq!(d.vertex_count, 7);
        assert_eq!(d.index_count, 6 + 3);
        assert_eq!(d.index_width, IndexWidth::U8);
        assert!(d.identity);
        let DrawableKind::Merged { members, visibility_range } = &d.kind else {
            panic!("expected merged drawable");
        };
        assert_eq!(members[0].node, 1);
        assert_eq!(members[1].first_vertex, 4);
        assert_eq!(members[1].first_index, 6);
        assert_eq!(visibility_range.length, 7);
        assert_eq!(visibility_range.offset, d.vertex_range.end());

        // second member's indices offset by the first member's 4 vertices
        let indices = &batch.index_block.bytes[d.index_range.offset as usize..d.index_range.end() as usize];
        assert_eq!(&indices[6..], &[4, 5, 6]);

        // first member was translated to z = 10
        let z = f32::from_le_bytes(batch.vertex_block.bytes[8..12].try_into().unwrap());
        assert_eq!(z, 10.0);
    }

    #[test]
    fn test_standalone_shares_mesh() {
        let mut builder = SceneBuilder::new(Endianness::Little);
        let layout = builder.add_layout([4, 0, -1, -1, 0, 0, 0, 0]).unwrap();
        let mesh = builder.add_mesh(0, MeshSpec::grid(layout, 6, IndexWidth::U16)).unwrap();
        builder.add_node(mesh, 0);
        builder.add_node(mesh, 1).with_translation(Vec3::X);
        let config = MergeConfig::default();
        let f = plan(builder, &config);
        let name = BuiltScene::file_name(0);

        let assembler = BufferAssembler::new(0, &name, &f.scene.files[0], &f.table, &f.scene.layouts, &config, &f.items);
        let (batch, _) = assembler.assemble_all(&f.items).unwrap();
        assert_eq!(batch.drawables.len(), 2);
        assert_eq!(batch.drawables[0].vertex_range, batch.drawables[1].vertex_range);
        assert!(batch.drawables.iter().any(|d| !d.identity));
        assert_eq!(batch.vertex_block.bytes.len(), 6 * 16);
    }

    #[test]
    fn test_corrupt_indices_drop_node() {
        let mut builder = SceneBuilder::new(Endianness::Little);
        let layout = builder.add_layout([4, -1, -1, -1, 0, 0, 0, 0]).unwrap();
        let good = builder.add_mesh(0, MeshSpec::grid(layout, 3, IndexWidth::U8)).unwrap();
        let bad = builder
            .add_mesh(
                0,
                MeshSpec::grid(layout, 3, IndexWidth::U8).with_indices(vec![0, 1, 7]),
            )
            .unwrap();
        builder.add_node(good, 0);
        builder.add_node(bad, 0);
        let config = MergeConfig::default();
        let f = plan(builder, &config);
        let name = BuiltScene::file_name(0);

        let assembler = BufferAssembler::new(0, &name, &f.scene.files[0], &f.table, &f.scene.layouts, &config, &f.items);
        let (batch, stats) = assembler.assemble_all(&f.items).unwrap();
        assert_eq!(stats.dropped_nodes, 1);
        assert_eq!(batch.drawables.len(), 1);
        assert_eq!(batch.drawables[0].nodes(), vec![0]);
        assert_eq!(batch.drawables[0].vertex_count, 3);
    }

    #[test]
    fn test_streaming_batches() {
        let mut builder = SceneBuilder::new(Endianness::Little);
        let layout = builder.add_layout([4, -1, -1, -1, 0, 0, 0, 0]).unwrap();
        for material in 0..7 {
            let mesh = builder.add_mesh(0, MeshSpec::grid(layout, 3, IndexWidth::U8)).unwrap();
            builder.add_node(mesh, material);
        }
        let config = MergeConfig::default();
        let f = plan(builder, &config);
        let name = BuiltScene::file_name(0);

        let assembler = BufferAssembler::new(0, &name, &f.scene.files[0], &f.table, &f.scene.layouts, &config, &f.items);
        let mut batches = Vec::new();
        let stats = assembler
            .assemble_streaming(&f.items, 3, |b| {
                batches.push(b);
                Ok(())
            })
            .unwrap();

        assert_eq!(batches.iter().map(|b| b.drawables.len()).collect::<Vec<_>>(), vec![3, 3, 1]);
        assert_eq!(stats.draw_calls_after, 7);
        let mut expected_base = 0;
        for batch in &batches {
            assert_eq!(batch.vertex_block.base, expected_base);
            expected_base += batch.vertex_block.bytes.len() as u64;
        }
    }

    #[test]
    fn test_malformed_payload() {
        let mut builder = SceneBuilder::new(Endianness::Little);
        let layout = builder.add_layout([4, -1, -1, -1, 0, 0, 0, 0]).unwrap();
        let mesh = builder.add_mesh(0, MeshSpec::grid(layout, 3, IndexWidth::U8)).unwrap();
        builder.add_node(mesh, 0);
        let config = MergeConfig::default();
        let f = plan(builder, &config);
        let name = BuiltScene::file_name(0);
        let truncated = &f.scene.files[0][..8];

        let assembler = BufferAssembler::new(0, &name, truncated, &f.table, &f.scene.layouts, &config, &f.items);
        assert!(matches!(
            assembler.assemble_all(&f.items),
            Err(MergeError::MalformedBinary { .. })
        ));
    }
}
