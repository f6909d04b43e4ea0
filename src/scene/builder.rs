//! Synthesise `model.bin`, attribute tables and mesh-bin payloads.
//!
//! Used by tests and benchmarks, and by tooling that generates scenes
//! without an exporter.
//!
//! # Example
//!
//! ```ignore
//! let mut builder = SceneBuilder::new(Endianness::Little);
//! let layout = builder.add_layout([4, 0, -1, -1, 0, 0, 0, 0])?;
//! let cube = builder.add_mesh(0, MeshSpec::unit_cube(layout, IndexWidth::U16))?;
//! builder.add_node(cube, 0).with_translation(Vec3::X * 2.0);
//! let scene = builder.build();
//! ```

use glam::{Affine3A, Vec2, Vec3};

use super::bytes::{encode_u16, encode_u32};
use super::layout::{AttributeLayout, AttributeSemantic, ComponentType};
use super::reader::{MESH_RECORD_WORDS, NODE_RECORD_WORDS};
use super::types::{IndexWidth, NodeFlags};
use crate::error::{MergeError, MergeResult};
use crate::math::Aabb;
use crate::Endianness;

/// Geometry of one mesh before encoding.
#[derive(Debug, Clone)]
pub struct MeshSpec {
    pub layout: u8,
    pub index_width: IndexWidth,
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub uvs: Vec<Vec2>,
    pub colors: Vec<[u8; 4]>,
    pub indices: Vec<u32>,
}

impl MeshSpec {
    pub fn new(layout: u8, index_width: IndexWidth) -> Self {
        Self {
            layout,
            index_width,
            positions: Vec::new(),
            normals: Vec::new(),
            uvs: Vec::new(),
            colors: Vec::new(),
            indices: Vec::new(),
        }
    }

    /// Append a vertex. Channels the layout lacks are ignored at encode time.
    pub fn with_vertex(mut self, position: Vec3, normal: Vec3) -> Self {
        self.positions.push(position);
        self.normals.push(normal);
        self
    }

    pub fn with_uvs(mut self, uvs: Vec<Vec2>) -> Self {
        self.uvs = uvs;
        self
    }

    pub fn with_colors(mut self, colors: Vec<[u8; 4]>) -> Self {
        self.colors = colors;
        self
    }

    pub fn with_indices(mut self, indices: Vec<u32>) -> Self {
        self.indices = indices;
        self
    }

    /// A strip of `vertex_count` vertices along +x with a fan of triangles.
    pub fn grid(layout: u8, vertex_count: u32, index_width: IndexWidth) -> Self {
        let mut spec = Self::new(layout, index_width);
        for i in 0..vertex_count {
            spec.positions
                .push(Vec3::new(i as f32, (i % 2) as f32, 0.0));
            spec.normals.push(Vec3::Z);
            spec.uvs.push(Vec2::new(i as f32 / vertex_count.max(1) as f32, 0.0));
            spec.colors.push([255, (i % 256) as u8, 0, 255]);
        }
        for i in 2..vertex_count {
            spec.indices.extend([i - 2, i - 1, i]);
        }
        spec
    }

    /// Axis-aligned cube spanning (0,0,0)..(1,1,1), eight shared vertices.
    pub fn unit_cube(layout: u8, index_width: IndexWidth) -> Self {
        let mut spec = Self::new(layout, index_width);
        for i in 0..8u32 {
            let p = Vec3::new((i & 1) as f32, ((i >> 1) & 1) as f32, ((i >> 2) & 1) as f32);
            spec.positions.push(p);
            spec.normals.push((p - Vec3::splat(0.5)).normalize());
            spec.uvs.push(Vec2::new(p.x, p.y));
            spec.colors.push([128, 128, 128, 255]);
        }
        spec.indices = vec![
            0, 1, 3, 0, 3, 2, 4, 6, 7, 4, 7, 5, 0, 4, 5, 0, 5, 1, 2, 3, 7, 2, 7, 6, 0, 2, 6, 0, 6,
            4, 1, 5, 7, 1, 7, 3,
        ];
        spec
    }

    pub fn vertex_count(&self) -> u32 {
        self.positions.len() as u32
    }

    fn bounds(&self) -> Aabb {
        let mut b = Aabb::EMPTY;
        for p in &self.positions {
            b.extend(*p);
        }
        b
    }
}

/// A node being assembled by [`SceneBuilder::add_node`].
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub mesh: u32,
    pub material: u16,
    pub layer: u16,
    pub flags: NodeFlags,
    pub transform: Affine3A,
    pub bbox: Option<Aabb>,
}

impl NodeSpec {
    pub fn with_layer(&mut self, layer: u16) -> &mut Self {
        self.layer = layer;
        self
    }

    pub fn with_region(&mut self, region: u8) -> &mut Self {
        self.flags.region = region & 0x0f;
        self
    }

    pub fn with_billboard(&mut self) -> &mut Self {
        self.flags.billboard = true;
        self
    }

    pub fn with_translation(&mut self, translation: Vec3) -> &mut Self {
        self.with_transform(Affine3A::from_translation(translation))
    }

    /// Set a world transform. Clears the identity flag.
    pub fn with_transform(&mut self, transform: Affine3A) -> &mut Self {
        self.transform = transform;
        self.flags.identity = false;
        self
    }

    /// Override the stored bbox instead of deriving it from the mesh.
    pub fn with_bbox(&mut self, bbox: Aabb) -> &mut Self {
        self.bbox = Some(bbox);
        self
    }
}

/// Encoded output of [`SceneBuilder::build`].
#[derive(Debug, Clone, Default)]
pub struct BuiltScene {
    pub model_bin: Vec<u8>,
    pub attribute_table: Vec<u8>,
    pub layouts: Vec<AttributeLayout>,
    /// Mesh-bin payloads by file index.
    pub files: Vec<Vec<u8>>,
}

impl BuiltScene {
    /// Conventional name of mesh-bin `index`.
    pub fn file_name(index: usize) -> String {
        format!("mesh{index}.bin")
    }
}

struct PendingMesh {
    file_index: u16,
    spec: MeshSpec,
    vertex_offset: u32,
    vertex_bytes: u32,
    index_offset: u32,
    index_bytes: u32,
}

/// Writes scenes in the binary layout [`super::SceneReader`] expects.
pub struct SceneBuilder {
    endianness: Endianness,
    layouts: Vec<AttributeLayout>,
    meshes: Vec<PendingMesh>,
    nodes: Vec<NodeSpec>,
    files: Vec<Vec<u8>>,
}

impl SceneBuilder {
    pub fn new(endianness: Endianness) -> Self {
        Self {
            endianness,
            layouts: Vec::new(),
            meshes: Vec::new(),
            nodes: Vec::new(),
            files: Vec::new(),
        }
    }

    /// Register an attribute descriptor; returns its layout id.
    pub fn add_layout(&mut self, descriptor: [i8; 8]) -> MergeResult<u8> {
        let id = u8::try_from(self.layouts.len()).map_err(|_| {
            MergeError::malformed("attribute table", "more than 256 layouts registered")
        })?;
        self.layouts.push(AttributeLayout::from_descriptor(id, descriptor)?);
        Ok(id)
    }

    /// Encode `spec` into mesh-bin `file_index`; returns the mesh index.
    ///
    /// Fails if `spec.layout` was never registered.
    pub fn add_mesh(&mut self, file_index: u16, spec: MeshSpec) -> MergeResult<u32> {
        let layout = self.layouts.get(spec.layout as usize).ok_or_else(|| {
            MergeError::malformed(
                BuiltScene::file_name(file_index as usize),
                format!("layout {} is not registered", spec.layout),
            )
        })?;
        let endianness = self.endianness;

        let file = file_index as usize;
        if self.files.len() <= file {
            self.files.resize_with(file + 1, Vec::new);
        }
        let payload = &mut self.files[file];

        pad4(payload);
        let vertex_offset = payload.len() as u32;
        for i in 0..spec.positions.len() {
            encode_vertex(payload, layout, &spec, i, endianness);
        }
        let vertex_bytes = payload.len() as u32 - vertex_offset;

        pad4(payload);
        let index_offset = payload.len() as u32;
        for &index in &spec.indices {
            match spec.index_width {
                IndexWidth::U8 => payload.push(index as u8),
                IndexWidth::U16 => payload.extend(encode_u16(index as u16, endianness)),
                IndexWidth::U32 => payload.extend(encode_u32(index, endianness)),
            }
        }
        let index_bytes = payload.len() as u32 - index_offset;

        self.meshes.push(PendingMesh {
            file_index,
            spec,
            vertex_offset,
            vertex_bytes,
            index_offset,
            index_bytes,
        });
        Ok(self.meshes.len() as u32 - 1)
    }

    /// Add an identity-transform node; refine it through the returned spec.
    pub fn add_node(&mut self, mesh: u32, material: u16) -> &mut NodeSpec {
        self.nodes.push(NodeSpec {
            mesh,
            material,
            layer: 0,
            flags: NodeFlags {
                identity: true,
                mergeable: true,
                ..NodeFlags::default()
            },
            transform: Affine3A::IDENTITY,
            bbox: None,
        });
        let last = self.nodes.len() - 1;
        &mut self.nodes[last]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn build(self) -> BuiltScene {
        let e = self.endianness;
        let mut model = Vec::with_capacity(
            8 + (self.meshes.len() * MESH_RECORD_WORDS + self.nodes.len() * NODE_RECORD_WORDS) * 4,
        );
        model.extend(encode_u32(self.meshes.len() as u32, e));
        model.extend(encode_u32(self.nodes.len() as u32, e));

        for mesh in &self.meshes {
            let packed = mesh.spec.index_width.bytes()
                | (mesh.spec.layout as u32) << 8
                | (mesh.file_index as u32) << 16;
            for word in [
                packed,
                mesh.vertex_offset,
                mesh.vertex_bytes,
                mesh.index_offset,
                mesh.index_bytes,
            ] {
                model.extend(encode_u32(word, e));
            }
        }

        for node in &self.nodes {
            let bbox = node.bbox.unwrap_or_else(|| {
                self.meshes
                    .get(node.mesh as usize)
                    .map(|m| m.spec.bounds().transformed(&node.transform))
                    .unwrap_or_default()
            });
            model.extend(encode_u32(
                node.material as u32 | (node.layer as u32) << 16,
                e,
            ));
            model.extend(encode_u32(node.mesh, e));
            model.extend(encode_u32(node.flags.to_bits(), e));
            for v in bbox.to_array() {
                model.extend(encode_u32(v.to_bits(), e));
            }
            for v in transform_to_array(&node.transform) {
                model.extend(encode_u32(v.to_bits(), e));
            }
        }

        let attribute_table = self
            .layouts
            .iter()
            .flat_map(|l| l.descriptor().map(|v| v as u8))
            .collect();

        BuiltScene {
            model_bin: model,
            attribute_table,
            layouts: self.layouts,
            files: self.files,
        }
    }
}

/// Column-major 3x4 array of an affine transform.
pub fn transform_to_array(t: &Affine3A) -> [f32; 12] {
    t.to_cols_array()
}

fn pad4(buf: &mut Vec<u8>) {
    while buf.len() % 4 != 0 {
        buf.push(0);
    }
}

fn encode_vertex(
    out: &mut Vec<u8>,
    layout: &AttributeLayout,
    spec: &MeshSpec,
    i: usize,
    e: Endianness,
) {
    for attribute in &layout.attributes {
        let values: [f32; 4] = match attribute.semantic {
            AttributeSemantic::Position => spec.positions[i].extend(0.0).to_array(),
            AttributeSemantic::Normal => {
                let n = spec.normals.get(i).copied().unwrap_or(Vec3::Z);
                let scale = match attribute.component {
                    ComponentType::I8 => 127.0,
                    ComponentType::I16 => 32767.0,
                    _ => 1.0,
                };
                let n = n * scale;
                let n = if attribute.component == ComponentType::F32 {
                    n
                } else {
                    n.round()
                };
                n.extend(0.0).to_array()
            }
            AttributeSemantic::TexCoord => {
                let uv = spec.uvs.get(i).copied().unwrap_or(Vec2::ZERO);
                [uv.x, uv.y, 0.0, 0.0]
            }
            AttributeSemantic::Color => spec
                .colors
                .get(i)
                .copied()
                .unwrap_or([255; 4])
                .map(|c| c as f32),
        };
        for v in &values[..attribute.components as usize] {
            encode_component(out, attribute.component, *v, e);
        }
    }
}

fn encode_component(out: &mut Vec<u8>, component: ComponentType, v: f32, e: Endianness) {
    match component {
        ComponentType::I8 => out.push(v as i8 as u8),
        ComponentType::U8 => out.push(v as u8),
        ComponentType::I16 => out.extend(encode_u16(v as i16 as u16, e)),
        ComponentType::U16 => out.extend(encode_u16(v as u16, e)),
        ComponentType::I32 => out.extend(encode_u32(v as i32 as u32, e)),
        ComponentType::U32 => out.extend(encode_u32(v as u32, e)),
        ComponentType::F32 => out.extend(encode_u32(v.to_bits(), e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::SceneReader;

    #[test]
    fn test_build_layout() {
        let mut builder = SceneBuilder::new(Endianness::Little);
        let layout = builder.add_layout([4, 0, 7, 1, 0, 0, 0, 0]).unwrap();
        let a = builder.add_mesh(0, MeshSpec::unit_cube(layout, IndexWidth::U8)).unwrap();
        let b = builder.add_mesh(1, MeshSpec::grid(layout, 5, IndexWidth::U16)).unwrap();
        builder.add_node(a, 1);
        builder.add_node(b, 2);
        let scene = builder.build();

        assert_eq!(scene.files.len(), 2);
        assert_eq!(scene.attribute_table.len(), 8);
        // position 12 + normal 4 + uv 8 + color 4
        assert_eq!(scene.files[0].len(), 8 * 28 + 36);

        let reader = SceneReader::new(&scene.model_bin, Endianness::Little).unwrap();
        let mesh = reader.read_mesh(b).unwrap();
        assert_eq!(mesh.file_index, 1);
        assert_eq!(mesh.vertex_bytes, 5 * 28);
        assert_eq!(mesh.index_count(), 9);
    }

    #[test]
    fn test_bad_layouts_are_errors() {
        let mut builder = SceneBuilder::new(Endianness::Little);
        // 32-bit integer normals are not a supported channel
        assert!(matches!(
            builder.add_layout([4, 4, -1, -1, 0, 0, 0, 0]),
            Err(MergeError::MalformedBinary { .. })
        ));
        let err = builder
            .add_mesh(2, MeshSpec::grid(3, 4, IndexWidth::U16))
            .unwrap_err();
        assert!(matches!(
            err,
            MergeError::MalformedBinary { ref file, .. } if file == "mesh2.bin"
        ));
        assert!(builder.build().files.is_empty());
    }

    #[test]
    fn test_bbox_follows_transform() {
        let mut builder = SceneBuilder::new(Endianness::Little);
        let layout = builder.add_layout([4, -1, -1, -1, 0, 0, 0, 0]).unwrap();
        let cube = builder.add_mesh(0, MeshSpec::unit_cube(layout, IndexWidth::U8)).unwrap();
        builder
            .add_node(cube, 0)
            .with_translation(Vec3::new(10.0, 0.0, 0.0));
        let scene = builder.build();

        let reader = SceneReader::new(&scene.model_bin, Endianness::Little).unwrap();
        let bbox = reader.read_node_bbox(0).unwrap();
        assert_eq!(bbox.min, Vec3::new(10.0, 0.0, 0.0));
        assert_eq!(bbox.max, Vec3::new(11.0, 1.0, 1.0));
    }
}
