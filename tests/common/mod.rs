//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use meshbin_merge::assemble::{BufferKind, BufferRef, DrawableDescriptor, InMemoryResourceManager};
use meshbin_merge::scene::BuiltScene;
use meshbin_merge::{FileInput, LoadOutput, LoadSession, MergeConfig, MergeResult};

/// Position only, 8-bit normals, no uv or color.
pub const POSITION_NORMAL_I8: [i8; 8] = [4, 0, -1, -1, 0, 0, 0, 0];

/// Position and float normals.
pub const POSITION_NORMAL_F32: [i8; 8] = [4, 7, -1, -1, 0, 0, 0, 0];

/// Position, 16-bit normals, float uvs and byte colors.
pub const FULL_VERTEX: [i8; 8] = [4, 2, 7, 1, 0, 0, 0, 0];

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn inputs(scene: &BuiltScene) -> Vec<FileInput> {
    scene
        .files
        .iter()
        .enumerate()
        .map(|(i, bytes)| FileInput::new(i as u16, BuiltScene::file_name(i), bytes.clone()))
        .collect()
}

pub fn session<'a>(scene: &'a BuiltScene, config: MergeConfig) -> LoadSession<'a> {
    match LoadSession::new(config, &scene.model_bin, scene.layouts.clone()) {
        Ok(session) => session,
        Err(e) => panic!("session rejected: {e}"),
    }
}

pub fn load_sync(
    scene: &BuiltScene,
    config: MergeConfig,
) -> MergeResult<(LoadOutput, InMemoryResourceManager)> {
    let resources = InMemoryResourceManager::new();
    let output = session(scene, config).load_sync(&inputs(scene), &resources)?;
    Ok((output, resources))
}

pub fn load_parallel(
    scene: &BuiltScene,
    config: MergeConfig,
    files: Vec<FileInput>,
) -> MergeResult<(LoadOutput, InMemoryResourceManager)> {
    let resources = InMemoryResourceManager::new();
    let output = session(scene, config).load_parallel(files, &resources)?;
    Ok((output, resources))
}

/// Vertex bytes of a drawable as uploaded.
pub fn vertex_bytes(resources: &InMemoryResourceManager, drawable: &DrawableDescriptor) -> Vec<u8> {
    let buffer = resources
        .contents(drawable.buffer, BufferKind::Vertex)
        .expect("vertex buffer uploaded");
    let range = drawable.vertex_range;
    buffer[range.offset as usize..range.end() as usize].to_vec()
}

/// Indices of a drawable as uploaded, widened to u32.
pub fn indices(resources: &InMemoryResourceManager, drawable: &DrawableDescriptor) -> Vec<u32> {
    let buffer = resources
        .contents(drawable.buffer, BufferKind::Index)
        .expect("index buffer uploaded");
    let range = drawable.index_range;
    let bytes = &buffer[range.offset as usize..range.end() as usize];
    match drawable.index_width.bytes() {
        1 => bytes.iter().map(|&b| b as u32).collect(),
        2 => bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]) as u32)
            .collect(),
        _ => bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    }
}

pub fn read_f32(bytes: &[u8], offset: usize) -> f32 {
    f32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

pub fn whole_buffer(resources: &InMemoryResourceManager, file_index: u16, kind: BufferKind) -> Vec<u8> {
    resources
        .contents(BufferRef { file_index }, kind)
        .unwrap_or_default()
}
