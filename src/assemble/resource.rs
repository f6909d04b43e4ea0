//! Resource manager collaborator that owns the GPU-side buffers.

use std::collections::HashMap;

use parking_lot::Mutex;

use super::descriptor::{BufferKind, BufferRef, NodeBatch};

/// Opaque handle to a buffer owned by a [`ResourceManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u64);

/// Receives finished arena blocks. Implementations create the actual GPU
/// buffers; the merge pipeline never does.
pub trait ResourceManager: Send + Sync {
    /// Handle of the buffer backing `buffer`/`kind`, created on first use.
    fn buffer_for(&self, buffer: BufferRef, kind: BufferKind) -> BufferHandle;

    /// Write `bytes` at absolute `offset`.
    fn upload(&self, handle: BufferHandle, offset: u64, bytes: &[u8]);

    /// Upload both arena blocks of a batch.
    fn upload_batch(&self, batch: &NodeBatch) {
        for (kind, block) in [
            (BufferKind::Vertex, &batch.vertex_block),
            (BufferKind::Index, &batch.index_block),
        ] {
            if block.is_empty() {
                continue;
            }
            let handle = self.buffer_for(batch.buffer(), kind);
            self.upload(handle, block.base, &block.bytes);
        }
    }
}

#[derive(Default)]
struct Buffers {
    handles: HashMap<(BufferRef, BufferKind), BufferHandle>,
    data: Vec<Vec<u8>>,
}

/// Keeps every buffer in host memory. For tests and headless tooling.
#[derive(Default)]
pub struct InMemoryResourceManager {
    buffers: Mutex<Buffers>,
}

impl InMemoryResourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of a buffer's contents, if it was ever created.
    pub fn contents(&self, buffer: BufferRef, kind: BufferKind) -> Option<Vec<u8>> {
        let buffers = self.buffers.lock();
        let handle = buffers.handles.get(&(buffer, kind))?;
        buffers.data.get(handle.0 as usize).cloned()
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.lock().data.len()
    }
}

impl ResourceManager for InMemoryResourceManager {
    fn buffer_for(&self, buffer: BufferRef, kind: BufferKind) -> BufferHandle {
        let mut buffers = self.buffers.lock();
        if let Some(handle) = buffers.handles.get(&(buffer, kind)) {
            return *handle;
        }
        let handle = BufferHandle(buffers.data.len() as u64);
        buffers.data.push(Vec::new());
        buffers.handles.insert((buffer, kind), handle);
        handle
    }

    fn upload(&self, handle: BufferHandle, offset: u64, bytes: &[u8]) {
        let mut buffers = self.buffers.lock();
        let Some(data) = buffers.data.get_mut(handle.0 as usize) else {
            log::warn!("upload to unknown buffer {handle:?} ignored");
            return;
        };
        let start = offset as usize;
        let end = start + bytes.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::arena::ArenaBlock;

    #[test]
    fn test_handles_are_stable() {
        let rm = InMemoryResourceManager::new();
        let a = rm.buffer_for(BufferRef { file_index: 0 }, BufferKind::Vertex);
        let b = rm.buffer_for(BufferRef { file_index: 0 }, BufferKind::Index);
        assert_ne!(a, b);
        assert_eq!(
            rm.buffer_for(BufferRef { file_index: 0 }, BufferKind::Vertex),
            a
        );
        assert_eq!(rm.buffer_count(), 2);
    }

    #[test]
    fn test_upload_batches_out_of_order() {
        let rm = InMemoryResourceManager::new();
        let buffer = BufferRef { file_index: 3 };
        let second = NodeBatch {
            file_index: 3,
            vertex_block: ArenaBlock {
                base: 4,
                bytes: vec![5, 6, 7, 8],
            },
            ..Default::default()
        };
        let first = NodeBatch {
            file_index: 3,
            vertex_block: ArenaBlock {
                base: 0,
                bytes: vec![1, 2, 3, 4],
            },
            ..Default::default()
        };
        rm.upload_batch(&second);
        rm.upload_batch(&first);

        assert_eq!(
            rm.contents(buffer, BufferKind::Vertex),
            Some(vec![1, 2, 3, 4, 5, 6, 7, 8])
        );
        assert_eq!(rm.contents(buffer, BufferKind::Index), None);
    }
}
