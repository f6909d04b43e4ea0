//! Mesh-bin merge engine - consolidates thousands of small per-node meshes
//! into shared vertex/index buffers under a hard GPU memory ceiling.
//!
//! Loading a scene runs one pipeline per physical mesh-bin file:
//!
//! - **scene**: pure accessors over the binary node/mesh/transform/bbox tables
//! - **merge**: groups nodes into merge chains and plans which chains merge
//!   (cheap merges first, then a 0/1 knapsack over the remaining budget)
//! - **decode**: decompresses quantized vertices/indices and bakes node transforms
//! - **assemble**: packs decoded bytes into per-file arenas and emits drawables
//! - **worker**: runs the same pipeline per file on isolated worker threads
//!
//! The engine never talks to a graphics API. Finished byte blocks go to a
//! [`ResourceManager`] collaborator and drawables are handed back to the caller.
//!
//! # Example
//!
//! ```ignore
//! use meshbin_merge::{LoadSession, MergeConfig};
//!
//! let config = MergeConfig::default().with_gpu_memory_budget(512 * 1024 * 1024);
//! let session = LoadSession::new(config, &model_bin, layouts)?;
//! let output = session.load_sync(&files, &resources)?;
//! println!("{} drawables", output.drawables.len());
//! ```

pub mod assemble;
pub mod decode;
pub mod error;
pub mod math;
pub mod merge;
pub mod scene;
pub mod session;
pub mod stats;
pub mod worker;

pub use assemble::{
    BufferKind, BufferRef, DrawableDescriptor, DrawableKind, InMemoryResourceManager, NodeBatch,
    ResourceManager,
};
pub use error::{MergeError, MergeResult};
pub use math::Aabb;
pub use scene::{AttributeLayout, SceneBuilder, SceneReader};
pub use session::{FileInput, LoadOutput, LoadSession};
pub use stats::MergeStats;
pub use worker::{OrchestratorHandle, WorkerOrchestrator};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Byte order of the input binaries. Output arenas are always little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endianness {
    #[default]
    Little,
    Big,
}

/// Session configuration for a load.
#[derive(Debug, Clone)]
pub struct MergeConfig {
    /// GPU memory ceiling in bytes. Also the planner's starting budget.
    pub gpu_memory_budget: u64,
    /// Maximum vertices a single merge chain may hold.
    pub max_vertices_per_group: u32,
    /// Chains whose extra memory cost is below this commit unconditionally.
    pub cheap_merge_threshold: u64,
    /// Byte order of `model.bin` and the mesh-bin payloads.
    pub endianness: Endianness,
    /// Pack 8-bit normals into the low bytes of the position floats.
    pub compressed_normals: bool,
    /// Drawables per streamed batch.
    pub batch_size: usize,
    /// Upper bound on knapsack capacity buckets.
    pub max_knapsack_buckets: usize,
    /// Turn rejected same-mesh chains into instanced drawables.
    pub instancing: bool,
    /// Worker threads used by the parallel mode.
    pub max_workers: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            gpu_memory_budget: 1024 * 1024 * 1024,
            max_vertices_per_group: 65536,
            cheap_merge_threshold: 128_000,
            endianness: Endianness::Little,
            compressed_normals: false,
            batch_size: 50,
            max_knapsack_buckets: 262_144,
            instancing: false,
            max_workers: std::thread::available_parallelism().map_or(1, |n| n.get()),
        }
    }
}

impl MergeConfig {
    /// Set the GPU memory budget in bytes.
    pub fn with_gpu_memory_budget(mut self, bytes: u64) -> Self {
        self.gpu_memory_budget = bytes;
        self
    }

    /// Set the per-chain vertex ceiling.
    pub fn with_max_vertices_per_group(mut self, vertices: u32) -> Self {
        self.max_vertices_per_group = vertices;
        self
    }

    /// Set the cheap-merge threshold in bytes.
    pub fn with_cheap_merge_threshold(mut self, bytes: u64) -> Self {
        self.cheap_merge_threshold = bytes;
        self
    }

    /// Set the input byte order.
    pub fn with_endianness(mut self, endianness: Endianness) -> Self {
        self.endianness = endianness;
        self
    }

    /// Enable or disable compressed normals.
    pub fn with_compressed_normals(mut self, enabled: bool) -> Self {
        self.compressed_normals = enabled;
        self
    }

    /// Set the streamed batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the knapsack bucket bound.
    pub fn with_max_knapsack_buckets(mut self, buckets: usize) -> Self {
        self.max_knapsack_buckets = buckets;
        self
    }

    /// Enable the instancing fallback for rejected chains.
    pub fn with_instancing(mut self, enabled: bool) -> Self {
        self.instancing = enabled;
        self
    }

    /// Set the worker thread count for the parallel mode.
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    /// Check the configuration for values the pipeline cannot work with.
    pub fn validate(&self) -> MergeResult<()> {
        if self.batch_size == 0 {
            return Err(MergeError::InvalidConfig("batch_size must be > 0".into()));
        }
        if self.max_vertices_per_group == 0 {
            return Err(MergeError::InvalidConfig(
                "max_vertices_per_group must be > 0".into(),
            ));
        }
        if self.max_knapsack_buckets == 0 {
            return Err(MergeError::InvalidConfig(
                "max_knapsack_buckets must be > 0".into(),
            ));
        }
        if self.max_workers == 0 {
            return Err(MergeError::InvalidConfig("max_workers must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_default_config() {
        let config = MergeConfig::default();
        assert_eq!(config.max_vertices_per_group, 65536);
        assert_eq!(config.cheap_merge_threshold, 128_000);
        assert_eq!(config.batch_size, 50);
        assert!(!config.instancing);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let config = MergeConfig::default().with_batch_size(0);
        assert!(matches!(
            config.validate(),
            Err(MergeError::InvalidConfig(_))
        ));
    }
}
