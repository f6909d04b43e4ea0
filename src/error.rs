//! Error types for the merge pipeline.

use thiserror::Error;

/// Errors that can occur while loading and merging a mesh-bin scene.
///
/// Session-aborting conditions are reported through [`MergeError::is_fatal`].
/// Per-node problems ([`MergeError::DecodeMismatch`]) are recovered by the
/// pipeline itself and only surface in logs and [`crate::MergeStats`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MergeError {
    /// The unmerged mesh data alone exceeds the GPU memory ceiling.
    #[error("mesh data needs {required} bytes but the GPU memory ceiling is {ceiling} bytes")]
    FatalCapacity {
        /// Sum of every mesh's vertex and index bytes.
        required: u64,
        /// Configured ceiling.
        ceiling: u64,
    },

    /// The budget went negative before any optional merge was considered.
    #[error("GPU memory budget of {budget} bytes cannot hold the mandatory {required} bytes")]
    PlannerInfeasible {
        /// Budget the planner started with.
        budget: u64,
        /// Bytes charged by standalone meshes and cheap merges.
        required: u64,
    },

    /// A remapped index does not fit the chain's index width.
    #[error("node {node}: index value {value} does not fit {width}-byte indices")]
    DecodeMismatch {
        /// Node whose indices failed to decode.
        node: u32,
        /// Offending index value after remapping.
        value: u64,
        /// Target index width in bytes.
        width: u8,
    },

    /// Offsets or table sizes point outside the supplied bytes.
    #[error("malformed binary '{file}': {reason}")]
    MalformedBinary {
        /// Name of the blob being read.
        file: String,
        /// What was out of range.
        reason: String,
    },

    /// A write would overrun an arena's precomputed capacity.
    #[error("arena overflow in '{file}': {requested} bytes at cursor {cursor} exceed capacity {capacity}")]
    ArenaOverflow {
        /// Arena owner.
        file: String,
        /// Write cursor before the failing write.
        cursor: usize,
        /// Size of the failing write.
        requested: usize,
        /// Precomputed capacity.
        capacity: usize,
    },

    /// The orchestrator was cancelled before this file was issued.
    #[error("file '{file}' was cancelled before it was issued")]
    Cancelled {
        /// File that never started.
        file: String,
    },

    /// A worker thread went away without sending its finished sentinel.
    #[error("worker for '{file}' stopped without finishing")]
    WorkerLost {
        /// File the worker was processing.
        file: String,
    },

    /// A worker received requests out of order.
    #[error("worker protocol violation: {0}")]
    Protocol(String),

    /// Configuration rejected by [`crate::MergeConfig::validate`].
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl MergeError {
    /// Create a malformed-binary error.
    pub fn malformed(file: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedBinary {
            file: file.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error aborts the whole session.
    ///
    /// In the parallel mode a [`MergeError::MalformedBinary`] only aborts the
    /// affected file; the synchronous mode escalates it itself.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::FatalCapacity { .. }
                | Self::PlannerInfeasible { .. }
                | Self::ArenaOverflow { .. }
                | Self::InvalidConfig(_)
        )
    }
}

/// Result type for merge operations.
pub type MergeResult<T> = Result<T, MergeError>;
