//! Requests and replies exchanged with worker threads.
//!
//! Every request and reply owns its data. Workers share nothing with the
//! dispatcher except the immutable [`SessionMetadata`].

use std::sync::Arc;

use crate::assemble::NodeBatch;
use crate::error::MergeError;
use crate::scene::AttributeLayout;
use crate::stats::MergeStats;
use crate::MergeConfig;

/// Read-only state every worker needs to plan a file on its own.
#[derive(Debug, Clone)]
pub struct SessionMetadata {
    pub config: MergeConfig,
    pub layouts: Vec<AttributeLayout>,
    /// Budget slice per file index.
    pub budget_slices: Vec<u64>,
    /// The whole `model.bin` blob.
    pub model_bin: Arc<[u8]>,
}

impl SessionMetadata {
    /// Budget slice of a file. Files outside the table get nothing.
    pub fn budget_for(&self, file_index: u16) -> u64 {
        self.budget_slices
            .get(file_index as usize)
            .copied()
            .unwrap_or(0)
    }
}

/// Dispatcher to worker.
#[derive(Debug)]
pub enum WorkerRequest {
    /// Install session metadata. Sent once, before any file.
    Session(Arc<SessionMetadata>),
    /// Plan a file. Its payload follows in the next request.
    Prime { file_index: u16, file_name: String },
    /// Raw bytes of the primed file.
    Payload { file_index: u16, bytes: Vec<u8> },
    Shutdown,
}

/// Worker to dispatcher.
///
/// Exactly one of [`WorkerReply::Finished`] or [`WorkerReply::Failed`] ends
/// each file; any number of batches may precede it.
#[derive(Debug)]
pub enum WorkerReply {
    Batch { file_index: u16, batch: NodeBatch },
    Finished { file_index: u16, stats: MergeStats },
    Failed { file_index: u16, error: MergeError },
}

impl WorkerReply {
    pub fn file_index(&self) -> u16 {
        match self {
            Self::Batch { file_index, .. }
            | Self::Finished { file_index, .. }
            | Self::Failed { file_index, .. } => *file_index,
        }
    }

    /// Whether this reply closes its file.
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Batch { .. })
    }
}
