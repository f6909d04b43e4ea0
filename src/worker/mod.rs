//! Parallel per-file pipeline.
//!
//! Each mesh-bin file is planned against its own budget slice and assembled
//! on a worker thread. Batches stream back through the dispatcher as they
//! are produced.

pub mod messages;
pub mod orchestrator;
#[allow(clippy::module_inception)]
pub mod worker;

pub use messages::{SessionMetadata, WorkerReply, WorkerRequest};
pub use orchestrator::{OrchestratorHandle, WorkerOrchestrator};
pub use worker::Worker;
