//! Per-thread state machine that plans and assembles one file at a time.

use std::sync::Arc;

use fixedbitset::FixedBitSet;
use log::{debug, warn};

use super::messages::{SessionMetadata, WorkerReply, WorkerRequest};
use crate::assemble::BufferAssembler;
use crate::error::{MergeError, MergeResult};
use crate::merge::{group_by_material, GpuMemoryBudget, MergePlan, MergePlanner, NodeTable};
use crate::scene::SceneReader;

/// A file that has been planned and is waiting for its payload.
struct PrimedFile {
    file_index: u16,
    file_name: String,
    plan: MergePlan,
}

enum State {
    Idle,
    Primed(PrimedFile),
    /// Planning failed and was reported; the payload is discarded.
    PrimeFailed(u16),
}

/// Handles [`WorkerRequest`]s in order, reporting through a reply callback.
pub struct Worker {
    id: usize,
    metadata: Option<Arc<SessionMetadata>>,
    state: State,
    /// Node table of the current session, parsed on the first prime.
    table: Option<NodeTable>,
    /// Files whose nodes have been grouped into `table`.
    planned: FixedBitSet,
}

impl Worker {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            metadata: None,
            state: State::Idle,
            table: None,
            planned: FixedBitSet::new(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Process one request. Returns `false` once the worker should exit.
    pub fn handle<F>(&mut self, request: WorkerRequest, mut reply: F) -> bool
    where
        F: FnMut(WorkerReply),
    {
        match request {
            WorkerRequest::Session(metadata) => {
                self.metadata = Some(metadata);
                self.state = State::Idle;
                self.table = None;
                self.planned.clear();
            }
            WorkerRequest::Prime {
                file_index,
                file_name,
            } => {
                if let State::Primed(previous) = &self.state {
                    warn!(
                        "worker {}: '{}' primed but never received its payload",
                        self.id, previous.file_name
                    );
                    reply(WorkerReply::Failed {
                        file_index: previous.file_index,
                        error: MergeError::Protocol(format!(
                            "'{}' superseded before its payload arrived",
                            previous.file_name
                        )),
                    });
                }
                self.state = match self.prime(file_index, file_name) {
                    Ok(primed) => State::Primed(primed),
                    Err(error) => {
                        reply(WorkerReply::Failed { file_index, error });
                        State::PrimeFailed(file_index)
                    }
                };
            }
            WorkerRequest::Payload { file_index, bytes } => {
                match std::mem::replace(&mut self.state, State::Idle) {
                    State::Primed(primed) if primed.file_index == file_index => {
                        match self.assemble(&primed, &bytes, &mut reply) {
                            Ok(stats) => reply(WorkerReply::Finished { file_index, stats }),
                            Err(error) => reply(WorkerReply::Failed { file_index, error }),
                        }
                    }
                    State::PrimeFailed(failed) if failed == file_index => {}
                    _ => reply(WorkerReply::Failed {
                        file_index,
                        error: MergeError::Protocol(format!(
                            "payload for file {file_index} arrived before it was primed"
                        )),
                    }),
                }
            }
            WorkerRequest::Shutdown => return false,
        }
        true
    }

    fn prime(&mut self, file_index: u16, file_name: String) -> MergeResult<PrimedFile> {
        let metadata = self
            .metadata
            .clone()
            .ok_or_else(|| MergeError::Protocol("file primed before session metadata".into()))?;

        let id = self.id;
        let table = self.table_for(&metadata, file_index)?;
        let nodes = table.file_nodes(file_index);
        let grouping = group_by_material(table, &nodes, metadata.config.max_vertices_per_group);
        let mut budget = GpuMemoryBudget::new(metadata.budget_for(file_index));
        let plan = MergePlanner::new(&metadata.config).plan(table, &grouping, &mut budget)?;

        debug!(
            "worker {id}: primed '{file_name}' with {} nodes, {} items",
            nodes.len(),
            plan.items.len()
        );
        Ok(PrimedFile {
            file_index,
            file_name,
            plan,
        })
    }

    /// The session's node table, ready to group `file_index`.
    ///
    /// Grouping links a file's nodes in place. Distinct files touch disjoint
    /// nodes and share one parse; a file primed again gets a fresh table.
    fn table_for(
        &mut self,
        metadata: &SessionMetadata,
        file_index: u16,
    ) -> MergeResult<&mut NodeTable> {
        let file = file_index as usize;
        if self.planned.contains(file) {
            self.table = None;
            self.planned.clear();
        }
        let table = match self.table.take() {
            Some(table) => table,
            None => {
                let reader = SceneReader::new(&metadata.model_bin, metadata.config.endianness)?;
                debug!("worker {}: parsing {} nodes", self.id, reader.node_count());
                NodeTable::from_reader(&reader, &metadata.layouts)?
            }
        };
        self.planned.grow(file + 1);
        self.planned.insert(file);
        Ok(self.table.insert(table))
    }

    fn assemble<F>(
        &self,
        primed: &PrimedFile,
        payload: &[u8],
        reply: &mut F,
    ) -> MergeResult<crate::MergeStats>
    where
        F: FnMut(WorkerReply),
    {
        let metadata = self
            .metadata
            .as_ref()
            .ok_or_else(|| MergeError::Protocol("payload before session metadata".into()))?;
        let table = self
            .table
            .as_ref()
            .ok_or_else(|| MergeError::Protocol("payload before its node table".into()))?;

        let assembler = BufferAssembler::new(
            primed.file_index,
            &primed.file_name,
            payload,
            table,
            &metadata.layouts,
            &metadata.config,
            &primed.plan.items,
        );
        let assembly = assembler.assemble_streaming(
            &primed.plan.items,
            metadata.config.batch_size,
            |batch| {
                reply(WorkerReply::Batch {
                    file_index: primed.file_index,
                    batch,
                });
                Ok(())
            },
        )?;
        Ok(primed.plan.stats.clone().with_assembly(&assembly))
    }
}
