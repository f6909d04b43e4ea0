//! Load sessions: the entry point that ties scene reading, planning and
//! assembly together.
//!
//! A session runs in one of two modes:
//!
//! - [`LoadSession::load_sync`] plans every node against the whole budget on
//!   the calling thread, then assembles file by file. Any error aborts.
//! - [`LoadSession::load_parallel`] splits the budget into static per-file
//!   slices and runs each file on a worker thread. A broken or missing file
//!   is reported in [`LoadOutput::failed_files`] while the others load;
//!   fatal errors cancel the load.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{info, warn};
use parking_lot::Mutex;

use crate::assemble::{BufferAssembler, DrawableDescriptor, NodeBatch, ResourceManager};
use crate::error::{MergeError, MergeResult};
use crate::merge::{group_by_material, GpuMemoryBudget, MergePlanner, NodeTable};
use crate::scene::{AttributeLayout, SceneReader};
use crate::stats::MergeStats;
use crate::worker::{SessionMetadata, WorkerOrchestrator, WorkerReply};
use crate::MergeConfig;

/// One physical mesh-bin file handed to a session.
#[derive(Debug, Clone)]
pub struct FileInput {
    pub file_index: u16,
    pub name: String,
    pub bytes: Vec<u8>,
}

impl FileInput {
    pub fn new(file_index: u16, name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_index,
            name: name.into(),
            bytes,
        }
    }
}

/// Everything a load produced.
#[derive(Debug, Default)]
pub struct LoadOutput {
    pub drawables: Vec<DrawableDescriptor>,
    pub stats: MergeStats,
    /// Files that failed without aborting the session (parallel mode only).
    pub failed_files: Vec<(u16, MergeError)>,
}

impl LoadOutput {
    /// Drawables backed by one file, in emission order.
    pub fn drawables_for_file(&self, file_index: u16) -> impl Iterator<Item = &DrawableDescriptor> {
        self.drawables
            .iter()
            .filter(move |d| d.buffer.file_index == file_index)
    }
}

/// A configured load over one `model.bin`.
///
/// A session can run any number of loads. Each parallel load owns a fresh
/// cancellation flag; [`LoadSession::cancel`] sets the flag of the load in
/// flight, or of the next one when none is running.
pub struct LoadSession<'a> {
    config: MergeConfig,
    model_bin: &'a [u8],
    layouts: Vec<AttributeLayout>,
    cancelled: Mutex<Arc<AtomicBool>>,
}

impl<'a> LoadSession<'a> {
    /// Create a session. Fails on an invalid configuration.
    pub fn new(
        config: MergeConfig,
        model_bin: &'a [u8],
        layouts: Vec<AttributeLayout>,
    ) -> MergeResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            model_bin,
            layouts,
            cancelled: Mutex::new(Arc::new(AtomicBool::new(false))),
        })
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    pub fn layouts(&self) -> &[AttributeLayout] {
        &self.layouts
    }

    /// Stop issuing files in the running parallel load. Safe to call from
    /// another thread.
    pub fn cancel(&self) {
        self.cancelled.lock().store(true, Ordering::SeqCst);
    }

    /// Whether the running (or next) parallel load has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.lock().load(Ordering::SeqCst)
    }

    /// Hand the current flag to a starting load.
    fn begin_load(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled.lock())
    }

    /// Retire `flag` so later loads start uncancelled.
    fn end_load(&self, flag: &Arc<AtomicBool>) {
        let mut current = self.cancelled.lock();
        if Arc::ptr_eq(&current, flag) {
            *current = Arc::new(AtomicBool::new(false));
        }
    }

    fn reader(&self) -> MergeResult<SceneReader<'a>> {
        SceneReader::new(self.model_bin, self.config.endianness)
    }

    /// Plan globally, then assemble and upload each file on this thread.
    pub fn load_sync(
        &self,
        files: &[FileInput],
        resources: &dyn ResourceManager,
    ) -> MergeResult<LoadOutput> {
        let reader = self.reader()?;
        let required = reader.check_capacity(self.config.gpu_memory_budget)?;
        info!(
            "sync load: {} nodes, {} meshes, {} mesh bytes of {} allowed",
            reader.node_count(),
            reader.mesh_count(),
            required,
            self.config.gpu_memory_budget
        );

        let mut table = NodeTable::from_reader(&reader, &self.layouts)?;
        let nodes: Vec<u32> = (0..table.len() as u32).collect();
        let grouping = group_by_material(&mut table, &nodes, self.config.max_vertices_per_group);
        let mut budget = GpuMemoryBudget::new(self.config.gpu_memory_budget);
        let plan = MergePlanner::new(&self.config).plan(&mut table, &grouping, &mut budget)?;

        let mut output = LoadOutput::default();
        let mut assembled = MergeStats::default();
        for file_index in plan.files() {
            let file = files
                .iter()
                .find(|f| f.file_index == file_index)
                .ok_or_else(|| {
                    MergeError::malformed(
                        format!("file {file_index}"),
                        "referenced by model.bin but not supplied",
                    )
                })?;
            let items = plan.items_for_file(file_index);
            let assembler = BufferAssembler::new(
                file_index,
                &file.name,
                &file.bytes,
                &table,
                &self.layouts,
                &self.config,
                &items,
            );
            let (batch, stats) = assembler.assemble_all(&items)?;
            resources.upload_batch(&batch);
            output.drawables.extend(batch.drawables);
            assembled.merge(&stats);
        }

        output.stats = plan.stats.with_assembly(&assembled);
        output.stats.log_summary();
        Ok(output)
    }

    /// Plan and assemble each file on a worker.
    ///
    /// A file's batches are held until its worker reports it finished, so a
    /// file that fails part way never reaches `resources`.
    pub fn load_parallel(
        &self,
        files: Vec<FileInput>,
        resources: &dyn ResourceManager,
    ) -> MergeResult<LoadOutput> {
        let reader = self.reader()?;
        reader.check_capacity(self.config.gpu_memory_budget)?;
        let per_file = reader.mesh_bytes_per_file()?;

        let mut output = LoadOutput::default();
        for (file_index, &bytes) in per_file.iter().enumerate() {
            let file_index = file_index as u16;
            if bytes > 0 && !files.iter().any(|f| f.file_index == file_index) {
                let error = MergeError::malformed(
                    format!("file {file_index}"),
                    "referenced by model.bin but not supplied",
                );
                warn!("{error}");
                output.failed_files.push((file_index, error));
            }
        }

        let budget_slices = GpuMemoryBudget::new(self.config.gpu_memory_budget)
            .split(&per_file)
            .iter()
            .map(GpuMemoryBudget::initial)
            .collect();

        let metadata = SessionMetadata {
            config: self.config.clone(),
            layouts: self.layouts.clone(),
            budget_slices,
            model_bin: Arc::from(self.model_bin),
        };
        info!(
            "parallel load: {} files on up to {} workers",
            files.len(),
            self.config.max_workers
        );
        let cancelled = self.begin_load();
        let handle = WorkerOrchestrator::new(metadata)
            .with_cancel_flag(Arc::clone(&cancelled))
            .spawn(files);

        let mut pending: HashMap<u16, Vec<NodeBatch>> = HashMap::new();
        let mut fatal = None;
        for reply in handle.replies() {
            match reply {
                WorkerReply::Batch { file_index, batch } => {
                    if fatal.is_none() {
                        pending.entry(file_index).or_default().push(batch);
                    }
                }
                WorkerReply::Finished { file_index, stats } => {
                    let batches = pending.remove(&file_index).unwrap_or_default();
                    if fatal.is_none() {
                        for batch in batches {
                            resources.upload_batch(&batch);
                            output.drawables.extend(batch.drawables);
                        }
                        output.stats.merge(&stats);
                    }
                }
                WorkerReply::Failed { file_index, error } => {
                    pending.remove(&file_index);
                    if error.is_fatal() {
                        if fatal.is_none() {
                            warn!("file {file_index}: {error}, cancelling load");
                            handle.cancel();
                            fatal = Some(error);
                        }
                    } else {
                        warn!("file {file_index} failed: {error}");
                        output.failed_files.push((file_index, error));
                    }
                }
            }
        }
        handle.join();
        self.end_load(&cancelled);

        if let Some(error) = fatal {
            return Err(error);
        }
        output.failed_files.sort_by_key(|(file_index, _)| *file_index);
        output.stats.log_summary();
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::{BufferKind, BufferRef, InMemoryResourceManager};
    use crate::scene::{BuiltScene, IndexWidth, MeshSpec, SceneBuilder};
    use crate::Endianness;

    fn scene() -> BuiltScene {
        let mut builder = SceneBuilder::new(Endianness::Little);
        let layout = builder.add_layout([4, 0, -1, -1, 0, 0, 0, 0]).unwrap();
        for file in 0..2u16 {
            for material in 0..2u16 {
                for _ in 0..3 {
                    let mesh = builder.add_mesh(file, MeshSpec::grid(layout, 8, IndexWidth::U16)).unwrap();
                    builder.add_node(mesh, material);
                }
            }
        }
        builder.build()
    }

    fn inputs(scene: &BuiltScene) -> Vec<FileInput> {
        scene
            .files
            .iter()
            .enumerate()
            .map(|(i, bytes)| FileInput::new(i as u16, BuiltScene::file_name(i), bytes.clone()))
            .collect()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let scene = scene();
        let result = LoadSession::new(
            MergeConfig::default().with_max_workers(0),
            &scene.model_bin,
            scene.layouts.clone(),
        );
        assert!(matches!(result, Err(MergeError::InvalidConfig(_))));
    }

    #[test]
    fn test_sync_load_merges_per_material() {
        let scene = scene();
        let session =
            LoadSession::new(MergeConfig::default(), &scene.model_bin, scene.layouts.clone())
                .unwrap();
        let resources = InMemoryResourceManager::new();
        let output = session.load_sync(&inputs(&scene), &resources).unwrap();

        assert_eq!(output.drawables.len(), 4);
        assert!(output.drawables.iter().all(|d| d.is_merged()));
        assert_eq!(output.stats.nodes, 12);
        assert_eq!(output.stats.draw_calls_before, 12);
        assert_eq!(output.stats.draw_calls_after, 4);
        assert_eq!(output.stats.files, 2);
        assert!(output.failed_files.is_empty());
        assert_eq!(output.drawables_for_file(1).count(), 2);
        // vertex and index buffer per file
        assert_eq!(resources.buffer_count(), 4);
    }

    #[test]
    fn test_sync_load_missing_file() {
        let scene = scene();
        let session =
            LoadSession::new(MergeConfig::default(), &scene.model_bin, scene.layouts.clone())
                .unwrap();
        let mut files = inputs(&scene);
        files.pop();
        let result = session.load_sync(&files, &InMemoryResourceManager::new());
        assert!(matches!(result, Err(MergeError::MalformedBinary { .. })));
    }

    #[test]
    fn test_capacity_checked_before_planning() {
        let scene = scene();
        let session = LoadSession::new(
            MergeConfig::default().with_gpu_memory_budget(16),
            &scene.model_bin,
            scene.layouts.clone(),
        )
        .unwrap();
        let resources = InMemoryResourceManager::new();
        assert!(matches!(
            session.load_sync(&inputs(&scene), &resources),
            Err(MergeError::FatalCapacity { ceiling: 16, .. })
        ));
        assert!(matches!(
            session.load_parallel(inputs(&scene), &resources),
            Err(MergeError::FatalCapacity { ceiling: 16, .. })
        ));
        assert_eq!(resources.buffer_count(), 0);
    }

    #[test]
    fn test_parallel_load_matches_drawable_count() {
        let scene = scene();
        let session = LoadSession::new(
            MergeConfig::default().with_max_workers(2),
            &scene.model_bin,
            scene.layouts.clone(),
        )
        .unwrap();
        let output = session
            .load_parallel(inputs(&scene), &InMemoryResourceManager::new())
            .unwrap();
        assert_eq!(output.drawables.len(), 4);
        assert_eq!(output.stats.files, 2);
        assert_eq!(output.stats.nodes, 12);
        assert_eq!(output.stats.budget_initial, MergeConfig::default().gpu_memory_budget);
    }

    #[test]
    fn test_parallel_load_reports_missing_file() {
        let scene = scene();
        let session = LoadSession::new(
            MergeConfig::default().with_max_workers(2),
            &scene.model_bin,
            scene.layouts.clone(),
        )
        .unwrap();
        let mut files = inputs(&scene);
        files.pop();
        let output = session
            .load_parallel(files, &InMemoryResourceManager::new())
            .unwrap();
        assert_eq!(output.drawables.len(), 2);
        assert!(output.drawables.iter().all(|d| d.buffer.file_index == 0));
        assert!(matches!(
            output.failed_files.as_slice(),
            [(1, MergeError::MalformedBinary { .. })]
        ));
    }

    #[test]
    fn test_cancel_applies_to_one_load() {
        let scene = scene();
        let session =
            LoadSession::new(MergeConfig::default(), &scene.model_bin, scene.layouts.clone())
                .unwrap();
        session.cancel();
        assert!(session.is_cancelled());
        let output = session
            .load_parallel(inputs(&scene), &InMemoryResourceManager::new())
            .unwrap();
        assert!(output.drawables.is_empty());
        assert_eq!(output.failed_files.len(), 2);
        assert!(output
            .failed_files
            .iter()
            .all(|(_, e)| matches!(e, MergeError::Cancelled { .. })));

        assert!(!session.is_cancelled());
        let output = session
            .load_parallel(inputs(&scene), &InMemoryResourceManager::new())
            .unwrap();
        assert_eq!(output.drawables.len(), 4);
        assert!(output.failed_files.is_empty());
    }

    /// File 0 holds one node. File 1 holds three nodes sharing one mesh,
    /// whose cheap merge needs three copies of it.
    fn overcommitted_scene() -> BuiltScene {
        let mut builder = SceneBuilder::new(Endianness::Little);
        let layout = builder.add_layout([4, 0, -1, -1, 0, 0, 0, 0]).unwrap();
        let lone = builder
            .add_mesh(0, MeshSpec::grid(layout, 8, IndexWidth::U16))
            .unwrap();
        builder.add_node(lone, 0);
        let shared = builder
            .add_mesh(1, MeshSpec::grid(layout, 10, IndexWidth::U16))
            .unwrap();
        for _ in 0..3 {
            builder.add_node(shared, 0);
        }
        builder.build()
    }

    #[test]
    fn test_fatal_worker_error_fails_load_but_not_session() {
        let scene = overcommitted_scene();
        let budget = SceneReader::new(&scene.model_bin, Endianness::Little)
            .unwrap()
            .total_mesh_bytes()
            .unwrap();
        let session = LoadSession::new(
            MergeConfig::default()
                .with_gpu_memory_budget(budget)
                .with_max_workers(2),
            &scene.model_bin,
            scene.layouts.clone(),
        )
        .unwrap();

        let resources = InMemoryResourceManager::new();
        let result = session.load_parallel(inputs(&scene), &resources);
        assert!(matches!(result, Err(MergeError::PlannerInfeasible { .. })));
        assert!(!session.is_cancelled());

        // without the overcommitted file the same session loads again
        let mut files = inputs(&scene);
        files.pop();
        let output = session.load_parallel(files, &resources).unwrap();
        assert_eq!(output.drawables.len(), 1);
        assert_eq!(output.stats.files, 1);
        assert!(matches!(
            output.failed_files.as_slice(),
            [(1, MergeError::MalformedBinary { .. })]
        ));
    }

    #[test]
    fn test_failed_file_uploads_nothing() {
        let mut builder = SceneBuilder::new(Endianness::Little);
        let layout = builder.add_layout([4, 0, -1, -1, 0, 0, 0, 0]).unwrap();
        for file in 0..2u16 {
            for material in 0..3u16 {
                let mesh = builder
                    .add_mesh(file, MeshSpec::grid(layout, 8, IndexWidth::U16))
                    .unwrap();
                builder.add_node(mesh, material);
            }
        }
        let scene = builder.build();
        // cut into the last mesh so earlier drawables stream before the failure
        let mut files = inputs(&scene);
        let len = files[1].bytes.len();
        files[1].bytes.truncate(len - 2);

        let session = LoadSession::new(
            MergeConfig::default().with_max_workers(2).with_batch_size(1),
            &scene.model_bin,
            scene.layouts.clone(),
        )
        .unwrap();
        let resources = InMemoryResourceManager::new();
        let output = session.load_parallel(files, &resources).unwrap();

        assert!(matches!(
            output.failed_files.as_slice(),
            [(1, MergeError::MalformedBinary { .. })]
        ));
        assert_eq!(output.drawables.len(), 3);
        let file = |file_index| BufferRef { file_index };
        assert!(resources.contents(file(0), BufferKind::Vertex).is_some());
        assert!(resources.contents(file(1), BufferKind::Vertex).is_none());
        assert!(resources.contents(file(1), BufferKind::Index).is_none());
    }
}
