//! Dispatches mesh-bin files to a pool of worker threads.
//!
//! A dispatcher thread owns the request side of every worker channel and
//! sees every reply before the caller does. It hands a worker its next file
//! only after that worker's final reply for the previous one arrives, and it
//! stops issuing new files once the session is cancelled.
//!
//! # Example
//!
//! ```ignore
//! let handle = WorkerOrchestrator::new(metadata).spawn(files);
//! for reply in handle.replies() {
//!     match reply {
//!         WorkerReply::Batch { batch, .. } => resources.upload_batch(&batch),
//!         WorkerReply::Finished { stats, .. } => total.merge(&stats),
//!         WorkerReply::Failed { file_index, error } => log::warn!("{file_index}: {error}"),
//!     }
//! }
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info, warn};

use super::messages::{SessionMetadata, WorkerReply, WorkerRequest};
use super::worker::Worker;
use crate::error::MergeError;
use crate::session::FileInput;

enum WorkerEvent {
    Reply { worker: usize, reply: WorkerReply },
    Exited { worker: usize },
}

/// Reports a worker's exit, including exits by panic.
struct ExitGuard {
    worker: usize,
    events: Sender<WorkerEvent>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            error!("worker {} panicked", self.worker);
        }
        let _ = self.events.send(WorkerEvent::Exited {
            worker: self.worker,
        });
    }
}

/// Body of a worker thread.
type WorkerMain = fn(usize, Receiver<WorkerRequest>, Sender<WorkerEvent>);

fn run_worker(id: usize, requests: Receiver<WorkerRequest>, events: Sender<WorkerEvent>) {
    let _guard = ExitGuard {
        worker: id,
        events: events.clone(),
    };
    let mut worker = Worker::new(id);
    for request in requests.iter() {
        let keep_running = worker.handle(request, |reply| {
            let _ = events.send(WorkerEvent::Reply { worker: id, reply });
        });
        if !keep_running {
            break;
        }
    }
    debug!("worker {id} exiting");
}

struct WorkerSlot {
    requests: Sender<WorkerRequest>,
    thread: Option<JoinHandle<()>>,
    in_flight: Option<(u16, String)>,
    alive: bool,
}

struct Dispatcher {
    metadata: Arc<SessionMetadata>,
    queue: VecDeque<FileInput>,
    slots: Vec<WorkerSlot>,
    events: Receiver<WorkerEvent>,
    output: Sender<WorkerReply>,
    cancelled: Arc<AtomicBool>,
}

impl Dispatcher {
    fn start(
        metadata: Arc<SessionMetadata>,
        files: Vec<FileInput>,
        workers: usize,
        worker_main: WorkerMain,
        output: Sender<WorkerReply>,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        let (event_tx, event_rx) = unbounded();
        let count = workers.min(files.len());
        let mut slots = Vec::with_capacity(count);
        for id in 0..count {
            let (request_tx, request_rx) = unbounded();
            let events = event_tx.clone();
            let thread = thread::Builder::new()
                .name(format!("meshbin-worker-{id}"))
                .spawn(move || worker_main(id, request_rx, events));
            let thread = match thread {
                Ok(handle) => Some(handle),
                Err(err) => {
                    warn!("failed to spawn worker {id}: {err}");
                    None
                }
            };
            let alive = thread.is_some();
            if alive {
                let _ = request_tx.send(WorkerRequest::Session(Arc::clone(&metadata)));
            }
            slots.push(WorkerSlot {
                requests: request_tx,
                thread,
                in_flight: None,
                alive,
            });
        }

        Self {
            metadata,
            queue: files.into(),
            slots,
            events: event_rx,
            output,
            cancelled,
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn send(&self, reply: WorkerReply) {
        // the caller may have stopped listening; workers still finish
        let _ = self.output.send(reply);
    }

    /// Give `worker` the next queued file, if any.
    fn issue(&mut self, worker: usize) {
        if self.is_cancelled() || !self.slots[worker].alive {
            return;
        }
        let Some(file) = self.queue.pop_front() else {
            return;
        };
        debug!(
            "dispatching '{}' (file {}) to worker {worker}",
            file.name, file.file_index
        );
        let slot = &mut self.slots[worker];
        let primed = slot.requests.send(WorkerRequest::Prime {
            file_index: file.file_index,
            file_name: file.name.clone(),
        });
        let delivered = primed.is_ok()
            && slot
                .requests
                .send(WorkerRequest::Payload {
                    file_index: file.file_index,
                    bytes: file.bytes,
                })
                .is_ok();
        if delivered {
            slot.in_flight = Some((file.file_index, file.name));
        } else {
            slot.alive = false;
            self.send(WorkerReply::Failed {
                file_index: file.file_index,
                error: MergeError::WorkerLost { file: file.name },
            });
        }
    }

    fn in_flight(&self) -> bool {
        self.slots.iter().any(|s| s.in_flight.is_some())
    }

    fn run(mut self) {
        for worker in 0..self.slots.len() {
            self.issue(worker);
        }

        while self.in_flight() {
            let Ok(event) = self.events.recv() else {
                break;
            };
            match event {
                WorkerEvent::Reply { worker, reply } => {
                    let done = reply.is_final();
                    self.send(reply);
                    if done {
                        self.slots[worker].in_flight = None;
                        self.issue(worker);
                    }
                }
                WorkerEvent::Exited { worker } => {
                    self.slots[worker].alive = false;
                    if let Some((file_index, file)) = self.slots[worker].in_flight.take() {
                        error!("worker {worker} lost while processing '{file}'");
                        self.send(WorkerReply::Failed {
                            file_index,
                            error: MergeError::WorkerLost { file },
                        });
                    }
                    // keep the queue moving on the survivors
                    for other in 0..self.slots.len() {
                        if self.slots[other].in_flight.is_none() {
                            self.issue(other);
                        }
                    }
                }
            }
        }

        let cancelled = self.is_cancelled();
        for file in std::mem::take(&mut self.queue) {
            let error = if cancelled {
                MergeError::Cancelled { file: file.name }
            } else {
                MergeError::WorkerLost { file: file.name }
            };
            self.send(WorkerReply::Failed {
                file_index: file.file_index,
                error,
            });
        }
        self.shutdown();
    }

    fn shutdown(&mut self) {
        for slot in &self.slots {
            let _ = slot.requests.send(WorkerRequest::Shutdown);
        }
        for slot in &mut self.slots {
            if let Some(thread) = slot.thread.take() {
                let _ = thread.join();
            }
        }
        info!(
            "dispatcher for {} layouts stopped",
            self.metadata.layouts.len()
        );
    }
}

/// Builds worker pools for one load session.
pub struct WorkerOrchestrator {
    metadata: Arc<SessionMetadata>,
    workers: usize,
    worker_main: WorkerMain,
    cancelled: Arc<AtomicBool>,
}

impl WorkerOrchestrator {
    /// Pool sized by `metadata.config.max_workers`.
    pub fn new(metadata: SessionMetadata) -> Self {
        let workers = metadata.config.max_workers.max(1);
        Self {
            metadata: Arc::new(metadata),
            workers,
            worker_main: run_worker,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share a cancellation flag with the caller. Setting it has the same
    /// effect as [`OrchestratorHandle::cancel`].
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancelled = flag;
        self
    }

    /// Override the worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Start the dispatcher and its workers on `files`.
    pub fn spawn(self, files: Vec<FileInput>) -> OrchestratorHandle {
        let (output_tx, output_rx) = unbounded();
        let cancelled = self.cancelled;
        info!(
            "starting {} workers for {} files",
            self.workers.min(files.len()),
            files.len()
        );

        let dispatcher_cancelled = Arc::clone(&cancelled);
        let metadata = self.metadata;
        let workers = self.workers;
        let worker_main = self.worker_main;
        let dispatcher = thread::Builder::new()
            .name("meshbin-dispatcher".into())
            .spawn(move || {
                Dispatcher::start(
                    metadata,
                    files,
                    workers,
                    worker_main,
                    output_tx,
                    dispatcher_cancelled,
                )
                .run()
            });
        let dispatcher = match dispatcher {
            Ok(handle) => Some(handle),
            Err(err) => {
                error!("failed to spawn dispatcher: {err}");
                None
            }
        };

        OrchestratorHandle {
            replies: output_rx,
            cancelled,
            dispatcher,
        }
    }
}

/// Caller side of a running orchestrator.
///
/// The reply stream ends once every file has been reported. Dropping the
/// handle cancels the session and waits for in-flight files.
pub struct OrchestratorHandle {
    replies: Receiver<WorkerReply>,
    cancelled: Arc<AtomicBool>,
    dispatcher: Option<JoinHandle<()>>,
}

impl OrchestratorHandle {
    /// Stop issuing new files. Files already in flight still finish.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            info!("load cancelled");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Next reply, or `None` once the stream is finished.
    pub fn recv(&self) -> Option<WorkerReply> {
        self.replies.recv().ok()
    }

    /// Blocking iterator over every remaining reply.
    pub fn replies(&self) -> impl Iterator<Item = WorkerReply> + '_ {
        self.replies.iter()
    }

    /// Wait for the dispatcher to stop.
    pub fn join(mut self) {
        self.join_dispatcher();
    }

    fn join_dispatcher(&mut self) {
        if let Some(dispatcher) = self.dispatcher.take() {
            if dispatcher.join().is_err() {
                error!("dispatcher thread panicked");
            }
        }
    }
}

impl Drop for OrchestratorHandle {
    fn drop(&mut self) {
        if self.dispatcher.is_some() {
            self.cancel();
            self.join_dispatcher();
        }
    }
}
