//! Change Queue
//!
//! Per-root single-worker pipeline. Tasks for one root run one at a time in
//! submission order; different roots run in parallel. Workers are spawned
//! lazily on the first task for a root.

use crate::store::hasher::compute_blob_id;
use crate::types::{ObjectPath, Root};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

/// Unit of work for a root's pipeline
#[derive(Clone, PartialEq, Eq)]
pub enum ChangeTask {
    /// File added or changed; carries the bytes read at event time
    Upsert { path: ObjectPath, bytes: Vec<u8> },
    /// File or directory unlinked
    Remove { path: ObjectPath },
    /// Hash the root and publish it to the manifest
    Publish,
}

impl ChangeTask {
    pub fn op(&self) -> &'static str {
        match self {
            ChangeTask::Upsert { .. } => "upsert",
            ChangeTask::Remove { .. } => "remove",
            ChangeTask::Publish => "publish",
        }
    }

    pub fn path(&self) -> Option<&ObjectPath> {
        match self {
            ChangeTask::Upsert { path, .. } | ChangeTask::Remove { path } => Some(path),
            ChangeTask::Publish => None,
        }
    }
}

impl fmt::Debug for ChangeTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeTask::Upsert { path, bytes } => f
                .debug_struct("Upsert")
                .field("path", path)
                .field("len", &bytes.len())
                .field("blob", &compute_blob_id(bytes).short())
                .finish(),
            ChangeTask::Remove { path } => f.debug_struct("Remove").field("path", path).finish(),
            ChangeTask::Publish => f.write_str("Publish"),
        }
    }
}

/// Executes tasks for a root. Errors are the handler's to log; the queue
/// always moves on to the next task.
#[async_trait]
pub trait ChangeHandler: Send + Sync + 'static {
    async fn handle(&self, root: &Root, task: ChangeTask);
}

enum QueueItem {
    Task(ChangeTask),
    Flush(oneshot::Sender<()>),
}

struct Worker {
    tx: mpsc::UnboundedSender<QueueItem>,
    pending: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

pub struct ChangeQueue<H: ChangeHandler> {
    handler: Arc<H>,
    workers: Arc<Mutex<HashMap<Root, Worker>>>,
}

impl<H: ChangeHandler> Clone for ChangeQueue<H> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            workers: Arc::clone(&self.workers),
        }
    }
}

impl<H: ChangeHandler> ChangeQueue<H> {
    pub fn new(handler: Arc<H>) -> Self {
        Self {
            handler,
            workers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    /// Enqueue a task for `root`. Must be called from within a tokio runtime.
    pub fn submit(&self, root: &Root, task: ChangeTask) {
        trace!(root = %root, task = ?task, "Submitting task");
        let mut workers = self.workers.lock();
        let worker = self.worker_for(&mut workers, root);
        worker.pending.fetch_add(1, Ordering::SeqCst);
        if worker.tx.send(QueueItem::Task(task)).is_err() {
            worker.pending.fetch_sub(1, Ordering::SeqCst);
            error!(root = %root, "Change queue worker is gone; task dropped");
        }
    }

    /// Wait until every task submitted for `root` before this call has run
    pub async fn flush(&self, root: &Root) {
        let rx = {
            let workers = self.workers.lock();
            let Some(worker) = workers.get(root) else {
                return;
            };
            let (tx, rx) = oneshot::channel();
            if worker.tx.send(QueueItem::Flush(tx)).is_err() {
                return;
            }
            rx
        };
        let _ = rx.await;
    }

    /// Flush every root that has a worker
    pub async fn flush_all(&self) {
        for root in self.roots() {
            self.flush(&root).await;
        }
    }

    /// Tasks submitted but not yet finished for `root`
    pub fn pending(&self, root: &Root) -> usize {
        self.workers
            .lock()
            .get(root)
            .map(|w| w.pending.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn roots(&self) -> Vec<Root> {
        let mut roots: Vec<Root> = self.workers.lock().keys().cloned().collect();
        roots.sort();
        roots
    }

    /// Stop accepting tasks and wait for every worker to drain its queue
    pub async fn shutdown(&self) {
        let workers: Vec<(Root, Worker)> = self.workers.lock().drain().collect();
        for (root, worker) in workers {
            drop(worker.tx);
            if let Err(e) = worker.handle.await {
                error!(root = %root, error = %e, "Change queue worker panicked");
            }
        }
    }

    fn worker_for<'a>(
        &self,
        workers: &'a mut HashMap<Root, Worker>,
        root: &Root,
    ) -> &'a Worker {
        let stale = workers.get(root).map_or(false, |w| w.tx.is_closed());
        if stale {
            workers.remove(root);
        }
        workers.entry(root.clone()).or_insert_with(|| {
            debug!(root = %root, "Starting change queue worker");
            let (tx, rx) = mpsc::unbounded_channel();
            let pending = Arc::new(AtomicUsize::new(0));
            let handle = tokio::spawn(run_worker(
                root.clone(),
                Arc::clone(&self.handler),
                rx,
                Arc::clone(&pending),
            ));
            Worker {
                tx,
                pending,
                handle,
            }
        })
    }
}

async fn run_worker<H: ChangeHandler>(
    root: Root,
    handler: Arc<H>,
    mut rx: mpsc::UnboundedReceiver<QueueItem>,
    pending: Arc<AtomicUsize>,
) {
    while let Some(item) = rx.recv().await {
        match item {
            QueueItem::Task(task) => {
                handler.handle(&root, task).await;
                pending.fetch_sub(1, Ordering::SeqCst);
            }
            QueueItem::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!(root = %root, "Change queue worker stopped");
}
