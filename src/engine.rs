//! Sync Engine
//!
//! Routes filesystem events for each watched directory through its root's
//! change queue, mutates the content store, hashes the root and publishes the
//! result to the manifest.

use crate::debounce::Debouncer;
use crate::error::SyncError;
use crate::manifest::{ManifestStore, DEFAULT_MANIFEST_ID};
use crate::queue::{ChangeHandler, ChangeQueue, ChangeTask};
use crate::replication::DocumentStore;
use crate::store::{ContentStore, MkdirOptions, RemoveOptions};
use crate::tree::TreeHasher;
use crate::types::{NodeKind, ObjectPath, Root};
use crate::watch::{initial_scan, FsEvent, FsEventKind, IgnoreMatcher};
use crate::writer::ObjectWriter;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

/// Process-wide store handles shared by every component
#[derive(Clone)]
pub struct SyncContext {
    pub content: Arc<dyn ContentStore>,
    pub documents: Arc<dyn DocumentStore>,
}

impl SyncContext {
    pub fn new(content: Arc<dyn ContentStore>, documents: Arc<dyn DocumentStore>) -> Self {
        Self { content, documents }
    }
}

/// Lifecycle of one watched root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootState {
    Idle,
    Watching,
    Mutating,
    Hashing,
    Publishing,
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Zero publishes right after each mutation
    pub debounce: Duration,
    pub scratch_prefix: ObjectPath,
    pub manifest_id: String,
    pub initial_scan: bool,
    pub ignore: IgnoreMatcher,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::ZERO,
            scratch_prefix: ObjectPath::default_scratch(),
            manifest_id: DEFAULT_MANIFEST_ID.to_string(),
            initial_scan: true,
            ignore: IgnoreMatcher::with_defaults(),
        }
    }
}

type States = Arc<RwLock<HashMap<Root, RootState>>>;

/// Per-root task executor: writer, then hash and publish
pub struct Pipeline {
    writer: ObjectWriter,
    hasher: TreeHasher,
    manifest: Arc<ManifestStore>,
    debouncer: Debouncer,
    states: States,
}

impl Pipeline {
    fn set_state(&self, root: &Root, state: RootState) {
        self.states.write().insert(root.clone(), state);
    }

    async fn after_mutation(&self, root: &Root) {
        if self.debouncer.is_immediate() {
            self.publish(root).await;
        } else {
            self.debouncer.touch(root);
            self.set_state(root, RootState::Watching);
        }
    }

    async fn publish(&self, root: &Root) {
        let start = Instant::now();
        self.set_state(root, RootState::Hashing);
        let tree = match self.hasher.hash_tree(&root.object_path()).await {
            Ok(tree) => tree,
            Err(e) => {
                error!(root = %root, op = "hash", error = %e, "Failed to hash root");
                self.set_state(root, RootState::Watching);
                return;
            }
        };
        debug!(root = %root, tree = %tree.to_json(), "Root tree");

        self.set_state(root, RootState::Publishing);
        match self.manifest.merge_root_hash(root, tree.content_id).await {
            Ok(revision) => info!(
                root = %root,
                content_id = %tree.content_id,
                clock = revision.clock,
                duration_ms = start.elapsed().as_millis(),
                "Published root hash"
            ),
            Err(e) => error!(root = %root, op = "publish", error = %e, "Failed to publish root hash"),
        }
        self.set_state(root, RootState::Watching);
    }
}

#[async_trait]
impl ChangeHandler for Pipeline {
    async fn handle(&self, root: &Root, task: ChangeTask) {
        let outcome = match task {
            ChangeTask::Upsert { path, bytes } => {
                self.set_state(root, RootState::Mutating);
                self.writer.upsert(&path, &bytes).await.map(|_| path)
            }
            ChangeTask::Remove { path } => {
                self.set_state(root, RootState::Mutating);
                self.writer.remove(&path).await.map(|_| path)
            }
            ChangeTask::Publish => {
                self.publish(root).await;
                return;
            }
        };

        match outcome {
            Ok(_) => self.after_mutation(root).await,
            Err(e) => {
                // The queue moves on; the next mutation republishes the root
                error!(root = %root, error = %e, "Store mutation failed");
                self.set_state(root, RootState::Watching);
            }
        }
    }
}

#[derive(Debug, Clone)]
struct WatchedRoot {
    root: Root,
    directory: PathBuf,
}

pub struct SyncEngine {
    ctx: SyncContext,
    options: EngineOptions,
    queue: ChangeQueue<Pipeline>,
    manifest: Arc<ManifestStore>,
    debouncer: Debouncer,
    fired: tokio::sync::Mutex<mpsc::UnboundedReceiver<Root>>,
    watched: RwLock<Vec<WatchedRoot>>,
    states: States,
}

impl SyncEngine {
    pub fn new(ctx: SyncContext, options: EngineOptions) -> Self {
        let manifest = Arc::new(ManifestStore::new(
            Arc::clone(&ctx.documents),
            options.manifest_id.clone(),
        ));
        let (debouncer, fired) = Debouncer::new(options.debounce);
        let states: States = Arc::new(RwLock::new(HashMap::new()));
        let pipeline = Pipeline {
            writer: ObjectWriter::new(Arc::clone(&ctx.content), options.scratch_prefix.clone()),
            hasher: TreeHasher::new(Arc::clone(&ctx.content)),
            manifest: Arc::clone(&manifest),
            debouncer: debouncer.clone(),
            states: Arc::clone(&states),
        };

        Self {
            ctx,
            options,
            queue: ChangeQueue::new(Arc::new(pipeline)),
            manifest,
            debouncer,
            fired: tokio::sync::Mutex::new(fired),
            watched: RwLock::new(Vec::new()),
            states,
        }
    }

    pub fn manifest(&self) -> &Arc<ManifestStore> {
        &self.manifest
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    pub fn roots(&self) -> Vec<Root> {
        self.watched.read().iter().map(|w| w.root.clone()).collect()
    }

    pub fn state(&self, root: &Root) -> RootState {
        self.states.read().get(root).copied().unwrap_or(RootState::Idle)
    }

    /// Clear the store before watching starts.
    ///
    /// Top-level entries that are not one of `keep` are removed, leftover
    /// scratch entries included. Roots in `keep` stay as empty directories;
    /// their old contents are dropped so the initial scan rebuilds them from
    /// what is on disk now.
    #[instrument(skip(self, keep), fields(keep = keep.len()))]
    pub async fn reconcile(&self, keep: &[Root]) -> Result<Vec<ObjectPath>, SyncError> {
        let store_root = ObjectPath::root();
        let mut removed = Vec::new();
        for entry in self.ctx.content.list(&store_root).await? {
            let path = store_root.join(&entry.name)?;
            let kept = keep.iter().any(|root| root.as_str() == entry.name);
            if !kept || entry.kind != NodeKind::Directory {
                self.remove_entry(path, &mut removed).await?;
                continue;
            }
            for child in self.ctx.content.list(&path).await? {
                self.remove_entry(path.join(&child.name)?, &mut removed).await?;
            }
        }
        info!(removed = removed.len(), "Startup reconciliation completed");
        Ok(removed)
    }

    async fn remove_entry(
        &self,
        path: ObjectPath,
        removed: &mut Vec<ObjectPath>,
    ) -> Result<(), SyncError> {
        match self
            .ctx
            .content
            .remove(&path, RemoveOptions { recursive: true })
            .await
        {
            Ok(()) => removed.push(path),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Start mirroring `directory` under its root.
    ///
    /// Creates the root in the store, submits pre-existing files when the
    /// initial scan is enabled and schedules a first publish.
    #[instrument(skip(self), fields(directory = ?directory))]
    pub async fn register_root(&self, directory: &Path) -> Result<Root, SyncError> {
        let directory = dunce::canonicalize(directory).map_err(|e| {
            SyncError::Startup(format!("Cannot watch {}: {}", directory.display(), e))
        })?;
        let root = Root::from_directory(&directory)?;
        if self.options.scratch_prefix.top_level() == Some(root.as_str()) {
            return Err(SyncError::Startup(format!(
                "Cannot watch {}: root name {} collides with the scratch prefix {}",
                directory.display(),
                root,
                self.options.scratch_prefix
            )));
        }

        {
            let mut watched = self.watched.write();
            if let Some(existing) = watched.iter().find(|w| w.root == root) {
                if existing.directory == directory {
                    return Ok(root);
                }
                return Err(SyncError::Startup(format!(
                    "Root {} is already bound to {}",
                    root,
                    existing.directory.display()
                )));
            }
            watched.push(WatchedRoot {
                root: root.clone(),
                directory: directory.clone(),
            });
        }

        self.ctx
            .content
            .mkdir(&root.object_path(), MkdirOptions { parents: true })
            .await?;
        self.states.write().insert(root.clone(), RootState::Watching);

        if self.options.initial_scan {
            let files = self.scan(&directory).await?;
            info!(root = %root, files = files.len(), "Submitting existing files");
            for file in files {
                self.handle_event(FsEvent::add(file)).await?;
            }
        }
        self.queue.submit(&root, ChangeTask::Publish);
        Ok(root)
    }

    /// Translate one filesystem event into a queued task
    pub async fn handle_event(&self, event: FsEvent) -> Result<(), SyncError> {
        let (root, directory) = self
            .locate(&event.path)
            .ok_or_else(|| SyncError::Unwatched(event.path.clone()))?;
        let Some(path) = self.object_path(&root, &directory, &event.path)? else {
            return Ok(());
        };

        match event.kind {
            FsEventKind::Unlink => {
                debug!(root = %root, path = %path, "Queueing remove");
                self.queue.submit(&root, ChangeTask::Remove { path });
            }
            FsEventKind::Add | FsEventKind::Change => {
                let metadata = match tokio::fs::metadata(&event.path).await {
                    Ok(metadata) => metadata,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        debug!(root = %root, path = %path, "File vanished before it was read");
                        return Ok(());
                    }
                    Err(e) => return Err(e.into()),
                };
                if !metadata.is_dir() {
                    self.queue_upsert(&root, path, &event.path, event.kind).await?;
                } else if event.kind == FsEventKind::Add {
                    // A directory moved in brings files that get no events of their own
                    for file in self.scan(&event.path).await? {
                        if let Some(path) = self.object_path(&root, &directory, &file)? {
                            self.queue_upsert(&root, path, &file, FsEventKind::Add).await?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Store path for a file below `directory`; `None` for the directory
    /// itself and for ignored paths
    fn object_path(
        &self,
        root: &Root,
        directory: &Path,
        file: &Path,
    ) -> Result<Option<ObjectPath>, SyncError> {
        let relative = match file.strip_prefix(directory) {
            Ok(relative) if !relative.as_os_str().is_empty() => relative,
            _ => return Ok(None),
        };
        if self.options.ignore.is_ignored(relative) {
            return Ok(None);
        }
        Ok(Some(ObjectPath::for_file(root, relative)?))
    }

    async fn queue_upsert(
        &self,
        root: &Root,
        path: ObjectPath,
        file: &Path,
        kind: FsEventKind,
    ) -> Result<(), SyncError> {
        let bytes = match tokio::fs::read(file).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(root = %root, path = %path, "File vanished before it was read");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        debug!(root = %root, path = %path, kind = %kind, bytes = bytes.len(), "Queueing upsert");
        self.queue.submit(root, ChangeTask::Upsert { path, bytes });
        Ok(())
    }

    /// Consume events until `shutdown` resolves, then drain every queue
    pub async fn run<F>(
        &self,
        mut events: mpsc::UnboundedReceiver<FsEvent>,
        shutdown: F,
    ) -> Result<(), SyncError>
    where
        F: Future<Output = ()>,
    {
        let mut fired = self.fired.lock().await;
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => {
                        if let Err(e) = self.handle_event(event).await {
                            warn!(error = %e, "Failed to handle filesystem event");
                        }
                    }
                    None => {
                        info!("Filesystem event stream closed");
                        break;
                    }
                },
                Some(root) = fired.recv() => {
                    self.queue.submit(&root, ChangeTask::Publish);
                }
            }
        }
        drop(fired);
        self.flush().await;
        Ok(())
    }

    /// Wait for queued work, publishing any root whose debounce is still pending
    pub async fn flush(&self) {
        self.queue.flush_all().await;
        let pending = self.debouncer.take_armed();
        if pending.is_empty() {
            return;
        }
        for root in &pending {
            self.queue.submit(root, ChangeTask::Publish);
        }
        self.queue.flush_all().await;
    }

    pub async fn shutdown(&self) {
        self.flush().await;
        self.queue.shutdown().await;
    }

    fn locate(&self, path: &Path) -> Option<(Root, PathBuf)> {
        self.watched
            .read()
            .iter()
            .filter(|w| path.starts_with(&w.directory))
            .max_by_key(|w| w.directory.components().count())
            .map(|w| (w.root.clone(), w.directory.clone()))
    }

    async fn scan(&self, directory: &Path) -> Result<Vec<PathBuf>, SyncError> {
        let directory = directory.to_path_buf();
        let ignore = self.options.ignore.clone();
        tokio::task::spawn_blocking(move || initial_scan(&directory, &ignore))
            .await
            .map_err(|e| SyncError::Startup(format!("Scan task failed: {}", e)))?
    }
}
