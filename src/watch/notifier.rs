//! `notify`-backed filesystem notifier

use crate::error::SyncError;
use crate::watch::FsEvent;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{error, info, trace, warn};

/// Recursive watch on one directory. Events stop when this is dropped.
pub struct FsNotifier {
    _watcher: RecommendedWatcher,
    directory: PathBuf,
}

impl FsNotifier {
    pub fn watch(directory: &Path, tx: mpsc::UnboundedSender<FsEvent>) -> Result<Self, SyncError> {
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for fs_event in convert_event(&event) {
                    trace!(kind = %fs_event.kind, path = ?fs_event.path, "Filesystem event");
                    if tx.send(fs_event).is_err() {
                        error!("Filesystem event receiver dropped");
                        return;
                    }
                }
            }
            Err(e) => warn!(error = %e, "Watch error"),
        })
        .map_err(|e| SyncError::Startup(format!("Failed to create watcher: {}", e)))?;

        watcher
            .watch(directory, RecursiveMode::Recursive)
            .map_err(|e| {
                SyncError::Startup(format!("Failed to watch {}: {}", directory.display(), e))
            })?;

        info!(directory = ?directory, "Watching directory");
        Ok(Self {
            _watcher: watcher,
            directory: directory.to_path_buf(),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

/// Map a raw notify event onto add/change/unlink events.
///
/// Renames become an unlink of the old path plus an add of the new one.
/// Metadata-only changes are dropped since they never alter content.
pub fn convert_event(event: &Event) -> Vec<FsEvent> {
    match &event.kind {
        EventKind::Create(_) => event.paths.iter().cloned().map(FsEvent::add).collect(),
        EventKind::Modify(ModifyKind::Name(mode)) => match (mode, event.paths.as_slice()) {
            (_, [from, to]) => vec![FsEvent::unlink(from.clone()), FsEvent::add(to.clone())],
            (RenameMode::From, [path]) => vec![FsEvent::unlink(path.clone())],
            (RenameMode::To, [path]) => vec![FsEvent::add(path.clone())],
            // Single-path rename of unknown direction
            (_, [path]) => {
                if path.exists() {
                    vec![FsEvent::add(path.clone())]
                } else {
                    vec![FsEvent::unlink(path.clone())]
                }
            }
            _ => Vec::new(),
        },
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => event.paths.iter().cloned().map(FsEvent::change).collect(),
        EventKind::Remove(_) => event.paths.iter().cloned().map(FsEvent::unlink).collect(),
        _ => Vec::new(),
    }
}
