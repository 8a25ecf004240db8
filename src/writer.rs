//! Object Writer
//!
//! Upsert and delete primitives against the content store. New bytes are
//! staged at a per-call scratch path and swapped into place in one store
//! call, so the target always holds either the old or the new version.

use crate::error::{StoreError, SyncError};
use crate::store::{ContentStore, CopyOptions, RemoveOptions, WriteOptions};
use crate::types::{ContentId, ObjectPath};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of a delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Removed,
    /// Nothing was there; deletes are idempotent
    AlreadyAbsent,
}

pub struct ObjectWriter {
    store: Arc<dyn ContentStore>,
    scratch_prefix: ObjectPath,
    sequence: AtomicU64,
}

impl ObjectWriter {
    pub fn new(store: Arc<dyn ContentStore>, scratch_prefix: ObjectPath) -> Self {
        Self {
            store,
            scratch_prefix,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn scratch_prefix(&self) -> &ObjectPath {
        &self.scratch_prefix
    }

    /// Write `bytes` to `path` and return the new content id of the root owning `path`.
    pub async fn upsert(&self, path: &ObjectPath, bytes: &[u8]) -> Result<ContentId, SyncError> {
        let owner = owning_root(path)?;
        if path.starts_with(&self.scratch_prefix) {
            return Err(StoreError::InvalidPath(format!(
                "{} is inside the scratch area {}",
                path, self.scratch_prefix
            ))
            .into());
        }

        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let scratch = self
            .scratch_prefix
            .join(&format!("{}-{}", std::process::id(), seq))?;

        let staged = WriteOptions {
            create: true,
            parents: true,
        };
        self.store
            .write(&scratch, bytes, staged)
            .await
            .map_err(|source| SyncError::Transient {
                op: "write",
                path: scratch.clone(),
                source,
            })?;

        let swap = CopyOptions {
            parents: true,
            overwrite: true,
        };
        if let Err(source) = self.store.copy(&scratch, path, swap).await {
            self.discard_scratch(&scratch).await;
            return Err(SyncError::Transient {
                op: "copy",
                path: path.clone(),
                source,
            });
        }
        self.discard_scratch(&scratch).await;

        let content_id = self.content_id(&owner).await?;
        debug!(path = %path, bytes = bytes.len(), content_id = %content_id.short(), "Upserted object");
        Ok(content_id)
    }

    /// Delete `path` (recursively for directories). Absence is not an error.
    pub async fn remove(&self, path: &ObjectPath) -> Result<Removal, SyncError> {
        owning_root(path)?;
        match self
            .store
            .remove(path, RemoveOptions { recursive: true })
            .await
        {
            Ok(()) => {
                debug!(path = %path, "Removed object");
                Ok(Removal::Removed)
            }
            Err(e) if e.is_not_found() => {
                debug!(path = %path, "Remove of absent object ignored");
                Ok(Removal::AlreadyAbsent)
            }
            Err(source) => Err(SyncError::Transient {
                op: "remove",
                path: path.clone(),
                source,
            }),
        }
    }

    /// Current content id of `path`
    pub async fn content_id(&self, path: &ObjectPath) -> Result<ContentId, SyncError> {
        self.store
            .stat(path)
            .await
            .map(|stat| stat.content_id)
            .map_err(|source| SyncError::Transient {
                op: "stat",
                path: path.clone(),
                source,
            })
    }

    async fn discard_scratch(&self, scratch: &ObjectPath) {
        if let Err(e) = self
            .store
            .remove(scratch, RemoveOptions { recursive: true })
            .await
        {
            if !e.is_not_found() {
                // Startup reconciliation clears the scratch area, so a leftover is harmless
                warn!(path = %scratch, error = %e, "Failed to discard scratch entry");
            }
        }
    }
}

/// The top-level directory (`/Root`) that owns `path`
fn owning_root(path: &ObjectPath) -> Result<ObjectPath, StoreError> {
    match path.top_level() {
        Some(top) if path.depth() > 1 => ObjectPath::parse(&format!("/{}", top)),
        _ => Err(StoreError::InvalidPath(format!(
            "{} is not below a root",
            path
        ))),
    }
}
