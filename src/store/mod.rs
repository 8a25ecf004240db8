//! Content Store
//!
//! Path-addressed view over content-addressed storage. Every entry has a
//! deterministic [`ContentId`] derived from its bytes (files) or from its
//! sorted listing (directories), so identical subtrees share an id.

pub mod hasher;
pub mod persistence;

pub use persistence::SledContentStore;

use crate::error::StoreError;
use crate::types::{ContentId, NodeKind, ObjectPath};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result of a `stat` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    pub content_id: ContentId,
    pub kind: NodeKind,
    /// File length, or cumulative file bytes for a directory
    pub size: u64,
}

/// One immediate child reported by `list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListEntry {
    pub name: String,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Create the file if it does not exist
    pub create: bool,
    /// Create missing parent directories
    pub parents: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MkdirOptions {
    pub parents: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CopyOptions {
    pub parents: bool,
    /// Replace an existing destination in the same atomic step
    pub overwrite: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveOptions {
    pub recursive: bool,
}

/// Content store interface.
///
/// Implementations must make each individual call atomic: a concurrent reader
/// observes an entry either before or after a mutation, never half-applied.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn write(
        &self,
        path: &ObjectPath,
        bytes: &[u8],
        options: WriteOptions,
    ) -> Result<(), StoreError>;

    async fn mkdir(&self, path: &ObjectPath, options: MkdirOptions) -> Result<(), StoreError>;

    /// Fails with [`StoreError::NotFound`] if the path is absent
    async fn stat(&self, path: &ObjectPath) -> Result<Stat, StoreError>;

    async fn list(&self, path: &ObjectPath) -> Result<Vec<ListEntry>, StoreError>;

    async fn copy(
        &self,
        src: &ObjectPath,
        dst: &ObjectPath,
        options: CopyOptions,
    ) -> Result<(), StoreError>;

    async fn remove(&self, path: &ObjectPath, options: RemoveOptions) -> Result<(), StoreError>;

    async fn read(&self, path: &ObjectPath) -> Result<Vec<u8>, StoreError>;

    /// `stat` with absence as a value rather than an error
    async fn stat_opt(&self, path: &ObjectPath) -> Result<Option<Stat>, StoreError> {
        match self.stat(path).await {
            Ok(stat) => Ok(Some(stat)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
