//! Error types for the mirroring engine and its stores.

use crate::types::{ContentId, ObjectPath, Root};
use thiserror::Error;

/// Content store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(ObjectPath),

    #[error("Already exists: {0}")]
    AlreadyExists(ObjectPath),

    #[error("Not a directory: {0}")]
    NotADirectory(ObjectPath),

    #[error("Is a directory: {0}")]
    IsADirectory(ObjectPath),

    #[error("Directory not empty: {0}")]
    NotEmpty(ObjectPath),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Corrupt store entry at {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("Storage backend error: {0}")]
    Backend(#[from] sled::Error),

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl StoreError {
    /// Absent entries are an expected outcome when events race with store state
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Replicated document store errors
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Document backend error: {0}")]
    Backend(#[from] sled::Error),

    #[error("Document codec error for {key}: {source}")]
    Codec {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid document key: {0}")]
    InvalidKey(String),
}

/// Engine-level errors
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Store operation {op} failed for {path}: {source}")]
    Transient {
        op: &'static str,
        path: ObjectPath,
        #[source]
        source: StoreError,
    },

    #[error("Manifest write conflict for root {root}: local {local}, replicated {remote}")]
    ManifestWriteConflict {
        root: Root,
        local: ContentId,
        remote: ContentId,
    },

    #[error("Startup failed: {0}")]
    Startup(String),

    #[error("Path {0:?} is not inside any watched directory")]
    Unwatched(std::path::PathBuf),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Manifest snapshot error at {path:?}: {reason}")]
    Snapshot {
        path: std::path::PathBuf,
        reason: String,
    },

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Document store error: {0}")]
    Document(#[from] DocumentError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<config::ConfigError> for SyncError {
    fn from(err: config::ConfigError) -> Self {
        SyncError::ConfigError(err.to_string())
    }
}
