//! Replicated document store
//!
//! Eventually-consistent key/document store. Local writes are stamped with a
//! Lamport [`Revision`]; documents arriving from peers replace the local copy
//! only when their revision is newer, and every accepted remote update fires a
//! [`ReplicationEvent`] for subscribers.

pub mod persistence;

pub use persistence::SledDocumentStore;

use crate::error::DocumentError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Document as submitted by a local writer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub body: serde_json::Value,
}

impl Document {
    pub fn new(id: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            body,
        }
    }
}

/// Lamport clock tagged with the writing peer.
///
/// Ordered by clock, then peer id, which gives every pair of concurrent
/// writes a single winner on every replica.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Revision {
    pub clock: u64,
    pub peer: String,
}

/// Document as held by a replica
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    pub body: serde_json::Value,
    pub revision: Revision,
    pub updated_at: DateTime<Utc>,
}

/// Fired after remote documents were merged into the local replica
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationEvent {
    /// Peer the update came from
    pub origin: String,
    /// Keys whose local value changed
    pub keys: Vec<String>,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Identity stamped on local revisions
    fn peer_id(&self) -> &str;

    async fn put(&self, document: Document) -> Result<Revision, DocumentError>;

    async fn get(&self, key: &str) -> Result<Option<StoredDocument>, DocumentError>;

    /// All documents whose key starts with `prefix`, in key order
    async fn list(&self, prefix: &str) -> Result<Vec<StoredDocument>, DocumentError>;

    /// Merge a document received from a peer. Returns whether it was accepted.
    async fn apply_remote(&self, document: StoredDocument) -> Result<bool, DocumentError>;

    /// Subscribe to replication events
    fn subscribe(&self) -> broadcast::Receiver<ReplicationEvent>;
}
