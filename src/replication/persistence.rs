//! Sled-backed local replica of the document store.

use crate::error::DocumentError;
use crate::replication::{Document, DocumentStore, ReplicationEvent, Revision, StoredDocument};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use sled::{Db, Tree};
use std::path::Path;
use tokio::sync::broadcast;
use tracing::{debug, trace};

const TREE_DOCUMENTS: &str = "documents";
const EVENT_CAPACITY: usize = 256;

pub struct SledDocumentStore {
    db: Db,
    documents: Tree,
    peer_id: String,
    /// Highest clock observed locally or from peers; guards every write
    clock: Mutex<u64>,
    events: broadcast::Sender<ReplicationEvent>,
}

impl SledDocumentStore {
    pub fn new<P: AsRef<Path>>(path: P, peer_id: impl Into<String>) -> Result<Self, DocumentError> {
        Self::from_db(sled::open(path)?, peer_id)
    }

    pub fn temporary(peer_id: impl Into<String>) -> Result<Self, DocumentError> {
        Self::from_db(sled::Config::new().temporary(true).open()?, peer_id)
    }

    pub fn from_db(db: Db, peer_id: impl Into<String>) -> Result<Self, DocumentError> {
        let documents = db.open_tree(TREE_DOCUMENTS)?;
        let mut clock = 0;
        for item in documents.iter() {
            let (key, value) = item?;
            let doc = decode(&String::from_utf8_lossy(&key), &value)?;
            clock = clock.max(doc.revision.clock);
        }
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            db,
            documents,
            peer_id: peer_id.into(),
            clock: Mutex::new(clock),
            events,
        })
    }

    pub fn flush(&self) -> Result<(), DocumentError> {
        self.db.flush()?;
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<StoredDocument>, DocumentError> {
        match self.documents.get(key.as_bytes())? {
            Some(raw) => decode(key, &raw).map(Some),
            None => Ok(None),
        }
    }

    fn store(&self, doc: &StoredDocument) -> Result<(), DocumentError> {
        let value = serde_json::to_vec(doc).map_err(|source| DocumentError::Codec {
            key: doc.id.clone(),
            source,
        })?;
        self.documents.insert(doc.id.as_bytes(), value)?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for SledDocumentStore {
    fn peer_id(&self) -> &str {
        &self.peer_id
    }

    async fn put(&self, document: Document) -> Result<Revision, DocumentError> {
        if document.id.is_empty() {
            return Err(DocumentError::InvalidKey(document.id));
        }
        let mut clock = self.clock.lock();
        *clock += 1;
        let revision = Revision {
            clock: *clock,
            peer: self.peer_id.clone(),
        };
        let stored = StoredDocument {
            id: document.id,
            body: document.body,
            revision: revision.clone(),
            updated_at: Utc::now(),
        };
        self.store(&stored)?;
        trace!(key = %stored.id, clock = revision.clock, "Stored local document");
        Ok(revision)
    }

    async fn get(&self, key: &str) -> Result<Option<StoredDocument>, DocumentError> {
        self.load(key)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<StoredDocument>, DocumentError> {
        let mut out = Vec::new();
        for item in self.documents.scan_prefix(prefix.as_bytes()) {
            let (key, value) = item?;
            out.push(decode(&String::from_utf8_lossy(&key), &value)?);
        }
        Ok(out)
    }

    async fn apply_remote(&self, document: StoredDocument) -> Result<bool, DocumentError> {
        if document.id.is_empty() {
            return Err(DocumentError::InvalidKey(document.id));
        }
        let accepted = {
            let mut clock = self.clock.lock();
            *clock = (*clock).max(document.revision.clock);
            let newer = match self.load(&document.id)? {
                Some(existing) => document.revision > existing.revision,
                None => true,
            };
            if newer {
                self.store(&document)?;
            }
            newer
        };

        if accepted {
            debug!(
                key = %document.id,
                origin = %document.revision.peer,
                clock = document.revision.clock,
                "Replicated document"
            );
            // No subscribers is not an error
            let _ = self.events.send(ReplicationEvent {
                origin: document.revision.peer.clone(),
                keys: vec![document.id.clone()],
            });
        } else {
            trace!(key = %document.id, "Ignored stale replicated document");
        }
        Ok(accepted)
    }

    fn subscribe(&self) -> broadcast::Receiver<ReplicationEvent> {
        self.events.subscribe()
    }
}

fn decode(key: &str, raw: &[u8]) -> Result<StoredDocument, DocumentError> {
    serde_json::from_slice(raw).map_err(|source| DocumentError::Codec {
        key: key.to_string(),
        source,
    })
}
