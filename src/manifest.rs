//! Root Manifest
//!
//! The manifest maps every Root to its current root content id and is shared
//! with peers through the replicated document store. Each root's entry is an
//! independent document keyed `<manifest id>/<root>`, so publishing one root
//! never reads, and never overwrites, another root's entry.

use crate::error::{DocumentError, SyncError};
use crate::replication::{Document, DocumentStore, Revision, StoredDocument};
use crate::types::{ContentId, Root};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_MANIFEST_ID: &str = "distribution";

/// Assembled view of every root entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestDocument {
    pub id: String,
    #[serde(default)]
    pub entries: BTreeMap<Root, ContentId>,
}

impl ManifestDocument {
    pub fn empty(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn get(&self, root: &Root) -> Option<&ContentId> {
        self.entries.get(root)
    }
}

/// Body of one per-root manifest document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub root: Root,
    pub content_id: ContentId,
}

pub struct ManifestStore {
    documents: Arc<dyn DocumentStore>,
    manifest_id: String,
    cache: Arc<RwLock<ManifestDocument>>,
    /// Last id this process published per root, with its publish sequence
    owned: Arc<RwLock<HashMap<Root, (ContentId, u64)>>>,
    publishes: Arc<AtomicU64>,
}

impl ManifestStore {
    pub fn new(documents: Arc<dyn DocumentStore>, manifest_id: impl Into<String>) -> Self {
        let manifest_id = manifest_id.into();
        Self {
            documents,
            cache: Arc::new(RwLock::new(ManifestDocument::empty(manifest_id.clone()))),
            manifest_id,
            owned: Arc::new(RwLock::new(HashMap::new())),
            publishes: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn manifest_id(&self) -> &str {
        &self.manifest_id
    }

    fn prefix(&self) -> String {
        format!("{}/", self.manifest_id)
    }

    fn key(&self, root: &Root) -> String {
        format!("{}/{}", self.manifest_id, root)
    }

    /// Publish `content_id` as the current entry for `root`
    pub async fn merge_root_hash(
        &self,
        root: &Root,
        content_id: ContentId,
    ) -> Result<Revision, DocumentError> {
        let key = self.key(root);
        let body = entry_body(&key, root, content_id)?;
        let revision = self.documents.put(Document::new(key, body)).await?;

        let sequence = self.publishes.fetch_add(1, Ordering::SeqCst) + 1;
        // Cache first: refresh patches the cache while holding this lock
        let mut cache = self.cache.write();
        self.owned.write().insert(root.clone(), (content_id, sequence));
        cache.entries.insert(root.clone(), content_id);
        drop(cache);
        debug!(root = %root, content_id = %content_id.short(), clock = revision.clock, "Merged root hash");
        Ok(revision)
    }

    /// Read the manifest from the local replica
    pub async fn get(&self) -> Result<ManifestDocument, DocumentError> {
        let mut manifest = ManifestDocument::empty(self.manifest_id.clone());
        for doc in self.documents.list(&self.prefix()).await? {
            match parse_entry(&doc) {
                Ok(entry) => {
                    manifest.entries.insert(entry.root, entry.content_id);
                }
                Err(e) => warn!(key = %doc.id, error = %e, "Skipping malformed manifest entry"),
            }
        }
        Ok(manifest)
    }

    /// Re-read the manifest and replace the cache with it.
    ///
    /// A local publish that lands while the listing is in flight keeps its
    /// id in the cache instead of being rolled back to the listed one.
    pub async fn refresh(&self) -> Result<ManifestDocument, DocumentError> {
        let started = self.publishes.load(Ordering::SeqCst);
        let mut manifest = self.get().await?;

        let mut cache = self.cache.write();
        for (root, (content_id, sequence)) in self.owned.read().iter() {
            if *sequence > started {
                manifest.entries.insert(root.clone(), *content_id);
            }
        }
        *cache = manifest.clone();
        Ok(manifest)
    }

    /// Last manifest seen by this process, without touching the store
    pub fn cached(&self) -> ManifestDocument {
        self.cache.read().clone()
    }

    /// Publish snapshot entries that the document store does not hold yet
    pub async fn seed(&self, snapshot: &ManifestDocument) -> Result<usize, DocumentError> {
        let current = self.get().await?;
        let mut seeded = 0;
        for (root, content_id) in &snapshot.entries {
            if current.entries.contains_key(root) {
                continue;
            }
            let key = self.key(root);
            let body = entry_body(&key, root, *content_id)?;
            self.documents.put(Document::new(key, body)).await?;
            seeded += 1;
        }
        self.refresh().await?;
        if seeded > 0 {
            info!(seeded, "Seeded manifest from snapshot");
        }
        Ok(seeded)
    }

    /// Keep the cache current with replicated updates.
    ///
    /// `callback` receives the refreshed manifest after every replication event
    /// touching a manifest entry. A peer overwriting an entry this process owns
    /// with a different id is reported as a write conflict and left in place.
    pub fn on_remote_update<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: Fn(&ManifestDocument) + Send + Sync + 'static,
    {
        let mut events = self.documents.subscribe();
        let listener = ManifestStore {
            documents: Arc::clone(&self.documents),
            manifest_id: self.manifest_id.clone(),
            cache: Arc::clone(&self.cache),
            owned: Arc::clone(&self.owned),
            publishes: Arc::clone(&self.publishes),
        };

        tokio::spawn(async move {
            let prefix = listener.prefix();
            loop {
                let event = match events.recv().await {
                    Ok(event) => Some(event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Replication events lagged; refreshing manifest");
                        None
                    }
                    Err(RecvError::Closed) => break,
                };

                if let Some(event) = &event {
                    if !event.keys.iter().any(|k| k.starts_with(&prefix)) {
                        continue;
                    }
                    info!(origin = %event.origin, keys = ?event.keys, "Manifest replicated");
                }

                let manifest = match listener.refresh().await {
                    Ok(manifest) => manifest,
                    Err(e) => {
                        warn!(error = %e, "Failed to refresh manifest after replication");
                        continue;
                    }
                };

                if let Some(event) = &event {
                    if event.origin != listener.documents.peer_id() {
                        for conflict in listener.conflicts(&manifest) {
                            warn!(error = %conflict, origin = %event.origin, "Replicated update overwrote a local root");
                        }
                    }
                }
                callback(&manifest);
            }
            debug!("Manifest listener stopped");
        })
    }

    fn conflicts(&self, manifest: &ManifestDocument) -> Vec<SyncError> {
        self.owned
            .read()
            .iter()
            .filter_map(|(root, (local, _))| match manifest.entries.get(root) {
                Some(remote) if remote != local => Some(SyncError::ManifestWriteConflict {
                    root: root.clone(),
                    local: *local,
                    remote: *remote,
                }),
                _ => None,
            })
            .collect()
    }
}

fn entry_body(key: &str, root: &Root, content_id: ContentId) -> Result<serde_json::Value, DocumentError> {
    serde_json::to_value(ManifestEntry {
        root: root.clone(),
        content_id,
    })
    .map_err(|source| DocumentError::Codec {
        key: key.to_string(),
        source,
    })
}

fn parse_entry(doc: &StoredDocument) -> Result<ManifestEntry, DocumentError> {
    serde_json::from_value(doc.body.clone()).map_err(|source| DocumentError::Codec {
        key: doc.id.clone(),
        source,
    })
}

/// Local JSON copy of the manifest for bootstrapping without peers
#[derive(Debug, Clone)]
pub struct ManifestSnapshot {
    path: PathBuf,
}

impl ManifestSnapshot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot; a missing file is `None`
    pub fn load(&self) -> Result<Option<ManifestDocument>, SyncError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|e| SyncError::Snapshot {
                path: self.path.clone(),
                reason: e.to_string(),
            })
    }

    /// Write the snapshot through a temp file and rename
    pub fn save(&self, manifest: &ManifestDocument) -> Result<(), SyncError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(manifest).map_err(|e| SyncError::Snapshot {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        debug!(path = ?self.path, entries = manifest.entries.len(), "Saved manifest snapshot");
        Ok(())
    }
}
