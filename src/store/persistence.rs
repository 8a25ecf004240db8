//! Sled-backed content store
//!
//! Two trees share one database:
//! - `entries`: object path -> [`EntryRecord`] (bincode)
//! - `blobs`: content id -> file bytes
//!
//! The store root `/` is an implicit directory and is never persisted.
//! A blob lives exactly as long as some file entry references it; mutations
//! are serialized so the reclaim sweep never races a write of the same bytes.

use crate::error::StoreError;
use crate::store::hasher;
use crate::store::{
    ContentStore, CopyOptions, ListEntry, MkdirOptions, RemoveOptions, Stat, WriteOptions,
};
use crate::types::{ContentId, NodeKind, ObjectPath};
use async_trait::async_trait;
use bincode;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sled::{Batch, Db, Tree};
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace};

const TREE_ENTRIES: &str = "entries";
const TREE_BLOBS: &str = "blobs";

/// Persisted form of one path entry
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntryRecord {
    kind: NodeKind,
    blob: Option<ContentId>,
    size: u64,
}

impl EntryRecord {
    fn directory() -> Self {
        Self {
            kind: NodeKind::Directory,
            blob: None,
            size: 0,
        }
    }

    fn file(blob: ContentId, size: u64) -> Self {
        Self {
            kind: NodeKind::File,
            blob: Some(blob),
            size,
        }
    }
}

/// Sled implementation of [`ContentStore`]
#[derive(Clone)]
pub struct SledContentStore {
    db: Db,
    entries: Tree,
    blobs: Tree,
    mutation: Arc<Mutex<()>>,
}

impl SledContentStore {
    /// Open (or create) a store at the given directory
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::from_db(sled::open(path)?)
    }

    /// In-memory store that disappears on drop
    pub fn temporary() -> Result<Self, StoreError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    pub fn from_db(db: Db) -> Result<Self, StoreError> {
        let entries = db.open_tree(TREE_ENTRIES)?;
        let blobs = db.open_tree(TREE_BLOBS)?;
        Ok(Self {
            db,
            entries,
            blobs,
            mutation: Arc::new(Mutex::new(())),
        })
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    fn entry(&self, path: &ObjectPath) -> Result<Option<EntryRecord>, StoreError> {
        if path.is_root() {
            return Ok(Some(EntryRecord::directory()));
        }
        match self.entries.get(path.as_str().as_bytes())? {
            Some(raw) => decode(path.as_str(), &raw).map(Some),
            None => Ok(None),
        }
    }

    /// Every entry strictly below `path`, in key order
    fn descendants(&self, path: &ObjectPath) -> Result<Vec<(ObjectPath, EntryRecord)>, StoreError> {
        let prefix = child_prefix(path);
        let mut out = Vec::new();
        for item in self.entries.scan_prefix(prefix.as_bytes()) {
            let (key, value) = item?;
            let key = String::from_utf8(key.to_vec()).map_err(|e| StoreError::Corrupt {
                path: prefix.clone(),
                reason: format!("non utf-8 key: {}", e),
            })?;
            let record = decode(&key, &value)?;
            out.push((ObjectPath::parse(&key)?, record));
        }
        Ok(out)
    }

    /// Queue creation of missing ancestors of `path` into `batch`
    fn plan_parents(
        &self,
        path: &ObjectPath,
        parents: bool,
        batch: &mut Batch,
    ) -> Result<(), StoreError> {
        let mut missing = Vec::new();
        let mut cursor = path.parent();
        while let Some(dir) = cursor {
            match self.entry(&dir)? {
                Some(record) if record.kind == NodeKind::Directory => break,
                Some(_) => return Err(StoreError::NotADirectory(dir)),
                None if !parents => return Err(StoreError::NotFound(dir)),
                None => {
                    cursor = dir.parent();
                    missing.push(dir);
                }
            }
        }
        for dir in missing {
            batch.insert(dir.as_str().as_bytes(), encode(&EntryRecord::directory())?);
        }
        Ok(())
    }

    /// Drop every candidate blob that no file entry references any more
    fn reclaim(&self, mut candidates: HashSet<ContentId>) -> Result<(), StoreError> {
        if candidates.is_empty() {
            return Ok(());
        }
        for item in self.entries.iter() {
            let (key, value) = item?;
            let record = decode(&String::from_utf8_lossy(&key), &value)?;
            if let Some(blob) = record.blob {
                candidates.remove(&blob);
                if candidates.is_empty() {
                    return Ok(());
                }
            }
        }
        for blob in &candidates {
            self.blobs.remove(blob.as_bytes())?;
        }
        debug!(reclaimed = candidates.len(), "Reclaimed unreferenced blobs");
        Ok(())
    }

    fn directory_stat(&self, path: &ObjectPath) -> Result<Stat, StoreError> {
        let mut records = self.descendants(path)?;
        // Deepest first so every child id exists before its parent is folded
        records.sort_by_key(|(p, _)| Reverse(p.depth()));

        let mut listings: HashMap<ObjectPath, Vec<(String, NodeKind, ContentId)>> = HashMap::new();
        let mut total_size = 0u64;

        for (entry_path, record) in records {
            let id = match record.kind {
                NodeKind::File => {
                    total_size += record.size;
                    record.blob.ok_or_else(|| StoreError::Corrupt {
                        path: entry_path.to_string(),
                        reason: "file entry without blob".to_string(),
                    })?
                }
                NodeKind::Directory => {
                    let mut children = listings.remove(&entry_path).unwrap_or_default();
                    children.sort_by(|a, b| a.0.cmp(&b.0));
                    hasher::compute_directory_id(&children)
                }
            };
            if let Some(parent) = entry_path.parent() {
                listings.entry(parent).or_default().push((
                    entry_path.name().to_string(),
                    record.kind,
                    id,
                ));
            }
        }

        let mut children = listings.remove(path).unwrap_or_default();
        children.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(Stat {
            content_id: hasher::compute_directory_id(&children),
            kind: NodeKind::Directory,
            size: total_size,
        })
    }
}

#[async_trait]
impl ContentStore for SledContentStore {
    async fn write(
        &self,
        path: &ObjectPath,
        bytes: &[u8],
        options: WriteOptions,
    ) -> Result<(), StoreError> {
        if path.is_root() {
            return Err(StoreError::IsADirectory(path.clone()));
        }
        let _guard = self.mutation.lock();
        let existing = self.entry(path)?;
        let mut batch = Batch::default();
        let mut released = HashSet::new();
        match existing {
            Some(record) if record.kind == NodeKind::Directory => {
                return Err(StoreError::IsADirectory(path.clone()))
            }
            Some(record) => released.extend(record.blob),
            None if !options.create => return Err(StoreError::NotFound(path.clone())),
            None => self.plan_parents(path, options.parents, &mut batch)?,
        }

        let blob = hasher::compute_blob_id(bytes);
        // Blobs are immutable and keyed by content, so inserting first is safe
        self.blobs.insert(blob.as_bytes(), bytes)?;
        batch.insert(
            path.as_str().as_bytes(),
            encode(&EntryRecord::file(blob, bytes.len() as u64))?,
        );
        self.entries.apply_batch(batch)?;
        released.remove(&blob);
        self.reclaim(released)?;
        trace!(path = %path, blob = %blob.short(), "Wrote entry");
        Ok(())
    }

    async fn mkdir(&self, path: &ObjectPath, options: MkdirOptions) -> Result<(), StoreError> {
        let _guard = self.mutation.lock();
        match self.entry(path)? {
            Some(record) if record.kind == NodeKind::Directory && options.parents => Ok(()),
            Some(_) => Err(StoreError::AlreadyExists(path.clone())),
            None => {
                let mut batch = Batch::default();
                self.plan_parents(path, options.parents, &mut batch)?;
                batch.insert(path.as_str().as_bytes(), encode(&EntryRecord::directory())?);
                self.entries.apply_batch(batch)?;
                Ok(())
            }
        }
    }

    async fn stat(&self, path: &ObjectPath) -> Result<Stat, StoreError> {
        match self.entry(path)? {
            None => Err(StoreError::NotFound(path.clone())),
            Some(record) if record.kind == NodeKind::File => Ok(Stat {
                content_id: record.blob.ok_or_else(|| StoreError::Corrupt {
                    path: path.to_string(),
                    reason: "file entry without blob".to_string(),
                })?,
                kind: NodeKind::File,
                size: record.size,
            }),
            Some(_) => self.directory_stat(path),
        }
    }

    async fn list(&self, path: &ObjectPath) -> Result<Vec<ListEntry>, StoreError> {
        match self.entry(path)? {
            None => return Err(StoreError::NotFound(path.clone())),
            Some(record) if record.kind == NodeKind::File => {
                return Err(StoreError::NotADirectory(path.clone()))
            }
            Some(_) => {}
        }
        let depth = path.depth() + 1;
        Ok(self
            .descendants(path)?
            .into_iter()
            .filter(|(child, _)| child.depth() == depth)
            .map(|(child, record)| ListEntry {
                name: child.name().to_string(),
                kind: record.kind,
            })
            .collect())
    }

    async fn copy(
        &self,
        src: &ObjectPath,
        dst: &ObjectPath,
        options: CopyOptions,
    ) -> Result<(), StoreError> {
        if src.is_root() || dst.is_root() || dst.starts_with(src) {
            return Err(StoreError::InvalidPath(format!(
                "cannot copy {} to {}",
                src, dst
            )));
        }
        let _guard = self.mutation.lock();
        let source = self
            .entry(src)?
            .ok_or_else(|| StoreError::NotFound(src.clone()))?;

        let mut batch = Batch::default();
        let mut released = HashSet::new();
        match self.entry(dst)? {
            Some(_) if !options.overwrite => return Err(StoreError::AlreadyExists(dst.clone())),
            Some(replaced) => {
                released.extend(replaced.blob);
                batch.remove(dst.as_str().as_bytes());
                for (old, record) in self.descendants(dst)? {
                    released.extend(record.blob);
                    batch.remove(old.as_str().as_bytes());
                }
            }
            None => self.plan_parents(dst, options.parents, &mut batch)?,
        }

        batch.insert(dst.as_str().as_bytes(), encode(&source)?);
        if source.kind == NodeKind::Directory {
            for (child, record) in self.descendants(src)? {
                if let Some(target) = child.rebase(src, dst) {
                    batch.insert(target.as_str().as_bytes(), encode(&record)?);
                }
            }
        }
        self.entries.apply_batch(batch)?;
        self.reclaim(released)?;
        Ok(())
    }

    async fn remove(&self, path: &ObjectPath, options: RemoveOptions) -> Result<(), StoreError> {
        if path.is_root() {
            return Err(StoreError::InvalidPath("cannot remove the store root".to_string()));
        }
        let _guard = self.mutation.lock();
        let record = self
            .entry(path)?
            .ok_or_else(|| StoreError::NotFound(path.clone()))?;

        let mut batch = Batch::default();
        let mut released: HashSet<ContentId> = record.blob.into_iter().collect();
        if record.kind == NodeKind::Directory {
            let descendants = self.descendants(path)?;
            if !descendants.is_empty() && !options.recursive {
                return Err(StoreError::NotEmpty(path.clone()));
            }
            for (child, child_record) in descendants {
                released.extend(child_record.blob);
                batch.remove(child.as_str().as_bytes());
            }
        }
        batch.remove(path.as_str().as_bytes());
        self.entries.apply_batch(batch)?;
        self.reclaim(released)?;
        Ok(())
    }

    async fn read(&self, path: &ObjectPath) -> Result<Vec<u8>, StoreError> {
        let record = self
            .entry(path)?
            .ok_or_else(|| StoreError::NotFound(path.clone()))?;
        let blob = match (record.kind, record.blob) {
            (NodeKind::File, Some(blob)) => blob,
            _ => return Err(StoreError::IsADirectory(path.clone())),
        };
        let bytes = self
            .blobs
            .get(blob.as_bytes())?
            .ok_or_else(|| StoreError::Corrupt {
                path: path.to_string(),
                reason: format!("missing blob {}", blob),
            })?;
        Ok(bytes.to_vec())
    }
}

fn child_prefix(path: &ObjectPath) -> String {
    if path.is_root() {
        "/".to_string()
    } else {
        format!("{}/", path)
    }
}

fn encode(record: &EntryRecord) -> Result<Vec<u8>, StoreError> {
    bincode::serialize(record).map_err(|e| StoreError::Corrupt {
        path: String::new(),
        reason: format!("failed to serialize entry: {}", e),
    })
}

fn decode(key: &str, raw: &[u8]) -> Result<EntryRecord, StoreError> {
    bincode::deserialize(raw).map_err(|e| StoreError::Corrupt {
        path: key.to_string(),
        reason: format!("failed to deserialize entry: {}", e),
    })
}
