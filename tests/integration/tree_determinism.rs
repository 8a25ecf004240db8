//! Root hashes depend only on tree contents

use super::test_utils::{p, Harness};
use async_trait::async_trait;
use mirrorsync::error::StoreError;
use mirrorsync::store::{
    ContentStore, CopyOptions, ListEntry, MkdirOptions, RemoveOptions, SledContentStore, Stat,
    WriteOptions,
};
use mirrorsync::tree::TreeHasher;
use mirrorsync::types::ObjectPath;
use mirrorsync::writer::ObjectWriter;
use std::sync::Arc;

/// Store whose listings come back in reverse name order
struct Reversed(SledContentStore);

#[async_trait]
impl ContentStore for Reversed {
    async fn write(&self, path: &ObjectPath, bytes: &[u8], o: WriteOptions) -> Result<(), StoreError> {
        self.0.write(path, bytes, o).await
    }
    async fn mkdir(&self, path: &ObjectPath, o: MkdirOptions) -> Result<(), StoreError> {
        self.0.mkdir(path, o).await
    }
    async fn stat(&self, path: &ObjectPath) -> Result<Stat, StoreError> {
        self.0.stat(path).await
    }
    async fn list(&self, path: &ObjectPath) -> Result<Vec<ListEntry>, StoreError> {
        let mut entries = self.0.list(path).await?;
        entries.reverse();
        Ok(entries)
    }
    async fn copy(&self, s: &ObjectPath, d: &ObjectPath, o: CopyOptions) -> Result<(), StoreError> {
        self.0.copy(s, d, o).await
    }
    async fn remove(&self, path: &ObjectPath, o: RemoveOptions) -> Result<(), StoreError> {
        self.0.remove(path, o).await
    }
    async fn read(&self, path: &ObjectPath) -> Result<Vec<u8>, StoreError> {
        self.0.read(path).await
    }
}

const FILES: &[(&str, &[u8])] = &[
    ("/photos/2024/a.jpg", b"jpeg a"),
    ("/photos/2024/b.jpg", b"jpeg b"),
    ("/photos/readme.md", b"# photos"),
    ("/photos/z/empty.txt", b""),
];

async fn populate(store: Arc<dyn ContentStore>, order: impl Iterator<Item = usize>) {
    let writer = ObjectWriter::new(store, ObjectPath::default_scratch());
    for i in order {
        let (path, bytes) = FILES[i];
        writer.upsert(&p(path), bytes).await.unwrap();
    }
}

#[tokio::test]
async fn test_insertion_and_listing_order_do_not_matter() {
    let forward: Arc<dyn ContentStore> = Arc::new(SledContentStore::temporary().unwrap());
    let backward: Arc<dyn ContentStore> =
        Arc::new(Reversed(SledContentStore::temporary().unwrap()));

    populate(forward.clone(), 0..FILES.len()).await;
    populate(backward.clone(), (0..FILES.len()).rev()).await;

    let left = TreeHasher::new(forward).hash_tree(&p("/photos")).await.unwrap();
    let right = TreeHasher::new(backward).hash_tree(&p("/photos")).await.unwrap();

    assert_eq!(left.content_id, right.content_id);
    assert_eq!(left.to_json(), right.to_json());
    assert_eq!(left.file_paths().len(), FILES.len());
}

#[tokio::test]
async fn test_hash_reflects_store_state_not_history() {
    let churned: Arc<dyn ContentStore> = Arc::new(SledContentStore::temporary().unwrap());
    let writer = ObjectWriter::new(churned.clone(), ObjectPath::default_scratch());
    writer.upsert(&p("/photos/tmp.bin"), b"scratch").await.unwrap();
    writer.upsert(&p("/photos/readme.md"), b"old").await.unwrap();
    populate(churned.clone(), 0..FILES.len()).await;
    writer.remove(&p("/photos/tmp.bin")).await.unwrap();

    let clean: Arc<dyn ContentStore> = Arc::new(SledContentStore::temporary().unwrap());
    populate(clean.clone(), 0..FILES.len()).await;

    let a = TreeHasher::new(churned).hash_tree(&p("/photos")).await.unwrap();
    let b = TreeHasher::new(clean).hash_tree(&p("/photos")).await.unwrap();
    assert_eq!(a.content_id, b.content_id);
}

#[tokio::test]
async fn test_engines_agree_on_identical_directories() {
    let one = Harness::new("shared").await;
    let two = Harness::new("shared").await;

    one.write("x/1.txt", b"one").await;
    one.write("y.txt", b"why").await;
    two.write("y.txt", b"why").await;
    two.write("x/1.txt", b"one").await;
    one.engine.flush().await;
    two.engine.flush().await;

    assert_eq!(one.root_id().await, two.root_id().await);
    assert_eq!(
        one.engine.manifest().get().await.unwrap().get(&one.root),
        two.engine.manifest().get().await.unwrap().get(&two.root)
    );
}
