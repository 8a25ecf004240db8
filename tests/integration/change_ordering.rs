//! Ordering guarantees of the per-root change pipeline

use super::test_utils::{p, Harness};
use async_trait::async_trait;
use mirrorsync::queue::{ChangeHandler, ChangeQueue, ChangeTask};
use mirrorsync::store::{ContentStore, SledContentStore};
use mirrorsync::types::{ObjectPath, Root};
use mirrorsync::writer::ObjectWriter;
use std::sync::Arc;

/// Applies upserts and removes straight to a store
struct WriterHandler {
    writer: ObjectWriter,
}

#[async_trait]
impl ChangeHandler for WriterHandler {
    async fn handle(&self, _root: &Root, task: ChangeTask) {
        match task {
            ChangeTask::Upsert { path, bytes } => {
                self.writer.upsert(&path, &bytes).await.unwrap();
            }
            ChangeTask::Remove { path } => {
                self.writer.remove(&path).await.unwrap();
            }
            ChangeTask::Publish => {}
        }
    }
}

fn writer_queue() -> (Arc<SledContentStore>, ChangeQueue<WriterHandler>) {
    let store = Arc::new(SledContentStore::temporary().unwrap());
    let writer = ObjectWriter::new(store.clone(), ObjectPath::default_scratch());
    (store, ChangeQueue::new(Arc::new(WriterHandler { writer })))
}

#[tokio::test]
async fn test_add_remove_add_leaves_latest_bytes() {
    let h = Harness::new("myroot").await;
    h.write("f1", b"v1").await;
    h.delete("f1").await;
    h.write("f1", b"v2").await;
    h.engine.flush().await;

    assert_eq!(h.content.read(&p("/myroot/f1")).await.unwrap(), b"v2");
}

#[tokio::test]
async fn test_remove_after_add_in_one_burst_leaves_nothing() {
    let h = Harness::new("myroot").await;
    h.write("f1", b"v1").await;
    h.write("f1", b"v2").await;
    h.delete("f1").await;
    h.engine.flush().await;

    assert!(h.content.stat_opt(&p("/myroot/f1")).await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_roots_are_independent_and_ordered() {
    let (store, queue) = writer_queue();
    let roots: Vec<Root> = (0..8).map(|i| Root::new(format!("r{}", i)).unwrap()).collect();

    for version in 0..20u32 {
        for root in &roots {
            let path = root.object_path().join("counter").unwrap();
            queue.submit(
                root,
                ChangeTask::Upsert {
                    path,
                    bytes: version.to_string().into_bytes(),
                },
            );
        }
    }
    queue.flush_all().await;

    for root in &roots {
        let path = root.object_path().join("counter").unwrap();
        assert_eq!(store.read(&path).await.unwrap(), b"19");
        assert_eq!(queue.pending(root), 0);
    }
    queue.shutdown().await;
}

#[tokio::test]
async fn test_interleaved_remove_is_applied_in_place() {
    let (store, queue) = writer_queue();
    let root = Root::new("docs").unwrap();
    let a = p("/docs/a.txt");
    let b = p("/docs/b.txt");

    queue.submit(&root, ChangeTask::Upsert { path: a.clone(), bytes: b"a".to_vec() });
    queue.submit(&root, ChangeTask::Upsert { path: b.clone(), bytes: b"b".to_vec() });
    queue.submit(&root, ChangeTask::Remove { path: a.clone() });
    queue.submit(&root, ChangeTask::Upsert { path: b.clone(), bytes: b"b2".to_vec() });
    queue.flush(&root).await;

    assert!(store.stat_opt(&a).await.unwrap().is_none());
    assert_eq!(store.read(&b).await.unwrap(), b"b2");
    assert!(store.stat_opt(&p("/.upload")).await.unwrap().map_or(true, |s| s.size == 0));
}
