//! End-to-end mirroring of a watched directory

use super::test_utils::{p, Harness};
use mirrorsync::engine::RootState;
use mirrorsync::store::ContentStore;
use mirrorsync::tree::TreeHasher;
use mirrorsync::watch::{FsEvent, FsNotifier};
use std::time::Duration;
use tokio::sync::mpsc;

/// Create, modify, then delete `a.txt` in an empty `myroot`
#[tokio::test]
async fn test_create_modify_delete_updates_manifest() {
    let h = Harness::new("myroot").await;
    let empty = h.root_id().await;

    h.write("a.txt", b"hello").await;
    h.engine.flush().await;
    let h1 = h.root_id().await;
    assert_ne!(h1, empty);
    assert_eq!(h.content.read(&p("/myroot/a.txt")).await.unwrap(), b"hello");
    assert_eq!(h.engine.manifest().get().await.unwrap().get(&h.root), Some(&h1));

    h.write("a.txt", b"hello world").await;
    h.engine.flush().await;
    let h2 = h.root_id().await;
    assert_ne!(h2, h1);
    assert_eq!(h.engine.manifest().get().await.unwrap().get(&h.root), Some(&h2));

    h.delete("a.txt").await;
    h.engine.flush().await;
    let h3 = h.root_id().await;
    assert_eq!(h3, empty);
    assert_eq!(h.engine.manifest().get().await.unwrap().get(&h.root), Some(&h3));
    assert!(h
        .content
        .stat(&p("/myroot/a.txt"))
        .await
        .unwrap_err()
        .is_not_found());
    assert_eq!(h.engine.state(&h.root), RootState::Watching);
}

#[tokio::test]
async fn test_delete_then_hash_omits_path() {
    let h = Harness::new("docs").await;
    h.write("keep.txt", b"keep").await;
    h.write("sub/drop.txt", b"drop").await;
    h.engine.flush().await;
    let before = h.root_id().await;

    h.delete("sub/drop.txt").await;
    h.engine.flush().await;

    let tree = TreeHasher::new(h.content.clone())
        .hash_tree(&h.root.object_path())
        .await
        .unwrap();
    assert!(!tree.contains(&p("/docs/sub/drop.txt")));
    assert!(tree.contains(&p("/docs/keep.txt")));
    assert_ne!(tree.content_id, before);
}

#[tokio::test]
async fn test_deleting_a_directory_removes_its_subtree() {
    let h = Harness::new("docs").await;
    h.write("sub/a.txt", b"a").await;
    h.write("sub/deeper/b.txt", b"b").await;
    h.engine.flush().await;

    h.delete("sub").await;
    h.engine.flush().await;

    assert!(h.content.list(&h.root.object_path()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_duplicate_and_missed_events_are_tolerated() {
    let h = Harness::new("docs").await;
    h.write("a.txt", b"a").await;
    h.engine
        .handle_event(FsEvent::add(h.file("a.txt")))
        .await
        .unwrap();
    // Unlink for a file the store never saw
    h.engine
        .handle_event(FsEvent::unlink(h.file("never.txt")))
        .await
        .unwrap();
    h.engine.flush().await;

    let names: Vec<_> = h
        .content
        .list(&h.root.object_path())
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, vec!["a.txt".to_string()]);
    assert_eq!(
        h.engine.manifest().cached().get(&h.root),
        Some(&h.root_id().await)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_notifier_drives_the_engine() {
    let h = Harness::new("live").await;
    let (tx, rx) = mpsc::unbounded_channel();
    let _notifier = FsNotifier::watch(&h.watched, tx).unwrap();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

    let watched = h.watched.clone();
    let writer = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        std::fs::write(watched.join("note.txt"), b"from disk").unwrap();
    });

    let run = h.engine.run(rx, async {
        let _ = stop_rx.await;
    });
    let check = async {
        writer.await.unwrap();
        for _ in 0..100 {
            if let Ok(bytes) = h.content.read(&p("/live/note.txt")).await {
                if bytes == b"from disk" {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        let _ = stop_tx.send(());
    };
    let (result, _) = tokio::join!(run, check);
    result.unwrap();

    assert_eq!(h.content.read(&p("/live/note.txt")).await.unwrap(), b"from disk");
    assert_eq!(
        h.engine.manifest().cached().get(&h.root),
        Some(&h.root_id().await)
    );
}
