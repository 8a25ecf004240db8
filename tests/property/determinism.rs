//! Property-based tests for determinism guarantees

use mirrorsync::store::hasher::compute_blob_id;
use mirrorsync::store::{ContentStore, SledContentStore};
use mirrorsync::tree::TreeHasher;
use mirrorsync::types::{ObjectPath, Root};
use mirrorsync::watch::IgnoreMatcher;
use mirrorsync::writer::ObjectWriter;
use proptest::prelude::*;
use proptest::test_runner::{Config, TestRunner};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Test that blob ids depend on bytes alone
#[test]
fn test_blob_id_determinism_property() {
    let mut runner = TestRunner::default();

    runner
        .run(
            &(any::<Vec<u8>>(), any::<Vec<u8>>()),
            |(content1, content2)| {
                let id1 = compute_blob_id(&content1);
                let id2 = compute_blob_id(&content2);

                assert_eq!(id1, compute_blob_id(&content1));
                if content1 == content2 {
                    assert_eq!(id1, id2);
                } else {
                    prop_assume!(id1 != id2);
                }

                Ok(())
            },
        )
        .unwrap();
}

fn file_set() -> impl Strategy<Value = BTreeMap<String, Vec<u8>>> {
    prop::collection::btree_map(
        "[a-c]{1,2}(/[a-c]{1,2}){0,2}\\.txt",
        prop::collection::vec(any::<u8>(), 0..32),
        1..12,
    )
}

async fn root_hash(files: &[(String, Vec<u8>)]) -> mirrorsync::types::ContentId {
    let store: Arc<dyn ContentStore> = Arc::new(SledContentStore::temporary().unwrap());
    let writer = ObjectWriter::new(store.clone(), ObjectPath::default_scratch());
    for (relative, bytes) in files {
        let path = ObjectPath::parse(&format!("/root/{}", relative)).unwrap();
        writer.upsert(&path, bytes).await.unwrap();
    }
    TreeHasher::new(store)
        .hash_tree(&ObjectPath::parse("/root").unwrap())
        .await
        .unwrap()
        .content_id
}

/// Test that the root hash ignores the order files were written in
#[test]
fn test_tree_hash_insertion_order_property() {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let mut runner = TestRunner::new(Config {
        cases: 24,
        ..Config::default()
    });

    runner
        .run(&(file_set(), any::<u64>()), |(files, seed)| {
            // Directory segments never end in `.txt`, so files and directories cannot collide
            let forward: Vec<(String, Vec<u8>)> = files.into_iter().collect();

            let mut shuffled = forward.clone();
            let len = shuffled.len();
            for i in 0..len {
                let j = (seed.rotate_left(i as u32) as usize) % len;
                shuffled.swap(i, j);
            }

            let a = rt.block_on(root_hash(&forward));
            let b = rt.block_on(root_hash(&shuffled));
            prop_assert_eq!(a, b);
            Ok(())
        })
        .unwrap();
}

/// Test that object paths are normalized the same however they are spelled
#[test]
fn test_object_path_normalization_property() {
    let mut runner = TestRunner::default();

    runner
        .run(&prop::collection::vec("[a-z]{1,6}", 1..5), |segments| {
            let canonical = ObjectPath::parse(&format!("/{}", segments.join("/"))).unwrap();
            let noisy = ObjectPath::parse(&format!("./{}/", segments.join("//./"))).unwrap();
            prop_assert_eq!(&canonical, &noisy);
            prop_assert_eq!(canonical.depth(), segments.len());

            let root = Root::new(segments[0].clone()).unwrap();
            let relative: std::path::PathBuf = segments[1..].iter().collect();
            let mapped = ObjectPath::for_file(&root, &relative).unwrap();
            prop_assert_eq!(mapped, canonical);
            Ok(())
        })
        .unwrap();
}

/// Test that default ignore patterns match regardless of directory depth
#[test]
fn test_ignore_matches_at_any_depth_property() {
    let matcher = IgnoreMatcher::with_defaults();
    let mut runner = TestRunner::default();

    runner
        .run(
            &(prop::collection::vec("[a-z]{1,6}", 0..4), "[a-z]{1,6}"),
            |(dirs, name)| {
                let base: std::path::PathBuf = dirs.iter().collect();

                prop_assert!(matcher.is_ignored(&base.join(".git").join(&name)));
                let swp = base.join(format!("{}.swp", name));
                let tilde = base.join(format!("{}~", name));
                let txt = base.join(format!("{}.txt", name));
                prop_assert!(matcher.is_ignored(&swp));
                prop_assert!(matcher.is_ignored(&tilde));
                prop_assert!(!matcher.is_ignored(&txt));
                prop_assert!(!matcher.is_ignored(Path::new("")));
                Ok(())
            },
        )
        .unwrap();
}
