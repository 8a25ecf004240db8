//! Tree hasher: derives a verifiable hash tree for a store subtree

use crate::error::StoreError;
use crate::store::{ContentStore, Stat};
use crate::tree::node::TreeNode;
use crate::types::{NodeKind, ObjectPath};
use futures::future::{BoxFuture, FutureExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, trace};

/// Read-only walker over the content store
#[derive(Clone)]
pub struct TreeHasher {
    store: Arc<dyn ContentStore>,
}

/// Per-call traversal bookkeeping
#[derive(Default)]
struct Traversal {
    /// Directories on the current descent path
    visited: HashSet<ObjectPath>,
    dropped: usize,
    skipped_cycles: usize,
}

impl TreeHasher {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self { store }
    }

    /// Build the hash tree rooted at `root`.
    ///
    /// Fails only when `root` itself cannot be read. Children that vanish
    /// between `list` and `stat` are left out of the result.
    ///
    /// Cycle guard: a child is skipped when its name equals the name of the
    /// directory listing it (a mount point that lists itself), or when its
    /// path is already on the current descent path. A same-named directory
    /// further down, such as `/r/a/x/a`, is ordinary content and is hashed.
    #[instrument(skip(self), fields(root = %root))]
    pub async fn hash_tree(&self, root: &ObjectPath) -> Result<TreeNode, StoreError> {
        let start = Instant::now();
        let stat = self.store.stat(root).await?;

        let mut traversal = Traversal::default();
        let tree = match stat.kind {
            NodeKind::File => TreeNode::leaf(root.clone(), stat.content_id),
            NodeKind::Directory => {
                self.hash_directory(root.clone(), stat, &mut traversal)
                    .await?
            }
        };

        info!(
            node_count = tree.node_count(),
            dropped = traversal.dropped,
            skipped_cycles = traversal.skipped_cycles,
            content_id = %tree.content_id.short(),
            duration_ms = start.elapsed().as_millis(),
            "Tree hash completed"
        );
        Ok(tree)
    }

    fn hash_directory<'a>(
        &'a self,
        path: ObjectPath,
        stat: Stat,
        traversal: &'a mut Traversal,
    ) -> BoxFuture<'a, Result<TreeNode, StoreError>> {
        async move {
            let mut entries = self.store.list(&path).await?;
            // Listing order is store-defined; sort so equal trees hash equally
            entries.sort_by(|a, b| a.name.cmp(&b.name));

            traversal.visited.insert(path.clone());
            let mut children = Vec::with_capacity(entries.len());

            for entry in entries {
                let child_path = match path.join(&entry.name) {
                    Ok(p) => p,
                    Err(e) => {
                        debug!(parent = %path, name = %entry.name, error = %e, "Skipping unaddressable child");
                        traversal.dropped += 1;
                        continue;
                    }
                };

                // Virtual mount points can list themselves under their own name
                if entry.name == path.name() || traversal.visited.contains(&child_path) {
                    trace!(path = %child_path, "Skipping self-referencing child");
                    traversal.skipped_cycles += 1;
                    continue;
                }

                let child_stat = match self.store.stat(&child_path).await {
                    Ok(s) => s,
                    Err(e) => {
                        debug!(path = %child_path, error = %e, "Dropping child that failed to stat");
                        traversal.dropped += 1;
                        continue;
                    }
                };

                match child_stat.kind {
                    NodeKind::File => {
                        children.push(TreeNode::leaf(child_path, child_stat.content_id));
                    }
                    NodeKind::Directory => {
                        match self
                            .hash_directory(child_path.clone(), child_stat, traversal)
                            .await
                        {
                            Ok(node) => children.push(node),
                            Err(e) => {
                                debug!(path = %child_path, error = %e, "Dropping directory that failed to list");
                                traversal.dropped += 1;
                            }
                        }
                    }
                }
            }

            traversal.visited.remove(&path);
            Ok(TreeNode {
                path,
                content_id: stat.content_id,
                kind: NodeKind::Directory,
                children,
            })
        }
        .boxed()
    }
}
