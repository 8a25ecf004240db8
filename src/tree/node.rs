//! Hash-tree node produced by the tree hasher

use crate::types::{ContentId, NodeKind, ObjectPath};
use serde::{Deserialize, Serialize};

/// Snapshot of one store entry and, for directories, its children sorted by name.
///
/// Built fresh bottom-up on every hash computation and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub path: ObjectPath,
    pub content_id: ContentId,
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    pub fn leaf(path: ObjectPath, content_id: ContentId) -> Self {
        Self {
            path,
            content_id,
            kind: NodeKind::File,
            children: Vec::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.kind == NodeKind::File
    }

    /// Find the node at `path` within this subtree
    pub fn find(&self, path: &ObjectPath) -> Option<&TreeNode> {
        if &self.path == path {
            return Some(self);
        }
        if !path.starts_with(&self.path) {
            return None;
        }
        self.children.iter().find_map(|child| child.find(path))
    }

    pub fn contains(&self, path: &ObjectPath) -> bool {
        self.find(path).is_some()
    }

    /// Number of nodes in this subtree, including itself
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(TreeNode::node_count).sum::<usize>()
    }

    /// Paths of every file below this node, depth-first in name order
    pub fn file_paths(&self) -> Vec<&ObjectPath> {
        let mut out = Vec::new();
        self.collect_files(&mut out);
        out
    }

    fn collect_files<'a>(&'a self, out: &mut Vec<&'a ObjectPath>) {
        if self.is_leaf() {
            out.push(&self.path);
        }
        for child in &self.children {
            child.collect_files(out);
        }
    }

    /// Canonical JSON form; two equal trees always serialize identically
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
