//! Content Hash Trees
//!
//! Describes the current state of a store subtree as a tree of
//! `(path, content id, children)` nodes, rebuilt from the store on demand.

pub mod builder;
pub mod node;

pub use builder::TreeHasher;
pub use node::TreeNode;
