//! mirrorsync: continuous directory mirroring into a content-addressed store
//!
//! Filesystem events for each watched directory are serialized per root,
//! applied to the content store, and the resulting root hash is published to
//! a manifest that peers replicate.

pub mod cli;
pub mod config;
pub mod debounce;
pub mod engine;
pub mod error;
pub mod logging;
pub mod manifest;
pub mod queue;
pub mod replication;
pub mod store;
pub mod tree;
pub mod types;
pub mod watch;
pub mod writer;
