//! Property-based tests for mirrorsync

mod determinism;
