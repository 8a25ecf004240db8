//! Integration tests for mirrorsync

mod change_ordering;
mod config_integration;
mod end_to_end;
mod manifest_convergence;
mod tree_determinism;
