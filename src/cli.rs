//! CLI domain: argument definitions and their mapping onto configuration.

mod parse;

pub use parse::{Cli, USAGE};
