//! CLI parse: clap types for mirrorsync, plus flag overrides on top of loaded config.

use crate::config::SyncConfig;
use clap::Parser;
use std::path::PathBuf;

pub const USAGE: &str = "Usage: mirrorsync <folder>";

/// Mirror a directory into a content-addressed store and replicate its root manifest
#[derive(Parser, Debug)]
#[command(name = "mirrorsync")]
#[command(about = "Mirror a directory into a content-addressed store and replicate its root manifest")]
pub struct Cli {
    /// Directory to watch
    pub directory: Option<PathBuf>,

    /// Configuration file path (layered over the global config file)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Quiet period in milliseconds before a root is re-hashed (0 = after every change)
    #[arg(long)]
    pub debounce_ms: Option<u64>,

    /// Only mirror changes made after startup
    #[arg(long)]
    pub no_initial_scan: bool,

    /// Directory holding the stores, snapshot and log file
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Peer identity used on replicated manifest entries
    #[arg(long)]
    pub peer_id: Option<String>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    pub print_config: bool,

    /// Enable verbose logging (default: off)
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file, both)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output includes "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    /// Apply command-line flags over `config`; flags always win
    pub fn apply_overrides(&self, config: &mut SyncConfig) {
        if let Some(debounce_ms) = self.debounce_ms {
            config.sync.debounce_ms = debounce_ms;
        }
        if self.no_initial_scan {
            config.sync.initial_scan = false;
        }
        if let Some(ref data_dir) = self.data_dir {
            config.storage.data_dir = Some(data_dir.clone());
        }
        if let Some(ref peer_id) = self.peer_id {
            config.replication.peer_id = Some(peer_id.clone());
        }

        let logging = &mut config.logging;
        if self.verbose {
            logging.level = "debug".to_string();
            // Verbose output stays visible even when logs go to a file
            if logging.output == "file" {
                logging.output = "both".to_string();
            }
        }
        if let Some(ref level) = self.log_level {
            logging.level = level.clone();
        }
        if let Some(ref format) = self.log_format {
            logging.format = format.clone();
        }
        if let Some(ref output) = self.log_output {
            logging.output = output.clone();
        }
        if let Some(ref file) = self.log_file {
            logging.file = Some(file.clone());
        }
    }
}
