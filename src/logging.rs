//! Logging System
//!
//! Structured logging built on `tracing`. Level, format and destination come
//! from configuration; `MIRRORSYNC_LOG` overrides the filter entirely.

use crate::error::SyncError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

pub const LOG_ENV: &str = "MIRRORSYNC_LOG";
pub const LOG_FILE_NAME: &str = "mirrorsync.log";

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error, off
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: json, text
    #[serde(default = "default_format")]
    pub format: String,

    /// Output destination: stdout, stderr, file, both (file and stderr)
    #[serde(default = "default_output")]
    pub output: String,

    /// Log file path; defaults to the data directory
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Colored output (text format, terminal destinations only)
    #[serde(default = "default_true")]
    pub color: bool,

    /// Module-specific log levels
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "text".to_string()
}

fn default_output() -> String {
    "stderr".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_format(),
            output: default_output(),
            file: None,
            color: default_true(),
            modules: HashMap::new(),
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !matches!(
            self.level.as_str(),
            "trace" | "debug" | "info" | "warn" | "error" | "off"
        ) {
            return Err(format!("Invalid log level: {}", self.level));
        }
        if self.format != "json" && self.format != "text" {
            return Err(format!(
                "Invalid log format: {} (must be 'json' or 'text')",
                self.format
            ));
        }
        parse_output_destinations(&self.output)?;
        Ok(())
    }

    /// Fill in the log file location when the output needs one
    pub fn with_default_file(mut self, data_dir: &Path) -> Self {
        if self.file.is_none() {
            self.file = Some(data_dir.join(LOG_FILE_NAME));
        }
        self
    }
}

/// Output destinations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OutputDestinations {
    stdout: bool,
    stderr: bool,
    file: bool,
}

impl OutputDestinations {
    fn terminal(&self) -> bool {
        self.stdout || self.stderr
    }
}

fn parse_output_destinations(output: &str) -> Result<OutputDestinations, String> {
    let (stdout, stderr, file) = match output {
        "stdout" => (true, false, false),
        "stderr" => (false, true, false),
        "file" => (false, false, true),
        "both" => (false, true, true),
        _ => {
            return Err(format!(
                "Invalid log output: {} (must be 'stdout', 'stderr', 'file', or 'both')",
                output
            ))
        }
    };
    Ok(OutputDestinations {
        stdout,
        stderr,
        file,
    })
}

/// Initialize the global subscriber
pub fn init_logging(config: &LoggingConfig) -> Result<(), SyncError> {
    config.validate().map_err(SyncError::ConfigError)?;
    let filter = build_env_filter(config)?;
    let output = parse_output_destinations(&config.output).map_err(SyncError::ConfigError)?;
    let writer = build_writer(config, output)?;

    let subscriber = Registry::default().with(filter);
    let result = if config.format == "json" {
        subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(writer),
            )
            .try_init()
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(config.color && output.terminal() && !output.file)
                    .with_writer(writer),
            )
            .try_init()
    };
    result.map_err(|e| SyncError::ConfigError(format!("Failed to initialize logging: {}", e)))
}

fn build_writer(config: &LoggingConfig, output: OutputDestinations) -> Result<BoxMakeWriter, SyncError> {
    let file = if output.file {
        let path = config.file.clone().unwrap_or_else(|| PathBuf::from(LOG_FILE_NAME));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SyncError::ConfigError(format!("Failed to create log directory: {}", e))
            })?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                SyncError::ConfigError(format!("Failed to open log file {:?}: {}", path, e))
            })?;
        Some(Mutex::new(file))
    } else {
        None
    };

    Ok(match (file, output.stderr, output.stdout) {
        (Some(file), true, _) => BoxMakeWriter::new(std::io::stderr.and(file)),
        (Some(file), false, _) => BoxMakeWriter::new(file),
        (None, _, true) => BoxMakeWriter::new(std::io::stdout),
        (None, _, false) => BoxMakeWriter::new(std::io::stderr),
    })
}

/// Build the filter from `MIRRORSYNC_LOG`, or from config level and module overrides
fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter, SyncError> {
    if let Ok(filter) = EnvFilter::try_from_env(LOG_ENV) {
        return Ok(filter);
    }

    if config.level == "off" {
        return Ok(EnvFilter::new("off"));
    }

    let mut filter = EnvFilter::new(&config.level);
    for (module, module_level) in &config.modules {
        let directive = format!("{}={}", module, module_level);
        filter = filter.add_directive(
            directive
                .parse()
                .map_err(|e| SyncError::ConfigError(format!("Invalid log directive: {}", e)))?,
        );
    }
    Ok(filter)
}
