//! Configuration System
//!
//! Layered configuration: built-in defaults, the global config file, an
//! explicit `--config` file, then `MIRRORSYNC__SECTION__KEY` environment
//! variables. Command-line flags are applied on top by the binary.

use crate::engine::EngineOptions;
use crate::error::SyncError;
use crate::logging::LoggingConfig;
use crate::types::ObjectPath;
use crate::watch::ignore::DEFAULT_IGNORE_PATTERNS;
use crate::watch::IgnoreMatcher;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod merge {
    pub mod merge_policy;
}
mod sources {
    pub mod environment;
    pub mod explicit_file;
    pub mod global_file;
}

pub use sources::environment::ENV_PREFIX;
pub use sources::global_file::global_config_path;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub replication: ReplicationConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Event handling and publishing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Quiet period before a root is re-hashed; 0 publishes after every change
    #[serde(default)]
    pub debounce_ms: u64,

    /// Top-level store directory used to stage writes
    #[serde(default = "default_scratch_prefix")]
    pub scratch_prefix: String,

    /// Glob patterns (relative to the watched directory) that are never mirrored
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,

    /// Submit pre-existing files when a directory is registered
    #[serde(default = "default_true")]
    pub initial_scan: bool,
}

/// Storage locations. Relative store paths are resolved against `data_dir`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Defaults to a per-directory folder under the platform data dir
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    #[serde(default = "default_content_store")]
    pub content_store: PathBuf,

    #[serde(default = "default_document_store")]
    pub document_store: PathBuf,

    #[serde(default = "default_manifest_snapshot")]
    pub manifest_snapshot: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Identity stamped on manifest revisions; derived from the data dir when unset
    #[serde(default)]
    pub peer_id: Option<String>,

    #[serde(default = "default_manifest_id")]
    pub manifest_id: String,
}

/// Fully resolved on-disk locations for one watched directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePaths {
    pub data_dir: PathBuf,
    pub content_store: PathBuf,
    pub document_store: PathBuf,
    pub manifest_snapshot: PathBuf,
}

fn default_scratch_prefix() -> String {
    ObjectPath::default_scratch().to_string()
}

fn default_ignore_patterns() -> Vec<String> {
    DEFAULT_IGNORE_PATTERNS.iter().map(|p| p.to_string()).collect()
}

fn default_true() -> bool {
    true
}

fn default_content_store() -> PathBuf {
    PathBuf::from("content")
}

fn default_document_store() -> PathBuf {
    PathBuf::from("documents")
}

fn default_manifest_snapshot() -> PathBuf {
    PathBuf::from("manifest.json")
}

fn default_manifest_id() -> String {
    crate::manifest::DEFAULT_MANIFEST_ID.to_string()
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            debounce_ms: 0,
            scratch_prefix: default_scratch_prefix(),
            ignore_patterns: default_ignore_patterns(),
            initial_scan: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            content_store: default_content_store(),
            document_store: default_document_store(),
            manifest_snapshot: default_manifest_snapshot(),
        }
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            peer_id: None,
            manifest_id: default_manifest_id(),
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Sync(String),
    Storage(String),
    Replication(String),
    Logging(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Sync(msg) => write!(f, "sync: {}", msg),
            ValidationError::Storage(msg) => write!(f, "storage: {}", msg),
            ValidationError::Replication(msg) => write!(f, "replication: {}", msg),
            ValidationError::Logging(msg) => write!(f, "logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl SyncConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        match ObjectPath::parse(&self.sync.scratch_prefix) {
            Ok(path) if path.depth() == 1 => {}
            Ok(_) => errors.push(ValidationError::Sync(format!(
                "scratch_prefix must be a single top-level directory, got {:?}",
                self.sync.scratch_prefix
            ))),
            Err(e) => errors.push(ValidationError::Sync(e.to_string())),
        }

        for (name, path) in [
            ("content_store", &self.storage.content_store),
            ("document_store", &self.storage.document_store),
            ("manifest_snapshot", &self.storage.manifest_snapshot),
        ] {
            if path.as_os_str().is_empty() {
                errors.push(ValidationError::Storage(format!("{} cannot be empty", name)));
            }
        }
        if self.storage.content_store == self.storage.document_store {
            errors.push(ValidationError::Storage(
                "content_store and document_store must differ".to_string(),
            ));
        }

        let manifest_id = &self.replication.manifest_id;
        if manifest_id.is_empty() || manifest_id.contains('/') {
            errors.push(ValidationError::Replication(format!(
                "manifest_id must be a non-empty name without '/', got {:?}",
                manifest_id
            )));
        }
        if matches!(&self.replication.peer_id, Some(peer) if peer.trim().is_empty()) {
            errors.push(ValidationError::Replication(
                "peer_id cannot be blank".to_string(),
            ));
        }

        if let Err(e) = self.logging.validate() {
            errors.push(ValidationError::Logging(e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Render as TOML, the format of the config files
    pub fn to_toml(&self) -> Result<String, SyncError> {
        toml::to_string_pretty(self)
            .map_err(|e| SyncError::ConfigError(format!("Failed to render config: {}", e)))
    }

    pub fn engine_options(&self) -> Result<EngineOptions, SyncError> {
        Ok(EngineOptions {
            debounce: Duration::from_millis(self.sync.debounce_ms),
            scratch_prefix: ObjectPath::parse(&self.sync.scratch_prefix)?,
            manifest_id: self.replication.manifest_id.clone(),
            initial_scan: self.sync.initial_scan,
            ignore: IgnoreMatcher::new(self.sync.ignore_patterns.iter().cloned()),
        })
    }

    /// Peer id from config, or one derived from the data dir so it is stable across restarts
    pub fn peer_id(&self, paths: &StoragePaths) -> String {
        match &self.replication.peer_id {
            Some(peer) => peer.clone(),
            None => {
                let digest = blake3::hash(paths.data_dir.to_string_lossy().as_bytes());
                format!("peer-{}", &digest.to_hex()[..12])
            }
        }
    }
}

impl StorageConfig {
    /// Resolve every store location for `watch_dir`
    pub fn resolve(&self, watch_dir: &Path) -> Result<StoragePaths, SyncError> {
        let data_dir = match &self.data_dir {
            Some(dir) => dir.clone(),
            None => default_data_dir(watch_dir)?,
        };
        let under = |path: &Path| {
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                data_dir.join(path)
            }
        };
        Ok(StoragePaths {
            content_store: under(&self.content_store),
            document_store: under(&self.document_store),
            manifest_snapshot: under(&self.manifest_snapshot),
            data_dir,
        })
    }
}

/// `<platform data dir>/mirrorsync/workspaces/<hash of the canonical watch path>`
pub fn default_data_dir(watch_dir: &Path) -> Result<PathBuf, SyncError> {
    let dirs = directories::ProjectDirs::from("", "", "mirrorsync").ok_or_else(|| {
        SyncError::ConfigError("Cannot determine a data directory for this platform".to_string())
    })?;
    let canonical = dunce::canonicalize(watch_dir).unwrap_or_else(|_| watch_dir.to_path_buf());
    let digest = blake3::hash(canonical.to_string_lossy().as_bytes());
    Ok(dirs
        .data_dir()
        .join("workspaces")
        .join(&digest.to_hex()[..16]))
}

/// Loads layered configuration
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load defaults, global file, optional explicit file and environment, then validate
    pub fn load(explicit: Option<&Path>) -> Result<SyncConfig, SyncError> {
        let builder = merge::merge_policy::builder_with_defaults()?;
        let builder = sources::global_file::add_to_builder(builder)?;
        let builder = sources::explicit_file::add_to_builder(builder, explicit)?;
        let builder = sources::environment::add_to_builder(builder);

        let config: SyncConfig = builder.build()?.try_deserialize()?;
        Self::validated(config)
    }

    /// Load defaults plus a single file, ignoring the global file and environment
    pub fn load_from_file(path: &Path) -> Result<SyncConfig, SyncError> {
        let builder = merge::merge_policy::builder_with_defaults()?;
        let builder = sources::explicit_file::add_to_builder(builder, Some(path))?;
        let config: SyncConfig = builder.build()?.try_deserialize()?;
        Self::validated(config)
    }

    fn validated(config: SyncConfig) -> Result<SyncConfig, SyncError> {
        config.validate().map_err(|errors| {
            let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            SyncError::ConfigError(format!(
                "Configuration validation failed:\n{}",
                messages.join("\n")
            ))
        })?;
        Ok(config)
    }
}
