//! Merge rules: defaults and override order.

use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with the built-in defaults applied.
///
/// Later sources override earlier ones: defaults, global file, explicit
/// `--config` file, then `MIRRORSYNC__SECTION__KEY` environment variables.
pub fn builder_with_defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError>
{
    Config::builder()
        .set_default("sync.debounce_ms", 0i64)?
        .set_default("sync.scratch_prefix", "/.upload")?
        .set_default("sync.initial_scan", true)?
        .set_default("storage.content_store", "content")?
        .set_default("storage.document_store", "documents")?
        .set_default("storage.manifest_snapshot", "manifest.json")?
        .set_default("replication.manifest_id", "distribution")
}
