//! Environment source: MIRRORSYNC__SECTION__KEY variables

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::Environment;

pub const ENV_PREFIX: &str = "MIRRORSYNC";

/// Add environment overrides. `MIRRORSYNC__SYNC__IGNORE_PATTERNS` is a comma-separated list.
pub fn add_to_builder(builder: ConfigBuilder<DefaultState>) -> ConfigBuilder<DefaultState> {
    builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("sync.ignore_patterns"),
    )
}
