//! Configuration layering across global file, explicit file and environment

use super::test_utils::with_xdg_env;
use mirrorsync::config::{default_data_dir, global_config_path, ConfigLoader};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

fn write_global(test_dir: &TempDir, contents: &str) {
    let dir = test_dir.path().join("mirrorsync");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("config.toml"), contents).unwrap();
}

#[test]
fn test_defaults_without_any_file() {
    let test_dir = TempDir::new().unwrap();
    with_xdg_env(&test_dir, || {
        let config = ConfigLoader::load(None).unwrap();
        assert_eq!(config.sync.debounce_ms, 0);
        assert_eq!(config.sync.scratch_prefix, "/.upload");
        assert_eq!(config.replication.manifest_id, "distribution");
        assert!(config.sync.initial_scan);
    });
}

#[test]
fn test_global_config_is_picked_up() {
    let test_dir = TempDir::new().unwrap();
    with_xdg_env(&test_dir, || {
        write_global(
            &test_dir,
            r#"
[sync]
debounce_ms = 250

[replication]
peer_id = "laptop"
"#,
        );
        assert_eq!(
            global_config_path().unwrap(),
            test_dir.path().join("mirrorsync").join("config.toml")
        );

        let config = ConfigLoader::load(None).unwrap();
        assert_eq!(config.sync.debounce_ms, 250);
        assert_eq!(config.replication.peer_id.as_deref(), Some("laptop"));
        assert_eq!(
            config.engine_options().unwrap().debounce,
            Duration::from_millis(250)
        );
    });
}

#[test]
fn test_explicit_file_overrides_global() {
    let test_dir = TempDir::new().unwrap();
    with_xdg_env(&test_dir, || {
        write_global(
            &test_dir,
            r#"
[sync]
debounce_ms = 250
scratch_prefix = "/.global-upload"
"#,
        );
        let explicit = test_dir.path().join("explicit.toml");
        fs::write(
            &explicit,
            r#"
[sync]
debounce_ms = 1000
"#,
        )
        .unwrap();

        let config = ConfigLoader::load(Some(&explicit)).unwrap();
        assert_eq!(config.sync.debounce_ms, 1000);
        // Keys absent from the explicit file keep the global value
        assert_eq!(config.sync.scratch_prefix, "/.global-upload");
    });
}

#[test]
fn test_environment_overrides_files() {
    let test_dir = TempDir::new().unwrap();
    with_xdg_env(&test_dir, || {
        write_global(&test_dir, "[sync]\ndebounce_ms = 250\n");
        let explicit = test_dir.path().join("explicit.toml");
        fs::write(&explicit, "[sync]\ndebounce_ms = 1000\n").unwrap();

        std::env::set_var("MIRRORSYNC__SYNC__DEBOUNCE_MS", "42");
        std::env::set_var("MIRRORSYNC__SYNC__IGNORE_PATTERNS", "**/*.tmp,**/build/**");
        let result = ConfigLoader::load(Some(&explicit));
        std::env::remove_var("MIRRORSYNC__SYNC__DEBOUNCE_MS");
        std::env::remove_var("MIRRORSYNC__SYNC__IGNORE_PATTERNS");

        let config = result.unwrap();
        assert_eq!(config.sync.debounce_ms, 42);
        assert_eq!(
            config.sync.ignore_patterns,
            vec!["**/*.tmp".to_string(), "**/build/**".to_string()]
        );
    });
}

#[test]
fn test_invalid_global_config_is_rejected() {
    let test_dir = TempDir::new().unwrap();
    with_xdg_env(&test_dir, || {
        write_global(&test_dir, "[sync]\nscratch_prefix = \"/a/b\"\n");
        assert!(ConfigLoader::load(None).is_err());
    });
}

#[test]
fn test_default_data_dir_is_per_watched_directory() {
    let test_dir = TempDir::new().unwrap();
    with_xdg_env(&test_dir, || {
        let one = test_dir.path().join("one");
        let two = test_dir.path().join("two");
        fs::create_dir_all(&one).unwrap();
        fs::create_dir_all(&two).unwrap();

        let first = default_data_dir(&one).unwrap();
        assert_eq!(first, default_data_dir(&one).unwrap());
        assert_ne!(first, default_data_dir(&two).unwrap());
        assert!(first.starts_with(test_dir.path().join("data")));

        let config = ConfigLoader::load(None).unwrap();
        let paths = config.storage.resolve(&one).unwrap();
        assert_eq!(paths.data_dir, first);
        assert_eq!(paths.content_store, first.join("content"));
        assert_eq!(paths.manifest_snapshot, first.join("manifest.json"));
    });
}
