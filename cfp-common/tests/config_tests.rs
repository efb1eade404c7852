//! Integration tests for configuration file loading and graceful degradation
//!
//! Note: Uses serial_test because tests that relocate the platform config
//! directory mutate XDG_CONFIG_HOME, which is process-wide.

use cfp_common::config::{default_config_path, TomlConfig};
use cfp_common::{Error, SourceMode};
use serial_test::serial;
use std::env;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_load_explicit_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cfp.toml");
    fs::write(
        &path,
        r#"
        [logging]
        level = "debug"

        [api]
        model_path = "/opt/models/model.json"

        [dashboard]
        window_size = 10
        source_mode = "cyclic"
        source_path = "/data/rows.jsonl"
        "#,
    )
    .unwrap();

    let config = TomlConfig::load(Some(&path)).unwrap();
    assert_eq!(config.logging.level, "debug");
    assert_eq!(
        config.api.model_path.to_string_lossy(),
        "/opt/models/model.json"
    );
    assert_eq!(config.dashboard.window_size, 10);
    assert_eq!(config.dashboard.source_mode, SourceMode::Cyclic);
    assert!(config.dashboard.source_path.is_some());
}

#[test]
fn test_missing_explicit_file_is_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("does-not-exist.toml");
    let err = TomlConfig::load(Some(&path)).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_unknown_source_mode_is_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cfp.toml");
    fs::write(&path, "[dashboard]\nsource_mode = \"sometimes\"\n").unwrap();
    assert!(TomlConfig::load(Some(&path)).is_err());
}

#[cfg(target_os = "linux")]
#[test]
#[serial]
fn test_missing_default_file_falls_back_to_defaults() {
    let dir = TempDir::new().unwrap();
    env::set_var("XDG_CONFIG_HOME", dir.path());

    let path = default_config_path().unwrap();
    assert!(path.starts_with(dir.path()));
    assert!(!path.exists());

    let config = TomlConfig::load(None).unwrap();
    assert_eq!(config, TomlConfig::default());

    env::remove_var("XDG_CONFIG_HOME");
}

#[cfg(target_os = "linux")]
#[test]
#[serial]
fn test_default_file_is_used_when_present() {
    let dir = TempDir::new().unwrap();
    env::set_var("XDG_CONFIG_HOME", dir.path());

    let path = default_config_path().unwrap();
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "[broker]\nbuffer_capacity = 8\n").unwrap();

    let config = TomlConfig::load(None).unwrap();
    assert_eq!(config.broker.buffer_capacity, 8);

    env::remove_var("XDG_CONFIG_HOME");
}
