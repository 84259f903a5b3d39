//! Configuration loading and root folder resolution
//!
//! Tests that touch COURIER_ROOT_FOLDER are #[serial] so they do not race.

use courier_common::config::{
    load_toml_config, write_toml_config, RootFolderInitializer, RootFolderResolver, TomlConfig,
    ROOT_FOLDER_ENV,
};
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
fn test_missing_config_file_uses_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let config = load_toml_config(&temp_dir.path().join("absent.toml"));
    assert_eq!(config, TomlConfig::default());
}

#[test]
fn test_invalid_config_file_uses_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("broken.toml");
    std::fs::write(&path, "this is = = not toml").unwrap();

    let config = load_toml_config(&path);
    assert_eq!(config, TomlConfig::default());
}

#[test]
fn test_write_then_load_preserves_fields() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("courier-import.toml");

    let mut config = TomlConfig::default();
    config.geocoder.api_key = Some("key-123".to_string());
    config.import.weight_ceiling_kg = 500.0;
    write_toml_config(&config, &path).unwrap();

    assert!(path.exists());
    assert!(!path.with_extension("toml.tmp").exists());

    let loaded = load_toml_config(&path);
    assert_eq!(loaded.geocoder.api_key.as_deref(), Some("key-123"));
    assert_eq!(loaded.import.weight_ceiling_kg, 500.0);
}

#[cfg(unix)]
#[test]
fn test_written_config_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("courier-import.toml");
    write_toml_config(&TomlConfig::default(), &path).unwrap();

    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[test]
#[serial]
fn test_cli_arg_beats_environment() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/courier-env");

    let root = RootFolderResolver::new("test-module")
        .with_cli_arg(Some(PathBuf::from("/tmp/courier-cli")))
        .resolve();
    assert_eq!(root, PathBuf::from("/tmp/courier-cli"));

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_environment_beats_toml() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/courier-env");

    let mut config = TomlConfig::default();
    config.root_folder = Some(PathBuf::from("/tmp/courier-toml"));
    let root = RootFolderResolver::new("test-module").with_toml(&config).resolve();
    assert_eq!(root, PathBuf::from("/tmp/courier-env"));

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_toml_used_when_nothing_else_set() {
    env::remove_var(ROOT_FOLDER_ENV);

    let mut config = TomlConfig::default();
    config.root_folder = Some(PathBuf::from("/tmp/courier-toml"));
    let root = RootFolderResolver::new("test-module").with_toml(&config).resolve();
    assert_eq!(root, PathBuf::from("/tmp/courier-toml"));
}

#[test]
fn test_initializer_creates_directory_idempotently() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("root");
    let init = RootFolderInitializer::new(root.clone());

    init.ensure_directory_exists().unwrap();
    init.ensure_directory_exists().unwrap();
    assert!(root.is_dir());
}
