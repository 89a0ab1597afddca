//! Configuration resolution and operator identity
//!
//! Tests that touch HALLMONITOR_OPERATOR, USER or XDG_CONFIG_HOME are marked
//! #[serial] so they never observe each other's environment.

use hallmonitor_common::config::{HallMonitorConfig, DATASET_CONFIG_FILE, OPERATOR_ENV};
use hallmonitor_common::Error;
use serial_test::serial;
use std::env;
use std::fs;
use tempfile::TempDir;

/// Point the user config directory at an empty temp dir
fn isolate_user_config() -> TempDir {
    let home = TempDir::new().unwrap();
    env::set_var("XDG_CONFIG_HOME", home.path());
    home
}

#[test]
#[serial]
fn test_defaults_without_any_config_file() {
    let _home = isolate_user_config();
    let dataset = TempDir::new().unwrap();

    let (config, path) = HallMonitorConfig::resolve(None, dataset.path()).unwrap();
    assert!(path.is_none());
    assert_eq!(config.logging.level, "info");
    assert!(config.logging.file.is_none());
    assert_eq!(config.psychopy.id_column, "id");
    assert!(config.tracker.command.is_empty());
    assert!(!config.tracker.child_data);
}

#[test]
#[serial]
fn test_dataset_config_file_is_found() {
    let _home = isolate_user_config();
    let dataset = TempDir::new().unwrap();
    let file = dataset.path().join(DATASET_CONFIG_FILE);
    fs::create_dir_all(file.parent().unwrap()).unwrap();
    fs::write(
        &file,
        r#"
operator = "rc"

[logging]
level = "debug"

[psychopy]
id_column = "participant"

[tracker]
command = ["python3", "update-tracker.py"]
session_filter = "s1_r1"
child_data = true
"#,
    )
    .unwrap();

    let (config, path) = HallMonitorConfig::resolve(None, dataset.path()).unwrap();
    assert_eq!(path.as_deref(), Some(file.as_path()));
    assert_eq!(config.operator.as_deref(), Some("rc"));
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.psychopy.id_column, "participant");
    assert_eq!(config.tracker.command, vec!["python3", "update-tracker.py"]);
    assert_eq!(config.tracker.session_filter.as_deref(), Some("s1_r1"));
    assert!(config.tracker.child_data);
}

#[test]
fn test_partial_file_keeps_section_defaults() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("partial.toml");
    fs::write(&file, "[tracker]\nchild_data = true\n").unwrap();

    let config = HallMonitorConfig::from_file(&file).unwrap();
    assert!(config.tracker.child_data);
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.psychopy.id_column, "id");
}

#[test]
fn test_explicit_config_must_exist() {
    let dataset = TempDir::new().unwrap();
    let missing = dataset.path().join("nope.toml");
    let err = HallMonitorConfig::resolve(Some(&missing), dataset.path()).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_malformed_config_is_an_error() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("bad.toml");
    fs::write(&file, "[logging\nlevel = ").unwrap();
    assert!(matches!(HallMonitorConfig::from_file(&file), Err(Error::Toml(_))));
}

#[test]
#[serial]
fn test_operator_env_overrides_config() {
    env::set_var(OPERATOR_ENV, "from-env");
    let config = HallMonitorConfig {
        operator: Some("from-config".to_string()),
        ..Default::default()
    };
    assert_eq!(config.operator(), "from-env");
    env::remove_var(OPERATOR_ENV);
}

#[test]
#[serial]
fn test_operator_falls_back_to_login_name() {
    env::remove_var(OPERATOR_ENV);
    env::set_var("USER", "labtech");

    let config = HallMonitorConfig {
        operator: Some("from-config".to_string()),
        ..Default::default()
    };
    assert_eq!(config.operator(), "from-config");

    // blank values do not count
    let blank = HallMonitorConfig {
        operator: Some("  ".to_string()),
        ..Default::default()
    };
    assert_eq!(blank.operator(), "labtech");
}
