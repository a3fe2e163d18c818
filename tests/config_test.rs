//! Tests for config module

use cycler::config::Config;
use serial_test::serial;
use std::path::Path;
use std::time::Duration;

#[test]
fn test_config_file_exists() {
    let config_path = Path::new("config.toml");
    assert!(
        config_path.exists(),
        "config.toml should exist in project root"
    );
}

#[test]
fn test_config_toml_readable() {
    let content =
        std::fs::read_to_string("config.toml").expect("Should be able to read config.toml");

    // Basic validation - should have expected sections
    for section in ["[paths]", "[scheduler]", "[proxy]", "[task]", "[logging]"] {
        assert!(
            content.contains(section),
            "config.toml should have {section} section"
        );
    }
}

#[test]
#[serial]
fn test_config_toml_loads_and_validates() {
    let config = Config::from_file(Path::new("config.toml")).unwrap();
    assert!(config.validate().is_ok());
    assert_eq!(config.scheduler.cycle(), Duration::from_secs(600));
    assert_eq!(config.scheduler.rate_limit_attempts, 3);
    assert!(config.proxy.allow_direct);
    assert!(config.metrics.bind_address.is_none());
}

#[test]
#[serial]
fn test_env_overrides_file() {
    std::env::set_var("CYCLER_CYCLE_SECS", "120");
    std::env::set_var("CYCLER_ALLOW_DIRECT", "false");

    let result = Config::from_file(Path::new("config.toml"));

    std::env::remove_var("CYCLER_CYCLE_SECS");
    std::env::remove_var("CYCLER_ALLOW_DIRECT");

    let config = result.unwrap();
    assert_eq!(config.scheduler.cycle_secs, 120);
    assert!(!config.proxy.allow_direct);
}

#[test]
#[serial]
fn test_invalid_file_is_rejected() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("bad.toml");
    std::fs::write(&path, "[scheduler]\ncycle_secs = 0\n").unwrap();

    let result = Config::load(Some(path.as_path()));
    assert!(result.is_err());
}
