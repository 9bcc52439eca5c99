//! Tests for loading configuration from disk.

use std::io::Write;

use ferry_config::{ConfigError, FerryConfig};

fn write_config(content: &str) -> tempfile::NamedTempFile {
  let mut file = tempfile::NamedTempFile::new().expect("failed to create temp file");
  file
    .write_all(content.as_bytes())
    .expect("failed to write config");
  file
}

#[test]
fn test_load_from_file() {
  let file = write_config(
    r#"{
      "environment": "staging",
      "active_backend": "cluster-2",
      "service_account_whitelist": ["etl@project.iam", "report@project.iam"],
      "backends": {
        "cluster-2": { "kind": "local", "namespace": "ferry", "close_timeout_secs": 5 }
      }
    }"#,
  );

  let config = FerryConfig::load(file.path()).unwrap();
  assert_eq!(config.environment, "staging");
  assert_eq!(config.service_account_whitelist.len(), 2);
  assert_eq!(
    config.backend("cluster-2").unwrap().close_timeout(),
    std::time::Duration::from_secs(5)
  );

  let active = config.active();
  assert_eq!(active.get(), "cluster-2");
}

#[test]
fn test_load_missing_file() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("missing.json");

  let result = FerryConfig::load(&path);
  assert!(matches!(result, Err(ConfigError::Io { path: p, .. }) if p == path));
}

#[test]
fn test_load_invalid_json() {
  let file = write_config("{ not json");
  assert!(matches!(
    FerryConfig::load(file.path()),
    Err(ConfigError::Parse(_))
  ));
}
