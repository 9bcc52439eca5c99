use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::active::ActiveBackend;
use crate::backend::BackendConfig;
use crate::error::ConfigError;

/// Top-level ferry configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FerryConfig {
  /// Environment name, exposed to executions (e.g. "production", "staging").
  pub environment: String,
  /// Identifier of the backend new work is routed to.
  pub active_backend: String,
  /// Service accounts that executions are allowed to bind.
  #[serde(default)]
  pub service_account_whitelist: BTreeSet<String>,
  /// Declared backends keyed by identifier.
  pub backends: BTreeMap<String, BackendConfig>,
}

impl FerryConfig {
  /// Load and validate configuration from a JSON file.
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_json(&content)
  }

  /// Parse and validate configuration from a JSON string.
  pub fn from_json(content: &str) -> Result<Self, ConfigError> {
    let config: FerryConfig = serde_json::from_str(content)?;
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.environment.is_empty() {
      return Err(ConfigError::invalid("environment must not be empty"));
    }

    if !self.backends.contains_key(&self.active_backend) {
      return Err(ConfigError::UnknownBackend(self.active_backend.clone()));
    }

    for (id, backend) in &self.backends {
      if id.is_empty() {
        return Err(ConfigError::invalid("backend identifiers must not be empty"));
      }
      if backend.namespace.is_empty() {
        return Err(ConfigError::invalid(format!(
          "backend '{}' has an empty namespace",
          id
        )));
      }
      if backend.sweep_interval_secs == 0 {
        return Err(ConfigError::invalid(format!(
          "backend '{}' must have a sweep interval greater than zero",
          id
        )));
      }
      if backend.close_timeout_secs == 0 {
        return Err(ConfigError::invalid(format!(
          "backend '{}' must have a close timeout greater than zero",
          id
        )));
      }
    }

    Ok(())
  }

  /// Look up a declared backend.
  pub fn backend(&self, id: &str) -> Result<&BackendConfig, ConfigError> {
    self
      .backends
      .get(id)
      .ok_or_else(|| ConfigError::UnknownBackend(id.to_string()))
  }

  /// Build the shared active-backend holder, seeded from this config.
  pub fn active(&self) -> ActiveBackend {
    ActiveBackend::new(self.active_backend.clone())
  }
}
