use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The kind of cluster a backend identifier maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
  /// Clusterless backend that keeps executions and secrets in memory.
  Local,
}

/// Construction parameters for one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
  pub kind: BackendKind,
  /// Namespace that executions and secrets are created in.
  pub namespace: String,
  /// Interval between background sweeps.
  #[serde(default = "default_sweep_interval_secs")]
  pub sweep_interval_secs: u64,
  /// How long `close` waits for background work before giving up.
  #[serde(default = "default_close_timeout_secs")]
  pub close_timeout_secs: u64,
}

fn default_sweep_interval_secs() -> u64 {
  300
}

fn default_close_timeout_secs() -> u64 {
  30
}

impl BackendConfig {
  pub fn local(namespace: impl Into<String>) -> Self {
    Self {
      kind: BackendKind::Local,
      namespace: namespace.into(),
      sweep_interval_secs: default_sweep_interval_secs(),
      close_timeout_secs: default_close_timeout_secs(),
    }
  }

  pub fn sweep_interval(&self) -> Duration {
    Duration::from_secs(self.sweep_interval_secs)
  }

  pub fn close_timeout(&self) -> Duration {
    Duration::from_secs(self.close_timeout_secs)
  }
}
