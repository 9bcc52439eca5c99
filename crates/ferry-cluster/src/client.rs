//! Cluster control plane interface.

use std::collections::BTreeMap;

use async_trait::async_trait;
use ferry_runner::ExecutionStatus;

use crate::error::ClusterError;

/// A secret mounted into an execution's container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretMount {
  pub secret_name: String,
  pub mount_path: String,
}

/// Everything the control plane needs to schedule one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionSpec {
  /// Unique per execution; equal to the run spec's execution id.
  pub name: String,
  pub image: String,
  pub args: Vec<String>,
  pub env: BTreeMap<String, String>,
  pub labels: BTreeMap<String, String>,
  pub mounts: Vec<SecretMount>,
  pub service_account: Option<String>,
  /// Path of the termination log, if the container writes one.
  pub termination_log: Option<String>,
  pub mem_request: Option<String>,
  pub mem_limit: Option<String>,
}

impl ExecutionSpec {
  /// Names of every secret the execution mounts.
  pub fn secret_names(&self) -> impl Iterator<Item = &str> {
    self.mounts.iter().map(|m| m.secret_name.as_str())
  }
}

/// An execution as observed on the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRecord {
  pub spec: ExecutionSpec,
  pub status: ExecutionStatus,
}

/// Trait for the control plane of one cluster.
///
/// The wire protocol is up to the implementation. All methods may be called
/// concurrently.
#[async_trait]
pub trait ClusterClient: Send + Sync + 'static {
  /// Cheap connectivity check.
  async fn ping(&self) -> Result<(), ClusterError>;

  /// Schedule an execution. Fails with [`ClusterError::AlreadyExists`] if an
  /// execution with the same name exists.
  async fn create_execution(&self, spec: ExecutionSpec) -> Result<(), ClusterError>;

  async fn get_execution(&self, name: &str) -> Result<Option<ExecutionRecord>, ClusterError>;

  /// List executions whose labels contain every pair in `selector`.
  async fn list_executions(
    &self,
    selector: &BTreeMap<String, String>,
  ) -> Result<Vec<ExecutionRecord>, ClusterError>;

  /// Delete an execution. Fails with [`ClusterError::NotFound`] if it does not exist.
  async fn delete_execution(&self, name: &str) -> Result<(), ClusterError>;

  /// Release connections. Further calls may fail.
  async fn close(&self) -> Result<(), ClusterError>;
}
