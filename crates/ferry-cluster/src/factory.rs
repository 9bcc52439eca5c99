use std::sync::Arc;

use async_trait::async_trait;
use ferry_config::{BackendKind, FerryConfig};
use ferry_runner::{BackendFactory, RunnerError, SharedBackend};
use ferry_secrets::SecretLifecycleManager;
use tracing::info;

use crate::backend::ClusterBackend;
use crate::memory::InMemoryCluster;

/// Builds bootstrapped backends for the identifiers declared in a [`FerryConfig`].
pub struct ConfiguredBackendFactory {
  config: FerryConfig,
}

impl ConfiguredBackendFactory {
  pub fn new(config: FerryConfig) -> Self {
    Self { config }
  }
}

#[async_trait]
impl BackendFactory for ConfiguredBackendFactory {
  async fn create(&self, id: &str) -> Result<SharedBackend, RunnerError> {
    let backend_config = self
      .config
      .backend(id)
      .map_err(|e| RunnerError::unavailable(id, e.to_string()))?;

    info!(
      backend = %id,
      kind = ?backend_config.kind,
      namespace = %backend_config.namespace,
      "creating backend"
    );

    match backend_config.kind {
      BackendKind::Local => {
        let cluster = Arc::new(InMemoryCluster::new());
        let secrets = Arc::new(SecretLifecycleManager::new(
          cluster.secret_store(),
          cluster.key_manager(),
          self.config.service_account_whitelist.iter().cloned(),
        ));

        let backend = ClusterBackend::bootstrap(
          id,
          self.config.environment.clone(),
          backend_config,
          cluster,
          secrets,
        )
        .await?;
        Ok(Arc::new(backend))
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use ferry_runner::{ExecutionStatus, RunPhase, RunSpec, RunState};
  use ferry_workflow::{WorkflowId, WorkflowInstance};

  const CONFIG: &str = r#"{
    "environment": "staging",
    "active_backend": "local",
    "service_account_whitelist": ["etl@project.iam"],
    "backends": { "local": { "kind": "local", "namespace": "ferry" } }
  }"#;

  #[tokio::test]
  async fn test_creates_declared_backend() {
    let factory = ConfiguredBackendFactory::new(FerryConfig::from_json(CONFIG).unwrap());
    let backend = factory.create("local").await.unwrap();

    let instance = WorkflowInstance::new(WorkflowId::new("team-a", "daily-etl").unwrap(), "2024-01-01");
    let run_spec = RunSpec::builder("exec-1", "busybox")
      .service_account("etl@project.iam")
      .build()
      .unwrap();
    backend.start(&instance, run_spec).await.unwrap();

    let state = RunState::new(instance, RunPhase::Submitted).with_execution_id("exec-1");
    assert_eq!(backend.poll(&state).await.unwrap(), ExecutionStatus::Pending);

    backend.close().await.unwrap();
  }

  #[tokio::test]
  async fn test_unknown_backend_is_unavailable() {
    let factory = ConfiguredBackendFactory::new(FerryConfig::from_json(CONFIG).unwrap());
    let err = factory.create("cluster-9").await.err().unwrap();

    assert!(err.is_retryable());
    assert!(err.to_string().contains("cluster-9"));
  }
}
