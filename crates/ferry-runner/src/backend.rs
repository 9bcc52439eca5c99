//! Execution backend trait definition.

use std::sync::Arc;

use async_trait::async_trait;
use ferry_workflow::WorkflowInstance;

use crate::error::RunnerError;
use crate::spec::RunSpec;
use crate::state::{ExecutionStatus, RunState};

/// Interface to an environment that runs containers for workflow instances.
///
/// Every operation may be called concurrently for different instances, and
/// `start`, `poll` and `cleanup_execution` may race for the same instance.
///
/// # Lifecycle
///
/// 1. `start` an execution described by a [`RunSpec`]
/// 2. `poll` it until the observed status is terminal
/// 3. `cleanup_execution` once the state machine marks it finished
/// 4. `cleanup` periodically to reclaim resources nothing references anymore
/// 5. `close` when the process shuts down
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
  /// Start an execution for the instance.
  ///
  /// Idempotent per `run_spec.execution_id()`: a second call for an execution
  /// that already exists fails with [`RunnerError::AlreadyRunning`] and never
  /// creates a duplicate. Secrets and service-account bindings declared in the
  /// spec are in place before the container is scheduled.
  async fn start(&self, instance: &WorkflowInstance, run_spec: RunSpec) -> Result<(), RunnerError>;

  /// Read the current backend status of the execution in `run_state`.
  ///
  /// Never changes backend execution state.
  async fn poll(&self, run_state: &RunState) -> Result<ExecutionStatus, RunnerError>;

  /// Remove backend resources, such as secrets, that no live execution uses.
  async fn cleanup(&self) -> Result<(), RunnerError>;

  /// Clean up after a finished execution.
  ///
  /// Succeeds for executions that never fully started.
  async fn cleanup_execution(
    &self,
    instance: &WorkflowInstance,
    execution_id: &str,
  ) -> Result<(), RunnerError>;

  /// Release connections, handles and background work.
  async fn close(&self) -> Result<(), RunnerError>;
}

/// A shared execution backend for dynamic dispatch.
pub type SharedBackend = Arc<dyn ExecutionBackend>;

/// A backend with an explicit initialization step, brought up through
/// [`bootstrap`](crate::bootstrap).
#[async_trait]
pub trait ManagedBackend: ExecutionBackend {
  /// Name used in logs and errors.
  fn name(&self) -> &str;

  /// Connect and start background work. On failure the backend may be
  /// partially initialized and must still accept `close`.
  async fn init(&self) -> Result<(), RunnerError>;
}
