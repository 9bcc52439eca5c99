//! Run state snapshots and observed execution status.

use chrono::{DateTime, Utc};
use ferry_workflow::WorkflowInstance;
use serde::{Deserialize, Serialize};

/// Phase of a workflow instance as tracked by the orchestrator's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
  Queued,
  Submitting,
  Submitted,
  Running,
  Terminated,
  Failed,
  Done,
}

/// Snapshot of a workflow instance's run, handed to [`poll`].
///
/// [`poll`]: crate::ExecutionBackend::poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
  pub instance: WorkflowInstance,
  pub phase: RunPhase,
  /// Id of the execution attempt, once one has been submitted.
  pub execution_id: Option<String>,
  pub updated_at: DateTime<Utc>,
}

impl RunState {
  pub fn new(instance: WorkflowInstance, phase: RunPhase) -> Self {
    Self {
      instance,
      phase,
      execution_id: None,
      updated_at: Utc::now(),
    }
  }

  pub fn with_execution_id(mut self, execution_id: impl Into<String>) -> Self {
    self.execution_id = Some(execution_id.into());
    self
  }
}

/// Status of an execution as observed on the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionStatus {
  /// Accepted but not yet running (image pull, scheduling).
  Pending,
  Running,
  Succeeded,
  Failed {
    exit_code: Option<i32>,
    message: Option<String>,
  },
  /// The backend has no execution with this id.
  NotFound,
}

impl ExecutionStatus {
  /// Returns true once the execution will make no further progress.
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      ExecutionStatus::Succeeded | ExecutionStatus::Failed { .. } | ExecutionStatus::NotFound
    )
  }
}
