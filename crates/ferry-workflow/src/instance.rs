use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::WorkflowId;

/// One schedulable occurrence of a workflow.
///
/// The parameter is the partition or trigger marker that distinguishes
/// instances of the same workflow (e.g. `2024-01-01` for a daily partition).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkflowInstance {
  pub workflow_id: WorkflowId,
  pub parameter: String,
}

impl WorkflowInstance {
  pub fn new(workflow_id: WorkflowId, parameter: impl Into<String>) -> Self {
    Self {
      workflow_id,
      parameter: parameter.into(),
    }
  }
}

impl fmt::Display for WorkflowInstance {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}#{}", self.workflow_id, self.parameter)
  }
}
