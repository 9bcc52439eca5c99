//! Translation of run specs into cluster execution specs.

use std::collections::BTreeMap;

use ferry_runner::{RunSpec, RunnerError};
use ferry_secrets::{KEY_FILE, SecretHandle};
use ferry_workflow::WorkflowInstance;

use crate::client::{ExecutionSpec, SecretMount};

pub const LABEL_MANAGED_BY: &str = "ferry.managed-by";
pub const LABEL_WORKFLOW: &str = "ferry.workflow";
pub const LABEL_PARAMETER: &str = "ferry.parameter";
pub const LABEL_EXECUTION_ID: &str = "ferry.execution-id";
pub const LABEL_TRIGGER_TYPE: &str = "ferry.trigger-type";
pub const LABEL_COMMIT_SHA: &str = "ferry.commit-sha";

pub const MANAGED_BY: &str = "ferry";

/// Prefix of the environment variables ferry sets on every execution.
pub const RESERVED_ENV_PREFIX: &str = "FERRY_";

pub const SERVICE_ACCOUNT_MOUNT_PATH: &str = "/etc/ferry/service-account";
pub const CREDENTIALS_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";
pub const TERMINATION_LOG_PATH: &str = "/dev/termination-log";

/// Label selector matching every execution ferry created.
pub fn managed_selector() -> BTreeMap<String, String> {
  BTreeMap::from([(LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string())])
}

/// Reject run specs that would clash with what ferry sets itself.
///
/// Runs before any secret or cluster I/O.
pub(crate) fn check_run_spec(run_spec: &RunSpec) -> Result<(), RunnerError> {
  for key in run_spec.env().keys() {
    if key.starts_with(RESERVED_ENV_PREFIX) {
      return Err(RunnerError::invalid_run_spec(format!(
        "env var '{}' is reserved",
        key
      )));
    }
    if run_spec.service_account().is_some() && key == CREDENTIALS_ENV {
      return Err(RunnerError::invalid_run_spec(format!(
        "env var '{}' is set from the service account",
        key
      )));
    }
  }

  if run_spec.service_account().is_some()
    && let Some(secret) = run_spec.secret()
    && secret.mount_path == SERVICE_ACCOUNT_MOUNT_PATH
  {
    return Err(RunnerError::invalid_run_spec(format!(
      "secret '{}' cannot be mounted at {}",
      secret.name, SERVICE_ACCOUNT_MOUNT_PATH
    )));
  }

  Ok(())
}

/// Build the execution spec for one run.
pub(crate) fn build_execution_spec(
  instance: &WorkflowInstance,
  run_spec: &RunSpec,
  environment: &str,
  service_account_secret: Option<&SecretHandle>,
) -> ExecutionSpec {
  let workflow_id = &instance.workflow_id;
  let execution_id = run_spec.execution_id();

  let mut labels = BTreeMap::from([
    (LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string()),
    (LABEL_WORKFLOW.to_string(), workflow_id.key()),
    (LABEL_PARAMETER.to_string(), instance.parameter.clone()),
    (LABEL_EXECUTION_ID.to_string(), execution_id.to_string()),
  ]);

  let mut env = run_spec.env().clone();
  env.insert("FERRY_COMPONENT_ID".to_string(), workflow_id.owner().to_string());
  env.insert("FERRY_WORKFLOW_ID".to_string(), workflow_id.name().to_string());
  env.insert("FERRY_PARAMETER".to_string(), instance.parameter.clone());
  env.insert("FERRY_EXECUTION_ID".to_string(), execution_id.to_string());
  env.insert("FERRY_ENVIRONMENT".to_string(), environment.to_string());

  if let Some(trigger) = run_spec.trigger() {
    env.insert("FERRY_TRIGGER_ID".to_string(), trigger.trigger_id().to_string());
    env.insert("FERRY_TRIGGER_TYPE".to_string(), trigger.trigger_type().to_string());
    labels.insert(LABEL_TRIGGER_TYPE.to_string(), trigger.trigger_type().to_string());
  }

  if let Some(sha) = run_spec.commit_sha() {
    env.insert("FERRY_COMMIT_SHA".to_string(), sha.to_string());
    labels.insert(LABEL_COMMIT_SHA.to_string(), sha.to_string());
  }

  let termination_log = run_spec
    .termination_logging()
    .then(|| TERMINATION_LOG_PATH.to_string());
  if let Some(path) = &termination_log {
    env.insert("FERRY_TERMINATION_LOG".to_string(), path.clone());
  }

  let mut mounts = Vec::new();
  if let Some(secret) = run_spec.secret() {
    mounts.push(SecretMount {
      secret_name: secret.name.clone(),
      mount_path: secret.mount_path.clone(),
    });
  }
  if let Some(handle) = service_account_secret {
    mounts.push(SecretMount {
      secret_name: handle.name.clone(),
      mount_path: SERVICE_ACCOUNT_MOUNT_PATH.to_string(),
    });
    env.insert(
      CREDENTIALS_ENV.to_string(),
      format!("{}/{}", SERVICE_ACCOUNT_MOUNT_PATH, KEY_FILE),
    );
  }

  ExecutionSpec {
    name: execution_id.to_string(),
    image: run_spec.image_name().to_string(),
    args: run_spec.args().to_vec(),
    env,
    labels,
    mounts,
    service_account: run_spec.service_account().map(str::to_string),
    termination_log,
    mem_request: run_spec.mem_request().map(str::to_string),
    mem_limit: run_spec.mem_limit().map(str::to_string),
  }
}
