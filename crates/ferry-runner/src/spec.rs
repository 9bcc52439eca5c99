//! Run specifications.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::RunnerError;

/// A reference to an existing secret to mount into the execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
  pub name: String,
  pub mount_path: String,
}

impl Secret {
  pub fn new(name: impl Into<String>, mount_path: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      mount_path: mount_path.into(),
    }
  }
}

/// What caused a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Trigger {
  /// Scheduled by the workflow's own schedule.
  Natural,
  /// Triggered by hand.
  Adhoc(String),
  /// Part of a backfill.
  Backfill(String),
  /// Triggered by something the orchestrator does not classify.
  Unknown(String),
}

impl Trigger {
  pub fn trigger_type(&self) -> &'static str {
    match self {
      Trigger::Natural => "natural",
      Trigger::Adhoc(_) => "adhoc",
      Trigger::Backfill(_) => "backfill",
      Trigger::Unknown(_) => "unknown",
    }
  }

  pub fn trigger_id(&self) -> &str {
    match self {
      Trigger::Natural => "natural-trigger",
      Trigger::Adhoc(id) | Trigger::Backfill(id) | Trigger::Unknown(id) => id,
    }
  }
}

/// Specification of one execution attempt.
///
/// Built once per attempt through [`RunSpec::builder`], which enforces the
/// invariants, and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSpec {
  execution_id: String,
  image_name: String,
  args: Vec<String>,
  termination_logging: bool,
  secret: Option<Secret>,
  service_account: Option<String>,
  trigger: Option<Trigger>,
  commit_sha: Option<String>,
  mem_request: Option<String>,
  mem_limit: Option<String>,
  env: BTreeMap<String, String>,
}

impl RunSpec {
  pub fn builder(execution_id: impl Into<String>, image_name: impl Into<String>) -> RunSpecBuilder {
    RunSpecBuilder {
      spec: RunSpec {
        execution_id: execution_id.into(),
        image_name: image_name.into(),
        args: Vec::new(),
        termination_logging: false,
        secret: None,
        service_account: None,
        trigger: None,
        commit_sha: None,
        mem_request: None,
        mem_limit: None,
        env: BTreeMap::new(),
      },
    }
  }

  /// A spec with just an execution id, image and arguments.
  pub fn simple<I, S>(
    execution_id: impl Into<String>,
    image_name: impl Into<String>,
    args: I,
  ) -> Result<Self, RunnerError>
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self::builder(execution_id, image_name).args(args).build()
  }

  pub fn execution_id(&self) -> &str {
    &self.execution_id
  }

  pub fn image_name(&self) -> &str {
    &self.image_name
  }

  pub fn args(&self) -> &[String] {
    &self.args
  }

  pub fn termination_logging(&self) -> bool {
    self.termination_logging
  }

  pub fn secret(&self) -> Option<&Secret> {
    self.secret.as_ref()
  }

  pub fn service_account(&self) -> Option<&str> {
    self.service_account.as_deref()
  }

  pub fn trigger(&self) -> Option<&Trigger> {
    self.trigger.as_ref()
  }

  pub fn commit_sha(&self) -> Option<&str> {
    self.commit_sha.as_deref()
  }

  pub fn mem_request(&self) -> Option<&str> {
    self.mem_request.as_deref()
  }

  pub fn mem_limit(&self) -> Option<&str> {
    self.mem_limit.as_deref()
  }

  pub fn env(&self) -> &BTreeMap<String, String> {
    &self.env
  }
}

/// Builder for [`RunSpec`].
#[derive(Debug, Clone)]
pub struct RunSpecBuilder {
  spec: RunSpec,
}

impl RunSpecBuilder {
  pub fn args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.spec.args = args.into_iter().map(Into::into).collect();
    self
  }

  pub fn termination_logging(mut self, enabled: bool) -> Self {
    self.spec.termination_logging = enabled;
    self
  }

  pub fn secret(mut self, secret: Secret) -> Self {
    self.spec.secret = Some(secret);
    self
  }

  pub fn service_account(mut self, service_account: impl Into<String>) -> Self {
    self.spec.service_account = Some(service_account.into());
    self
  }

  pub fn trigger(mut self, trigger: Trigger) -> Self {
    self.spec.trigger = Some(trigger);
    self
  }

  pub fn commit_sha(mut self, commit_sha: impl Into<String>) -> Self {
    self.spec.commit_sha = Some(commit_sha.into());
    self
  }

  pub fn mem_request(mut self, quantity: impl Into<String>) -> Self {
    self.spec.mem_request = Some(quantity.into());
    self
  }

  pub fn mem_limit(mut self, quantity: impl Into<String>) -> Self {
    self.spec.mem_limit = Some(quantity.into());
    self
  }

  /// Set an environment variable. A later value for the same key replaces
  /// the earlier one.
  pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.spec.env.insert(key.into(), value.into());
    self
  }

  pub fn build(self) -> Result<RunSpec, RunnerError> {
    let spec = self.spec;

    if spec.execution_id.is_empty() {
      return Err(RunnerError::invalid_run_spec("execution id must not be empty"));
    }
    if spec.image_name.is_empty() {
      return Err(RunnerError::invalid_run_spec("image name must not be empty"));
    }

    if let Some(secret) = &spec.secret {
      if secret.name.is_empty() {
        return Err(RunnerError::invalid_run_spec("secret name must not be empty"));
      }
      if !secret.mount_path.starts_with('/') {
        return Err(RunnerError::invalid_run_spec(format!(
          "secret mount path '{}' must be absolute",
          secret.mount_path
        )));
      }
    }

    if spec.service_account.as_deref() == Some("") {
      return Err(RunnerError::invalid_run_spec("service account must not be empty"));
    }

    if spec.env.keys().any(|k| k.is_empty()) {
      return Err(RunnerError::invalid_run_spec("env keys must not be empty"));
    }

    let request = spec
      .mem_request
      .as_deref()
      .map(|q| parse_quantity(q).ok_or_else(|| invalid_quantity("memory request", q)))
      .transpose()?;
    let limit = spec
      .mem_limit
      .as_deref()
      .map(|q| parse_quantity(q).ok_or_else(|| invalid_quantity("memory limit", q)))
      .transpose()?;

    if let (Some(request), Some(limit)) = (request, limit)
      && request > limit
    {
      return Err(RunnerError::invalid_run_spec(format!(
        "memory request {} exceeds memory limit {}",
        spec.mem_request.as_deref().unwrap_or_default(),
        spec.mem_limit.as_deref().unwrap_or_default()
      )));
    }

    Ok(spec)
  }
}

fn invalid_quantity(what: &str, quantity: &str) -> RunnerError {
  RunnerError::invalid_run_spec(format!("invalid {}: '{}'", what, quantity))
}

/// Parse a resource quantity such as `512Mi` or `2G` into bytes.
///
/// Accepts a non-negative decimal number followed by an optional binary
/// (`Ki`..`Ei`) or decimal (`k`..`E`) suffix.
fn parse_quantity(quantity: &str) -> Option<f64> {
  const SUFFIXES: [(&str, f64); 12] = [
    ("Ki", 1024.0),
    ("Mi", 1_048_576.0),
    ("Gi", 1_073_741_824.0),
    ("Ti", 1_099_511_627_776.0),
    ("Pi", 1_125_899_906_842_624.0),
    ("Ei", 1_152_921_504_606_846_976.0),
    ("k", 1e3),
    ("M", 1e6),
    ("G", 1e9),
    ("T", 1e12),
    ("P", 1e15),
    ("E", 1e18),
  ];

  let (number, multiplier) = SUFFIXES
    .iter()
    .find_map(|(suffix, multiplier)| quantity.strip_suffix(suffix).map(|n| (n, *multiplier)))
    .unwrap_or((quantity, 1.0));

  if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit() || c == '.') {
    return None;
  }

  number.parse::<f64>().ok().map(|n| n * multiplier)
}
