//! Execution backend on top of a cluster control plane.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ferry_config::BackendConfig;
use ferry_runner::{
  ExecutionBackend, ExecutionStatus, ManagedBackend, RunSpec, RunState, RunnerError, bootstrap,
};
use ferry_secrets::{SecretLifecycleManager, SweepReport};
use ferry_workflow::WorkflowInstance;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::client::ClusterClient;
use crate::error::ClusterError;
use crate::execution::{build_execution_spec, check_run_spec, managed_selector};

/// An [`ExecutionBackend`] that schedules executions on one cluster.
///
/// Service-account credentials are bound through a
/// [`SecretLifecycleManager`] before the execution is created. After
/// [`init`](ManagedBackend::init) a background task sweeps unreferenced
/// secrets at the configured interval until the backend is closed.
pub struct ClusterBackend<C: ClusterClient> {
  name: String,
  environment: String,
  client: Arc<C>,
  secrets: Arc<SecretLifecycleManager>,
  sweep_interval: Duration,
  close_timeout: Duration,
  cancel: CancellationToken,
  sweeper: Mutex<Option<JoinHandle<()>>>,
  closed: AtomicBool,
}

impl<C: ClusterClient> ClusterBackend<C> {
  pub fn new(
    name: impl Into<String>,
    environment: impl Into<String>,
    config: &BackendConfig,
    client: Arc<C>,
    secrets: Arc<SecretLifecycleManager>,
  ) -> Self {
    Self {
      name: name.into(),
      environment: environment.into(),
      client,
      secrets,
      sweep_interval: config.sweep_interval(),
      close_timeout: config.close_timeout(),
      cancel: CancellationToken::new(),
      sweeper: Mutex::new(None),
      closed: AtomicBool::new(false),
    }
  }

  /// Construct and initialize a backend, closing it again if initialization fails.
  pub async fn bootstrap(
    name: impl Into<String>,
    environment: impl Into<String>,
    config: &BackendConfig,
    client: Arc<C>,
    secrets: Arc<SecretLifecycleManager>,
  ) -> Result<Self, RunnerError> {
    bootstrap(Self::new(name, environment, config, client, secrets)).await
  }

  pub fn client(&self) -> &Arc<C> {
    &self.client
  }

  pub fn secrets(&self) -> &Arc<SecretLifecycleManager> {
    &self.secrets
  }

  fn ensure_open(&self) -> Result<(), RunnerError> {
    if self.closed.load(Ordering::SeqCst) {
      Err(RunnerError::Closed(self.name.clone()))
    } else {
      Ok(())
    }
  }

  fn take_sweeper(&self) -> Option<JoinHandle<()>> {
    match self.sweeper.lock() {
      Ok(mut guard) => guard.take(),
      Err(poisoned) => poisoned.into_inner().take(),
    }
  }

  fn spawn_sweeper(&self) {
    let client = self.client.clone();
    let secrets = self.secrets.clone();
    let cancel = self.cancel.clone();
    let name = self.name.clone();
    let interval = self.sweep_interval;

    let handle = tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      // The first tick completes immediately.
      ticker.tick().await;

      loop {
        tokio::select! {
          _ = cancel.cancelled() => {
            debug!(backend = %name, "sweeper stopped");
            break;
          }
          _ = ticker.tick() => {
            if let Err(e) = sweep(&*client, &secrets, &name).await {
              warn!(backend = %name, error = %e, "periodic sweep failed");
            }
          }
        }
      }
    });

    let previous = match self.sweeper.lock() {
      Ok(mut guard) => guard.replace(handle),
      Err(poisoned) => poisoned.into_inner().replace(handle),
    };
    if let Some(previous) = previous {
      previous.abort();
    }
  }
}

/// Reclaim managed secrets that no execution on the cluster mounts.
///
/// Executions are listed before secrets, so a secret bound by a start that
/// races the sweep is protected by its reference even if the execution is
/// not listed yet.
async fn sweep<C: ClusterClient>(
  client: &C,
  secrets: &SecretLifecycleManager,
  backend: &str,
) -> Result<SweepReport, RunnerError> {
  let executions = client
    .list_executions(&managed_selector())
    .await
    .map_err(|e| cluster_error(backend, "listing executions", e))?;

  let mounted: HashSet<String> = executions
    .iter()
    .flat_map(|r| r.spec.secret_names())
    .map(str::to_string)
    .collect();

  let report = secrets
    .sweep(&mounted)
    .await
    .map_err(|e| e.into_runner_error(backend))?;

  info!(
    backend = %backend,
    executions = executions.len(),
    reclaimed = report.reclaimed.len(),
    retained = report.retained.len(),
    failed = report.failed.len(),
    "sweep completed"
  );
  Ok(report)
}

fn cluster_error(backend: &str, context: impl Into<String>, e: ClusterError) -> RunnerError {
  match e {
    ClusterError::Unavailable(message) => RunnerError::unavailable(backend, message),
    e => RunnerError::backend(context, e),
  }
}

#[async_trait]
impl<C: ClusterClient> ExecutionBackend for ClusterBackend<C> {
  #[instrument(
    name = "cluster_start",
    skip(self, instance, run_spec),
    fields(
      backend = %self.name,
      workflow = %instance,
      execution_id = %run_spec.execution_id(),
    )
  )]
  async fn start(&self, instance: &WorkflowInstance, run_spec: RunSpec) -> Result<(), RunnerError> {
    self.ensure_open()?;
    check_run_spec(&run_spec)?;

    let execution_id = run_spec.execution_id();

    if let Some(secret) = run_spec.secret() {
      self
        .secrets
        .validate_declared(secret)
        .await
        .map_err(|e| e.into_runner_error(&self.name))?;
    }

    let binding = match run_spec.service_account() {
      Some(account) => Some(
        self
          .secrets
          .bind(account, execution_id)
          .await
          .map_err(|e| e.into_runner_error(&self.name))?,
      ),
      None => None,
    };

    let spec = build_execution_spec(instance, &run_spec, &self.environment, binding.as_ref());

    match self.client.create_execution(spec).await {
      Ok(()) => {
        info!(image = %run_spec.image_name(), "execution started");
        Ok(())
      }
      // The existing execution holds the reference taken by the first start.
      Err(ClusterError::AlreadyExists(_)) => {
        debug!("execution already exists");
        Err(RunnerError::AlreadyRunning {
          instance: instance.to_string(),
          execution_id: execution_id.to_string(),
        })
      }
      Err(e) => {
        if binding.is_some() {
          self.secrets.release(execution_id);
        }
        error!(error = %e, "failed to create execution");
        Err(cluster_error(
          &self.name,
          format!("starting execution '{}' for {}", execution_id, instance),
          e,
        ))
      }
    }
  }

  async fn poll(&self, run_state: &RunState) -> Result<ExecutionStatus, RunnerError> {
    self.ensure_open()?;

    let Some(execution_id) = run_state.execution_id.as_deref() else {
      return Ok(ExecutionStatus::NotFound);
    };

    match self.client.get_execution(execution_id).await {
      Ok(Some(record)) => Ok(record.status),
      Ok(None) => Ok(ExecutionStatus::NotFound),
      Err(e) => Err(cluster_error(
        &self.name,
        format!("polling execution '{}' for {}", execution_id, run_state.instance),
        e,
      )),
    }
  }

  async fn cleanup(&self) -> Result<(), RunnerError> {
    self.ensure_open()?;
    sweep(&*self.client, &self.secrets, &self.name).await?;
    Ok(())
  }

  #[instrument(
    name = "cluster_cleanup_execution",
    skip(self, instance),
    fields(backend = %self.name, workflow = %instance)
  )]
  async fn cleanup_execution(
    &self,
    instance: &WorkflowInstance,
    execution_id: &str,
  ) -> Result<(), RunnerError> {
    self.ensure_open()?;

    match self.client.delete_execution(execution_id).await {
      Ok(()) => info!("execution deleted"),
      Err(ClusterError::NotFound(_)) => debug!("execution already gone"),
      Err(e) => {
        return Err(cluster_error(
          &self.name,
          format!("deleting execution '{}' for {}", execution_id, instance),
          e,
        ));
      }
    }

    self.secrets.release(execution_id);
    Ok(())
  }

  async fn close(&self) -> Result<(), RunnerError> {
    if self.closed.swap(true, Ordering::SeqCst) {
      return Ok(());
    }

    self.cancel.cancel();
    let mut result = Ok(());

    if let Some(mut sweeper) = self.take_sweeper()
      && tokio::time::timeout(self.close_timeout, &mut sweeper).await.is_err()
    {
      sweeper.abort();
      warn!(backend = %self.name, "sweeper did not stop within the close timeout");
      result = Err(RunnerError::backend(
        format!("closing backend '{}'", self.name),
        "sweeper did not stop within the close timeout",
      ));
    }

    if let Err(e) = self.client.close().await {
      error!(backend = %self.name, error = %e, "failed to close cluster client");
      result = result.and(Err(RunnerError::backend(
        format!("closing backend '{}'", self.name),
        e,
      )));
    }

    info!(backend = %self.name, "backend closed");
    result
  }
}

#[async_trait]
impl<C: ClusterClient> ManagedBackend for ClusterBackend<C> {
  fn name(&self) -> &str {
    &self.name
  }

  async fn init(&self) -> Result<(), RunnerError> {
    self.ensure_open()?;

    self
      .client
      .ping()
      .await
      .map_err(|e| cluster_error(&self.name, "checking connectivity", e))?;

    self.spawn_sweeper();
    info!(
      backend = %self.name,
      sweep_interval_secs = self.sweep_interval.as_secs(),
      "cluster backend ready"
    );
    Ok(())
  }
}

impl<C: ClusterClient> Drop for ClusterBackend<C> {
  fn drop(&mut self) {
    self.cancel.cancel();
  }
}
