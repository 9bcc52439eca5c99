use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use ferry_runner::ExecutionStatus;
use ferry_secrets::{InMemoryKeyManager, InMemorySecretStore};

use crate::client::{ClusterClient, ExecutionRecord, ExecutionSpec};
use crate::error::ClusterError;

/// Clusterless control plane that keeps executions in memory.
///
/// Executions never run: they stay `Pending` until a test moves them with
/// [`set_status`](InMemoryCluster::set_status). Comes with its own secret
/// store and key manager, and supports fault injection.
#[derive(Debug, Default)]
pub struct InMemoryCluster {
  executions: Mutex<BTreeMap<String, ExecutionRecord>>,
  secrets: Arc<InMemorySecretStore>,
  keys: Arc<InMemoryKeyManager>,
  unavailable: AtomicBool,
  fail_ping: AtomicBool,
  fail_create: AtomicBool,
  fail_close: AtomicBool,
  closed: AtomicBool,
  pings: AtomicUsize,
}

impl InMemoryCluster {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn secret_store(&self) -> Arc<InMemorySecretStore> {
    self.secrets.clone()
  }

  pub fn key_manager(&self) -> Arc<InMemoryKeyManager> {
    self.keys.clone()
  }

  /// Make the control plane and the secret store unreachable until reset.
  pub fn set_unavailable(&self, unavailable: bool) {
    self.unavailable.store(unavailable, Ordering::SeqCst);
    self.secrets.set_unavailable(unavailable);
  }

  /// Make connectivity checks fail until reset.
  pub fn set_fail_ping(&self, fail: bool) {
    self.fail_ping.store(fail, Ordering::SeqCst);
  }

  /// Make execution creation be rejected until reset.
  pub fn set_fail_create(&self, fail: bool) {
    self.fail_create.store(fail, Ordering::SeqCst);
  }

  /// Make `close` fail. The cluster is still marked closed.
  pub fn set_fail_close(&self, fail: bool) {
    self.fail_close.store(fail, Ordering::SeqCst);
  }

  /// Move an execution to a new status. Returns false if it does not exist.
  pub fn set_status(&self, name: &str, status: ExecutionStatus) -> bool {
    match self.executions().get_mut(name) {
      Some(record) => {
        record.status = status;
        true
      }
      None => false,
    }
  }

  pub fn execution(&self, name: &str) -> Option<ExecutionRecord> {
    self.executions().get(name).cloned()
  }

  /// Names of every execution, sorted.
  pub fn execution_names(&self) -> Vec<String> {
    self.executions().keys().cloned().collect()
  }

  pub fn is_closed(&self) -> bool {
    self.closed.load(Ordering::SeqCst)
  }

  pub fn pings(&self) -> usize {
    self.pings.load(Ordering::SeqCst)
  }

  fn executions(&self) -> MutexGuard<'_, BTreeMap<String, ExecutionRecord>> {
    match self.executions.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    }
  }

  fn check_available(&self) -> Result<(), ClusterError> {
    if self.is_closed() {
      return Err(ClusterError::Other("client is closed".to_string()));
    }
    if self.unavailable.load(Ordering::SeqCst) {
      return Err(ClusterError::Unavailable("control plane unreachable".to_string()));
    }
    Ok(())
  }
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
  async fn ping(&self) -> Result<(), ClusterError> {
    self.pings.fetch_add(1, Ordering::SeqCst);
    self.check_available()?;
    if self.fail_ping.load(Ordering::SeqCst) {
      return Err(ClusterError::Unavailable("connection refused".to_string()));
    }
    Ok(())
  }

  async fn create_execution(&self, spec: ExecutionSpec) -> Result<(), ClusterError> {
    self.check_available()?;
    if self.fail_create.load(Ordering::SeqCst) {
      return Err(ClusterError::Rejected("exceeded quota".to_string()));
    }

    let mut executions = self.executions();
    if executions.contains_key(&spec.name) {
      return Err(ClusterError::AlreadyExists(spec.name));
    }
    executions.insert(
      spec.name.clone(),
      ExecutionRecord {
        spec,
        status: ExecutionStatus::Pending,
      },
    );
    Ok(())
  }

  async fn get_execution(&self, name: &str) -> Result<Option<ExecutionRecord>, ClusterError> {
    self.check_available()?;
    Ok(self.execution(name))
  }

  async fn list_executions(
    &self,
    selector: &BTreeMap<String, String>,
  ) -> Result<Vec<ExecutionRecord>, ClusterError> {
    self.check_available()?;
    Ok(
      self
        .executions()
        .values()
        .filter(|r| {
          selector
            .iter()
            .all(|(k, v)| r.spec.labels.get(k).is_some_and(|l| l == v))
        })
        .cloned()
        .collect(),
    )
  }

  async fn delete_execution(&self, name: &str) -> Result<(), ClusterError> {
    self.check_available()?;
    match self.executions().remove(name) {
      Some(_) => Ok(()),
      None => Err(ClusterError::NotFound(name.to_string())),
    }
  }

  async fn close(&self) -> Result<(), ClusterError> {
    self.closed.store(true, Ordering::SeqCst);
    if self.fail_close.load(Ordering::SeqCst) {
      return Err(ClusterError::Other("connection reset while closing".to_string()));
    }
    Ok(())
  }
}
