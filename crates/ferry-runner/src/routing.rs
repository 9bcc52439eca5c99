//! Routing between execution backends.
//!
//! The [`RoutingBackend`] resolves the active backend identifier on every
//! call and delegates to the backend constructed for that identifier. Each
//! identifier owns a slot in a registry guarded by one mutex; the slot is a
//! `OnceCell` so that construction is single-flight and a failed attempt
//! leaves the slot empty for the next caller to retry.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use ferry_workflow::WorkflowInstance;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use crate::backend::{ExecutionBackend, SharedBackend};
use crate::error::{CloseFailure, RunnerError};
use crate::spec::RunSpec;
use crate::state::{ExecutionStatus, RunState};

/// Factory for backends identified by a string identifier.
#[async_trait]
pub trait BackendFactory: Send + Sync {
  /// Construct and initialize the backend for `id`.
  async fn create(&self, id: &str) -> Result<SharedBackend, RunnerError>;
}

/// Construction state of one backend identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
  /// Never requested.
  Absent,
  /// Requested, but not constructed yet: either a construction is in flight
  /// or the last attempt failed and the next call will retry.
  Pending,
  /// Constructed and serving calls.
  Ready,
}

type Slot = Arc<OnceCell<SharedBackend>>;

#[derive(Default)]
struct Registry {
  slots: BTreeMap<String, Slot>,
  closed: bool,
}

/// An [`ExecutionBackend`] that routes every call to the currently active
/// backend, constructing backends lazily through a [`BackendFactory`].
///
/// # Usage
///
/// ```ignore
/// let active = config.active();
/// let router = RoutingBackend::new(factory, active.resolver());
///
/// router.start(&instance, run_spec).await?;   // goes to "cluster-2"
/// active.set("cluster-3");
/// router.start(&instance, next_spec).await?;  // goes to "cluster-3"
/// ```
pub struct RoutingBackend {
  factory: Arc<dyn BackendFactory>,
  resolve: Box<dyn Fn() -> String + Send + Sync>,
  registry: Mutex<Registry>,
}

impl RoutingBackend {
  /// Create a router. `resolve` is called on every routing decision.
  pub fn new<F>(factory: Arc<dyn BackendFactory>, resolve: F) -> Self
  where
    F: Fn() -> String + Send + Sync + 'static,
  {
    Self {
      factory,
      resolve: Box::new(resolve),
      registry: Mutex::new(Registry::default()),
    }
  }

  /// Construction state for a backend identifier.
  pub fn state(&self, id: &str) -> BackendState {
    match self.registry().slots.get(id) {
      None => BackendState::Absent,
      Some(slot) if slot.initialized() => BackendState::Ready,
      Some(_) => BackendState::Pending,
    }
  }

  /// Identifiers of every backend constructed so far, in sorted order.
  pub fn constructed(&self) -> Vec<String> {
    self
      .registry()
      .slots
      .iter()
      .filter(|(_, slot)| slot.initialized())
      .map(|(id, _)| id.clone())
      .collect()
  }

  fn registry(&self) -> MutexGuard<'_, Registry> {
    match self.registry.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    }
  }

  fn is_closed(&self) -> bool {
    self.registry().closed
  }

  /// Resolve the active identifier and return its backend, constructing it
  /// if this is the first call for that identifier.
  async fn route(&self) -> Result<SharedBackend, RunnerError> {
    let id = (self.resolve)();

    let slot = {
      let mut registry = self.registry();
      if registry.closed {
        return Err(RunnerError::Closed(id));
      }
      registry.slots.entry(id.clone()).or_default().clone()
    };

    if let Some(backend) = slot.get() {
      debug!(backend = %id, "routing to backend");
      return Ok(backend.clone());
    }

    let backend = slot
      .get_or_try_init(|| async {
        // A close that started after this slot was handed out must not miss
        // a backend constructed afterwards.
        if self.is_closed() {
          return Err(RunnerError::Closed(id.clone()));
        }

        info!(backend = %id, "constructing backend");
        self.factory.create(&id).await.inspect_err(|e| {
          warn!(backend = %id, error = %e, "failed to construct backend");
        })
      })
      .await?;

    debug!(backend = %id, "routing to backend");
    Ok(backend.clone())
  }
}

#[async_trait]
impl ExecutionBackend for RoutingBackend {
  async fn start(&self, instance: &WorkflowInstance, run_spec: RunSpec) -> Result<(), RunnerError> {
    self.route().await?.start(instance, run_spec).await
  }

  async fn poll(&self, run_state: &RunState) -> Result<ExecutionStatus, RunnerError> {
    self.route().await?.poll(run_state).await
  }

  async fn cleanup(&self) -> Result<(), RunnerError> {
    self.route().await?.cleanup().await
  }

  async fn cleanup_execution(
    &self,
    instance: &WorkflowInstance,
    execution_id: &str,
  ) -> Result<(), RunnerError> {
    self
      .route()
      .await?
      .cleanup_execution(instance, execution_id)
      .await
  }

  /// Close every backend this router ever constructed.
  ///
  /// Waits for constructions already in flight so their backends are closed
  /// too. Every individual failure is reported in [`RunnerError::CloseFailed`].
  async fn close(&self) -> Result<(), RunnerError> {
    let slots: Vec<(String, Slot)> = {
      let mut registry = self.registry();
      if registry.closed {
        return Ok(());
      }
      registry.closed = true;
      registry
        .slots
        .iter()
        .map(|(id, slot)| (id.clone(), slot.clone()))
        .collect()
    };

    let closes = slots.into_iter().map(|(id, slot)| async move {
      // Never constructs: the init closure only runs on an empty slot and
      // leaves it empty.
      let backend = slot
        .get_or_try_init(|| async { Err(RunnerError::Closed(id.clone())) })
        .await
        .ok()?
        .clone();

      info!(backend = %id, "closing backend");
      match backend.close().await {
        Ok(()) => None,
        Err(e) => {
          error!(backend = %id, error = %e, "failed to close backend");
          Some(CloseFailure { backend: id, error: e })
        }
      }
    });

    let failures: Vec<CloseFailure> = futures::future::join_all(closes)
      .await
      .into_iter()
      .flatten()
      .collect();

    if failures.is_empty() {
      Ok(())
    } else {
      Err(RunnerError::CloseFailed(failures))
    }
  }
}
