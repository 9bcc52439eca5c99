//! Integration tests for RoutingBackend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ferry_runner::{
  BackendFactory, BackendState, ExecutionBackend, ExecutionStatus, RoutingBackend, RunPhase,
  RunSpec, RunState, RunnerError, SharedBackend,
};
use ferry_workflow::{WorkflowId, WorkflowInstance};

/// Backend that records the execution ids it was asked to start.
struct RecordingBackend {
  id: String,
  started: Mutex<Vec<String>>,
  closes: Arc<AtomicUsize>,
}

#[async_trait]
impl ExecutionBackend for RecordingBackend {
  async fn start(&self, instance: &WorkflowInstance, run_spec: RunSpec) -> Result<(), RunnerError> {
    let mut started = self.started.lock().unwrap();
    if started.iter().any(|e| e == run_spec.execution_id()) {
      return Err(RunnerError::AlreadyRunning {
        instance: instance.to_string(),
        execution_id: run_spec.execution_id().to_string(),
      });
    }
    started.push(run_spec.execution_id().to_string());
    Ok(())
  }

  async fn poll(&self, run_state: &RunState) -> Result<ExecutionStatus, RunnerError> {
    let started = self.started.lock().unwrap();
    match &run_state.execution_id {
      Some(id) if started.contains(id) => Ok(ExecutionStatus::Running),
      _ => Ok(ExecutionStatus::NotFound),
    }
  }

  async fn cleanup(&self) -> Result<(), RunnerError> {
    Ok(())
  }

  async fn cleanup_execution(&self, _: &WorkflowInstance, execution_id: &str) -> Result<(), RunnerError> {
    self.started.lock().unwrap().retain(|e| e != execution_id);
    Ok(())
  }

  async fn close(&self) -> Result<(), RunnerError> {
    self.closes.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }
}

/// Factory that counts constructions per identifier and keeps every backend
/// it built so tests can inspect them.
#[derive(Default)]
struct RecordingFactory {
  constructions: Mutex<HashMap<String, usize>>,
  backends: Mutex<HashMap<String, Arc<RecordingBackend>>>,
  total: AtomicUsize,
  closes: Arc<AtomicUsize>,
  delay: Duration,
}

impl RecordingFactory {
  fn slow(delay: Duration) -> Self {
    Self {
      delay,
      ..Self::default()
    }
  }

  fn closes(&self) -> usize {
    self.closes.load(Ordering::SeqCst)
  }

  fn constructions(&self, id: &str) -> usize {
    self
      .constructions
      .lock()
      .unwrap()
      .get(id)
      .copied()
      .unwrap_or(0)
  }

  fn started_on(&self, id: &str) -> Vec<String> {
    self.backends.lock().unwrap()[id].started.lock().unwrap().clone()
  }
}

#[async_trait]
impl BackendFactory for RecordingFactory {
  async fn create(&self, id: &str) -> Result<SharedBackend, RunnerError> {
    // Widen the window in which concurrent callers could race.
    tokio::time::sleep(Duration::from_millis(20) + self.delay).await;

    self.total.fetch_add(1, Ordering::SeqCst);
    *self
      .constructions
      .lock()
      .unwrap()
      .entry(id.to_string())
      .or_default() += 1;

    let backend = Arc::new(RecordingBackend {
      id: id.to_string(),
      started: Mutex::new(Vec::new()),
      closes: self.closes.clone(),
    });
    self
      .backends
      .lock()
      .unwrap()
      .insert(backend.id.clone(), backend.clone());
    Ok(backend)
  }
}

fn instance() -> WorkflowInstance {
  WorkflowInstance::new(WorkflowId::new("team-a", "daily-etl").unwrap(), "2024-01-01")
}

fn switchable(initial: &str) -> (Arc<Mutex<String>>, impl Fn() -> String + Send + Sync + 'static) {
  let active = Arc::new(Mutex::new(initial.to_string()));
  let resolve = {
    let active = active.clone();
    move || active.lock().unwrap().clone()
  };
  (active, resolve)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_calls_construct_once() {
  let factory = Arc::new(RecordingFactory::default());
  let router = Arc::new(RoutingBackend::new(factory.clone(), || "cluster-2".to_string()));

  let handles: Vec<_> = (0..32)
    .map(|i| {
      let router = router.clone();
      tokio::spawn(async move {
        let spec = RunSpec::simple(format!("exec-{}", i), "busybox", ["true"]).unwrap();
        router.start(&instance(), spec).await
      })
    })
    .collect();

  for handle in handles {
    handle.await.unwrap().unwrap();
  }

  assert_eq!(factory.constructions("cluster-2"), 1);
  assert_eq!(factory.total.load(Ordering::SeqCst), 1);
  assert_eq!(factory.started_on("cluster-2").len(), 32);
}

#[tokio::test]
async fn test_switching_active_backend() {
  let factory = Arc::new(RecordingFactory::default());
  let (active, resolve) = switchable("cluster-2");
  let router = RoutingBackend::new(factory.clone(), resolve);

  router
    .start(&instance(), RunSpec::simple("exec-1", "busybox", ["true"]).unwrap())
    .await
    .unwrap();

  *active.lock().unwrap() = "cluster-3".to_string();

  router
    .start(&instance(), RunSpec::simple("exec-2", "busybox", ["true"]).unwrap())
    .await
    .unwrap();

  assert_eq!(factory.started_on("cluster-2"), vec!["exec-1".to_string()]);
  assert_eq!(factory.started_on("cluster-3"), vec!["exec-2".to_string()]);
  assert_eq!(factory.constructions("cluster-2"), 1);
  assert_eq!(factory.constructions("cluster-3"), 1);

  // Switching back reuses the existing instance.
  *active.lock().unwrap() = "cluster-2".to_string();
  let state = RunState::new(instance(), RunPhase::Submitted).with_execution_id("exec-1");
  assert_eq!(router.poll(&state).await.unwrap(), ExecutionStatus::Running);
  assert_eq!(factory.constructions("cluster-2"), 1);

  assert_eq!(router.state("cluster-2"), BackendState::Ready);
  assert_eq!(router.state("cluster-3"), BackendState::Ready);
  assert_eq!(
    router.constructed(),
    vec!["cluster-2".to_string(), "cluster-3".to_string()]
  );
}

#[tokio::test]
async fn test_duplicate_start_is_reported() {
  let factory = Arc::new(RecordingFactory::default());
  let router = RoutingBackend::new(factory.clone(), || "cluster-2".to_string());

  let spec = RunSpec::simple("exec-1", "busybox", ["true"]).unwrap();
  router.start(&instance(), spec.clone()).await.unwrap();

  let err = router.start(&instance(), spec).await.unwrap_err();
  assert!(err.is_already_running());
  assert_eq!(factory.started_on("cluster-2").len(), 1);
}

#[tokio::test]
async fn test_close_closes_constructed_backends_only() {
  let factory = Arc::new(RecordingFactory::default());
  let (active, resolve) = switchable("cluster-2");
  let router = RoutingBackend::new(factory.clone(), resolve);

  router.cleanup().await.unwrap();
  *active.lock().unwrap() = "cluster-3".to_string();

  router.close().await.unwrap();

  // cluster-3 was never requested before close, so nothing was built for it.
  assert_eq!(factory.constructions("cluster-3"), 0);
  assert_eq!(router.state("cluster-3"), BackendState::Absent);
  assert!(matches!(
    router.cleanup().await,
    Err(RunnerError::Closed(id)) if id == "cluster-3"
  ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_close_waits_for_construction_in_flight() {
  let factory = Arc::new(RecordingFactory::slow(Duration::from_millis(100)));
  let router = Arc::new(RoutingBackend::new(factory.clone(), || "cluster-2".to_string()));

  let call = {
    let router = router.clone();
    tokio::spawn(async move { router.cleanup().await })
  };

  // Let the spawned call claim the slot and enter the factory.
  tokio::time::sleep(Duration::from_millis(20)).await;
  assert_eq!(router.state("cluster-2"), BackendState::Pending);

  router.close().await.unwrap();
  let _ = call.await.unwrap();

  assert_eq!(factory.constructions("cluster-2"), 1);
  assert_eq!(factory.closes(), 1);
  assert_eq!(router.state("cluster-2"), BackendState::Ready);
}
