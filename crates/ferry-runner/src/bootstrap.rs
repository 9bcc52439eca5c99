//! Backend bootstrap.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::{error, info};

use crate::backend::ManagedBackend;
use crate::error::RunnerError;

/// Initialize a freshly constructed backend.
///
/// If initialization fails or panics, the backend is closed before the
/// failure is returned. A failure while closing is logged and never replaces
/// the initialization error the caller sees.
pub async fn bootstrap<B: ManagedBackend>(backend: B) -> Result<B, RunnerError> {
  let name = backend.name().to_string();

  let outcome = AssertUnwindSafe(backend.init()).catch_unwind().await;
  let cause = match outcome {
    Ok(Ok(())) => {
      info!(backend = %name, "backend initialized");
      return Ok(backend);
    }
    Ok(Err(e)) => e,
    Err(panic) => RunnerError::backend("initialization panicked", panic_message(panic.as_ref())),
  };

  error!(backend = %name, error = %cause, "failed to initialize backend");

  if let Err(close_error) = backend.close().await {
    error!(
      backend = %name,
      error = %close_error,
      "failed to close backend after initialization failure"
    );
  }

  Err(RunnerError::InitializationFailed {
    backend: name,
    source: Box::new(cause),
  })
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
  if let Some(s) = panic.downcast_ref::<&str>() {
    s.to_string()
  } else if let Some(s) = panic.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic".to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use std::sync::atomic::{AtomicUsize, Ordering};

  use async_trait::async_trait;
  use ferry_workflow::WorkflowInstance;

  use crate::backend::ExecutionBackend;
  use crate::spec::RunSpec;
  use crate::state::{ExecutionStatus, RunState};

  #[derive(Clone, Copy)]
  enum InitOutcome {
    Ok,
    Fail,
    Panic,
  }

  struct ProbeBackend {
    init: InitOutcome,
    fail_close: bool,
    closes: Arc<AtomicUsize>,
  }

  impl ProbeBackend {
    fn new(init: InitOutcome, fail_close: bool) -> (Self, Arc<AtomicUsize>) {
      let closes = Arc::new(AtomicUsize::new(0));
      let backend = Self {
        init,
        fail_close,
        closes: closes.clone(),
      };
      (backend, closes)
    }
  }

  #[async_trait]
  impl ExecutionBackend for ProbeBackend {
    async fn start(&self, _: &WorkflowInstance, _: RunSpec) -> Result<(), RunnerError> {
      Ok(())
    }

    async fn poll(&self, _: &RunState) -> Result<ExecutionStatus, RunnerError> {
      Ok(ExecutionStatus::NotFound)
    }

    async fn cleanup(&self) -> Result<(), RunnerError> {
      Ok(())
    }

    async fn cleanup_execution(&self, _: &WorkflowInstance, _: &str) -> Result<(), RunnerError> {
      Ok(())
    }

    async fn close(&self) -> Result<(), RunnerError> {
      self.closes.fetch_add(1, Ordering::SeqCst);
      if self.fail_close {
        Err(RunnerError::backend("close", "socket already gone"))
      } else {
        Ok(())
      }
    }
  }

  #[async_trait]
  impl ManagedBackend for ProbeBackend {
    fn name(&self) -> &str {
      "probe"
    }

    async fn init(&self) -> Result<(), RunnerError> {
      match self.init {
        InitOutcome::Ok => Ok(()),
        InitOutcome::Fail => Err(RunnerError::unavailable("probe", "connection refused")),
        InitOutcome::Panic => panic!("watcher thread died"),
      }
    }
  }

  #[tokio::test]
  async fn test_successful_init_returns_backend() {
    let (probe, closes) = ProbeBackend::new(InitOutcome::Ok, false);
    let backend = bootstrap(probe).await.unwrap();

    assert_eq!(backend.name(), "probe");
    assert_eq!(closes.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_failed_init_closes_backend() {
    let (probe, closes) = ProbeBackend::new(InitOutcome::Fail, false);
    let err = bootstrap(probe).await.err().unwrap();

    match err {
      RunnerError::InitializationFailed { backend, source } => {
        assert_eq!(backend, "probe");
        assert!(source.is_retryable());
      }
      other => panic!("expected InitializationFailed, got {:?}", other),
    }
    assert_eq!(closes.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_close_failure_does_not_mask_init_failure() {
    let (probe, closes) = ProbeBackend::new(InitOutcome::Fail, true);
    let err = bootstrap(probe).await.err().unwrap();

    assert!(err.to_string().contains("connection refused"));
    assert!(!err.to_string().contains("socket already gone"));
    assert_eq!(closes.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_panicking_init_closes_backend() {
    let (probe, closes) = ProbeBackend::new(InitOutcome::Panic, false);
    let err = bootstrap(probe).await.err().unwrap();

    assert!(matches!(err, RunnerError::InitializationFailed { .. }));
    assert!(err.to_string().contains("watcher thread died"));
    assert_eq!(closes.load(Ordering::SeqCst), 1);
  }
}
