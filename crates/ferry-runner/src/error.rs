//! Runner error types.

use std::error::Error as StdError;

use thiserror::Error;

/// A boxed error from a cluster or store operation, propagated opaquely.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Errors surfaced by execution backends.
#[derive(Debug, Error)]
pub enum RunnerError {
  /// The run spec violates an invariant. Caller error, not retryable.
  #[error("invalid run spec: {0}")]
  InvalidRunSpec(String),

  /// An execution with this id already exists. Callers treat this as success.
  #[error("execution '{execution_id}' is already running for {instance}")]
  AlreadyRunning {
    instance: String,
    execution_id: String,
  },

  /// The backend cannot accept work right now. Retryable with backoff.
  #[error("backend '{backend}' unavailable: {message}")]
  BackendUnavailable { backend: String, message: String },

  /// The requested service account is outside the configured whitelist.
  #[error("service account '{0}' is not allowed")]
  ServiceAccountNotAllowed(String),

  /// A declared secret cannot be bound to an execution.
  #[error("secret '{name}' cannot be bound: {reason}")]
  InvalidSecret { name: String, reason: String },

  /// The backend failed to initialize and has been closed.
  #[error("failed to initialize backend '{backend}': {source}")]
  InitializationFailed {
    backend: String,
    #[source]
    source: Box<RunnerError>,
  },

  /// The backend has been closed.
  #[error("backend '{0}' is closed")]
  Closed(String),

  /// One or more backends failed to close.
  #[error("failed to close backends: {}", describe_close_failures(.0))]
  CloseFailed(Vec<CloseFailure>),

  /// A cluster-level failure, wrapped with the instance or execution it affected.
  #[error("{context}: {source}")]
  Backend {
    context: String,
    #[source]
    source: BoxError,
  },
}

/// A single backend that failed to close.
#[derive(Debug)]
pub struct CloseFailure {
  pub backend: String,
  pub error: RunnerError,
}

fn describe_close_failures(failures: &[CloseFailure]) -> String {
  failures
    .iter()
    .map(|f| format!("{} ({})", f.backend, f.error))
    .collect::<Vec<_>>()
    .join(", ")
}

impl RunnerError {
  pub fn invalid_run_spec(message: impl Into<String>) -> Self {
    Self::InvalidRunSpec(message.into())
  }

  pub fn unavailable(backend: impl Into<String>, message: impl Into<String>) -> Self {
    Self::BackendUnavailable {
      backend: backend.into(),
      message: message.into(),
    }
  }

  pub fn backend(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
    Self::Backend {
      context: context.into(),
      source: source.into(),
    }
  }

  /// Returns true if the caller may retry the operation later.
  pub fn is_retryable(&self) -> bool {
    matches!(self, Self::BackendUnavailable { .. })
  }

  /// Returns true if the error means the execution already exists.
  pub fn is_already_running(&self) -> bool {
    matches!(self, Self::AlreadyRunning { .. })
  }
}
