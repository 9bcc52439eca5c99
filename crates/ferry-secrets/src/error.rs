use ferry_runner::RunnerError;
use thiserror::Error;

use crate::manager::MANAGED_PREFIX;

/// Errors returned by a [`SecretStore`](crate::SecretStore) or a
/// [`ServiceAccountKeyManager`](crate::ServiceAccountKeyManager).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
  #[error("'{0}' already exists")]
  AlreadyExists(String),

  #[error("'{0}' not found")]
  NotFound(String),

  #[error("store unavailable: {0}")]
  Unavailable(String),

  #[error("{0}")]
  Other(String),
}

/// Errors from the secret lifecycle manager.
#[derive(Debug, Error)]
pub enum SecretError {
  #[error("service account '{0}' is not allowed")]
  ServiceAccountNotAllowed(String),

  #[error("secret '{0}' does not exist")]
  MissingSecret(String),

  #[error("secret '{0}' uses the reserved managed-secret prefix")]
  ReservedName(String),

  #[error("secret store unavailable: {0}")]
  Unavailable(String),

  #[error("failed to {operation} secret '{name}': {source}")]
  Store {
    operation: &'static str,
    name: String,
    #[source]
    source: StoreError,
  },

  #[error("failed to {operation} key for service account '{service_account}': {source}")]
  Key {
    operation: &'static str,
    service_account: String,
    #[source]
    source: StoreError,
  },
}

impl SecretError {
  pub(crate) fn store(operation: &'static str, name: impl Into<String>, source: StoreError) -> Self {
    match source {
      StoreError::Unavailable(message) => Self::Unavailable(message),
      source => Self::Store {
        operation,
        name: name.into(),
        source,
      },
    }
  }

  pub(crate) fn key(
    operation: &'static str,
    service_account: impl Into<String>,
    source: StoreError,
  ) -> Self {
    match source {
      StoreError::Unavailable(message) => Self::Unavailable(message),
      source => Self::Key {
        operation,
        service_account: service_account.into(),
        source,
      },
    }
  }

  /// Convert into the runner error surfaced by the backend named `backend`.
  pub fn into_runner_error(self, backend: &str) -> RunnerError {
    match self {
      SecretError::ServiceAccountNotAllowed(account) => {
        RunnerError::ServiceAccountNotAllowed(account)
      }
      SecretError::Unavailable(message) => RunnerError::unavailable(backend, message),
      SecretError::MissingSecret(name) => RunnerError::InvalidSecret {
        name,
        reason: "secret does not exist".to_string(),
      },
      SecretError::ReservedName(name) => RunnerError::InvalidSecret {
        name,
        reason: format!("names starting with '{}' are reserved", MANAGED_PREFIX),
      },
      other => RunnerError::backend(format!("backend '{}'", backend), other),
    }
  }
}
