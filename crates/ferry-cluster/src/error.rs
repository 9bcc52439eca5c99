use thiserror::Error;

/// Errors returned by a [`ClusterClient`](crate::ClusterClient).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClusterError {
  #[error("'{0}' not found")]
  NotFound(String),

  #[error("'{0}' already exists")]
  AlreadyExists(String),

  /// The control plane cannot be reached or refuses work for now.
  #[error("cluster unavailable: {0}")]
  Unavailable(String),

  /// The control plane rejected the request as invalid.
  #[error("rejected: {0}")]
  Rejected(String),

  #[error("{0}")]
  Other(String),
}
