use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowIdError {
  #[error("invalid workflow identity: {field} must not be empty")]
  InvalidIdentity { field: &'static str },

  #[error("malformed workflow key '{0}': key must contain a '#' at a position > 0")]
  MalformedKey(String),
}
