//! Ferry Secrets
//!
//! Lifecycle of the secrets an execution needs on its backend.
//!
//! Executions that run as a service account get that account's key mounted
//! from a managed secret. The [`SecretLifecycleManager`] creates one managed
//! secret per account, counts the executions referencing it, and deletes it
//! only during an explicit [`sweep`](SecretLifecycleManager::sweep) once
//! nothing references or mounts it. User-declared secrets are validated but
//! never created or deleted.
//!
//! The cluster's secret store and key issuance sit behind the [`SecretStore`]
//! and [`ServiceAccountKeyManager`] traits; in-memory implementations are
//! provided for clusterless backends and tests.

mod error;
mod keys;
mod manager;
mod store;

pub use error::{SecretError, StoreError};
pub use keys::{InMemoryKeyManager, ServiceAccountKey, ServiceAccountKeyManager};
pub use manager::{
  KEY_FILE, LABEL_KEY_ID, LABEL_MANAGED, LABEL_SERVICE_ACCOUNT, MANAGED_PREFIX, SecretHandle,
  SecretLifecycleManager, SweepReport, managed_secret_name,
};
pub use store::{Hold, InMemorySecretStore, SecretStore, StoreOp, StoredSecret};
