//! Ferry Cluster
//!
//! Execution backends that run containers on a cluster.
//!
//! [`ClusterBackend`] implements the runner's execution contract on top of a
//! [`ClusterClient`], the narrow interface to a cluster control plane. It
//! binds service-account secrets before scheduling, labels every execution
//! so later sweeps can find what ferry created, and runs a periodic sweeper
//! between `init` and `close`.
//!
//! [`InMemoryCluster`] is a clusterless control plane used for local runs
//! and tests. [`ConfiguredBackendFactory`] builds backends from the
//! identifiers declared in configuration, for use with a routing backend.

mod backend;
mod client;
mod error;
mod execution;
mod factory;
mod memory;

pub use backend::ClusterBackend;
pub use client::{ClusterClient, ExecutionRecord, ExecutionSpec, SecretMount};
pub use error::ClusterError;
pub use execution::{
  CREDENTIALS_ENV, LABEL_COMMIT_SHA, LABEL_EXECUTION_ID, LABEL_MANAGED_BY, LABEL_PARAMETER,
  LABEL_TRIGGER_TYPE, LABEL_WORKFLOW, MANAGED_BY, RESERVED_ENV_PREFIX, SERVICE_ACCOUNT_MOUNT_PATH,
  TERMINATION_LOG_PATH, managed_selector,
};
pub use factory::ConfiguredBackendFactory;
pub use memory::InMemoryCluster;
