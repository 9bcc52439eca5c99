//! Ferry Runner
//!
//! This crate defines the contract between the orchestrator and the clusters
//! that run its containers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      RoutingBackend                         │
//! │  - resolves the active backend id on every call             │
//! │  - constructs backends lazily, once per id                  │
//! │  - closes every backend it ever constructed                 │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  ExecutionBackend (trait)                   │
//! │  - start(instance, run_spec)                                │
//! │  - poll(run_state) → ExecutionStatus                        │
//! │  - cleanup() / cleanup_execution(instance, execution_id)    │
//! │  - close()                                                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Concrete backends that need an initialization step implement
//! [`ManagedBackend`] and are brought up through [`bootstrap`], which closes
//! the backend again if initialization fails.

mod backend;
mod bootstrap;
mod error;
mod routing;
mod spec;
mod state;

pub use backend::{ExecutionBackend, ManagedBackend, SharedBackend};
pub use bootstrap::bootstrap;
pub use error::{BoxError, CloseFailure, RunnerError};
pub use routing::{BackendFactory, BackendState, RoutingBackend};
pub use spec::{RunSpec, RunSpecBuilder, Secret, Trigger};
pub use state::{ExecutionStatus, RunPhase, RunState};
