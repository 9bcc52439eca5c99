//! Ferry Config
//!
//! This crate contains the serializable configuration types for ferry.
//!
//! Configuration is loaded from a JSON file (via CLI with `--config=ferry.json`)
//! and declares:
//! - the backends the process may route to, keyed by identifier
//! - which backend is currently active
//! - the whitelist of service accounts executions may bind
//!
//! The active backend is held in an [`ActiveBackend`] so it can be switched at
//! runtime without rebuilding the router that reads it.

mod active;
mod backend;
mod config;
mod error;

pub use active::ActiveBackend;
pub use backend::{BackendConfig, BackendKind};
pub use config::FerryConfig;
pub use error::ConfigError;
