//! Ferry Workflow
//!
//! This crate provides the identity types the rest of ferry uses to address
//! workflows and their instances.
//!
//! A [`WorkflowId`] names a workflow by its owning component and its name
//! within that component. Its key encoding (`owner#name`) appears in external
//! storage keys and must never change format.
//!
//! A [`WorkflowInstance`] is one schedulable occurrence of a workflow: the
//! workflow id plus a parameter (partition or trigger marker).

mod error;
mod id;
mod instance;

pub use error::WorkflowIdError;
pub use id::WorkflowId;
pub use instance::WorkflowInstance;
