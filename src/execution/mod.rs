// src/execution/mod.rs

//! Run attempts and their audit trail.
//!
//! - [`model`] holds `Execution` and the `ExecutionStatus` state machine.
//! - [`audit`] holds append-only audit entries and artifact digesting.

pub mod audit;
pub mod model;

pub use audit::{AuditEntry, AuditEventKind, CollectedArtifact, digest_file, record_artifacts};
pub use model::{Execution, ExecutionStatus};
