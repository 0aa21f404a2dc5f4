//! Domain model for experiments, buckets, audit entries and assignment rollups.
//!
//! # Responsibility
//! - Define the canonical records shared by stores and the repository façade.
//! - Own value-level validation and the experiment state machine.
//!
//! # Invariants
//! - Experiments are never physically removed; lifecycle ends in a terminal state.
//! - Model types carry no storage details.

pub mod assignment;
pub mod audit;
pub mod bucket;
pub mod experiment;
pub mod keys;

use thiserror::Error;

pub use assignment::{AssignmentCounts, BucketAssignmentCount, TotalUsers};
pub use audit::{AuditAction, AuditEntry, AuditInfo, AuditLogEntry, GLOBAL_ENTRY_APPLICATION};
pub use bucket::{Bucket, BucketList, BucketState};
pub use experiment::{Experiment, ExperimentList, ExperimentState, ExperimentTable, NewExperiment};
pub use keys::{ApplicationName, BucketLabel, Context, ExperimentId, ExperimentLabel};

/// Validation failure raised before any write reaches the store.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelValidationError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("invalid {kind}: `{value}`")]
    InvalidName { kind: &'static str, value: String },
    #[error("{field} must be within [0, 1], got {value}")]
    PercentOutOfRange { field: &'static str, value: f64 },
    #[error("end time must not be earlier than start time")]
    EndBeforeStart,
    #[error("illegal experiment state transition {from} -> {to}")]
    IllegalTransition {
        from: ExperimentState,
        to: ExperimentState,
    },
}

pub(crate) fn validate_percent(field: &'static str, value: f64) -> Result<(), ModelValidationError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ModelValidationError::PercentOutOfRange { field, value })
    }
}
