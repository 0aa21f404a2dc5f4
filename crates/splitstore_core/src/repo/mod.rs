//! Repository layer: per-table stores and the façade composed from them.
//!
//! # Responsibility
//! - Define one data-access contract per table group.
//! - Isolate SQLite query details behind those contracts.
//! - Combine them into the experiment/bucket/audit façade.
//!
//! # Invariants
//! - Stores perform no key validation; the façade does it before any I/O.
//! - Every store error surfaces as [`RepoError`], never as a raw driver error.

pub mod assignment_store;
pub mod audit_store;
pub mod bucket_store;
mod codec;
pub mod error;
pub mod experiment_store;
pub mod facade;
pub mod index_store;

pub use assignment_store::{AssignmentCountStore, SqliteAssignmentCountStore};
pub use audit_store::{
    ApplicationAuditLogStore, BucketAuditLogStore, ExperimentAuditLogStore,
    SqliteApplicationAuditLogStore, SqliteBucketAuditLogStore, SqliteExperimentAuditLogStore,
};
pub use bucket_store::{BucketStore, SqliteBucketStore};
pub use error::{RepoError, RepoErrorKind, RepoResult};
pub use experiment_store::{ExperimentStore, SqliteExperimentStore};
pub use facade::{
    AuditLogRepository, BucketRepository, ExperimentRepository, IndexedExperimentRepository,
    RepositoryDependencies,
};
pub use index_store::{
    ApplicationListStore, ExperimentLabelIndexStore, ExperimentStateIndexStore,
    SqliteApplicationListStore, SqliteExperimentLabelIndexStore, SqliteExperimentStateIndexStore,
};
