//! Core persistence and indexing layer for experiments and buckets.
//! This crate owns the storage invariants: label uniqueness, index
//! consistency and single-partition batch atomicity.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{ConfigError, DatabaseLocation, StoreConfig};
pub use db::{DbError, Store};
pub use logging::{default_log_level, flush_logging, init_logging, logging_status, LoggingError};
pub use model::{
    ApplicationName, AssignmentCounts, AuditAction, AuditEntry, AuditInfo, AuditLogEntry, Bucket,
    BucketAssignmentCount, BucketLabel, BucketList, BucketState, Context, Experiment,
    ExperimentId, ExperimentLabel, ExperimentList, ExperimentState, ExperimentTable,
    ModelValidationError, NewExperiment, TotalUsers, GLOBAL_ENTRY_APPLICATION,
};
pub use repo::{
    AuditLogRepository, BucketRepository, ExperimentRepository, IndexedExperimentRepository,
    RepoError, RepoErrorKind, RepoResult, RepositoryDependencies,
};
pub use service::AuditLogService;

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
