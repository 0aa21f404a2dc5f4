//! Repository façade over the primary, index, audit and counter stores.
//!
//! # Responsibility
//! - Expose the experiment, bucket and audit operation set to callers.
//! - Keep index tables in step with authoritative rows.
//!
//! # Invariants
//! - Absent keys are rejected with `InvalidArgument` before any store call.
//! - An operation needing an unconfigured store fails with `Unavailable` before
//!   writing anything.
//! - Same-partition writes go out as one batch. Cross-partition writes follow
//!   a two-phase order: authoritative row first, index rows second. A failure
//!   between phases leaves the experiment stored but not (or stale-) indexed;
//!   `reindex_experiment` repairs it. Readers may observe that window.

mod audit;
mod buckets;
mod experiments;

pub use audit::AuditLogRepository;
pub use buckets::BucketRepository;
pub use experiments::ExperimentRepository;

use crate::db::Store;
use crate::repo::assignment_store::{AssignmentCountStore, SqliteAssignmentCountStore};
use crate::repo::audit_store::{
    BucketAuditLogStore, ExperimentAuditLogStore, SqliteBucketAuditLogStore,
    SqliteExperimentAuditLogStore,
};
use crate::repo::bucket_store::{BucketStore, SqliteBucketStore};
use crate::repo::error::{RepoError, RepoResult};
use crate::repo::experiment_store::{ExperimentStore, SqliteExperimentStore};
use crate::repo::index_store::{
    ApplicationListStore, ExperimentLabelIndexStore, ExperimentStateIndexStore,
    SqliteApplicationListStore, SqliteExperimentLabelIndexStore, SqliteExperimentStateIndexStore,
};
use log::{info, warn};
use std::sync::Arc;

/// Sub-store handles the façade is composed from.
///
/// A `None` handle is a store that is not configured in this deployment.
#[derive(Clone, Default)]
pub struct RepositoryDependencies {
    pub experiments: Option<Arc<dyn ExperimentStore>>,
    pub buckets: Option<Arc<dyn BucketStore>>,
    pub label_index: Option<Arc<dyn ExperimentLabelIndexStore>>,
    pub state_index: Option<Arc<dyn ExperimentStateIndexStore>>,
    pub applications: Option<Arc<dyn ApplicationListStore>>,
    pub experiment_audit: Option<Arc<dyn ExperimentAuditLogStore>>,
    pub bucket_audit: Option<Arc<dyn BucketAuditLogStore>>,
    pub assignment_counts: Option<Arc<dyn AssignmentCountStore>>,
}

impl RepositoryDependencies {
    /// Every store backed by the same SQLite handle.
    pub fn sqlite(store: &Store) -> Self {
        Self {
            experiments: Some(Arc::new(SqliteExperimentStore::new(store.clone()))),
            buckets: Some(Arc::new(SqliteBucketStore::new(store.clone()))),
            label_index: Some(Arc::new(SqliteExperimentLabelIndexStore::new(store.clone()))),
            state_index: Some(Arc::new(SqliteExperimentStateIndexStore::new(store.clone()))),
            applications: Some(Arc::new(SqliteApplicationListStore::new(store.clone()))),
            experiment_audit: Some(Arc::new(SqliteExperimentAuditLogStore::new(store.clone()))),
            bucket_audit: Some(Arc::new(SqliteBucketAuditLogStore::new(store.clone()))),
            assignment_counts: Some(Arc::new(SqliteAssignmentCountStore::new(store.clone()))),
        }
    }
}

/// One named sub-store handle that may be absent.
struct Dependency<T: ?Sized> {
    name: &'static str,
    handle: Option<Arc<T>>,
}

impl<T: ?Sized> Dependency<T> {
    fn new(name: &'static str, handle: Option<Arc<T>>) -> Self {
        if handle.is_none() {
            warn!("event=repo_compose module=repo status=degraded missing_store={name}");
        }
        Self { name, handle }
    }

    fn get(&self) -> RepoResult<&T> {
        self.handle
            .as_deref()
            .ok_or_else(|| RepoError::Unavailable(format!("{} store is not configured", self.name)))
    }
}

/// Façade implementing [`ExperimentRepository`], [`BucketRepository`] and
/// [`AuditLogRepository`] over injected sub-stores.
///
/// Holds no mutable state; share it across threads behind an `Arc`.
pub struct IndexedExperimentRepository {
    experiments: Dependency<dyn ExperimentStore>,
    buckets: Dependency<dyn BucketStore>,
    label_index: Dependency<dyn ExperimentLabelIndexStore>,
    state_index: Dependency<dyn ExperimentStateIndexStore>,
    applications: Dependency<dyn ApplicationListStore>,
    experiment_audit: Dependency<dyn ExperimentAuditLogStore>,
    bucket_audit: Dependency<dyn BucketAuditLogStore>,
    assignment_counts: Dependency<dyn AssignmentCountStore>,
}

impl IndexedExperimentRepository {
    pub fn new(dependencies: RepositoryDependencies) -> Self {
        let repository = Self {
            experiments: Dependency::new("experiment", dependencies.experiments),
            buckets: Dependency::new("bucket", dependencies.buckets),
            label_index: Dependency::new("experiment label index", dependencies.label_index),
            state_index: Dependency::new("experiment state index", dependencies.state_index),
            applications: Dependency::new("application list", dependencies.applications),
            experiment_audit: Dependency::new(
                "experiment audit log",
                dependencies.experiment_audit,
            ),
            bucket_audit: Dependency::new("bucket audit log", dependencies.bucket_audit),
            assignment_counts: Dependency::new(
                "assignment counts",
                dependencies.assignment_counts,
            ),
        };
        info!("event=repo_compose module=repo status=ok");
        repository
    }

    /// Façade over a fully configured SQLite store.
    pub fn sqlite(store: &Store) -> Self {
        Self::new(RepositoryDependencies::sqlite(store))
    }
}

/// Rejects a missing key before any I/O.
fn require_key(absent: bool, what: &'static str) -> RepoResult<()> {
    if absent {
        Err(RepoError::InvalidArgument(format!("{what} is required")))
    } else {
        Ok(())
    }
}
