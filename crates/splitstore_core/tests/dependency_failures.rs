use chrono::{DateTime, Utc};
use splitstore_core::db::{DbError, Store};
use splitstore_core::repo::{BucketStore, ExperimentStore, SqliteExperimentStore};
use splitstore_core::{
    ApplicationName, AuditLogRepository, Bucket, BucketLabel, BucketList, BucketRepository,
    BucketState, Context, Experiment, ExperimentId, ExperimentLabel, ExperimentRepository,
    ExperimentState, IndexedExperimentRepository, NewExperiment, RepoError, RepoErrorKind,
    RepoResult, RepositoryDependencies,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Experiment store that records every call and stores nothing.
#[derive(Default)]
struct CountingExperimentStore {
    calls: AtomicUsize,
}

impl CountingExperimentStore {
    fn touch(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ExperimentStore for CountingExperimentStore {
    fn insert_if_absent(&self, _experiment: &Experiment) -> RepoResult<bool> {
        self.touch();
        Ok(true)
    }

    fn update(&self, _experiment: &Experiment) -> RepoResult<bool> {
        self.touch();
        Ok(false)
    }

    fn update_state(
        &self,
        _id: ExperimentId,
        _expected: ExperimentState,
        _state: ExperimentState,
        _modified_at: DateTime<Utc>,
    ) -> RepoResult<bool> {
        self.touch();
        Ok(false)
    }

    fn get(&self, _id: ExperimentId) -> RepoResult<Option<Experiment>> {
        self.touch();
        Ok(None)
    }

    fn get_many(&self, _ids: &[ExperimentId]) -> RepoResult<Vec<Experiment>> {
        self.touch();
        Ok(Vec::new())
    }
}

/// SQLite experiment store where another writer terminates the experiment
/// right after every read.
struct RacingTerminationStore {
    inner: SqliteExperimentStore,
    store: Store,
}

impl ExperimentStore for RacingTerminationStore {
    fn insert_if_absent(&self, experiment: &Experiment) -> RepoResult<bool> {
        self.inner.insert_if_absent(experiment)
    }

    fn update(&self, experiment: &Experiment) -> RepoResult<bool> {
        self.inner.update(experiment)
    }

    fn update_state(
        &self,
        id: ExperimentId,
        expected: ExperimentState,
        state: ExperimentState,
        modified_at: DateTime<Utc>,
    ) -> RepoResult<bool> {
        self.inner.update_state(id, expected, state, modified_at)
    }

    fn get(&self, id: ExperimentId) -> RepoResult<Option<Experiment>> {
        let found = self.inner.get(id)?;
        self.store.with_conn(|conn| {
            conn.execute(
                "UPDATE experiment SET state = 'TERMINATED' WHERE experiment_id = ?1;",
                [id.to_string()],
            )
            .map_err(DbError::from)
        })?;
        Ok(found)
    }

    fn get_many(&self, ids: &[ExperimentId]) -> RepoResult<Vec<Experiment>> {
        self.inner.get_many(ids)
    }
}

/// Bucket store whose every call fails like a lost connection.
struct FailingBucketStore;

fn offline<T>() -> RepoResult<T> {
    Err(RepoError::Db(DbError::LockPoisoned))
}

impl BucketStore for FailingBucketStore {
    fn write_batch(&self, _experiment_id: ExperimentId, _buckets: &[Bucket]) -> RepoResult<()> {
        offline()
    }

    fn update(&self, _bucket: &Bucket) -> RepoResult<bool> {
        offline()
    }

    fn update_allocation(
        &self,
        _experiment_id: ExperimentId,
        _label: &BucketLabel,
        _allocation_percent: f64,
    ) -> RepoResult<bool> {
        offline()
    }

    fn update_state(
        &self,
        _experiment_id: ExperimentId,
        _label: &BucketLabel,
        _state: BucketState,
    ) -> RepoResult<bool> {
        offline()
    }

    fn delete(&self, _experiment_id: ExperimentId, _label: &BucketLabel) -> RepoResult<()> {
        offline()
    }

    fn get(&self, _experiment_id: ExperimentId, _label: &BucketLabel) -> RepoResult<Option<Bucket>> {
        offline()
    }

    fn list(&self, _experiment_id: ExperimentId) -> RepoResult<Vec<Bucket>> {
        offline()
    }

    fn list_many(&self, _experiment_ids: &[ExperimentId]) -> RepoResult<Vec<Bucket>> {
        offline()
    }
}

#[test]
fn absent_keys_are_rejected_without_store_calls() {
    let store = Store::open_in_memory().unwrap();
    let counter = Arc::new(CountingExperimentStore::default());
    let repo = IndexedExperimentRepository::new(RepositoryDependencies {
        experiments: Some(counter.clone()),
        ..RepositoryDependencies::sqlite(&store)
    });

    let blank_app = ApplicationName::new("");
    let blank_label = ExperimentLabel::new("");
    let mut unlabeled = NewExperiment::new("shop", "checkout_button");
    unlabeled.label = None;
    let mut unidentified = NewExperiment::new("shop", "checkout_button");
    unidentified.id = None;
    let nil_experiment = Experiment {
        id: ExperimentId::nil(),
        ..NewExperiment::new("shop", "checkout_button")
            .to_experiment(Utc::now())
            .unwrap()
    };

    let results = [
        repo.get_experiment(ExperimentId::nil()).map(|_| ()),
        repo.get_experiment_by_label(&blank_app, &ExperimentLabel::new("x"))
            .map(|_| ()),
        repo.get_experiment_by_label(&ApplicationName::new("shop"), &blank_label)
            .map(|_| ()),
        repo.get_experiment_list(&blank_app).map(|_| ()),
        repo.get_experiments_by_ids(&[ExperimentId::nil()]).map(|_| ()),
        repo.create_experiment(&unlabeled).map(|_| ()),
        repo.create_experiment(&unidentified).map(|_| ()),
        repo.update_experiment(&nil_experiment).map(|_| ()),
        repo.update_experiment_state(&nil_experiment, ExperimentState::Running)
            .map(|_| ()),
        repo.reindex_experiment(ExperimentId::nil()).map(|_| ()),
    ];
    for result in results {
        assert_eq!(result.unwrap_err().kind(), RepoErrorKind::InvalidArgument);
    }
    assert_eq!(counter.calls(), 0);

    repo.get_experiment(ExperimentId::new()).unwrap();
    assert_eq!(counter.calls(), 1);
}

#[test]
fn missing_state_index_fails_before_any_index_write() {
    let store = Store::open_in_memory().unwrap();
    let repo = IndexedExperimentRepository::new(RepositoryDependencies {
        state_index: None,
        ..RepositoryDependencies::sqlite(&store)
    });
    let draft = NewExperiment::new("shop", "checkout_button");
    let id = repo.create_experiment(&draft).unwrap();

    let err = repo.create_indices_for_new_experiment(&draft).unwrap_err();
    assert_eq!(err.kind(), RepoErrorKind::RepositoryUnavailable);
    assert_eq!(
        repo.get_experiments().unwrap_err().kind(),
        RepoErrorKind::RepositoryUnavailable
    );
    assert!(repo
        .get_experiment_by_label(&ApplicationName::new("shop"), &ExperimentLabel::new("checkout_button"))
        .unwrap()
        .is_none());

    // A fully wired repository over the same store repairs the half-written experiment.
    let full = IndexedExperimentRepository::sqlite(&store);
    full.reindex_experiment(id).unwrap();
    assert_eq!(full.get_experiments().unwrap(), vec![id]);
    assert_eq!(
        full.get_experiment_list(&ApplicationName::new("shop"))
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn state_change_racing_a_termination_does_not_leave_terminated() {
    let store = Store::open_in_memory().unwrap();
    let full = IndexedExperimentRepository::sqlite(&store);
    let draft = NewExperiment::new("shop", "checkout_button");
    let id = full.create_experiment(&draft).unwrap();
    full.create_indices_for_new_experiment(&draft).unwrap();
    let running = full
        .update_experiment_state(&full.get_experiment(id).unwrap().unwrap(), ExperimentState::Running)
        .unwrap();

    let racing = IndexedExperimentRepository::new(RepositoryDependencies {
        experiments: Some(Arc::new(RacingTerminationStore {
            inner: SqliteExperimentStore::new(store.clone()),
            store: store.clone(),
        })),
        ..RepositoryDependencies::sqlite(&store)
    });
    let err = racing
        .update_experiment_state(&running, ExperimentState::Paused)
        .unwrap_err();
    assert_eq!(err.kind(), RepoErrorKind::ConstraintViolation);

    let stored = full.get_experiment(id).unwrap().unwrap();
    assert_eq!(stored.state, ExperimentState::Terminated);
    assert!(full
        .get_experiment_list(&ApplicationName::new("shop"))
        .unwrap()
        .is_empty());
}

#[test]
fn unconfigured_stores_report_unavailable() {
    let repo = IndexedExperimentRepository::new(RepositoryDependencies::default());
    let id = ExperimentId::new();
    let label = BucketLabel::new("red");
    let bucket = Bucket::new(id, "red", 0.5);

    let results = [
        repo.create_experiment(&NewExperiment::new("shop", "a")).map(|_| ()),
        repo.get_experiment(id).map(|_| ()),
        repo.get_experiments().map(|_| ()),
        repo.get_applications_list().map(|_| ()),
        repo.create_application(&ApplicationName::new("shop")),
        repo.update_bucket_batch(id, &BucketList::from(vec![bucket.clone()])),
        repo.get_bucket_list(id).map(|_| ()),
        repo.get_bucket_lists(&[id]).map(|_| ()),
        repo.update_bucket(&bucket).map(|_| ()),
        repo.get_assignment_counts(id, &Context::production())
            .map(|_| ()),
        repo.log_experiment_changes(id, &[splitstore_core::AuditInfo::new("x", None, None)]),
        repo.get_bucket_audit_log(id, &label).map(|_| ()),
    ];
    for result in results {
        assert_eq!(
            result.unwrap_err().kind(),
            RepoErrorKind::RepositoryUnavailable
        );
    }
}

#[test]
fn store_failures_propagate_untranslated() {
    let store = Store::open_in_memory().unwrap();
    let repo = IndexedExperimentRepository::new(RepositoryDependencies {
        buckets: Some(Arc::new(FailingBucketStore)),
        ..RepositoryDependencies::sqlite(&store)
    });
    let id = ExperimentId::new();
    let bucket = Bucket::new(id, "red", 0.5);

    let err = repo
        .update_bucket_batch(id, &BucketList::from(vec![bucket.clone()]))
        .unwrap_err();
    assert!(matches!(err, RepoError::Db(DbError::LockPoisoned)));
    assert_eq!(
        repo.get_bucket_lists(&[id]).unwrap_err().kind(),
        RepoErrorKind::RepositoryUnavailable
    );
    assert_eq!(
        repo.update_bucket_state(&bucket, BucketState::Closed)
            .unwrap_err()
            .kind(),
        RepoErrorKind::RepositoryUnavailable
    );
}

#[test]
fn repository_is_shareable_across_threads() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<IndexedExperimentRepository>();
    assert_send_sync::<Arc<dyn ExperimentRepository>>();
}
