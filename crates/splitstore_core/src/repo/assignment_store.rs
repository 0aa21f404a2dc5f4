//! Assignment counters (`bucket_assignment_counts`).
//!
//! The counters belong to the assignment subsystem; this layer reads them to
//! build per-bucket rollups. An empty `bucket_label` column is the null bucket.

use crate::db::Store;
use crate::model::{BucketLabel, Context, ExperimentId};
use crate::repo::error::{RepoError, RepoResult};
use rusqlite::params;

const NULL_BUCKET_KEY: &str = "";

pub trait AssignmentCountStore: Send + Sync {
    /// Every counter of one `(experiment, context)` partition.
    fn counts(
        &self,
        experiment_id: ExperimentId,
        context: &Context,
    ) -> RepoResult<Vec<(Option<BucketLabel>, u64)>>;
    /// Adds `delta` to one counter, creating it at zero first.
    fn increment(
        &self,
        experiment_id: ExperimentId,
        context: &Context,
        bucket: Option<&BucketLabel>,
        delta: u64,
    ) -> RepoResult<()>;
}

pub struct SqliteAssignmentCountStore {
    store: Store,
}

impl SqliteAssignmentCountStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

impl AssignmentCountStore for SqliteAssignmentCountStore {
    fn counts(
        &self,
        experiment_id: ExperimentId,
        context: &Context,
    ) -> RepoResult<Vec<(Option<BucketLabel>, u64)>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT bucket_label, assignment_count
                 FROM bucket_assignment_counts
                 WHERE experiment_id = ?1 AND context = ?2;",
            )?;
            let mut rows = stmt.query(params![experiment_id.to_string(), context.as_str()])?;
            let mut counts = Vec::new();
            while let Some(row) = rows.next()? {
                let label: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                let count = u64::try_from(count).map_err(|_| {
                    RepoError::InvalidData(format!(
                        "negative count `{count}` in bucket_assignment_counts.assignment_count"
                    ))
                })?;
                let bucket = (label != NULL_BUCKET_KEY).then(|| BucketLabel::new(label));
                counts.push((bucket, count));
            }
            Ok(counts)
        })
    }

    fn increment(
        &self,
        experiment_id: ExperimentId,
        context: &Context,
        bucket: Option<&BucketLabel>,
        delta: u64,
    ) -> RepoResult<()> {
        let delta = i64::try_from(delta)
            .map_err(|_| RepoError::InvalidArgument(format!("count delta {delta} is too large")))?;
        self.store.with_conn(|conn| {
            conn.execute(
                "INSERT INTO bucket_assignment_counts (
                    experiment_id, context, bucket_label, assignment_count
                ) VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT (experiment_id, context, bucket_label) DO UPDATE SET
                    assignment_count = assignment_count + excluded.assignment_count;",
                params![
                    experiment_id.to_string(),
                    context.as_str(),
                    bucket.map_or(NULL_BUCKET_KEY, BucketLabel::as_str),
                    delta,
                ],
            )?;
            Ok(())
        })
    }
}
