//! Bucket rows (`bucket` table, partitioned by experiment id).
//!
//! # Invariants
//! - A batch only ever touches one experiment partition and commits as one unit.
//! - Narrow updates change exactly one column.
//! - Listings are sorted by label.

use crate::db::Store;
use crate::model::{Bucket, BucketLabel, BucketState, ExperimentId};
use crate::repo::codec::{bool_to_int, parse_bool, parse_experiment_id, placeholders, MAX_IN_LIST};
use crate::repo::error::{RepoError, RepoResult};
use rusqlite::{params, params_from_iter, Connection, Row};
use std::collections::BTreeSet;

const BUCKET_SELECT_SQL: &str = "SELECT
    experiment_id,
    label,
    allocation_percent,
    is_control,
    description,
    payload,
    state
FROM bucket";

/// Access to the bucket table.
pub trait BucketStore: Send + Sync {
    /// Upserts every bucket under `experiment_id` in one atomic batch.
    fn write_batch(&self, experiment_id: ExperimentId, buckets: &[Bucket]) -> RepoResult<()>;
    /// Overwrites all mutable attributes. Returns whether the row existed.
    fn update(&self, bucket: &Bucket) -> RepoResult<bool>;
    fn update_allocation(
        &self,
        experiment_id: ExperimentId,
        label: &BucketLabel,
        allocation_percent: f64,
    ) -> RepoResult<bool>;
    fn update_state(
        &self,
        experiment_id: ExperimentId,
        label: &BucketLabel,
        state: BucketState,
    ) -> RepoResult<bool>;
    /// Removes one row; missing rows are not an error.
    fn delete(&self, experiment_id: ExperimentId, label: &BucketLabel) -> RepoResult<()>;
    fn get(&self, experiment_id: ExperimentId, label: &BucketLabel) -> RepoResult<Option<Bucket>>;
    fn list(&self, experiment_id: ExperimentId) -> RepoResult<Vec<Bucket>>;
    /// Buckets of several experiments, grouped by experiment then label.
    fn list_many(&self, experiment_ids: &[ExperimentId]) -> RepoResult<Vec<Bucket>>;
}

/// SQLite-backed bucket table.
pub struct SqliteBucketStore {
    store: Store,
}

impl SqliteBucketStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

impl BucketStore for SqliteBucketStore {
    fn write_batch(&self, experiment_id: ExperimentId, buckets: &[Bucket]) -> RepoResult<()> {
        let partition = experiment_id.to_string();
        self.store.with_batch(|tx| {
            for bucket in buckets {
                tx.execute(
                    "INSERT INTO bucket (
                        experiment_id,
                        label,
                        allocation_percent,
                        is_control,
                        description,
                        payload,
                        state
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    ON CONFLICT (experiment_id, label) DO UPDATE SET
                        allocation_percent = excluded.allocation_percent,
                        is_control = excluded.is_control,
                        description = excluded.description,
                        payload = excluded.payload,
                        state = excluded.state;",
                    params![
                        partition.as_str(),
                        bucket.label.as_str(),
                        bucket.allocation_percent,
                        bool_to_int(bucket.is_control),
                        bucket.description.as_deref(),
                        bucket.payload.as_deref(),
                        bucket.state.as_str(),
                    ],
                )?;
            }
            Ok(())
        })
    }

    fn update(&self, bucket: &Bucket) -> RepoResult<bool> {
        self.store.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE bucket
                 SET
                    allocation_percent = ?3,
                    is_control = ?4,
                    description = ?5,
                    payload = ?6,
                    state = ?7
                 WHERE experiment_id = ?1 AND label = ?2;",
                params![
                    bucket.experiment_id.to_string(),
                    bucket.label.as_str(),
                    bucket.allocation_percent,
                    bool_to_int(bucket.is_control),
                    bucket.description.as_deref(),
                    bucket.payload.as_deref(),
                    bucket.state.as_str(),
                ],
            )?;
            Ok(changed == 1)
        })
    }

    fn update_allocation(
        &self,
        experiment_id: ExperimentId,
        label: &BucketLabel,
        allocation_percent: f64,
    ) -> RepoResult<bool> {
        self.store.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE bucket SET allocation_percent = ?3
                 WHERE experiment_id = ?1 AND label = ?2;",
                params![experiment_id.to_string(), label.as_str(), allocation_percent],
            )?;
            Ok(changed == 1)
        })
    }

    fn update_state(
        &self,
        experiment_id: ExperimentId,
        label: &BucketLabel,
        state: BucketState,
    ) -> RepoResult<bool> {
        self.store.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE bucket SET state = ?3
                 WHERE experiment_id = ?1 AND label = ?2;",
                params![experiment_id.to_string(), label.as_str(), state.as_str()],
            )?;
            Ok(changed == 1)
        })
    }

    fn delete(&self, experiment_id: ExperimentId, label: &BucketLabel) -> RepoResult<()> {
        self.store.with_conn(|conn| {
            conn.execute(
                "DELETE FROM bucket WHERE experiment_id = ?1 AND label = ?2;",
                params![experiment_id.to_string(), label.as_str()],
            )?;
            Ok(())
        })
    }

    fn get(&self, experiment_id: ExperimentId, label: &BucketLabel) -> RepoResult<Option<Bucket>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{BUCKET_SELECT_SQL} WHERE experiment_id = ?1 AND label = ?2;"
            ))?;
            let mut rows = stmt.query(params![experiment_id.to_string(), label.as_str()])?;
            if let Some(row) = rows.next()? {
                return Ok(Some(parse_bucket_row(row)?));
            }
            Ok(None)
        })
    }

    fn list(&self, experiment_id: ExperimentId) -> RepoResult<Vec<Bucket>> {
        self.store.with_conn(|conn| {
            query_buckets(
                conn,
                &format!("{BUCKET_SELECT_SQL} WHERE experiment_id = ?1 ORDER BY label ASC;"),
                vec![experiment_id.to_string()],
            )
        })
    }

    fn list_many(&self, experiment_ids: &[ExperimentId]) -> RepoResult<Vec<Bucket>> {
        // Sorted and unique, so chunk order matches the per-chunk ORDER BY.
        let unique: Vec<ExperimentId> = experiment_ids
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if unique.is_empty() {
            return Ok(Vec::new());
        }
        self.store.with_conn(|conn| {
            let mut buckets = Vec::new();
            for chunk in unique.chunks(MAX_IN_LIST) {
                buckets.extend(query_buckets(
                    conn,
                    &format!(
                        "{BUCKET_SELECT_SQL} WHERE experiment_id IN ({}) ORDER BY experiment_id ASC, label ASC;",
                        placeholders(chunk.len())
                    ),
                    chunk.iter().map(ToString::to_string).collect(),
                )?);
            }
            Ok(buckets)
        })
    }
}

fn query_buckets(conn: &Connection, sql: &str, keys: Vec<String>) -> RepoResult<Vec<Bucket>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params_from_iter(keys))?;
    let mut buckets = Vec::new();
    while let Some(row) = rows.next()? {
        buckets.push(parse_bucket_row(row)?);
    }
    Ok(buckets)
}

fn parse_bucket_row(row: &Row<'_>) -> RepoResult<Bucket> {
    let id_text: String = row.get("experiment_id")?;
    let state_text: String = row.get("state")?;
    let state = BucketState::parse(&state_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid bucket state `{state_text}` in bucket.state"))
    })?;

    Ok(Bucket {
        experiment_id: parse_experiment_id(&id_text, "bucket.experiment_id")?,
        label: BucketLabel::new(row.get::<_, String>("label")?),
        allocation_percent: row.get("allocation_percent")?,
        is_control: parse_bool(row.get("is_control")?, "bucket.is_control")?,
        description: row.get("description")?,
        payload: row.get("payload")?,
        state,
    })
}
