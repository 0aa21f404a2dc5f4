//! Authoritative experiment rows (`experiment` table).
//!
//! # Invariants
//! - Rows are keyed by experiment id; inserts never overwrite.
//! - Full updates leave `state`, `label` and `app_name` untouched.
//! - State writes are compare-and-set against the state the caller read.

use crate::db::Store;
use crate::model::{ApplicationName, Experiment, ExperimentId, ExperimentLabel, ExperimentState};
use crate::repo::codec::{parse_experiment_id, parse_millis, placeholders, MAX_IN_LIST};
use crate::repo::error::{RepoError, RepoResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Row};
use std::collections::HashMap;

const EXPERIMENT_SELECT_SQL: &str = "SELECT
    experiment_id,
    app_name,
    label,
    description,
    creator_id,
    start_time,
    end_time,
    sampling_percent,
    state,
    created_at,
    modified_at
FROM experiment";

/// Access to the primary experiment table.
pub trait ExperimentStore: Send + Sync {
    /// Inserts unless a row with the same id exists. Returns whether a row was written.
    fn insert_if_absent(&self, experiment: &Experiment) -> RepoResult<bool>;
    /// Overwrites mutable attributes. Returns whether the row existed.
    fn update(&self, experiment: &Experiment) -> RepoResult<bool>;
    /// Moves the row from `expected` to `state`. Returns false when the row is
    /// missing or no longer in `expected`.
    fn update_state(
        &self,
        id: ExperimentId,
        expected: ExperimentState,
        state: ExperimentState,
        modified_at: DateTime<Utc>,
    ) -> RepoResult<bool>;
    fn get(&self, id: ExperimentId) -> RepoResult<Option<Experiment>>;
    /// Loads the given ids in request order, skipping unknown ones. Repeated
    /// ids yield repeated rows.
    fn get_many(&self, ids: &[ExperimentId]) -> RepoResult<Vec<Experiment>>;
}

/// SQLite-backed experiment table.
pub struct SqliteExperimentStore {
    store: Store,
}

impl SqliteExperimentStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

impl ExperimentStore for SqliteExperimentStore {
    fn insert_if_absent(&self, experiment: &Experiment) -> RepoResult<bool> {
        self.store.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO experiment (
                    experiment_id,
                    app_name,
                    label,
                    description,
                    creator_id,
                    start_time,
                    end_time,
                    sampling_percent,
                    state,
                    created_at,
                    modified_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                ON CONFLICT (experiment_id) DO NOTHING;",
                params![
                    experiment.id.to_string(),
                    experiment.application_name.as_str(),
                    experiment.label.as_str(),
                    experiment.description.as_deref(),
                    experiment.creator_id.as_deref(),
                    experiment.start_time.timestamp_millis(),
                    experiment.end_time.timestamp_millis(),
                    experiment.sampling_percent,
                    experiment.state.as_str(),
                    experiment.created_at.timestamp_millis(),
                    experiment.modified_at.timestamp_millis(),
                ],
            )?;
            Ok(inserted == 1)
        })
    }

    fn update(&self, experiment: &Experiment) -> RepoResult<bool> {
        self.store.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE experiment
                 SET
                    description = ?2,
                    creator_id = ?3,
                    start_time = ?4,
                    end_time = ?5,
                    sampling_percent = ?6,
                    modified_at = ?7
                 WHERE experiment_id = ?1;",
                params![
                    experiment.id.to_string(),
                    experiment.description.as_deref(),
                    experiment.creator_id.as_deref(),
                    experiment.start_time.timestamp_millis(),
                    experiment.end_time.timestamp_millis(),
                    experiment.sampling_percent,
                    experiment.modified_at.timestamp_millis(),
                ],
            )?;
            Ok(changed == 1)
        })
    }

    fn update_state(
        &self,
        id: ExperimentId,
        expected: ExperimentState,
        state: ExperimentState,
        modified_at: DateTime<Utc>,
    ) -> RepoResult<bool> {
        self.store.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE experiment
                 SET state = ?2, modified_at = ?3
                 WHERE experiment_id = ?1 AND state = ?4;",
                params![
                    id.to_string(),
                    state.as_str(),
                    modified_at.timestamp_millis(),
                    expected.as_str(),
                ],
            )?;
            Ok(changed == 1)
        })
    }

    fn get(&self, id: ExperimentId) -> RepoResult<Option<Experiment>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{EXPERIMENT_SELECT_SQL} WHERE experiment_id = ?1;"))?;
            let mut rows = stmt.query([id.to_string()])?;
            if let Some(row) = rows.next()? {
                return Ok(Some(parse_experiment_row(row)?));
            }
            Ok(None)
        })
    }

    fn get_many(&self, ids: &[ExperimentId]) -> RepoResult<Vec<Experiment>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let by_id = self.store.with_conn(|conn| {
            let mut by_id = HashMap::with_capacity(ids.len());
            for chunk in ids.chunks(MAX_IN_LIST) {
                let sql = format!(
                    "{EXPERIMENT_SELECT_SQL} WHERE experiment_id IN ({});",
                    placeholders(chunk.len())
                );
                let mut stmt = conn.prepare(&sql)?;
                let mut rows =
                    stmt.query(params_from_iter(chunk.iter().map(ToString::to_string)))?;
                while let Some(row) = rows.next()? {
                    let experiment = parse_experiment_row(row)?;
                    by_id.insert(experiment.id, experiment);
                }
            }
            Ok::<_, RepoError>(by_id)
        })?;

        Ok(ids.iter().filter_map(|id| by_id.get(id).cloned()).collect())
    }
}

fn parse_experiment_row(row: &Row<'_>) -> RepoResult<Experiment> {
    let id_text: String = row.get("experiment_id")?;
    let state_text: String = row.get("state")?;
    let state = ExperimentState::parse(&state_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid experiment state `{state_text}` in experiment.state"
        ))
    })?;

    Ok(Experiment {
        id: parse_experiment_id(&id_text, "experiment.experiment_id")?,
        application_name: ApplicationName::new(row.get::<_, String>("app_name")?),
        label: ExperimentLabel::new(row.get::<_, String>("label")?),
        description: row.get("description")?,
        creator_id: row.get("creator_id")?,
        start_time: parse_millis(row.get("start_time")?, "experiment.start_time")?,
        end_time: parse_millis(row.get("end_time")?, "experiment.end_time")?,
        sampling_percent: row.get("sampling_percent")?,
        state,
        created_at: parse_millis(row.get("created_at")?, "experiment.created_at")?,
        modified_at: parse_millis(row.get("modified_at")?, "experiment.modified_at")?,
    })
}
