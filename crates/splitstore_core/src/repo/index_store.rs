//! Denormalized lookup tables derived from experiment rows.
//!
//! # Responsibility
//! - `experiment_label_index`: (application, label) -> experiment id, also the
//!   per-application experiment listing.
//! - `experiment_state_index`: state -> experiment ids.
//! - `application_list`: the flat set of known applications.
//!
//! # Invariants
//! - Index rows are never authoritative; they may be rebuilt from `experiment`.
//! - Every write here is idempotent.

use crate::db::Store;
use crate::model::{ApplicationName, ExperimentId, ExperimentLabel, ExperimentState};
use crate::repo::codec::parse_experiment_id;
use crate::repo::error::RepoResult;
use rusqlite::{params, OptionalExtension};

/// (application, label) -> experiment id.
pub trait ExperimentLabelIndexStore: Send + Sync {
    /// Claims `(application, label)` for `id` unless already claimed.
    /// Returns the id stored under the key after the call.
    fn insert_if_absent(
        &self,
        application: &ApplicationName,
        label: &ExperimentLabel,
        id: ExperimentId,
    ) -> RepoResult<ExperimentId>;
    fn get(
        &self,
        application: &ApplicationName,
        label: &ExperimentLabel,
    ) -> RepoResult<Option<ExperimentId>>;
    /// Every entry of one application partition, sorted by label.
    fn list_by_application(
        &self,
        application: &ApplicationName,
    ) -> RepoResult<Vec<(ExperimentLabel, ExperimentId)>>;
    fn delete(&self, application: &ApplicationName, label: &ExperimentLabel) -> RepoResult<()>;
}

/// state -> experiment ids.
pub trait ExperimentStateIndexStore: Send + Sync {
    fn insert(&self, state: ExperimentState, id: ExperimentId) -> RepoResult<()>;
    fn delete(&self, state: ExperimentState, id: ExperimentId) -> RepoResult<()>;
    fn list_by_state(&self, state: ExperimentState) -> RepoResult<Vec<ExperimentId>>;
}

/// Flat set of application names.
pub trait ApplicationListStore: Send + Sync {
    /// Adds `name`; re-adding an existing name is a no-op.
    fn insert(&self, name: &ApplicationName) -> RepoResult<()>;
    /// All names, sorted.
    fn list(&self) -> RepoResult<Vec<ApplicationName>>;
}

pub struct SqliteExperimentLabelIndexStore {
    store: Store,
}

impl SqliteExperimentLabelIndexStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

impl ExperimentLabelIndexStore for SqliteExperimentLabelIndexStore {
    fn insert_if_absent(
        &self,
        application: &ApplicationName,
        label: &ExperimentLabel,
        id: ExperimentId,
    ) -> RepoResult<ExperimentId> {
        self.store.with_batch(|tx| {
            tx.execute(
                "INSERT INTO experiment_label_index (app_name, label, experiment_id)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (app_name, label) DO NOTHING;",
                params![application.as_str(), label.as_str(), id.to_string()],
            )?;
            let stored: String = tx.query_row(
                "SELECT experiment_id FROM experiment_label_index
                 WHERE app_name = ?1 AND label = ?2;",
                params![application.as_str(), label.as_str()],
                |row| row.get(0),
            )?;
            parse_experiment_id(&stored, "experiment_label_index.experiment_id")
        })
    }

    fn get(
        &self,
        application: &ApplicationName,
        label: &ExperimentLabel,
    ) -> RepoResult<Option<ExperimentId>> {
        self.store.with_conn(|conn| {
            let stored: Option<String> = conn
                .query_row(
                    "SELECT experiment_id FROM experiment_label_index
                     WHERE app_name = ?1 AND label = ?2;",
                    params![application.as_str(), label.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            stored
                .map(|value| parse_experiment_id(&value, "experiment_label_index.experiment_id"))
                .transpose()
        })
    }

    fn list_by_application(
        &self,
        application: &ApplicationName,
    ) -> RepoResult<Vec<(ExperimentLabel, ExperimentId)>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT label, experiment_id FROM experiment_label_index
                 WHERE app_name = ?1
                 ORDER BY label ASC;",
            )?;
            let mut rows = stmt.query([application.as_str()])?;
            let mut entries = Vec::new();
            while let Some(row) = rows.next()? {
                let label: String = row.get(0)?;
                let id: String = row.get(1)?;
                entries.push((
                    ExperimentLabel::new(label),
                    parse_experiment_id(&id, "experiment_label_index.experiment_id")?,
                ));
            }
            Ok(entries)
        })
    }

    fn delete(&self, application: &ApplicationName, label: &ExperimentLabel) -> RepoResult<()> {
        self.store.with_conn(|conn| {
            conn.execute(
                "DELETE FROM experiment_label_index WHERE app_name = ?1 AND label = ?2;",
                params![application.as_str(), label.as_str()],
            )?;
            Ok(())
        })
    }
}

pub struct SqliteExperimentStateIndexStore {
    store: Store,
}

impl SqliteExperimentStateIndexStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

impl ExperimentStateIndexStore for SqliteExperimentStateIndexStore {
    fn insert(&self, state: ExperimentState, id: ExperimentId) -> RepoResult<()> {
        self.store.with_conn(|conn| {
            conn.execute(
                "INSERT INTO experiment_state_index (index_key, experiment_id)
                 VALUES (?1, ?2)
                 ON CONFLICT (index_key, experiment_id) DO NOTHING;",
                params![state.as_str(), id.to_string()],
            )?;
            Ok(())
        })
    }

    fn delete(&self, state: ExperimentState, id: ExperimentId) -> RepoResult<()> {
        self.store.with_conn(|conn| {
            conn.execute(
                "DELETE FROM experiment_state_index WHERE index_key = ?1 AND experiment_id = ?2;",
                params![state.as_str(), id.to_string()],
            )?;
            Ok(())
        })
    }

    fn list_by_state(&self, state: ExperimentState) -> RepoResult<Vec<ExperimentId>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT experiment_id FROM experiment_state_index
                 WHERE index_key = ?1
                 ORDER BY experiment_id ASC;",
            )?;
            let mut rows = stmt.query([state.as_str()])?;
            let mut ids = Vec::new();
            while let Some(row) = rows.next()? {
                let id: String = row.get(0)?;
                ids.push(parse_experiment_id(&id, "experiment_state_index.experiment_id")?);
            }
            Ok(ids)
        })
    }
}

pub struct SqliteApplicationListStore {
    store: Store,
}

impl SqliteApplicationListStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

impl ApplicationListStore for SqliteApplicationListStore {
    fn insert(&self, name: &ApplicationName) -> RepoResult<()> {
        self.store.with_conn(|conn| {
            conn.execute(
                "INSERT INTO application_list (app_name) VALUES (?1)
                 ON CONFLICT (app_name) DO NOTHING;",
                [name.as_str()],
            )?;
            Ok(())
        })
    }

    fn list(&self) -> RepoResult<Vec<ApplicationName>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT app_name FROM application_list ORDER BY app_name ASC;")?;
            let mut rows = stmt.query([])?;
            let mut names = Vec::new();
            while let Some(row) = rows.next()? {
                names.push(ApplicationName::new(row.get::<_, String>(0)?));
            }
            Ok(names)
        })
    }
}
