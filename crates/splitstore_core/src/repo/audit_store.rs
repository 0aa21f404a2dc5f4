//! Append-only audit tables.
//!
//! # Invariants
//! - Rows are only ever inserted.
//! - Per-entity reads return insertion order (`modified`, then sequence).
//! - Application reads return most recent first.

use crate::db::Store;
use crate::model::{
    ApplicationName, AuditAction, AuditEntry, AuditInfo, AuditLogEntry, BucketLabel,
    ExperimentId, ExperimentLabel, GLOBAL_ENTRY_APPLICATION,
};
use crate::repo::codec::{parse_experiment_id, parse_millis};
use crate::repo::error::{RepoError, RepoResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

const AUDITLOG_SELECT_SQL: &str = "SELECT
    application_name,
    occurred_at,
    user_id,
    action,
    experiment_id,
    experiment_label,
    bucket_label,
    changed_property,
    property_before,
    property_after
FROM auditlog";

/// Per-experiment change log.
pub trait ExperimentAuditLogStore: Send + Sync {
    /// Appends one row per entry in a single batch.
    fn append(
        &self,
        experiment_id: ExperimentId,
        entries: &[AuditInfo],
        modified: DateTime<Utc>,
    ) -> RepoResult<()>;
    fn list(&self, experiment_id: ExperimentId) -> RepoResult<Vec<AuditEntry>>;
}

/// Per-bucket change log.
pub trait BucketAuditLogStore: Send + Sync {
    fn append(
        &self,
        experiment_id: ExperimentId,
        label: &BucketLabel,
        entries: &[AuditInfo],
        modified: DateTime<Utc>,
    ) -> RepoResult<()>;
    fn list(&self, experiment_id: ExperimentId, label: &BucketLabel) -> RepoResult<Vec<AuditEntry>>;
}

/// Application-scoped activity log.
pub trait ApplicationAuditLogStore: Send + Sync {
    fn append(&self, entry: &AuditLogEntry) -> RepoResult<()>;
    /// Entries filed under `partition`, most recent first.
    fn list_by_application(&self, partition: &str) -> RepoResult<Vec<AuditLogEntry>>;
    /// Entries of every partition, most recent first.
    fn list_all(&self) -> RepoResult<Vec<AuditLogEntry>>;
}

pub struct SqliteExperimentAuditLogStore {
    store: Store,
}

impl SqliteExperimentAuditLogStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

impl ExperimentAuditLogStore for SqliteExperimentAuditLogStore {
    fn append(
        &self,
        experiment_id: ExperimentId,
        entries: &[AuditInfo],
        modified: DateTime<Utc>,
    ) -> RepoResult<()> {
        let partition = experiment_id.to_string();
        self.store.with_batch(|tx| {
            for entry in entries {
                tx.execute(
                    "INSERT INTO experiment_audit_log (
                        experiment_id, modified, attribute_name, old_value, new_value
                    ) VALUES (?1, ?2, ?3, ?4, ?5);",
                    params![
                        partition.as_str(),
                        modified.timestamp_millis(),
                        entry.attribute_name.as_str(),
                        entry.old_value.as_deref(),
                        entry.new_value.as_deref(),
                    ],
                )?;
            }
            Ok(())
        })
    }

    fn list(&self, experiment_id: ExperimentId) -> RepoResult<Vec<AuditEntry>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT experiment_id, modified, attribute_name, old_value, new_value
                 FROM experiment_audit_log
                 WHERE experiment_id = ?1
                 ORDER BY modified ASC, seq ASC;",
            )?;
            let mut rows = stmt.query([experiment_id.to_string()])?;
            let mut entries = Vec::new();
            while let Some(row) = rows.next()? {
                entries.push(parse_audit_row(row, None)?);
            }
            Ok(entries)
        })
    }
}

pub struct SqliteBucketAuditLogStore {
    store: Store,
}

impl SqliteBucketAuditLogStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

impl BucketAuditLogStore for SqliteBucketAuditLogStore {
    fn append(
        &self,
        experiment_id: ExperimentId,
        label: &BucketLabel,
        entries: &[AuditInfo],
        modified: DateTime<Utc>,
    ) -> RepoResult<()> {
        let partition = experiment_id.to_string();
        self.store.with_batch(|tx| {
            for entry in entries {
                tx.execute(
                    "INSERT INTO bucket_audit_log (
                        experiment_id, label, modified, attribute_name, old_value, new_value
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
                    params![
                        partition.as_str(),
                        label.as_str(),
                        modified.timestamp_millis(),
                        entry.attribute_name.as_str(),
                        entry.old_value.as_deref(),
                        entry.new_value.as_deref(),
                    ],
                )?;
            }
            Ok(())
        })
    }

    fn list(&self, experiment_id: ExperimentId, label: &BucketLabel) -> RepoResult<Vec<AuditEntry>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT experiment_id, modified, attribute_name, old_value, new_value
                 FROM bucket_audit_log
                 WHERE experiment_id = ?1 AND label = ?2
                 ORDER BY modified ASC, seq ASC;",
            )?;
            let mut rows = stmt.query(params![experiment_id.to_string(), label.as_str()])?;
            let mut entries = Vec::new();
            while let Some(row) = rows.next()? {
                entries.push(parse_audit_row(row, Some(label))?);
            }
            Ok(entries)
        })
    }
}

pub struct SqliteApplicationAuditLogStore {
    store: Store,
}

impl SqliteApplicationAuditLogStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

impl ApplicationAuditLogStore for SqliteApplicationAuditLogStore {
    fn append(&self, entry: &AuditLogEntry) -> RepoResult<()> {
        self.store.with_conn(|conn| {
            conn.execute(
                "INSERT INTO auditlog (
                    application_name,
                    occurred_at,
                    user_id,
                    action,
                    experiment_id,
                    experiment_label,
                    bucket_label,
                    changed_property,
                    property_before,
                    property_after
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10);",
                params![
                    entry.partition(),
                    entry.occurred_at.timestamp_millis(),
                    entry.user.as_str(),
                    entry.action.as_str(),
                    entry.experiment_id.map(|id| id.to_string()),
                    entry.experiment_label.as_ref().map(ExperimentLabel::as_str),
                    entry.bucket_label.as_ref().map(BucketLabel::as_str),
                    entry.changed_property.as_deref(),
                    entry.before.as_deref(),
                    entry.after.as_deref(),
                ],
            )?;
            Ok(())
        })
    }

    fn list_by_application(&self, partition: &str) -> RepoResult<Vec<AuditLogEntry>> {
        self.store.with_conn(|conn| {
            query_auditlog(
                conn,
                &format!(
                    "{AUDITLOG_SELECT_SQL} WHERE application_name = ?1
                     ORDER BY occurred_at DESC, seq DESC;"
                ),
                Some(partition),
            )
        })
    }

    fn list_all(&self) -> RepoResult<Vec<AuditLogEntry>> {
        self.store.with_conn(|conn| {
            query_auditlog(
                conn,
                &format!("{AUDITLOG_SELECT_SQL} ORDER BY occurred_at DESC, seq DESC;"),
                None,
            )
        })
    }
}

fn parse_audit_row(row: &Row<'_>, label: Option<&BucketLabel>) -> RepoResult<AuditEntry> {
    let id_text: String = row.get("experiment_id")?;
    Ok(AuditEntry {
        experiment_id: parse_experiment_id(&id_text, "audit_log.experiment_id")?,
        bucket_label: label.cloned(),
        attribute_name: row.get("attribute_name")?,
        old_value: row.get("old_value")?,
        new_value: row.get("new_value")?,
        modified: parse_millis(row.get("modified")?, "audit_log.modified")?,
    })
}

fn query_auditlog(
    conn: &Connection,
    sql: &str,
    partition: Option<&str>,
) -> RepoResult<Vec<AuditLogEntry>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = match partition {
        Some(partition) => stmt.query([partition])?,
        None => stmt.query([])?,
    };
    let mut entries = Vec::new();
    while let Some(row) = rows.next()? {
        entries.push(parse_auditlog_row(row)?);
    }
    Ok(entries)
}

fn parse_auditlog_row(row: &Row<'_>) -> RepoResult<AuditLogEntry> {
    let application: String = row.get("application_name")?;
    let action_text: String = row.get("action")?;
    let action = AuditAction::parse(&action_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid audit action `{action_text}` in auditlog.action"))
    })?;
    let experiment_id = match row.get::<_, Option<String>>("experiment_id")? {
        Some(value) => Some(parse_experiment_id(&value, "auditlog.experiment_id")?),
        None => None,
    };

    Ok(AuditLogEntry {
        occurred_at: parse_millis(row.get("occurred_at")?, "auditlog.occurred_at")?,
        application_name: (application != GLOBAL_ENTRY_APPLICATION)
            .then(|| ApplicationName::new(application)),
        user: row.get("user_id")?,
        action,
        experiment_id,
        experiment_label: row
            .get::<_, Option<String>>("experiment_label")?
            .map(ExperimentLabel::new),
        bucket_label: row
            .get::<_, Option<String>>("bucket_label")?
            .map(BucketLabel::new),
        changed_property: row.get("changed_property")?,
        before: row.get("property_before")?,
        after: row.get("property_after")?,
    })
}
