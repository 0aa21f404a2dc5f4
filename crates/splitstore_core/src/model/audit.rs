//! Audit trail records.
//!
//! # Invariants
//! - Audit rows are append-only; nothing in the crate updates or deletes them.
//! - Application-scoped entries without an application are filed under
//!   `GLOBAL_ENTRY_APPLICATION`.

use crate::model::keys::{ApplicationName, BucketLabel, ExperimentId, ExperimentLabel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Application key used for audit entries that belong to no application.
/// Never a valid `ApplicationName`, so it cannot collide with a real one.
pub const GLOBAL_ENTRY_APPLICATION: &str = "<global>";

/// One attribute change supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditInfo {
    pub attribute_name: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

impl AuditInfo {
    pub fn new(
        attribute_name: impl Into<String>,
        old_value: Option<&str>,
        new_value: Option<&str>,
    ) -> Self {
        Self {
            attribute_name: attribute_name.into(),
            old_value: old_value.map(str::to_string),
            new_value: new_value.map(str::to_string),
        }
    }
}

/// Persisted per-entity audit row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub experiment_id: ExperimentId,
    /// Set for bucket audit rows only.
    pub bucket_label: Option<BucketLabel>,
    pub attribute_name: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub modified: DateTime<Utc>,
}

/// Kind of change recorded in the application audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    ExperimentCreated,
    ExperimentChanged,
    BucketCreated,
    BucketChanged,
    BucketDeleted,
    ApplicationCreated,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ExperimentCreated => "EXPERIMENT_CREATED",
            Self::ExperimentChanged => "EXPERIMENT_CHANGED",
            Self::BucketCreated => "BUCKET_CREATED",
            Self::BucketChanged => "BUCKET_CHANGED",
            Self::BucketDeleted => "BUCKET_DELETED",
            Self::ApplicationCreated => "APPLICATION_CREATED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        [
            Self::ExperimentCreated,
            Self::ExperimentChanged,
            Self::BucketCreated,
            Self::BucketChanged,
            Self::BucketDeleted,
            Self::ApplicationCreated,
        ]
        .into_iter()
        .find(|action| action.as_str() == value)
    }
}

impl Display for AuditAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application-scoped activity record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub occurred_at: DateTime<Utc>,
    /// `None` files the entry under the global application.
    pub application_name: Option<ApplicationName>,
    pub user: String,
    pub action: AuditAction,
    pub experiment_id: Option<ExperimentId>,
    pub experiment_label: Option<ExperimentLabel>,
    pub bucket_label: Option<BucketLabel>,
    pub changed_property: Option<String>,
    pub before: Option<String>,
    pub after: Option<String>,
}

impl AuditLogEntry {
    pub fn new(
        occurred_at: DateTime<Utc>,
        application_name: Option<ApplicationName>,
        user: impl Into<String>,
        action: AuditAction,
    ) -> Self {
        Self {
            occurred_at,
            application_name,
            user: user.into(),
            action,
            experiment_id: None,
            experiment_label: None,
            bucket_label: None,
            changed_property: None,
            before: None,
            after: None,
        }
    }

    /// Storage partition key for this entry.
    pub fn partition(&self) -> &str {
        self.application_name
            .as_ref()
            .map_or(GLOBAL_ENTRY_APPLICATION, ApplicationName::as_str)
    }
}
