//! Column encode/decode helpers shared by the SQLite stores.

use crate::model::ExperimentId;
use crate::repo::error::{RepoError, RepoResult};
use chrono::{DateTime, Utc};

pub(crate) fn parse_experiment_id(value: &str, column: &str) -> RepoResult<ExperimentId> {
    value.parse().map_err(|_| {
        RepoError::InvalidData(format!("invalid experiment id `{value}` in {column}"))
    })
}

pub(crate) fn parse_millis(value: i64, column: &str) -> RepoResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(value)
        .ok_or_else(|| RepoError::InvalidData(format!("invalid timestamp `{value}` in {column}")))
}

pub(crate) fn parse_bool(value: i64, column: &str) -> RepoResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid boolean `{other}` in {column}"
        ))),
    }
}

pub(crate) fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

/// Largest `IN (...)` list bound in one statement; stays under SQLite's
/// bound-parameter limit on every build.
pub(crate) const MAX_IN_LIST: usize = 500;

/// `?, ?, ...` with `count` placeholders.
pub(crate) fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}
