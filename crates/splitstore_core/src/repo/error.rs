//! Repository error taxonomy.

use crate::db::DbError;
use crate::model::ModelValidationError;
use std::fmt::{Display, Formatter};
use thiserror::Error;

pub type RepoResult<T> = Result<T, RepoError>;

/// Error returned by every store and repository operation.
#[derive(Debug, Error)]
pub enum RepoError {
    /// A required key was absent or a value failed validation. Raised before I/O.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// An insert would duplicate a uniquely keyed row.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    /// A sub-store dependency is not configured.
    #[error("repository unavailable: {0}")]
    Unavailable(String),
    /// The row an operation must act on does not exist.
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },
    #[error(transparent)]
    Db(#[from] DbError),
    /// A persisted row could not be decoded.
    #[error("invalid persisted data: {0}")]
    InvalidData(String),
}

/// Coarse classification callers map onto their own status semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoErrorKind {
    InvalidArgument,
    ConstraintViolation,
    RepositoryUnavailable,
    NotFound,
}

impl Display for RepoErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let value = match self {
            Self::InvalidArgument => "invalid_argument",
            Self::ConstraintViolation => "constraint_violation",
            Self::RepositoryUnavailable => "repository_unavailable",
            Self::NotFound => "not_found",
        };
        f.write_str(value)
    }
}

impl RepoError {
    pub fn kind(&self) -> RepoErrorKind {
        match self {
            Self::InvalidArgument(_) => RepoErrorKind::InvalidArgument,
            Self::ConstraintViolation(_) => RepoErrorKind::ConstraintViolation,
            Self::NotFound { .. } => RepoErrorKind::NotFound,
            Self::Unavailable(_) | Self::Db(_) | Self::InvalidData(_) => {
                RepoErrorKind::RepositoryUnavailable
            }
        }
    }

    pub(crate) fn not_found(entity: &'static str, key: impl Display) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }
}

impl From<ModelValidationError> for RepoError {
    fn from(value: ModelValidationError) -> Self {
        Self::InvalidArgument(value.to_string())
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}
