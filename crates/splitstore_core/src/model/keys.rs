//! Identifier and name value types.
//!
//! # Responsibility
//! - Give every lookup key its own type so signatures cannot mix them up.
//! - Centralize the character rules for names, labels and contexts.
//!
//! # Invariants
//! - Constructors never fail; `is_absent()`/`validate()` are checked by the
//!   repository before any store call, mirroring nullable keys at the caller.
//! - A nil UUID is the absent experiment id.

use crate::model::ModelValidationError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;

const MAX_NAME_CHARS: usize = 64;

static LABEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_$\-][A-Za-z0-9_$\-]*$").expect("valid label regex"));
static APPLICATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_$\-]+$").expect("valid application regex"));
static CONTEXT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_\-]+$").expect("valid context regex"));

/// Stable experiment identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExperimentId(Uuid);

impl ExperimentId {
    /// Generates a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The absent id. Rejected by every repository operation.
    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    pub fn is_absent(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for ExperimentId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ExperimentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ExperimentId {
    type Err = uuid::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(value).map(Self)
    }
}

impl From<Uuid> for ExperimentId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

macro_rules! string_key {
    ($(#[$meta:meta])* $name:ident, $kind:literal, $pattern:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }

            /// Blank values stand in for a missing key.
            pub fn is_absent(&self) -> bool {
                self.0.trim().is_empty()
            }

            /// Checks length and character rules.
            pub fn validate(&self) -> Result<(), ModelValidationError> {
                if self.is_absent() {
                    return Err(ModelValidationError::MissingField($kind));
                }
                if self.0.chars().count() > MAX_NAME_CHARS || !$pattern.is_match(&self.0) {
                    return Err(ModelValidationError::InvalidName {
                        kind: $kind,
                        value: self.0.clone(),
                    });
                }
                Ok(())
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

string_key!(
    /// Name of the application that owns a set of experiments.
    ApplicationName,
    "application name",
    APPLICATION_RE
);

string_key!(
    /// Experiment label, unique within one application while not deleted.
    ExperimentLabel,
    "experiment label",
    LABEL_RE
);

string_key!(
    /// Bucket label, unique within one experiment.
    BucketLabel,
    "bucket label",
    LABEL_RE
);

string_key!(
    /// Assignment context such as `prod` or `qa`.
    Context,
    "context",
    CONTEXT_RE
);

impl Context {
    /// Context used when callers do not supply one.
    pub fn production() -> Self {
        Self::new("PROD")
    }
}
