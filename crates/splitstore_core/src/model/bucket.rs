//! Bucket domain model.
//!
//! # Invariants
//! - `(experiment_id, label)` identifies one bucket.
//! - `allocation_percent` stays within `[0, 1]`.
//! - At most one control bucket per experiment is a caller rule; not checked here.

use crate::model::keys::{BucketLabel, ExperimentId};
use crate::model::{validate_percent, ModelValidationError};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Bucket lifecycle marker. Transitions are not enforced at this layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BucketState {
    Open,
    Closed,
    /// Closed and drained of its users.
    Empty,
}

impl BucketState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
            Self::Empty => "EMPTY",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "OPEN" => Some(Self::Open),
            "CLOSED" => Some(Self::Closed),
            "EMPTY" => Some(Self::Empty),
            _ => None,
        }
    }
}

impl Display for BucketState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One traffic split of an experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub experiment_id: ExperimentId,
    pub label: BucketLabel,
    pub allocation_percent: f64,
    pub is_control: bool,
    pub description: Option<String>,
    /// Opaque data handed to clients assigned to this bucket.
    pub payload: Option<String>,
    pub state: BucketState,
}

impl Bucket {
    /// Open, non-control bucket with the given allocation.
    pub fn new(
        experiment_id: ExperimentId,
        label: impl Into<BucketLabel>,
        allocation_percent: f64,
    ) -> Self {
        Self {
            experiment_id,
            label: label.into(),
            allocation_percent,
            is_control: false,
            description: None,
            payload: None,
            state: BucketState::Open,
        }
    }

    pub fn with_control(mut self, is_control: bool) -> Self {
        self.is_control = is_control;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn with_state(mut self, state: BucketState) -> Self {
        self.state = state;
        self
    }

    pub fn validate(&self) -> Result<(), ModelValidationError> {
        if self.experiment_id.is_absent() {
            return Err(ModelValidationError::MissingField("experiment id"));
        }
        self.label.validate()?;
        validate_percent("allocation percent", self.allocation_percent)
    }
}

/// Buckets of one experiment, sorted by label when read from storage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketList {
    pub buckets: Vec<Bucket>,
}

impl BucketList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bucket(&mut self, bucket: Bucket) {
        self.buckets.push(bucket);
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn get(&self, label: &BucketLabel) -> Option<&Bucket> {
        self.buckets.iter().find(|bucket| &bucket.label == label)
    }
}

impl From<Vec<Bucket>> for BucketList {
    fn from(buckets: Vec<Bucket>) -> Self {
        Self { buckets }
    }
}

impl FromIterator<Bucket> for BucketList {
    fn from_iter<I: IntoIterator<Item = Bucket>>(iter: I) -> Self {
        Self {
            buckets: iter.into_iter().collect(),
        }
    }
}
