//! Experiment domain model and lifecycle state machine.
//!
//! # Responsibility
//! - Define the authoritative experiment record and its creation draft.
//! - Encode which state transitions are legal.
//!
//! # Invariants
//! - `Terminated` and `Deleted` are terminal; nothing leaves them.
//! - A draft must carry both `id` and `label` before it can be persisted.
//! - Timestamps are kept at millisecond precision to match storage.

use crate::model::keys::{ApplicationName, ExperimentId, ExperimentLabel};
use crate::model::{validate_percent, ModelValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Experiment lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExperimentState {
    /// Created, not yet serving traffic.
    Draft,
    Running,
    Paused,
    /// Finished; still readable by id.
    Terminated,
    /// Removed from every listing; frees the label for reuse.
    Deleted,
}

impl ExperimentState {
    pub const ALL: [ExperimentState; 5] = [
        Self::Draft,
        Self::Running,
        Self::Paused,
        Self::Terminated,
        Self::Deleted,
    ];

    /// Stable storage and index key.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Terminated => "TERMINATED",
            Self::Deleted => "DELETED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.as_str() == value)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated | Self::Deleted)
    }

    /// Whether `self -> next` is allowed. Re-asserting the current state is.
    pub fn can_transition_to(self, next: ExperimentState) -> bool {
        if self == next {
            return true;
        }
        match self {
            Self::Draft => matches!(next, Self::Running | Self::Paused | Self::Deleted),
            Self::Running => matches!(next, Self::Paused | Self::Terminated),
            Self::Paused => matches!(next, Self::Running | Self::Terminated),
            Self::Terminated | Self::Deleted => false,
        }
    }

    pub fn check_transition(self, next: ExperimentState) -> Result<(), ModelValidationError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(ModelValidationError::IllegalTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl Display for ExperimentState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authoritative experiment record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub id: ExperimentId,
    pub application_name: ApplicationName,
    pub label: ExperimentLabel,
    pub description: Option<String>,
    pub creator_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Share of eligible traffic enrolled, within `[0, 1]`.
    pub sampling_percent: f64,
    pub state: ExperimentState,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Experiment {
    /// Checks names, sampling range and the time window.
    pub fn validate(&self) -> Result<(), ModelValidationError> {
        if self.id.is_absent() {
            return Err(ModelValidationError::MissingField("experiment id"));
        }
        self.application_name.validate()?;
        self.label.validate()?;
        validate_percent("sampling percent", self.sampling_percent)?;
        if self.end_time < self.start_time {
            return Err(ModelValidationError::EndBeforeStart);
        }
        Ok(())
    }
}

/// Creation draft. `id` and `label` may still be missing at this stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewExperiment {
    pub id: Option<ExperimentId>,
    pub application_name: ApplicationName,
    pub label: Option<ExperimentLabel>,
    pub description: Option<String>,
    pub creator_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub sampling_percent: f64,
}

impl NewExperiment {
    /// Creates a draft with a fresh id, a zero-length window at `now` and full sampling.
    pub fn new(application_name: impl Into<ApplicationName>, label: impl Into<ExperimentLabel>) -> Self {
        let now = now_millis();
        Self {
            id: Some(ExperimentId::new()),
            application_name: application_name.into(),
            label: Some(label.into()),
            description: None,
            creator_id: None,
            start_time: now,
            end_time: now,
            sampling_percent: 1.0,
        }
    }

    /// Materializes the draft as a `Draft`-state experiment stamped with `now`.
    pub fn to_experiment(&self, now: DateTime<Utc>) -> Result<Experiment, ModelValidationError> {
        let id = self
            .id
            .filter(|id| !id.is_absent())
            .ok_or(ModelValidationError::MissingField("experiment id"))?;
        let label = self
            .label
            .clone()
            .filter(|label| !label.is_absent())
            .ok_or(ModelValidationError::MissingField("experiment label"))?;
        let now = truncate_millis(now);
        let experiment = Experiment {
            id,
            application_name: self.application_name.clone(),
            label,
            description: self.description.clone(),
            creator_id: self.creator_id.clone(),
            start_time: truncate_millis(self.start_time),
            end_time: truncate_millis(self.end_time),
            sampling_percent: self.sampling_percent,
            state: ExperimentState::Draft,
            created_at: now,
            modified_at: now,
        };
        experiment.validate()?;
        Ok(experiment)
    }
}

/// Experiments hydrated for an explicit id list.
pub type ExperimentList = Vec<Experiment>;

/// Two-key lookup of experiments by `(id, label)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExperimentTable {
    rows: BTreeMap<(ExperimentId, ExperimentLabel), Experiment>,
}

impl ExperimentTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, experiment: Experiment) {
        self.rows
            .insert((experiment.id, experiment.label.clone()), experiment);
    }

    pub fn get(&self, id: ExperimentId, label: &ExperimentLabel) -> Option<&Experiment> {
        self.rows.get(&(id, label.clone()))
    }

    pub fn contains_id(&self, id: ExperimentId) -> bool {
        self.rows.keys().any(|(row_id, _)| *row_id == id)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Experiment> {
        self.rows.values()
    }
}

/// Current UTC time at storage precision.
pub fn now_millis() -> DateTime<Utc> {
    truncate_millis(Utc::now())
}

pub(crate) fn truncate_millis(value: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(value.timestamp_millis()).unwrap_or(value)
}
