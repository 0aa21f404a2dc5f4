//! Per-bucket assignment rollup.

use crate::model::keys::{BucketLabel, ExperimentId};
use serde::{Deserialize, Serialize};

/// Count of users assigned to one bucket; `bucket = None` counts users
/// assigned to no bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketAssignmentCount {
    pub bucket: Option<BucketLabel>,
    pub count: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalUsers {
    pub total: u64,
    pub bucket_assignments: u64,
    pub null_assignments: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentCounts {
    pub experiment_id: ExperimentId,
    /// Configured buckets in label order, then the null-bucket entry.
    pub assignments: Vec<BucketAssignmentCount>,
    pub total_users: TotalUsers,
}

impl AssignmentCounts {
    /// Builds the rollup and its totals from per-bucket entries.
    pub fn from_entries(experiment_id: ExperimentId, assignments: Vec<BucketAssignmentCount>) -> Self {
        let mut total_users = TotalUsers::default();
        for entry in &assignments {
            if entry.bucket.is_some() {
                total_users.bucket_assignments += entry.count;
            } else {
                total_users.null_assignments += entry.count;
            }
        }
        total_users.total = total_users.bucket_assignments + total_users.null_assignments;
        Self {
            experiment_id,
            assignments,
            total_users,
        }
    }
}
