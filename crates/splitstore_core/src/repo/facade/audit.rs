//! Experiment and bucket change logs.

use super::{require_key, IndexedExperimentRepository};
use crate::model::experiment::now_millis;
use crate::model::{AuditEntry, AuditInfo, BucketLabel, ExperimentId};
use crate::repo::error::RepoResult;
use log::debug;

pub trait AuditLogRepository: Send + Sync {
    /// Appends one entry per attribute change, stamped with the current time.
    fn log_experiment_changes(
        &self,
        experiment_id: ExperimentId,
        changes: &[AuditInfo],
    ) -> RepoResult<()>;
    fn log_bucket_changes(
        &self,
        experiment_id: ExperimentId,
        label: &BucketLabel,
        changes: &[AuditInfo],
    ) -> RepoResult<()>;
    /// Entries in insertion order.
    fn get_experiment_audit_log(&self, experiment_id: ExperimentId) -> RepoResult<Vec<AuditEntry>>;
    fn get_bucket_audit_log(
        &self,
        experiment_id: ExperimentId,
        label: &BucketLabel,
    ) -> RepoResult<Vec<AuditEntry>>;
}

impl AuditLogRepository for IndexedExperimentRepository {
    fn log_experiment_changes(
        &self,
        experiment_id: ExperimentId,
        changes: &[AuditInfo],
    ) -> RepoResult<()> {
        require_key(experiment_id.is_absent(), "experiment id")?;
        if changes.is_empty() {
            return Ok(());
        }
        self.experiment_audit
            .get()?
            .append(experiment_id, changes, now_millis())?;
        debug!(
            "event=experiment_audit_append module=repo status=ok experiment_id={experiment_id} entries={}",
            changes.len()
        );
        Ok(())
    }

    fn log_bucket_changes(
        &self,
        experiment_id: ExperimentId,
        label: &BucketLabel,
        changes: &[AuditInfo],
    ) -> RepoResult<()> {
        require_key(experiment_id.is_absent(), "experiment id")?;
        require_key(label.is_absent(), "bucket label")?;
        if changes.is_empty() {
            return Ok(());
        }
        self.bucket_audit
            .get()?
            .append(experiment_id, label, changes, now_millis())?;
        debug!(
            "event=bucket_audit_append module=repo status=ok experiment_id={experiment_id} label={label} entries={}",
            changes.len()
        );
        Ok(())
    }

    fn get_experiment_audit_log(&self, experiment_id: ExperimentId) -> RepoResult<Vec<AuditEntry>> {
        require_key(experiment_id.is_absent(), "experiment id")?;
        self.experiment_audit.get()?.list(experiment_id)
    }

    fn get_bucket_audit_log(
        &self,
        experiment_id: ExperimentId,
        label: &BucketLabel,
    ) -> RepoResult<Vec<AuditEntry>> {
        require_key(experiment_id.is_absent(), "experiment id")?;
        require_key(label.is_absent(), "bucket label")?;
        self.bucket_audit.get()?.list(experiment_id, label)
    }
}
