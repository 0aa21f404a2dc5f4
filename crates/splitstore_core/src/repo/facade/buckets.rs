//! Bucket operations and assignment rollups.

use super::{require_key, IndexedExperimentRepository};
use crate::model::{
    validate_percent, AssignmentCounts, Bucket, BucketAssignmentCount, BucketLabel, BucketList,
    BucketState, Context, ExperimentId,
};
use crate::repo::error::{RepoError, RepoResult};
use log::info;
use std::collections::{BTreeMap, HashMap};

/// Bucket storage operations, all scoped to one experiment partition.
pub trait BucketRepository: Send + Sync {
    /// Upserts every bucket under `experiment_id` atomically.
    ///
    /// The experiment id carried by each bucket is ignored in favour of
    /// `experiment_id`.
    fn update_bucket_batch(&self, experiment_id: ExperimentId, buckets: &BucketList)
        -> RepoResult<()>;
    fn get_bucket_list(&self, experiment_id: ExperimentId) -> RepoResult<BucketList>;
    /// Bucket lists keyed by experiment. Experiments with no buckets are omitted.
    fn get_bucket_lists(
        &self,
        experiment_ids: &[ExperimentId],
    ) -> RepoResult<BTreeMap<ExperimentId, BucketList>>;
    fn get_buckets(&self, experiment_id: ExperimentId) -> RepoResult<BucketList>;
    /// Removes one bucket. Removing a missing bucket succeeds.
    fn delete_bucket(&self, experiment_id: ExperimentId, label: &BucketLabel) -> RepoResult<()>;
    fn update_bucket(&self, bucket: &Bucket) -> RepoResult<Bucket>;
    fn update_bucket_allocation_percentage(
        &self,
        bucket: &Bucket,
        allocation_percent: f64,
    ) -> RepoResult<Bucket>;
    fn update_bucket_state(&self, bucket: &Bucket, state: BucketState) -> RepoResult<Bucket>;
    /// Per-bucket assignment counts in one context, null bucket last.
    fn get_assignment_counts(
        &self,
        experiment_id: ExperimentId,
        context: &Context,
    ) -> RepoResult<AssignmentCounts>;
}

impl IndexedExperimentRepository {
    fn reload_bucket(&self, experiment_id: ExperimentId, label: &BucketLabel) -> RepoResult<Bucket> {
        self.buckets
            .get()?
            .get(experiment_id, label)?
            .ok_or_else(|| RepoError::not_found("bucket", format!("{experiment_id}/{label}")))
    }
}

fn require_bucket_key(bucket: &Bucket) -> RepoResult<()> {
    require_key(bucket.experiment_id.is_absent(), "experiment id")?;
    require_key(bucket.label.is_absent(), "bucket label")
}

impl BucketRepository for IndexedExperimentRepository {
    fn update_bucket_batch(
        &self,
        experiment_id: ExperimentId,
        buckets: &BucketList,
    ) -> RepoResult<()> {
        require_key(experiment_id.is_absent(), "experiment id")?;
        for bucket in &buckets.buckets {
            require_key(bucket.label.is_absent(), "bucket label")?;
            bucket.label.validate()?;
            validate_percent("allocation percent", bucket.allocation_percent)?;
        }
        if buckets.is_empty() {
            return Ok(());
        }

        self.buckets.get()?.write_batch(experiment_id, &buckets.buckets)?;
        info!(
            "event=bucket_batch_write module=repo status=ok experiment_id={experiment_id} bucket_count={}",
            buckets.len()
        );
        Ok(())
    }

    fn get_bucket_list(&self, experiment_id: ExperimentId) -> RepoResult<BucketList> {
        require_key(experiment_id.is_absent(), "experiment id")?;
        Ok(self.buckets.get()?.list(experiment_id)?.into())
    }

    fn get_bucket_lists(
        &self,
        experiment_ids: &[ExperimentId],
    ) -> RepoResult<BTreeMap<ExperimentId, BucketList>> {
        if experiment_ids.iter().any(ExperimentId::is_absent) {
            return Err(RepoError::InvalidArgument(
                "experiment id list contains an absent id".to_string(),
            ));
        }

        let mut lists: BTreeMap<ExperimentId, BucketList> = BTreeMap::new();
        for bucket in self.buckets.get()?.list_many(experiment_ids)? {
            lists.entry(bucket.experiment_id).or_default().add_bucket(bucket);
        }
        Ok(lists)
    }

    fn get_buckets(&self, experiment_id: ExperimentId) -> RepoResult<BucketList> {
        self.get_bucket_list(experiment_id)
    }

    fn delete_bucket(&self, experiment_id: ExperimentId, label: &BucketLabel) -> RepoResult<()> {
        require_key(experiment_id.is_absent(), "experiment id")?;
        require_key(label.is_absent(), "bucket label")?;
        self.buckets.get()?.delete(experiment_id, label)?;
        info!("event=bucket_delete module=repo status=ok experiment_id={experiment_id} label={label}");
        Ok(())
    }

    fn update_bucket(&self, bucket: &Bucket) -> RepoResult<Bucket> {
        require_bucket_key(bucket)?;
        bucket.validate()?;

        if !self.buckets.get()?.update(bucket)? {
            return Err(RepoError::not_found(
                "bucket",
                format!("{}/{}", bucket.experiment_id, bucket.label),
            ));
        }
        info!(
            "event=bucket_update module=repo status=ok experiment_id={} label={}",
            bucket.experiment_id, bucket.label
        );
        self.reload_bucket(bucket.experiment_id, &bucket.label)
    }

    fn update_bucket_allocation_percentage(
        &self,
        bucket: &Bucket,
        allocation_percent: f64,
    ) -> RepoResult<Bucket> {
        require_bucket_key(bucket)?;
        validate_percent("allocation percent", allocation_percent)?;

        let store = self.buckets.get()?;
        if !store.update_allocation(bucket.experiment_id, &bucket.label, allocation_percent)? {
            return Err(RepoError::not_found(
                "bucket",
                format!("{}/{}", bucket.experiment_id, bucket.label),
            ));
        }
        info!(
            "event=bucket_allocation_update module=repo status=ok experiment_id={} label={} allocation_percent={allocation_percent}",
            bucket.experiment_id, bucket.label
        );
        self.reload_bucket(bucket.experiment_id, &bucket.label)
    }

    fn update_bucket_state(&self, bucket: &Bucket, state: BucketState) -> RepoResult<Bucket> {
        require_bucket_key(bucket)?;

        if !self
            .buckets
            .get()?
            .update_state(bucket.experiment_id, &bucket.label, state)?
        {
            return Err(RepoError::not_found(
                "bucket",
                format!("{}/{}", bucket.experiment_id, bucket.label),
            ));
        }
        info!(
            "event=bucket_state_update module=repo status=ok experiment_id={} label={} state={state}",
            bucket.experiment_id, bucket.label
        );
        self.reload_bucket(bucket.experiment_id, &bucket.label)
    }

    fn get_assignment_counts(
        &self,
        experiment_id: ExperimentId,
        context: &Context,
    ) -> RepoResult<AssignmentCounts> {
        require_key(experiment_id.is_absent(), "experiment id")?;
        require_key(context.is_absent(), "context")?;
        let buckets = self.buckets.get()?;
        let counters = self.assignment_counts.get()?;

        let mut by_bucket: HashMap<Option<BucketLabel>, u64> =
            counters.counts(experiment_id, context)?.into_iter().collect();

        // Counters of buckets that are no longer configured are dropped.
        let mut assignments: Vec<BucketAssignmentCount> = buckets
            .list(experiment_id)?
            .into_iter()
            .map(|bucket| {
                let count = by_bucket.remove(&Some(bucket.label.clone())).unwrap_or(0);
                BucketAssignmentCount {
                    bucket: Some(bucket.label),
                    count,
                }
            })
            .collect();
        assignments.push(BucketAssignmentCount {
            bucket: None,
            count: by_bucket.remove(&None).unwrap_or(0),
        });

        Ok(AssignmentCounts::from_entries(experiment_id, assignments))
    }
}
