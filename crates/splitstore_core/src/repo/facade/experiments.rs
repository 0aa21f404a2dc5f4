//! Experiment and application operations.

use super::{require_key, IndexedExperimentRepository};
use crate::model::experiment::now_millis;
use crate::model::{
    ApplicationName, Experiment, ExperimentId, ExperimentLabel, ExperimentList, ExperimentState,
    ExperimentTable, NewExperiment,
};
use crate::repo::error::{RepoError, RepoResult};
use log::{debug, info, warn};
use std::collections::HashSet;

/// Experiment lifecycle and lookup operations.
pub trait ExperimentRepository: Send + Sync {
    /// Writes the authoritative row for `draft` in `Draft` state.
    ///
    /// Index entries are written separately by
    /// [`ExperimentRepository::create_indices_for_new_experiment`].
    fn create_experiment(&self, draft: &NewExperiment) -> RepoResult<ExperimentId>;
    /// Claims the (application, label) pair and files the id under `Draft`.
    /// Safe to re-run for the same draft; once the stored row has left `Draft`
    /// this rebuilds the entries from the row instead.
    fn create_indices_for_new_experiment(&self, draft: &NewExperiment) -> RepoResult<()>;
    /// Rebuilds every index entry of one experiment from its stored row.
    fn reindex_experiment(&self, id: ExperimentId) -> RepoResult<Experiment>;
    fn get_experiment(&self, id: ExperimentId) -> RepoResult<Option<Experiment>>;
    fn get_experiment_by_label(
        &self,
        application: &ApplicationName,
        label: &ExperimentLabel,
    ) -> RepoResult<Option<Experiment>>;
    /// Live experiments of one application: neither terminated nor deleted.
    fn get_experiment_list(&self, application: &ApplicationName) -> RepoResult<ExperimentTable>;
    /// Ids of every experiment that is not deleted.
    fn get_experiments(&self) -> RepoResult<Vec<ExperimentId>>;
    /// Loads `ids` in request order; unknown ids are skipped, repeated ids repeat.
    fn get_experiments_by_ids(&self, ids: &[ExperimentId]) -> RepoResult<ExperimentList>;
    /// Overwrites mutable attributes and returns the stored result.
    fn update_experiment(&self, experiment: &Experiment) -> RepoResult<Experiment>;
    /// Moves the experiment to `state` and re-files its index entries.
    ///
    /// The state write only lands if the row still holds the state that was
    /// checked; otherwise `ConstraintViolation` and the indices stay put.
    fn update_experiment_state(
        &self,
        experiment: &Experiment,
        state: ExperimentState,
    ) -> RepoResult<Experiment>;
    fn get_applications_list(&self) -> RepoResult<Vec<ApplicationName>>;
    fn create_application(&self, name: &ApplicationName) -> RepoResult<()>;
}

impl ExperimentRepository for IndexedExperimentRepository {
    fn create_experiment(&self, draft: &NewExperiment) -> RepoResult<ExperimentId> {
        let experiment = draft.to_experiment(now_millis())?;
        let store = self.experiments.get()?;

        if !store.insert_if_absent(&experiment)? {
            warn!(
                "event=experiment_create module=repo status=conflict experiment_id={}",
                experiment.id
            );
            return Err(RepoError::ConstraintViolation(format!(
                "experiment {} already exists",
                experiment.id
            )));
        }

        info!(
            "event=experiment_create module=repo status=ok experiment_id={} app={} label={}",
            experiment.id, experiment.application_name, experiment.label
        );
        Ok(experiment.id)
    }

    fn create_indices_for_new_experiment(&self, draft: &NewExperiment) -> RepoResult<()> {
        let id = draft.id.unwrap_or_else(ExperimentId::nil);
        require_key(id.is_absent(), "experiment id")?;
        let Some(label) = draft.label.as_ref().filter(|label| !label.is_absent()) else {
            return Err(RepoError::InvalidArgument(
                "experiment label is required".to_string(),
            ));
        };
        draft.application_name.validate()?;
        label.validate()?;

        let label_index = self.label_index.get()?;
        let state_index = self.state_index.get()?;
        let store = self.experiments.get()?;

        if let Some(stored) = store.get(id)? {
            if stored.state != ExperimentState::Draft {
                debug!(
                    "event=experiment_index module=repo status=reindex experiment_id={id} state={}",
                    stored.state
                );
                return self.reindex_experiment(id).map(|_| ());
            }
        }

        let owner = label_index.insert_if_absent(&draft.application_name, label, id)?;
        if owner != id {
            warn!(
                "event=experiment_index module=repo status=conflict app={} label={} owner={owner}",
                draft.application_name, label
            );
            return Err(RepoError::ConstraintViolation(format!(
                "label `{label}` in application `{}` belongs to experiment {owner}",
                draft.application_name
            )));
        }
        state_index.insert(ExperimentState::Draft, id)?;

        info!("event=experiment_index module=repo status=ok experiment_id={id}");
        Ok(())
    }

    fn reindex_experiment(&self, id: ExperimentId) -> RepoResult<Experiment> {
        require_key(id.is_absent(), "experiment id")?;
        let store = self.experiments.get()?;
        let label_index = self.label_index.get()?;
        let state_index = self.state_index.get()?;

        let experiment = store
            .get(id)?
            .ok_or_else(|| RepoError::not_found("experiment", id))?;

        state_index.insert(experiment.state, id)?;
        for state in ExperimentState::ALL {
            if state != experiment.state {
                state_index.delete(state, id)?;
            }
        }

        let app = &experiment.application_name;
        if experiment.state == ExperimentState::Deleted {
            if label_index.get(app, &experiment.label)? == Some(id) {
                label_index.delete(app, &experiment.label)?;
            }
        } else {
            let owner = label_index.insert_if_absent(app, &experiment.label, id)?;
            if owner != id {
                return Err(RepoError::ConstraintViolation(format!(
                    "label `{}` in application `{app}` belongs to experiment {owner}",
                    experiment.label
                )));
            }
        }

        info!(
            "event=experiment_reindex module=repo status=ok experiment_id={id} state={}",
            experiment.state
        );
        Ok(experiment)
    }

    fn get_experiment(&self, id: ExperimentId) -> RepoResult<Option<Experiment>> {
        require_key(id.is_absent(), "experiment id")?;
        self.experiments.get()?.get(id)
    }

    fn get_experiment_by_label(
        &self,
        application: &ApplicationName,
        label: &ExperimentLabel,
    ) -> RepoResult<Option<Experiment>> {
        require_key(application.is_absent(), "application name")?;
        require_key(label.is_absent(), "experiment label")?;
        let label_index = self.label_index.get()?;
        let store = self.experiments.get()?;

        let Some(id) = label_index.get(application, label)? else {
            return Ok(None);
        };
        let experiment = store.get(id)?;
        if experiment.is_none() {
            warn!(
                "event=experiment_lookup module=repo status=dangling_index app={application} label={label} experiment_id={id}"
            );
        }
        Ok(experiment)
    }

    fn get_experiment_list(&self, application: &ApplicationName) -> RepoResult<ExperimentTable> {
        require_key(application.is_absent(), "application name")?;
        let label_index = self.label_index.get()?;
        let store = self.experiments.get()?;

        let ids: Vec<ExperimentId> = label_index
            .list_by_application(application)?
            .into_iter()
            .map(|(_, id)| id)
            .collect();
        let experiments = store.get_many(&ids)?;
        if experiments.len() != ids.len() {
            warn!(
                "event=experiment_list module=repo status=dangling_index app={application} indexed={} found={}",
                ids.len(),
                experiments.len()
            );
        }

        let mut table = ExperimentTable::new();
        for experiment in experiments {
            if !experiment.state.is_terminal() {
                table.insert(experiment);
            }
        }
        Ok(table)
    }

    fn get_experiments(&self) -> RepoResult<Vec<ExperimentId>> {
        let state_index = self.state_index.get()?;

        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for state in ExperimentState::ALL {
            if state == ExperimentState::Deleted {
                continue;
            }
            for id in state_index.list_by_state(state)? {
                if seen.insert(id) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }

    fn get_experiments_by_ids(&self, ids: &[ExperimentId]) -> RepoResult<ExperimentList> {
        if ids.iter().any(ExperimentId::is_absent) {
            return Err(RepoError::InvalidArgument(
                "experiment id list contains an absent id".to_string(),
            ));
        }
        self.experiments.get()?.get_many(ids)
    }

    fn update_experiment(&self, experiment: &Experiment) -> RepoResult<Experiment> {
        require_key(experiment.id.is_absent(), "experiment id")?;
        experiment.validate()?;
        let store = self.experiments.get()?;

        let mut next = experiment.clone();
        next.modified_at = now_millis();
        if !store.update(&next)? {
            return Err(RepoError::not_found("experiment", experiment.id));
        }

        info!(
            "event=experiment_update module=repo status=ok experiment_id={}",
            experiment.id
        );
        store
            .get(experiment.id)?
            .ok_or_else(|| RepoError::not_found("experiment", experiment.id))
    }

    fn update_experiment_state(
        &self,
        experiment: &Experiment,
        state: ExperimentState,
    ) -> RepoResult<Experiment> {
        let id = experiment.id;
        require_key(id.is_absent(), "experiment id")?;
        let store = self.experiments.get()?;
        let state_index = self.state_index.get()?;
        let label_index = self.label_index.get()?;

        let current = store
            .get(id)?
            .ok_or_else(|| RepoError::not_found("experiment", id))?;
        current.state.check_transition(state)?;

        let modified_at = now_millis();
        if !store.update_state(id, current.state, state, modified_at)? {
            let Some(latest) = store.get(id)? else {
                return Err(RepoError::not_found("experiment", id));
            };
            warn!(
                "event=experiment_state_update module=repo status=conflict experiment_id={id} expected={} found={}",
                current.state, latest.state
            );
            return Err(RepoError::ConstraintViolation(format!(
                "experiment {id} moved from {} to {} during the update to {state}",
                current.state, latest.state
            )));
        }

        // New entry goes in before the old one comes out.
        if current.state != state {
            state_index.insert(state, id)?;
            state_index.delete(current.state, id)?;
        }
        if state == ExperimentState::Deleted
            && label_index.get(&current.application_name, &current.label)? == Some(id)
        {
            label_index.delete(&current.application_name, &current.label)?;
        }

        info!(
            "event=experiment_state_update module=repo status=ok experiment_id={id} from={} to={state}",
            current.state
        );
        Ok(Experiment {
            state,
            modified_at,
            ..current
        })
    }

    fn get_applications_list(&self) -> RepoResult<Vec<ApplicationName>> {
        self.applications.get()?.list()
    }

    fn create_application(&self, name: &ApplicationName) -> RepoResult<()> {
        require_key(name.is_absent(), "application name")?;
        name.validate()?;
        self.applications.get()?.insert(name)?;
        info!("event=application_create module=repo status=ok app={name}");
        Ok(())
    }
}
