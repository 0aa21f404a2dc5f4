use splitstore_core::db::{DbError, Store};
use splitstore_core::{
    ApplicationName, ExperimentId, ExperimentLabel, ExperimentRepository, ExperimentState,
    IndexedExperimentRepository, NewExperiment, RepoError, RepoErrorKind,
};
use std::sync::Arc;
use std::thread;

fn repository() -> (Store, IndexedExperimentRepository) {
    let store = Store::open_in_memory().unwrap();
    let repo = IndexedExperimentRepository::sqlite(&store);
    (store, repo)
}

fn create_indexed(repo: &IndexedExperimentRepository, app: &str, label: &str) -> ExperimentId {
    let draft = NewExperiment::new(app, label);
    let id = repo.create_experiment(&draft).unwrap();
    repo.create_indices_for_new_experiment(&draft).unwrap();
    id
}

fn advance(repo: &IndexedExperimentRepository, id: ExperimentId, state: ExperimentState) {
    let current = repo.get_experiment(id).unwrap().unwrap();
    repo.update_experiment_state(&current, state).unwrap();
}

#[test]
fn create_and_get_roundtrip() {
    let (_store, repo) = repository();
    let mut draft = NewExperiment::new("shop", "checkout_button");
    draft.description = Some("bigger button".to_string());
    draft.sampling_percent = 0.25;

    let id = repo.create_experiment(&draft).unwrap();
    assert_eq!(Some(id), draft.id);

    let loaded = repo.get_experiment(id).unwrap().unwrap();
    assert_eq!(loaded.application_name, ApplicationName::new("shop"));
    assert_eq!(loaded.label, ExperimentLabel::new("checkout_button"));
    assert_eq!(loaded.description.as_deref(), Some("bigger button"));
    assert_eq!(loaded.sampling_percent, 0.25);
    assert_eq!(loaded.state, ExperimentState::Draft);
    assert_eq!(loaded.start_time, draft.start_time);
}

#[test]
fn create_experiment_twice_with_same_id_is_constraint_violation() {
    let (_store, repo) = repository();
    let draft = NewExperiment::new("shop", "checkout_button");
    repo.create_experiment(&draft).unwrap();

    let err = repo.create_experiment(&draft).unwrap_err();
    assert_eq!(err.kind(), RepoErrorKind::ConstraintViolation);
}

#[test]
fn create_experiment_without_id_or_label_is_invalid_argument() {
    let (_store, repo) = repository();

    let mut no_id = NewExperiment::new("shop", "checkout_button");
    no_id.id = None;
    assert!(matches!(
        repo.create_experiment(&no_id),
        Err(RepoError::InvalidArgument(_))
    ));

    let mut nil_id = NewExperiment::new("shop", "checkout_button");
    nil_id.id = Some(ExperimentId::nil());
    assert!(matches!(
        repo.create_experiment(&nil_id),
        Err(RepoError::InvalidArgument(_))
    ));

    let mut no_label = NewExperiment::new("shop", "checkout_button");
    no_label.label = None;
    assert!(matches!(
        repo.create_experiment(&no_label),
        Err(RepoError::InvalidArgument(_))
    ));
    assert!(matches!(
        repo.create_indices_for_new_experiment(&no_label),
        Err(RepoError::InvalidArgument(_))
    ));
}

#[test]
fn create_experiment_rejects_invalid_label_and_window() {
    let (_store, repo) = repository();

    let bad_label = NewExperiment::new("shop", "9lives");
    assert!(matches!(
        repo.create_experiment(&bad_label),
        Err(RepoError::InvalidArgument(_))
    ));

    let mut bad_window = NewExperiment::new("shop", "window");
    bad_window.end_time = bad_window.start_time - chrono::Duration::days(1);
    assert!(matches!(
        repo.create_experiment(&bad_window),
        Err(RepoError::InvalidArgument(_))
    ));
}

#[test]
fn create_experiment_does_not_index() {
    let (_store, repo) = repository();
    let draft = NewExperiment::new("shop", "checkout_button");
    let id = repo.create_experiment(&draft).unwrap();

    assert!(repo.get_experiment(id).unwrap().is_some());
    assert!(repo
        .get_experiment_by_label(&ApplicationName::new("shop"), &ExperimentLabel::new("checkout_button"))
        .unwrap()
        .is_none());
    assert!(repo.get_experiments().unwrap().is_empty());
}

#[test]
fn indices_resolve_by_label_and_state() {
    let (_store, repo) = repository();
    let id = create_indexed(&repo, "shop", "checkout_button");

    let by_label = repo
        .get_experiment_by_label(&ApplicationName::new("shop"), &ExperimentLabel::new("checkout_button"))
        .unwrap()
        .unwrap();
    assert_eq!(by_label.id, id);
    assert_eq!(repo.get_experiments().unwrap(), vec![id]);
}

#[test]
fn create_indices_is_idempotent_for_same_draft() {
    let (_store, repo) = repository();
    let draft = NewExperiment::new("shop", "checkout_button");
    repo.create_experiment(&draft).unwrap();

    repo.create_indices_for_new_experiment(&draft).unwrap();
    repo.create_indices_for_new_experiment(&draft).unwrap();

    assert_eq!(repo.get_experiments().unwrap().len(), 1);
    assert_eq!(
        repo.get_experiment_list(&ApplicationName::new("shop"))
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn rerunning_index_creation_after_state_change_keeps_one_state_entry() {
    let (store, repo) = repository();
    let draft = NewExperiment::new("shop", "checkout_button");
    let id = repo.create_experiment(&draft).unwrap();
    repo.create_indices_for_new_experiment(&draft).unwrap();
    advance(&repo, id, ExperimentState::Running);

    repo.create_indices_for_new_experiment(&draft).unwrap();
    assert_eq!(state_index_keys(&store, id), vec!["RUNNING"]);

    let discarded = NewExperiment::new("shop", "banner");
    let discarded_id = repo.create_experiment(&discarded).unwrap();
    repo.create_indices_for_new_experiment(&discarded).unwrap();
    advance(&repo, discarded_id, ExperimentState::Deleted);

    repo.create_indices_for_new_experiment(&discarded).unwrap();
    assert_eq!(state_index_keys(&store, discarded_id), vec!["DELETED"]);
    assert!(repo
        .get_experiment_by_label(&ApplicationName::new("shop"), &ExperimentLabel::new("banner"))
        .unwrap()
        .is_none());
}

#[test]
fn label_is_unique_within_application_only() {
    let (_store, repo) = repository();
    create_indexed(&repo, "shop", "checkout_button");

    let duplicate = NewExperiment::new("shop", "checkout_button");
    repo.create_experiment(&duplicate).unwrap();
    let err = repo.create_indices_for_new_experiment(&duplicate).unwrap_err();
    assert_eq!(err.kind(), RepoErrorKind::ConstraintViolation);

    create_indexed(&repo, "blog", "checkout_button");
}

#[test]
fn experiment_list_drops_terminated_but_id_lookup_keeps_it() {
    let (_store, repo) = repository();
    let app = ApplicationName::new("shop");
    let first = create_indexed(&repo, "shop", "first");
    let second = create_indexed(&repo, "shop", "second");

    let table = repo.get_experiment_list(&app).unwrap();
    assert_eq!(table.len(), 2);
    assert!(table.contains_id(first));
    assert!(table.get(second, &ExperimentLabel::new("second")).is_some());

    advance(&repo, first, ExperimentState::Running);
    advance(&repo, first, ExperimentState::Terminated);

    let table = repo.get_experiment_list(&app).unwrap();
    assert_eq!(table.len(), 1);
    assert!(!table.contains_id(first));
    assert_eq!(
        repo.get_experiment(first).unwrap().unwrap().state,
        ExperimentState::Terminated
    );
}

#[test]
fn state_change_moves_state_index_entry() {
    let (store, repo) = repository();
    let id = create_indexed(&repo, "shop", "checkout_button");

    advance(&repo, id, ExperimentState::Running);
    assert_eq!(state_index_keys(&store, id), vec!["RUNNING".to_string()]);

    advance(&repo, id, ExperimentState::Paused);
    assert_eq!(state_index_keys(&store, id), vec!["PAUSED".to_string()]);
    assert_eq!(repo.get_experiments().unwrap(), vec![id]);
}

#[test]
fn same_state_transition_is_accepted() {
    let (store, repo) = repository();
    let id = create_indexed(&repo, "shop", "checkout_button");

    let current = repo.get_experiment(id).unwrap().unwrap();
    let updated = repo
        .update_experiment_state(&current, ExperimentState::Draft)
        .unwrap();
    assert_eq!(updated.state, ExperimentState::Draft);
    assert_eq!(state_index_keys(&store, id), vec!["DRAFT".to_string()]);
}

#[test]
fn illegal_transition_is_rejected_without_writes() {
    let (store, repo) = repository();
    let id = create_indexed(&repo, "shop", "checkout_button");

    let current = repo.get_experiment(id).unwrap().unwrap();
    let err = repo
        .update_experiment_state(&current, ExperimentState::Terminated)
        .unwrap_err();
    assert_eq!(err.kind(), RepoErrorKind::InvalidArgument);
    assert_eq!(
        repo.get_experiment(id).unwrap().unwrap().state,
        ExperimentState::Draft
    );
    assert_eq!(state_index_keys(&store, id), vec!["DRAFT".to_string()]);
}

#[test]
fn terminal_states_cannot_be_left() {
    let (_store, repo) = repository();
    let id = create_indexed(&repo, "shop", "checkout_button");
    advance(&repo, id, ExperimentState::Running);
    advance(&repo, id, ExperimentState::Terminated);

    let current = repo.get_experiment(id).unwrap().unwrap();
    let err = repo
        .update_experiment_state(&current, ExperimentState::Running)
        .unwrap_err();
    assert_eq!(err.kind(), RepoErrorKind::InvalidArgument);
}

#[test]
fn deleting_frees_label_and_hides_from_every_listing() {
    let (_store, repo) = repository();
    let app = ApplicationName::new("shop");
    let label = ExperimentLabel::new("checkout_button");
    let id = create_indexed(&repo, "shop", "checkout_button");

    advance(&repo, id, ExperimentState::Deleted);

    assert!(repo.get_experiment_by_label(&app, &label).unwrap().is_none());
    assert!(repo.get_experiment_list(&app).unwrap().is_empty());
    assert!(repo.get_experiments().unwrap().is_empty());
    assert_eq!(
        repo.get_experiment(id).unwrap().unwrap().state,
        ExperimentState::Deleted
    );

    let replacement = create_indexed(&repo, "shop", "checkout_button");
    assert_eq!(
        repo.get_experiment_by_label(&app, &label).unwrap().unwrap().id,
        replacement
    );
}

#[test]
fn update_experiment_overwrites_mutable_fields_only() {
    let (_store, repo) = repository();
    let id = create_indexed(&repo, "shop", "checkout_button");
    advance(&repo, id, ExperimentState::Running);

    let mut changed = repo.get_experiment(id).unwrap().unwrap();
    changed.description = Some("new copy".to_string());
    changed.sampling_percent = 0.5;
    changed.state = ExperimentState::Paused;
    changed.label = ExperimentLabel::new("renamed");

    let updated = repo.update_experiment(&changed).unwrap();
    assert_eq!(updated.description.as_deref(), Some("new copy"));
    assert_eq!(updated.sampling_percent, 0.5);
    assert_eq!(updated.state, ExperimentState::Running);
    assert_eq!(updated.label, ExperimentLabel::new("checkout_button"));
    assert!(updated.modified_at >= updated.created_at);
}

#[test]
fn update_missing_experiment_is_not_found() {
    let (_store, repo) = repository();
    let ghost = NewExperiment::new("shop", "ghost")
        .to_experiment(chrono::Utc::now())
        .unwrap();

    assert_eq!(
        repo.update_experiment(&ghost).unwrap_err().kind(),
        RepoErrorKind::NotFound
    );
    assert_eq!(
        repo.update_experiment_state(&ghost, ExperimentState::Running)
            .unwrap_err()
            .kind(),
        RepoErrorKind::NotFound
    );
}

#[test]
fn get_experiments_by_ids_keeps_request_order_and_skips_unknown() {
    let (_store, repo) = repository();
    let first = create_indexed(&repo, "shop", "first");
    let second = create_indexed(&repo, "shop", "second");

    let loaded = repo
        .get_experiments_by_ids(&[second, ExperimentId::new(), first])
        .unwrap();
    let ids: Vec<ExperimentId> = loaded.iter().map(|experiment| experiment.id).collect();
    assert_eq!(ids, vec![second, first]);
    assert!(repo.get_experiments_by_ids(&[]).unwrap().is_empty());
}

#[test]
fn get_experiments_by_ids_repeats_repeated_ids() {
    let (_store, repo) = repository();
    let id = create_indexed(&repo, "shop", "checkout_button");

    let loaded = repo.get_experiments_by_ids(&[id, id]).unwrap();
    let ids: Vec<ExperimentId> = loaded.iter().map(|experiment| experiment.id).collect();
    assert_eq!(ids, vec![id, id]);
}

#[test]
fn get_experiments_by_ids_handles_lists_beyond_one_statement() {
    let (_store, repo) = repository();
    let known = create_indexed(&repo, "shop", "checkout_button");
    let mut ids: Vec<ExperimentId> = (0..40_000).map(|_| ExperimentId::new()).collect();
    ids.push(known);

    let loaded = repo.get_experiments_by_ids(&ids).unwrap();
    let found: Vec<ExperimentId> = loaded.iter().map(|experiment| experiment.id).collect();
    assert_eq!(found, vec![known]);
}

#[test]
fn reads_with_absent_keys_are_invalid_argument() {
    let (_store, repo) = repository();
    let app = ApplicationName::new("shop");
    let label = ExperimentLabel::new("checkout_button");

    let results = [
        repo.get_experiment(ExperimentId::nil()).map(|_| ()),
        repo.get_experiment_by_label(&ApplicationName::new(""), &label)
            .map(|_| ()),
        repo.get_experiment_by_label(&app, &ExperimentLabel::new("  "))
            .map(|_| ()),
        repo.get_experiment_list(&ApplicationName::new("")).map(|_| ()),
        repo.get_experiments_by_ids(&[ExperimentId::nil()]).map(|_| ()),
        repo.reindex_experiment(ExperimentId::nil()).map(|_| ()),
    ];
    for result in results {
        assert_eq!(result.unwrap_err().kind(), RepoErrorKind::InvalidArgument);
    }
}

#[test]
fn applications_are_sorted_and_idempotent() {
    let (_store, repo) = repository();
    repo.create_application(&ApplicationName::new("shop")).unwrap();
    repo.create_application(&ApplicationName::new("blog")).unwrap();
    repo.create_application(&ApplicationName::new("shop")).unwrap();

    assert_eq!(
        repo.get_applications_list().unwrap(),
        vec![ApplicationName::new("blog"), ApplicationName::new("shop")]
    );
    assert_eq!(
        repo.create_application(&ApplicationName::new(""))
            .unwrap_err()
            .kind(),
        RepoErrorKind::InvalidArgument
    );
}

#[test]
fn reindex_repairs_stale_and_missing_entries() {
    let (store, repo) = repository();
    let draft = NewExperiment::new("shop", "checkout_button");
    let id = repo.create_experiment(&draft).unwrap();
    store
        .with_conn(|conn| {
            conn.execute(
                "UPDATE experiment SET state = 'RUNNING' WHERE experiment_id = ?1;",
                [id.to_string()],
            )?;
            conn.execute(
                "INSERT INTO experiment_state_index (index_key, experiment_id) VALUES ('PAUSED', ?1);",
                [id.to_string()],
            )?;
            Ok::<_, DbError>(())
        })
        .unwrap();

    let repaired = repo.reindex_experiment(id).unwrap();
    assert_eq!(repaired.state, ExperimentState::Running);
    assert_eq!(state_index_keys(&store, id), vec!["RUNNING".to_string()]);
    assert_eq!(
        repo.get_experiment_by_label(&ApplicationName::new("shop"), &ExperimentLabel::new("checkout_button"))
            .unwrap()
            .unwrap()
            .id,
        id
    );

    repo.reindex_experiment(id).unwrap();
    assert_eq!(state_index_keys(&store, id), vec!["RUNNING".to_string()]);
}

#[test]
fn reindex_of_unknown_experiment_is_not_found() {
    let (_store, repo) = repository();
    assert_eq!(
        repo.reindex_experiment(ExperimentId::new())
            .unwrap_err()
            .kind(),
        RepoErrorKind::NotFound
    );
}

#[test]
fn dangling_label_index_entry_is_skipped() {
    let (store, repo) = repository();
    let live = create_indexed(&repo, "shop", "live");
    store
        .with_conn(|conn| {
            conn.execute(
                "INSERT INTO experiment_label_index (app_name, label, experiment_id)
                 VALUES ('shop', 'orphan', ?1);",
                [ExperimentId::new().to_string()],
            )?;
            Ok::<_, DbError>(())
        })
        .unwrap();

    let table = repo.get_experiment_list(&ApplicationName::new("shop")).unwrap();
    assert_eq!(table.len(), 1);
    assert!(table.contains_id(live));
    assert!(repo
        .get_experiment_by_label(&ApplicationName::new("shop"), &ExperimentLabel::new("orphan"))
        .unwrap()
        .is_none());
}

#[test]
fn concurrent_label_claims_admit_exactly_one_owner() {
    let (_store, repo) = repository();
    let repo = Arc::new(repo);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let repo = Arc::clone(&repo);
            thread::spawn(move || {
                let draft = NewExperiment::new("shop", "contested");
                repo.create_experiment(&draft).unwrap();
                repo.create_indices_for_new_experiment(&draft)
            })
        })
        .collect();
    let results: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();

    let winners = results.iter().filter(|result| result.is_ok()).count();
    assert_eq!(winners, 1);
    for result in results.iter().filter(|result| result.is_err()) {
        assert_eq!(
            result.as_ref().unwrap_err().kind(),
            RepoErrorKind::ConstraintViolation
        );
    }
    assert_eq!(repo.get_experiments().unwrap().len(), 1);
}

#[test]
fn concurrent_creation_of_distinct_labels_all_succeed() {
    let (_store, repo) = repository();
    let repo = Arc::new(repo);

    let handles: Vec<_> = (0..8)
        .map(|n| {
            let repo = Arc::clone(&repo);
            thread::spawn(move || create_indexed(&repo, "shop", &format!("label_{n}")))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(
        repo.get_experiment_list(&ApplicationName::new("shop"))
            .unwrap()
            .len(),
        8
    );
}

fn state_index_keys(store: &Store, id: ExperimentId) -> Vec<String> {
    store
        .with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT index_key FROM experiment_state_index
                 WHERE experiment_id = ?1 ORDER BY index_key;",
            )?;
            let keys = stmt
                .query_map([id.to_string()], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok::<_, DbError>(keys)
        })
        .unwrap()
}
