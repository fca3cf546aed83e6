mod common;

use std::sync::Arc;

use common::*;
use somata_core::detection::ModelRegistry;
use somata_core::io::PlaneLock;
use somata_core::pipeline::{EntryPoint, Orchestrator, RunRequest};
use somata_core::{load_session, PipelineConfig, SomataError};
use tempfile::TempDir;

fn fixed_orchestrator(config: &PipelineConfig, model: &Arc<FixedModel>) -> Orchestrator {
    Orchestrator::new(config).with_models(ModelRegistry::default().with_soma_model(model.clone()))
}

fn open(config: &PipelineConfig) -> somata_core::curation::CurationState {
    load_session(config.save_path.as_deref().unwrap(), &config.save_folder).unwrap()
}

#[test]
fn test_override_survives_reclassification() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    let session = memory_session(moving_blobs(12, &CELLS), &config);
    let model = Arc::new(FixedModel::new(5));
    let orchestrator = fixed_orchestrator(&config, &model);
    orchestrator.run(&session, &config, &RunRequest::default()).unwrap();

    let mut state = open(&config);
    state.set_override(0, 3, false).unwrap();
    assert!(!state.get_effective_label(0, 3).unwrap());

    // Threshold 0 would otherwise make every candidate a cell.
    config.cell_probability_threshold = 0.0;
    let report = orchestrator
        .run(&session, &config, &RunRequest::new(EntryPoint::Classification))
        .unwrap();
    let labels = &report.plane(0).unwrap().effective_labels;
    assert_eq!(labels, &vec![true, true, true, false, true]);

    let state = open(&config);
    assert!(!state.get_effective_label(0, 3).unwrap());
    assert!(state.get_effective_label(0, 2).unwrap());
    assert_eq!(state.plane(0).unwrap().curation.overrides.len(), 1);
}

#[test]
fn test_override_survives_identical_redetection() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let session = memory_session(moving_blobs(12, &CELLS), &config);
    let model = Arc::new(FixedModel::new(6));
    let orchestrator = fixed_orchestrator(&config, &model);
    orchestrator.run(&session, &config, &RunRequest::default()).unwrap();

    let mut state = open(&config);
    state.set_override(0, 5, true).unwrap();

    let report = orchestrator
        .run(&session, &config, &RunRequest::new(EntryPoint::Detection))
        .unwrap();
    assert_eq!(report.plane(0).unwrap().quarantined_overrides, 0);
    let state = open(&config);
    assert!(state.plane(0).unwrap().curation.overrides[&5].is_cell);
}

#[test]
fn test_changed_detection_quarantines_overrides() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let session = memory_session(moving_blobs(12, &CELLS), &config);
    let model = Arc::new(FixedModel::new(10));
    let orchestrator = fixed_orchestrator(&config, &model);
    orchestrator.run(&session, &config, &RunRequest::default()).unwrap();

    let mut state = open(&config);
    state.set_override(0, 2, false).unwrap();
    state.set_override(0, 8, true).unwrap();

    model.set_count(7);
    let report = orchestrator
        .run(&session, &config, &RunRequest::new(EntryPoint::Detection))
        .unwrap();
    let plane = report.plane(0).unwrap();
    assert_eq!(plane.candidate_count, 7);
    assert_eq!(plane.quarantined_overrides, 2);

    let mut state = open(&config);
    let curated = state.plane(0).unwrap();
    assert!(curated.curation.overrides.is_empty());
    let batches = state.quarantined(0).unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].candidate_count, 10);
    assert_eq!(batches[0].new_candidate_count, 7);
    assert_eq!(batches[0].out_of_range(), vec![8]);

    // Index 8 no longer exists, so the batch cannot be restored as is.
    assert!(matches!(
        state.restore_quarantine(0),
        Err(SomataError::IndexOutOfRange { index: 8, count: 7, .. })
    ));
    assert_eq!(state.dismiss_quarantine(0).unwrap(), 2);
    assert!(open(&config).quarantined(0).unwrap().is_empty());
}

#[test]
fn test_restore_quarantine_after_reorder() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let session = memory_session(moving_blobs(12, &CELLS), &config);
    let model = Arc::new(FixedModel::new(4));
    let orchestrator = fixed_orchestrator(&config, &model);
    orchestrator.run(&session, &config, &RunRequest::default()).unwrap();

    let mut state = open(&config);
    state.set_override(0, 1, false).unwrap();

    model.set_count(5);
    orchestrator
        .run(&session, &config, &RunRequest::new(EntryPoint::Detection))
        .unwrap();

    let mut state = open(&config);
    assert_eq!(state.restore_quarantine(0).unwrap(), 1);
    assert!(!state.get_effective_label(0, 1).unwrap());
    let state = open(&config);
    assert!(state.quarantined(0).unwrap().is_empty());
    assert!(!state.plane(0).unwrap().curation.overrides[&1].is_cell);
}

#[test]
fn test_override_index_is_checked() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let session = memory_session(moving_blobs(12, &CELLS), &config);
    let model = Arc::new(FixedModel::new(3));
    fixed_orchestrator(&config, &model)
        .run(&session, &config, &RunRequest::default())
        .unwrap();

    let mut state = open(&config);
    assert!(matches!(
        state.set_override(0, 3, true),
        Err(SomataError::IndexOutOfRange { index: 3, count: 3, .. })
    ));
    assert!(matches!(
        state.set_override(4, 0, true),
        Err(SomataError::UnknownPlane(4))
    ));
    assert!(!state.clear_override(0, 1).unwrap());
}

#[test]
fn test_curation_waits_for_no_run() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let session = memory_session(moving_blobs(12, &CELLS), &config);
    let model = Arc::new(FixedModel::new(3));
    fixed_orchestrator(&config, &model)
        .run(&session, &config, &RunRequest::default())
        .unwrap();

    let mut state = open(&config);
    let lock = PlaneLock::acquire(&state.layout().lock_path(0), 0).unwrap();
    assert!(matches!(
        state.set_override(0, 0, true),
        Err(SomataError::RunInProgress { plane: 0, .. })
    ));
    drop(lock);
    state.set_override(0, 0, true).unwrap();
    assert!(open(&config).get_effective_label(0, 0).unwrap());
}

#[test]
fn test_load_session_without_results_is_empty() {
    let dir = TempDir::new().unwrap();
    let state = load_session(dir.path(), "somata").unwrap();
    assert_eq!(state.plane_indices().count(), 0);
    assert!(matches!(state.plane(0), Err(SomataError::UnknownPlane(0))));
}
