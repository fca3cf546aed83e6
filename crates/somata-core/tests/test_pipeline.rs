mod common;

use std::fs;
use std::sync::Arc;

use common::*;
use somata_core::detection::ModelRegistry;
use somata_core::io::{OutputLayout, PlaneLock};
use somata_core::pipeline::{
    CancelToken, EntryPoint, Orchestrator, PipelineStage, PlaneState, RegistrationStatus,
    RunRequest,
};
use somata_core::results::PlaneResults;
use somata_core::{run_pipeline, SomataError};
use tempfile::TempDir;

fn layout(config: &somata_core::PipelineConfig) -> OutputLayout {
    OutputLayout::new(config.save_path.as_deref().unwrap(), &config.save_folder)
}

#[test]
fn test_full_run_detects_every_cell() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let session = memory_session(moving_blobs(24, &CELLS), &config);

    let report = run_pipeline(&session, &config).unwrap();
    let plane = report.plane(0).unwrap();
    assert_eq!(plane.state, PlaneState::Curated);
    assert_eq!(plane.candidate_count, CELLS.len());
    assert_eq!(plane.effective_labels.len(), CELLS.len());
    assert_eq!(plane.low_confidence_frames, 0);
    assert!(matches!(plane.registration, RegistrationStatus::Computed(_)));

    let results = PlaneResults::load(&layout(&config).candidates_path(0))
        .unwrap()
        .unwrap();
    for &(r, c) in &CELLS {
        assert!(
            results.detection.candidates.iter().any(|cand| {
                (cand.centroid.0 - r).abs() < 3.0 && (cand.centroid.1 - c).abs() < 3.0
            }),
            "no candidate near ({r}, {c})"
        );
    }
    // Ordered by centroid row, then column.
    let rows: Vec<f64> = results.detection.candidates.iter().map(|c| c.centroid.0).collect();
    assert!(rows.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn test_rerun_is_byte_identical() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let session = memory_session(moving_blobs(24, &CELLS), &config);
    let layout = layout(&config);

    run_pipeline(&session, &config).unwrap();
    let volume = fs::read(layout.volume_path(0)).unwrap();
    let first = PlaneResults::load(&layout.candidates_path(0)).unwrap().unwrap();

    let report = Orchestrator::new(&config)
        .run(&session, &config, &RunRequest::new(EntryPoint::ForceRegistration))
        .unwrap();
    assert_eq!(
        report.plane(0).unwrap().registration,
        RegistrationStatus::Computed("forced".into())
    );
    assert_eq!(fs::read(layout.volume_path(0)).unwrap(), volume);
    let second = PlaneResults::load(&layout.candidates_path(0)).unwrap().unwrap();
    assert_eq!(first.detection.fingerprint, second.detection.fingerprint);
    assert_eq!(first, second);
}

#[test]
fn test_valid_volume_is_reused() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let session = memory_session(moving_blobs(24, &CELLS), &config);
    let registrar = Arc::new(CountingRegistrar::default());
    let orchestrator = Orchestrator::new(&config).with_registrar(registrar.clone());

    orchestrator.run(&session, &config, &RunRequest::default()).unwrap();
    assert_eq!(registrar.calls(), 1);

    let report = orchestrator.run(&session, &config, &RunRequest::default()).unwrap();
    assert_eq!(registrar.calls(), 1);
    assert_eq!(report.plane(0).unwrap().registration, RegistrationStatus::Reused);

    orchestrator
        .run(&session, &config, &RunRequest::new(EntryPoint::Detection))
        .unwrap();
    assert_eq!(registrar.calls(), 1);

    orchestrator
        .run(&session, &config, &RunRequest::new(EntryPoint::ForceRegistration))
        .unwrap();
    assert_eq!(registrar.calls(), 2);
}

#[test]
fn test_registration_change_invalidates_volume() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    let session = memory_session(moving_blobs(24, &CELLS), &config);
    let registrar = Arc::new(CountingRegistrar::default());

    Orchestrator::new(&config)
        .with_registrar(registrar.clone())
        .run(&session, &config, &RunRequest::default())
        .unwrap();

    // Batch size only affects throughput.
    config.registration.batch_size = 3;
    Orchestrator::new(&config)
        .with_registrar(registrar.clone())
        .run(&session, &config, &RunRequest::default())
        .unwrap();
    assert_eq!(registrar.calls(), 1);

    config.registration.max_shift_fraction = 0.2;
    let report = Orchestrator::new(&config)
        .with_registrar(registrar.clone())
        .run(&session, &config, &RunRequest::default())
        .unwrap();
    assert_eq!(registrar.calls(), 2);
    assert_eq!(
        report.plane(0).unwrap().registration,
        RegistrationStatus::Computed("configuration changed".into())
    );
}

#[test]
fn test_classification_entry_skips_detection() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    let session = memory_session(moving_blobs(24, &CELLS), &config);
    let recorder = Arc::new(StateRecorder::default());
    let registrar = Arc::new(CountingRegistrar::default());

    run_pipeline(&session, &config).unwrap();

    config.cell_probability_threshold = 0.0;
    let report = Orchestrator::new(&config)
        .with_registrar(registrar.clone())
        .with_reporter(recorder.clone())
        .run(&session, &config, &RunRequest::new(EntryPoint::Classification))
        .unwrap();

    assert_eq!(registrar.calls(), 0);
    assert_eq!(
        recorder.states_of(0),
        vec![PlaneState::Classifying, PlaneState::Classified, PlaneState::Curated]
    );
    let plane = report.plane(0).unwrap();
    assert_eq!(plane.registration, RegistrationStatus::NotRun);
    // Threshold 0 labels every candidate a cell.
    assert_eq!(plane.cell_count(), plane.candidate_count);
}

#[test]
fn test_labels_follow_threshold() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.cell_probability_threshold = 0.999;
    let session = memory_session(moving_blobs(24, &CELLS), &config);
    let report = run_pipeline(&session, &config).unwrap();
    let plane = report.plane(0).unwrap();

    let results = PlaneResults::load(&layout(&config).candidates_path(0))
        .unwrap()
        .unwrap();
    assert_eq!(results.threshold, 0.999);
    let expected: Vec<bool> = results
        .classification
        .probabilities
        .iter()
        .map(|&p| p >= 0.999)
        .collect();
    assert_eq!(plane.effective_labels, expected);
}

#[test]
fn test_state_sequence_of_first_run() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let session = memory_session(moving_blobs(12, &CELLS), &config);
    let recorder = Arc::new(StateRecorder::default());

    Orchestrator::new(&config)
        .with_reporter(recorder.clone())
        .run(&session, &config, &RunRequest::default())
        .unwrap();

    assert_eq!(
        recorder.states_of(0),
        vec![
            PlaneState::Registering,
            PlaneState::Registered,
            PlaneState::Detecting,
            PlaneState::Detected,
            PlaneState::Classifying,
            PlaneState::Classified,
            PlaneState::Curated,
        ]
    );
}

#[test]
fn test_planes_are_split_from_interleaved_frames() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.nplanes = 2;
    let plane1_cells = [(20.0, 20.0), (40.0, 40.0)];
    let frames = interleave(&[moving_blobs(12, &CELLS), moving_blobs(12, &plane1_cells)]);
    let session = memory_session(frames, &config);
    assert_eq!(session.nplanes(), 2);
    assert_eq!(session.plane(1).unwrap().frame_count, 12);

    let report = run_pipeline(&session, &config).unwrap();
    assert!(report.all_succeeded());
    assert_eq!(report.plane(0).unwrap().candidate_count, CELLS.len());
    assert_eq!(report.plane(1).unwrap().candidate_count, plane1_cells.len());
    assert!(layout(&config).volume_path(1).exists());
}

#[test]
fn test_failed_plane_does_not_stop_others() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.nplanes = 2;
    let frames = interleave(&[moving_blobs(12, &CELLS), moving_blobs(12, &CELLS)]);
    let source = FlakySource {
        inner: somata_core::io::MemorySource::new(frames).unwrap(),
        modulus: 2,
        residue: 1,
    };
    let session = session_from(Arc::new(source), &config);

    let report = run_pipeline(&session, &config).unwrap();
    assert_eq!(report.plane(0).unwrap().state, PlaneState::Curated);
    match &report.plane(1).unwrap().state {
        PlaneState::Failed { stage, cause } => {
            assert_eq!(*stage, PipelineStage::Registration);
            assert!(cause.contains("I/O error"), "{cause}");
        }
        other => panic!("plane 1 should have failed, got {other}"),
    }
    assert!(!report.all_succeeded());
    assert!(!layout(&config).volume_path(1).exists());
    // The failed plane leaves no lock behind.
    assert!(!layout(&config).lock_path(1).exists());
}

#[test]
fn test_model_failure_is_attributed_to_detection() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let session = memory_session(moving_blobs(12, &CELLS), &config);
    let models = ModelRegistry::default().with_soma_model(Arc::new(BrokenModel));

    let report = Orchestrator::new(&config)
        .with_models(models)
        .run(&session, &config, &RunRequest::default())
        .unwrap();
    match &report.plane(0).unwrap().state {
        PlaneState::Failed { stage, cause } => {
            assert_eq!(*stage, PipelineStage::Detection);
            assert!(cause.contains("broken"), "{cause}");
        }
        other => panic!("expected failure, got {other}"),
    }
    // Registration completed before the model failed.
    assert!(layout(&config).volume_path(0).exists());
}

#[test]
fn test_concurrent_run_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let session = memory_session(moving_blobs(12, &CELLS), &config);
    let layout = layout(&config);

    let held = PlaneLock::acquire(&layout.lock_path(0), 0).unwrap();
    let err = run_pipeline(&session, &config).unwrap_err();
    assert!(matches!(err, SomataError::RunInProgress { plane: 0, .. }));
    assert!(!layout.candidates_path(0).exists());

    drop(held);
    assert!(run_pipeline(&session, &config).unwrap().all_succeeded());
}

#[test]
fn test_cancelled_registration_keeps_previous_volume() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let session = memory_session(moving_blobs(24, &CELLS), &config);
    let layout = layout(&config);

    run_pipeline(&session, &config).unwrap();
    let volume = fs::read(layout.volume_path(0)).unwrap();
    let results = fs::read(layout.candidates_path(0)).unwrap();

    let cancel = CancelToken::new();
    let report = Orchestrator::new(&config)
        .with_cancel_token(cancel.clone())
        .with_reporter(Arc::new(CancelOnProgress(cancel)))
        .run(&session, &config, &RunRequest::new(EntryPoint::ForceRegistration))
        .unwrap();

    match &report.plane(0).unwrap().state {
        PlaneState::Failed { stage, .. } => assert_eq!(*stage, PipelineStage::Registration),
        other => panic!("expected cancellation, got {other}"),
    }
    assert_eq!(fs::read(layout.volume_path(0)).unwrap(), volume);
    assert_eq!(fs::read(layout.candidates_path(0)).unwrap(), results);
    let leftovers: Vec<_> = fs::read_dir(layout.plane_dir(0))
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with(".tmp-"))
        .collect();
    assert!(leftovers.is_empty(), "temporary files left: {leftovers:?}");
}

#[test]
fn test_unknown_plane_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let session = memory_session(moving_blobs(12, &CELLS), &config);
    let err = Orchestrator::new(&config)
        .run(&session, &config, &RunRequest::default().with_planes(vec![3]))
        .unwrap_err();
    assert!(matches!(err, SomataError::UnknownPlane(3)));
}
