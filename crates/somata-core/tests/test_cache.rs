mod common;

use std::fs::{self, OpenOptions};
use std::sync::Arc;

use common::*;
use somata_core::cache::{self, CacheDecision, RecomputeReason};
use somata_core::io::OutputLayout;
use somata_core::pipeline::{Orchestrator, RegistrationStatus, RunRequest};
use somata_core::{run_pipeline, PipelineConfig, Session};
use tempfile::TempDir;

fn setup() -> (TempDir, PipelineConfig, Session, OutputLayout) {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let session = memory_session(moving_blobs(12, &CELLS), &config);
    let layout = OutputLayout::new(dir.path(), &config.save_folder);
    run_pipeline(&session, &config).unwrap();
    (dir, config, session, layout)
}

fn decision(session: &Session, config: &PipelineConfig, layout: &OutputLayout) -> CacheDecision {
    let plane = session.plane(0).unwrap();
    let signature = cache::run_signature(plane, session.interleave(), &config.registration).unwrap();
    cache::check(&layout.volume_path(0), plane, &signature)
}

#[test]
fn test_complete_volume_is_reused() {
    let (_dir, config, session, layout) = setup();
    let CacheDecision::Reuse(volume) = decision(&session, &config, &layout) else {
        panic!("expected reuse");
    };
    assert_eq!(volume.frame_count(), 12);
    assert_eq!(volume.metadata().shifts.len(), 12);
    assert_eq!(volume.metadata().mode, "rigid");
}

#[test]
fn test_missing_volume() {
    let (_dir, config, session, layout) = setup();
    fs::remove_file(layout.volume_path(0)).unwrap();
    assert!(matches!(
        decision(&session, &config, &layout),
        CacheDecision::Recompute(RecomputeReason::Missing)
    ));
}

#[test]
fn test_truncated_volume_is_rejected() {
    let (_dir, config, session, layout) = setup();
    let path = layout.volume_path(0);
    let len = fs::metadata(&path).unwrap().len();
    OpenOptions::new()
        .write(true)
        .open(&path)
        .unwrap()
        .set_len(len / 2)
        .unwrap();
    assert!(matches!(
        decision(&session, &config, &layout),
        CacheDecision::Recompute(RecomputeReason::Invalid(_))
    ));
}

#[test]
fn test_corrupted_volume_is_rejected() {
    let (_dir, config, session, layout) = setup();
    let path = layout.volume_path(0);
    let mut bytes = fs::read(&path).unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0xff;
    fs::write(&path, &bytes).unwrap();
    assert!(matches!(
        decision(&session, &config, &layout),
        CacheDecision::Recompute(RecomputeReason::Invalid(_))
    ));

    fs::write(&path, b"not a volume").unwrap();
    assert!(matches!(
        decision(&session, &config, &layout),
        CacheDecision::Recompute(RecomputeReason::Invalid(_))
    ));
}

#[test]
fn test_changed_source_is_stale() {
    let (dir, config, _session, layout) = setup();
    let mut frames = moving_blobs(12, &CELLS);
    frames[3][[0, 0]] += 0.5;
    let changed = memory_session(frames, &config);
    assert!(matches!(
        decision(&changed, &config, &layout),
        CacheDecision::Recompute(RecomputeReason::Stale)
    ));
    drop(dir);
}

#[test]
fn test_signature_ignores_batch_size() {
    let (_dir, mut config, session, layout) = setup();
    config.registration.batch_size = 1;
    assert!(decision(&session, &config, &layout).is_reuse());
    config.registration.reference_iterations += 1;
    assert!(matches!(
        decision(&session, &config, &layout),
        CacheDecision::Recompute(RecomputeReason::Stale)
    ));
}

#[test]
fn test_run_replaces_corrupt_volume() {
    let (_dir, config, session, layout) = setup();
    let path = layout.volume_path(0);
    let good = fs::read(&path).unwrap();
    fs::write(&path, &good[..good.len() - 10]).unwrap();

    let registrar = Arc::new(CountingRegistrar::default());
    let report = Orchestrator::new(&config)
        .with_registrar(registrar.clone())
        .run(&session, &config, &RunRequest::default())
        .unwrap();
    assert_eq!(registrar.calls(), 1);
    assert!(matches!(
        report.plane(0).unwrap().registration,
        RegistrationStatus::Computed(_)
    ));
    assert_eq!(fs::read(&path).unwrap(), good);
}
