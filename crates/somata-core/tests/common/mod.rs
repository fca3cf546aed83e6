#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ndarray::Array2;
use somata_core::detection::{RawMask, SegmentationModel};
use somata_core::error::{Result, SomataError};
use somata_core::frame::{Frame, SourceInfo};
use somata_core::io::source::{FrameSource, MemorySource};
use somata_core::io::volume::RegisteredVolume;
use somata_core::pipeline::{PipelineStage, PlaneState, ProgressReporter};
use somata_core::registration::{PhaseCorrelationRegistrar, Registrar, RegistrationJob};
use somata_core::{PipelineConfig, Session};

pub const WIDTH: usize = 64;
pub const HEIGHT: usize = 64;

/// Blob centres (row, col) for the synthetic field of view.
pub const CELLS: [(f64, f64); 4] = [(16.0, 16.0), (18.0, 46.0), (44.0, 20.0), (46.0, 44.0)];

/// Whole-frame jitter, cycled over frames.
const JITTER: [(f64, f64); 6] = [(0.0, 0.0), (1.0, -1.0), (-1.0, 2.0), (2.0, 1.0), (0.0, -2.0), (-2.0, 0.0)];

/// Small deterministic pseudo-noise in [0, 1).
fn noise(seed: u64) -> f32 {
    let x = seed
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407);
    ((x >> 40) as f32) / (1u64 << 24) as f32
}

/// Gaussian blob image with the given centres and per-blob amplitudes.
pub fn blob_image(centres: &[(f64, f64)], amplitudes: &[f32], dy: f64, dx: f64, seed: u64) -> Array2<f32> {
    let sigma = 2.5f64;
    Array2::from_shape_fn((HEIGHT, WIDTH), |(r, c)| {
        let mut v = 0.05 + 0.01 * noise(seed.wrapping_add((r * WIDTH + c) as u64));
        for (&(cr, cc), &a) in centres.iter().zip(amplitudes) {
            let d2 = (r as f64 - cr - dy).powi(2) + (c as f64 - cc - dx).powi(2);
            v += a * (-d2 / (2.0 * sigma * sigma)).exp() as f32;
        }
        v
    })
}

/// A jittering field of flickering cells.
pub fn moving_blobs(frames: usize, centres: &[(f64, f64)]) -> Vec<Array2<f32>> {
    (0..frames)
        .map(|k| {
            let (dy, dx) = JITTER[k % JITTER.len()];
            let amplitudes: Vec<f32> = (0..centres.len())
                .map(|i| 0.5 + 0.3 * ((k as f32) * 0.7 + i as f32).sin())
                .collect();
            blob_image(centres, &amplitudes, dy, dx, k as u64 * 7919)
        })
        .collect()
}

/// Interleave per-plane frame lists (plane-major within each time point).
pub fn interleave(planes: &[Vec<Array2<f32>>]) -> Vec<Array2<f32>> {
    let n = planes.iter().map(Vec::len).min().unwrap_or(0);
    (0..n)
        .flat_map(|k| planes.iter().map(move |p| p[k].clone()))
        .collect()
}

pub fn test_config(dest: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.save_path = Some(dest.to_path_buf());
    config.registration.reference_frames = 6;
    config.registration.batch_size = 8;
    config
}

pub fn memory_session(frames: Vec<Array2<f32>>, config: &PipelineConfig) -> Session {
    let source = MemorySource::new(frames).expect("memory source");
    session_from(Arc::new(source), config)
}

pub fn session_from(source: Arc<dyn FrameSource>, config: &PipelineConfig) -> Session {
    let dir = config.save_path.clone().expect("tests set save_path");
    Session::from_source(source, dir, config).expect("session")
}

/// Phase-correlation registrar that counts its invocations.
#[derive(Default)]
pub struct CountingRegistrar {
    inner: PhaseCorrelationRegistrar,
    pub calls: AtomicUsize,
}

impl CountingRegistrar {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Registrar for CountingRegistrar {
    fn name(&self) -> &str {
        "counting"
    }

    fn register(&self, job: &RegistrationJob<'_>) -> Result<RegisteredVolume> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.register(job)
    }
}

/// Emits `count` well-separated 3x3 squares, whatever the image.
pub struct FixedModel {
    pub count: AtomicUsize,
}

impl FixedModel {
    pub fn new(count: usize) -> Self {
        Self {
            count: AtomicUsize::new(count),
        }
    }

    pub fn set_count(&self, count: usize) {
        self.count.store(count, Ordering::SeqCst);
    }
}

impl SegmentationModel for FixedModel {
    fn name(&self) -> &str {
        "fixed"
    }

    fn detect(&self, image: &Array2<f32>) -> Result<Vec<RawMask>> {
        let (h, w) = image.dim();
        let per_row = (w / 6).max(1);
        let masks = (0..self.count.load(Ordering::SeqCst))
            .map(|i| {
                let (r0, c0) = ((i / per_row) * 6 + 1, (i % per_row) * 6 + 1);
                let pixels = (r0..r0 + 3)
                    .flat_map(|r| (c0..c0 + 3).map(move |c| (r, c)))
                    .filter(|&(r, c)| r < h && c < w)
                    .collect();
                RawMask {
                    pixels,
                    confidence: 0.9,
                }
            })
            .collect();
        Ok(masks)
    }
}

/// A model that always fails.
pub struct BrokenModel;

impl SegmentationModel for BrokenModel {
    fn name(&self) -> &str {
        "broken"
    }

    fn detect(&self, _image: &Array2<f32>) -> Result<Vec<RawMask>> {
        Err(SomataError::Pipeline("weights not loaded".into()))
    }
}

/// Wraps a source and fails every read of frames where `index % modulus == residue`.
pub struct FlakySource {
    pub inner: MemorySource,
    pub modulus: usize,
    pub residue: usize,
}

impl FrameSource for FlakySource {
    fn info(&self) -> SourceInfo {
        self.inner.info()
    }

    fn read_frame(&self, index: usize) -> Result<Frame> {
        if index % self.modulus == self.residue {
            return Err(SomataError::SourceRead(format!("frame {index}: I/O error")));
        }
        self.inner.read_frame(index)
    }

    fn identity(&self) -> String {
        format!("flaky:{}", self.inner.identity())
    }
}

/// Cancels the shared token as soon as registration reports progress.
pub struct CancelOnProgress(pub somata_core::pipeline::CancelToken);

impl ProgressReporter for CancelOnProgress {
    fn advance(&self, _plane: usize, _items_done: usize) {
        self.0.cancel();
    }
}

/// Records every state a plane passes through.
#[derive(Default)]
pub struct StateRecorder {
    pub states: std::sync::Mutex<Vec<(usize, PlaneState)>>,
    pub stages: std::sync::Mutex<Vec<(usize, PipelineStage)>>,
}

impl StateRecorder {
    pub fn states_of(&self, plane: usize) -> Vec<PlaneState> {
        self.states
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| *p == plane)
            .map(|(_, s)| s.clone())
            .collect()
    }
}

impl ProgressReporter for StateRecorder {
    fn plane_state(&self, plane: usize, state: &PlaneState) {
        self.states.lock().unwrap().push((plane, state.clone()));
    }

    fn begin_stage(&self, plane: usize, stage: PipelineStage, _total_items: Option<usize>) {
        self.stages.lock().unwrap().push((plane, stage));
    }
}
