use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SomataError};

/// Pipeline processing stage, used for progress reporting and failure attribution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineStage {
    Registration,
    Detection,
    Classification,
    Curation,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Registration => write!(f, "Registering frames"),
            Self::Detection => write!(f, "Detecting ROIs"),
            Self::Classification => write!(f, "Classifying candidates"),
            Self::Curation => write!(f, "Merging curation"),
        }
    }
}

/// Lifecycle of one plane within a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PlaneState {
    NotStarted,
    Registering,
    Registered,
    Detecting,
    Detected,
    Classifying,
    Classified,
    /// Terminal for a run; a later run may re-enter from here.
    Curated,
    Failed { stage: PipelineStage, cause: String },
}

impl PlaneState {
    pub fn can_transition_to(&self, next: &PlaneState) -> bool {
        use PlaneState::*;
        match (self, next) {
            (Failed { .. }, _) => false,
            (_, Failed { .. }) => !matches!(self, Curated),
            (NotStarted, Registering)
            | (Registering, Registered)
            | (Registered, Detecting)
            | (Detecting, Detected)
            | (Detected, Classifying)
            | (Classifying, Classified)
            | (Classified, Curated) => true,
            // Re-entry after a completed run.
            (Curated, Registering) | (Curated, Detecting) | (Curated, Classifying) => true,
            _ => false,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

impl std::fmt::Display for PlaneState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not started"),
            Self::Registering => write!(f, "registering"),
            Self::Registered => write!(f, "registered"),
            Self::Detecting => write!(f, "detecting"),
            Self::Detected => write!(f, "detected"),
            Self::Classifying => write!(f, "classifying"),
            Self::Classified => write!(f, "classified"),
            Self::Curated => write!(f, "curated"),
            Self::Failed { stage, cause } => write!(f, "failed during {stage}: {cause}"),
        }
    }
}

/// Thread-safe progress reporting for the pipeline.
///
/// Planes run concurrently, so every callback carries the plane index.
/// All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    /// A plane entered a new state.
    fn plane_state(&self, _plane: usize, _state: &PlaneState) {}

    /// A stage has started for `plane`. `total_items` is the number of
    /// work items (frames, candidates), if known.
    fn begin_stage(&self, _plane: usize, _stage: PipelineStage, _total_items: Option<usize>) {}

    /// `items_done` more work items of the current stage have completed.
    fn advance(&self, _plane: usize, _items_done: usize) {}

    /// The current stage of `plane` is finished.
    fn finish_stage(&self, _plane: usize) {}
}

/// No-op progress reporter, used when `run_pipeline` delegates.
pub struct NoOpReporter;
impl ProgressReporter for NoOpReporter {}

/// Cooperative cancellation shared between a front-end and a run.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(SomataError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Where a run enters each plane's state machine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryPoint {
    /// Register (honoring the cache), detect, classify.
    #[default]
    Full,
    /// Register even when a valid volume exists.
    ForceRegistration,
    /// Re-detect; registers only if no valid volume exists.
    Detection,
    /// Reclassify stored candidates; detects first if none are stored.
    Classification,
}

#[derive(Clone, Debug, Default)]
pub struct RunRequest {
    pub entry: EntryPoint,
    /// Restrict the run to these plane indices. `None` runs every plane.
    pub planes: Option<Vec<usize>>,
}

impl RunRequest {
    pub fn new(entry: EntryPoint) -> Self {
        Self {
            entry,
            planes: None,
        }
    }

    pub fn with_planes(mut self, planes: Vec<usize>) -> Self {
        self.planes = Some(planes);
        self
    }
}

/// How a plane's registered volume was obtained in this run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RegistrationStatus {
    /// The run did not reach registration.
    NotRun,
    /// A valid cached volume was reused.
    Reused,
    /// Registration ran; the string is why the cache was not used.
    Computed(String),
}

/// Final state of one plane after a run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlaneReport {
    pub plane: usize,
    pub state: PlaneState,
    pub registration: RegistrationStatus,
    pub low_confidence_frames: usize,
    pub candidate_count: usize,
    /// Effective cell label per candidate index.
    pub effective_labels: Vec<bool>,
    /// Overrides currently held in quarantine for this plane.
    pub quarantined_overrides: usize,
}

impl PlaneReport {
    pub fn new(plane: usize) -> Self {
        Self {
            plane,
            state: PlaneState::NotStarted,
            registration: RegistrationStatus::NotRun,
            low_confidence_frames: 0,
            candidate_count: 0,
            effective_labels: Vec::new(),
            quarantined_overrides: 0,
        }
    }

    pub fn cell_count(&self) -> usize {
        self.effective_labels.iter().filter(|&&l| l).count()
    }
}

/// Per-plane status map for a session run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionReport {
    pub planes: BTreeMap<usize, PlaneReport>,
}

impl SessionReport {
    pub fn plane(&self, index: usize) -> Option<&PlaneReport> {
        self.planes.get(&index)
    }

    pub fn failed(&self) -> impl Iterator<Item = &PlaneReport> {
        self.planes.values().filter(|p| p.state.is_failed())
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed().next().is_none()
    }
}
