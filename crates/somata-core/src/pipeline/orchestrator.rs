use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::cache::{self, CacheDecision, RecomputeReason};
use crate::classify::classify;
use crate::curation::{PlaneCuration, ReconcileOutcome};
use crate::detection::{detect_rois, DetectionResult, ModelRegistry};
use crate::error::{Result, SomataError};
use crate::io::volume::RegisteredVolume;
use crate::io::{OutputLayout, PlaneLock};
use crate::registration::{PhaseCorrelationRegistrar, Registrar, RegistrationJob};
use crate::results::PlaneResults;
use crate::session::{Plane, Session};

use super::config::PipelineConfig;
use super::types::{
    CancelToken, EntryPoint, NoOpReporter, PipelineStage, PlaneReport, PlaneState,
    ProgressReporter, RegistrationStatus, RunRequest, SessionReport,
};

/// Sequences registration, detection, classification and curation merge
/// for the planes of a session.
#[derive(Clone)]
pub struct Orchestrator {
    registrar: Arc<dyn Registrar>,
    models: ModelRegistry,
    reporter: Arc<dyn ProgressReporter>,
    cancel: CancelToken,
}

impl Orchestrator {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            registrar: Arc::new(PhaseCorrelationRegistrar),
            models: ModelRegistry::from_config(&config.detection),
            reporter: Arc::new(NoOpReporter),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_registrar(mut self, registrar: Arc<dyn Registrar>) -> Self {
        self.registrar = registrar;
        self
    }

    pub fn with_models(mut self, models: ModelRegistry) -> Self {
        self.models = models;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run `request` over the session.
    ///
    /// Fails as a whole only for invalid input or when another run holds one
    /// of the requested planes; per-plane failures are reported in the
    /// returned [`SessionReport`].
    pub fn run(
        &self,
        session: &Session,
        config: &PipelineConfig,
        request: &RunRequest,
    ) -> Result<SessionReport> {
        config.validate()?;
        if config.interleave() != session.interleave() {
            return Err(SomataError::InvalidConfig(format!(
                "session was opened with {:?}, run requests {:?}",
                session.interleave(),
                config.interleave()
            )));
        }

        let planes: Vec<&Plane> = match &request.planes {
            None => session.planes().iter().collect(),
            Some(indices) => indices
                .iter()
                .map(|&i| session.plane(i).ok_or(SomataError::UnknownPlane(i)))
                .collect::<Result<_>>()?,
        };

        let dest = config.save_path.as_deref().unwrap_or(session.dest_dir());
        let layout = OutputLayout::new(dest, &config.save_folder);

        // All locks up front: a conflicting run fails before any work starts.
        let mut locks = Vec::with_capacity(planes.len());
        for plane in &planes {
            locks.push(PlaneLock::acquire(&layout.lock_path(plane.index), plane.index)?);
        }

        info!(
            planes = planes.len(),
            entry = ?request.entry,
            dest = %layout.root().display(),
            "Starting run"
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .build()
            .map_err(|e| SomataError::Pipeline(format!("thread pool: {e}")))?;

        let reports: Vec<PlaneReport> = pool.install(|| {
            planes
                .par_iter()
                .map(|plane| self.run_plane(plane, session, config, &layout, request.entry))
                .collect()
        });
        drop(locks);

        let report = SessionReport {
            planes: reports.into_iter().map(|r| (r.plane, r)).collect(),
        };
        let failed = report.failed().count();
        if failed > 0 {
            warn!(failed, "Run finished with failed planes");
        } else {
            info!("Run complete");
        }
        Ok(report)
    }

    fn run_plane(
        &self,
        plane: &Plane,
        session: &Session,
        config: &PipelineConfig,
        layout: &OutputLayout,
        entry: EntryPoint,
    ) -> PlaneReport {
        let mut run = PlaneRun::new(plane.index, self.reporter.as_ref());
        match self.drive(&mut run, plane, session, config, layout, entry) {
            Ok(()) => {}
            Err(e) => {
                let stage = run.stage();
                warn!(plane = plane.index, %stage, error = %e, "Plane failed");
                run.fail(stage, &e);
            }
        }
        run.report
    }

    fn drive(
        &self,
        run: &mut PlaneRun<'_>,
        plane: &Plane,
        session: &Session,
        config: &PipelineConfig,
        layout: &OutputLayout,
        entry: EntryPoint,
    ) -> Result<()> {
        let p = plane.index;
        layout.ensure_plane_dir(p)?;
        let candidates_path = layout.candidates_path(p);

        let prior = match PlaneResults::load(&candidates_path) {
            Ok(prior) => prior,
            Err(e) => {
                warn!(plane = p, error = %e, "Stored results unusable; recomputing");
                None
            }
        };
        if prior.is_some() {
            run.resume(PlaneState::Curated);
        }

        let detection = match (entry, prior) {
            (EntryPoint::Classification, Some(prior)) => {
                run.enter(PlaneState::Classifying)?;
                prior.detection
            }
            _ => {
                self.cancel.check()?;
                let volume = self.registered_volume(run, plane, session, config, layout, entry)?;
                self.cancel.check()?;
                let detection = self.detect(run, &volume, config)?;
                run.enter(PlaneState::Classifying)?;
                detection
            }
        };

        self.cancel.check()?;
        self.reporter
            .begin_stage(p, PipelineStage::Classification, Some(detection.len()));
        let classification = classify(&detection.candidates, &config.classification);
        let results = PlaneResults::new(
            p,
            config.cell_probability_threshold,
            detection,
            classification,
        )?;
        results.save(&candidates_path)?;
        self.reporter.finish_stage(p);
        run.enter(PlaneState::Classified)?;

        self.reporter.begin_stage(p, PipelineStage::Curation, None);
        let curation_path = layout.curation_path(p);
        let mut curation = PlaneCuration::load(&curation_path, p)?;
        let version = curation.version;
        let outcome = curation.reconcile(
            results.candidate_count(),
            Some(&results.detection.fingerprint),
        );
        if curation.version != version {
            curation.save(&curation_path)?;
        }
        if let ReconcileOutcome::Quarantined { stale } = outcome {
            info!(plane = p, stale, "Overrides quarantined for review");
        }

        run.report.candidate_count = results.candidate_count();
        run.report.effective_labels = curation.effective_labels(
            &results.classification.probabilities,
            results.threshold,
        );
        run.report.quarantined_overrides = curation.quarantined_count();
        self.reporter.finish_stage(p);
        run.enter(PlaneState::Curated)?;

        info!(
            plane = p,
            candidates = run.report.candidate_count,
            cells = run.report.cell_count(),
            "Plane curated"
        );
        Ok(())
    }

    /// Cache gate, then registration if the gate says so.
    fn registered_volume(
        &self,
        run: &mut PlaneRun<'_>,
        plane: &Plane,
        session: &Session,
        config: &PipelineConfig,
        layout: &OutputLayout,
        entry: EntryPoint,
    ) -> Result<RegisteredVolume> {
        let p = plane.index;
        let volume_path = layout.volume_path(p);
        let signature = cache::run_signature(plane, session.interleave(), &config.registration)?;

        let decision = if entry == EntryPoint::ForceRegistration {
            CacheDecision::Recompute(RecomputeReason::Forced)
        } else {
            cache::check(&volume_path, plane, &signature)
        };

        let volume = match decision {
            CacheDecision::Reuse(volume) => {
                // Re-detecting a finished plane with a valid volume skips
                // Registering entirely.
                if !(entry == EntryPoint::Detection && run.state() == &PlaneState::Curated) {
                    run.enter(PlaneState::Registering)?;
                    run.enter(PlaneState::Registered)?;
                }
                run.report.registration = RegistrationStatus::Reused;
                volume
            }
            CacheDecision::Recompute(reason) => {
                run.enter(PlaneState::Registering)?;
                info!(plane = p, %reason, registrar = self.registrar.name(), "Registering");
                let job = RegistrationJob {
                    plane: p,
                    frames: plane.frames(),
                    config: &config.registration,
                    signature: &signature,
                    destination: &volume_path,
                    cancel: &self.cancel,
                    reporter: self.reporter.as_ref(),
                };
                let volume = self.registrar.register(&job)?;
                run.enter(PlaneState::Registered)?;
                run.report.registration = RegistrationStatus::Computed(reason.to_string());
                volume
            }
        };
        run.report.low_confidence_frames = volume.metadata().low_confidence_frames;
        Ok(volume)
    }

    fn detect(
        &self,
        run: &mut PlaneRun<'_>,
        volume: &RegisteredVolume,
        config: &PipelineConfig,
    ) -> Result<DetectionResult> {
        let p = run.plane;
        run.enter(PlaneState::Detecting)?;
        let model = self.models.select(config.detect_dendrites_axons);
        self.reporter.begin_stage(p, PipelineStage::Detection, None);
        let detection = detect_rois(volume, model.as_ref())?;
        self.reporter.finish_stage(p);
        run.enter(PlaneState::Detected)?;
        Ok(detection)
    }
}

/// State machine of one plane within a run.
struct PlaneRun<'a> {
    plane: usize,
    reporter: &'a dyn ProgressReporter,
    report: PlaneReport,
}

impl<'a> PlaneRun<'a> {
    fn new(plane: usize, reporter: &'a dyn ProgressReporter) -> Self {
        Self {
            plane,
            reporter,
            report: PlaneReport::new(plane),
        }
    }

    fn state(&self) -> &PlaneState {
        &self.report.state
    }

    /// Start from a state established by an earlier run.
    fn resume(&mut self, state: PlaneState) {
        debug!(plane = self.plane, %state, "Resuming plane");
        self.report.state = state;
    }

    fn enter(&mut self, next: PlaneState) -> Result<()> {
        if !self.report.state.can_transition_to(&next) {
            return Err(SomataError::Pipeline(format!(
                "plane {}: illegal transition {} -> {}",
                self.plane, self.report.state, next
            )));
        }
        debug!(plane = self.plane, from = %self.report.state, to = %next, "Plane state");
        self.report.state = next;
        self.reporter.plane_state(self.plane, &self.report.state);
        Ok(())
    }

    /// Stage the plane was working on, for failure attribution.
    fn stage(&self) -> PipelineStage {
        match self.report.state {
            PlaneState::NotStarted | PlaneState::Registering => PipelineStage::Registration,
            PlaneState::Registered | PlaneState::Detecting => PipelineStage::Detection,
            PlaneState::Detected | PlaneState::Classifying => PipelineStage::Classification,
            PlaneState::Classified | PlaneState::Curated => PipelineStage::Curation,
            PlaneState::Failed { stage, .. } => stage,
        }
    }

    fn fail(&mut self, stage: PipelineStage, error: &SomataError) {
        self.report.state = PlaneState::Failed {
            stage,
            cause: error.to_string(),
        };
        self.reporter.plane_state(self.plane, &self.report.state);
    }
}

/// Run every plane of `session` from the start, honoring the cache.
pub fn run_pipeline(session: &Session, config: &PipelineConfig) -> Result<SessionReport> {
    Orchestrator::new(config).run(session, config, &RunRequest::default())
}
