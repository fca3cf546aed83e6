//! Operator curation of classified candidates.
//!
//! Overrides live in their own file per plane, apart from computed results,
//! so rerunning earlier stages never overwrites them. Every mutation takes
//! the plane lock, re-reads the plane from disk, applies the change and
//! persists it atomically before returning.

mod plane;

use std::collections::BTreeMap;

use tracing::info;

use crate::error::{Result, SomataError};
use crate::io::{OutputLayout, PlaneLock};
use crate::results::PlaneResults;

pub use plane::{Override, PlaneCuration, QuarantineBatch, ReconcileOutcome};

/// Computed results of a plane together with its curation overlay.
#[derive(Clone, Debug)]
pub struct CuratedPlane {
    pub results: PlaneResults,
    pub curation: PlaneCuration,
}

impl CuratedPlane {
    pub fn effective_labels(&self) -> Vec<bool> {
        self.curation.effective_labels(
            &self.results.classification.probabilities,
            self.results.threshold,
        )
    }
}

/// Curation state of every processed plane of a session.
#[derive(Clone, Debug)]
pub struct CurationState {
    layout: OutputLayout,
    planes: BTreeMap<usize, CuratedPlane>,
}

impl CurationState {
    /// Load every plane that has detection results.
    pub fn open(layout: OutputLayout) -> Result<Self> {
        let mut planes = BTreeMap::new();
        for plane in layout.discover_planes()? {
            if let Some(curated) = load_plane(&layout, plane)? {
                planes.insert(plane, curated);
            }
        }
        info!(
            root = %layout.root().display(),
            planes = planes.len(),
            "Curation state loaded"
        );
        Ok(Self { layout, planes })
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    pub fn plane_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.planes.keys().copied()
    }

    pub fn plane(&self, plane: usize) -> Result<&CuratedPlane> {
        self.planes.get(&plane).ok_or(SomataError::UnknownPlane(plane))
    }

    pub fn get_effective_label(&self, plane: usize, index: usize) -> Result<bool> {
        let p = self.plane(plane)?;
        p.curation.effective_label(
            index,
            &p.results.classification.probabilities,
            p.results.threshold,
        )
    }

    pub fn effective_labels(&self, plane: usize) -> Result<Vec<bool>> {
        Ok(self.plane(plane)?.effective_labels())
    }

    pub fn set_override(&mut self, plane: usize, index: usize, is_cell: bool) -> Result<()> {
        self.mutate(plane, |c| c.set_override(index, is_cell))?;
        info!(plane, index, is_cell, "Override set");
        Ok(())
    }

    pub fn clear_override(&mut self, plane: usize, index: usize) -> Result<bool> {
        self.mutate(plane, |c| c.clear_override(index))
    }

    /// Reconcile against a new candidate count (ordering assumed unchanged).
    pub fn reconcile(&mut self, plane: usize, new_candidate_count: usize) -> Result<ReconcileOutcome> {
        self.mutate(plane, |c| Ok(c.reconcile(new_candidate_count, None)))
    }

    /// Reconcile against a new candidate count and ordering fingerprint.
    pub fn reconcile_with(
        &mut self,
        plane: usize,
        new_candidate_count: usize,
        fingerprint: &str,
    ) -> Result<ReconcileOutcome> {
        self.mutate(plane, |c| Ok(c.reconcile(new_candidate_count, Some(fingerprint))))
    }

    pub fn quarantined(&self, plane: usize) -> Result<&[QuarantineBatch]> {
        Ok(&self.plane(plane)?.curation.quarantine)
    }

    pub fn dismiss_quarantine(&mut self, plane: usize) -> Result<usize> {
        self.mutate(plane, |c| Ok(c.dismiss_quarantine()))
    }

    pub fn restore_quarantine(&mut self, plane: usize) -> Result<usize> {
        self.mutate(plane, |c| c.restore_quarantine())
    }

    /// Re-read one plane from disk, e.g. after a rerun.
    pub fn refresh(&mut self, plane: usize) -> Result<()> {
        match load_plane(&self.layout, plane)? {
            Some(curated) => {
                self.planes.insert(plane, curated);
                Ok(())
            }
            None => Err(SomataError::UnknownPlane(plane)),
        }
    }

    fn mutate<R>(
        &mut self,
        plane: usize,
        f: impl FnOnce(&mut PlaneCuration) -> Result<R>,
    ) -> Result<R> {
        let _lock = PlaneLock::acquire(&self.layout.lock_path(plane), plane)?;
        let mut fresh = load_plane(&self.layout, plane)?.ok_or(SomataError::UnknownPlane(plane))?;
        let out = f(&mut fresh.curation)?;
        fresh.curation.save(&self.layout.curation_path(plane))?;
        self.planes.insert(plane, fresh);
        Ok(out)
    }
}

fn load_plane(layout: &OutputLayout, plane: usize) -> Result<Option<CuratedPlane>> {
    let Some(results) = PlaneResults::load(&layout.candidates_path(plane))? else {
        return Ok(None);
    };
    let mut curation = PlaneCuration::load(&layout.curation_path(plane), plane)?;
    // A run interrupted between writing results and reconciling must not
    // apply old overrides to the new index space.
    curation.reconcile(
        results.candidate_count(),
        Some(&results.detection.fingerprint),
    );
    Ok(Some(CuratedPlane { results, curation }))
}
