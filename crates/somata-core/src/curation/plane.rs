use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::classify::label;
use crate::error::{Result, SomataError};
use crate::io::{read_json, write_json_atomic};

/// A manual label for one candidate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Override {
    pub is_cell: bool,
    /// Plane curation version at which this override was last written.
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

/// Overrides set aside because detection changed the candidate index space.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuarantineBatch {
    pub quarantined_at: DateTime<Utc>,
    /// Index space the overrides were made against.
    pub candidate_count: usize,
    pub fingerprint: Option<String>,
    /// Index space that replaced it.
    pub new_candidate_count: usize,
    pub new_fingerprint: Option<String>,
    pub overrides: BTreeMap<usize, Override>,
}

impl QuarantineBatch {
    /// Override indices that do not exist in the new index space.
    pub fn out_of_range(&self) -> Vec<usize> {
        self.overrides
            .keys()
            .copied()
            .filter(|&i| i >= self.new_candidate_count)
            .collect()
    }
}

/// What [`PlaneCuration::reconcile`] did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Overrides still refer to the same candidates.
    Compatible,
    /// The index space changed; `stale` overrides moved to quarantine.
    Quarantined { stale: usize },
}

/// Operator-owned curation overlay of one plane, stored as `curation.json`.
///
/// Never written by registration, detection or classification; only by
/// operator actions and by [`PlaneCuration::reconcile`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlaneCuration {
    pub plane: usize,
    /// Incremented by every mutation.
    pub version: u64,
    pub updated_at: Option<DateTime<Utc>>,
    /// Candidate index space the active overrides refer to.
    pub candidate_count: Option<usize>,
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub overrides: BTreeMap<usize, Override>,
    #[serde(default)]
    pub quarantine: Vec<QuarantineBatch>,
}

impl PlaneCuration {
    pub fn new(plane: usize) -> Self {
        Self {
            plane,
            version: 0,
            updated_at: None,
            candidate_count: None,
            fingerprint: None,
            overrides: BTreeMap::new(),
            quarantine: Vec::new(),
        }
    }

    /// Load the overlay, or start an empty one if none was saved.
    pub fn load(path: &Path, plane: usize) -> Result<Self> {
        let curation: Self = read_json(path)?.unwrap_or_else(|| Self::new(plane));
        if curation.plane != plane {
            return Err(SomataError::Pipeline(format!(
                "{} belongs to plane {}, expected plane {plane}",
                path.display(),
                curation.plane
            )));
        }
        Ok(curation)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }

    fn bump(&mut self) -> (u64, DateTime<Utc>) {
        let now = Utc::now();
        self.version += 1;
        self.updated_at = Some(now);
        (self.version, now)
    }

    fn check_index(&self, index: usize) -> Result<()> {
        let count = self.candidate_count.unwrap_or(0);
        if index >= count {
            return Err(SomataError::IndexOutOfRange {
                plane: self.plane,
                index,
                count,
            });
        }
        Ok(())
    }

    /// Override if present, else the thresholded probability.
    pub fn effective_label(&self, index: usize, probabilities: &[f32], threshold: f32) -> Result<bool> {
        self.check_index(index)?;
        if let Some(o) = self.overrides.get(&index) {
            return Ok(o.is_cell);
        }
        let p = probabilities.get(index).copied().ok_or(SomataError::IndexOutOfRange {
            plane: self.plane,
            index,
            count: probabilities.len(),
        })?;
        Ok(label(p, threshold))
    }

    /// Effective label of every candidate.
    pub fn effective_labels(&self, probabilities: &[f32], threshold: f32) -> Vec<bool> {
        probabilities
            .iter()
            .enumerate()
            .map(|(i, &p)| match self.overrides.get(&i) {
                Some(o) => o.is_cell,
                None => label(p, threshold),
            })
            .collect()
    }

    pub fn set_override(&mut self, index: usize, is_cell: bool) -> Result<()> {
        self.check_index(index)?;
        let (version, updated_at) = self.bump();
        self.overrides.insert(
            index,
            Override {
                is_cell,
                version,
                updated_at,
            },
        );
        Ok(())
    }

    /// Remove an override. Returns whether one existed.
    pub fn clear_override(&mut self, index: usize) -> Result<bool> {
        self.check_index(index)?;
        if self.overrides.remove(&index).is_some() {
            self.bump();
            return Ok(true);
        }
        Ok(false)
    }

    /// Adopt a new detection's index space.
    ///
    /// A changed count, or a changed fingerprint when both are known, moves
    /// every active override into quarantine.
    pub fn reconcile(&mut self, count: usize, fingerprint: Option<&str>) -> ReconcileOutcome {
        let same_count = self.candidate_count == Some(count);
        let same_order = match (self.fingerprint.as_deref(), fingerprint) {
            (Some(old), Some(new)) => old == new,
            _ => true,
        };
        let first_detection = self.candidate_count.is_none();

        if first_detection || (same_count && same_order) {
            let changed = self.candidate_count != Some(count)
                || (fingerprint.is_some() && self.fingerprint.as_deref() != fingerprint);
            self.candidate_count = Some(count);
            if let Some(f) = fingerprint {
                self.fingerprint = Some(f.to_string());
            }
            if changed {
                self.bump();
            }
            return ReconcileOutcome::Compatible;
        }

        let stale = self.overrides.len();
        if stale > 0 {
            let batch = QuarantineBatch {
                quarantined_at: Utc::now(),
                candidate_count: self.candidate_count.unwrap_or(0),
                fingerprint: self.fingerprint.clone(),
                new_candidate_count: count,
                new_fingerprint: fingerprint.map(str::to_string),
                overrides: std::mem::take(&mut self.overrides),
            };
            let conflict = SomataError::CurationConflict {
                plane: self.plane,
                stale,
            };
            warn!(
                plane = self.plane,
                old_count = batch.candidate_count,
                new_count = count,
                "{conflict}"
            );
            self.quarantine.push(batch);
        }
        self.candidate_count = Some(count);
        self.fingerprint = fingerprint.map(str::to_string);
        self.bump();
        if stale > 0 {
            ReconcileOutcome::Quarantined { stale }
        } else {
            ReconcileOutcome::Compatible
        }
    }

    /// Total overrides held in quarantine.
    pub fn quarantined_count(&self) -> usize {
        self.quarantine.iter().map(|b| b.overrides.len()).sum()
    }

    /// Discard every quarantined batch. Returns how many overrides were dropped.
    pub fn dismiss_quarantine(&mut self) -> usize {
        let dropped = self.quarantined_count();
        if !self.quarantine.is_empty() {
            self.quarantine.clear();
            self.bump();
            info!(plane = self.plane, dropped, "Quarantine dismissed");
        }
        dropped
    }

    /// Re-apply the most recent quarantined batch to the current index space.
    ///
    /// Fails without changing anything if any index does not fit the current
    /// candidate count. Overrides made since the batch was quarantined win.
    pub fn restore_quarantine(&mut self) -> Result<usize> {
        let Some(batch) = self.quarantine.last() else {
            return Ok(0);
        };
        let count = self.candidate_count.unwrap_or(0);
        if let Some(&index) = batch.overrides.keys().find(|&&i| i >= count) {
            return Err(SomataError::IndexOutOfRange {
                plane: self.plane,
                index,
                count,
            });
        }
        let Some(batch) = self.quarantine.pop() else {
            return Ok(0);
        };
        let (version, updated_at) = self.bump();
        let mut restored = 0;
        for (index, o) in batch.overrides {
            if self.overrides.contains_key(&index) {
                continue;
            }
            self.overrides.insert(
                index,
                Override {
                    is_cell: o.is_cell,
                    version,
                    updated_at,
                },
            );
            restored += 1;
        }
        info!(plane = self.plane, restored, "Quarantine restored");
        Ok(restored)
    }
}
