use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::classify::ClassificationResult;
use crate::detection::DetectionResult;
use crate::error::{Result, SomataError};
use crate::io::{read_json, write_json_atomic};

/// Computed per-plane results, stored as `candidates.json`.
///
/// Rewritten whole by every detection or classification run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlaneResults {
    pub plane: usize,
    /// Threshold the run applied to uncurated candidates.
    pub threshold: f32,
    pub detection: DetectionResult,
    pub classification: ClassificationResult,
}

impl PlaneResults {
    pub fn new(
        plane: usize,
        threshold: f32,
        detection: DetectionResult,
        classification: ClassificationResult,
    ) -> Result<Self> {
        let results = Self {
            plane,
            threshold,
            detection,
            classification,
        };
        results.validate()?;
        Ok(results)
    }

    pub fn candidate_count(&self) -> usize {
        self.detection.candidates.len()
    }

    /// Probabilities must cover exactly the candidate indices.
    pub fn validate(&self) -> Result<()> {
        if self.classification.len() != self.candidate_count() {
            return Err(SomataError::CacheValidation(format!(
                "plane {}: {} probabilities for {} candidates",
                self.plane,
                self.classification.len(),
                self.candidate_count()
            )));
        }
        if let Some(c) = self
            .detection
            .candidates
            .iter()
            .enumerate()
            .find(|(i, c)| c.index != *i)
        {
            return Err(SomataError::CacheValidation(format!(
                "plane {}: candidate at position {} has index {}",
                self.plane, c.0, c.1.index
            )));
        }
        Ok(())
    }

    /// Load and validate, or `None` if detection never ran.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let Some(results) = read_json::<Self>(path)? else {
            return Ok(None);
        };
        results.validate()?;
        Ok(Some(results))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }
}
