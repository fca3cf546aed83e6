//! Cell probability per ROI candidate.
//!
//! A logistic model over standardized candidate statistics. Pure: the
//! output depends only on the candidates and the configuration.

use serde::{Deserialize, Serialize};

use crate::detection::RoiCandidate;

/// Standardization and weight of one feature: `weight * (x - center) / scale`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureWeight {
    pub center: f64,
    pub scale: f64,
    pub weight: f64,
}

impl FeatureWeight {
    const fn new(center: f64, scale: f64, weight: f64) -> Self {
        Self {
            center,
            scale,
            weight,
        }
    }

    fn term(&self, x: f64) -> f64 {
        if self.scale == 0.0 {
            return 0.0;
        }
        self.weight * (x - self.center) / self.scale
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Skewness of the fluorescence trace. Transients make it positive.
    #[serde(default = "default_skew")]
    pub skew: FeatureWeight,
    /// Compactness; 1 is a disk, higher is ragged or elongated.
    #[serde(default = "default_compactness")]
    pub compactness: FeatureWeight,
    /// Natural log of the pixel count.
    #[serde(default = "default_log_npix")]
    pub log_npix: FeatureWeight,
    /// Segmentation model confidence.
    #[serde(default = "default_confidence")]
    pub confidence: FeatureWeight,
    #[serde(default)]
    pub bias: f64,
}

fn default_skew() -> FeatureWeight {
    FeatureWeight::new(0.5, 1.0, 1.5)
}
fn default_compactness() -> FeatureWeight {
    FeatureWeight::new(1.1, 0.1, -1.0)
}
fn default_log_npix() -> FeatureWeight {
    FeatureWeight::new(3.5, 1.0, 0.5)
}
fn default_confidence() -> FeatureWeight {
    FeatureWeight::new(0.5, 0.25, 1.0)
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            skew: default_skew(),
            compactness: default_compactness(),
            log_npix: default_log_npix(),
            confidence: default_confidence(),
            bias: 0.0,
        }
    }
}

/// Probability per candidate index.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub probabilities: Vec<f32>,
}

impl ClassificationResult {
    pub fn len(&self) -> usize {
        self.probabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probabilities.is_empty()
    }

    pub fn probability(&self, index: usize) -> Option<f32> {
        self.probabilities.get(index).copied()
    }

    /// Thresholded labels, index-aligned with the probabilities.
    pub fn labels(&self, threshold: f32) -> Vec<bool> {
        self.probabilities
            .iter()
            .map(|&p| label(p, threshold))
            .collect()
    }
}

/// Cell label for a probability. A threshold of 0 accepts everything.
pub fn label(probability: f32, threshold: f32) -> bool {
    probability >= threshold
}

pub fn classify(candidates: &[RoiCandidate], config: &ClassifierConfig) -> ClassificationResult {
    ClassificationResult {
        probabilities: candidates.iter().map(|c| probability(c, config)).collect(),
    }
}

/// Probability in [0, 1]; any non-finite feature gives 0.
pub fn probability(candidate: &RoiCandidate, config: &ClassifierConfig) -> f32 {
    let features = [
        (candidate.skew, &config.skew),
        (candidate.compactness, &config.compactness),
        ((candidate.npix.max(1) as f64).ln(), &config.log_npix),
        (candidate.confidence as f64, &config.confidence),
    ];
    if features.iter().any(|(x, _)| !x.is_finite()) {
        return 0.0;
    }
    let z: f64 = config.bias + features.iter().map(|(x, w)| w.term(*x)).sum::<f64>();
    let p = 1.0 / (1.0 + (-z).exp());
    if p.is_finite() {
        p as f32
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(skew: f64, compactness: f64, npix: usize, confidence: f32) -> RoiCandidate {
        RoiCandidate {
            index: 0,
            pixels: Vec::new(),
            centroid: (0.0, 0.0),
            npix,
            bbox: (0, 0, 0, 0),
            compactness,
            aspect_ratio: 1.0,
            confidence,
            trace: Vec::new(),
            mean: 0.0,
            std: 0.0,
            skew,
        }
    }

    #[test]
    fn active_round_soma_scores_above_ragged_flat_blob() {
        let config = ClassifierConfig::default();
        let cell = probability(&candidate(2.5, 1.02, 80, 0.9), &config);
        let junk = probability(&candidate(-0.5, 1.6, 8, 0.1), &config);
        assert!(cell > 0.5, "cell {cell}");
        assert!(junk < 0.5, "junk {junk}");
    }

    #[test]
    fn non_finite_feature_gives_zero() {
        let p = probability(&candidate(f64::NAN, 1.0, 50, 0.5), &ClassifierConfig::default());
        assert_eq!(p, 0.0);
    }

    #[test]
    fn threshold_zero_accepts_everything() {
        let result = ClassificationResult {
            probabilities: vec![0.0, 0.2, 1.0],
        };
        assert_eq!(result.labels(0.0), vec![true, true, true]);
        assert_eq!(result.labels(0.5), vec![false, false, true]);
    }
}
