use serde::{Deserialize, Serialize};

use crate::consts::{
    DEFAULT_NEURITE_MIN_AREA, DEFAULT_SIGMA_MULTIPLIER, DEFAULT_SOMA_BLUR_SIGMA,
    DEFAULT_SOMA_MAX_AREA, DEFAULT_SOMA_MIN_AREA,
};
use crate::error::{Result, SomataError};

/// Method used to separate labelled structures from the neuropil background.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum ThresholdMethod {
    /// Threshold = mean + sigma_multiplier * stddev.
    #[default]
    MeanPlusSigma,
    /// Otsu's method over the image's own intensity range.
    Otsu,
    /// User-specified fixed threshold in [0.0, 1.0].
    Fixed(f32),
}

/// Parameters of the built-in segmentation models.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionConfig {
    #[serde(default)]
    pub threshold_method: ThresholdMethod,
    /// Sigma multiplier for MeanPlusSigma method.
    #[serde(default = "default_sigma_multiplier")]
    pub sigma_multiplier: f32,
    /// Gaussian blur sigma applied before thresholding. 0 disables it.
    #[serde(default = "default_blur_sigma")]
    pub blur_sigma: f32,
    /// Smallest soma, in pixels.
    #[serde(default = "default_soma_min_area")]
    pub soma_min_area: usize,
    /// Largest soma, in pixels. Bigger components are vessels or neuropil.
    #[serde(default = "default_soma_max_area")]
    pub soma_max_area: usize,
    /// Smallest dendrite or axon segment, in pixels.
    #[serde(default = "default_neurite_min_area")]
    pub neurite_min_area: usize,
    /// Drop components touching the frame edge, where registration leaves
    /// zero-filled borders.
    #[serde(default)]
    pub exclude_border: bool,
}

fn default_sigma_multiplier() -> f32 {
    DEFAULT_SIGMA_MULTIPLIER
}
fn default_blur_sigma() -> f32 {
    DEFAULT_SOMA_BLUR_SIGMA
}
fn default_soma_min_area() -> usize {
    DEFAULT_SOMA_MIN_AREA
}
fn default_soma_max_area() -> usize {
    DEFAULT_SOMA_MAX_AREA
}
fn default_neurite_min_area() -> usize {
    DEFAULT_NEURITE_MIN_AREA
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold_method: ThresholdMethod::default(),
            sigma_multiplier: DEFAULT_SIGMA_MULTIPLIER,
            blur_sigma: DEFAULT_SOMA_BLUR_SIGMA,
            soma_min_area: DEFAULT_SOMA_MIN_AREA,
            soma_max_area: DEFAULT_SOMA_MAX_AREA,
            neurite_min_area: DEFAULT_NEURITE_MIN_AREA,
            exclude_border: false,
        }
    }
}

impl DetectionConfig {
    pub fn validate(&self) -> Result<()> {
        if let ThresholdMethod::Fixed(v) = self.threshold_method {
            if !(0.0..=1.0).contains(&v) {
                return Err(SomataError::InvalidConfig(format!(
                    "fixed threshold must be in [0, 1], got {v}"
                )));
            }
        }
        if !(self.blur_sigma >= 0.0) {
            return Err(SomataError::InvalidConfig(format!(
                "blur_sigma must be non-negative, got {}",
                self.blur_sigma
            )));
        }
        if self.soma_min_area == 0 || self.soma_min_area > self.soma_max_area {
            return Err(SomataError::InvalidConfig(format!(
                "soma area range {}..={} is empty",
                self.soma_min_area, self.soma_max_area
            )));
        }
        if self.neurite_min_area == 0 {
            return Err(SomataError::InvalidConfig(
                "neurite_min_area must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
