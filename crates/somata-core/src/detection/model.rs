use std::sync::Arc;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

use super::blur::gaussian_blur_array;
use super::components::{connected_components, touches_border, Component, Connectivity};
use super::config::DetectionConfig;
use super::morphology::morphological_opening;
use super::threshold::compute_threshold;

/// Temporal projection a model segments.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Projection {
    #[default]
    Mean,
    Max,
}

/// One mask as returned by a model, before validation.
#[derive(Clone, Debug, PartialEq)]
pub struct RawMask {
    /// Member pixels as (row, col).
    pub pixels: Vec<(usize, usize)>,
    /// Model confidence in [0, 1].
    pub confidence: f32,
}

/// A segmentation model: projection image in, candidate masks out.
///
/// Models must be deterministic; candidate indices are only stable if the
/// same image always yields the same masks.
pub trait SegmentationModel: Send + Sync {
    fn name(&self) -> &str;

    fn projection(&self) -> Projection {
        Projection::Mean
    }

    fn detect(&self, image: &Array2<f32>) -> Result<Vec<RawMask>>;
}

/// Cell bodies: compact bright blobs on the mean image.
#[derive(Clone, Debug, Default)]
pub struct SomaSegmenter {
    config: DetectionConfig,
}

impl SomaSegmenter {
    pub fn new(config: DetectionConfig) -> Self {
        Self { config }
    }
}

impl SegmentationModel for SomaSegmenter {
    fn name(&self) -> &str {
        "soma"
    }

    fn detect(&self, image: &Array2<f32>) -> Result<Vec<RawMask>> {
        let blurred = gaussian_blur_array(image, self.config.blur_sigma);
        let threshold = compute_threshold(
            &blurred,
            &self.config.threshold_method,
            self.config.sigma_multiplier,
        );
        let mask = morphological_opening(&blurred.mapv(|v| v > threshold));
        let components = connected_components(&mask, Connectivity::Four);
        debug!(threshold, components = components.len(), "Soma segmentation");

        let area = self.config.soma_min_area..=self.config.soma_max_area;
        Ok(components
            .into_iter()
            .filter(|c| area.contains(&c.area()))
            .filter(|c| !self.config.exclude_border || !on_border(c, image))
            .map(|c| to_raw_mask(c, &blurred, threshold))
            .collect())
    }
}

/// Dendrites and axons: thin bright structures on the max projection.
#[derive(Clone, Debug, Default)]
pub struct NeuriteSegmenter {
    config: DetectionConfig,
}

impl NeuriteSegmenter {
    pub fn new(config: DetectionConfig) -> Self {
        Self { config }
    }
}

impl SegmentationModel for NeuriteSegmenter {
    fn name(&self) -> &str {
        "neurite"
    }

    fn projection(&self) -> Projection {
        Projection::Max
    }

    fn detect(&self, image: &Array2<f32>) -> Result<Vec<RawMask>> {
        // Opening would erase one-pixel-wide processes; blur lightly instead.
        let blurred = gaussian_blur_array(image, self.config.blur_sigma * 0.5);
        let threshold = compute_threshold(
            &blurred,
            &self.config.threshold_method,
            self.config.sigma_multiplier,
        );
        let mask = blurred.mapv(|v| v > threshold);
        let components = connected_components(&mask, Connectivity::Eight);
        debug!(threshold, components = components.len(), "Neurite segmentation");

        Ok(components
            .into_iter()
            .filter(|c| c.area() >= self.config.neurite_min_area)
            .filter(|c| !self.config.exclude_border || !on_border(c, image))
            .map(|c| to_raw_mask(c, &blurred, threshold))
            .collect())
    }
}

fn on_border(c: &Component, image: &Array2<f32>) -> bool {
    let (h, w) = image.dim();
    touches_border(c.bbox, h, w)
}

/// Confidence is the component's mean contrast above threshold relative to
/// the brightest pixel's.
fn to_raw_mask(component: Component, image: &Array2<f32>, threshold: f32) -> RawMask {
    let values: Vec<f32> = component.pixels.iter().map(|&(r, c)| image[[r, c]]).collect();
    let peak = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mean = values.iter().sum::<f32>() / values.len().max(1) as f32;
    let confidence = if peak > threshold {
        ((mean - threshold) / (peak - threshold)).clamp(0.0, 1.0)
    } else {
        0.0
    };
    RawMask {
        pixels: component.pixels,
        confidence,
    }
}

/// The models a run can choose from.
///
/// `detect_dendrites_axons` selects the neurite model; front-ends may swap
/// either slot for their own implementation.
#[derive(Clone)]
pub struct ModelRegistry {
    soma: Arc<dyn SegmentationModel>,
    neurite: Arc<dyn SegmentationModel>,
}

impl ModelRegistry {
    pub fn from_config(config: &DetectionConfig) -> Self {
        Self {
            soma: Arc::new(SomaSegmenter::new(config.clone())),
            neurite: Arc::new(NeuriteSegmenter::new(config.clone())),
        }
    }

    pub fn with_soma_model(mut self, model: Arc<dyn SegmentationModel>) -> Self {
        self.soma = model;
        self
    }

    pub fn with_neurite_model(mut self, model: Arc<dyn SegmentationModel>) -> Self {
        self.neurite = model;
        self
    }

    pub fn select(&self, detect_dendrites_axons: bool) -> Arc<dyn SegmentationModel> {
        if detect_dendrites_axons {
            self.neurite.clone()
        } else {
            self.soma.clone()
        }
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::from_config(&DetectionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_blobs() -> Array2<f32> {
        Array2::from_shape_fn((40, 40), |(r, c)| {
            let d1 = ((r as f32 - 10.0).powi(2) + (c as f32 - 10.0).powi(2)).sqrt();
            let d2 = ((r as f32 - 28.0).powi(2) + (c as f32 - 25.0).powi(2)).sqrt();
            if d1 < 4.0 || d2 < 4.0 {
                0.8
            } else {
                0.1
            }
        })
    }

    #[test]
    fn soma_model_finds_both_blobs() {
        let masks = SomaSegmenter::default().detect(&two_blobs()).unwrap();
        assert_eq!(masks.len(), 2);
        assert!(masks.iter().all(|m| m.confidence > 0.0 && m.confidence <= 1.0));
    }

    #[test]
    fn neurite_model_keeps_thin_line() {
        let image = Array2::from_shape_fn((30, 30), |(r, c)| if r == c { 0.9 } else { 0.05 });
        let config = DetectionConfig {
            blur_sigma: 0.0,
            ..DetectionConfig::default()
        };
        let masks = NeuriteSegmenter::new(config).detect(&image).unwrap();
        assert_eq!(masks.len(), 1);
        assert_eq!(masks[0].pixels.len(), 30);
    }

    #[test]
    fn registry_selects_by_flag() {
        let registry = ModelRegistry::default();
        assert_eq!(registry.select(false).name(), "soma");
        assert_eq!(registry.select(true).name(), "neurite");
    }
}
