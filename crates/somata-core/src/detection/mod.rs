pub mod blur;
pub mod candidate;
pub mod components;
pub mod config;
pub mod model;
pub mod morphology;
pub mod threshold;

pub use candidate::{detect_rois, fingerprint, DetectionResult, RoiCandidate};
pub use config::{DetectionConfig, ThresholdMethod};
pub use model::{
    ModelRegistry, NeuriteSegmenter, Projection, RawMask, SegmentationModel, SomaSegmenter,
};
