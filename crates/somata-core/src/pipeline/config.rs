use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::classify::ClassifierConfig;
use crate::consts::{DEFAULT_CELL_PROBABILITY_THRESHOLD, DEFAULT_SAVE_FOLDER};
use crate::detection::DetectionConfig;
use crate::error::{Result, SomataError};
use crate::io::source::Interleave;
use crate::registration::RegistrationConfig;

/// Options for one pipeline run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of interleaved imaging planes in the source.
    #[serde(default = "default_one")]
    pub nplanes: usize,
    /// Number of interleaved channels per plane.
    #[serde(default = "default_one")]
    pub nchannels: usize,
    /// 1-based channel that carries the functional signal.
    #[serde(default = "default_one")]
    pub functional_chan: usize,
    /// Acquisition rate per plane, in Hz.
    #[serde(default = "default_frame_rate")]
    pub frame_rate: f64,
    /// Also search immediate subdirectories for frames.
    #[serde(default)]
    pub look_one_level_down: bool,
    /// Use the neurite model instead of the soma model.
    #[serde(default)]
    pub detect_dendrites_axons: bool,
    /// Probability at or above which an uncurated candidate is a cell.
    #[serde(default = "default_threshold")]
    pub cell_probability_threshold: f32,
    /// Destination root. `None` writes next to the source.
    #[serde(default)]
    pub save_path: Option<PathBuf>,
    #[serde(default = "default_save_folder")]
    pub save_folder: String,
    /// Planes processed concurrently. 0 uses the available parallelism.
    #[serde(default)]
    pub workers: usize,
    #[serde(default)]
    pub registration: RegistrationConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub classification: ClassifierConfig,
}

fn default_one() -> usize {
    1
}
fn default_frame_rate() -> f64 {
    10.0
}
fn default_threshold() -> f32 {
    DEFAULT_CELL_PROBABILITY_THRESHOLD
}
fn default_save_folder() -> String {
    DEFAULT_SAVE_FOLDER.to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            nplanes: 1,
            nchannels: 1,
            functional_chan: 1,
            frame_rate: default_frame_rate(),
            look_one_level_down: false,
            detect_dendrites_axons: false,
            cell_probability_threshold: DEFAULT_CELL_PROBABILITY_THRESHOLD,
            save_path: None,
            save_folder: default_save_folder(),
            workers: 0,
            registration: RegistrationConfig::default(),
            detection: DetectionConfig::default(),
            classification: ClassifierConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn interleave(&self) -> Interleave {
        Interleave {
            nplanes: self.nplanes,
            nchannels: self.nchannels,
            functional_chan: self.functional_chan,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.interleave().validate()?;
        if !(0.0..=1.0).contains(&self.cell_probability_threshold) {
            return Err(SomataError::InvalidConfig(format!(
                "cell_probability_threshold must be in [0, 1], got {}",
                self.cell_probability_threshold
            )));
        }
        if self.save_folder.is_empty()
            || self.save_folder.contains(['/', '\\'])
            || self.save_folder == ".."
        {
            return Err(SomataError::InvalidConfig(format!(
                "save_folder must be a plain directory name, got {:?}",
                self.save_folder
            )));
        }
        self.registration.validate()?;
        self.detection.validate()?;
        Ok(())
    }
}
