use serde::{Deserialize, Serialize};

use crate::consts::{
    DEFAULT_BATCH_SIZE, DEFAULT_BLOCK_SIZE, DEFAULT_MAX_BLOCK_SHIFT, DEFAULT_MAX_SHIFT_FRACTION,
    DEFAULT_REFERENCE_FRAMES, DEFAULT_REFERENCE_ITERATIONS,
};
use crate::error::{Result, SomataError};

/// How frames are warped onto the reference.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum RegistrationMode {
    /// One translation per frame.
    #[default]
    Rigid,
    /// Rigid translation followed by per-block residual shifts.
    NonRigid {
        #[serde(default = "default_block_size")]
        block_size: usize,
        /// Largest residual shift (pixels, per axis) a block may take.
        #[serde(default = "default_max_block_shift")]
        max_block_shift: f64,
    },
}

impl RegistrationMode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Rigid => "rigid",
            Self::NonRigid { .. } => "nonrigid",
        }
    }
}

fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}
fn default_max_block_shift() -> f64 {
    DEFAULT_MAX_BLOCK_SHIFT
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegistrationConfig {
    #[serde(default)]
    pub mode: RegistrationMode,
    /// Sanity bound on a frame's shift, as a fraction of the frame extent per axis.
    #[serde(default = "default_max_shift_fraction")]
    pub max_shift_fraction: f64,
    /// Frames averaged into the initial reference.
    #[serde(default = "default_reference_frames")]
    pub reference_frames: usize,
    /// Align-and-average passes that refine the reference.
    #[serde(default = "default_reference_iterations")]
    pub reference_iterations: usize,
    /// Frames aligned in parallel between cancellation checks.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_max_shift_fraction() -> f64 {
    DEFAULT_MAX_SHIFT_FRACTION
}
fn default_reference_frames() -> usize {
    DEFAULT_REFERENCE_FRAMES
}
fn default_reference_iterations() -> usize {
    DEFAULT_REFERENCE_ITERATIONS
}
fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            mode: RegistrationMode::default(),
            max_shift_fraction: DEFAULT_MAX_SHIFT_FRACTION,
            reference_frames: DEFAULT_REFERENCE_FRAMES,
            reference_iterations: DEFAULT_REFERENCE_ITERATIONS,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl RegistrationConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.max_shift_fraction > 0.0 && self.max_shift_fraction <= 0.5) {
            return Err(SomataError::InvalidConfig(format!(
                "max_shift_fraction must be in (0, 0.5], got {}",
                self.max_shift_fraction
            )));
        }
        if self.reference_frames == 0 {
            return Err(SomataError::InvalidConfig(
                "reference_frames must be at least 1".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(SomataError::InvalidConfig(
                "batch_size must be at least 1".into(),
            ));
        }
        if let RegistrationMode::NonRigid {
            block_size,
            max_block_shift,
        } = self.mode
        {
            if block_size < 8 {
                return Err(SomataError::InvalidConfig(format!(
                    "block_size must be at least 8, got {block_size}"
                )));
            }
            if !(max_block_shift >= 0.0) {
                return Err(SomataError::InvalidConfig(format!(
                    "max_block_shift must be non-negative, got {max_block_shift}"
                )));
            }
        }
        Ok(())
    }
}
