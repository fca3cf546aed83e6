//! Motion correction of a plane's raw frames into a [`RegisteredVolume`].

pub mod config;
mod phase;

use std::path::Path;

use crate::error::Result;
use crate::io::source::FrameSource;
use crate::io::volume::RegisteredVolume;
use crate::pipeline::{CancelToken, ProgressReporter};

pub use config::{RegistrationConfig, RegistrationMode};
pub use phase::PhaseCorrelationRegistrar;

/// Everything a registrar needs for one plane.
pub struct RegistrationJob<'a> {
    pub plane: usize,
    pub frames: &'a dyn FrameSource,
    pub config: &'a RegistrationConfig,
    /// Run signature recorded in the volume for later cache checks.
    pub signature: &'a str,
    /// Final location of the volume. Written atomically.
    pub destination: &'a Path,
    pub cancel: &'a CancelToken,
    pub reporter: &'a dyn ProgressReporter,
}

/// A registration algorithm.
///
/// Implementations must write the volume atomically to `job.destination`
/// and leave any previous volume untouched on error or cancellation.
pub trait Registrar: Send + Sync {
    fn name(&self) -> &str;

    fn register(&self, job: &RegistrationJob<'_>) -> Result<RegisteredVolume>;
}
