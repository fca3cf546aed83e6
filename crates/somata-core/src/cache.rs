//! Decides whether a plane's registered volume can be reused.

use std::path::Path;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::consts::VOLUME_FORMAT_VERSION;
use crate::error::{Result, SomataError};
use crate::io::source::Interleave;
use crate::io::volume::RegisteredVolume;
use crate::registration::RegistrationConfig;
use crate::session::Plane;

/// Outcome of a cache check.
#[derive(Debug)]
pub enum CacheDecision {
    /// A valid volume produced by an identical configuration exists.
    Reuse(RegisteredVolume),
    /// Registration must run; the reason is kept for reporting.
    Recompute(RecomputeReason),
}

#[derive(Clone, Debug, PartialEq)]
pub enum RecomputeReason {
    Missing,
    /// The artifact exists but is unreadable or structurally wrong.
    Invalid(String),
    /// The artifact is valid but was produced by a different configuration.
    Stale,
    /// The caller asked for registration regardless of the cache.
    Forced,
}

impl std::fmt::Display for RecomputeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => write!(f, "no registered volume"),
            Self::Invalid(msg) => write!(f, "invalid volume: {msg}"),
            Self::Stale => write!(f, "configuration changed"),
            Self::Forced => write!(f, "forced"),
        }
    }
}

impl CacheDecision {
    pub fn is_reuse(&self) -> bool {
        matches!(self, Self::Reuse(_))
    }
}

#[derive(Serialize)]
struct SignatureInput<'a> {
    format_version: u32,
    source_identity: String,
    width: usize,
    height: usize,
    frame_count: usize,
    interleave: Interleave,
    registration: &'a RegistrationConfig,
}

/// Signature of everything that determines a plane's registered output.
pub fn run_signature(
    plane: &Plane,
    interleave: Interleave,
    config: &RegistrationConfig,
) -> Result<String> {
    // Batching changes throughput, never output.
    let mut registration = config.clone();
    registration.batch_size = 0;
    let input = SignatureInput {
        format_version: VOLUME_FORMAT_VERSION,
        source_identity: plane.identity(),
        width: plane.width,
        height: plane.height,
        frame_count: plane.frame_count,
        interleave,
        registration: &registration,
    };
    let encoded = serde_json::to_vec(&input)?;
    Ok(format!("{:x}", Sha256::digest(&encoded)))
}

/// Check the volume at `path` against `plane` and the current run's `signature`.
///
/// Never fails: anything short of a fully valid, matching volume is a
/// [`CacheDecision::Recompute`].
pub fn check(path: &Path, plane: &Plane, signature: &str) -> CacheDecision {
    if !path.exists() {
        debug!(plane = plane.index, "No cached volume");
        return CacheDecision::Recompute(RecomputeReason::Missing);
    }

    let volume = match RegisteredVolume::open(path) {
        Ok(v) => v,
        Err(SomataError::CacheValidation(msg)) => {
            warn!(plane = plane.index, %msg, "Cached volume rejected");
            return CacheDecision::Recompute(RecomputeReason::Invalid(msg));
        }
        Err(e) => {
            warn!(plane = plane.index, error = %e, "Cached volume unreadable");
            return CacheDecision::Recompute(RecomputeReason::Invalid(e.to_string()));
        }
    };

    if volume.width() != plane.width
        || volume.height() != plane.height
        || volume.frame_count() != plane.frame_count
    {
        let msg = format!(
            "volume is {} frames of {}x{}, plane has {} frames of {}x{}",
            volume.frame_count(),
            volume.width(),
            volume.height(),
            plane.frame_count,
            plane.width,
            plane.height
        );
        warn!(plane = plane.index, %msg, "Cached volume rejected");
        return CacheDecision::Recompute(RecomputeReason::Invalid(msg));
    }

    if volume.metadata().signature != signature {
        info!(plane = plane.index, "Cached volume built with a different configuration");
        return CacheDecision::Recompute(RecomputeReason::Stale);
    }

    info!(plane = plane.index, path = %path.display(), "Reusing registered volume");
    CacheDecision::Reuse(volume)
}
