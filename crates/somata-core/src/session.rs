use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::error::{Result, SomataError};
use crate::frame::SourceInfo;
use crate::io::source::{open_source, FrameSource, Interleave, PlaneFrames};
use crate::pipeline::config::PipelineConfig;

/// One imaging plane of a session.
#[derive(Clone)]
pub struct Plane {
    pub index: usize,
    pub width: usize,
    pub height: usize,
    pub frame_count: usize,
    frames: Arc<PlaneFrames>,
}

impl Plane {
    /// Raw frames of this plane, in temporal order.
    pub fn frames(&self) -> &dyn FrameSource {
        self.frames.as_ref()
    }

    pub fn identity(&self) -> String {
        self.frames.identity()
    }
}

impl std::fmt::Debug for Plane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plane")
            .field("index", &self.index)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("frame_count", &self.frame_count)
            .finish()
    }
}

/// One acquisition. Immutable once constructed; runs borrow it.
#[derive(Debug)]
pub struct Session {
    source_dir: PathBuf,
    dest_dir: PathBuf,
    frame_rate: f64,
    interleave: Interleave,
    source_info: SourceInfo,
    planes: Vec<Plane>,
}

impl Session {
    /// Open the raw data at `path` (a SER file or a directory of frames).
    ///
    /// The destination defaults to the source directory unless
    /// `config.save_path` overrides it.
    pub fn open(path: &Path, config: &PipelineConfig) -> Result<Self> {
        let source = open_source(path, config.look_one_level_down)?;
        let source_dir = if path.is_dir() {
            path.to_path_buf()
        } else {
            path.parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."))
        };
        Self::from_source(source, source_dir, config)
    }

    /// Build a session around an already opened frame source.
    pub fn from_source(
        source: Arc<dyn FrameSource>,
        source_dir: PathBuf,
        config: &PipelineConfig,
    ) -> Result<Self> {
        let interleave = config.interleave();
        interleave.validate()?;
        if !(config.frame_rate > 0.0) {
            return Err(SomataError::InvalidConfig(format!(
                "frame_rate must be positive, got {}",
                config.frame_rate
            )));
        }

        let source_info = source.info();
        let mut planes = Vec::with_capacity(interleave.nplanes);
        for index in 0..interleave.nplanes {
            let frames = Arc::new(PlaneFrames::new(source.clone(), interleave, index));
            let frame_count = frames.frame_count();
            if frame_count == 0 {
                return Err(SomataError::SourceRead(format!(
                    "{} frames leave plane {index} empty with {} planes x {} channels",
                    source_info.total_frames, interleave.nplanes, interleave.nchannels
                )));
            }
            planes.push(Plane {
                index,
                width: source_info.width as usize,
                height: source_info.height as usize,
                frame_count,
                frames,
            });
        }
        let per_plane: Vec<usize> = planes.iter().map(|p| p.frame_count).collect();

        let dest_dir = config.save_path.clone().unwrap_or_else(|| source_dir.clone());
        info!(
            source = %source_dir.display(),
            dest = %dest_dir.display(),
            planes = interleave.nplanes,
            frames_per_plane = ?per_plane,
            "Session opened"
        );

        Ok(Self {
            source_dir,
            dest_dir,
            frame_rate: config.frame_rate,
            interleave,
            source_info,
            planes,
        })
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    pub fn dest_dir(&self) -> &Path {
        &self.dest_dir
    }

    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    pub fn interleave(&self) -> Interleave {
        self.interleave
    }

    pub fn source_info(&self) -> &SourceInfo {
        &self.source_info
    }

    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    pub fn plane(&self, index: usize) -> Option<&Plane> {
        self.planes.get(index)
    }

    pub fn nplanes(&self) -> usize {
        self.planes.len()
    }
}
