use std::path::Path;
use std::sync::Arc;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, SomataError};
use crate::frame::{Frame, SourceInfo};

use super::ser::SerReader;
use super::tiff_stack::TiffStackSource;

/// Read access to a session's raw frames, independent of the container format.
///
/// Implementations must be cheap to read concurrently; registration pulls
/// frames from several rayon workers at once.
pub trait FrameSource: Send + Sync {
    fn info(&self) -> SourceInfo;

    /// Read frame `index`, converted to f32 in [0.0, 1.0].
    fn read_frame(&self, index: usize) -> Result<Frame>;

    /// Stable identity of the underlying data. Two sources with the same
    /// identity are assumed to produce the same frames.
    fn identity(&self) -> String;

    fn frame_count(&self) -> usize {
        self.info().total_frames
    }

    /// Lengths of consecutive runs of frames that each start a fresh
    /// plane/channel cycle. One run by default.
    fn segments(&self) -> Vec<usize> {
        vec![self.frame_count()]
    }
}

/// Open a raw source: a `.ser` file or a directory of TIFF stacks.
pub fn open_source(path: &Path, look_one_level_down: bool) -> Result<Arc<dyn FrameSource>> {
    if path.is_dir() {
        let source = TiffStackSource::discover(path, look_one_level_down)?;
        return Ok(Arc::new(source));
    }
    let is_ser = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("ser"));
    if is_ser {
        let reader = SerReader::open(path)
            .map_err(|e| SomataError::SourceRead(format!("{}: {e}", path.display())))?;
        return Ok(Arc::new(reader));
    }
    Err(SomataError::SourceRead(format!(
        "{} is neither a SER file nor a frame directory",
        path.display()
    )))
}

/// Frames held in memory. Used by tests and by front-ends that already
/// decoded the acquisition.
pub struct MemorySource {
    frames: Vec<Array2<f32>>,
    identity: String,
}

impl MemorySource {
    pub fn new(frames: Vec<Array2<f32>>) -> Result<Self> {
        let first = frames.first().ok_or(SomataError::EmptySequence)?;
        let dim = first.dim();
        if let Some(bad) = frames.iter().position(|f| f.dim() != dim) {
            return Err(SomataError::SourceRead(format!(
                "frame {bad} has shape {:?}, expected {:?}",
                frames[bad].dim(),
                dim
            )));
        }

        let mut hasher = Sha256::new();
        for frame in &frames {
            for v in frame.iter() {
                hasher.update(v.to_le_bytes());
            }
        }
        let identity = format!("memory:{:x}", hasher.finalize());
        Ok(Self { frames, identity })
    }
}

impl FrameSource for MemorySource {
    fn info(&self) -> SourceInfo {
        let (h, w) = self.frames[0].dim();
        SourceInfo {
            format: "memory".into(),
            total_frames: self.frames.len(),
            width: w as u32,
            height: h as u32,
            bit_depth: 32,
        }
    }

    fn read_frame(&self, index: usize) -> Result<Frame> {
        let data = self
            .frames
            .get(index)
            .ok_or(SomataError::FrameIndexOutOfRange {
                index,
                total: self.frames.len(),
            })?;
        Ok(Frame::new(data.clone(), 32).with_index(index))
    }

    fn identity(&self) -> String {
        self.identity.clone()
    }
}

/// How planes and channels are interleaved in the raw frame sequence.
///
/// Within a segment, frame `i` belongs to plane `(i / nchannels) % nplanes`
/// and channel `i % nchannels`. Only the functional channel (1-based) is
/// processed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interleave {
    pub nplanes: usize,
    pub nchannels: usize,
    pub functional_chan: usize,
}

impl Default for Interleave {
    fn default() -> Self {
        Self {
            nplanes: 1,
            nchannels: 1,
            functional_chan: 1,
        }
    }
}

impl Interleave {
    pub fn validate(&self) -> Result<()> {
        if self.nplanes == 0 {
            return Err(SomataError::InvalidConfig("nplanes must be at least 1".into()));
        }
        if self.nchannels == 0 {
            return Err(SomataError::InvalidConfig(
                "nchannels must be at least 1".into(),
            ));
        }
        if self.functional_chan == 0 || self.functional_chan > self.nchannels {
            return Err(SomataError::InvalidConfig(format!(
                "functional_chan {} must be in 1..={}",
                self.functional_chan, self.nchannels
            )));
        }
        Ok(())
    }

    /// Source indices of `plane`'s functional-channel frames, in order.
    ///
    /// The cycle restarts at the first frame of every segment. A segment's
    /// trailing partial cycle still contributes the frames it holds.
    pub fn plane_indices(&self, plane: usize, segments: &[usize]) -> Vec<usize> {
        let cycle = self.nplanes * self.nchannels;
        let phase = plane * self.nchannels + (self.functional_chan - 1);
        let mut indices = Vec::new();
        let mut start = 0;
        for &len in segments {
            indices.extend((phase..len).step_by(cycle).map(|i| start + i));
            start += len;
        }
        indices
    }
}

/// One plane's view of an interleaved source.
pub struct PlaneFrames {
    source: Arc<dyn FrameSource>,
    interleave: Interleave,
    plane: usize,
    indices: Vec<usize>,
}

impl PlaneFrames {
    pub fn new(source: Arc<dyn FrameSource>, interleave: Interleave, plane: usize) -> Self {
        let indices = interleave.plane_indices(plane, &source.segments());
        Self {
            source,
            interleave,
            plane,
            indices,
        }
    }

    /// Source frame behind each plane frame.
    pub fn source_indices(&self) -> &[usize] {
        &self.indices
    }
}

impl FrameSource for PlaneFrames {
    fn info(&self) -> SourceInfo {
        let mut info = self.source.info();
        info.total_frames = self.indices.len();
        info
    }

    fn read_frame(&self, index: usize) -> Result<Frame> {
        let source_index = *self
            .indices
            .get(index)
            .ok_or(SomataError::FrameIndexOutOfRange {
                index,
                total: self.indices.len(),
            })?;
        let frame = self
            .source
            .read_frame(source_index)
            .map_err(|e| SomataError::SourceRead(format!("frame {source_index}: {e}")))?;
        Ok(frame.with_index(index))
    }

    fn identity(&self) -> String {
        format!(
            "{}#plane{}/{}x{}c{}",
            self.source.identity(),
            self.plane,
            self.interleave.nplanes,
            self.interleave.nchannels,
            self.interleave.functional_chan
        )
    }
}
