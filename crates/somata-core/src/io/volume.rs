//! Binary container for a plane's motion-corrected frames.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! magic[8] version:u32 width:u32 height:u32 frame_count:u32
//! frames: frame_count * height * width * i16
//! metadata: JSON (VolumeMetadata)
//! metadata_len:u64
//! sha256[32] over every preceding byte
//! ```
//!
//! The metadata trails the frames so the file can be streamed in one pass.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use memmap2::Mmap;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::consts::{VOLUME_FORMAT_VERSION, VOLUME_MAGIC, VOLUME_SAMPLE_SCALE};
use crate::error::{Result, SomataError};
use crate::frame::{AlignmentOffset, Frame, SourceInfo};

use super::atomic::AtomicFile;
use super::source::FrameSource;

const HEADER_SIZE: usize = 24;
const TRAILER_SIZE: usize = 8 + 32;

/// Shift applied to one frame during registration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameShift {
    pub dx: f64,
    pub dy: f64,
    /// Peak-to-mean ratio of the correlation surface.
    pub confidence: f64,
    /// Set when the raw estimate exceeded the sanity bound and was clamped.
    pub low_confidence: bool,
    /// Residual per-block shifts (non-rigid mode only), row-major over the block grid.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub block_shifts: Vec<AlignmentOffset>,
}

/// Registration metadata stored alongside the frames.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VolumeMetadata {
    /// Signature of the configuration that produced the volume.
    pub signature: String,
    pub source_identity: String,
    /// SHA-256 of the reference image the frames were aligned to.
    pub reference_checksum: String,
    pub mode: String,
    pub shifts: Vec<FrameShift>,
    pub low_confidence_frames: usize,
}

/// Streaming writer. Frames become visible only after [`VolumeWriter::finish`].
pub struct VolumeWriter {
    file: AtomicFile,
    hasher: Sha256,
    width: usize,
    height: usize,
    frame_count: usize,
    frames_written: usize,
    buf: Vec<u8>,
}

impl VolumeWriter {
    pub fn create(path: &Path, width: usize, height: usize, frame_count: usize) -> Result<Self> {
        let mut writer = Self {
            file: AtomicFile::create(path)?,
            hasher: Sha256::new(),
            width,
            height,
            frame_count,
            frames_written: 0,
            buf: Vec::with_capacity(width * height * 2),
        };
        let mut header = Vec::with_capacity(HEADER_SIZE);
        header.extend_from_slice(VOLUME_MAGIC);
        header.write_u32::<LittleEndian>(VOLUME_FORMAT_VERSION)?;
        header.write_u32::<LittleEndian>(width as u32)?;
        header.write_u32::<LittleEndian>(height as u32)?;
        header.write_u32::<LittleEndian>(frame_count as u32)?;
        writer.emit(&header)?;
        Ok(writer)
    }

    /// Append the next frame in temporal order.
    pub fn write_frame(&mut self, data: &Array2<f32>) -> Result<()> {
        if data.dim() != (self.height, self.width) {
            return Err(SomataError::Pipeline(format!(
                "frame shape {:?} does not match volume {}x{}",
                data.dim(),
                self.width,
                self.height
            )));
        }
        if self.frames_written >= self.frame_count {
            return Err(SomataError::Pipeline(format!(
                "volume already holds {} frames",
                self.frame_count
            )));
        }
        let mut buf = std::mem::take(&mut self.buf);
        buf.clear();
        for &v in data.iter() {
            let sample = (v * VOLUME_SAMPLE_SCALE)
                .round()
                .clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            buf.extend_from_slice(&sample.to_le_bytes());
        }
        self.emit(&buf)?;
        self.buf = buf;
        self.frames_written += 1;
        Ok(())
    }

    pub fn frames_written(&self) -> usize {
        self.frames_written
    }

    /// Append metadata and checksum, then move the file into place.
    pub fn finish(mut self, metadata: &VolumeMetadata) -> Result<()> {
        if self.frames_written != self.frame_count {
            return Err(SomataError::Pipeline(format!(
                "volume expects {} frames, {} written",
                self.frame_count, self.frames_written
            )));
        }
        let meta = serde_json::to_vec(metadata)?;
        self.emit(&meta)?;
        self.emit(&(meta.len() as u64).to_le_bytes())?;
        let digest = self.hasher.finalize_reset();
        self.file.write_all(&digest)?;
        self.file.commit()
    }

    fn emit(&mut self, bytes: &[u8]) -> Result<()> {
        self.hasher.update(bytes);
        self.file.write_all(bytes)?;
        Ok(())
    }
}

/// A validated, memory-mapped registered volume.
pub struct RegisteredVolume {
    mmap: Mmap,
    path: PathBuf,
    width: usize,
    height: usize,
    frame_count: usize,
    metadata: VolumeMetadata,
}

impl RegisteredVolume {
    /// Open and structurally validate a volume. Every failure is a
    /// [`SomataError::CacheValidation`] except a missing file, which is `Io`.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        // SAFETY: volumes are immutable once committed; replacement happens by
        // rename, which leaves this mapping's inode intact.
        let mmap = unsafe { Mmap::map(&file)? };
        let invalid = |msg: String| SomataError::CacheValidation(format!("{}: {msg}", path.display()));

        if mmap.len() < HEADER_SIZE + TRAILER_SIZE {
            return Err(invalid(format!("file too small ({} bytes)", mmap.len())));
        }
        if &mmap[..8] != VOLUME_MAGIC {
            return Err(invalid("bad magic".into()));
        }
        let mut cursor = std::io::Cursor::new(&mmap[8..HEADER_SIZE]);
        let version = cursor.read_u32::<LittleEndian>()?;
        let width = cursor.read_u32::<LittleEndian>()? as usize;
        let height = cursor.read_u32::<LittleEndian>()? as usize;
        let frame_count = cursor.read_u32::<LittleEndian>()? as usize;
        if version != VOLUME_FORMAT_VERSION {
            return Err(invalid(format!("format version {version}")));
        }

        let frames_bytes = width
            .checked_mul(height)
            .and_then(|p| p.checked_mul(2))
            .and_then(|b| b.checked_mul(frame_count))
            .ok_or_else(|| invalid("dimensions overflow".into()))?;
        let len = mmap.len();
        let meta_len_at = len - TRAILER_SIZE;
        let meta_len = u64::from_le_bytes(
            mmap[meta_len_at..meta_len_at + 8]
                .try_into()
                .map_err(|_| invalid("truncated trailer".into()))?,
        ) as usize;
        let expected = HEADER_SIZE
            .checked_add(frames_bytes)
            .and_then(|n| n.checked_add(meta_len))
            .and_then(|n| n.checked_add(TRAILER_SIZE));
        if expected != Some(len) {
            return Err(invalid(format!(
                "length {len} does not match {frame_count} frames of {width}x{height}"
            )));
        }

        let digest = Sha256::digest(&mmap[..len - 32]);
        if digest.as_slice() != &mmap[len - 32..] {
            return Err(invalid("checksum mismatch".into()));
        }

        let meta_start = HEADER_SIZE + frames_bytes;
        let metadata: VolumeMetadata = serde_json::from_slice(&mmap[meta_start..meta_start + meta_len])
            .map_err(|e| invalid(format!("metadata: {e}")))?;
        if metadata.shifts.len() != frame_count {
            return Err(invalid(format!(
                "{} shifts recorded for {frame_count} frames",
                metadata.shifts.len()
            )));
        }

        Ok(Self {
            mmap,
            path: path.to_path_buf(),
            width,
            height,
            frame_count,
            metadata,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn metadata(&self) -> &VolumeMetadata {
        &self.metadata
    }

    /// Decode frame `index` back to f32.
    pub fn frame(&self, index: usize) -> Result<Array2<f32>> {
        if index >= self.frame_count {
            return Err(SomataError::FrameIndexOutOfRange {
                index,
                total: self.frame_count,
            });
        }
        let frame_bytes = self.width * self.height * 2;
        let start = HEADER_SIZE + index * frame_bytes;
        let raw = &self.mmap[start..start + frame_bytes];
        let w = self.width;
        Ok(Array2::from_shape_fn((self.height, self.width), |(r, c)| {
            let i = (r * w + c) * 2;
            i16::from_le_bytes([raw[i], raw[i + 1]]) as f32 / VOLUME_SAMPLE_SCALE
        }))
    }

    /// Temporal mean projection.
    pub fn mean_image(&self) -> Result<Array2<f32>> {
        let mut acc = Array2::<f64>::zeros((self.height, self.width));
        for k in 0..self.frame_count {
            acc += &self.frame(k)?.mapv(|v| v as f64);
        }
        let n = self.frame_count.max(1) as f64;
        Ok(acc.mapv(|v| (v / n) as f32))
    }

    /// Temporal maximum projection.
    pub fn max_image(&self) -> Result<Array2<f32>> {
        let mut acc = Array2::<f32>::from_elem((self.height, self.width), f32::NEG_INFINITY);
        for k in 0..self.frame_count {
            let frame = self.frame(k)?;
            acc.zip_mut_with(&frame, |a, &b| *a = a.max(b));
        }
        if self.frame_count == 0 {
            acc.fill(0.0);
        }
        Ok(acc)
    }
}

impl std::fmt::Debug for RegisteredVolume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredVolume")
            .field("path", &self.path)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("frame_count", &self.frame_count)
            .finish()
    }
}

impl FrameSource for RegisteredVolume {
    fn info(&self) -> SourceInfo {
        SourceInfo {
            format: "volume".into(),
            total_frames: self.frame_count,
            width: self.width as u32,
            height: self.height as u32,
            bit_depth: 16,
        }
    }

    fn read_frame(&self, index: usize) -> Result<Frame> {
        Ok(Frame::new(self.frame(index)?, 16).with_index(index))
    }

    fn identity(&self) -> String {
        self.metadata.signature.clone()
    }
}

/// SHA-256 of an image's samples, as lowercase hex.
pub fn image_checksum(data: &Array2<f32>) -> String {
    let mut hasher = Sha256::new();
    let (h, w) = data.dim();
    hasher.update((h as u64).to_le_bytes());
    hasher.update((w as u64).to_le_bytes());
    for v in data.iter() {
        hasher.update(v.to_le_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Write a whole volume in one call. Used by tests and by tools that already
/// hold every corrected frame.
pub fn write_volume(path: &Path, frames: &[Array2<f32>], metadata: &VolumeMetadata) -> Result<()> {
    let first = frames.first().ok_or(SomataError::EmptySequence)?;
    let (h, w) = first.dim();
    let mut writer = VolumeWriter::create(path, w, h, frames.len())?;
    for frame in frames {
        writer.write_frame(frame)?;
    }
    writer.finish(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(n: usize) -> VolumeMetadata {
        VolumeMetadata {
            signature: "sig".into(),
            source_identity: "memory".into(),
            reference_checksum: "ref".into(),
            mode: "rigid".into(),
            shifts: vec![FrameShift::default(); n],
            low_confidence_frames: 0,
        }
    }

    #[test]
    fn written_volume_reopens_with_metadata() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        let frames = vec![Array2::from_elem((4, 5), 0.5f32); 3];
        write_volume(&path, &frames, &meta(3)).unwrap();

        let vol = RegisteredVolume::open(&path).unwrap();
        assert_eq!(vol.frame_count(), 3);
        assert_eq!(vol.width(), 5);
        assert_eq!(vol.metadata().signature, "sig");
        let f = vol.frame(2).unwrap();
        assert!((f[[3, 4]] - 0.5).abs() < 1e-4);
    }

    #[test]
    fn flipped_byte_fails_checksum() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        let frames = vec![Array2::from_elem((4, 4), 0.25f32); 2];
        write_volume(&path, &frames, &meta(2)).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[HEADER_SIZE + 3] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            RegisteredVolume::open(&path),
            Err(SomataError::CacheValidation(_))
        ));
    }

    #[test]
    fn finish_rejects_missing_frames() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        let mut writer = VolumeWriter::create(&path, 2, 2, 2).unwrap();
        writer.write_frame(&Array2::zeros((2, 2))).unwrap();
        assert!(writer.finish(&meta(2)).is_err());
        assert!(!path.exists());
    }
}
