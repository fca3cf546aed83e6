use std::fs::File;
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt};
use memmap2::Mmap;
use ndarray::Array2;

use crate::error::{Result, SomataError};
use crate::frame::{Frame, SourceInfo};

use super::source::FrameSource;

pub const SER_HEADER_SIZE: usize = 178;
pub const SER_MAGIC: &[u8; 14] = b"LUCAM-RECORDER";

/// SER container header (178 bytes).
#[derive(Clone, Debug)]
pub struct SerHeader {
    pub color_id: i32,
    pub little_endian: bool,
    pub width: u32,
    pub height: u32,
    pub pixel_depth: u32,
    pub frame_count: u32,
}

impl SerHeader {
    /// Bytes per sample (1 for 8-bit, 2 for 9-16 bit).
    pub fn bytes_per_sample(&self) -> usize {
        if self.pixel_depth <= 8 { 1 } else { 2 }
    }

    /// Samples per pixel (1 for mono/bayer, 3 for RGB/BGR).
    pub fn samples_per_pixel(&self) -> usize {
        match self.color_id {
            100 | 101 => 3,
            _ => 1,
        }
    }

    /// Total bytes per frame, or `None` on overflow.
    pub fn frame_byte_size(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(self.bytes_per_sample() * self.samples_per_pixel())
    }
}

/// Memory-mapped reader for SER acquisition containers.
pub struct SerReader {
    mmap: Mmap,
    path: PathBuf,
    frame_bytes: usize,
    pub header: SerHeader,
}

impl SerReader {
    /// Open a SER file and parse its header.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        // SAFETY: the mapping is read-only and raw acquisitions are not
        // modified while a session is open.
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < SER_HEADER_SIZE {
            return Err(SomataError::SourceRead(
                "file too small for SER header".into(),
            ));
        }
        if &mmap[0..14] != SER_MAGIC {
            return Err(SomataError::SourceRead(
                "missing LUCAM-RECORDER magic".into(),
            ));
        }

        let header = parse_header(&mmap[..SER_HEADER_SIZE])?;
        let frame_bytes = header
            .frame_byte_size()
            .ok_or(SomataError::InvalidDimensions {
                width: header.width,
                height: header.height,
            })?;

        let expected = SER_HEADER_SIZE + frame_bytes * header.frame_count as usize;
        if mmap.len() < expected {
            return Err(SomataError::SourceRead(format!(
                "file truncated: expected at least {} bytes, got {}",
                expected,
                mmap.len()
            )));
        }

        Ok(Self {
            mmap,
            path: path.to_path_buf(),
            frame_bytes,
            header,
        })
    }

    /// Raw bytes of a single frame (zero-copy from the mapping).
    pub fn frame_raw(&self, index: usize) -> Result<&[u8]> {
        let count = self.header.frame_count as usize;
        if index >= count {
            return Err(SomataError::FrameIndexOutOfRange {
                index,
                total: count,
            });
        }
        let offset = SER_HEADER_SIZE + index * self.frame_bytes;
        Ok(&self.mmap[offset..offset + self.frame_bytes])
    }
}

impl FrameSource for SerReader {
    fn info(&self) -> SourceInfo {
        SourceInfo {
            format: "ser".into(),
            total_frames: self.header.frame_count as usize,
            width: self.header.width,
            height: self.header.height,
            bit_depth: self.header.pixel_depth as u8,
        }
    }

    fn read_frame(&self, index: usize) -> Result<Frame> {
        let raw = self.frame_raw(index)?;
        let h = self.header.height as usize;
        let w = self.header.width as usize;
        // RGB/BGR: the green sample stands in for luminance.
        let sample = if self.header.samples_per_pixel() == 3 { 1 } else { 0 };
        let data = decode_plane(raw, h, w, &self.header, sample);
        let bits = self.header.bytes_per_sample() as u8 * 8;
        Ok(Frame::new(data, bits).with_index(index))
    }

    fn identity(&self) -> String {
        format!(
            "ser:{}:{}",
            self.path.canonicalize().unwrap_or_else(|_| self.path.clone()).display(),
            self.mmap.len()
        )
    }
}

fn parse_header(buf: &[u8]) -> Result<SerHeader> {
    let mut cursor = std::io::Cursor::new(&buf[14..]); // skip magic

    let _lu_id = cursor.read_i32::<LittleEndian>()?;
    let color_id = cursor.read_i32::<LittleEndian>()?;
    let le_flag = cursor.read_i32::<LittleEndian>()?;
    let width = cursor.read_i32::<LittleEndian>()? as u32;
    let height = cursor.read_i32::<LittleEndian>()? as u32;
    let pixel_depth = cursor.read_i32::<LittleEndian>()? as u32;
    let frame_count = cursor.read_i32::<LittleEndian>()? as u32;

    if width == 0 || height == 0 {
        return Err(SomataError::InvalidDimensions { width, height });
    }
    if pixel_depth == 0 || pixel_depth > 16 {
        return Err(SomataError::SourceRead(format!(
            "unsupported pixel depth {pixel_depth}"
        )));
    }

    // Most writers put 0 here for little-endian data despite the format notes.
    let little_endian = le_flag != 1;

    Ok(SerHeader {
        color_id,
        little_endian,
        width,
        height,
        pixel_depth,
        frame_count,
    })
}

fn decode_plane(
    raw: &[u8],
    height: usize,
    width: usize,
    header: &SerHeader,
    sample_index: usize,
) -> Array2<f32> {
    let bytes = header.bytes_per_sample();
    let samples = header.samples_per_pixel();
    let max_val = ((1u32 << header.pixel_depth) - 1) as f32;

    Array2::from_shape_fn((height, width), |(row, col)| {
        let idx = ((row * width + col) * samples + sample_index) * bytes;
        let val = if bytes == 1 {
            raw[idx] as f32
        } else {
            let pair = [raw[idx], raw[idx + 1]];
            if header.little_endian {
                u16::from_le_bytes(pair) as f32
            } else {
                u16::from_be_bytes(pair) as f32
            }
        };
        val / max_val
    })
}
