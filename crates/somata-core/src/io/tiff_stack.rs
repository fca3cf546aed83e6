use std::cmp::Ordering;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::ColorType;
use tracing::{debug, info};

use crate::error::{Result, SomataError};
use crate::frame::{Frame, SourceInfo};

use super::source::FrameSource;

const TIFF_EXTENSIONS: [&str; 2] = ["tif", "tiff"];
const FRAME_EXTENSIONS: [&str; 3] = ["tif", "tiff", "png"];

/// One file of the stack and the frames it holds.
#[derive(Clone, Debug)]
struct StackFile {
    path: PathBuf,
    pages: usize,
    first_frame: usize,
}

/// Frame geometry shared by every page of the stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct PageFormat {
    width: u32,
    height: u32,
    bit_depth: u8,
}

/// A directory of TIFF stacks (every page is a frame) and single-frame PNGs.
///
/// Frame numbering runs on across files. Each scanned folder forms its own
/// segment, so plane interleaving restarts at the first file of a folder.
pub struct TiffStackSource {
    files: Vec<StackFile>,
    segments: Vec<usize>,
    total: usize,
    format: PageFormat,
}

impl TiffStackSource {
    /// Collect frame files in `root` (and its immediate subdirectories when
    /// `look_one_level_down` is set), each directory in natural order.
    pub fn discover(root: &Path, look_one_level_down: bool) -> Result<Self> {
        let mut folders = vec![list_frames(root)?];
        if look_one_level_down {
            let mut dirs: Vec<PathBuf> = fs::read_dir(root)?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.is_dir())
                .collect();
            dirs.sort_by(|a, b| natural_cmp(&file_name(a), &file_name(b)));
            for dir in dirs {
                let nested = list_frames(&dir)?;
                debug!(dir = %dir.display(), files = nested.len(), "Found frames one level down");
                folders.push(nested);
            }
        }
        Self::from_folders(folders)
    }

    /// Build a source from an explicit, already ordered file list.
    pub fn from_files(files: Vec<PathBuf>) -> Result<Self> {
        Self::from_folders(vec![files])
    }

    /// Build a source from ordered folders of ordered files. Empty folders
    /// are skipped.
    pub fn from_folders(folders: Vec<Vec<PathBuf>>) -> Result<Self> {
        let mut files = Vec::new();
        let mut segments = Vec::new();
        let mut format: Option<PageFormat> = None;
        let mut total = 0;

        for folder in folders.into_iter().filter(|f| !f.is_empty()) {
            let segment_start = total;
            for path in folder {
                let (pages, file_format) = scan_file(&path)?;
                match format {
                    None => format = Some(file_format),
                    Some(f) if f.width != file_format.width || f.height != file_format.height => {
                        return Err(SomataError::SourceRead(format!(
                            "{} is {}x{}, expected {}x{}",
                            path.display(),
                            file_format.width,
                            file_format.height,
                            f.width,
                            f.height
                        )));
                    }
                    Some(_) => {}
                }
                files.push(StackFile {
                    path,
                    pages,
                    first_frame: total,
                });
                total += pages;
            }
            segments.push(total - segment_start);
        }

        let format = format.ok_or_else(|| SomataError::SourceRead("no TIFF frames found".into()))?;
        info!(
            files = files.len(),
            frames = total,
            width = format.width,
            height = format.height,
            "Opened TIFF stack"
        );
        Ok(Self {
            files,
            segments,
            total,
            format,
        })
    }

    /// File holding global frame `index`, and the page within it.
    fn locate(&self, index: usize) -> Result<(&StackFile, usize)> {
        if index >= self.total {
            return Err(SomataError::FrameIndexOutOfRange {
                index,
                total: self.total,
            });
        }
        let pos = self
            .files
            .partition_point(|f| f.first_frame + f.pages <= index);
        let file = &self.files[pos];
        Ok((file, index - file.first_frame))
    }
}

impl FrameSource for TiffStackSource {
    fn info(&self) -> SourceInfo {
        SourceInfo {
            format: "tiff".into(),
            total_frames: self.total,
            width: self.format.width,
            height: self.format.height,
            bit_depth: self.format.bit_depth,
        }
    }

    fn read_frame(&self, index: usize) -> Result<Frame> {
        let (file, page) = self.locate(index)?;
        let data = if is_tiff(&file.path) {
            read_tiff_page(&file.path, page)?
        } else {
            read_single_image(&file.path)?
        };
        let (h, w) = data.dim();
        if w as u32 != self.format.width || h as u32 != self.format.height {
            return Err(SomataError::SourceRead(format!(
                "{} page {page} is {w}x{h}, expected {}x{}",
                file.path.display(),
                self.format.width,
                self.format.height
            )));
        }
        Ok(Frame::new(data, self.format.bit_depth).with_index(index))
    }

    fn identity(&self) -> String {
        let names: Vec<String> = self
            .files
            .iter()
            .map(|f| format!("{}:{}", f.path.display(), f.pages))
            .collect();
        let segments: Vec<String> = self.segments.iter().map(usize::to_string).collect();
        format!(
            "tiff:{}x{}:{}:{}",
            self.format.width,
            self.format.height,
            segments.join(","),
            names.join("|")
        )
    }

    fn segments(&self) -> Vec<usize> {
        self.segments.clone()
    }
}

fn source_err(path: &Path, e: impl std::fmt::Display) -> SomataError {
    SomataError::SourceRead(format!("{}: {e}", path.display()))
}

fn open_tiff(path: &Path) -> Result<Decoder<BufReader<File>>> {
    let file = File::open(path).map_err(|e| source_err(path, e))?;
    Decoder::new(BufReader::new(file)).map_err(|e| source_err(path, e))
}

/// Page count and geometry of one file.
fn scan_file(path: &Path) -> Result<(usize, PageFormat)> {
    if !is_tiff(path) {
        let img = image::open(path).map_err(|e| source_err(path, e))?;
        let color = img.color();
        let bit_depth = (color.bits_per_pixel() / color.channel_count() as u16) as u8;
        return Ok((
            1,
            PageFormat {
                width: img.width(),
                height: img.height(),
                bit_depth,
            },
        ));
    }

    let mut decoder = open_tiff(path)?;
    let format = page_format(&mut decoder, path)?;
    let mut pages = 1;
    while decoder.more_images() {
        decoder.next_image().map_err(|e| source_err(path, e))?;
        let (w, h) = decoder.dimensions().map_err(|e| source_err(path, e))?;
        if (w, h) != (format.width, format.height) {
            return Err(SomataError::SourceRead(format!(
                "{} page {pages} is {w}x{h}, expected {}x{}",
                path.display(),
                format.width,
                format.height
            )));
        }
        pages += 1;
    }
    Ok((pages, format))
}

fn page_format(decoder: &mut Decoder<BufReader<File>>, path: &Path) -> Result<PageFormat> {
    let (width, height) = decoder.dimensions().map_err(|e| source_err(path, e))?;
    let bit_depth = match decoder.colortype().map_err(|e| source_err(path, e))? {
        ColorType::Gray(b) | ColorType::RGB(b) | ColorType::RGBA(b) => b,
        other => {
            return Err(SomataError::SourceRead(format!(
                "{}: unsupported TIFF color type {other:?}",
                path.display()
            )))
        }
    };
    Ok(PageFormat {
        width,
        height,
        bit_depth,
    })
}

fn read_tiff_page(path: &Path, page: usize) -> Result<Array2<f32>> {
    let mut decoder = open_tiff(path)?;
    decoder.seek_to_image(page).map_err(|e| source_err(path, e))?;
    let (w, h) = decoder.dimensions().map_err(|e| source_err(path, e))?;
    let channels = match decoder.colortype().map_err(|e| source_err(path, e))? {
        ColorType::Gray(_) => 1,
        ColorType::RGB(_) => 3,
        ColorType::RGBA(_) => 4,
        other => {
            return Err(SomataError::SourceRead(format!(
                "{}: unsupported TIFF color type {other:?}",
                path.display()
            )))
        }
    };
    let samples: Vec<f32> = match decoder.read_image().map_err(|e| source_err(path, e))? {
        DecodingResult::U8(buf) => buf.iter().map(|&v| v as f32 / 255.0).collect(),
        DecodingResult::U16(buf) => buf.iter().map(|&v| v as f32 / 65535.0).collect(),
        DecodingResult::U32(buf) => buf.iter().map(|&v| v as f32 / u32::MAX as f32).collect(),
        DecodingResult::I16(buf) => buf
            .iter()
            .map(|&v| (v as f32 - i16::MIN as f32) / 65535.0)
            .collect(),
        DecodingResult::F32(buf) => buf,
        DecodingResult::F64(buf) => buf.iter().map(|&v| v as f32).collect(),
        _ => {
            return Err(SomataError::SourceRead(format!(
                "{}: unsupported TIFF sample format",
                path.display()
            )))
        }
    };

    let (w, h) = (w as usize, h as usize);
    if samples.len() != w * h * channels {
        return Err(SomataError::SourceRead(format!(
            "{} page {page}: {} samples for {w}x{h}x{channels}",
            path.display(),
            samples.len()
        )));
    }
    // Colour pages collapse to the mean of R, G and B.
    let pixels: Vec<f32> = if channels == 1 {
        samples
    } else {
        samples
            .chunks_exact(channels)
            .map(|px| (px[0] + px[1] + px[2]) / 3.0)
            .collect()
    };
    Array2::from_shape_vec((h, w), pixels).map_err(|e| source_err(path, e))
}

fn read_single_image(path: &Path) -> Result<Array2<f32>> {
    let gray = image::open(path).map_err(|e| source_err(path, e))?.to_luma16();
    let (w, h) = gray.dimensions();
    Ok(Array2::from_shape_fn((h as usize, w as usize), |(row, col)| {
        gray.get_pixel(col as u32, row as u32).0[0] as f32 / 65535.0
    }))
}

fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| SomataError::SourceRead(format!("{}: {e}", dir.display())))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && has_frame_extension(p))
        .collect();
    files.sort_by(|a, b| natural_cmp(&file_name(a), &file_name(b)));
    Ok(files)
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| extensions.iter().any(|x| e.eq_ignore_ascii_case(x)))
}

fn has_frame_extension(path: &Path) -> bool {
    has_extension(path, &FRAME_EXTENSIONS)
}

fn is_tiff(path: &Path) -> bool {
    has_extension(path, &TIFF_EXTENSIONS)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Compare strings treating runs of ASCII digits as numbers, so that
/// `file2.tif` sorts before `file10.tif`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut ai = a.chars().peekable();
    let mut bi = b.chars().peekable();
    loop {
        match (ai.peek().copied(), bi.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(ca), Some(cb)) if ca.is_ascii_digit() && cb.is_ascii_digit() => {
                let na = take_number(&mut ai);
                let nb = take_number(&mut bi);
                let trimmed_a = na.trim_start_matches('0');
                let trimmed_b = nb.trim_start_matches('0');
                let ord = trimmed_a
                    .len()
                    .cmp(&trimmed_b.len())
                    .then_with(|| trimmed_a.cmp(trimmed_b))
                    .then_with(|| na.len().cmp(&nb.len()));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(ca), Some(cb)) => {
                let ord = ca.cmp(&cb);
                if ord != Ordering::Equal {
                    return ord;
                }
                ai.next();
                bi.next();
            }
        }
    }
}

fn take_number(it: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(&c) = it.peek() {
        if !c.is_ascii_digit() {
            break;
        }
        digits.push(c);
        it.next();
    }
    digits
}
