use ndarray::Array2;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::align::nonrigid::{estimate_block_shifts, warp, BlockGrid};
use crate::align::{shift_array, PhaseCorrelator};
use crate::error::{Result, SomataError};
use crate::frame::AlignmentOffset;
use crate::io::source::FrameSource;
use crate::io::volume::{image_checksum, FrameShift, RegisteredVolume, VolumeMetadata, VolumeWriter};
use crate::pipeline::PipelineStage;

use super::config::{RegistrationConfig, RegistrationMode};
use super::{RegistrationJob, Registrar};

/// FFT phase-correlation registration against an iteratively refined mean reference.
#[derive(Clone, Copy, Debug, Default)]
pub struct PhaseCorrelationRegistrar;

impl Registrar for PhaseCorrelationRegistrar {
    fn name(&self) -> &str {
        "phase-correlation"
    }

    fn register(&self, job: &RegistrationJob<'_>) -> Result<RegisteredVolume> {
        let frames = job.frames;
        let config = job.config;
        let n = frames.frame_count();
        if n == 0 {
            return Err(SomataError::SourceRead(format!(
                "plane {} has no frames",
                job.plane
            )));
        }
        let info = frames.info();
        let (h, w) = (info.height as usize, info.width as usize);
        let bounds = ShiftBounds {
            x: config.max_shift_fraction * w as f64,
            y: config.max_shift_fraction * h as f64,
        };

        let reference = build_reference(frames, config, bounds)?;
        job.cancel.check()?;
        let correlator = PhaseCorrelator::new(&reference)?;
        let grid = match config.mode {
            RegistrationMode::NonRigid { block_size, .. } => Some(BlockGrid::new(h, w, block_size)),
            RegistrationMode::Rigid => None,
        };

        info!(
            plane = job.plane,
            frames = n,
            mode = config.mode.name(),
            "Registering plane"
        );
        job.reporter
            .begin_stage(job.plane, PipelineStage::Registration, Some(n));

        let mut writer = VolumeWriter::create(job.destination, w, h, n)?;
        let mut shifts = Vec::with_capacity(n);
        let mut low_confidence = 0usize;
        let batch_size = config.batch_size.max(1);

        for start in (0..n).step_by(batch_size) {
            job.cancel.check()?;
            let end = (start + batch_size).min(n);
            let aligned: Vec<Result<(Array2<f32>, FrameShift)>> = (start..end)
                .into_par_iter()
                .map(|k| {
                    align_frame(
                        frames,
                        k,
                        &correlator,
                        &reference,
                        grid.as_ref(),
                        &config.mode,
                        bounds,
                    )
                })
                .collect();

            for (offset, result) in aligned.into_iter().enumerate() {
                let (corrected, shift) = result?;
                if shift.low_confidence {
                    let degenerate = SomataError::AlignmentDegenerate {
                        frame: start + offset,
                        dx: shift.dx,
                        dy: shift.dy,
                        bound: bounds.x.max(bounds.y),
                    };
                    warn!(plane = job.plane, "{degenerate}; clamped");
                    low_confidence += 1;
                }
                writer.write_frame(&corrected)?;
                shifts.push(shift);
            }
            job.reporter.advance(job.plane, end - start);
        }

        job.cancel.check()?;
        let metadata = VolumeMetadata {
            signature: job.signature.to_string(),
            source_identity: frames.identity(),
            reference_checksum: image_checksum(&reference),
            mode: config.mode.name().to_string(),
            shifts,
            low_confidence_frames: low_confidence,
        };
        writer.finish(&metadata)?;
        job.reporter.finish_stage(job.plane);

        info!(
            plane = job.plane,
            low_confidence_frames = low_confidence,
            "Registration complete"
        );
        RegisteredVolume::open(job.destination)
    }
}

#[derive(Clone, Copy, Debug)]
struct ShiftBounds {
    x: f64,
    y: f64,
}

impl ShiftBounds {
    /// Clamp to the bound. The flag is set when clamping changed the offset.
    fn clamp(&self, offset: AlignmentOffset) -> (AlignmentOffset, bool) {
        let dx = offset.dx.clamp(-self.x, self.x);
        let dy = offset.dy.clamp(-self.y, self.y);
        let clamped = dx != offset.dx || dy != offset.dy;
        (AlignmentOffset::new(dx, dy), clamped)
    }
}

/// Mean of the first frames, refined by aligning those frames to it and
/// re-averaging.
fn build_reference(
    frames: &dyn FrameSource,
    config: &RegistrationConfig,
    bounds: ShiftBounds,
) -> Result<Array2<f32>> {
    let count = config.reference_frames.clamp(1, frames.frame_count());
    let seed: Vec<Array2<f32>> = (0..count)
        .into_par_iter()
        .map(|k| frames.read_frame(k).map(|f| f.data))
        .collect::<Result<_>>()?;

    let mut reference = mean_of(&seed);
    for iteration in 0..config.reference_iterations {
        let correlator = PhaseCorrelator::new(&reference)?;
        let aligned: Vec<Array2<f32>> = seed
            .par_iter()
            .map(|frame| -> Result<Array2<f32>> {
                let correlation = correlator.correlate(frame)?;
                let (offset, _) = bounds.clamp(correlation.offset);
                Ok(shift_array(frame, &offset))
            })
            .collect::<Result<_>>()?;
        reference = mean_of(&aligned);
        debug!(iteration, frames = count, "Reference refined");
    }
    Ok(reference)
}

fn mean_of(frames: &[Array2<f32>]) -> Array2<f32> {
    let (h, w) = frames[0].dim();
    let mut acc = Array2::<f64>::zeros((h, w));
    for frame in frames {
        acc.zip_mut_with(frame, |a, &v| *a += v as f64);
    }
    let n = frames.len() as f64;
    acc.mapv(|v| (v / n) as f32)
}

fn align_frame(
    frames: &dyn FrameSource,
    index: usize,
    correlator: &PhaseCorrelator,
    reference: &Array2<f32>,
    grid: Option<&BlockGrid>,
    mode: &RegistrationMode,
    bounds: ShiftBounds,
) -> Result<(Array2<f32>, FrameShift)> {
    let raw = frames.read_frame(index)?.data;
    let correlation = correlator.correlate(&raw)?;
    let (offset, clamped) = bounds.clamp(correlation.offset);
    let rigid = shift_array(&raw, &offset);

    let mut shift = FrameShift {
        dx: offset.dx,
        dy: offset.dy,
        confidence: correlation.confidence,
        low_confidence: clamped,
        block_shifts: Vec::new(),
    };

    let corrected = match (mode, grid) {
        (RegistrationMode::NonRigid { max_block_shift, .. }, Some(grid)) => {
            let blocks = estimate_block_shifts(reference, &rigid, grid, *max_block_shift)?;
            let warped = warp(&raw, &offset, grid, &blocks);
            shift.block_shifts = blocks;
            warped
        }
        _ => rigid,
    };
    Ok((corrected, shift))
}
