use std::sync::Arc;

use ndarray::Array2;
use num_complex::Complex;
use rayon::prelude::*;
use rustfft::{Fft, FftPlanner};

use crate::consts::PARALLEL_PIXEL_THRESHOLD;
use crate::error::{Result, SomataError};
use crate::frame::AlignmentOffset;

use super::subpixel::refine_peak_paraboloid;

/// Result of correlating a target against a reference.
#[derive(Clone, Copy, Debug, Default)]
pub struct Correlation {
    /// Shift that moves the target onto the reference.
    pub offset: AlignmentOffset,
    /// Peak height in standard deviations above the surface mean.
    pub confidence: f64,
}

/// Phase correlator with the reference spectrum computed once.
///
/// Registration correlates thousands of frames against the same reference,
/// so the windowed reference FFT and the FFT plans are cached here.
pub struct PhaseCorrelator {
    height: usize,
    width: usize,
    window: Array2<f32>,
    reference_fft: Array2<Complex<f64>>,
    plans: FftPlans,
}

struct FftPlans {
    row_fwd: Arc<dyn Fft<f64>>,
    col_fwd: Arc<dyn Fft<f64>>,
    row_inv: Arc<dyn Fft<f64>>,
    col_inv: Arc<dyn Fft<f64>>,
}

impl PhaseCorrelator {
    pub fn new(reference: &Array2<f32>) -> Result<Self> {
        let (h, w) = reference.dim();
        if h < 2 || w < 2 {
            return Err(SomataError::InvalidDimensions {
                width: w as u32,
                height: h as u32,
            });
        }
        let mut planner = FftPlanner::new();
        let plans = FftPlans {
            row_fwd: planner.plan_fft_forward(w),
            col_fwd: planner.plan_fft_forward(h),
            row_inv: planner.plan_fft_inverse(w),
            col_inv: planner.plan_fft_inverse(h),
        };
        let window = hann_window(h, w);
        let reference_fft = fft2d(&(reference * &window), &plans);
        Ok(Self {
            height: h,
            width: w,
            window,
            reference_fft,
            plans,
        })
    }

    pub fn dim(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// Estimate the translation of `target` relative to the reference.
    pub fn correlate(&self, target: &Array2<f32>) -> Result<Correlation> {
        let (th, tw) = target.dim();
        if (th, tw) != (self.height, self.width) {
            return Err(SomataError::Pipeline(format!(
                "Array size mismatch: {}x{} vs {}x{}",
                self.width, self.height, tw, th
            )));
        }

        let target_fft = fft2d(&(target * &self.window), &self.plans);
        let cross_power = normalized_cross_power(&self.reference_fft, &target_fft);
        let surface = ifft2d(&cross_power, &self.plans);

        let (peak_row, peak_col, peak_val) = find_peak(&surface);
        let (h, w) = (self.height, self.width);

        // Wrap-around: peaks past the midpoint are negative shifts.
        let dy = if peak_row > h / 2 {
            peak_row as f64 - h as f64
        } else {
            peak_row as f64
        };
        let dx = if peak_col > w / 2 {
            peak_col as f64 - w as f64
        } else {
            peak_col as f64
        };

        let (sub_dy, sub_dx) = refine_peak_paraboloid(&surface, peak_row, peak_col);

        let n = surface.len() as f64;
        let mean = surface.sum() / n;
        let var = surface.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let confidence = if var > 0.0 {
            (peak_val - mean) / var.sqrt()
        } else {
            0.0
        };

        Ok(Correlation {
            offset: AlignmentOffset::new(dx + sub_dx, dy + sub_dy),
            confidence,
        })
    }
}

/// Compute the translation offset between two arrays using FFT phase correlation.
pub fn compute_offset_array(
    reference: &Array2<f32>,
    target: &Array2<f32>,
) -> Result<AlignmentOffset> {
    Ok(PhaseCorrelator::new(reference)?.correlate(target)?.offset)
}

/// Shift an array by the given offset using bilinear interpolation.
/// Pixels sampled from outside the source are zero.
pub fn shift_array(data: &Array2<f32>, offset: &AlignmentOffset) -> Array2<f32> {
    let (h, w) = data.dim();
    if h * w >= PARALLEL_PIXEL_THRESHOLD {
        let rows: Vec<Vec<f32>> = (0..h)
            .into_par_iter()
            .map(|row| {
                (0..w)
                    .map(|col| {
                        bilinear_sample(data, row as f64 - offset.dy, col as f64 - offset.dx)
                    })
                    .collect()
            })
            .collect();
        Array2::from_shape_fn((h, w), |(r, c)| rows[r][c])
    } else {
        Array2::from_shape_fn((h, w), |(row, col)| {
            bilinear_sample(data, row as f64 - offset.dy, col as f64 - offset.dx)
        })
    }
}

fn hann_window(h: usize, w: usize) -> Array2<f32> {
    let wy: Vec<f64> = (0..h)
        .map(|r| 0.5 * (1.0 - (std::f64::consts::TAU * r as f64 / h as f64).cos()))
        .collect();
    let wx: Vec<f64> = (0..w)
        .map(|c| 0.5 * (1.0 - (std::f64::consts::TAU * c as f64 / w as f64).cos()))
        .collect();
    Array2::from_shape_fn((h, w), |(r, c)| (wy[r] * wx[c]) as f32)
}

/// 2D FFT: row-wise FFT, then column-wise FFT.
fn fft2d(data: &Array2<f32>, plans: &FftPlans) -> Array2<Complex<f64>> {
    let (h, w) = data.dim();
    let mut result = data.mapv(|v| Complex::new(v as f64, 0.0));

    let mut row_buf = vec![Complex::new(0.0, 0.0); w];
    for row in 0..h {
        for col in 0..w {
            row_buf[col] = result[[row, col]];
        }
        plans.row_fwd.process(&mut row_buf);
        for col in 0..w {
            result[[row, col]] = row_buf[col];
        }
    }

    let mut col_buf = vec![Complex::new(0.0, 0.0); h];
    for col in 0..w {
        for row in 0..h {
            col_buf[row] = result[[row, col]];
        }
        plans.col_fwd.process(&mut col_buf);
        for row in 0..h {
            result[[row, col]] = col_buf[row];
        }
    }

    result
}

/// Inverse 2D FFT, returning the normalized real part.
fn ifft2d(data: &Array2<Complex<f64>>, plans: &FftPlans) -> Array2<f64> {
    let (h, w) = data.dim();
    let mut work = data.clone();

    let mut col_buf = vec![Complex::new(0.0, 0.0); h];
    for col in 0..w {
        for row in 0..h {
            col_buf[row] = work[[row, col]];
        }
        plans.col_inv.process(&mut col_buf);
        for row in 0..h {
            work[[row, col]] = col_buf[row];
        }
    }

    let mut row_buf = vec![Complex::new(0.0, 0.0); w];
    for row in 0..h {
        for col in 0..w {
            row_buf[col] = work[[row, col]];
        }
        plans.row_inv.process(&mut row_buf);
        for col in 0..w {
            work[[row, col]] = row_buf[col];
        }
    }

    let scale = 1.0 / (h * w) as f64;
    work.mapv(|c| c.re * scale)
}

fn normalized_cross_power(
    ref_fft: &Array2<Complex<f64>>,
    tgt_fft: &Array2<Complex<f64>>,
) -> Array2<Complex<f64>> {
    let mut result = ref_fft.clone();
    result.zip_mut_with(tgt_fft, |r, t| {
        let cross = *r * t.conj();
        let mag = cross.norm();
        *r = if mag > 1e-12 {
            cross / mag
        } else {
            Complex::new(0.0, 0.0)
        };
    });
    result
}

fn find_peak(data: &Array2<f64>) -> (usize, usize, f64) {
    let mut best = (0, 0, f64::NEG_INFINITY);
    for ((row, col), &v) in data.indexed_iter() {
        if v > best.2 {
            best = (row, col, v);
        }
    }
    best
}

pub fn bilinear_sample(data: &Array2<f32>, y: f64, x: f64) -> f32 {
    let (h, w) = data.dim();

    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let x1 = x0 + 1;
    let y1 = y0 + 1;

    let fx = (x - x0 as f64) as f32;
    let fy = (y - y0 as f64) as f32;

    let sample = |r: i64, c: i64| -> f32 {
        if r >= 0 && r < h as i64 && c >= 0 && c < w as i64 {
            data[[r as usize, c as usize]]
        } else {
            0.0
        }
    };

    let v00 = sample(y0, x0);
    let v10 = sample(y0, x1);
    let v01 = sample(y1, x0);
    let v11 = sample(y1, x1);

    v00 * (1.0 - fx) * (1.0 - fy)
        + v10 * fx * (1.0 - fy)
        + v01 * (1.0 - fx) * fy
        + v11 * fx * fy
}
