use ndarray::{Array2, Axis};
use rayon::prelude::*;

use crate::consts::PARALLEL_PIXEL_THRESHOLD;

/// Separable Gaussian blur with edge clamping. `sigma <= 0` returns a copy.
pub fn gaussian_blur_array(data: &Array2<f32>, sigma: f32) -> Array2<f32> {
    if !(sigma > 0.0) {
        return data.clone();
    }
    let kernel = make_gaussian_kernel(sigma);
    let rows = convolve(data, &kernel, Axis(1));
    convolve(&rows, &kernel, Axis(0))
}

fn make_gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = (sigma * 3.0).ceil() as isize;
    let s2 = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (-radius..=radius)
        .map(|x| (-(x * x) as f32 / s2).exp())
        .collect();
    let sum: f32 = kernel.iter().sum();
    for v in &mut kernel {
        *v /= sum;
    }
    kernel
}

/// 1D convolution along `axis` (1 = within rows, 0 = within columns).
fn convolve(data: &Array2<f32>, kernel: &[f32], axis: Axis) -> Array2<f32> {
    let (h, w) = data.dim();
    let radius = (kernel.len() / 2) as isize;
    let tap = |row: usize, col: usize| -> f32 {
        kernel
            .iter()
            .enumerate()
            .map(|(ki, &kv)| {
                let off = ki as isize - radius;
                let v = if axis == Axis(1) {
                    data[[row, (col as isize + off).clamp(0, w as isize - 1) as usize]]
                } else {
                    data[[(row as isize + off).clamp(0, h as isize - 1) as usize, col]]
                };
                v * kv
            })
            .sum()
    };

    if h * w >= PARALLEL_PIXEL_THRESHOLD {
        let rows: Vec<Vec<f32>> = (0..h)
            .into_par_iter()
            .map(|row| (0..w).map(|col| tap(row, col)).collect())
            .collect();
        Array2::from_shape_fn((h, w), |(r, c)| rows[r][c])
    } else {
        Array2::from_shape_fn((h, w), |(r, c)| tap(r, c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blur_preserves_flat_image() {
        let data = Array2::from_elem((8, 8), 0.4f32);
        let blurred = gaussian_blur_array(&data, 1.5);
        assert!(blurred.iter().all(|&v| (v - 0.4).abs() < 1e-5));
    }

    #[test]
    fn blur_spreads_impulse_symmetrically() {
        let mut data = Array2::zeros((9, 9));
        data[[4, 4]] = 1.0f32;
        let blurred = gaussian_blur_array(&data, 1.0);
        assert!(blurred[[4, 4]] < 1.0);
        assert!((blurred[[3, 4]] - blurred[[5, 4]]).abs() < 1e-6);
        assert!((blurred[[4, 3]] - blurred[[3, 4]]).abs() < 1e-6);
    }
}
