use ndarray::Array2;

use crate::consts::OTSU_HISTOGRAM_BINS;

use super::config::ThresholdMethod;

/// Compute the threshold value using the configured method.
pub fn compute_threshold(data: &Array2<f32>, method: &ThresholdMethod, sigma_mul: f32) -> f32 {
    match method {
        ThresholdMethod::MeanPlusSigma => {
            let (mean, std) = compute_mean_stddev(data);
            (mean + sigma_mul as f64 * std) as f32
        }
        ThresholdMethod::Otsu => otsu_threshold(data),
        ThresholdMethod::Fixed(v) => *v,
    }
}

/// Compute mean and standard deviation of pixel values.
pub fn compute_mean_stddev(data: &Array2<f32>) -> (f64, f64) {
    let n = data.len() as f64;
    if n == 0.0 {
        return (0.0, 0.0);
    }
    let mean = data.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var = data.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Otsu's thresholding over the image's own [min, max] range.
///
/// Projections of registered data rarely span [0, 1], so the histogram is
/// stretched to the observed range first.
pub fn otsu_threshold(data: &Array2<f32>) -> f32 {
    let (lo, hi) = data
        .iter()
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if !(hi > lo) {
        return if hi.is_finite() { hi } else { 0.0 };
    }

    let bins = OTSU_HISTOGRAM_BINS;
    let span = hi - lo;
    let mut histogram = vec![0u64; bins];
    for &v in data.iter().filter(|v| v.is_finite()) {
        let bin = (((v - lo) / span * (bins - 1) as f32) as usize).min(bins - 1);
        histogram[bin] += 1;
    }

    let total: f64 = histogram.iter().sum::<u64>() as f64;
    let sum_all: f64 = histogram
        .iter()
        .enumerate()
        .map(|(i, &c)| i as f64 * c as f64)
        .sum();

    let mut weight_bg = 0.0_f64;
    let mut sum_bg = 0.0_f64;
    let mut best_variance = 0.0_f64;
    let mut best_bin = 0usize;

    for (i, &count) in histogram.iter().enumerate() {
        weight_bg += count as f64;
        if weight_bg == 0.0 {
            continue;
        }
        let weight_fg = total - weight_bg;
        if weight_fg == 0.0 {
            break;
        }
        sum_bg += i as f64 * count as f64;
        let mean_bg = sum_bg / weight_bg;
        let mean_fg = (sum_all - sum_bg) / weight_fg;
        let between_variance = weight_bg * weight_fg * (mean_bg - mean_fg).powi(2);
        if between_variance > best_variance {
            best_variance = between_variance;
            best_bin = i;
        }
    }

    lo + (best_bin as f32 + 0.5) / (bins - 1) as f32 * span
}
