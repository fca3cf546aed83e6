use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::{Result, SomataError};
use crate::io::volume::RegisteredVolume;

use super::model::{Projection, RawMask, SegmentationModel};

/// One detected region of interest.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoiCandidate {
    /// Position in the plane's ordered candidate sequence.
    pub index: usize,
    /// Row-major linear pixel indices (`row * width + col`), ascending.
    pub pixels: Vec<u32>,
    /// (row, col).
    pub centroid: (f64, f64),
    pub npix: usize,
    /// (min_row, max_row, min_col, max_col).
    pub bbox: (usize, usize, usize, usize),
    /// Mean pixel distance to the centroid relative to a disk of equal area.
    pub compactness: f64,
    /// Ratio of the principal axes of the pixel distribution.
    pub aspect_ratio: f64,
    pub confidence: f32,
    /// Mean fluorescence inside the mask, per registered frame.
    pub trace: Vec<f32>,
    pub mean: f64,
    pub std: f64,
    pub skew: f64,
}

/// Ordered candidates of one plane plus what produced them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub width: usize,
    pub height: usize,
    pub model: String,
    /// Identifies the candidate index space; see [`fingerprint`].
    pub fingerprint: String,
    pub candidates: Vec<RoiCandidate>,
}

impl DetectionResult {
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Run `model` on the volume's projection and turn its masks into ordered,
/// fully described candidates.
pub fn detect_rois(
    volume: &RegisteredVolume,
    model: &dyn SegmentationModel,
) -> Result<DetectionResult> {
    let (h, w) = (volume.height(), volume.width());
    let image = match model.projection() {
        Projection::Mean => volume.mean_image()?,
        Projection::Max => volume.max_image()?,
    };

    let raw = model.detect(&image).map_err(|e| match e {
        e @ SomataError::ModelInvocation { .. } => e,
        other => SomataError::ModelInvocation {
            model: model.name().to_string(),
            reason: other.to_string(),
        },
    })?;

    let masks = raw
        .into_iter()
        .enumerate()
        .map(|(i, m)| validate_mask(m, i, h, w, model.name()))
        .collect::<Result<Vec<_>>>()?;

    let mut candidates: Vec<RoiCandidate> = masks
        .into_iter()
        .map(|(pixels, confidence)| shape_stats(pixels, confidence, w))
        .collect();
    order_candidates(&mut candidates);
    attach_traces(volume, &mut candidates)?;

    let fingerprint = fingerprint(w, h, &candidates);
    info!(
        model = model.name(),
        candidates = candidates.len(),
        "ROI detection complete"
    );
    Ok(DetectionResult {
        width: w,
        height: h,
        model: model.name().to_string(),
        fingerprint,
        candidates,
    })
}

/// Check a raw mask and convert it to sorted, deduplicated linear indices.
fn validate_mask(
    mask: RawMask,
    position: usize,
    h: usize,
    w: usize,
    model: &str,
) -> Result<(Vec<u32>, f32)> {
    let reject = |reason: String| SomataError::ModelInvocation {
        model: model.to_string(),
        reason: format!("mask {position}: {reason}"),
    };
    if mask.pixels.is_empty() {
        return Err(reject("empty mask".into()));
    }
    if !mask.confidence.is_finite() {
        return Err(reject(format!("confidence {}", mask.confidence)));
    }
    let mut pixels = Vec::with_capacity(mask.pixels.len());
    for (r, c) in mask.pixels {
        if r >= h || c >= w {
            return Err(reject(format!("pixel ({r}, {c}) outside {w}x{h}")));
        }
        let linear = u32::try_from(r * w + c)
            .map_err(|_| reject(format!("pixel ({r}, {c}) not addressable in {w}x{h}")))?;
        pixels.push(linear);
    }
    pixels.sort_unstable();
    pixels.dedup();
    Ok((pixels, mask.confidence.clamp(0.0, 1.0)))
}

/// Geometry of a mask. Trace statistics are filled in later.
fn shape_stats(pixels: Vec<u32>, confidence: f32, width: usize) -> RoiCandidate {
    let n = pixels.len() as f64;
    let coords: Vec<(f64, f64)> = pixels
        .iter()
        .map(|&p| ((p as usize / width) as f64, (p as usize % width) as f64))
        .collect();

    let (sum_r, sum_c) = coords
        .iter()
        .fold((0.0, 0.0), |(sr, sc), &(r, c)| (sr + r, sc + c));
    let centroid = (sum_r / n, sum_c / n);

    let mut bbox = (usize::MAX, 0, usize::MAX, 0);
    for &(r, c) in &coords {
        let (r, c) = (r as usize, c as usize);
        bbox = (bbox.0.min(r), bbox.1.max(r), bbox.2.min(c), bbox.3.max(c));
    }

    let mean_dist = coords
        .iter()
        .map(|&(r, c)| ((r - centroid.0).powi(2) + (c - centroid.1).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    // A disk of area n has radius sqrt(n / pi) and mean radial distance 2r/3.
    let disk_mean = 2.0 / 3.0 * (n / std::f64::consts::PI).sqrt();
    let compactness = if disk_mean > 0.0 {
        (mean_dist / disk_mean).max(1.0)
    } else {
        1.0
    };

    let (mut vrr, mut vcc, mut vrc) = (0.0, 0.0, 0.0);
    for &(r, c) in &coords {
        let (dr, dc) = (r - centroid.0, c - centroid.1);
        vrr += dr * dr;
        vcc += dc * dc;
        vrc += dr * dc;
    }
    let (vrr, vcc, vrc) = (vrr / n, vcc / n, vrc / n);
    let half_trace = (vrr + vcc) / 2.0;
    let spread = ((vrr - vcc).powi(2) / 4.0 + vrc * vrc).sqrt();
    // Each pixel has variance 1/12 along both axes, so lines stay finite.
    let major = half_trace + spread + 1.0 / 12.0;
    let minor = (half_trace - spread).max(0.0) + 1.0 / 12.0;
    let aspect_ratio = (major / minor).sqrt();

    RoiCandidate {
        index: 0,
        npix: pixels.len(),
        pixels,
        centroid,
        bbox,
        compactness,
        aspect_ratio,
        confidence,
        trace: Vec::new(),
        mean: 0.0,
        std: 0.0,
        skew: 0.0,
    }
}

/// Stable order: centroid row-major, then larger first, then first pixel.
/// Assigns `index` to match the final position.
pub fn order_candidates(candidates: &mut [RoiCandidate]) {
    candidates.sort_by(|a, b| {
        a.centroid
            .0
            .total_cmp(&b.centroid.0)
            .then_with(|| a.centroid.1.total_cmp(&b.centroid.1))
            .then_with(|| b.npix.cmp(&a.npix))
            .then_with(|| a.pixels.first().cmp(&b.pixels.first()))
    });
    for (i, c) in candidates.iter_mut().enumerate() {
        c.index = i;
    }
}

/// Mean fluorescence per candidate for every frame, plus trace moments.
fn attach_traces(volume: &RegisteredVolume, candidates: &mut [RoiCandidate]) -> Result<()> {
    if candidates.is_empty() {
        return Ok(());
    }
    let per_frame: Vec<Vec<f32>> = (0..volume.frame_count())
        .into_par_iter()
        .map(|k| -> Result<Vec<f32>> {
            let frame = volume.frame(k)?;
            let flat = frame
                .as_slice()
                .ok_or_else(|| SomataError::Pipeline("non-contiguous frame".into()))?;
            Ok(candidates
                .iter()
                .map(|c| {
                    let sum: f64 = c.pixels.iter().map(|&p| flat[p as usize] as f64).sum();
                    (sum / c.npix as f64) as f32
                })
                .collect())
        })
        .collect::<Result<_>>()?;

    for (i, candidate) in candidates.iter_mut().enumerate() {
        candidate.trace = per_frame.iter().map(|row| row[i]).collect();
        let (mean, std, skew) = moments(&candidate.trace);
        candidate.mean = mean;
        candidate.std = std;
        candidate.skew = skew;
    }
    Ok(())
}

/// Mean, standard deviation and skewness. Flat traces have zero skew.
fn moments(trace: &[f32]) -> (f64, f64, f64) {
    let n = trace.len() as f64;
    if n == 0.0 {
        return (0.0, 0.0, 0.0);
    }
    let mean = trace.iter().map(|&v| v as f64).sum::<f64>() / n;
    let m2 = trace.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
    let m3 = trace.iter().map(|&v| (v as f64 - mean).powi(3)).sum::<f64>() / n;
    let std = m2.sqrt();
    let skew = if m2 > 1e-12 { m3 / m2.powf(1.5) } else { 0.0 };
    (mean, std, skew)
}

/// SHA-256 over the image size, candidate count and every candidate's pixel
/// set, in order. Equal fingerprints mean an identical index space.
pub fn fingerprint(width: usize, height: usize, candidates: &[RoiCandidate]) -> String {
    let mut hasher = Sha256::new();
    hasher.update((width as u64).to_le_bytes());
    hasher.update((height as u64).to_le_bytes());
    hasher.update((candidates.len() as u64).to_le_bytes());
    for c in candidates {
        hasher.update((c.pixels.len() as u64).to_le_bytes());
        for p in &c.pixels {
            hasher.update(p.to_le_bytes());
        }
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(r0: usize, c0: usize, side: usize, width: usize) -> Vec<u32> {
        let mut px = Vec::new();
        for r in r0..r0 + side {
            for c in c0..c0 + side {
                px.push((r * width + c) as u32);
            }
        }
        px
    }

    #[test]
    fn square_is_compact_and_round() {
        let c = shape_stats(square(2, 2, 5, 20), 0.9, 20);
        assert_eq!(c.npix, 25);
        assert_eq!(c.centroid, (4.0, 4.0));
        assert_eq!(c.bbox, (2, 6, 2, 6));
        assert!(c.compactness < 1.2, "compactness {}", c.compactness);
        assert!((c.aspect_ratio - 1.0).abs() < 1e-9);
    }

    #[test]
    fn line_is_elongated() {
        let px: Vec<u32> = (0..10).map(|c| (3 * 20 + c) as u32).collect();
        let c = shape_stats(px, 0.5, 20);
        assert!(c.aspect_ratio > 5.0);
    }

    #[test]
    fn ordering_is_row_major_then_size() {
        let mut cands = vec![
            shape_stats(square(10, 0, 3, 20), 1.0, 20),
            shape_stats(square(0, 10, 3, 20), 1.0, 20),
            shape_stats(square(0, 0, 3, 20), 1.0, 20),
        ];
        order_candidates(&mut cands);
        assert_eq!(cands[0].bbox, (0, 2, 0, 2));
        assert_eq!(cands[1].bbox, (0, 2, 10, 12));
        assert_eq!(cands[2].bbox, (10, 12, 0, 2));
        assert!(cands.iter().enumerate().all(|(i, c)| c.index == i));
    }

    #[test]
    fn out_of_bounds_mask_is_a_model_error() {
        let mask = RawMask {
            pixels: vec![(0, 0), (5, 9)],
            confidence: 1.0,
        };
        let err = validate_mask(mask, 0, 5, 10, "test").unwrap_err();
        assert!(matches!(err, SomataError::ModelInvocation { .. }));
    }

    #[test]
    fn unaddressable_pixel_is_a_model_error() {
        let w = 1usize << 20;
        let h = 1usize << 13;
        let mask = RawMask {
            pixels: vec![(h - 1, w - 1)],
            confidence: 1.0,
        };
        let err = validate_mask(mask, 0, h, w, "test").unwrap_err();
        assert!(matches!(err, SomataError::ModelInvocation { .. }));
    }

    #[test]
    fn fingerprint_tracks_pixel_sets() {
        let a = vec![shape_stats(square(0, 0, 3, 20), 1.0, 20)];
        let b = vec![shape_stats(square(0, 1, 3, 20), 1.0, 20)];
        assert_ne!(fingerprint(20, 20, &a), fingerprint(20, 20, &b));
        assert_eq!(fingerprint(20, 20, &a), fingerprint(20, 20, &a.clone()));
    }

    #[test]
    fn skew_of_spiky_trace_is_positive() {
        let mut trace = vec![0.1f32; 50];
        trace[10] = 0.9;
        let (_, std, skew) = moments(&trace);
        assert!(std > 0.0);
        assert!(skew > 1.0);
    }
}
