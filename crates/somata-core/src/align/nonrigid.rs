use ndarray::{s, Array2};

use crate::error::Result;
use crate::frame::AlignmentOffset;

use super::phase_correlation::{bilinear_sample, compute_offset_array};

/// Smallest block edge for which phase correlation is meaningful.
const MIN_BLOCK_SIZE: usize = 8;

/// Regular grid of overlapping blocks used for non-rigid registration.
///
/// Block centres are spaced half a block apart; a frame smaller than one
/// block collapses to a single block covering the whole frame.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockGrid {
    pub block_height: usize,
    pub block_width: usize,
    pub row_centres: Vec<usize>,
    pub col_centres: Vec<usize>,
}

impl BlockGrid {
    pub fn new(height: usize, width: usize, block_size: usize) -> Self {
        let block = block_size.max(MIN_BLOCK_SIZE);
        let (block_height, row_centres) = axis_centres(height, block);
        let (block_width, col_centres) = axis_centres(width, block);
        Self {
            block_height,
            block_width,
            row_centres,
            col_centres,
        }
    }

    pub fn len(&self) -> usize {
        self.row_centres.len() * self.col_centres.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn region(&self, bi: usize, bj: usize) -> (usize, usize) {
        (
            self.row_centres[bi] - self.block_height / 2,
            self.col_centres[bj] - self.block_width / 2,
        )
    }
}

fn axis_centres(extent: usize, block: usize) -> (usize, Vec<usize>) {
    if extent <= block {
        return (extent, vec![extent / 2]);
    }
    let half = block / 2;
    let stride = half.max(1);
    let mut centres = Vec::new();
    let mut c = half;
    while c + (block - half) <= extent {
        centres.push(c);
        c += stride;
    }
    (block, centres)
}

/// Estimate each block's residual shift between a reference and an already
/// rigidly corrected frame. Shifts are clamped to `max_shift` pixels per axis.
pub fn estimate_block_shifts(
    reference: &Array2<f32>,
    corrected: &Array2<f32>,
    grid: &BlockGrid,
    max_shift: f64,
) -> Result<Vec<AlignmentOffset>> {
    let mut shifts = Vec::with_capacity(grid.len());
    for bi in 0..grid.row_centres.len() {
        for bj in 0..grid.col_centres.len() {
            let (r0, c0) = grid.region(bi, bj);
            let window = s![r0..r0 + grid.block_height, c0..c0 + grid.block_width];
            let ref_block = reference.slice(window).to_owned();
            let tgt_block = corrected.slice(window).to_owned();
            let offset = compute_offset_array(&ref_block, &tgt_block)?;
            shifts.push(AlignmentOffset::new(
                offset.dx.clamp(-max_shift, max_shift),
                offset.dy.clamp(-max_shift, max_shift),
            ));
        }
    }
    Ok(shifts)
}

/// Warp `data` with a global shift plus block residuals interpolated
/// bilinearly between block centres.
pub fn warp(
    data: &Array2<f32>,
    global: &AlignmentOffset,
    grid: &BlockGrid,
    block_shifts: &[AlignmentOffset],
) -> Array2<f32> {
    let (h, w) = data.dim();
    let cols = grid.col_centres.len();
    let at = |bi: usize, bj: usize| block_shifts[bi * cols + bj];

    let row_weights: Vec<(usize, usize, f64)> =
        (0..h).map(|r| find_interval(&grid.row_centres, r)).collect();
    let col_weights: Vec<(usize, usize, f64)> =
        (0..w).map(|c| find_interval(&grid.col_centres, c)).collect();

    Array2::from_shape_fn((h, w), |(row, col)| {
        let (r0, r1, fy) = row_weights[row];
        let (c0, c1, fx) = col_weights[col];
        let (s00, s01, s10, s11) = (at(r0, c0), at(r0, c1), at(r1, c0), at(r1, c1));
        let lerp = |a: f64, b: f64, c: f64, d: f64| {
            a * (1.0 - fy) * (1.0 - fx) + b * (1.0 - fy) * fx + c * fy * (1.0 - fx) + d * fy * fx
        };
        let dy = global.dy + lerp(s00.dy, s01.dy, s10.dy, s11.dy);
        let dx = global.dx + lerp(s00.dx, s01.dx, s10.dx, s11.dx);
        bilinear_sample(data, row as f64 - dy, col as f64 - dx)
    })
}

/// Bracketing centres for `pos` and the fractional weight of the upper one.
/// Positions outside the first/last centre clamp to it.
fn find_interval(centres: &[usize], pos: usize) -> (usize, usize, f64) {
    let last = centres.len() - 1;
    if pos <= centres[0] {
        return (0, 0, 0.0);
    }
    if pos >= centres[last] {
        return (last, last, 0.0);
    }
    let upper = centres.partition_point(|&c| c <= pos);
    let lower = upper - 1;
    let span = (centres[upper] - centres[lower]) as f64;
    (lower, upper, (pos - centres[lower]) as f64 / span)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_covers_frame_with_half_overlap() {
        let grid = BlockGrid::new(64, 96, 32);
        assert_eq!(grid.row_centres, vec![16, 32, 48]);
        assert_eq!(grid.col_centres, vec![16, 32, 48, 64, 80]);
        assert_eq!(grid.len(), 15);
    }

    #[test]
    fn small_frame_collapses_to_single_block() {
        let grid = BlockGrid::new(20, 20, 64);
        assert_eq!(grid.len(), 1);
        assert_eq!(grid.block_height, 20);
    }

    #[test]
    fn uniform_block_shifts_match_rigid_shift() {
        let data = Array2::from_shape_fn((16, 16), |(r, c)| (r * 16 + c) as f32 / 256.0);
        let grid = BlockGrid::new(16, 16, 8);
        let shifts = vec![AlignmentOffset::new(1.0, 0.0); grid.len()];
        let warped = warp(&data, &AlignmentOffset::default(), &grid, &shifts);
        assert!((warped[[5, 5]] - data[[5, 4]]).abs() < 1e-6);
    }
}
