use ndarray::Array2;

/// Refine a correlation peak with a 1D parabola fit along each axis.
///
/// The correlation surface is periodic, so neighbours of an edge peak wrap
/// around; peaks at zero shift (the common case for registration) still get
/// refined. Returns `(delta_row, delta_col)` clamped to half a pixel.
pub fn refine_peak_paraboloid(
    correlation: &Array2<f64>,
    peak_row: usize,
    peak_col: usize,
) -> (f64, f64) {
    let (h, w) = correlation.dim();
    if h < 3 || w < 3 {
        return (0.0, 0.0);
    }

    let up = (peak_row + h - 1) % h;
    let down = (peak_row + 1) % h;
    let left = (peak_col + w - 1) % w;
    let right = (peak_col + 1) % w;
    let centre = correlation[[peak_row, peak_col]];

    let delta_row = parabola_vertex(
        correlation[[up, peak_col]],
        centre,
        correlation[[down, peak_col]],
    );
    let delta_col = parabola_vertex(
        correlation[[peak_row, left]],
        centre,
        correlation[[peak_row, right]],
    );

    (delta_row.clamp(-0.5, 0.5), delta_col.clamp(-0.5, 0.5))
}

fn parabola_vertex(prev: f64, curr: f64, next: f64) -> f64 {
    let denom = prev - 2.0 * curr + next;
    if denom.abs() > 1e-12 {
        (prev - next) / (2.0 * denom)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symmetric_peak_has_no_offset() {
        let mut c = Array2::<f64>::zeros((5, 5));
        c[[2, 2]] = 1.0;
        c[[1, 2]] = 0.5;
        c[[3, 2]] = 0.5;
        c[[2, 1]] = 0.5;
        c[[2, 3]] = 0.5;
        let (dr, dc) = refine_peak_paraboloid(&c, 2, 2);
        assert!(dr.abs() < 1e-9 && dc.abs() < 1e-9);
    }

    #[test]
    fn edge_peak_uses_wrapped_neighbours() {
        let mut c = Array2::<f64>::zeros((6, 6));
        c[[0, 0]] = 1.0;
        c[[5, 0]] = 0.8; // wrapped "above"
        c[[1, 0]] = 0.2;
        let (dr, _) = refine_peak_paraboloid(&c, 0, 0);
        assert!(dr < 0.0, "peak should lean toward the wrapped neighbour, got {dr}");
    }
}
