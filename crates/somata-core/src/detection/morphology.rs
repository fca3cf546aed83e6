use ndarray::Array2;

/// Morphological opening (erosion followed by dilation) with a 3x3 square kernel.
///
/// Removes specks and thin bridges between neighbouring somata while
/// preserving larger regions.
pub fn morphological_opening(mask: &Array2<bool>) -> Array2<bool> {
    dilate(&erode(mask))
}

/// A pixel stays set only if its whole 3x3 neighbourhood is set.
/// Out-of-bounds neighbours count as unset.
pub fn erode(mask: &Array2<bool>) -> Array2<bool> {
    let (h, w) = mask.dim();
    Array2::from_shape_fn((h, w), |(row, col)| {
        let interior = row > 0 && col > 0 && row + 1 < h && col + 1 < w;
        interior && neighbourhood(h, w, row, col).all(|(r, c)| mask[[r, c]])
    })
}

/// A pixel becomes set if any pixel of its 3x3 neighbourhood is set.
pub fn dilate(mask: &Array2<bool>) -> Array2<bool> {
    let (h, w) = mask.dim();
    Array2::from_shape_fn((h, w), |(row, col)| {
        neighbourhood(h, w, row, col).any(|(r, c)| mask[[r, c]])
    })
}

/// In-bounds members of the 3x3 window centred on (row, col).
fn neighbourhood(
    h: usize,
    w: usize,
    row: usize,
    col: usize,
) -> impl Iterator<Item = (usize, usize)> {
    let rows = row.saturating_sub(1)..(row + 2).min(h);
    rows.flat_map(move |r| (col.saturating_sub(1)..(col + 2).min(w)).map(move |c| (r, c)))
}
