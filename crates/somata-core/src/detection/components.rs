use std::collections::HashMap;

use ndarray::Array2;

/// Pixel adjacency used when labelling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Connectivity {
    Four,
    Eight,
}

/// One connected component of a binary mask.
#[derive(Clone, Debug)]
pub struct Component {
    /// Member pixels as (row, col), in row-major order.
    pub pixels: Vec<(usize, usize)>,
    /// Bounding box: (min_row, max_row, min_col, max_col).
    pub bbox: (usize, usize, usize, usize),
}

impl Component {
    pub fn area(&self) -> usize {
        self.pixels.len()
    }
}

/// Label connected components of a binary mask with two-pass union-find.
///
/// Components come back ordered by their first pixel in row-major order,
/// so the result depends only on the mask.
pub fn connected_components(mask: &Array2<bool>, connectivity: Connectivity) -> Vec<Component> {
    let (h, w) = mask.dim();
    if h == 0 || w == 0 {
        return Vec::new();
    }

    let mut labels = Array2::<u32>::zeros((h, w));
    // Index 0 unused; labels start at 1.
    let mut parent: Vec<u32> = vec![0];

    // Pass 1: provisional labels from already visited neighbours.
    for row in 0..h {
        for col in 0..w {
            if !mask[[row, col]] {
                continue;
            }
            let mut neighbours = [0u32; 4];
            let mut count = 0;
            let mut push = |l: u32| {
                if l > 0 {
                    neighbours[count] = l;
                    count += 1;
                }
            };
            if row > 0 {
                push(labels[[row - 1, col]]);
            }
            if col > 0 {
                push(labels[[row, col - 1]]);
            }
            if connectivity == Connectivity::Eight && row > 0 {
                if col > 0 {
                    push(labels[[row - 1, col - 1]]);
                }
                if col + 1 < w {
                    push(labels[[row - 1, col + 1]]);
                }
            }

            let seen = &neighbours[..count];
            match seen.iter().min() {
                None => {
                    let next = parent.len() as u32;
                    parent.push(next);
                    labels[[row, col]] = next;
                }
                Some(&smallest) => {
                    labels[[row, col]] = smallest;
                    for &other in seen {
                        union(&mut parent, smallest, other);
                    }
                }
            }
        }
    }

    // Pass 2: resolve roots and gather pixels. A component's slot is
    // assigned when its first pixel is met.
    let mut slots: HashMap<u32, usize> = HashMap::new();
    let mut components: Vec<Component> = Vec::new();
    for row in 0..h {
        for col in 0..w {
            let lbl = labels[[row, col]];
            if lbl == 0 {
                continue;
            }
            let root = find(&parent, lbl);
            let slot = *slots.entry(root).or_insert_with(|| {
                components.push(Component {
                    pixels: Vec::new(),
                    bbox: (row, row, col, col),
                });
                components.len() - 1
            });
            let c = &mut components[slot];
            c.pixels.push((row, col));
            c.bbox.0 = c.bbox.0.min(row);
            c.bbox.1 = c.bbox.1.max(row);
            c.bbox.2 = c.bbox.2.min(col);
            c.bbox.3 = c.bbox.3.max(col);
        }
    }
    components
}

/// Returns true if the component's bounding box touches any edge of the image.
pub fn touches_border(bbox: (usize, usize, usize, usize), height: usize, width: usize) -> bool {
    let (min_row, max_row, min_col, max_col) = bbox;
    min_row == 0 || max_row + 1 >= height || min_col == 0 || max_col + 1 >= width
}

fn find(parent: &[u32], mut x: u32) -> u32 {
    while parent[x as usize] != x {
        x = parent[x as usize];
    }
    x
}

fn union(parent: &mut [u32], a: u32, b: u32) {
    let ra = find(parent, a);
    let rb = find(parent, b);
    if ra != rb {
        let (small, big) = if ra < rb { (ra, rb) } else { (rb, ra) };
        parent[big as usize] = small;
    }
}
