use ndarray::{Array2, ArrayView1, ArrayView2};

const STEP_VERTICAL: u8 = 0;
const STEP_HORIZONTAL: u8 = 1;
const STEP_DIAGONAL: u8 = 2;

/// Inclusive column range searched in one row of the cost matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RowBand {
    start: usize,
    end: usize,
}

impl RowBand {
    fn contains(&self, j: usize) -> bool {
        j >= self.start && j <= self.end
    }
}

/// Approximate DTW in linear time and space (Salvador & Chan, 2007).
///
/// Both sequences are coarsened by pairwise frame averaging until one of them
/// is shorter than `radius + 2`; exact DTW runs there and the path is projected
/// back up one resolution at a time, widened by `radius` cells on each side.
///
/// Returns the accumulated Euclidean distance and the warping path as
/// `(x_index, y_index)` pairs from `(0, 0)` to `(n - 1, m - 1)`.
/// Both inputs must be non-empty and share a column count.
pub fn fastdtw(
    x: ArrayView2<'_, f64>,
    y: ArrayView2<'_, f64>,
    radius: usize,
) -> (f64, Vec<(usize, usize)>) {
    let (n, m) = (x.nrows(), y.nrows());
    let min_size = radius + 2;
    if n < min_size || m < min_size {
        return dtw_banded(x, y, &full_window(n, m));
    }

    let x_coarse = reduce_by_half(x);
    let y_coarse = reduce_by_half(y);
    let (_, coarse_path) = fastdtw(x_coarse.view(), y_coarse.view(), radius);
    let window = expand_window(&coarse_path, n, m, radius);
    dtw_banded(x, y, &window)
}

/// Exact DTW over the full `n × m` grid. Quadratic; kept for short inputs and tests.
pub fn dtw(x: ArrayView2<'_, f64>, y: ArrayView2<'_, f64>) -> (f64, Vec<(usize, usize)>) {
    dtw_banded(x, y, &full_window(x.nrows(), y.nrows()))
}

fn full_window(n: usize, m: usize) -> Vec<RowBand> {
    vec![
        RowBand {
            start: 0,
            end: m.saturating_sub(1),
        };
        n
    ]
}

fn reduce_by_half(x: ArrayView2<'_, f64>) -> Array2<f64> {
    let half = x.nrows() / 2;
    let mut out = Array2::zeros((half, x.ncols()));
    for (i, mut row) in out.rows_mut().into_iter().enumerate() {
        let a = x.row(2 * i);
        let b = x.row(2 * i + 1);
        for ((dst, &va), &vb) in row.iter_mut().zip(a.iter()).zip(b.iter()) {
            *dst = 0.5 * (va + vb);
        }
    }
    out
}

fn expand_window(
    coarse_path: &[(usize, usize)],
    n: usize,
    m: usize,
    radius: usize,
) -> Vec<RowBand> {
    let mut bands: Vec<Option<RowBand>> = vec![None; n];
    let r = radius as isize;

    for &(ci, cj) in coarse_path {
        for di in -r..=r {
            let i = ci as isize + di;
            if i < 0 {
                continue;
            }
            let lo_j = (cj as isize - r).max(0) as usize;
            let hi_j = cj + radius;
            for fine_i in [2 * i as usize, 2 * i as usize + 1] {
                if fine_i >= n || 2 * lo_j >= m {
                    continue;
                }
                let start = 2 * lo_j;
                let end = (2 * hi_j + 1).min(m - 1);
                let band = bands[fine_i].get_or_insert(RowBand { start, end });
                band.start = band.start.min(start);
                band.end = band.end.max(end);
            }
        }
    }

    // Rows the projection missed inherit their neighbour; then make every row
    // reachable from the one above and pin both corners.
    let mut out = Vec::with_capacity(n);
    let mut prev = RowBand { start: 0, end: 0 };
    for (i, band) in bands.into_iter().enumerate() {
        let mut band = band.unwrap_or(prev);
        if i == 0 {
            band.start = 0;
        } else {
            band.start = band.start.min(prev.end + 1);
            band.end = band.end.max(prev.end);
        }
        band.end = band.end.min(m - 1);
        out.push(band);
        prev = band;
    }
    if let Some(last) = out.last_mut() {
        last.end = m - 1;
    }
    out
}

fn euclidean(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(&u, &v)| (u - v) * (u - v))
        .sum::<f64>()
        .sqrt()
}

fn dtw_banded(
    x: ArrayView2<'_, f64>,
    y: ArrayView2<'_, f64>,
    window: &[RowBand],
) -> (f64, Vec<(usize, usize)>) {
    let n = x.nrows();
    if n == 0 || y.nrows() == 0 {
        return (0.0, Vec::new());
    }

    let mut cost: Vec<Vec<f64>> = Vec::with_capacity(n);
    let mut bp: Vec<Vec<u8>> = Vec::with_capacity(n);

    for (i, band) in window.iter().enumerate() {
        let width = band.end - band.start + 1;
        let mut row_cost = vec![f64::INFINITY; width];
        let mut row_bp = vec![STEP_DIAGONAL; width];
        let xi = x.row(i);

        for j in band.start..=band.end {
            let local = euclidean(xi, y.row(j));
            let slot = j - band.start;
            if i == 0 && j == 0 {
                row_cost[slot] = local;
                continue;
            }

            let mut best = f64::INFINITY;
            let mut step = STEP_DIAGONAL;
            if i > 0 {
                let above = &window[i - 1];
                if above.contains(j) {
                    best = cost[i - 1][j - above.start];
                    step = STEP_VERTICAL;
                }
            }
            if j > band.start {
                let cand = row_cost[slot - 1];
                if cand < best {
                    best = cand;
                    step = STEP_HORIZONTAL;
                }
            }
            if i > 0 && j > 0 {
                let above = &window[i - 1];
                if above.contains(j - 1) {
                    let cand = cost[i - 1][j - 1 - above.start];
                    if cand < best {
                        best = cand;
                        step = STEP_DIAGONAL;
                    }
                }
            }
            row_cost[slot] = best + local;
            row_bp[slot] = step;
        }

        cost.push(row_cost);
        bp.push(row_bp);
    }

    let (mut i, mut j) = (n - 1, window[n - 1].end);
    let distance = cost[i][j - window[i].start];
    let mut path = Vec::with_capacity(n + j + 1);
    path.push((i, j));
    while i > 0 || j > 0 {
        match bp[i][j - window[i].start] {
            STEP_VERTICAL => i -= 1,
            STEP_HORIZONTAL => j -= 1,
            _ => {
                i -= 1;
                j -= 1;
            }
        }
        path.push((i, j));
    }
    path.reverse();
    (distance, path)
}
