use ndarray::{Array2, ArrayView2};

use crate::features::delta::{delta_neighbors, DELTA_WINDOW};

/// Variance floor; keeps every precision finite.
const MIN_VARIANCE: f64 = 1e-10;
/// Half bandwidth of `Wᵀ P W` for a three-tap delta window.
const BANDWIDTH: usize = 2;

/// Maximum-likelihood static trajectory under static and delta constraints.
///
/// `means` and `variances` are `T × 2d` (static then delta, per frame). For
/// every static coefficient this solves `(Wᵀ P W) c = Wᵀ P μ`, where `W`
/// stacks the identity and the delta operator of [`crate::features::apply_delta`].
/// Returns `None` if a system is not positive definite.
pub(crate) fn smooth(
    means: ArrayView2<'_, f64>,
    variances: ArrayView2<'_, f64>,
    static_dim: usize,
) -> Option<Array2<f64>> {
    let n = means.nrows();
    let mut out = Array2::zeros((n, static_dim));

    for d in 0..static_dim {
        let mut system = BandedSystem::new(n);
        let mut rhs = vec![0.0; n];
        for t in 0..n {
            let p_static = 1.0 / variances[(t, d)].max(MIN_VARIANCE);
            system.add(t, t, p_static);
            rhs[t] += p_static * means[(t, d)];

            let p_delta = 1.0 / variances[(t, static_dim + d)].max(MIN_VARIANCE);
            let taps = delta_taps(t, n);
            for &(i, wi) in &taps {
                rhs[i] += p_delta * wi * means[(t, static_dim + d)];
                for &(j, wj) in &taps {
                    if j <= i {
                        system.add(i, j, p_delta * wi * wj);
                    }
                }
            }
        }
        let trajectory = system.solve(&rhs)?;
        for (t, v) in trajectory.into_iter().enumerate() {
            out[(t, d)] = v;
        }
    }
    Some(out)
}

/// Nonzero entries of delta row `t`, merged when both neighbours coincide.
fn delta_taps(t: usize, n: usize) -> Vec<(usize, f64)> {
    let (prev, next) = delta_neighbors(t, n);
    if prev == next {
        return vec![(prev, DELTA_WINDOW[0] + DELTA_WINDOW[2])];
    }
    vec![(prev, DELTA_WINDOW[0]), (next, DELTA_WINDOW[2])]
}

/// Symmetric positive-definite band matrix, lower band stored row by row:
/// `lower[i][k] = M[i][i - k]`.
struct BandedSystem {
    lower: Vec<[f64; BANDWIDTH + 1]>,
}

impl BandedSystem {
    fn new(n: usize) -> Self {
        Self {
            lower: vec![[0.0; BANDWIDTH + 1]; n],
        }
    }

    /// Adds `v` at `(i, j)` with `j <= i`.
    fn add(&mut self, i: usize, j: usize, v: f64) {
        debug_assert!(j <= i && i - j <= BANDWIDTH);
        self.lower[i][i - j] += v;
    }

    /// Banded Cholesky followed by forward and back substitution.
    fn solve(&self, rhs: &[f64]) -> Option<Vec<f64>> {
        let n = self.lower.len();
        let mut l = vec![[0.0; BANDWIDTH + 1]; n];
        for i in 0..n {
            for j in i.saturating_sub(BANDWIDTH)..=i {
                let mut sum = self.lower[i][i - j];
                for p in i.saturating_sub(BANDWIDTH)..j {
                    if j - p <= BANDWIDTH {
                        sum -= l[i][i - p] * l[j][j - p];
                    }
                }
                if i == j {
                    if !(sum > 0.0 && sum.is_finite()) {
                        return None;
                    }
                    l[i][0] = sum.sqrt();
                } else {
                    l[i][i - j] = sum / l[j][0];
                }
            }
        }

        let mut z = vec![0.0; n];
        for i in 0..n {
            let mut sum = rhs[i];
            for p in i.saturating_sub(BANDWIDTH)..i {
                sum -= l[i][i - p] * z[p];
            }
            z[i] = sum / l[i][0];
        }
        let mut x = vec![0.0; n];
        for i in (0..n).rev() {
            let mut sum = z[i];
            for q in i + 1..(i + BANDWIDTH + 1).min(n) {
                sum -= l[q][q - i] * x[q];
            }
            x[i] = sum / l[i][0];
        }
        Some(x)
    }
}
