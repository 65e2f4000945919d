use nalgebra::{Cholesky, DMatrix, DVector, Dyn};

use crate::error::{Result, VcError};

pub(crate) const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Diagonal escalations tried before a covariance is declared singular.
const MAX_REG_ESCALATIONS: usize = 8;

/// Cholesky factor of a covariance plus its log-determinant.
pub(crate) struct Factor {
    pub chol: Cholesky<f64, Dyn>,
    pub log_det: f64,
    /// Diagonal term added on top of the input to make it factor.
    pub added_reg: f64,
}

impl Factor {
    pub fn dim(&self) -> usize {
        self.chol.l_dirty().nrows()
    }

    /// `log N(x; mean, Σ)` given `diff = x - mean`.
    pub fn log_density(&self, diff: &DVector<f64>) -> f64 {
        let Some(z) = self.chol.l_dirty().solve_lower_triangular(diff) else {
            return f64::NEG_INFINITY;
        };
        -0.5 * (self.dim() as f64 * LN_2PI + self.log_det + z.norm_squared())
    }

    /// `Σ⁻¹ b`.
    pub fn solve(&self, b: &DMatrix<f64>) -> DMatrix<f64> {
        self.chol.solve(b)
    }
}

/// Factors `cov`, adding `reg · 10^k` to the diagonal (k = 0, 1, ...) when the
/// plain matrix is not positive definite.
pub(crate) fn regularized_cholesky(
    cov: &DMatrix<f64>,
    reg: f64,
    component: usize,
) -> Result<Factor> {
    let dim = cov.nrows();
    if cov.iter().any(|v| !v.is_finite()) {
        return Err(VcError::SingularCovariance { component, dim });
    }

    let mut added = 0.0;
    for attempt in 0..=MAX_REG_ESCALATIONS {
        let mut m = cov.clone();
        for i in 0..dim {
            m[(i, i)] += added;
        }
        if let Some(chol) = Cholesky::new(m) {
            let log_det = 2.0 * chol.l_dirty().diagonal().iter().map(|d| d.ln()).sum::<f64>();
            if log_det.is_finite() {
                if attempt > 0 {
                    tracing::debug!(
                        component,
                        dim,
                        added_reg = added,
                        "gaussian: covariance needed extra regularization"
                    );
                }
                return Ok(Factor {
                    chol,
                    log_det,
                    added_reg: added,
                });
            }
        }
        added = if added == 0.0 {
            reg.max(f64::EPSILON)
        } else {
            added * 10.0
        };
    }
    Err(VcError::SingularCovariance { component, dim })
}

/// Numerically stable `log Σ exp(v)`.
pub(crate) fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_normal_density_at_mean() {
        let factor = regularized_cholesky(&DMatrix::identity(2, 2), 1e-6, 0).unwrap();
        let log_p = factor.log_density(&DVector::zeros(2));
        assert!((log_p + LN_2PI).abs() < 1e-12);
        assert_eq!(factor.added_reg, 0.0);
    }

    #[test]
    fn density_matches_closed_form_for_diagonal_covariance() {
        let cov = DMatrix::from_diagonal(&DVector::from_vec(vec![4.0, 0.25]));
        let factor = regularized_cholesky(&cov, 1e-6, 0).unwrap();
        let diff = DVector::from_vec(vec![2.0, 0.5]);
        // maha = 4/4 + 0.25/0.25 = 2, log det = ln(1) = 0
        let expected = -0.5 * (2.0 * LN_2PI + 2.0);
        assert!((factor.log_density(&diff) - expected).abs() < 1e-12);
    }

    #[test]
    fn singular_covariance_is_regularized() {
        let cov = DMatrix::from_element(3, 3, 1.0);
        let factor = regularized_cholesky(&cov, 1e-6, 2).unwrap();
        assert!(factor.added_reg > 0.0);
        assert!(factor.log_det.is_finite());
    }

    #[test]
    fn non_finite_covariance_is_singular() {
        let mut cov = DMatrix::identity(2, 2);
        cov[(0, 1)] = f64::NAN;
        let err = regularized_cholesky(&cov, 1e-6, 4).err().unwrap();
        assert!(matches!(
            err,
            VcError::SingularCovariance {
                component: 4,
                dim: 2
            }
        ));
    }

    #[test]
    fn log_sum_exp_is_stable() {
        let v = [-1000.0, -1000.0];
        assert!((log_sum_exp(&v) - (-1000.0 + 2f64.ln())).abs() < 1e-9);
        assert_eq!(log_sum_exp(&[f64::NEG_INFINITY]), f64::NEG_INFINITY);
    }
}
