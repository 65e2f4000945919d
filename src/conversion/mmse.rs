use nalgebra::{DMatrix, DVector};

use crate::error::Result;
use crate::mixture::gaussian::{regularized_cholesky, Factor};
use crate::mixture::MixtureModel;

/// One component's regression `x -> E[y | x, k]`, factored once per model.
pub(crate) struct ComponentRegression {
    /// Index of the component in the source model.
    pub index: usize,
    log_weight: f64,
    mean_x: DVector<f64>,
    mean_y: DVector<f64>,
    source_factor: Factor,
    /// `Σyx Σxx⁻¹`
    gain: DMatrix<f64>,
    /// Diagonal of `Σyy - Σyx Σxx⁻¹ Σxy`.
    pub conditional_variance: DVector<f64>,
}

impl ComponentRegression {
    pub fn new(model: &MixtureModel, index: usize, reg: f64) -> Result<Self> {
        let side = model.layout().side_dim();
        let mean = model.mean(index);
        let cov = model.covariance(index);

        let sxx = cov.view((0, 0), (side, side)).into_owned();
        let sxy = cov.view((0, side), (side, side)).into_owned();
        let syy = cov.view((side, side), (side, side)).into_owned();

        let source_factor = regularized_cholesky(&sxx, reg, index)?;
        // Σxx⁻¹ Σxy, transposed through the symmetry of Σ
        let gain = source_factor.solve(&sxy).transpose();
        let conditional_variance = (syy - &gain * &sxy)
            .diagonal()
            .map(|v| v.max(0.0));

        Ok(Self {
            index,
            log_weight: model.components()[index].weight.ln(),
            mean_x: mean.rows(0, side).into_owned(),
            mean_y: mean.rows(side, side).into_owned(),
            source_factor,
            gain,
            conditional_variance,
        })
    }

    /// `log w_k + log N(x; μx, Σxx)`.
    pub fn log_joint(&self, x: &DVector<f64>) -> f64 {
        self.log_weight + self.source_factor.log_density(&(x - &self.mean_x))
    }

    pub fn conditional_mean(&self, x: &DVector<f64>) -> DVector<f64> {
        &self.mean_y + &self.gain * (x - &self.mean_x)
    }
}
