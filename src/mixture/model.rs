use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VcError};
use crate::types::FeatureLayout;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Covariance structure fitted for each component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CovarianceKind {
    /// Unconstrained joint covariance.
    #[default]
    Full,
    /// Each of the four source/target blocks is diagonal, so every coefficient
    /// keeps its own variance and its cross-covariance with the same
    /// coefficient on the other side. A fully diagonal joint covariance would
    /// zero the cross terms and make the conditional mean ignore the source.
    Diagonal,
}

impl CovarianceKind {
    /// Zeros the entries this structure does not model. `side_dim` is the width
    /// of one side of the joint vector.
    pub(crate) fn constrain(self, cov: &mut DMatrix<f64>, side_dim: usize) {
        if self == Self::Full || side_dim == 0 {
            return;
        }
        let dim = cov.nrows();
        for i in 0..dim {
            for j in 0..dim {
                if i % side_dim != j % side_dim {
                    cov[(i, j)] = 0.0;
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianComponent {
    pub weight: f64,
    pub mean: Vec<f64>,
    /// Row-major `joint_dim × joint_dim`, regularization included.
    pub covariance: Vec<f64>,
}

/// How the fit went; persisted alongside the parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitSummary {
    pub n_samples: usize,
    pub n_iter: usize,
    pub converged: bool,
    /// Mean per-sample log-likelihood at the last EM step.
    pub log_likelihood: f64,
    /// Diagonal term actually added to each covariance.
    pub reg_covar: f64,
    pub seed: u64,
    /// RFC 3339 timestamp.
    pub trained_at: String,
}

/// A fitted joint-density GMM over `source ‖ target` vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixtureModel {
    layout: FeatureLayout,
    covariance_kind: CovarianceKind,
    components: Vec<GaussianComponent>,
    summary: FitSummary,
}

impl MixtureModel {
    pub(crate) fn from_parts(
        layout: FeatureLayout,
        covariance_kind: CovarianceKind,
        components: Vec<GaussianComponent>,
        summary: FitSummary,
    ) -> Result<Self> {
        let model = Self {
            layout,
            covariance_kind,
            components,
            summary,
        };
        model.validate()?;
        Ok(model)
    }

    pub fn layout(&self) -> FeatureLayout {
        self.layout
    }

    pub fn covariance_kind(&self) -> CovarianceKind {
        self.covariance_kind
    }

    pub fn n_components(&self) -> usize {
        self.components.len()
    }

    pub fn joint_dim(&self) -> usize {
        self.layout.joint_dim()
    }

    pub fn components(&self) -> &[GaussianComponent] {
        &self.components
    }

    pub fn weights(&self) -> Vec<f64> {
        self.components.iter().map(|c| c.weight).collect()
    }

    pub fn summary(&self) -> &FitSummary {
        &self.summary
    }

    pub fn mean(&self, k: usize) -> DVector<f64> {
        DVector::from_column_slice(&self.components[k].mean)
    }

    pub fn covariance(&self, k: usize) -> DMatrix<f64> {
        let dim = self.joint_dim();
        DMatrix::from_row_slice(dim, dim, &self.components[k].covariance)
    }

    /// Checks the invariants a usable model must hold. Run on every fit and on
    /// every model read back from storage.
    pub fn validate(&self) -> Result<()> {
        let dim = self.joint_dim();
        if dim == 0 {
            return Err(VcError::invalid_input("mixture model", "joint dimension is zero"));
        }
        if self.components.is_empty() {
            return Err(VcError::invalid_input("mixture model", "model has no components"));
        }
        let mut weight_sum = 0.0;
        for (k, c) in self.components.iter().enumerate() {
            if !(c.weight.is_finite() && c.weight >= 0.0) {
                return Err(VcError::invalid_input(
                    "mixture model",
                    format!("component {k} has invalid weight {}", c.weight),
                ));
            }
            if c.mean.len() != dim || c.covariance.len() != dim * dim {
                return Err(VcError::invalid_input(
                    "mixture model",
                    format!(
                        "component {k} has mean len {} / covariance len {}, expected {dim} / {}",
                        c.mean.len(),
                        c.covariance.len(),
                        dim * dim
                    ),
                ));
            }
            if c.mean.iter().chain(c.covariance.iter()).any(|v| !v.is_finite()) {
                return Err(VcError::invalid_input(
                    "mixture model",
                    format!("component {k} has non-finite parameters"),
                ));
            }
            weight_sum += c.weight;
        }
        if (weight_sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(VcError::invalid_input(
                "mixture model",
                format!("weights sum to {weight_sum}, expected 1"),
            ));
        }
        Ok(())
    }
}
