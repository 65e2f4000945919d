use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VcError};
use crate::mixture::CovarianceKind;

/// What corpus building does when one utterance pair fails to prepare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairFailurePolicy {
    /// The first failing pair fails the whole corpus build.
    #[default]
    Abort,
    /// Failing pairs are logged, reported and left out of the joint matrix.
    Skip,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VcConfig {
    pub sampling_rate_hz: u32,
    /// Frame budget `L` every prepared training sequence is padded or truncated to.
    pub padded_length: usize,
    pub n_components: usize,
    pub covariance: CovarianceKind,
    pub max_iter: usize,
    pub tol: f64,
    /// Diagonal term added to every fitted covariance.
    pub reg_covar: f64,
    pub seed: u64,
    /// Extra EM attempts (new seed, stronger regularization) after a non-finite fit.
    pub fit_retries: usize,
    pub require_convergence: bool,
    pub dtw_radius: usize,
    /// Drop coefficient 0 (frame energy) before training and restore it after conversion.
    pub drop_energy_coefficient: bool,
    /// Smooth converted trajectories with the delta-constrained (MLPG) solve.
    pub use_mlpg: bool,
    pub max_training_pairs: usize,
    pub pair_failure_policy: PairFailurePolicy,
}

impl VcConfig {
    pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 16_000;
    pub const DEFAULT_PADDED_LENGTH: usize = 1000;
    pub const DEFAULT_N_COMPONENTS: usize = 32;

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| VcError::io(format!("read config {}", path.display()), e))?;
        let config: Self = serde_json::from_str(&data)
            .map_err(|e| VcError::json(format!("parse config {}", path.display()), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sampling_rate_hz == 0 {
            return Err(VcError::configuration("sampling_rate_hz", "must be positive"));
        }
        positive("padded_length", self.padded_length)?;
        positive("n_components", self.n_components)?;
        positive("max_iter", self.max_iter)?;
        positive("max_training_pairs", self.max_training_pairs)?;
        if !(self.tol.is_finite() && self.tol > 0.0) {
            return Err(VcError::configuration(
                "tol",
                format!("must be a positive finite number, got {}", self.tol),
            ));
        }
        if !(self.reg_covar.is_finite() && self.reg_covar > 0.0) {
            return Err(VcError::configuration(
                "reg_covar",
                format!("must be a positive finite number, got {}", self.reg_covar),
            ));
        }
        Ok(())
    }
}

fn positive(field: &'static str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(VcError::configuration(field, "must be a positive integer"));
    }
    Ok(())
}

impl Default for VcConfig {
    fn default() -> Self {
        Self {
            sampling_rate_hz: Self::DEFAULT_SAMPLE_RATE_HZ,
            padded_length: Self::DEFAULT_PADDED_LENGTH,
            n_components: Self::DEFAULT_N_COMPONENTS,
            covariance: CovarianceKind::Full,
            max_iter: 100,
            tol: 1e-3,
            reg_covar: 1e-6,
            seed: 0,
            fit_retries: 3,
            require_convergence: false,
            dtw_radius: 1,
            drop_energy_coefficient: true,
            use_mlpg: false,
            max_training_pairs: 100,
            pair_failure_policy: PairFailurePolicy::Abort,
        }
    }
}
