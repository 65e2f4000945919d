use nalgebra::{DMatrix, DVector};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::VcConfig;
use crate::error::{Result, VcError};
use crate::mixture::gaussian::{log_sum_exp, regularized_cholesky, Factor};
use crate::mixture::init::kmeans;
use crate::mixture::model::{CovarianceKind, FitSummary, GaussianComponent, MixtureModel};
use crate::types::JointDistribution;

/// Effective sample count below which a component is treated as collapsed.
const MIN_COMPONENT_MASS: f64 = 1e-8;
/// Regularization multiplier applied on each retry after a non-finite fit.
const RETRY_REG_FACTOR: f64 = 10.0;

/// Fits a joint-density GMM by expectation-maximization.
#[derive(Debug, Clone)]
pub struct MixtureTrainer {
    n_components: usize,
    covariance: CovarianceKind,
    max_iter: usize,
    tol: f64,
    reg_covar: f64,
    seed: u64,
    fit_retries: usize,
    require_convergence: bool,
}

struct EmState {
    weights: Vec<f64>,
    means: Vec<DVector<f64>>,
    covariances: Vec<DMatrix<f64>>,
    log_likelihood: f64,
    n_iter: usize,
    converged: bool,
}

impl EmState {
    fn is_finite(&self) -> bool {
        self.log_likelihood.is_finite()
            && self.weights.iter().all(|w| w.is_finite())
            && self.means.iter().all(|m| m.iter().all(|v| v.is_finite()))
            && self
                .covariances
                .iter()
                .all(|c| c.iter().all(|v| v.is_finite()))
    }
}

impl MixtureTrainer {
    pub fn new(n_components: usize) -> Self {
        Self {
            n_components,
            covariance: CovarianceKind::Full,
            max_iter: 100,
            tol: 1e-3,
            reg_covar: 1e-6,
            seed: 0,
            fit_retries: 3,
            require_convergence: false,
        }
    }

    pub fn from_config(config: &VcConfig) -> Self {
        Self {
            n_components: config.n_components,
            covariance: config.covariance,
            max_iter: config.max_iter,
            tol: config.tol,
            reg_covar: config.reg_covar,
            seed: config.seed,
            fit_retries: config.fit_retries,
            require_convergence: config.require_convergence,
        }
    }

    pub fn with_covariance(mut self, covariance: CovarianceKind) -> Self {
        self.covariance = covariance;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    pub fn with_reg_covar(mut self, reg_covar: f64) -> Self {
        self.reg_covar = reg_covar;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_fit_retries(mut self, fit_retries: usize) -> Self {
        self.fit_retries = fit_retries;
        self
    }

    pub fn with_require_convergence(mut self, require_convergence: bool) -> Self {
        self.require_convergence = require_convergence;
        self
    }

    pub fn fit(&self, joint: &JointDistribution) -> Result<MixtureModel> {
        let n = joint.n_samples();
        let k = self.n_components;
        if k == 0 {
            return Err(VcError::fit_failure("number of components must be positive"));
        }
        if n == 0 {
            return Err(VcError::fit_failure(
                "joint distribution has no non-degenerate samples",
            ));
        }
        if n < k {
            return Err(VcError::fit_failure(format!(
                "{n} non-degenerate samples cannot support {k} components"
            )));
        }

        let dim = joint.joint_dim();
        let samples: Vec<DVector<f64>> = joint
            .samples()
            .rows()
            .into_iter()
            .map(|r| DVector::from_iterator(dim, r.iter().copied()))
            .collect();
        let side_dim = joint.layout().side_dim();

        let mut last_error = String::new();
        let mut reg = self.reg_covar;
        for attempt in 0..=self.fit_retries {
            let seed = self.seed.wrapping_add(attempt as u64);
            match self.run_em(&samples, side_dim, seed, reg) {
                Ok(state) if state.is_finite() => {
                    return self.finish(joint, state, seed, reg);
                }
                Ok(_) => last_error = "EM produced non-finite parameters".to_string(),
                Err(err) => last_error = err.to_string(),
            }
            tracing::warn!(
                attempt,
                seed,
                reg_covar = reg,
                error = last_error.as_str(),
                "mixture: EM attempt failed, retrying with stronger regularization"
            );
            reg *= RETRY_REG_FACTOR;
        }

        Err(VcError::fit_failure(format!(
            "no finite fit after {} attempts: {last_error}",
            self.fit_retries + 1
        )))
    }

    fn finish(
        &self,
        joint: &JointDistribution,
        state: EmState,
        seed: u64,
        reg: f64,
    ) -> Result<MixtureModel> {
        if !state.converged {
            if self.require_convergence {
                return Err(VcError::fit_failure(format!(
                    "EM did not converge within {} iterations (tol {})",
                    self.max_iter, self.tol
                )));
            }
            tracing::warn!(
                max_iter = self.max_iter,
                tol = self.tol,
                log_likelihood = state.log_likelihood,
                "mixture: EM stopped before converging"
            );
        }

        tracing::info!(
            components = self.n_components,
            samples = joint.n_samples(),
            joint_dim = joint.joint_dim(),
            iterations = state.n_iter,
            converged = state.converged,
            log_likelihood = state.log_likelihood,
            "mixture: fit finished"
        );

        let components = state
            .weights
            .iter()
            .zip(state.means.iter())
            .zip(state.covariances.iter())
            .map(|((&weight, mean), cov)| GaussianComponent {
                weight,
                mean: mean.iter().copied().collect(),
                covariance: cov.transpose().iter().copied().collect(),
            })
            .collect();

        MixtureModel::from_parts(
            joint.layout(),
            self.covariance,
            components,
            FitSummary {
                n_samples: joint.n_samples(),
                n_iter: state.n_iter,
                converged: state.converged,
                log_likelihood: state.log_likelihood,
                reg_covar: reg,
                seed,
                trained_at: chrono::Utc::now().to_rfc3339(),
            },
        )
    }

    fn run_em(
        &self,
        samples: &[DVector<f64>],
        side_dim: usize,
        seed: u64,
        reg: f64,
    ) -> Result<EmState> {
        let n = samples.len();
        let k = self.n_components;
        let dim = samples[0].len();
        let mut rng = StdRng::seed_from_u64(seed);

        let global_cov = self.covariance_of(samples, &mean_of(samples), reg, side_dim);
        let init = kmeans(samples, k, &mut rng);

        let mut weights = vec![0.0; k];
        let mut covariances = Vec::with_capacity(k);
        for (cluster, center) in init.centers.iter().enumerate() {
            let members: Vec<&DVector<f64>> = samples
                .iter()
                .zip(init.labels.iter())
                .filter(|(_, &l)| l == cluster)
                .map(|(x, _)| x)
                .collect();
            weights[cluster] = members.len().max(1) as f64;
            let cov = if members.len() >= 2 {
                let mut cov = DMatrix::zeros(dim, dim);
                for x in &members {
                    let diff = *x - center;
                    cov.ger(1.0, &diff, &diff, 1.0);
                }
                cov /= members.len() as f64;
                self.finalize_covariance(cov, reg, side_dim)
            } else {
                global_cov.clone()
            };
            covariances.push(cov);
        }
        normalize(&mut weights);
        let mut means = init.centers;

        let mut responsibilities = Array2::<f64>::zeros((n, k));
        let mut prev_ll = f64::NEG_INFINITY;
        let mut log_likelihood = f64::NEG_INFINITY;
        let mut converged = false;
        let mut n_iter = 0;

        for iter in 1..=self.max_iter {
            n_iter = iter;

            // E-step
            let factors = covariances
                .iter()
                .enumerate()
                .map(|(c, cov)| regularized_cholesky(cov, reg, c))
                .collect::<Result<Vec<Factor>>>()?;
            let log_weights: Vec<f64> = weights.iter().map(|w| w.ln()).collect();
            let mut total_ll = 0.0;
            let mut scratch = vec![0.0; k];
            let mut worst = (f64::INFINITY, 0usize);
            for (i, x) in samples.iter().enumerate() {
                for c in 0..k {
                    scratch[c] = log_weights[c] + factors[c].log_density(&(x - &means[c]));
                }
                let lse = log_sum_exp(&scratch);
                if lse < worst.0 {
                    worst = (lse, i);
                }
                total_ll += lse;
                for c in 0..k {
                    responsibilities[(i, c)] = (scratch[c] - lse).exp();
                }
            }
            log_likelihood = total_ll / n as f64;
            if !log_likelihood.is_finite() {
                return Err(VcError::fit_failure(format!(
                    "log-likelihood became {log_likelihood} at iteration {iter}"
                )));
            }

            // M-step
            for c in 0..k {
                let mass: f64 = responsibilities.column(c).sum();
                if mass < MIN_COMPONENT_MASS {
                    tracing::debug!(
                        component = c,
                        sample = worst.1,
                        "mixture: reseeding collapsed component on worst-explained sample"
                    );
                    weights[c] = 1.0 / n as f64;
                    means[c] = samples[worst.1].clone();
                    covariances[c] = global_cov.clone();
                    continue;
                }
                weights[c] = mass / n as f64;

                let mut mean = DVector::zeros(dim);
                for (x, &r) in samples.iter().zip(responsibilities.column(c).iter()) {
                    mean.axpy(r, x, 1.0);
                }
                mean /= mass;

                let mut cov = DMatrix::zeros(dim, dim);
                for (x, &r) in samples.iter().zip(responsibilities.column(c).iter()) {
                    let diff = x - &mean;
                    cov.ger(r, &diff, &diff, 1.0);
                }
                cov /= mass;
                covariances[c] = self.finalize_covariance(cov, reg, side_dim);
                means[c] = mean;
            }
            normalize(&mut weights);

            tracing::debug!(
                iteration = iter,
                log_likelihood,
                "mixture: EM step"
            );
            if (log_likelihood - prev_ll).abs() < self.tol {
                converged = true;
                break;
            }
            prev_ll = log_likelihood;
        }

        Ok(EmState {
            weights,
            means,
            covariances,
            log_likelihood,
            n_iter,
            converged,
        })
    }

    fn covariance_of(
        &self,
        samples: &[DVector<f64>],
        mean: &DVector<f64>,
        reg: f64,
        side_dim: usize,
    ) -> DMatrix<f64> {
        let dim = mean.len();
        let mut cov = DMatrix::zeros(dim, dim);
        for x in samples {
            let diff = x - mean;
            cov.ger(1.0, &diff, &diff, 1.0);
        }
        cov /= samples.len() as f64;
        self.finalize_covariance(cov, reg, side_dim)
    }

    fn finalize_covariance(
        &self,
        mut cov: DMatrix<f64>,
        reg: f64,
        side_dim: usize,
    ) -> DMatrix<f64> {
        // ger accumulates tiny asymmetries; the Cholesky only reads one triangle
        cov = (&cov + cov.transpose()) * 0.5;
        self.covariance.constrain(&mut cov, side_dim);
        for i in 0..cov.nrows() {
            cov[(i, i)] += reg;
        }
        cov
    }
}

fn mean_of(samples: &[DVector<f64>]) -> DVector<f64> {
    let mut mean = DVector::zeros(samples[0].len());
    for x in samples {
        mean += x;
    }
    mean / samples.len() as f64
}

fn normalize(weights: &mut [f64]) {
    let total: f64 = weights.iter().sum();
    if total > 0.0 {
        for w in weights.iter_mut() {
            *w /= total;
        }
    }
}
