mod mlpg;
mod mmse;
#[cfg(test)]
mod tests;

use nalgebra::DVector;
use ndarray::{s, Array2};

use crate::error::{Result, VcError};
use crate::mixture::gaussian::log_sum_exp;
use crate::mixture::MixtureModel;
use crate::types::{ConversionResult, FeatureLayout, FeatureSequence};

use mmse::ComponentRegression;

/// Converts augmented source frames into target static frames with a fitted
/// joint-density GMM.
///
/// Per-component factorizations are computed once in [`ConversionEngine::new`],
/// so one engine can serve any number of utterances. The engine is immutable
/// and `Send + Sync`.
pub struct ConversionEngine {
    layout: FeatureLayout,
    n_components: usize,
    components: Vec<ComponentRegression>,
    use_mlpg: bool,
}

impl ConversionEngine {
    pub fn new(model: &MixtureModel) -> Result<Self> {
        let reg = model.summary().reg_covar.max(f64::EPSILON);
        let mut components = Vec::with_capacity(model.n_components());
        let mut last_failure = None;
        for k in 0..model.n_components() {
            match ComponentRegression::new(model, k, reg) {
                Ok(component) => components.push(component),
                Err(err) => {
                    tracing::warn!(
                        component = k,
                        error = %err,
                        "conversion: skipping component with singular source covariance"
                    );
                    last_failure = Some(err);
                }
            }
        }
        if components.is_empty() {
            return Err(last_failure.unwrap_or(VcError::SingularCovariance {
                component: 0,
                dim: model.layout().side_dim(),
            }));
        }

        tracing::debug!(
            components = model.n_components(),
            usable = components.len(),
            side_dim = model.layout().side_dim(),
            "conversion: engine ready"
        );
        Ok(Self {
            layout: model.layout(),
            n_components: model.n_components(),
            components,
            use_mlpg: false,
        })
    }

    /// Enables trajectory smoothing. Only takes effect when the model was
    /// trained on static ‖ delta features.
    pub fn with_mlpg(mut self, enabled: bool) -> Self {
        if enabled && !self.layout.with_delta {
            tracing::warn!("conversion: model has no delta features, MLPG disabled");
            self.use_mlpg = false;
        } else {
            self.use_mlpg = enabled;
        }
        self
    }

    pub fn layout(&self) -> FeatureLayout {
        self.layout
    }

    pub fn uses_mlpg(&self) -> bool {
        self.use_mlpg
    }

    /// Components that survived factorization.
    pub fn active_components(&self) -> usize {
        self.components.len()
    }

    /// `source` must carry `layout().side_dim()` coefficients per frame.
    pub fn convert(&self, source: &FeatureSequence) -> Result<ConversionResult> {
        let side = self.layout.side_dim();
        let static_dim = self.layout.static_dim;
        if source.dim() != side {
            return Err(VcError::invalid_input(
                "convert",
                format!(
                    "source frames have {} coefficients, model expects {side}",
                    source.dim()
                ),
            ));
        }

        let n = source.len();
        let mut responsibilities = Array2::zeros((n, self.n_components));
        let mut means = Array2::zeros((n, side));
        let mut variances = Array2::zeros((n, side));
        let mut log_joint = vec![0.0; self.components.len()];

        for (t, frame) in source.frames().rows().into_iter().enumerate() {
            let x = DVector::from_iterator(side, frame.iter().copied());
            for (slot, component) in log_joint.iter_mut().zip(&self.components) {
                *slot = component.log_joint(&x);
            }
            let total = log_sum_exp(&log_joint);
            if !total.is_finite() {
                return Err(VcError::invalid_input(
                    "convert",
                    format!("frame {t} has log-likelihood {total} under every component"),
                ));
            }

            let mut y = DVector::zeros(side);
            let mut second_moment = DVector::zeros(side);
            for (component, &lj) in self.components.iter().zip(&log_joint) {
                let gamma = (lj - total).exp();
                responsibilities[(t, component.index)] = gamma;
                let m = component.conditional_mean(&x);
                if self.use_mlpg {
                    second_moment +=
                        (&component.conditional_variance + m.component_mul(&m)) * gamma;
                }
                y.axpy(gamma, &m, 1.0);
            }

            for (c, v) in y.iter().enumerate() {
                means[(t, c)] = *v;
            }
            if self.use_mlpg {
                for c in 0..side {
                    variances[(t, c)] = second_moment[c] - y[c] * y[c];
                }
            }
        }

        let features = if self.use_mlpg {
            match mlpg::smooth(means.view(), variances.view(), static_dim) {
                Some(trajectory) => trajectory,
                None => {
                    tracing::warn!(
                        frames = n,
                        "conversion: MLPG system not positive definite, using static means"
                    );
                    means.slice(s![.., ..static_dim]).to_owned()
                }
            }
        } else {
            means.slice(s![.., ..static_dim]).to_owned()
        };

        tracing::debug!(
            frames = n,
            static_dim,
            mlpg = self.use_mlpg,
            "conversion: converted sequence"
        );
        Ok(ConversionResult {
            features: FeatureSequence::new(features)?,
            responsibilities,
        })
    }
}
