mod em;
pub(crate) mod gaussian;
mod init;
mod model;

pub use em::MixtureTrainer;
pub use model::{CovarianceKind, FitSummary, GaussianComponent, MixtureModel};
