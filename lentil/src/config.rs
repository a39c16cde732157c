use candle_util::candle_link_functions::SimplexLink;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Link that maps sibling logits onto the simplex
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[clap(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    Softmax,
    Sparsemax,
    #[default]
    Entmax,
}

impl From<LinkKind> for SimplexLink {
    fn from(kind: LinkKind) -> Self {
        match kind {
            LinkKind::Softmax => SimplexLink::Softmax,
            LinkKind::Sparsemax => SimplexLink::Sparsemax,
            LinkKind::Entmax => SimplexLink::Entmax15,
        }
    }
}

/// Variational family for every Gaussian-process latent
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[clap(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FamilyKind {
    /// independent Gaussian per evaluation point
    #[default]
    MeanField,
    /// inducing-point Gaussian process
    Sparse,
}

/// Extra scoring term added to the negative ELBO
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[clap(rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum PenaltyKind {
    #[default]
    None,
    /// smoothed mismatch between nominal and empirical coverage
    Calibration,
    /// sample CRPS of the predictive draws
    KernelScore,
}

/// Prior hyperparameters of the ensemble model
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    /// RBF lengthscale of the node-weight processes. Default: 0.15
    pub lengthscale_weight: f64,
    /// RBF lengthscale of the residual process. Default: 0.2
    pub lengthscale_residual: f64,
    /// Diagonal jitter added to every covariance. Default: 1e-3
    pub ridge: f64,
    /// Default: entmax
    pub link: LinkKind,
    /// Location of the Gaussian prior on log-temperatures. Default: 0
    pub temperature_loc: f64,
    /// Default: 1
    pub temperature_scale: f64,
    /// Location of the Gaussian prior on the log noise scale. Default: -5
    pub sigma_loc: f64,
    /// Default: 1
    pub sigma_scale: f64,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            lengthscale_weight: 0.15,
            lengthscale_residual: 0.2,
            ridge: 1e-3,
            link: LinkKind::default(),
            temperature_loc: 0.0,
            temperature_scale: 1.0,
            sigma_loc: -5.0,
            sigma_scale: 1.0,
        }
    }
}

/// Stochastic variational inference settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VariationalConfig {
    /// Default: mean-field
    pub family: FamilyKind,
    /// Number of optimizer steps. Default: 5000
    pub n_iters: usize,
    /// AdamW learning rate. Default: 5e-3
    pub learning_rate: f64,
    /// Monte Carlo draws per ELBO estimate. Default: 20
    pub n_mc_samples: usize,
    /// Number of inducing points of the sparse family. Default: 10
    pub n_inducing: usize,
    /// Keep only the diagonal of the sparse family's f | u covariance.
    /// Default: false
    pub diagonal_conditional: bool,
    /// Initial log standard deviation of every factor. Default: -2
    pub init_ln_std: f64,
    /// Default: none
    pub penalty: PenaltyKind,
    /// Multiplier of the penalty term. Default: 25
    pub penalty_weight: f64,
    /// Interior coverage levels of the calibration penalty. Default: 19
    pub calibration_levels: usize,
    /// Smoothing bandwidth of the calibration penalty. Default: 0.05
    pub calibration_bandwidth: f64,
    /// Log the loss every this many steps. Default: 50
    pub log_every: usize,
    /// Default: 42
    pub seed: u64,
}

impl Default for VariationalConfig {
    fn default() -> Self {
        Self {
            family: FamilyKind::default(),
            n_iters: 5000,
            learning_rate: 5e-3,
            n_mc_samples: 20,
            n_inducing: 10,
            diagonal_conditional: false,
            init_ln_std: -2.0,
            penalty: PenaltyKind::default(),
            penalty_weight: 25.0,
            calibration_levels: 19,
            calibration_bandwidth: 0.05,
            log_every: 50,
            seed: 42,
        }
    }
}

/// Metropolis-within-Gibbs settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct McmcConfig {
    /// Default: 1000
    pub n_samples: usize,
    /// Default: 1000
    pub warmup: usize,
    /// Default: 1
    pub thin: usize,
    /// Initial random-walk scale of log-temperatures. Default: 0.5
    pub temperature_step: f64,
    /// Initial random-walk scale of the log noise scale. Default: 0.1
    pub sigma_step: f64,
    /// Default: 42
    pub seed: u64,
}

impl Default for McmcConfig {
    fn default() -> Self {
        Self {
            n_samples: 1000,
            warmup: 1000,
            thin: 1,
            temperature_step: 0.5,
            sigma_step: 0.1,
            seed: 42,
        }
    }
}

/// Monotone Gaussian process used to learn calibration curves
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonotoneGpConfig {
    /// Default: 0.2
    pub lengthscale: f64,
    /// Default: 9e-3
    pub ridge: f64,
    /// Probit scale of the positive-derivative constraint. Default: 1e-3
    pub deriv_prior_scale: f64,
    /// Number of grid points where the derivative is constrained. Default: 100
    pub n_deriv: usize,
    /// Keep the curve inside the unit interval. Default: true
    pub cdf_constraint: bool,
    /// Location of the Gaussian prior on the log noise scale. Default: -3
    pub sigma_loc: f64,
    /// Default: 1
    pub sigma_scale: f64,
}

impl Default for MonotoneGpConfig {
    fn default() -> Self {
        Self {
            lengthscale: 0.2,
            ridge: 9e-3,
            deriv_prior_scale: 1e-3,
            n_deriv: 100,
            cdf_constraint: true,
            sigma_loc: -3.0,
            sigma_scale: 1.0,
        }
    }
}

/// Everything a `fit` run reads from a JSON file; missing sections and
/// fields fall back to their defaults
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub ensemble: EnsembleConfig,
    pub variational: VariationalConfig,
    pub mcmc: McmcConfig,
    pub monotone: MonotoneGpConfig,
}

impl RunConfig {
    pub fn from_json(file: &str) -> Result<Self> {
        let reader = std::io::BufReader::new(std::fs::File::open(file)?);
        Ok(serde_json::from_reader(reader)?)
    }
}
