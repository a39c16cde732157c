//! Stochastic variational inference for the ensemble posterior.
//!
//! Every function-valued latent gets either a mean-field Gaussian or an
//! inducing-point sparse GP factor; every scalar latent gets a Gaussian.
//! The negative ELBO, optionally plus a scoring penalty, is minimized
//! with AdamW on reparameterised draws.

pub mod family;
pub mod fit;
pub mod mean_field;
pub mod sparse_gp;

pub use family::{VariationalFamily, VariationalParams};
pub use fit::{fit_variational, VariationalFit};
pub use mean_field::MeanFieldGp;
pub use sparse_gp::{select_inducing_points, SparseGp};

use candle_util::candle_core::Tensor;
use matrix_util::traits::SampleOps;
use nalgebra::{DMatrix, DVector};
use rand::rngs::SmallRng;
use rand::Rng;

use crate::error::Result;

/// A variational factor over function values at the training inputs
pub trait GpVariational {
    /// Number of training inputs
    fn dim(&self) -> usize;

    /// Reparameterised draws, (S, N)
    fn rsample(&self, n_draws: usize, rng: &mut SmallRng) -> Result<Tensor>;

    /// KL(q || GP prior), scalar
    fn kl_divergence(&self) -> Result<Tensor>;

    /// Detached copy of the fitted parameters
    fn snapshot(&self) -> Result<GpSnapshot>;
}

/// Fitted parameters of a function-valued factor
#[derive(Debug, Clone)]
pub enum GpSnapshot {
    MeanField {
        mean: DVector<f64>,
        sdev: DVector<f64>,
    },
    /// q(f) = ∫ p(f | u) q(u) du with q(u) = N(m, L Lᵀ)
    Sparse {
        inducing_mean: DVector<f64>,
        inducing_scale: DMatrix<f64>,
        /// K_xz K_zz⁻¹
        proj: DMatrix<f64>,
        cond: ConditionalScale,
    },
}

/// Square root of the covariance of f(X) given the inducing values
#[derive(Debug, Clone)]
pub enum ConditionalScale {
    /// Cholesky factor of K_xx - K_xz K_zz⁻¹ K_zx
    Full(DMatrix<f64>),
    /// standard deviations of its diagonal only (FITC)
    Diagonal(DVector<f64>),
}

impl ConditionalScale {
    /// Map standard normal noise (N, S) to conditional deviations
    pub fn apply(&self, z: &DMatrix<f64>) -> DMatrix<f64> {
        match self {
            ConditionalScale::Full(l) => l * z,
            ConditionalScale::Diagonal(sd) => {
                DMatrix::from_fn(z.nrows(), z.ncols(), |i, j| sd[i] * z[(i, j)])
            }
        }
    }
}

impl GpSnapshot {
    pub fn mean(&self) -> DVector<f64> {
        match self {
            GpSnapshot::MeanField { mean, .. } => mean.clone(),
            GpSnapshot::Sparse {
                inducing_mean,
                proj,
                ..
            } => proj * inducing_mean,
        }
    }

    /// Independent draws as rows of an (S, N) matrix
    pub fn sample<R: Rng>(&self, n_draws: usize, rng: &mut R) -> DMatrix<f64> {
        match self {
            GpSnapshot::MeanField { mean, sdev } => {
                let z = DMatrix::<f64>::rnorm_with(mean.len(), n_draws, rng);
                let mut f = DMatrix::from_fn(mean.len(), n_draws, |i, j| {
                    mean[i] + sdev[i] * z[(i, j)]
                });
                f.transpose_mut();
                f
            }
            GpSnapshot::Sparse {
                inducing_mean,
                inducing_scale,
                proj,
                cond,
            } => {
                let m = inducing_mean.len();
                let n = proj.nrows();
                let z_u = DMatrix::<f64>::rnorm_with(m, n_draws, rng);
                let z_f = DMatrix::<f64>::rnorm_with(n, n_draws, rng);
                let mut u = inducing_scale * z_u;
                for mut col in u.column_iter_mut() {
                    col += inducing_mean;
                }
                (proj * u + cond.apply(&z_f)).transpose()
            }
        }
    }
}
