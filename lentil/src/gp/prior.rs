use candle_util::candle_core::{Device, Tensor};
use matrix_util::traits::SampleOps;
use nalgebra::{DMatrix, DVector};
use rand::Rng;

use crate::error::Result;
use crate::gp::cholesky::CholeskyFactor;
use crate::gp::kernel::Kernel;

/// Zero-mean multivariate normal N(0, K + ridge I) over the function
/// values at a fixed set of points
#[derive(Debug, Clone)]
pub struct GpPrior {
    chol: CholeskyFactor,
    precision: DMatrix<f64>,
}

/// The GP prior of `kernel` evaluated at the rows of `x`
pub fn gp_prior(kernel: &impl Kernel, x: &DMatrix<f64>, ridge: f64) -> Result<GpPrior> {
    GpPrior::new(kernel, x, ridge)
}

impl GpPrior {
    pub fn new(kernel: &impl Kernel, x: &DMatrix<f64>, ridge: f64) -> Result<Self> {
        Self::from_covariance(&kernel.gram(x), ridge)
    }

    pub fn from_covariance(k: &DMatrix<f64>, ridge: f64) -> Result<Self> {
        let chol = CholeskyFactor::new(k, ridge)?;
        let precision = chol.inverse();
        Ok(Self { chol, precision })
    }

    pub fn dim(&self) -> usize {
        self.chol.dim()
    }

    pub fn cholesky(&self) -> &CholeskyFactor {
        &self.chol
    }

    /// (K + ridge I)⁻¹
    pub fn precision(&self) -> &DMatrix<f64> {
        &self.precision
    }

    /// `n_draws` independent draws as columns of an (N, n_draws) matrix
    pub fn sample<R: Rng>(&self, n_draws: usize, rng: &mut R) -> DMatrix<f64> {
        let z = DMatrix::<f64>::rnorm_with(self.dim(), n_draws, rng);
        self.chol.l() * z
    }

    pub fn sample_vector<R: Rng>(&self, rng: &mut R) -> DVector<f64> {
        self.sample(1, rng).column(0).into_owned()
    }

    pub fn log_prob(&self, f: &DVector<f64>) -> f64 {
        let quad = f.dot(&(&self.precision * f));
        -0.5 * (quad + self.chol.log_det() + self.dim() as f64 * (2.0 * std::f64::consts::PI).ln())
    }

    /// Log density of each row of an (S, N) tensor, shape (S,)
    pub fn log_prob_tensor(&self, f_sn: &Tensor) -> Result<Tensor> {
        let n = self.dim();
        let prec = Tensor::from_slice(self.precision.as_slice(), (n, n), f_sn.device())?
            .to_dtype(f_sn.dtype())?;
        let quad = f_sn.matmul(&prec)?.mul(f_sn)?.sum(1)?;
        let log_norm = self.chol.log_det() + n as f64 * (2.0 * std::f64::consts::PI).ln();
        Ok(((quad + log_norm)? * -0.5)?)
    }

    /// Draws as rows of an (S, N) tensor
    pub fn sample_tensor<R: Rng>(&self, n_draws: usize, rng: &mut R, dev: &Device) -> Result<Tensor> {
        let draws = self.sample(n_draws, rng);
        // column-major (N, S) storage is row-major (S, N)
        Ok(Tensor::from_slice(draws.as_slice(), (n_draws, self.dim()), dev)?)
    }
}
