use nalgebra::{Cholesky, DMatrix, Dyn};

use crate::error::{EnsembleError, Result};
use crate::gp::kernel::add_ridge;

/// Lower Cholesky factor of `K + ridge I`
#[derive(Debug, Clone)]
pub struct CholeskyFactor {
    chol: Cholesky<f64, Dyn>,
    l: DMatrix<f64>,
}

impl CholeskyFactor {
    /// Fails with a numerical error if `K + ridge I` is not positive
    /// definite
    pub fn new(k: &DMatrix<f64>, ridge: f64) -> Result<Self> {
        if k.nrows() != k.ncols() {
            return Err(EnsembleError::config(format!(
                "covariance must be square, got {} x {}",
                k.nrows(),
                k.ncols()
            )));
        }
        let chol = Cholesky::new(add_ridge(k, ridge)).ok_or_else(|| {
            EnsembleError::numerical(format!(
                "{} x {} covariance is not positive definite with ridge {:e}",
                k.nrows(),
                k.ncols(),
                ridge
            ))
        })?;
        let l = chol.l();
        Ok(Self { chol, l })
    }

    pub fn dim(&self) -> usize {
        self.l.nrows()
    }

    pub fn l(&self) -> &DMatrix<f64> {
        &self.l
    }

    /// (K + ridge I)⁻¹ B
    pub fn solve(&self, b: &DMatrix<f64>) -> DMatrix<f64> {
        self.chol.solve(b)
    }

    /// L⁻¹ B
    pub fn solve_lower(&self, b: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        self.l
            .solve_lower_triangular(b)
            .ok_or_else(|| EnsembleError::numerical("singular Cholesky factor"))
    }

    pub fn inverse(&self) -> DMatrix<f64> {
        self.chol.inverse()
    }

    /// log |K + ridge I|
    pub fn log_det(&self) -> f64 {
        2.0 * self.l.diagonal().iter().map(|x| x.ln()).sum::<f64>()
    }
}
