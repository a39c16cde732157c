use matrix_util::traits::SampleOps;
use nalgebra::DMatrix;
use rand::Rng;

use crate::error::{EnsembleError, Result};
use crate::gp::cholesky::CholeskyFactor;
use crate::gp::kernel::Kernel;

/// Noise-free GP conditional of f(x_new) given f(x_obs)
///
/// mean = K_no K_oo⁻¹ f_obs
/// cov  = K_nn - K_no K_oo⁻¹ K_on
///
/// Both factorizations are computed once, so many draws (or many
/// latent functions sharing a kernel) can be conditioned cheaply.
#[derive(Debug, Clone)]
pub struct GpConditional {
    proj: DMatrix<f64>,
    cond_chol: CholeskyFactor,
}

impl GpConditional {
    pub fn new(
        kernel: &impl Kernel,
        x_new: &DMatrix<f64>,
        x_obs: &DMatrix<f64>,
        ridge: f64,
    ) -> Result<Self> {
        if x_new.ncols() != x_obs.ncols() {
            return Err(EnsembleError::config(format!(
                "new inputs have {} columns but observed inputs have {}",
                x_new.ncols(),
                x_obs.ncols()
            )));
        }
        Self::from_blocks(
            &kernel.gram(x_new),
            &kernel.covariance(x_new, x_obs),
            &kernel.gram(x_obs),
            ridge,
        )
    }

    /// Condition from precomputed covariance blocks; `ridge` is added to
    /// both `k_oo` and the conditional covariance
    pub fn from_blocks(
        k_nn: &DMatrix<f64>,
        k_no: &DMatrix<f64>,
        k_oo: &DMatrix<f64>,
        ridge: f64,
    ) -> Result<Self> {
        if k_no.nrows() != k_nn.nrows() || k_no.ncols() != k_oo.nrows() {
            return Err(EnsembleError::config(format!(
                "cross-covariance is {} x {}, expected {} x {}",
                k_no.nrows(),
                k_no.ncols(),
                k_nn.nrows(),
                k_oo.nrows()
            )));
        }
        let chol_oo = CholeskyFactor::new(k_oo, ridge)?;
        let k_on = k_no.transpose();
        let proj = chol_oo.solve(&k_on).transpose();

        let a = chol_oo.solve_lower(&k_on)?;
        let cov = k_nn - a.transpose() * &a;
        let cov = (&cov + cov.transpose()) * 0.5;
        let cond_chol = CholeskyFactor::new(&cov, ridge)?;

        Ok(Self { proj, cond_chol })
    }

    pub fn n_new(&self) -> usize {
        self.proj.nrows()
    }

    pub fn n_obs(&self) -> usize {
        self.proj.ncols()
    }

    /// Conditional mean of each column of `f_obs` (N_obs, S)
    pub fn mean(&self, f_obs: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        if f_obs.nrows() != self.n_obs() {
            return Err(EnsembleError::config(format!(
                "expected {} observed function values, got {}",
                self.n_obs(),
                f_obs.nrows()
            )));
        }
        Ok(&self.proj * f_obs)
    }

    /// One conditional draw per column of `f_obs` (N_obs, S), returned
    /// as (N_new, S)
    pub fn sample<R: Rng>(&self, f_obs: &DMatrix<f64>, rng: &mut R) -> Result<DMatrix<f64>> {
        let mean = self.mean(f_obs)?;
        let z = DMatrix::<f64>::rnorm_with(self.n_new(), f_obs.ncols(), rng);
        Ok(mean + self.cond_chol.l() * z)
    }
}

/// Draw f(x_new) given observed draws f(x_obs) (N_obs, S)
pub fn gp_posterior_sample<R: Rng>(
    kernel: &impl Kernel,
    x_new: &DMatrix<f64>,
    x_obs: &DMatrix<f64>,
    f_obs: &DMatrix<f64>,
    ridge: f64,
    rng: &mut R,
) -> Result<DMatrix<f64>> {
    GpConditional::new(kernel, x_new, x_obs, ridge)?.sample(f_obs, rng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gp::kernel::Rbf;
    use crate::gp::prior::GpPrior;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn grid(n: usize) -> DMatrix<f64> {
        DMatrix::from_fn(n, 1, |i, _| i as f64 / (n - 1) as f64)
    }

    #[test]
    fn conditioning_on_the_same_points_reproduces_the_draws() -> Result<()> {
        let x = grid(5);
        let kernel = Rbf::new(0.3);
        let mut rng = SmallRng::seed_from_u64(3);
        let f_obs = GpPrior::new(&kernel, &x, 1e-8)?.sample(4, &mut rng);

        let f_new = gp_posterior_sample(&kernel, &x, &x, &f_obs, 1e-8, &mut rng)?;
        assert_eq!(f_new.shape(), (5, 4));
        approx::assert_abs_diff_eq!((f_new - &f_obs).abs().max(), 0.0, epsilon = 1e-3);
        Ok(())
    }

    #[test]
    fn far_away_points_revert_to_the_prior() -> Result<()> {
        let x = grid(5);
        let x_far = DMatrix::from_element(1, 1, 50.0);
        let kernel = Rbf::new(0.3);
        let cond = GpConditional::new(&kernel, &x_far, &x, 1e-3)?;

        let f_obs = DMatrix::from_element(5, 1, 3.0);
        let mean = cond.mean(&f_obs)?;
        approx::assert_abs_diff_eq!(mean[(0, 0)], 0.0, epsilon = 1e-10);
        approx::assert_abs_diff_eq!(cond.cond_chol.l()[(0, 0)], (1.0f64 + 1e-3).sqrt(), epsilon = 1e-8);
        Ok(())
    }

    #[test]
    fn mismatched_draws_are_rejected() -> Result<()> {
        let x = grid(5);
        let cond = GpConditional::new(&Rbf::new(0.3), &grid(3), &x, 1e-3)?;
        let bad = DMatrix::zeros(4, 2);
        assert!(matches!(cond.mean(&bad), Err(EnsembleError::Config(_))));
        Ok(())
    }
}
