use candle_util::candle_core::Tensor;
use candle_util::candle_nn::VarBuilder;
use candle_util::sgvb::{GaussianVar, VariationalDistribution};
use matrix_util::traits::ConvertMatOps;
use nalgebra::{DMatrix, DVector};
use rand::rngs::SmallRng;

use crate::ensemble::assemble::randn_tensor;
use crate::error::Result;
use crate::gp::GpPrior;
use crate::variational::{GpSnapshot, GpVariational};

/// q(f) = N(m, diag(s²)) against the GP prior N(0, K)
///
/// KL = 0.5 [ Σ_i (K⁻¹)_ii s_i² + mᵀ K⁻¹ m - N + log|K| - Σ_i log s_i² ]
pub struct MeanFieldGp {
    q: GaussianVar,
    precision: Tensor,
    precision_diag: Tensor,
    log_det: f64,
    n: usize,
}

impl MeanFieldGp {
    pub fn new(vb: VarBuilder, prior: &GpPrior, init_ln_std: f64) -> Result<Self> {
        let n = prior.dim();
        let q = GaussianVar::new(vb, n, 0.0, init_ln_std)?;
        let dev = q.device().clone();
        let prec = prior.precision();
        let precision = prec.to_tensor(&dev)?;
        let precision_diag = DVector::from_iterator(n, prec.diagonal().iter().copied()).to_tensor(&dev)?;

        Ok(Self {
            q,
            precision,
            precision_diag,
            log_det: prior.cholesky().log_det(),
            n,
        })
    }
}

impl GpVariational for MeanFieldGp {
    fn dim(&self) -> usize {
        self.n
    }

    fn rsample(&self, n_draws: usize, rng: &mut SmallRng) -> Result<Tensor> {
        let eps = randn_tensor(rng, n_draws, self.n, self.q.device())?;
        Ok(self.q.rsample(&eps)?)
    }

    fn kl_divergence(&self) -> Result<Tensor> {
        let mean = self.q.mean();
        let var = VariationalDistribution::var(&self.q)?;

        let trace = (&self.precision_diag * &var)?.sum_all()?;
        let quad = mean
            .unsqueeze(0)?
            .matmul(&self.precision)?
            .matmul(&mean.unsqueeze(1)?)?
            .sum_all()?;
        let log_var = var.log()?.sum_all()?;

        let kl = ((trace + quad)? - log_var)?;
        Ok(((kl + (self.log_det - self.n as f64))? * 0.5)?)
    }

    fn snapshot(&self) -> Result<GpSnapshot> {
        Ok(GpSnapshot::MeanField {
            mean: DVector::<f64>::from_tensor(self.q.mean())?,
            sdev: DVector::<f64>::from_tensor(&self.q.std()?)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gp::Rbf;
    use candle_util::candle_core::{DType, Device};
    use candle_util::candle_nn::VarMap;
    use rand::SeedableRng;

    fn grid(n: usize) -> DMatrix<f64> {
        DMatrix::from_fn(n, 1, |i, _| i as f64 / (n - 1) as f64)
    }

    #[test]
    fn kl_matches_a_direct_computation() -> Result<()> {
        let x = grid(6);
        let prior = GpPrior::new(&Rbf::new(0.4), &x, 1e-2)?;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F64, &Device::Cpu);
        let q = MeanFieldGp::new(vb, &prior, -1.0)?;

        let kl: f64 = q.kl_divergence()?.to_scalar()?;

        let GpSnapshot::MeanField { mean, sdev } = q.snapshot()? else {
            panic!("expected a mean-field snapshot");
        };
        let prec = prior.precision();
        let var = sdev.map(|s| s * s);
        let expected = 0.5
            * ((0..6).map(|i| prec[(i, i)] * var[i]).sum::<f64>() + mean.dot(&(prec * &mean))
                - 6.0
                + prior.cholesky().log_det()
                - var.iter().map(|v| v.ln()).sum::<f64>());
        approx::assert_abs_diff_eq!(kl, expected, epsilon = 1e-8);
        assert!(kl > 0.0);
        Ok(())
    }

    #[test]
    fn draws_have_one_row_per_sample() -> Result<()> {
        let x = grid(4);
        let prior = GpPrior::new(&Rbf::new(0.4), &x, 1e-2)?;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F64, &Device::Cpu);
        let q = MeanFieldGp::new(vb, &prior, -1.0)?;
        let mut rng = SmallRng::seed_from_u64(0);
        assert_eq!(q.rsample(7, &mut rng)?.dims(), &[7, 4]);
        assert_eq!(q.snapshot()?.sample(7, &mut rng).shape(), (7, 4));
        Ok(())
    }
}
