use candle_core::{DType, Device, Result, Shape, Tensor};
use candle_nn::VarBuilder;

use super::traits::VariationalDistribution;

/// Gaussian variational distribution q(θ) = N(μ, σ²I)
///
/// Uses mean-field approximation with diagonal covariance.
/// Parameters are stored as mean μ and log standard deviation ln(σ).
pub struct GaussianVar {
    /// Variational mean μ
    mean: Tensor,
    /// Log standard deviation ln(σ)
    ln_std: Tensor,
}

impl GaussianVar {
    /// Create a new Gaussian variational distribution.
    ///
    /// # Arguments
    /// * `vb` - VarBuilder for creating trainable parameters
    /// * `shape` - shape of θ, `()` for a scalar
    /// * `init_mean` - centre of the small random initial mean
    /// * `init_ln_std` - initial ln(σ)
    pub fn new<S: Into<Shape> + Copy>(
        vb: VarBuilder,
        shape: S,
        init_mean: f64,
        init_ln_std: f64,
    ) -> Result<Self> {
        let mean = vb.get_with_hints(
            shape,
            "mean",
            candle_nn::Init::Randn {
                mean: init_mean,
                stdev: 0.01,
            },
        )?;
        let ln_std = vb.get_with_hints(shape, "ln_std", candle_nn::Init::Const(init_ln_std))?;
        Ok(Self { mean, ln_std })
    }

    /// Get the variational mean μ.
    pub fn mean(&self) -> &Tensor {
        &self.mean
    }

    /// Get the variational standard deviation σ = exp(ln_std).
    pub fn std(&self) -> Result<Tensor> {
        self.ln_std.exp()
    }

    /// Get the device of the parameters.
    pub fn device(&self) -> &Device {
        self.mean.device()
    }

    /// Get the dtype of the parameters.
    pub fn dtype(&self) -> DType {
        self.mean.dtype()
    }
}

impl VariationalDistribution for GaussianVar {
    fn mean(&self) -> Result<Tensor> {
        Ok(self.mean.clone())
    }

    fn var(&self) -> Result<Tensor> {
        // σ² = exp(2 * ln_std)
        (&self.ln_std * 2.0)?.exp()
    }

    fn rsample(&self, eps: &Tensor) -> Result<Tensor> {
        eps.broadcast_mul(&self.std()?)?.broadcast_add(&self.mean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarMap;

    #[test]
    fn test_mean_var_shapes() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F64, &Device::Cpu);

        let gauss = GaussianVar::new(vb, (5, 3), 0.0, 0.0)?;
        let mean = VariationalDistribution::mean(&gauss)?;
        let var = VariationalDistribution::var(&gauss)?;

        assert_eq!(mean.dims(), &[5, 3]);
        assert_eq!(var.dims(), &[5, 3]);

        Ok(())
    }

    #[test]
    fn test_scalar_rsample_is_affine_in_noise() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F64, &Device::Cpu);

        let gauss = GaussianVar::new(vb, (), -5.0, (0.5f64).ln())?;
        let eps = Tensor::new(&[0.0f64, 2.0], &Device::Cpu)?;
        let draws: Vec<f64> = gauss.rsample(&eps)?.to_vec1()?;
        let mu: f64 = gauss.mean().to_scalar()?;

        assert!((draws[0] - mu).abs() < 1e-12);
        assert!((draws[1] - mu - 1.0).abs() < 1e-12);
        assert!((mu + 5.0).abs() < 0.1);
        Ok(())
    }
}
