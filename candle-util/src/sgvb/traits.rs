use candle_core::{Result, Tensor};

/// Variational distribution trait for reparameterised sampling.
pub trait VariationalDistribution {
    /// Get the variational mean μ.
    fn mean(&self) -> Result<Tensor>;

    /// Get the variational variance σ².
    fn var(&self) -> Result<Tensor>;

    /// Draw `μ + σ ε` for a given noise tensor `ε` of shape `(S, ...)`,
    /// so gradients flow back to μ and σ.
    fn rsample(&self, eps: &Tensor) -> Result<Tensor> {
        let std = self.var()?.sqrt()?;
        eps.broadcast_mul(&std)?.broadcast_add(&self.mean()?)
    }
}

/// Prior distribution trait.
pub trait Prior {
    /// Compute log p(θ) under the prior.
    ///
    /// # Arguments
    /// * `theta` - Parameter samples, shape (S, ...)
    ///
    /// # Returns
    /// Log prior probability, shape (S,) summed over parameter dimensions
    fn log_prob(&self, theta: &Tensor) -> Result<Tensor>;
}

/// Trait for priors that support analytical KL divergence from a Gaussian q.
pub trait AnalyticalKL {
    /// KL(N(mean, diag(var)) || prior), summed over all elements.
    ///
    /// # Returns
    /// Scalar tensor with the KL divergence
    fn kl_from_gaussian(&self, mean: &Tensor, var: &Tensor) -> Result<Tensor>;
}
