use candle_core::{Result, Tensor};

use super::traits::{AnalyticalKL, Prior};

/// Fixed (non-learnable) Gaussian prior p(θ) = N(μ₀, τ²I)
#[derive(Debug, Clone, Copy)]
pub struct FixedGaussianPrior {
    /// Fixed location μ₀
    loc: f64,
    /// Fixed scale parameter τ
    tau: f64,
}

impl FixedGaussianPrior {
    /// Create a new fixed Gaussian prior.
    ///
    /// # Arguments
    /// * `loc` - Prior location μ₀
    /// * `tau` - Prior scale τ
    pub fn new(loc: f64, tau: f64) -> Self {
        Self { loc, tau }
    }

    /// A standard normal prior N(0, 1)
    pub fn standard() -> Self {
        Self::new(0.0, 1.0)
    }

    pub fn loc(&self) -> f64 {
        self.loc
    }

    /// Get the prior scale τ.
    pub fn tau(&self) -> f64 {
        self.tau
    }

    /// log N(x; μ₀, τ²) for a plain number
    pub fn log_density(&self, x: f64) -> f64 {
        let z = (x - self.loc) / self.tau;
        -0.5 * (z * z + 2.0 * self.tau.ln() + (2.0 * std::f64::consts::PI).ln())
    }
}

impl Prior for FixedGaussianPrior {
    /// Compute log p(θ) = sum over all non-sample elements of log N(θ; μ₀, τ²)
    fn log_prob(&self, theta: &Tensor) -> Result<Tensor> {
        let ln_2pi: f64 = (2.0 * std::f64::consts::PI).ln();
        let const_term = 2.0 * self.tau.ln() + ln_2pi;

        // ((θ - μ₀)/τ)²
        let z_sq = ((theta - self.loc)? / self.tau)?.sqr()?;

        // log p = -0.5 * [z² + 2*ln(τ) + ln(2π)]
        let log_prob_element = ((z_sq + const_term)? * (-0.5))?;

        if log_prob_element.rank() <= 1 {
            Ok(log_prob_element)
        } else {
            log_prob_element.flatten_from(1)?.sum(1)
        }
    }
}

impl AnalyticalKL for FixedGaussianPrior {
    /// KL(N(m, v) || N(μ₀, τ²)) = 0.5 Σ [ v/τ² + (m - μ₀)²/τ² - 1 - ln v + 2 ln τ ]
    fn kl_from_gaussian(&self, mean: &Tensor, var: &Tensor) -> Result<Tensor> {
        let tau_sq = self.tau * self.tau;
        let ratio = (var / tau_sq)?;
        let shift = ((mean - self.loc)?.sqr()? / tau_sq)?;
        let elem = ((ratio + shift)? - var.log()?)?;
        let elem = (elem + (2.0 * self.tau.ln() - 1.0))?;
        elem.sum_all()? * 0.5
    }
}
