//! Stochastic Gradient Variational Bayes (SGVB) building blocks.
//!
//! Reparameterised draws `θ = μ + σ ε` from a variational family, an
//! analytic KL against the prior, and a Monte Carlo ELBO.
//!
//! # Example
//!
//! ```ignore
//! use candle_util::sgvb::{direct_elbo_loss, AnalyticalKL, FixedGaussianPrior, GaussianVar};
//!
//! let q = GaussianVar::new(vb.pp("sigma"), (), -5.0, -2.0)?;
//! let prior = FixedGaussianPrior::new(-5.0, 1.0);
//!
//! for _ in 0..num_iters {
//!     let theta = q.rsample(&eps)?;               // (S,)
//!     let llik = my_log_likelihood(&theta)?;      // (S,)
//!     let kl = prior.kl_from_gaussian(q.mean(), &q.var()?)?;
//!     let loss = direct_elbo_loss(&llik, &kl)?;
//!     // optimizer.backward_step(&loss)?;
//! }
//! ```

mod gaussian_prior;
#[allow(clippy::module_inception)]
mod sgvb;
mod traits;
mod variational_gaussian;

pub use gaussian_prior::FixedGaussianPrior;
pub use sgvb::{compute_elbo, direct_elbo_loss};
pub use traits::{AnalyticalKL, Prior, VariationalDistribution};
pub use variational_gaussian::GaussianVar;
