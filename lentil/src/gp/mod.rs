//! Gaussian-process building blocks on nalgebra matrices.
//!
//! Inputs are `(N, D)` matrices with one point per row. Function draws
//! are `(N, S)` matrices with one draw per column.

pub mod cholesky;
pub mod kernel;
pub mod monotone;
pub mod posterior;
pub mod prior;

pub use cholesky::CholeskyFactor;
pub use kernel::{add_ridge, Kernel, Rbf, RbfGrad1d, RbfHess1d};
pub use monotone::{MonotoneFit, MonotoneGp, MonotoneKey};
pub use posterior::{gp_posterior_sample, GpConditional};
pub use prior::{gp_prior, GpPrior};
