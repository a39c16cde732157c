//! Bayesian nonparametric ensembles.
//!
//! Base-model predictions are combined with input-dependent weights from
//! a tail-free process over a family tree of models, plus a residual
//! Gaussian process, under a Gaussian observation model. The posterior is
//! approximated by variational inference (mean-field or sparse GP) or
//! sampled by blocked MCMC, and extrapolated to new inputs by GP
//! conditioning.

pub mod calibration;
pub mod config;
pub mod ensemble;
pub mod error;
pub mod gp;
pub mod mcmc;
pub mod tailfree;
pub mod variational;

pub use error::{EnsembleError, Result};
