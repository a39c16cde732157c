use candle_util::candle_core::{Device, Tensor, D};
use candle_util::candle_loss_functions::gaussian_likelihood;
use matrix_util::traits::SampleOps;
use nalgebra::DMatrix;
use rand::Rng;
use std::collections::BTreeMap;

use crate::error::{EnsembleError, Result};

/// Predictions of each base model at a common set of inputs
pub type BasePredictions = BTreeMap<String, Vec<f64>>;

/// Build base predictions from a matrix whose columns are named models
pub fn base_predictions_from_columns(
    names: &[Box<str>],
    mat: &DMatrix<f64>,
) -> Result<BasePredictions> {
    if names.len() != mat.ncols() {
        return Err(EnsembleError::config(format!(
            "{} model names for {} prediction columns",
            names.len(),
            mat.ncols()
        )));
    }
    Ok(names
        .iter()
        .zip(mat.column_iter())
        .map(|(name, col)| (name.to_string(), col.iter().copied().collect()))
        .collect())
}

/// Standard normal noise as an (S, N) tensor drawn from `rng`
pub(crate) fn randn_tensor<R: Rng>(rng: &mut R, s: usize, n: usize, dev: &Device) -> Result<Tensor> {
    // column-major (N, S) storage reads as row-major (S, N)
    let z = DMatrix::<f64>::rnorm_with(n, s, rng);
    Ok(Tensor::from_slice(z.as_slice(), (s, n), dev)?)
}

/// Stack base predictions into (N, L) with columns in `leaf_names` order
pub fn base_matrix<T: AsRef<str>>(
    base_pred: &BasePredictions,
    leaf_names: &[T],
    n: usize,
    dev: &Device,
) -> Result<Tensor> {
    for (name, pred) in base_pred.iter() {
        if pred.len() != n {
            return Err(EnsembleError::config(format!(
                "base model \"{}\" has {} predictions for {} points",
                name,
                pred.len(),
                n
            )));
        }
    }

    let columns = leaf_names
        .iter()
        .map(|leaf| {
            let leaf = leaf.as_ref();
            let pred = base_pred.get(leaf).ok_or_else(|| {
                EnsembleError::config(format!("no predictions for base model \"{}\"", leaf))
            })?;
            Ok(Tensor::from_slice(pred.as_slice(), n, dev)?)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Tensor::stack(&columns, 1)?)
}

/// Σ_l F(n, l) W(s, n, l)
///
/// * `base` - (N, L)
/// * `leaf_weights` - (S, N, L)
pub fn weighted_mean(base: &Tensor, leaf_weights: &Tensor) -> Result<Tensor> {
    Ok(leaf_weights
        .broadcast_mul(&base.unsqueeze(0)?)?
        .sum(D::Minus1)?)
}

/// y ~ N(mean, exp(2 ln_sigma)) independently over points
#[derive(Debug, Clone)]
pub struct GaussianObservation {
    /// (S, N)
    pub mean: Tensor,
    /// (S,)
    pub ln_sigma: Tensor,
}

impl GaussianObservation {
    /// Log-likelihood of `y` (N,) under each draw, shape (S,)
    pub fn log_prob(&self, y: &Tensor) -> Result<Tensor> {
        Ok(gaussian_likelihood(y, &self.mean, &self.ln_sigma)?)
    }

    /// One predictive draw per row, mean + exp(ln_sigma) ε
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Result<Tensor> {
        let (s, n) = self.mean.dims2()?;
        let eps = randn_tensor(rng, s, n, self.mean.device())?;
        let sigma = self.ln_sigma.exp()?.unsqueeze(1)?;
        Ok((&self.mean + eps.broadcast_mul(&sigma)?)?)
    }
}

/// Combine base predictions with leaf weights, a residual process, and
/// the noise scale into the observation model.
///
/// * `leaf_weights` - (S, N, L) with leaves in `leaf_names` order
/// * `residual` - (S, N)
/// * `ln_sigma` - (S,)
pub fn assemble<T: AsRef<str>>(
    base_pred: &BasePredictions,
    leaf_weights: &Tensor,
    leaf_names: &[T],
    residual: &Tensor,
    ln_sigma: &Tensor,
) -> Result<GaussianObservation> {
    let (s, n, l) = leaf_weights.dims3()?;
    if l != leaf_names.len() {
        return Err(EnsembleError::config(format!(
            "{} leaf weights for {} leaves",
            l,
            leaf_names.len()
        )));
    }
    if residual.dims() != [s, n] {
        return Err(EnsembleError::config(format!(
            "residual should be ({}, {}), got {:?}",
            s,
            n,
            residual.dims()
        )));
    }
    if ln_sigma.dims() != [s] {
        return Err(EnsembleError::config(format!(
            "noise scale should be ({},), got {:?}",
            s,
            ln_sigma.dims()
        )));
    }

    let base = base_matrix(base_pred, leaf_names, n, leaf_weights.device())?;
    let mean = (weighted_mean(&base, leaf_weights)? + residual)?;
    Ok(GaussianObservation {
        mean,
        ln_sigma: ln_sigma.clone(),
    })
}
