use candle_util::candle_core::Tensor;
use log::info;
use matrix_util::traits::ConvertMatOps;
use nalgebra::DMatrix;
use rand::Rng;

use crate::ensemble::assemble::{base_matrix, weighted_mean, BasePredictions};
use crate::ensemble::draws::PosteriorDraws;
use crate::ensemble::model::EnsembleModel;
use crate::error::{EnsembleError, Result};
use crate::gp::{GpConditional, Rbf};
use crate::tailfree::{
    compute_cond_weights, compute_leaf_weights, CondWeights, LatentKey, LatentValues,
};

/// Ensemble predictions at new inputs, one row per posterior draw
pub struct PosteriorPrediction {
    /// weighted base predictions plus the residual, (S, N_new)
    pub predictive: DMatrix<f64>,
    /// weighted base predictions alone, (S, N_new)
    pub mean: DMatrix<f64>,
    /// (S, N_new, L) with columns in `leaf_names` order
    pub leaf_weights: Tensor,
    /// (S, N_new, K) per parent node
    pub cond_weights: CondWeights,
    pub leaf_names: Vec<Box<str>>,
}

impl PosteriorPrediction {
    /// Posterior mean of the leaf weights, (N_new, L)
    pub fn mean_leaf_weights(&self) -> Result<DMatrix<f64>> {
        Ok(DMatrix::<f64>::from_tensor(&self.leaf_weights.mean(0)?)?)
    }
}

/// Extrapolate posterior draws to `x_new` and assemble the ensemble.
///
/// Every function-valued latent is conditioned on its draw at the
/// training inputs; the node-weight functions share one conditional
/// because they share one kernel. Scalars are carried over as drawn.
pub fn predict_posterior<R: Rng>(
    model: &EnsembleModel,
    x_new: &DMatrix<f64>,
    base_pred_new: &BasePredictions,
    draws: &PosteriorDraws,
    rng: &mut R,
) -> Result<PosteriorPrediction> {
    let tree = model.tree();
    let config = model.config();
    let dev = model.device();
    draws.validate(tree, model.n_obs())?;

    if x_new.ncols() != model.x().ncols() {
        return Err(EnsembleError::config(format!(
            "new inputs have {} columns, training inputs have {}",
            x_new.ncols(),
            model.x().ncols()
        )));
    }

    let n_new = x_new.nrows();
    let weight_cond = GpConditional::new(
        &Rbf::new(config.lengthscale_weight),
        x_new,
        model.x(),
        config.ridge,
    )?;
    let resid_cond = GpConditional::new(
        &Rbf::new(config.lengthscale_residual),
        x_new,
        model.x(),
        config.ridge,
    )?;

    let mut values = LatentValues::new();
    for key in model.latent_keys() {
        let value = match key {
            LatentKey::NodeWeight(_) | LatentKey::Residual => {
                let cond = if key == LatentKey::Residual {
                    &resid_cond
                } else {
                    &weight_cond
                };
                let f_obs = draws
                    .get(&key)
                    .ok_or_else(|| EnsembleError::consistency(format!("no draws for {:?}", key)))?
                    .transpose();
                let f_new = cond.sample(&f_obs, rng)?.transpose();
                f_new.to_tensor(dev)?
            }
            _ => draws.tensor(&key, dev)?,
        };
        values.insert(key, value);
    }

    let cond_weights = compute_cond_weights(tree, &values, model.link())?;
    let leaf_weights = compute_leaf_weights(tree, &cond_weights)?;

    let base = base_matrix(base_pred_new, model.leaf_names(), n_new, dev)?;
    let mean = weighted_mean(&base, &leaf_weights)?;
    let residual = values
        .get(&LatentKey::Residual)
        .ok_or_else(|| EnsembleError::consistency("no residual draws"))?;
    let predictive = (&mean + residual)?;

    info!(
        "predicted {} draws at {} new points",
        draws.n_samples(),
        n_new
    );

    Ok(PosteriorPrediction {
        predictive: DMatrix::<f64>::from_tensor(&predictive)?,
        mean: DMatrix::<f64>::from_tensor(&mean)?,
        leaf_weights,
        cond_weights,
        leaf_names: model.leaf_names().to_vec(),
    })
}
