use candle_util::candle_core::DType;
use candle_util::candle_loss_functions::{calibration_loss, kernel_score_loss};
use candle_util::candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use candle_util::sgvb::direct_elbo_loss;
use log::info;
use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::config::{PenaltyKind, VariationalConfig};
use crate::ensemble::EnsembleModel;
use crate::error::{EnsembleError, Result};
use crate::variational::family::{VariationalFamily, VariationalParams};

/// Outcome of a variational fit
pub struct VariationalFit {
    pub params: VariationalParams,
    /// loss minimized at each step: -ELBO plus the weighted penalty
    pub loss_trace: Vec<f64>,
    pub elbo_trace: Vec<f64>,
}

/// Fit a variational family to the posterior of `model`
///
/// Each step draws `n_mc_samples` latents from the family, evaluates
/// the Monte Carlo ELBO, adds the weighted penalty on predictive draws,
/// and takes one AdamW step. Fails on the first non-finite loss.
pub fn fit_variational(model: &EnsembleModel, config: &VariationalConfig) -> Result<VariationalFit> {
    if config.n_mc_samples == 0 {
        return Err(EnsembleError::config("need at least one Monte Carlo sample"));
    }

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F64, model.device());
    let family = VariationalFamily::new(model, config, vb)?;

    let mut optimizer = AdamW::new(
        varmap.all_vars(),
        ParamsAdamW {
            lr: config.learning_rate,
            weight_decay: 0.0,
            ..Default::default()
        },
    )?;

    let mut rng = SmallRng::seed_from_u64(config.seed);
    let y = model.y_tensor();
    let mut loss_trace = Vec::with_capacity(config.n_iters);
    let mut elbo_trace = Vec::with_capacity(config.n_iters);
    let log_every = config.log_every.max(1);

    info!(
        "Training {:?} family for {} iterations",
        config.family, config.n_iters
    );

    for iter in 0..config.n_iters {
        let values = family.rsample(config.n_mc_samples, &mut rng)?;
        let observation = model.forward(&values)?.observation;

        let llik = observation.log_prob(y)?;
        let kl = family.kl_divergence()?;
        let neg_elbo = direct_elbo_loss(&llik, &kl)?;

        let loss = match config.penalty {
            PenaltyKind::None => neg_elbo.clone(),
            PenaltyKind::Calibration => {
                let draws = observation.sample(&mut rng)?;
                let penalty = calibration_loss(
                    &draws,
                    y,
                    config.calibration_levels,
                    config.calibration_bandwidth,
                )?;
                (&neg_elbo + (penalty * config.penalty_weight)?)?
            }
            PenaltyKind::KernelScore => {
                let draws = observation.sample(&mut rng)?;
                let draws_alt = observation.sample(&mut rng)?;
                let penalty = kernel_score_loss(&draws, &draws_alt, y)?;
                (&neg_elbo + (penalty * config.penalty_weight)?)?
            }
        };

        let loss_val = loss.to_scalar::<f64>()?;
        if !loss_val.is_finite() {
            return Err(EnsembleError::numerical(format!(
                "loss became {} at iteration {}",
                loss_val, iter
            )));
        }
        let elbo_val = -neg_elbo.to_scalar::<f64>()?;

        optimizer.backward_step(&loss)?;
        loss_trace.push(loss_val);
        elbo_trace.push(elbo_val);

        if iter % log_every == 0 || iter + 1 == config.n_iters {
            info!(
                "iter {:5}: loss = {:12.4}, ELBO = {:12.4}",
                iter, loss_val, elbo_val
            );
        }
    }

    Ok(VariationalFit {
        params: family.snapshot()?,
        loss_trace,
        elbo_trace,
    })
}

/// Mean of the last `window` entries of a trace
pub fn trailing_mean(trace: &[f64], window: usize) -> Option<f64> {
    let window = window.min(trace.len());
    if window == 0 {
        return None;
    }
    let tail = &trace[trace.len() - window..];
    Some(tail.iter().sum::<f64>() / window as f64)
}
