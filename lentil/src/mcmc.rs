//! Blocked Metropolis-within-Gibbs sampling of the ensemble posterior.
//!
//! Function-valued latents are updated by elliptical slice sampling
//! against their GP priors; log-temperatures and the log noise scale by
//! adaptive random-walk Metropolis.

use candle_util::candle_core::Tensor;
use log::{debug, info};
use mcmc_util::{GibbsSampler, GibbsState, GibbsTarget};
use nalgebra::{DMatrix, DVector};
use rand::rngs::SmallRng;
use rand::Rng;
use rand_distr::StandardNormal;
use std::collections::BTreeMap;

use crate::config::McmcConfig;
use crate::ensemble::{EnsembleModel, PosteriorDraws};
use crate::error::{EnsembleError, Result};
use crate::tailfree::{LatentKey, LatentValues};

/// Initial value of the log noise scale
const INIT_SIGMA: f64 = 0.1;

/// Spread of the initial function and temperature values
const INIT_SCALE: f64 = 0.01;

/// Sampler output
pub struct McmcFit {
    pub draws: PosteriorDraws,
    /// post-warmup acceptance rate of each scalar latent
    pub acceptance: BTreeMap<LatentKey, f64>,
    pub log_likelihoods: Vec<f64>,
}

impl McmcFit {
    pub fn mean_acceptance(&self) -> f64 {
        if self.acceptance.is_empty() {
            return 0.0;
        }
        self.acceptance.values().sum::<f64>() / self.acceptance.len() as f64
    }
}

/// The ensemble posterior seen one draw at a time
pub struct EnsembleTarget<'a> {
    model: &'a EnsembleModel,
    config: &'a McmcConfig,
}

impl<'a> EnsembleTarget<'a> {
    pub fn new(model: &'a EnsembleModel, config: &'a McmcConfig) -> Self {
        Self { model, config }
    }

    fn to_values(&self, state: &GibbsState<LatentKey>) -> Result<LatentValues> {
        let dev = self.model.device();
        let mut values = LatentValues::new();
        for (key, v) in state.iter() {
            let t = if key.is_function() {
                Tensor::from_slice(v.as_slice(), (1, v.len()), dev)?
            } else {
                Tensor::from_slice(v.as_slice(), 1, dev)?
            };
            values.insert(*key, t);
        }
        Ok(values)
    }

    fn try_log_likelihood(&self, state: &GibbsState<LatentKey>) -> Result<f64> {
        let values = self.to_values(state)?;
        let llik: Vec<f64> = self.model.log_likelihood(&values)?.to_vec1()?;
        llik.first()
            .copied()
            .ok_or_else(|| EnsembleError::numerical("empty log-likelihood"))
    }
}

impl GibbsTarget for EnsembleTarget<'_> {
    type Key = LatentKey;

    fn gaussian_blocks(&self) -> Vec<Self::Key> {
        self.model
            .latent_keys()
            .into_iter()
            .filter(|k| k.is_function())
            .collect()
    }

    fn scalar_blocks(&self) -> Vec<(Self::Key, f64)> {
        self.model
            .latent_keys()
            .into_iter()
            .filter_map(|k| match k {
                LatentKey::Temperature(_) => Some((k, self.config.temperature_step)),
                LatentKey::Sigma => Some((k, self.config.sigma_step)),
                _ => None,
            })
            .collect()
    }

    fn draw_prior(&self, key: &Self::Key, rng: &mut SmallRng) -> DVector<f64> {
        match self.model.gp_prior(key) {
            Some(prior) => prior.sample_vector(rng),
            None => DVector::zeros(1),
        }
    }

    fn log_prior_scalar(&self, key: &Self::Key, value: f64) -> f64 {
        self.model
            .scalar_prior(key)
            .map(|p| p.log_density(value))
            .unwrap_or(f64::NEG_INFINITY)
    }

    fn init_state(&self, rng: &mut SmallRng) -> GibbsState<Self::Key> {
        let n = self.model.n_obs();
        self.model
            .latent_keys()
            .into_iter()
            .map(|key| {
                let dim = if key.is_function() { n } else { 1 };
                let v = match key {
                    LatentKey::Sigma => DVector::from_element(1, INIT_SIGMA),
                    _ => DVector::from_fn(dim, |_, _| {
                        INIT_SCALE * rng.sample::<f64, _>(StandardNormal)
                    }),
                };
                (key, v)
            })
            .collect()
    }

    /// Numerical failures count as zero likelihood so the step is rejected
    fn log_likelihood(&self, state: &GibbsState<Self::Key>) -> f64 {
        match self.try_log_likelihood(state) {
            Ok(llik) if llik.is_finite() => llik,
            Ok(_) => f64::NEG_INFINITY,
            Err(e) => {
                debug!("log-likelihood failed: {}", e);
                f64::NEG_INFINITY
            }
        }
    }
}

/// Sample the ensemble posterior by blocked Metropolis-within-Gibbs
pub fn fit_mcmc(model: &EnsembleModel, config: &McmcConfig) -> Result<McmcFit> {
    let target = EnsembleTarget::new(model, config);
    let sampler = GibbsSampler {
        n_samples: config.n_samples,
        warmup: config.warmup,
        thin: config.thin,
        seed: config.seed,
    };

    info!(
        "Sampling {} draws after {} warmup sweeps",
        config.n_samples, config.warmup
    );
    let chain = sampler
        .run(&target)
        .map_err(|e| EnsembleError::numerical(format!("ensemble sampler: {}", e)))?;

    let s = chain.n_samples();
    let mut draws = PosteriorDraws::new();
    for key in model.latent_keys() {
        let rows = chain.block_draws(&key);
        if rows.len() != s {
            return Err(EnsembleError::consistency(format!(
                "sampler returned {} of {} draws for \"{}\"",
                rows.len(),
                s,
                key.label(model.tree())
            )));
        }
        let dim = rows.first().map(|r| r.len()).unwrap_or(0);
        draws.insert(key, DMatrix::from_row_iterator(s, dim, rows.into_iter().flatten()));
    }

    let fit = McmcFit {
        draws,
        acceptance: chain.acceptance,
        log_likelihoods: chain.log_likelihoods,
    };
    for (key, rate) in fit.acceptance.iter() {
        info!("acceptance {}: {:.3}", key.label(model.tree()), rate);
    }
    Ok(fit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnsembleConfig;
    use crate::tailfree::FamilyTree;

    #[test]
    fn short_chain_has_labelled_draws() -> Result<()> {
        let n = 10;
        let x = DMatrix::from_fn(n, 1, |i, _| i as f64 / (n - 1) as f64);
        let y = DVector::from_fn(n, |i, _| x[(i, 0)]);
        let base = BTreeMap::from([
            ("a".to_string(), vec![0.0; n]),
            ("b".to_string(), (0..n).map(|i| x[(i, 0)]).collect()),
        ]);
        let model = EnsembleModel::new(x, y, base, FamilyTree::flat(&["a", "b"])?, EnsembleConfig::default())?;

        let config = McmcConfig {
            n_samples: 20,
            warmup: 30,
            thin: 2,
            ..Default::default()
        };
        let fit = fit_mcmc(&model, &config)?;
        fit.draws.validate(model.tree(), n)?;
        assert_eq!(fit.draws.n_samples(), 20);
        assert_eq!(fit.acceptance.len(), 2);
        assert!((0.0..=1.0).contains(&fit.mean_acceptance()));
        assert!(fit.log_likelihoods.iter().all(|x| x.is_finite()));
        Ok(())
    }
}
