use log::{debug, info};
use nalgebra::DVector;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::collections::BTreeMap;

use crate::ess::elliptical_slice_step;
use crate::metropolis::random_walk_step;
use crate::traits::GibbsTarget;

pub type GibbsState<K> = BTreeMap<K, DVector<f64>>;

/// Target acceptance rate for one-dimensional random-walk proposals
const TARGET_ACCEPTANCE: f64 = 0.44;

/// How often (in sweeps) to adapt proposal scales during warmup
const ADAPT_EVERY: usize = 50;

/// Collected Metropolis-within-Gibbs samples.
pub struct GibbsChain<K: Ord> {
    pub samples: Vec<GibbsState<K>>,
    pub log_likelihoods: Vec<f64>,
    /// post-warmup acceptance rate of each scalar block
    pub acceptance: BTreeMap<K, f64>,
}

impl<K: Ord + Clone> GibbsChain<K> {
    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    /// Stack the draws of one block as rows of `(n_samples, dim)` values
    pub fn block_draws(&self, key: &K) -> Vec<Vec<f64>> {
        self.samples
            .iter()
            .filter_map(|s| s.get(key))
            .map(|v| v.iter().copied().collect())
            .collect()
    }
}

/// Blocked sampler configuration.
///
/// Each sweep visits every Gaussian block once with an elliptical
/// slice step and every scalar block once with a random-walk step.
pub struct GibbsSampler {
    pub n_samples: usize,
    pub warmup: usize,
    pub thin: usize,
    pub seed: u64,
}

impl GibbsSampler {
    pub fn new(n_samples: usize, warmup: usize) -> Self {
        Self {
            n_samples,
            warmup,
            thin: 1,
            seed: 42,
        }
    }

    /// Run a single chain.
    ///
    /// Fails if the initial state has a non-finite log-likelihood, or
    /// if a scalar block is missing from the initial state.
    pub fn run<T: GibbsTarget>(&self, target: &T) -> anyhow::Result<GibbsChain<T::Key>> {
        let thin = self.thin.max(1);
        let total = self.warmup + self.n_samples * thin;
        let mut rng = SmallRng::seed_from_u64(self.seed);

        let gaussian_keys = target.gaussian_blocks();
        let mut scalar_keys = target.scalar_blocks();

        let mut state = target.init_state(&mut rng);
        let mut cur_llik = target.log_likelihood(&state);
        if !cur_llik.is_finite() {
            return Err(anyhow::anyhow!(
                "initial state has a non-finite log-likelihood: {}",
                cur_llik
            ));
        }

        for (key, _) in scalar_keys.iter() {
            if !state.contains_key(key) {
                return Err(anyhow::anyhow!("scalar block {:?} not initialized", key));
            }
        }

        let mut n_accept = vec![0_usize; scalar_keys.len()];
        let mut n_accept_window = vec![0_usize; scalar_keys.len()];

        let mut samples = Vec::with_capacity(self.n_samples);
        let mut log_likelihoods = Vec::with_capacity(self.n_samples);

        for iter in 0..total {
            for key in gaussian_keys.iter() {
                let nu = target.draw_prior(key, &mut rng);
                let current = state.get(key).cloned().unwrap_or_else(|| nu.scale(0.0));

                let lnpdf = |f: &DVector<f64>| {
                    let mut proposal = state.clone();
                    proposal.insert(key.clone(), f.clone());
                    target.log_likelihood(&proposal)
                };

                let (new, new_llik) =
                    elliptical_slice_step(&current, &nu, &lnpdf, cur_llik, &mut rng);
                state.insert(key.clone(), new);
                cur_llik = new_llik;
            }

            for (b, (key, scale)) in scalar_keys.iter_mut().enumerate() {
                let current = state.get(key).map(|v| v[0]).unwrap_or(0.0);
                let cur_target = cur_llik + target.log_prior_scalar(key, current);

                let log_target = |x: f64| {
                    let mut proposal = state.clone();
                    proposal.insert(key.clone(), DVector::from_element(1, x));
                    target.log_likelihood(&proposal) + target.log_prior_scalar(key, x)
                };

                let (new, _, accepted) =
                    random_walk_step(current, &log_target, cur_target, *scale, &mut rng);

                if accepted {
                    state.insert(key.clone(), DVector::from_element(1, new));
                    cur_llik = target.log_likelihood(&state);
                    n_accept_window[b] += 1;
                    if iter >= self.warmup {
                        n_accept[b] += 1;
                    }
                }
            }

            if iter < self.warmup && (iter + 1).is_multiple_of(ADAPT_EVERY) {
                for (b, (key, scale)) in scalar_keys.iter_mut().enumerate() {
                    let rate = n_accept_window[b] as f64 / ADAPT_EVERY as f64;
                    *scale *= (rate - TARGET_ACCEPTANCE).exp();
                    debug!("warmup {}: {:?} acceptance {:.2}, scale {:.3e}", iter + 1, key, rate, scale);
                }
                n_accept_window.iter_mut().for_each(|x| *x = 0);
            }

            if iter >= self.warmup && (iter - self.warmup).is_multiple_of(thin) {
                samples.push(state.clone());
                log_likelihoods.push(cur_llik);
            }

            if (iter + 1).is_multiple_of((total / 10).max(1)) {
                info!("sweep {}/{}: log-likelihood {:.4}", iter + 1, total, cur_llik);
            }
        }

        let n_post = (total - self.warmup).max(1) as f64;
        let acceptance = scalar_keys
            .iter()
            .zip(n_accept)
            .map(|((key, _), n)| (key.clone(), n as f64 / n_post))
            .collect();

        Ok(GibbsChain {
            samples,
            log_likelihoods,
            acceptance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use rand_distr::StandardNormal;

    /// y_i ~ N(f_i + b, exp(2 s)), f ~ N(0, I), b ~ N(0, 1) as a scalar
    /// block, s fixed through a sharp prior
    struct ShiftModel {
        y: DVector<f64>,
    }

    impl GibbsTarget for ShiftModel {
        type Key = &'static str;

        fn gaussian_blocks(&self) -> Vec<Self::Key> {
            vec!["f"]
        }

        fn scalar_blocks(&self) -> Vec<(Self::Key, f64)> {
            vec![("b", 0.5), ("s", 0.1)]
        }

        fn draw_prior(&self, _key: &Self::Key, rng: &mut SmallRng) -> DVector<f64> {
            DVector::from_fn(self.y.len(), |_, _| rng.sample(StandardNormal))
        }

        fn log_prior_scalar(&self, key: &Self::Key, value: f64) -> f64 {
            match *key {
                "b" => -0.5 * value * value,
                _ => -0.5 * (value / 0.01).powi(2),
            }
        }

        fn init_state(&self, _rng: &mut SmallRng) -> GibbsState<Self::Key> {
            let mut state = GibbsState::new();
            state.insert("f", DVector::zeros(self.y.len()));
            state.insert("b", DVector::zeros(1));
            state.insert("s", DVector::zeros(1));
            state
        }

        fn log_likelihood(&self, state: &GibbsState<Self::Key>) -> f64 {
            let f = &state["f"];
            let b = state["b"][0];
            let s = state["s"][0];
            let var = (2.0 * s).exp();
            self.y
                .iter()
                .zip(f.iter())
                .map(|(y, f)| -0.5 * (y - f - b).powi(2) / var - s)
                .sum()
        }
    }

    #[test]
    fn test_blocked_sampler_recovers_conjugate_mean() -> anyhow::Result<()> {
        // With f ~ N(0, I) and b ~ N(0, 1), marginally y ~ N(0, 2I + 11ᵀ),
        // E[b | y] = 1ᵀ(2I + 11ᵀ)⁻¹ y = Σy / (2 + n)
        let y = DVector::from_vec(vec![2.0, 1.0, 3.0, 2.5]);
        let expected_b = y.sum() / (2.0 + y.len() as f64);

        let sampler = GibbsSampler {
            n_samples: 20_000,
            warmup: 2_000,
            thin: 1,
            seed: 11,
        };
        let chain = sampler.run(&ShiftModel { y })?;

        let b_draws = chain.block_draws(&"b");
        assert_eq!(b_draws.len(), chain.n_samples());
        let b_mean = b_draws.iter().map(|x| x[0]).sum::<f64>() / b_draws.len() as f64;
        assert!((b_mean - expected_b).abs() < 0.15, "b mean: {}", b_mean);

        let rate = chain.acceptance[&"b"];
        assert!(rate > 0.05 && rate < 0.95, "acceptance: {}", rate);
        assert!(chain.log_likelihoods.iter().all(|x| x.is_finite()));
        Ok(())
    }

    #[test]
    fn test_non_finite_start_is_an_error() {
        struct Broken;
        impl GibbsTarget for Broken {
            type Key = u8;
            fn gaussian_blocks(&self) -> Vec<u8> {
                vec![]
            }
            fn scalar_blocks(&self) -> Vec<(u8, f64)> {
                vec![]
            }
            fn draw_prior(&self, _: &u8, _: &mut SmallRng) -> DVector<f64> {
                DVector::zeros(1)
            }
            fn log_prior_scalar(&self, _: &u8, _: f64) -> f64 {
                0.0
            }
            fn init_state(&self, _: &mut SmallRng) -> GibbsState<u8> {
                GibbsState::new()
            }
            fn log_likelihood(&self, _: &GibbsState<u8>) -> f64 {
                f64::NAN
            }
        }
        assert!(GibbsSampler::new(10, 10).run(&Broken).is_err());
    }
}
