use candle_util::candle_core::{Device, Tensor};
use candle_util::candle_link_functions::SimplexLink;
use candle_util::sgvb::{FixedGaussianPrior, Prior};
use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use std::collections::BTreeMap;

use crate::config::EnsembleConfig;
use crate::ensemble::assemble::{assemble, BasePredictions, GaussianObservation};
use crate::error::{EnsembleError, Result};
use crate::gp::{GpPrior, Rbf};
use crate::tailfree::weights::fetch;
use crate::tailfree::{
    compute_cond_weights, compute_leaf_weights, Binding, CondWeights, FamilyTree, LatentKey,
    LatentValues,
};

/// Generative ensemble model over fixed training data
///
/// y = Σ_l F_l(x) W_l(x) + r(x) + ε, with ε ~ N(0, exp(2σ))
///
/// where W comes from the tail-free process over the family tree, r is
/// a residual GP, and every log-temperature and σ has a Gaussian prior.
pub struct EnsembleModel {
    tree: FamilyTree,
    config: EnsembleConfig,
    x: DMatrix<f64>,
    y: DVector<f64>,
    y_tensor: Tensor,
    base_pred: BasePredictions,
    leaf_names: Vec<Box<str>>,
    weight_prior: GpPrior,
    resid_prior: GpPrior,
    temperature_prior: FixedGaussianPrior,
    sigma_prior: FixedGaussianPrior,
    device: Device,
}

/// Intermediate quantities of one pass through the model
pub struct ForwardOut {
    pub cond_weights: CondWeights,
    /// (S, N, L)
    pub leaf_weights: Tensor,
    pub observation: GaussianObservation,
}

impl EnsembleModel {
    /// * `x` - (N, D) inputs
    /// * `y` - (N,) observations
    /// * `base_pred` - predictions of every leaf model at `x`
    pub fn new(
        x: DMatrix<f64>,
        y: DVector<f64>,
        base_pred: BasePredictions,
        tree: FamilyTree,
        config: EnsembleConfig,
    ) -> Result<Self> {
        let n = x.nrows();
        if y.len() != n {
            return Err(EnsembleError::config(format!(
                "{} observations for {} input rows",
                y.len(),
                n
            )));
        }
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
        let model_names: Vec<&str> = base_pred.keys().map(|x| x.as_str()).collect();
        tree.validate_leaves(&model_names)?;

        let device = Device::Cpu;
        let weight_prior = GpPrior::new(&Rbf::new(config.lengthscale_weight), &x, config.ridge)?;
        let resid_prior = GpPrior::new(&Rbf::new(config.lengthscale_residual), &x, config.ridge)?;
        let y_tensor = Tensor::from_slice(y.as_slice(), n, &device)?;
        let leaf_names = tree.leaf_names().into_iter().map(Box::from).collect();

        Ok(Self {
            temperature_prior: FixedGaussianPrior::new(
                config.temperature_loc,
                config.temperature_scale,
            ),
            sigma_prior: FixedGaussianPrior::new(config.sigma_loc, config.sigma_scale),
            tree,
            config,
            x,
            y,
            y_tensor,
            base_pred,
            leaf_names,
            weight_prior,
            resid_prior,
            device,
        })
    }

    pub fn tree(&self) -> &FamilyTree {
        &self.tree
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    pub fn x(&self) -> &DMatrix<f64> {
        &self.x
    }

    pub fn y(&self) -> &DVector<f64> {
        &self.y
    }

    pub fn y_tensor(&self) -> &Tensor {
        &self.y_tensor
    }

    pub fn n_obs(&self) -> usize {
        self.x.nrows()
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn link(&self) -> SimplexLink {
        self.config.link.into()
    }

    /// Leaf names in the column order of leaf weights
    pub fn leaf_names(&self) -> &[Box<str>] {
        &self.leaf_names
    }

    pub fn latent_keys(&self) -> Vec<LatentKey> {
        LatentKey::all(&self.tree)
    }

    /// GP prior of a function-valued latent
    pub fn gp_prior(&self, key: &LatentKey) -> Option<&GpPrior> {
        match key {
            LatentKey::NodeWeight(_) => Some(&self.weight_prior),
            LatentKey::Residual => Some(&self.resid_prior),
            _ => None,
        }
    }

    /// Gaussian prior of a scalar latent
    pub fn scalar_prior(&self, key: &LatentKey) -> Option<FixedGaussianPrior> {
        match key {
            LatentKey::Temperature(_) => Some(self.temperature_prior),
            LatentKey::Sigma => Some(self.sigma_prior),
            _ => None,
        }
    }

    fn sample_latent<R: Rng>(&self, key: &LatentKey, n_draws: usize, rng: &mut R) -> Result<Tensor> {
        if let Some(prior) = self.gp_prior(key) {
            return prior.sample_tensor(n_draws, rng, &self.device);
        }
        let prior = self
            .scalar_prior(key)
            .ok_or_else(|| EnsembleError::consistency(format!("no prior for {:?}", key)))?;
        let dist = Normal::new(prior.loc(), prior.tau())
            .map_err(|e| EnsembleError::config(format!("prior of {:?}: {}", key, e)))?;
        let draws: Vec<f64> = (0..n_draws).map(|_| dist.sample(rng)).collect();
        Ok(Tensor::from_vec(draws, n_draws, &self.device)?)
    }

    /// Draw every latent from its prior
    pub fn sample_prior<R: Rng>(&self, n_draws: usize, rng: &mut R) -> Result<LatentValues> {
        self.bind(&BTreeMap::new(), n_draws, rng)
    }

    /// Resolve bindings into latent values; latents without a binding
    /// are drawn from their priors
    pub fn bind<R: Rng>(
        &self,
        bindings: &BTreeMap<LatentKey, Binding>,
        n_draws: usize,
        rng: &mut R,
    ) -> Result<LatentValues> {
        let keys = self.latent_keys();
        for key in bindings.keys() {
            if !keys.contains(key) {
                return Err(EnsembleError::consistency(format!(
                    "binding for {:?} which is not a latent of this tree",
                    key
                )));
            }
        }

        let mut ret = LatentValues::new();
        for key in keys {
            let value = match bindings.get(&key) {
                Some(Binding::Value(v)) => {
                    let expected: Vec<usize> = if key.is_function() {
                        vec![n_draws, self.n_obs()]
                    } else {
                        vec![n_draws]
                    };
                    if v.dims() != expected.as_slice() {
                        return Err(EnsembleError::config(format!(
                            "value of \"{}\" should be {:?}, got {:?}",
                            key.label(&self.tree),
                            expected,
                            v.dims()
                        )));
                    }
                    v.clone()
                }
                Some(Binding::Prior) | None => self.sample_latent(&key, n_draws, rng)?,
            };
            ret.insert(key, value);
        }
        Ok(ret)
    }

    pub fn forward(&self, values: &LatentValues) -> Result<ForwardOut> {
        let residual = fetch(values, LatentKey::Residual, &self.tree)?;
        let ln_sigma = fetch(values, LatentKey::Sigma, &self.tree)?;
        let (_, n) = residual.dims2()?;
        if n != self.n_obs() {
            return Err(EnsembleError::config(format!(
                "latents cover {} points but the model has {}",
                n,
                self.n_obs()
            )));
        }

        let cond_weights = compute_cond_weights(&self.tree, values, self.link())?;
        let leaf_weights = compute_leaf_weights(&self.tree, &cond_weights)?;
        let observation = assemble(
            &self.base_pred,
            &leaf_weights,
            &self.leaf_names,
            residual,
            ln_sigma,
        )?;

        Ok(ForwardOut {
            cond_weights,
            leaf_weights,
            observation,
        })
    }

    /// log p(y | latents), shape (S,)
    pub fn log_likelihood(&self, values: &LatentValues) -> Result<Tensor> {
        self.forward(values)?.observation.log_prob(&self.y_tensor)
    }

    /// Σ log p(latent) over every latent, shape (S,)
    pub fn log_prior(&self, values: &LatentValues) -> Result<Tensor> {
        let mut total: Option<Tensor> = None;
        for key in self.latent_keys() {
            let value = fetch(values, key, &self.tree)?;
            let lp = if let Some(prior) = self.gp_prior(&key) {
                prior.log_prob_tensor(value)?
            } else if let Some(prior) = self.scalar_prior(&key) {
                prior.log_prob(value)?
            } else {
                continue;
            };
            total = Some(match total {
                Some(t) => (t + lp)?,
                None => lp,
            });
        }
        total.ok_or_else(|| EnsembleError::consistency("model has no latents"))
    }

    pub fn log_joint(&self, values: &LatentValues) -> Result<Tensor> {
        Ok((self.log_likelihood(values)? + self.log_prior(values)?)?)
    }
}
