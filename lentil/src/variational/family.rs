use candle_util::candle_core::Tensor;
use candle_util::candle_nn::VarBuilder;
use candle_util::sgvb::{AnalyticalKL, FixedGaussianPrior, GaussianVar, VariationalDistribution};
use nalgebra::DMatrix;
use rand::rngs::SmallRng;
use rand::Rng;
use rand_distr::StandardNormal;
use std::collections::BTreeMap;

use crate::config::{FamilyKind, VariationalConfig};
use crate::ensemble::assemble::randn_tensor;
use crate::ensemble::{EnsembleModel, PosteriorDraws};
use crate::error::{EnsembleError, Result};
use crate::gp::Rbf;
use crate::tailfree::{LatentKey, LatentValues};
use crate::variational::mean_field::MeanFieldGp;
use crate::variational::sparse_gp::{select_inducing_points, SparseGp};
use crate::variational::{GpSnapshot, GpVariational};

/// One variational factor per latent of an [`EnsembleModel`]
pub struct VariationalFamily {
    functions: BTreeMap<LatentKey, Box<dyn GpVariational>>,
    scalars: BTreeMap<LatentKey, (GaussianVar, FixedGaussianPrior)>,
}

/// Fitted variational parameters, detached from the optimizer
#[derive(Debug, Clone)]
pub struct VariationalParams {
    pub functions: BTreeMap<LatentKey, GpSnapshot>,
    /// (mean, standard deviation) of each scalar
    pub scalars: BTreeMap<LatentKey, (f64, f64)>,
}

impl VariationalFamily {
    /// Parameters are registered in `vb` under each latent's label
    pub fn new(model: &EnsembleModel, config: &VariationalConfig, vb: VarBuilder) -> Result<Self> {
        let tree = model.tree();
        let ens = model.config();
        let inducing = match config.family {
            FamilyKind::Sparse => Some(select_inducing_points(model.x(), config.n_inducing)?),
            FamilyKind::MeanField => None,
        };

        let mut functions: BTreeMap<LatentKey, Box<dyn GpVariational>> = BTreeMap::new();
        let mut scalars = BTreeMap::new();

        for key in model.latent_keys() {
            let vb_key = vb.pp(key.label(tree));
            if key.is_function() {
                let factor: Box<dyn GpVariational> = match &inducing {
                    None => {
                        let prior = model.gp_prior(&key).ok_or_else(|| {
                            EnsembleError::consistency(format!("no GP prior for {:?}", key))
                        })?;
                        Box::new(MeanFieldGp::new(vb_key, prior, config.init_ln_std)?)
                    }
                    Some(z) => {
                        let lengthscale = if key == LatentKey::Residual {
                            ens.lengthscale_residual
                        } else {
                            ens.lengthscale_weight
                        };
                        Box::new(SparseGp::new(
                            vb_key,
                            &Rbf::new(lengthscale),
                            model.x(),
                            z,
                            ens.ridge,
                            config.init_ln_std,
                            config.diagonal_conditional,
                        )?)
                    }
                };
                functions.insert(key, factor);
            } else {
                let prior = model.scalar_prior(&key).ok_or_else(|| {
                    EnsembleError::consistency(format!("no scalar prior for {:?}", key))
                })?;
                let q = GaussianVar::new(vb_key, (), prior.loc(), config.init_ln_std)?;
                scalars.insert(key, (q, prior));
            }
        }

        Ok(Self { functions, scalars })
    }

    /// Reparameterised draws of every latent
    pub fn rsample(&self, n_draws: usize, rng: &mut SmallRng) -> Result<LatentValues> {
        let mut ret = LatentValues::new();
        for (key, factor) in self.functions.iter() {
            ret.insert(*key, factor.rsample(n_draws, rng)?);
        }
        for (key, (q, _)) in self.scalars.iter() {
            let eps = randn_tensor(rng, 1, n_draws, q.device())?.flatten_all()?;
            ret.insert(*key, q.rsample(&eps)?);
        }
        Ok(ret)
    }

    /// Σ KL(q || p) over all factors, scalar
    pub fn kl_divergence(&self) -> Result<Tensor> {
        let mut total: Option<Tensor> = None;
        let terms = self
            .functions
            .values()
            .map(|f| f.kl_divergence())
            .chain(self.scalars.values().map(|(q, prior)| -> Result<Tensor> {
                let var = VariationalDistribution::var(q)?;
                Ok(prior.kl_from_gaussian(q.mean(), &var)?)
            }));
        for kl in terms {
            let kl = kl?;
            total = Some(match total {
                Some(t) => (t + kl)?,
                None => kl,
            });
        }
        total.ok_or_else(|| EnsembleError::consistency("empty variational family"))
    }

    pub fn snapshot(&self) -> Result<VariationalParams> {
        let mut functions = BTreeMap::new();
        for (key, factor) in self.functions.iter() {
            functions.insert(*key, factor.snapshot()?);
        }
        let mut scalars = BTreeMap::new();
        for (key, (q, _)) in self.scalars.iter() {
            let mean: f64 = q.mean().to_scalar()?;
            let sdev: f64 = q.std()?.to_scalar()?;
            scalars.insert(*key, (mean, sdev));
        }
        Ok(VariationalParams { functions, scalars })
    }
}

impl VariationalParams {
    /// Independent draws from the fitted family
    pub fn sample<R: Rng>(&self, n_draws: usize, rng: &mut R) -> PosteriorDraws {
        let mut draws = PosteriorDraws::new();
        for (key, snap) in self.functions.iter() {
            draws.insert(*key, snap.sample(n_draws, rng));
        }
        for (key, &(mean, sdev)) in self.scalars.iter() {
            let col = DMatrix::from_fn(n_draws, 1, |_, _| {
                mean + sdev * rng.sample::<f64, _>(StandardNormal)
            });
            draws.insert(*key, col);
        }
        draws
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnsembleConfig;
    use crate::tailfree::FamilyTree;
    use candle_util::candle_core::{DType, Device};
    use candle_util::candle_nn::VarMap;
    use nalgebra::DVector;
    use rand::SeedableRng;

    fn model() -> Result<EnsembleModel> {
        let n = 10;
        let x = DMatrix::from_fn(n, 1, |i, _| i as f64 / (n - 1) as f64);
        let base = BTreeMap::from([
            ("a".to_string(), vec![0.0; n]),
            ("b".to_string(), vec![1.0; n]),
        ]);
        EnsembleModel::new(
            x,
            DVector::from_element(n, 0.5),
            base,
            FamilyTree::flat(&["a", "b"])?,
            EnsembleConfig::default(),
        )
    }

    #[test]
    fn both_families_cover_every_latent() -> Result<()> {
        let model = model()?;
        for family in [FamilyKind::MeanField, FamilyKind::Sparse] {
            let config = VariationalConfig {
                family,
                n_inducing: 4,
                ..Default::default()
            };
            let varmap = VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, DType::F64, &Device::Cpu);
            let q = VariationalFamily::new(&model, &config, vb)?;

            let mut rng = SmallRng::seed_from_u64(1);
            let values = q.rsample(3, &mut rng)?;
            assert_eq!(values.len(), model.latent_keys().len());
            assert_eq!(model.log_likelihood(&values)?.dims(), &[3]);
            assert!(q.kl_divergence()?.to_scalar::<f64>()?.is_finite());

            let draws = q.snapshot()?.sample(6, &mut rng);
            draws.validate(model.tree(), model.n_obs())?;
            assert!(varmap.data().lock().map(|d| d.contains_key("sigma.mean")).unwrap_or(false));
        }
        Ok(())
    }
}
