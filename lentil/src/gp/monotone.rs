use candle_util::sgvb::FixedGaussianPrior;
use log::info;
use mcmc_util::{GibbsSampler, GibbsState, GibbsTarget};
use nalgebra::{DMatrix, DVector};
use rand::rngs::SmallRng;
use rand::Rng;
use rand_distr::StandardNormal;
use std::collections::BTreeMap;

use crate::config::MonotoneGpConfig;
use crate::error::{EnsembleError, Result};
use crate::gp::kernel::{Kernel, Rbf, RbfGrad1d, RbfHess1d};
use crate::gp::posterior::GpConditional;
use crate::gp::prior::GpPrior;

/// Blocks of the monotone GP sampler
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MonotoneKey {
    /// [f(x_obs); f'(x_deriv)]
    Joint,
    /// log noise scale
    Sigma,
}

/// One-dimensional GP regression whose derivative is pushed above zero
/// on a grid of points by a probit likelihood.
///
/// The latent vector stacks the function at the training points and
/// its derivative on the grid; both share one RBF kernel so the joint
/// prior is Gaussian.
#[derive(Debug, Clone)]
pub struct MonotoneGp {
    kernel: Rbf,
    config: MonotoneGpConfig,
    x_obs: DMatrix<f64>,
    y_obs: DVector<f64>,
    x_deriv: DMatrix<f64>,
    joint_cov: DMatrix<f64>,
    prior: GpPrior,
    sigma_prior: FixedGaussianPrior,
}

/// Posterior draws of a monotone GP
pub struct MonotoneFit {
    /// (N_obs + N_deriv, S)
    pub joint: DMatrix<f64>,
    /// (S,)
    pub sigma: DVector<f64>,
    pub acceptance: f64,
}

/// ln Φ(z), with an asymptotic series deep in the lower tail
pub fn log_normal_cdf(z: f64) -> f64 {
    if z > -10.0 {
        (0.5 * statrs::function::erf::erfc(-z / std::f64::consts::SQRT_2)).ln()
    } else {
        let u = 1.0 / (z * z);
        let series = 1.0 - u + 3.0 * u * u - 15.0 * u.powi(3) + 105.0 * u.powi(4);
        -0.5 * z * z - (-z).ln() - 0.5 * (2.0 * std::f64::consts::PI).ln() + series.ln()
    }
}

impl MonotoneGp {
    /// * `x_obs` - training inputs on the unit interval
    /// * `y_obs` - training targets
    ///
    /// With `cdf_constraint` the curve is pinned near (0, 0) and (1, 1)
    /// by two extra observations.
    pub fn new(x_obs: &[f64], y_obs: &[f64], config: &MonotoneGpConfig) -> Result<Self> {
        if x_obs.len() != y_obs.len() {
            return Err(EnsembleError::config(format!(
                "{} inputs but {} targets",
                x_obs.len(),
                y_obs.len()
            )));
        }
        if x_obs.is_empty() || config.n_deriv < 2 {
            return Err(EnsembleError::config(
                "monotone GP needs data and at least two derivative points",
            ));
        }

        let mut xx = x_obs.to_vec();
        let mut yy = y_obs.to_vec();
        if config.cdf_constraint {
            xx.extend([0.0, 1.0]);
            yy.extend([0.0, 1.0]);
        }

        let n_deriv = config.n_deriv;
        let x_obs = DMatrix::from_vec(xx.len(), 1, xx);
        let y_obs = DVector::from_vec(yy);
        let x_deriv = DMatrix::from_fn(n_deriv, 1, |i, _| i as f64 / (n_deriv - 1) as f64);

        let kernel = Rbf::new(config.lengthscale);
        let joint_cov = joint_covariance(&kernel, &x_obs, &x_deriv);
        let prior = GpPrior::from_covariance(&joint_cov, config.ridge)?;

        Ok(Self {
            kernel,
            config: config.clone(),
            x_obs,
            y_obs,
            x_deriv,
            joint_cov,
            prior,
            sigma_prior: FixedGaussianPrior::new(config.sigma_loc, config.sigma_scale),
        })
    }

    pub fn n_obs(&self) -> usize {
        self.x_obs.nrows()
    }

    pub fn n_deriv(&self) -> usize {
        self.x_deriv.nrows()
    }

    pub fn fit(&self, sampler: &GibbsSampler) -> Result<MonotoneFit> {
        let chain = sampler
            .run(self)
            .map_err(|e| EnsembleError::numerical(format!("monotone GP sampler: {}", e)))?;

        let s = chain.n_samples();
        let dim = self.n_obs() + self.n_deriv();
        let mut joint = DMatrix::zeros(dim, s);
        let mut sigma = DVector::zeros(s);
        for (j, state) in chain.samples.iter().enumerate() {
            if let Some(v) = state.get(&MonotoneKey::Joint) {
                joint.set_column(j, v);
            }
            if let Some(v) = state.get(&MonotoneKey::Sigma) {
                sigma[j] = v[0];
            }
        }
        let acceptance = chain
            .acceptance
            .get(&MonotoneKey::Sigma)
            .copied()
            .unwrap_or(0.0);
        info!("monotone GP: {} draws, noise acceptance {:.3}", s, acceptance);

        Ok(MonotoneFit {
            joint,
            sigma,
            acceptance,
        })
    }

    /// One function draw at `x_new` (N_new, 1) per posterior draw
    pub fn predict<R: Rng>(
        &self,
        fit: &MonotoneFit,
        x_new: &DMatrix<f64>,
        rng: &mut R,
    ) -> Result<DMatrix<f64>> {
        self.function_conditional(x_new)?.sample(&fit.joint, rng)
    }

    /// Conditional mean at `x_new` averaged over posterior draws
    pub fn predict_mean(&self, fit: &MonotoneFit, x_new: &DMatrix<f64>) -> Result<DVector<f64>> {
        let mean = self.function_conditional(x_new)?.mean(&fit.joint)?;
        Ok(mean.column_mean())
    }

    /// One derivative draw at `x_new` (N_new, 1) per posterior draw
    pub fn predict_derivative<R: Rng>(
        &self,
        fit: &MonotoneFit,
        x_new: &DMatrix<f64>,
        rng: &mut R,
    ) -> Result<DMatrix<f64>> {
        let grad = RbfGrad1d(self.kernel);
        let hess = RbfHess1d(self.kernel);
        let k_no = concat_columns(
            &grad.covariance(&self.x_obs, x_new).transpose(),
            &hess.covariance(x_new, &self.x_deriv),
        );
        GpConditional::from_blocks(&hess.gram(x_new), &k_no, &self.joint_cov, self.config.ridge)?
            .sample(&fit.joint, rng)
    }

    fn function_conditional(&self, x_new: &DMatrix<f64>) -> Result<GpConditional> {
        let k_no = concat_columns(
            &self.kernel.covariance(x_new, &self.x_obs),
            &RbfGrad1d(self.kernel).covariance(x_new, &self.x_deriv),
        );
        GpConditional::from_blocks(
            &self.kernel.gram(x_new),
            &k_no,
            &self.joint_cov,
            self.config.ridge,
        )
    }
}

/// [[K_ff, K_fd], [K_df, K_dd]] over function values at `x_obs` and
/// derivatives at `x_deriv`
fn joint_covariance(kernel: &Rbf, x_obs: &DMatrix<f64>, x_deriv: &DMatrix<f64>) -> DMatrix<f64> {
    let n = x_obs.nrows();
    let m = x_deriv.nrows();
    let k_ff = kernel.gram(x_obs);
    let k_fd = RbfGrad1d(*kernel).covariance(x_obs, x_deriv);
    let k_dd = RbfHess1d(*kernel).gram(x_deriv);

    let mut ret = DMatrix::zeros(n + m, n + m);
    ret.view_mut((0, 0), (n, n)).copy_from(&k_ff);
    ret.view_mut((0, n), (n, m)).copy_from(&k_fd);
    ret.view_mut((n, 0), (m, n)).copy_from(&k_fd.transpose());
    ret.view_mut((n, n), (m, m)).copy_from(&k_dd);
    ret
}

fn concat_columns(a: &DMatrix<f64>, b: &DMatrix<f64>) -> DMatrix<f64> {
    let mut ret = DMatrix::zeros(a.nrows(), a.ncols() + b.ncols());
    ret.columns_mut(0, a.ncols()).copy_from(a);
    ret.columns_mut(a.ncols(), b.ncols()).copy_from(b);
    ret
}

impl GibbsTarget for MonotoneGp {
    type Key = MonotoneKey;

    fn gaussian_blocks(&self) -> Vec<Self::Key> {
        vec![MonotoneKey::Joint]
    }

    fn scalar_blocks(&self) -> Vec<(Self::Key, f64)> {
        vec![(MonotoneKey::Sigma, 0.1)]
    }

    fn draw_prior(&self, _key: &Self::Key, rng: &mut SmallRng) -> DVector<f64> {
        self.prior.sample_vector(rng)
    }

    fn log_prior_scalar(&self, _key: &Self::Key, value: f64) -> f64 {
        self.sigma_prior.log_density(value)
    }

    /// Small noise around zero, with non-negative derivatives so the
    /// chain starts inside the monotone region
    fn init_state(&self, rng: &mut SmallRng) -> GibbsState<Self::Key> {
        let n = self.n_obs();
        let joint = DVector::from_fn(n + self.n_deriv(), |i, _| {
            let z: f64 = rng.sample(StandardNormal);
            if i < n {
                0.01 * z
            } else {
                0.01 * z.abs()
            }
        });
        BTreeMap::from([
            (MonotoneKey::Joint, joint),
            (MonotoneKey::Sigma, DVector::from_element(1, self.config.sigma_loc)),
        ])
    }

    fn log_likelihood(&self, state: &GibbsState<Self::Key>) -> f64 {
        let (Some(joint), Some(sigma)) = (
            state.get(&MonotoneKey::Joint),
            state.get(&MonotoneKey::Sigma),
        ) else {
            return f64::NEG_INFINITY;
        };
        let n = self.n_obs();
        let ln_sigma = sigma[0];
        let var = (2.0 * ln_sigma).exp();
        let ln_2pi = (2.0 * std::f64::consts::PI).ln();

        let fit: f64 = (0..n)
            .map(|i| {
                let r = self.y_obs[i] - joint[i];
                -0.5 * (r * r / var + 2.0 * ln_sigma + ln_2pi)
            })
            .sum();

        let scale = self.config.deriv_prior_scale;
        let monotone: f64 = joint
            .rows(n, self.n_deriv())
            .iter()
            .map(|d| log_normal_cdf(d / scale))
            .sum();

        fit + monotone
    }
}
