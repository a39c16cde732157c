use nalgebra::DVector;
use rand::rngs::SmallRng;
use std::collections::BTreeMap;
use std::fmt::Debug;

/// A parameter that lives on the ellipse spanned by the current
/// value and a prior draw.
pub trait EssParam: Clone {
    /// `self * a + other * b`
    fn linear_combine(&self, a: f64, other: &Self, b: f64) -> Self;
}

impl EssParam for DVector<f64> {
    fn linear_combine(&self, a: f64, other: &Self, b: f64) -> Self {
        self * a + other * b
    }
}

/// A joint target broken into blocks for Metropolis-within-Gibbs.
///
/// Vector blocks carry zero-mean Gaussian priors and are updated by
/// elliptical slice sampling. Scalar blocks carry arbitrary priors
/// and are updated by random-walk Metropolis.
pub trait GibbsTarget {
    type Key: Ord + Clone + Debug + Send + Sync;

    /// Keys of the zero-mean Gaussian blocks
    fn gaussian_blocks(&self) -> Vec<Self::Key>;

    /// Keys of the scalar blocks with their initial proposal scales
    fn scalar_blocks(&self) -> Vec<(Self::Key, f64)>;

    /// Draw a block from its Gaussian prior
    fn draw_prior(&self, key: &Self::Key, rng: &mut SmallRng) -> DVector<f64>;

    /// Log density of a scalar block under its prior
    fn log_prior_scalar(&self, key: &Self::Key, value: f64) -> f64;

    /// Starting point of the chain
    fn init_state(&self, rng: &mut SmallRng) -> BTreeMap<Self::Key, DVector<f64>>;

    /// Log-likelihood of the data given every block
    fn log_likelihood(&self, state: &BTreeMap<Self::Key, DVector<f64>>) -> f64;
}
