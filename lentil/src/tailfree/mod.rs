//! Tail-free process weights over a family tree of base models.
//!
//! Every non-root node owns a Gaussian-process weight function. Under
//! each parent the children's functions are tempered and mapped onto the
//! simplex; a leaf's weight is the product of conditional weights on its
//! path from the root, so leaf weights always sum to one.

pub mod keys;
pub mod tree;
pub mod weights;

pub use keys::{Binding, LatentKey, LatentValues};
pub use tree::{FamilyTree, NodeId, NodeRole, ROOT_NAME};
pub use weights::{compute_cond_weights, compute_leaf_weights, CondWeights};

use candle_util::candle_core::{Device, Tensor};
use nalgebra::DMatrix;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::config::EnsembleConfig;
use crate::error::{EnsembleError, Result};
use crate::gp::{GpPrior, Rbf};

/// Leaf weights (S, N, L) of `n_draws` prior draws evaluated at the rows
/// of `x`, with leaves in [`FamilyTree::leaf_ids`] order
pub fn prior_leaf_weights<R: Rng>(
    tree: &FamilyTree,
    x: &DMatrix<f64>,
    config: &EnsembleConfig,
    n_draws: usize,
    rng: &mut R,
    dev: &Device,
) -> Result<Tensor> {
    let prior = GpPrior::new(&Rbf::new(config.lengthscale_weight), x, config.ridge)?;
    let temp_dist = Normal::new(config.temperature_loc, config.temperature_scale)
        .map_err(|e| EnsembleError::config(format!("temperature prior: {}", e)))?;

    let mut values = LatentValues::new();
    for id in tree.nonroot_node_ids() {
        values.insert(LatentKey::NodeWeight(id), prior.sample_tensor(n_draws, rng, dev)?);
    }
    for id in tree.parent_node_ids() {
        let t: Vec<f64> = (0..n_draws).map(|_| temp_dist.sample(rng)).collect();
        values.insert(LatentKey::Temperature(id), Tensor::from_vec(t, n_draws, dev)?);
    }

    let cond = compute_cond_weights(tree, &values, config.link.into())?;
    compute_leaf_weights(tree, &cond)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn prior_leaf_weights_lie_on_the_simplex() -> Result<()> {
        let tree = FamilyTree::from_json_str(
            r#"{"root": ["g1", "g2"], "g1": ["a", "b"], "g2": ["c", "d", "e"]}"#,
        )?;
        let x = DMatrix::from_fn(15, 1, |i, _| i as f64 / 14.0);
        let mut rng = SmallRng::seed_from_u64(2);
        let w = prior_leaf_weights(&tree, &x, &EnsembleConfig::default(), 6, &mut rng, &Device::Cpu)?;
        assert_eq!(w.dims(), &[6, 15, 5]);

        let min: f64 = w.min_all()?.to_scalar()?;
        assert!(min >= 0.0);
        let total: Vec<Vec<f64>> = w.sum(2)?.to_vec2()?;
        for v in total.iter().flatten() {
            approx::assert_abs_diff_eq!(*v, 1.0, epsilon = 1e-10);
        }
        Ok(())
    }
}
