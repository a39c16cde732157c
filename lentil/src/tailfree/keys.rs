use candle_util::candle_core::Tensor;
use std::collections::BTreeMap;

use crate::error::{EnsembleError, Result};
use crate::tailfree::tree::{FamilyTree, NodeId, NodeRole};

pub const WEIGHT_PREFIX: &str = "base_weight_";
pub const TEMPERATURE_PREFIX: &str = "temp_";
pub const RESIDUAL_LABEL: &str = "ensemble_resid";
pub const SIGMA_LABEL: &str = "sigma";

/// Identifies one latent variable of the ensemble model
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LatentKey {
    /// unnormalized weight function of a non-root node, (N,) per draw
    NodeWeight(NodeId),
    /// log-temperature of a parent node, scalar per draw
    Temperature(NodeId),
    /// residual process, (N,) per draw
    Residual,
    /// log noise scale, scalar per draw
    Sigma,
}

/// Latent values with draws along the first dimension:
/// (S, N) for function-valued latents and (S,) for scalars
pub type LatentValues = BTreeMap<LatentKey, Tensor>;

/// How a latent enters the model: drawn from its prior or fixed
#[derive(Debug, Clone)]
pub enum Binding {
    Prior,
    Value(Tensor),
}

impl LatentKey {
    /// Every latent of a tree: node weights in preorder, temperatures
    /// of parents in preorder, then the residual and noise scale
    pub fn all(tree: &FamilyTree) -> Vec<LatentKey> {
        let weights = tree.nonroot_node_ids().into_iter().map(LatentKey::NodeWeight);
        let temps = tree.parent_node_ids().into_iter().map(LatentKey::Temperature);
        weights
            .chain(temps)
            .chain([LatentKey::Residual, LatentKey::Sigma])
            .collect()
    }

    /// Function-valued latents carry Gaussian-process priors
    pub fn is_function(&self) -> bool {
        matches!(self, LatentKey::NodeWeight(_) | LatentKey::Residual)
    }

    pub fn label(&self, tree: &FamilyTree) -> String {
        match self {
            LatentKey::NodeWeight(id) => format!("{}{}", WEIGHT_PREFIX, tree.name(*id)),
            LatentKey::Temperature(id) => format!("{}{}", TEMPERATURE_PREFIX, tree.name(*id)),
            LatentKey::Residual => RESIDUAL_LABEL.to_string(),
            LatentKey::Sigma => SIGMA_LABEL.to_string(),
        }
    }

    /// Inverse of [`LatentKey::label`]; fails if the label names a node
    /// that is not in the tree or does not play the expected role
    pub fn from_label(tree: &FamilyTree, label: &str) -> Result<Self> {
        let node = |name: &str| {
            tree.id(name).ok_or_else(|| {
                EnsembleError::consistency(format!(
                    "latent \"{}\" refers to node \"{}\" which is not in the tree",
                    label, name
                ))
            })
        };

        if label == RESIDUAL_LABEL {
            Ok(LatentKey::Residual)
        } else if label == SIGMA_LABEL {
            Ok(LatentKey::Sigma)
        } else if let Some(name) = label.strip_prefix(WEIGHT_PREFIX) {
            let id = node(name)?;
            if tree.role(id) == NodeRole::Root {
                return Err(EnsembleError::consistency("the root has no weight function"));
            }
            Ok(LatentKey::NodeWeight(id))
        } else if let Some(name) = label.strip_prefix(TEMPERATURE_PREFIX) {
            let id = node(name)?;
            if tree.role(id) == NodeRole::Leaf {
                return Err(EnsembleError::consistency(format!(
                    "leaf \"{}\" has no temperature",
                    name
                )));
            }
            Ok(LatentKey::Temperature(id))
        } else {
            Err(EnsembleError::consistency(format!(
                "unrecognized latent label \"{}\"",
                label
            )))
        }
    }
}
