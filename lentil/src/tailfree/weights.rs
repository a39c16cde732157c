use candle_util::candle_core::{Tensor, D};
use candle_util::candle_link_functions::SimplexLink;
use std::collections::BTreeMap;

use crate::error::{EnsembleError, Result};
use crate::tailfree::keys::{LatentKey, LatentValues};
use crate::tailfree::tree::{FamilyTree, NodeId, NodeRole};

/// Conditional weights of each parent over its children, (S, N, K)
/// with children in listed order
pub type CondWeights = BTreeMap<NodeId, Tensor>;

pub(crate) fn fetch<'a>(
    values: &'a LatentValues,
    key: LatentKey,
    tree: &FamilyTree,
) -> Result<&'a Tensor> {
    values.get(&key).ok_or_else(|| {
        EnsembleError::consistency(format!("missing latent \"{}\"", key.label(tree)))
    })
}

/// Normalize sibling weight functions under each parent.
///
/// For a parent `p` with children `c1..cK`, the logits
/// `[w_c1(x), ..., w_cK(x)]` are divided by `exp(temp_p)` and mapped
/// onto the simplex by `link`.
///
/// * `values` - must hold `NodeWeight` (S, N) for every non-root node
///   and `Temperature` (S,) for every parent
pub fn compute_cond_weights(
    tree: &FamilyTree,
    values: &LatentValues,
    link: SimplexLink,
) -> Result<CondWeights> {
    let mut dims: Option<(usize, usize)> = None;
    for id in tree.nonroot_node_ids() {
        let w = fetch(values, LatentKey::NodeWeight(id), tree)?;
        let d = w.dims2().map_err(|_| {
            EnsembleError::config(format!(
                "weight of \"{}\" should be (S, N), got {:?}",
                tree.name(id),
                w.dims()
            ))
        })?;
        match dims {
            Some(prev) if prev != d => {
                return Err(EnsembleError::config(format!(
                    "weight of \"{}\" is {:?} but other weights are {:?}",
                    tree.name(id),
                    d,
                    prev
                )));
            }
            _ => dims = Some(d),
        }
    }
    let (s, _) = dims.ok_or_else(|| EnsembleError::config("tree has no weighted nodes"))?;

    let mut ret = CondWeights::new();
    for parent in tree.parent_node_ids() {
        let temp = fetch(values, LatentKey::Temperature(parent), tree)?;
        if temp.dims() != [s] {
            return Err(EnsembleError::config(format!(
                "temperature of \"{}\" should be ({},), got {:?}",
                tree.name(parent),
                s,
                temp.dims()
            )));
        }

        let logits = tree
            .children(parent)
            .iter()
            .map(|&c| fetch(values, LatentKey::NodeWeight(c), tree).cloned())
            .collect::<Result<Vec<_>>>()?;
        let logits = Tensor::stack(&logits, D::Minus1)?;
        let temp = temp.exp()?.reshape((s, 1, 1))?;

        ret.insert(parent, link.apply(&logits, &temp)?);
    }
    Ok(ret)
}

/// Multiply conditional weights along every root-to-leaf path.
///
/// Returns (S, N, L) with leaves in [`FamilyTree::leaf_ids`] order.
pub fn compute_leaf_weights(tree: &FamilyTree, cond: &CondWeights) -> Result<Tensor> {
    let root_weights = cond
        .get(&tree.root())
        .ok_or_else(|| EnsembleError::consistency("missing conditional weights of the root"))?;
    let (s, n, _) = root_weights.dims3()?;
    let ones = Tensor::ones((s, n), root_weights.dtype(), root_weights.device())?;

    let mut leaves = Vec::with_capacity(tree.leaf_ids().len());
    descend(tree, tree.root(), &ones, cond, &mut leaves)?;
    Ok(Tensor::stack(&leaves, D::Minus1)?)
}

fn descend(
    tree: &FamilyTree,
    node: NodeId,
    path: &Tensor,
    cond: &CondWeights,
    leaves: &mut Vec<Tensor>,
) -> Result<()> {
    let w = cond.get(&node).ok_or_else(|| {
        EnsembleError::consistency(format!(
            "missing conditional weights of \"{}\"",
            tree.name(node)
        ))
    })?;

    for (k, &child) in tree.children(node).iter().enumerate() {
        let w_k = path.mul(&w.narrow(2, k, 1)?.squeeze(2)?)?;
        if tree.role(child) == NodeRole::Leaf {
            leaves.push(w_k);
        } else {
            descend(tree, child, &w_k, cond, leaves)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_util::candle_core::{DType, Device};

    fn constant(v: f64, s: usize, n: usize) -> Result<Tensor> {
        Ok(Tensor::full(v, (s, n), &Device::Cpu)?)
    }

    fn zeros(s: usize) -> Result<Tensor> {
        Ok(Tensor::zeros(s, DType::F64, &Device::Cpu)?)
    }

    #[test]
    fn flat_tree_leaf_weights_are_one_softmax_of_the_logits() -> Result<()> {
        let tree = FamilyTree::flat(&["a", "b", "c"])?;
        let (s, n) = (2, 4);
        let mut values = LatentValues::new();
        for (i, id) in tree.nonroot_node_ids().into_iter().enumerate() {
            values.insert(LatentKey::NodeWeight(id), constant(i as f64 * 0.3, s, n)?);
        }
        values.insert(LatentKey::Temperature(tree.root()), zeros(s)?);

        let cond = compute_cond_weights(&tree, &values, SimplexLink::Softmax)?;
        let leaf = compute_leaf_weights(&tree, &cond)?;
        assert_eq!(leaf.dims(), &[s, n, 3]);

        // one softmax of the logits [0, 0.3, 0.6]
        let z: f64 = [0.0f64, 0.3, 0.6].iter().map(|v| v.exp()).sum();
        let leaf = leaf.flatten_to(1)?.to_vec2::<f64>()?;
        for row in leaf.iter() {
            for (k, w) in row.iter().enumerate() {
                approx::assert_abs_diff_eq!(*w, (k as f64 * 0.3).exp() / z, epsilon = 1e-12);
            }
        }
        Ok(())
    }

    #[test]
    fn nested_weights_multiply_along_paths() -> Result<()> {
        let tree = FamilyTree::from_json_str(r#"{"root": ["g1", "m3"], "g1": ["m1", "m2"]}"#)?;
        let (s, n) = (3, 5);
        let id = |name: &str| tree.id(name).unwrap();

        let mut values = LatentValues::new();
        values.insert(LatentKey::NodeWeight(id("g1")), constant(1.0, s, n)?);
        values.insert(LatentKey::NodeWeight(id("m3")), constant(0.0, s, n)?);
        values.insert(LatentKey::NodeWeight(id("m1")), constant(0.5, s, n)?);
        values.insert(LatentKey::NodeWeight(id("m2")), constant(-0.5, s, n)?);
        values.insert(LatentKey::Temperature(tree.root()), zeros(s)?);
        values.insert(LatentKey::Temperature(id("g1")), zeros(s)?);

        let cond = compute_cond_weights(&tree, &values, SimplexLink::Softmax)?;
        let leaf = compute_leaf_weights(&tree, &cond)?;
        let leaf: Vec<Vec<Vec<f64>>> = leaf.to_vec3()?;

        let p_g1 = 1.0 / (1.0 + (-1.0f64).exp());
        let p_m1 = 1.0 / (1.0 + (-1.0f64).exp());
        let row = &leaf[1][2];
        approx::assert_abs_diff_eq!(row[0], p_g1 * p_m1, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(row[1], p_g1 * (1.0 - p_m1), epsilon = 1e-12);
        approx::assert_abs_diff_eq!(row[2], 1.0 - p_g1, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(row.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn high_temperature_flattens_the_weights() -> Result<()> {
        let tree = FamilyTree::flat(&["a", "b"])?;
        let (s, n) = (1, 2);
        let ids = tree.nonroot_node_ids();
        let mut values = LatentValues::new();
        values.insert(LatentKey::NodeWeight(ids[0]), constant(1.0, s, n)?);
        values.insert(LatentKey::NodeWeight(ids[1]), constant(0.0, s, n)?);

        values.insert(LatentKey::Temperature(0), Tensor::new(&[0.0f64], &Device::Cpu)?);
        let cold = compute_cond_weights(&tree, &values, SimplexLink::Entmax15)?;
        values.insert(LatentKey::Temperature(0), Tensor::new(&[5.0f64], &Device::Cpu)?);
        let hot = compute_cond_weights(&tree, &values, SimplexLink::Entmax15)?;

        let cold: f64 = cold[&0].get(0)?.get(0)?.get(0)?.to_scalar()?;
        let hot: f64 = hot[&0].get(0)?.get(0)?.get(0)?.to_scalar()?;
        assert!(hot < cold && hot > 0.5, "cold {} hot {}", cold, hot);
        Ok(())
    }

    #[test]
    fn missing_latents_are_reported_by_label() -> Result<()> {
        let tree = FamilyTree::flat(&["a", "b"])?;
        let mut values = LatentValues::new();
        values.insert(LatentKey::NodeWeight(1), constant(0.0, 1, 2)?);
        values.insert(LatentKey::Temperature(0), zeros(1)?);
        match compute_cond_weights(&tree, &values, SimplexLink::Softmax) {
            Err(EnsembleError::Consistency(msg)) => assert!(msg.contains("base_weight_b")),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
        Ok(())
    }
}
