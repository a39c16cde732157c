use candle_util::candle_core::{Device, Tensor};
use matrix_util::common_io::{read_lines_of_types, write_lines};
use matrix_util::traits::{ConvertMatOps, IoOps};
use nalgebra::{DMatrix, DVector};
use std::collections::BTreeMap;

use crate::error::{EnsembleError, Result};
use crate::tailfree::{FamilyTree, LatentKey, LatentValues};

/// Posterior draws of every latent as plain matrices: (S, N) for
/// function-valued latents and (S, 1) for scalars.
///
/// Variational and MCMC fits both produce this; prediction consumes it.
#[derive(Debug, Clone, Default)]
pub struct PosteriorDraws {
    draws: BTreeMap<LatentKey, DMatrix<f64>>,
}

impl PosteriorDraws {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: LatentKey, draws: DMatrix<f64>) {
        self.draws.insert(key, draws);
    }

    pub fn get(&self, key: &LatentKey) -> Option<&DMatrix<f64>> {
        self.draws.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LatentKey, &DMatrix<f64>)> {
        self.draws.iter()
    }

    pub fn n_samples(&self) -> usize {
        self.draws.values().next().map(|m| m.nrows()).unwrap_or(0)
    }

    pub fn from_values(values: &LatentValues) -> Result<Self> {
        let mut ret = Self::new();
        for (key, value) in values.iter() {
            let value = if value.rank() == 1 {
                value.unsqueeze(1)?
            } else {
                value.clone()
            };
            ret.insert(*key, DMatrix::<f64>::from_tensor(&value)?);
        }
        Ok(ret)
    }

    pub fn to_values(&self, dev: &Device) -> Result<LatentValues> {
        let mut ret = LatentValues::new();
        for (key, mat) in self.draws.iter() {
            let t = mat.to_tensor(dev)?;
            let t = if key.is_function() { t } else { t.flatten_all()? };
            ret.insert(*key, t);
        }
        Ok(ret)
    }

    /// Draws of one latent as a tensor, (S, N) or (S,)
    pub fn tensor(&self, key: &LatentKey, dev: &Device) -> Result<Tensor> {
        let mat = self
            .get(key)
            .ok_or_else(|| EnsembleError::consistency(format!("no draws for {:?}", key)))?;
        let t = mat.to_tensor(dev)?;
        Ok(if key.is_function() { t } else { t.flatten_all()? })
    }

    /// Average over draws
    pub fn posterior_mean(&self, key: &LatentKey) -> Option<DVector<f64>> {
        self.get(key).map(|m| m.row_mean().transpose())
    }

    /// The draws must hold exactly the latents of `tree`, share one
    /// number of draws, and cover `n_points` inputs
    pub fn validate(&self, tree: &FamilyTree, n_points: usize) -> Result<()> {
        let expected = LatentKey::all(tree);
        for key in self.draws.keys() {
            if !expected.contains(key) {
                return Err(EnsembleError::consistency(format!(
                    "draws hold {:?} which is not a latent of the tree",
                    key
                )));
            }
        }

        let s = self.n_samples();
        for key in expected.iter() {
            let label = key.label(tree);
            let mat = self.get(key).ok_or_else(|| {
                EnsembleError::consistency(format!("no draws for \"{}\"", label))
            })?;
            let ncols = if key.is_function() { n_points } else { 1 };
            if mat.shape() != (s, ncols) {
                return Err(EnsembleError::consistency(format!(
                    "draws of \"{}\" are {:?}, expected {:?}",
                    label,
                    mat.shape(),
                    (s, ncols)
                )));
            }
        }
        Ok(())
    }

    /// Write `{prefix}.{label}.tsv.gz` per function-valued latent and
    /// `{prefix}.scalars.tsv.gz` with one labelled column per scalar
    pub fn write(&self, tree: &FamilyTree, prefix: &str) -> Result<()> {
        let mut scalar_names = vec![];
        let mut scalar_cols = vec![];
        for (key, mat) in self.draws.iter() {
            if key.is_function() {
                mat.to_tsv(&format!("{}.{}.tsv.gz", prefix, key.label(tree)))?;
            } else {
                scalar_names.push(key.label(tree).into_boxed_str());
                scalar_cols.push(mat.column(0).into_owned());
            }
        }
        if !scalar_cols.is_empty() {
            let scalars = DMatrix::from_columns(&scalar_cols);
            scalars.write_named_columns(&format!("{}.scalars.tsv.gz", prefix), "\t", &scalar_names)?;
        }
        Ok(())
    }

    /// Read what [`PosteriorDraws::write`] wrote for the same tree
    pub fn read(tree: &FamilyTree, prefix: &str) -> Result<Self> {
        let mut ret = Self::new();
        let scalars = DMatrix::<f64>::read_named_columns(&format!("{}.scalars.tsv.gz", prefix), "\t")?;
        for (name, col) in scalars.cols.iter().zip(scalars.mat.column_iter()) {
            let key = LatentKey::from_label(tree, name)?;
            ret.insert(key, DMatrix::from_iterator(col.len(), 1, col.iter().copied()));
        }

        for key in LatentKey::all(tree).into_iter().filter(|k| k.is_function()) {
            let file = format!("{}.{}.tsv.gz", prefix, key.label(tree));
            ret.insert(key, DMatrix::<f64>::from_tsv(&file, None)?);
        }
        Ok(ret)
    }
}

/// Write a trace of losses, one value per line
pub fn write_trace(trace: &[f64], file: &str) -> Result<()> {
    write_lines(trace, file)?;
    Ok(())
}

/// Read a single-column file of numbers
pub fn read_vector(file: &str) -> Result<DVector<f64>> {
    let data = read_lines_of_types::<f64>(file, "\t", -1)?;
    let mut values = Vec::with_capacity(data.lines.len());
    for (i, line) in data.lines.into_iter().enumerate() {
        match line.as_slice() {
            [v] => values.push(*v),
            _ => {
                return Err(EnsembleError::config(format!(
                    "{}: row {} has {} fields, expected one",
                    file,
                    i,
                    line.len()
                )))
            }
        }
    }
    Ok(DVector::from_vec(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tailfree::FamilyTree;

    fn toy_draws(tree: &FamilyTree, s: usize, n: usize) -> PosteriorDraws {
        let mut draws = PosteriorDraws::new();
        for (i, key) in LatentKey::all(tree).into_iter().enumerate() {
            let ncols = if key.is_function() { n } else { 1 };
            draws.insert(key, DMatrix::from_fn(s, ncols, |r, c| (i * 100 + r * 10 + c) as f64));
        }
        draws
    }

    #[test]
    fn tensor_conversion_keeps_shapes() -> Result<()> {
        let tree = FamilyTree::flat(&["a", "b"])?;
        let draws = toy_draws(&tree, 3, 4);
        draws.validate(&tree, 4)?;

        let values = draws.to_values(&Device::Cpu)?;
        assert_eq!(values[&LatentKey::Residual].dims(), &[3, 4]);
        assert_eq!(values[&LatentKey::Sigma].dims(), &[3]);

        let back = PosteriorDraws::from_values(&values)?;
        assert_eq!(back.get(&LatentKey::Sigma), draws.get(&LatentKey::Sigma));
        assert_eq!(back.get(&LatentKey::Residual), draws.get(&LatentKey::Residual));
        Ok(())
    }

    #[test]
    fn validation_catches_foreign_and_missing_latents() -> Result<()> {
        let tree = FamilyTree::flat(&["a", "b"])?;
        let other = FamilyTree::flat(&["a", "b", "c"])?;
        let draws = toy_draws(&other, 2, 4);
        assert!(matches!(draws.validate(&tree, 4), Err(EnsembleError::Consistency(_))));

        let mut draws = toy_draws(&tree, 2, 4);
        assert!(matches!(draws.validate(&tree, 5), Err(EnsembleError::Consistency(_))));
        draws.draws.remove(&LatentKey::Sigma);
        assert!(matches!(draws.validate(&tree, 4), Err(EnsembleError::Consistency(_))));
        Ok(())
    }

    #[test]
    fn draws_survive_a_file_round_trip() -> Result<()> {
        let tree = FamilyTree::from_json_str(r#"{"root": ["g", "c"], "g": ["a", "b"]}"#)?;
        let draws = toy_draws(&tree, 3, 5);
        let dir = tempfile::tempdir()?;
        let prefix = dir.path().join("fit");
        let prefix = prefix.to_string_lossy();

        draws.write(&tree, &prefix)?;
        let back = PosteriorDraws::read(&tree, &prefix)?;
        back.validate(&tree, 5)?;
        for (key, mat) in draws.iter() {
            assert_eq!(back.get(key), Some(mat));
        }
        Ok(())
    }
}
