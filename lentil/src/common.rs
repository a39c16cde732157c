pub use clap::{Args, Parser, Subcommand, ValueEnum};
pub use log::info;

pub use lentil::config::RunConfig;
pub use lentil::ensemble::{base_predictions_from_columns, BasePredictions, EnsembleModel};
pub use lentil::tailfree::FamilyTree;
pub use matrix_util::common_io::mkdir;
pub use matrix_util::traits::IoOps;
pub use nalgebra::DMatrix;

/// Inputs (N, D) from a headerless TSV
pub fn read_inputs(file: &str) -> anyhow::Result<DMatrix<f64>> {
    let x = DMatrix::<f64>::from_tsv(file, None)?;
    info!("read {} x {} inputs from {}", x.nrows(), x.ncols(), file);
    Ok(x)
}

/// Base-model predictions from a TSV whose header names the models
pub fn read_base_predictions(file: &str) -> anyhow::Result<BasePredictions> {
    let named = DMatrix::<f64>::read_named_columns(file, "\t")?;
    info!(
        "read {} base models at {} points from {}",
        named.cols.len(),
        named.mat.nrows(),
        file
    );
    Ok(base_predictions_from_columns(&named.cols, &named.mat)?)
}

/// The family tree from JSON, or a flat tree over the base models
pub fn read_tree(file: Option<&str>, base: &BasePredictions) -> anyhow::Result<FamilyTree> {
    let tree = match file {
        Some(file) => FamilyTree::from_json_file(file)?,
        None => {
            let names: Vec<&str> = base.keys().map(|x| x.as_str()).collect();
            FamilyTree::flat(names.as_slice())?
        }
    };
    info!(
        "family tree: {} nodes, {} leaves",
        tree.num_nodes(),
        tree.leaf_ids().len()
    );
    Ok(tree)
}

pub fn read_config(file: Option<&str>) -> anyhow::Result<RunConfig> {
    Ok(match file {
        Some(file) => RunConfig::from_json(file)?,
        None => RunConfig::default(),
    })
}

/// Use `n` threads for parallel parsing when given
pub fn set_threads(n: Option<usize>) -> anyhow::Result<()> {
    if let Some(n) = n {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build_global()?;
    }
    Ok(())
}
