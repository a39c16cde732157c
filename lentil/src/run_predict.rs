use crate::common::*;

use lentil::ensemble::{predict_posterior, PosteriorDraws, PosteriorPrediction};
use rand::rngs::SmallRng;
use rand::SeedableRng;

#[derive(Args, Debug)]
pub struct PredictArgs {
    #[arg(short = 'x', long = "x", required = true, help = "Training inputs (N x D, no header)")]
    x_file: Box<str>,

    #[arg(short = 'y', long = "y", required = true, help = "Observations (N, one per line)")]
    y_file: Box<str>,

    #[arg(
        short = 'b',
        long = "base",
        required = true,
        help = "Base-model predictions at the training inputs (N x L, header)"
    )]
    base_file: Box<str>,

    #[arg(short = 't', long = "tree", help = "Family tree (JSON) used in fitting")]
    tree_file: Option<Box<str>>,

    #[arg(
        short = 'c',
        long = "config",
        help = "Run configuration (JSON)",
        long_help = "Configuration used in fitting, e.g., the {out}.config.json \n\
		     written by `fit`. Kernels and links must match the fitted ones."
    )]
    config_file: Option<Box<str>>,

    #[arg(
        short = 'd',
        long = "draws",
        required = true,
        help = "Header of the saved posterior draws",
        long_help = "The output header given to `fit`; \n\
		     {draws}.{latent}.tsv.gz and {draws}.scalars.tsv.gz are read back."
    )]
    draws_prefix: Box<str>,

    #[arg(long = "x-new", required = true, help = "Inputs to predict at (M x D, no header)")]
    x_new_file: Box<str>,

    #[arg(
        long = "base-new",
        required = true,
        help = "Base-model predictions at the new inputs (M x L, header)"
    )]
    base_new_file: Box<str>,

    #[arg(long, default_value_t = 42, help = "Random seed")]
    seed: u64,

    #[arg(
        short = 'o',
        long,
        required = true,
        help = "Output file header",
        long_help = "Output file header. Writes \n\
		     {out}.predictive.tsv.gz (draws x points, with residual and noise), \n\
		     {out}.mean.tsv.gz (draws x points, weighted base models only), \n\
		     {out}.weights.tsv.gz (points x leaves, posterior mean weights)."
    )]
    out: Box<str>,
}

pub fn run_predict(args: &PredictArgs) -> anyhow::Result<()> {
    mkdir(&args.out)?;

    let config = read_config(args.config_file.as_deref())?;
    let x = read_inputs(&args.x_file)?;
    let y = lentil::ensemble::draws::read_vector(&args.y_file)?;
    let base = read_base_predictions(&args.base_file)?;
    let tree = read_tree(args.tree_file.as_deref(), &base)?;
    let model = EnsembleModel::new(x, y, base, tree, config.ensemble)?;

    let draws = PosteriorDraws::read(model.tree(), &args.draws_prefix)?;
    info!("read {} posterior draws from {}.*", draws.n_samples(), args.draws_prefix);

    let x_new = read_inputs(&args.x_new_file)?;
    let base_new = read_base_predictions(&args.base_new_file)?;

    let mut rng = SmallRng::seed_from_u64(args.seed);
    let pred = predict_posterior(&model, &x_new, &base_new, &draws, &mut rng)?;
    write_prediction(&pred, &args.out)?;

    info!("done");
    Ok(())
}

/// Write predictive draws, mean draws and posterior mean leaf weights
pub fn write_prediction(pred: &PosteriorPrediction, out: &str) -> anyhow::Result<()> {
    pred.predictive.to_tsv(&format!("{}.predictive.tsv.gz", out))?;
    pred.mean.to_tsv(&format!("{}.mean.tsv.gz", out))?;
    pred.mean_leaf_weights()?.write_named_columns(
        &format!("{}.weights.tsv.gz", out),
        "\t",
        &pred.leaf_names,
    )?;
    info!(
        "wrote {} predictive draws at {} points to {}.*",
        pred.predictive.nrows(),
        pred.predictive.ncols(),
        out
    );
    Ok(())
}
