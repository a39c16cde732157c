use crate::common::*;

use lentil::calibration::{build_calibration_dataset, CalibrationCurve};
use lentil::ensemble::draws::read_vector;
use mcmc_util::GibbsSampler;
use rand::rngs::SmallRng;
use rand::SeedableRng;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CalibrationMethod {
    /// monotone Gaussian process fitted by Gibbs sampling
    Gp,
    /// pool-adjacent-violators isotonic regression
    Isotonic,
}

#[derive(Args, Debug)]
pub struct CalibrateArgs {
    #[arg(
        short = 'y',
        long = "y",
        required = true,
        help = "Held-out observations (N, one per line)"
    )]
    y_file: Box<str>,

    #[arg(
        short = 'p',
        long = "predictive",
        required = true,
        help = "Predictive draws at the held-out points (S x N, no header)",
        long_help = "Predictive draws with one row per draw and one column per \n\
		     held-out observation, e.g., {out}.predictive.tsv.gz from `predict`."
    )]
    predictive_file: Box<str>,

    #[arg(
        short = 'c',
        long = "config",
        help = "Run configuration (JSON); only the `monotone` section is used"
    )]
    config_file: Option<Box<str>>,

    #[arg(
        short = 'm',
        long,
        value_enum,
        default_value = "gp",
        help = "Calibration curve estimator"
    )]
    method: CalibrationMethod,

    #[arg(long, default_value_t = 500, help = "Retained draws of the monotone GP")]
    samples: usize,

    #[arg(long, default_value_t = 500, help = "Warmup sweeps of the monotone GP")]
    warmup: usize,

    #[arg(long, default_value_t = 101, help = "Grid points of the monotone GP calibration curve")]
    grid: usize,

    #[arg(
        long = "n-sample",
        default_value_t = 1000,
        help = "Recalibrated draws per observation"
    )]
    n_sample: usize,

    #[arg(long, default_value_t = 42, help = "Random seed")]
    seed: u64,

    #[arg(
        short = 'o',
        long,
        required = true,
        help = "Output file header",
        long_help = "Output file header. Writes \n\
		     {out}.curve.tsv.gz (nominal and calibrated probabilities) and \n\
		     {out}.recalibrated.tsv.gz (draws x points)."
    )]
    out: Box<str>,
}

pub fn run_calibrate(args: &CalibrateArgs) -> anyhow::Result<()> {
    mkdir(&args.out)?;

    let config = read_config(args.config_file.as_deref())?;
    let y = read_vector(&args.y_file)?;
    let draws = DMatrix::<f64>::from_tsv(&args.predictive_file, None)?;
    info!(
        "read {} draws at {} points from {}",
        draws.nrows(),
        draws.ncols(),
        args.predictive_file
    );

    let data = build_calibration_dataset(&y, &draws.transpose())?;

    let curve = match args.method {
        CalibrationMethod::Gp => {
            let sampler = GibbsSampler {
                n_samples: args.samples,
                warmup: args.warmup,
                thin: 1,
                seed: args.seed,
            };
            CalibrationCurve::fit(&data, &config.monotone, &sampler, args.grid)?
        }
        CalibrationMethod::Isotonic => CalibrationCurve::isotonic(&data)?,
    };

    let mut rng = SmallRng::seed_from_u64(args.seed);
    let recalibrated = curve.recalibrate(&draws, args.n_sample, &mut rng)?;

    let names: Vec<Box<str>> = vec!["nominal".into(), "calibrated".into()];
    curve
        .to_matrix()
        .write_named_columns(&format!("{}.curve.tsv.gz", args.out), "\t", &names)?;
    recalibrated.to_tsv(&format!("{}.recalibrated.tsv.gz", args.out))?;

    info!("done");
    Ok(())
}
