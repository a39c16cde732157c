use crate::common::*;
use crate::run_predict::write_prediction;

use lentil::config::{FamilyKind, LinkKind, PenaltyKind};
use lentil::ensemble::draws::write_trace;
use lentil::ensemble::{predict_posterior, PosteriorDraws};
use lentil::mcmc::fit_mcmc;
use lentil::tailfree::LatentKey;
use lentil::variational::fit_variational;
use rand::rngs::SmallRng;
use rand::SeedableRng;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
#[clap(rename_all = "lowercase")]
pub enum FitMethod {
    /// mean-field variational inference
    Mfvi,
    /// sparse (inducing-point) GP variational inference
    Sgpr,
    /// Metropolis-within-Gibbs sampling
    Mcmc,
}

#[derive(Args, Debug)]
pub struct FitArgs {
    #[arg(
        short = 'x',
        long = "x",
        required = true,
        help = "Training inputs (N x D, no header)",
        long_help = "Tab-separated matrix of training inputs without a header. \n\
		     One row per observation, one column per input dimension. \n\
		     Gzipped files (.gz) are read transparently."
    )]
    x_file: Box<str>,

    #[arg(
        short = 'y',
        long = "y",
        required = true,
        help = "Observations (N, one per line)",
        long_help = "Single-column file of observed responses, \n\
		     one line per row of the training inputs."
    )]
    y_file: Box<str>,

    #[arg(
        short = 'b',
        long = "base",
        required = true,
        help = "Base-model predictions at the training inputs (N x L, header)",
        long_help = "Tab-separated matrix of base-model predictions at the training inputs. \n\
		     The header line names the models; these names must match \n\
		     the leaves of the family tree."
    )]
    base_file: Box<str>,

    #[arg(
        short = 't',
        long = "tree",
        help = "Family tree (JSON)",
        long_help = "JSON object mapping each parent node to its children, e.g., \n\
		     {\"root\": [\"linear\", \"smooth\"], \"smooth\": [\"gp\", \"spline\"]}. \n\
		     Without a tree, all base models hang directly off the root."
    )]
    tree_file: Option<Box<str>>,

    #[arg(
        long = "x-new",
        requires = "base_new_file",
        help = "Inputs to predict at (M x D, no header)"
    )]
    x_new_file: Option<Box<str>>,

    #[arg(
        long = "base-new",
        requires = "x_new_file",
        help = "Base-model predictions at the new inputs (M x L, header)"
    )]
    base_new_file: Option<Box<str>>,

    #[arg(
        short = 'm',
        long,
        value_enum,
        default_value = "mfvi",
        help = "Posterior inference method"
    )]
    method: FitMethod,

    #[arg(
        short = 'c',
        long = "config",
        help = "Run configuration (JSON)",
        long_help = "JSON file with optional sections `ensemble`, `variational`, \n\
		     `mcmc` and `monotone`. Missing fields keep their defaults; \n\
		     command-line options below override the file."
    )]
    config_file: Option<Box<str>>,

    #[arg(long, value_enum, help = "Link that maps sibling logits to weights")]
    link: Option<LinkKind>,

    #[arg(long = "iters", help = "Number of optimizer steps")]
    n_iters: Option<usize>,

    #[arg(long = "lr", help = "Learning rate")]
    learning_rate: Option<f64>,

    #[arg(long = "mc-samples", help = "Monte Carlo draws per ELBO estimate")]
    n_mc_samples: Option<usize>,

    #[arg(long = "inducing", help = "Number of inducing points (sgpr)")]
    n_inducing: Option<usize>,

    #[arg(
        long = "fitc",
        help = "Diagonal conditional for the sparse family (sgpr)",
        long_help = "Keep only the diagonal of cov(f | u) in the sparse family. \n\
		     Avoids factorizing an N x N matrix when there are many inputs."
    )]
    fitc: bool,

    #[arg(long, value_enum, help = "Penalty added to the negative ELBO")]
    penalty: Option<PenaltyKind>,

    #[arg(long = "penalty-weight", help = "Multiplier of the penalty")]
    penalty_weight: Option<f64>,

    #[arg(long = "mcmc-samples", help = "Number of retained MCMC draws")]
    mcmc_samples: Option<usize>,

    #[arg(long, help = "Number of MCMC warmup sweeps")]
    warmup: Option<usize>,

    #[arg(
        long = "draws",
        default_value_t = 500,
        help = "Posterior draws to save after variational fitting"
    )]
    n_draws: usize,

    #[arg(long, help = "Random seed")]
    seed: Option<u64>,

    #[arg(long, help = "Number of threads for reading inputs")]
    threads: Option<usize>,

    #[arg(
        short = 'o',
        long,
        required = true,
        help = "Output file header",
        long_help = "Output file header. Writes \n\
		     {out}.config.json (resolved configuration), \n\
		     {out}.{latent}.tsv.gz and {out}.scalars.tsv.gz (posterior draws), \n\
		     {out}.loss.tsv.gz and {out}.elbo.tsv.gz, or {out}.llik.tsv.gz (traces), \n\
		     and prediction files when new inputs are given."
    )]
    out: Box<str>,
}

impl FitArgs {
    fn resolve_config(&self) -> anyhow::Result<RunConfig> {
        let mut config = read_config(self.config_file.as_deref())?;

        if let Some(link) = self.link {
            config.ensemble.link = link;
        }

        let vi = &mut config.variational;
        vi.family = match self.method {
            FitMethod::Sgpr => FamilyKind::Sparse,
            _ => FamilyKind::MeanField,
        };
        if let Some(n) = self.n_iters {
            vi.n_iters = n;
        }
        if let Some(lr) = self.learning_rate {
            vi.learning_rate = lr;
        }
        if let Some(n) = self.n_mc_samples {
            vi.n_mc_samples = n;
        }
        if let Some(n) = self.n_inducing {
            vi.n_inducing = n;
        }
        if self.fitc {
            vi.diagonal_conditional = true;
        }
        if let Some(p) = self.penalty {
            vi.penalty = p;
        }
        if let Some(w) = self.penalty_weight {
            vi.penalty_weight = w;
        }

        let mc = &mut config.mcmc;
        if let Some(n) = self.mcmc_samples {
            mc.n_samples = n;
        }
        if let Some(n) = self.warmup {
            mc.warmup = n;
        }

        if let Some(seed) = self.seed {
            config.variational.seed = seed;
            config.mcmc.seed = seed;
        }
        Ok(config)
    }
}

pub fn run_fit(args: &FitArgs) -> anyhow::Result<()> {
    set_threads(args.threads)?;
    mkdir(&args.out)?;

    let config = args.resolve_config()?;
    let config_file = format!("{}.config.json", args.out);
    serde_json::to_writer_pretty(std::fs::File::create(&config_file)?, &config)?;
    info!("wrote the resolved configuration to {}", config_file);

    let x = read_inputs(&args.x_file)?;
    let y = lentil::ensemble::draws::read_vector(&args.y_file)?;
    let base = read_base_predictions(&args.base_file)?;
    let tree = read_tree(args.tree_file.as_deref(), &base)?;

    let model = EnsembleModel::new(x, y, base, tree, config.ensemble.clone())?;

    let draws: PosteriorDraws = match args.method {
        FitMethod::Mfvi | FitMethod::Sgpr => {
            let fit = fit_variational(&model, &config.variational)?;
            write_trace(&fit.loss_trace, &format!("{}.loss.tsv.gz", args.out))?;
            write_trace(&fit.elbo_trace, &format!("{}.elbo.tsv.gz", args.out))?;
            let mut rng = SmallRng::seed_from_u64(config.variational.seed);
            fit.params.sample(args.n_draws, &mut rng)
        }
        FitMethod::Mcmc => {
            let fit = fit_mcmc(&model, &config.mcmc)?;
            info!("mean acceptance rate: {:.3}", fit.mean_acceptance());
            write_trace(&fit.log_likelihoods, &format!("{}.llik.tsv.gz", args.out))?;
            fit.draws
        }
    };

    if let Some(ln_sigma) = draws.posterior_mean(&LatentKey::Sigma) {
        info!("posterior mean log noise scale: {:.4}", ln_sigma[0]);
    }
    draws.write(model.tree(), &args.out)?;
    info!("wrote {} posterior draws to {}.*", draws.n_samples(), args.out);

    if let (Some(x_new_file), Some(base_new_file)) = (&args.x_new_file, &args.base_new_file) {
        let x_new = read_inputs(x_new_file)?;
        let base_new = read_base_predictions(base_new_file)?;
        let mut rng = SmallRng::seed_from_u64(config.variational.seed.wrapping_add(1));
        let pred = predict_posterior(&model, &x_new, &base_new, &draws, &mut rng)?;
        write_prediction(&pred, &args.out)?;
    }

    info!("done");
    Ok(())
}
