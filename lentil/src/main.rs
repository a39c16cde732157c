mod common;
mod run_calibrate;
mod run_fit;
mod run_predict;

use crate::common::*;
use run_calibrate::*;
use run_fit::*;
use run_predict::*;

#[derive(Parser, Debug)]
#[command(version, about, long_about, term_width = 80)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fit an ensemble posterior by variational inference or MCMC
    Fit(FitArgs),
    /// Extrapolate saved posterior draws to new inputs
    Predict(PredictArgs),
    /// Learn a calibration curve from held-out draws and recalibrate
    Calibrate(CalibrateArgs),
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match &cli.commands {
        Commands::Fit(args) => {
            run_fit(args)?;
        }
        Commands::Predict(args) => {
            run_predict(args)?;
        }
        Commands::Calibrate(args) => {
            run_calibrate(args)?;
        }
    }

    Ok(())
}
