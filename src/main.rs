//! Trains each candidate network on the configured dataset, and saves its test results.
//!
//! To run: `cargo r --release -- --config training_config.toml`. Add `--features wgpu` to train on
//! the GPU.

use std::process::ExitCode;

#[cfg(not(feature = "wgpu"))]
use burn::backend::NdArray;
#[cfg(feature = "wgpu")]
use burn::backend::Wgpu;
use burn::backend::Autodiff;
use clap::Parser;
use dipeptide_fe::{cli::Args, experiment, logging};
use tracing::{error, info, warn};

#[cfg(not(feature = "wgpu"))]
type TrainBackend = Autodiff<NdArray>;
#[cfg(feature = "wgpu")]
type TrainBackend = Autodiff<Wgpu>;

fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(&args.log_level);

    let cfg = match args.load_config() {
        Ok(c) => c,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    #[cfg(not(feature = "wgpu"))]
    warn!("Training on the CPU. This is slow; build with `--features wgpu` to use the GPU.");

    let device = Default::default();

    match experiment::run::<TrainBackend>(&cfg, cfg.run.train_split, &device) {
        Ok(dirs) => {
            info!("Finished {} candidates", dirs.len());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
