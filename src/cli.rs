//! Command line arguments. Values given here override the config file, which overrides the
//! defaults.
//!
//! E.g. `cargo r --release -- --config training_config.toml --architecture pooling --region left`

use std::path::PathBuf;

use clap::Parser;

use crate::{
    config::{Architecture, Config, Region},
    error::Result,
};

#[derive(Parser, Debug)]
#[command(
    name = "train",
    about = "Train graph networks to predict conformational free energy from dihedral graphs"
)]
pub struct Args {
    /// TOML config file. Missing fields take their defaults.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory holding the structural records and graph caches.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// One target free energy per line.
    #[arg(long)]
    pub target_file: Option<PathBuf>,

    /// Result directories are created under this.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    #[arg(long)]
    pub epochs: Option<usize>,

    /// Fraction of the (retained) samples used for training.
    #[arg(long)]
    pub train_split: Option<f32>,

    #[arg(long, value_enum)]
    pub architecture: Option<Architecture>,

    /// Hold out this region for validation and testing.
    #[arg(long, value_enum)]
    pub region: Option<Region>,

    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Loads the config file if one was given, applies our overrides, and validates the result.
    pub fn load_config(&self) -> Result<Config> {
        let mut cfg = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };

        if let Some(v) = &self.data_dir {
            cfg.data.data_dir = v.clone();
        }
        if let Some(v) = &self.target_file {
            cfg.data.target_file = v.clone();
        }
        if let Some(v) = &self.log_dir {
            cfg.run.log_dir = v.clone();
        }
        if let Some(v) = self.epochs {
            cfg.run.epochs = v;
        }
        if let Some(v) = self.train_split {
            cfg.run.train_split = v;
        }
        if let Some(v) = self.architecture {
            cfg.run.architecture = v;
        }
        if self.region.is_some() {
            cfg.data.unseen_region = self.region;
        }

        cfg.validate()?;
        Ok(cfg)
    }
}
