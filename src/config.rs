//! Run configuration. Loaded from a TOML file (e.g. `training_config.toml` at the project root),
//! with CLI overrides applied on top. Every field has a default, so a partial file, or none at
//! all, is fine.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    model::{Convolution, FinalPooling, PoolingType},
};

/// Named subsets of conformational space. Training on one and testing on the other checks how
/// well the model generalizes to minima it hasn't seen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    Left,
    Right,
}

impl Region {
    pub fn name(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }

    /// The region we train on when this one is held out.
    pub fn complement(self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }

    /// E.g. `left.json`, listing the sample indices that belong to this region.
    pub fn file_name(self) -> String {
        format!("{}.json", self.name())
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    /// Dense network over the flattened node features.
    #[default]
    Linear,
    /// Graph convolutions with pooling between blocks.
    Pooling,
}

/// Which samples normalization statistics are taken from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatsScope {
    #[default]
    All,
    TrainOnly,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// `small`, `medium`, `old`, `big`, or anything else for the 48952-sample set.
    pub dataset_type: String,
    /// Holds `{i}.json` structural records, graph caches, and `left.json` / `right.json`.
    pub data_dir: PathBuf,
    /// One target free energy per line.
    pub target_file: PathBuf,
    /// Overrides the sample count implied by `dataset_type`.
    pub n_samples: Option<usize>,
    pub normalize_data: bool,
    pub normalize_target: bool,
    /// Rebuild every graph from its structural record, and rewrite the cache.
    pub overwrite_cache: bool,
    /// Write graphs rebuilt because of a cache miss back to disk.
    pub persist_missing: bool,
    /// When set, we train on the complement and validate/test on this region.
    pub unseen_region: Option<Region>,
    pub feature_stats: StatsScope,
    pub target_stats: StatsScope,
}

impl Default for DataConfig {
    fn default() -> Self {
        let dataset_type = "medium".to_owned();
        Self {
            data_dir: PathBuf::from(format!("ala_dipep_{dataset_type}")),
            target_file: PathBuf::from(format!("free-energy-{dataset_type}.dat")),
            dataset_type,
            n_samples: None,
            normalize_data: true,
            normalize_target: true,
            overwrite_cache: false,
            persist_missing: false,
            unseen_region: None,
            feature_stats: StatsScope::All,
            target_stats: StatsScope::All,
        }
    }
}

impl DataConfig {
    pub fn n_samples(&self) -> usize {
        if let Some(n) = self.n_samples {
            return n;
        }

        match self.dataset_type.as_str() {
            "small" => 3_815,
            "medium" => 21_881,
            "old" => 50_000,
            "big" => 64_074,
            _ => 48_952,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Encode each dihedral as (sin, cos) instead of the raw angle.
    pub sin_cos: bool,
    pub graph_type: String,
    pub out_channels: usize,
    pub convolution: Convolution,
    /// Convolution layers after the last pooling block.
    pub convolutions: usize,
    pub epochs: usize,
    pub patience: usize,
    /// Fraction of the samples used at all, before splitting.
    pub dataset_perc: f32,
    /// Shuffle node order when building graphs.
    pub shuffle: bool,
    pub train_split: f32,
    pub validation_split: f32,
    /// Shuffle indices before splitting. Off only for deterministic test fixtures.
    pub shuffle_split: bool,
    pub seed: u64,
    pub architecture: Architecture,
    pub log_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            sin_cos: true,
            graph_type: "De Bruijn".to_owned(),
            out_channels: 4,
            convolution: Convolution::GraphConv,
            convolutions: 3,
            epochs: 100,
            patience: 10,
            dataset_perc: 1.,
            shuffle: false,
            train_split: 0.1,
            validation_split: 0.1,
            shuffle_split: true,
            seed: 13_000,
            architecture: Architecture::Linear,
            log_dir: PathBuf::from("logs"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimConfig {
    pub learning_rate: f64,
    /// Initial momentum. It cools towards 0 over the run.
    pub momentum: f64,
    pub weight_decay: f64,
    /// Nominal optimizer steps per epoch, used to set the cooling rate.
    pub steps_per_epoch: usize,
}

impl Default for OptimConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.001,
            momentum: 0.99,
            weight_decay: 0.0001,
            steps_per_epoch: 2_187,
        }
    }
}

impl OptimConfig {
    /// Per-step factor by which `1 - momentum` is divided; momentum reaches 0 after
    /// `epochs * steps_per_epoch` steps.
    pub fn cooling_beta(&self, epochs: usize) -> f64 {
        let total_steps = (epochs * self.steps_per_epoch).max(1) as f64;
        (1. - self.momentum).powf(1. / total_steps)
    }
}

/// The fixed grid of candidate architectures.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub pooling_layers: Vec<usize>,
    pub final_pooling: Vec<FinalPooling>,
    pub pooling_type: PoolingType,
    pub topk_ratio: f32,
    pub dense_output: bool,
    pub channels_optuna: usize,
    pub optuna_multiplier: usize,
    pub final_nodes: usize,
    pub linear_layers: Vec<usize>,
    pub linear_nodes: [usize; 4],
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            pooling_layers: vec![1],
            final_pooling: vec![
                FinalPooling::MaxPool,
                FinalPooling::AvgPool,
                FinalPooling::SortPool,
                FinalPooling::TopK,
            ],
            pooling_type: PoolingType::EdgePooling,
            topk_ratio: 0.5,
            dense_output: false,
            channels_optuna: 1,
            optuna_multiplier: 1,
            final_nodes: 3,
            linear_layers: vec![1, 4],
            linear_nodes: [65, 340, 441, 220],
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data: DataConfig,
    pub run: RunConfig,
    pub optim: OptimConfig,
    pub grid: GridConfig,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    pub fn validate(&self) -> Result<()> {
        let run = &self.run;

        for (name, v) in [
            ("train_split", run.train_split),
            ("validation_split", run.validation_split),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(Error::Config(format!("{name} must be in [0, 1]; got {v}")));
            }
        }
        if run.train_split + run.validation_split > 1. {
            return Err(Error::Config(format!(
                "train_split + validation_split must not exceed 1; got {}",
                run.train_split + run.validation_split
            )));
        }
        if !(run.dataset_perc > 0. && run.dataset_perc <= 1.) {
            return Err(Error::Config(format!(
                "dataset_perc must be in (0, 1]; got {}",
                run.dataset_perc
            )));
        }
        if run.epochs == 0 || run.patience == 0 {
            return Err(Error::Config(
                "epochs and patience must both be at least 1".to_owned(),
            ));
        }
        if !(self.grid.topk_ratio > 0. && self.grid.topk_ratio <= 1.) {
            return Err(Error::Config(format!(
                "topk_ratio must be in (0, 1]; got {}",
                self.grid.topk_ratio
            )));
        }

        Ok(())
    }
}

/// The flat record of experiment settings saved with every result. `epochs_run` is filled in
/// per candidate by the training loop.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunParameters {
    pub sin_cos: bool,
    pub graph_type: String,
    pub out_channels: usize,
    pub convolution: Convolution,
    pub convolutions: usize,
    pub learning_rate: f64,
    pub epochs: usize,
    pub patience: usize,
    pub normalize_target: bool,
    pub dataset_perc: f32,
    pub shuffle: bool,
    pub train_split: f32,
    pub validation_split: f32,
    pub unseen_region: Option<Region>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epochs_run: Option<usize>,
}

impl RunParameters {
    pub fn new(cfg: &Config) -> Self {
        Self {
            sin_cos: cfg.run.sin_cos,
            graph_type: cfg.run.graph_type.clone(),
            out_channels: cfg.run.out_channels,
            convolution: cfg.run.convolution,
            convolutions: cfg.run.convolutions,
            learning_rate: cfg.optim.learning_rate,
            epochs: cfg.run.epochs,
            patience: cfg.run.patience,
            normalize_target: cfg.data.normalize_target,
            dataset_perc: cfg.run.dataset_perc,
            shuffle: cfg.run.shuffle,
            train_split: cfg.run.train_split,
            validation_split: cfg.run.validation_split,
            unseen_region: cfg.data.unseen_region,
            epochs_run: None,
        }
    }
}
