//! Loads per-sample dihedral graphs and target free energies, splits them, normalizes them, and
//! moves them to the device.

pub mod scale;
pub mod split;

use std::{fs, path::Path};

use burn::{
    prelude::Backend,
    tensor::{Tensor, TensorData, backend::AutodiffBackend},
};
use rand::Rng;
use tracing::{debug, info, warn};

pub use scale::StandardScaler;
pub use split::Split;

use crate::{
    config::{Config, DataConfig, RunConfig, StatsScope},
    error::{Error, Result},
    graph::{DihedralGraph, RichGraph, StructuralRecord},
};

/// One sample, on the device.
#[derive(Clone, Debug)]
pub struct GraphTensors<B: Backend> {
    /// `[num_nodes, num_feats]`
    pub x: Tensor<B, 2>,
    /// Dense adjacency, `[num_nodes, num_nodes]`.
    pub adj: Tensor<B, 2>,
    /// Target, normalized if target normalization is on. `[1, 1]`
    pub y: Tensor<B, 2>,
    pub num_nodes: usize,
    pub num_feats: usize,
}

impl<B: Backend> GraphTensors<B> {
    pub fn new(graph: &DihedralGraph, node_feats: Vec<f32>, y: f32, device: &B::Device) -> Self {
        let n = graph.num_nodes;
        let f = graph.num_feats;

        Self {
            x: Tensor::from_data(TensorData::new(node_feats, [n, f]), device),
            adj: Tensor::from_data(TensorData::new(graph.dense_adj(), [n, n]), device),
            y: Tensor::from_data(TensorData::new(vec![y], [1, 1]), device),
            num_nodes: n,
            num_feats: f,
        }
    }
}

impl<B: AutodiffBackend> GraphTensors<B> {
    /// The same sample on the non-autodiff backend, for validation and evaluation.
    pub fn inner(&self) -> GraphTensors<B::InnerBackend> {
        GraphTensors {
            x: self.x.clone().inner(),
            adj: self.adj.clone().inner(),
            y: self.y.clone().inner(),
            num_nodes: self.num_nodes,
            num_feats: self.num_feats,
        }
    }
}

pub struct Dataset<B: Backend> {
    /// Indexed by sample index.
    pub samples: Vec<GraphTensors<B>>,
    pub split: Split,
    pub scaler: StandardScaler,
}

impl<B: Backend> Dataset<B> {
    /// `train_split` overrides the one in the run config.
    pub fn load<R: Rng + ?Sized>(
        cfg: &Config,
        train_split: f32,
        device: &B::Device,
        rng: &mut R,
    ) -> Result<Self> {
        let data = &cfg.data;
        let n_samples = data.n_samples();

        let split = match data.unseen_region {
            Some(region) => {
                warn!(
                    "Training on {} minima only. Testing on {region} minima.",
                    region.complement()
                );
                let held_out = split::read_region(&data.data_dir, region)?;
                Split::held_out(n_samples, held_out, rng)?
            }
            None => Split::random(
                n_samples,
                cfg.run.dataset_perc,
                train_split,
                cfg.run.validation_split,
                cfg.run.shuffle_split,
                rng,
            ),
        };

        info!(
            "Split: {} train, {} validation, {} test",
            split.train.len(),
            split.validation.len(),
            split.test.len()
        );

        let graphs = load_graphs(data, &cfg.run, n_samples, rng)?;
        let targets = read_targets(&data.target_file, n_samples)?;

        let num_feats = graphs.first().map(|g| g.num_feats).unwrap_or_default();
        if let Some(g) = graphs.iter().find(|g| g.num_feats != num_feats) {
            return Err(Error::Data(format!(
                "Inconsistent node feature count: {} and {num_feats}",
                g.num_feats
            )));
        }

        let scaler = fit_scaler(data, &graphs, &targets, &split, num_feats);

        let samples = graphs
            .iter()
            .zip(&targets)
            .map(|(g, &y)| {
                let mut x = g.node_feats.clone();
                scaler.apply_in_place(&mut x);
                GraphTensors::new(g, x, scaler.normalize_target(y), device)
            })
            .collect();

        Ok(Self {
            samples,
            split,
            scaler,
        })
    }

    pub fn target_mean(&self) -> f32 {
        self.scaler.y_mean
    }

    pub fn target_std(&self) -> f32 {
        self.scaler.y_std
    }
}

/// Reads each sample's graph from its cache if present, otherwise builds it from the structural
/// record.
pub fn load_graphs<R: Rng + ?Sized>(
    data: &DataConfig,
    run: &RunConfig,
    n_samples: usize,
    rng: &mut R,
) -> Result<Vec<DihedralGraph>> {
    if data.overwrite_cache {
        info!("Rebuilding all graphs in {:?}", data.data_dir);
    } else {
        warn!(
            "Reusing cached graphs in {:?} where present. Set `overwrite_cache` to rebuild them.",
            data.data_dir
        );
    }

    let mut graphs = Vec::with_capacity(n_samples);
    let mut rebuilt = 0;

    for i in 0..n_samples {
        let cache_path = data.data_dir.join(format!("{i}-dihedrals-graph.bin"));

        let cached = if data.overwrite_cache {
            None
        } else {
            DihedralGraph::load_cache(&cache_path)?
        };

        let graph = match cached {
            Some(g) => g,
            None => {
                let record = StructuralRecord::load(&data.data_dir.join(format!("{i}.json")))?;
                let rich = RichGraph::new(&record)?;
                let g = DihedralGraph::central_overlap(&rich, run.shuffle, run.sin_cos, rng)?;

                if data.overwrite_cache || data.persist_missing {
                    g.save_cache(&cache_path)?;
                }
                rebuilt += 1;
                g
            }
        };

        graphs.push(graph);
    }

    debug!("Loaded {n_samples} graphs; {rebuilt} built from structural records");

    Ok(graphs)
}

/// One value per line. Blank lines are skipped; values past `n_samples` are ignored.
pub fn read_targets(path: &Path, n_samples: usize) -> Result<Vec<f32>> {
    let text = fs::read_to_string(path)?;

    let mut result = Vec::with_capacity(n_samples);
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if result.len() == n_samples {
            break;
        }

        let v = line.parse::<f32>().map_err(|e| {
            Error::Data(format!("Bad target on line {} of {path:?}: {e}", i + 1))
        })?;
        result.push(v);
    }

    if result.len() < n_samples {
        return Err(Error::Data(format!(
            "{path:?} has {} targets; expected {n_samples}",
            result.len()
        )));
    }

    Ok(result)
}

fn fit_scaler(
    data: &DataConfig,
    graphs: &[DihedralGraph],
    targets: &[f32],
    split: &Split,
    num_feats: usize,
) -> StandardScaler {
    let mut scaler = StandardScaler::identity(num_feats);

    if data.normalize_data {
        let (mean, std) = match data.feature_stats {
            StatsScope::All => scale::fit_features(graphs, num_feats),
            StatsScope::TrainOnly => {
                scale::fit_features(split.train.iter().map(|&i| &graphs[i]), num_feats)
            }
        };
        scaler.mean = mean;
        scaler.std = std;
    }

    if data.normalize_target {
        let (y_mean, y_std) = match data.target_stats {
            StatsScope::All => scale::fit_target(targets),
            StatsScope::TrainOnly => {
                let train: Vec<f32> = split.train.iter().map(|&i| targets[i]).collect();
                scale::fit_target(&train)
            }
        };
        scaler.y_mean = y_mean;
        scaler.y_std = y_std;
        info!("Target mean: {y_mean:.3}, std: {y_std:.3}");
    }

    scaler
}
