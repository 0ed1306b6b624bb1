//! The candidate architectures, and the fixed grid we enumerate them from.

mod layers;
pub mod linear_net;
pub mod pooling_net;

use std::fmt;

use burn::tensor::{Tensor, backend::Backend};
use serde::{Deserialize, Serialize};

pub use linear_net::{LinearNet, LinearNetConfig};
pub use pooling_net::{PoolingNet, PoolingNetConfig};

use crate::{
    config::{Architecture, GridConfig, RunConfig},
    dataset::GraphTensors,
    error::{Error, Result},
};

/// A network that maps one graph to one scalar.
pub trait Regressor<B: Backend> {
    /// `[1, 1]`
    fn predict(&self, sample: &GraphTensors<B>) -> Tensor<B, 2>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Convolution {
    GraphConv,
    #[serde(rename = "GATConv")]
    Gat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolingType {
    EdgePooling,
    #[serde(rename = "TopKPooling")]
    TopK,
    #[serde(rename = "SAGPooling")]
    Sag,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinalPooling {
    #[serde(rename = "max_pool_x")]
    MaxPool,
    #[serde(rename = "avg_pool_x")]
    AvgPool,
    #[serde(rename = "sort_pooling")]
    SortPool,
    #[serde(rename = "topk")]
    TopK,
}

impl FinalPooling {
    pub fn name(self) -> &'static str {
        match self {
            Self::MaxPool => "max_pool_x",
            Self::AvgPool => "avg_pool_x",
            Self::SortPool => "sort_pooling",
            Self::TopK => "topk",
        }
    }
}

impl fmt::Display for FinalPooling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoolingHyperparameters {
    pub channels_optuna: usize,
    pub dense_output: bool,
    pub final_pooling: FinalPooling,
    pub topk_ratio: f32,
    pub pooling_layers: usize,
    pub pooling_type: PoolingType,
    pub final_nodes: usize,
    pub optuna_multiplier: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinearHyperparameters {
    pub nodes1: usize,
    pub nodes2: usize,
    pub nodes3: usize,
    pub nodes4: usize,
    pub layers: usize,
}

/// Saved as a flat object; the two families have disjoint keys.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Hyperparameters {
    Pooling(PoolingHyperparameters),
    Linear(LinearHyperparameters),
}

impl Hyperparameters {
    /// Distinguishes candidates of one run in their log directory names.
    pub fn suffix(&self) -> String {
        match self {
            Self::Pooling(hp) => format!("{}&{}", hp.pooling_layers, hp.final_pooling),
            Self::Linear(hp) => hp.layers.to_string(),
        }
    }
}

/// Everything needed to rebuild a network, e.g. when reloading a checkpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum NetConfig {
    Pooling(PoolingNetConfig),
    Linear(LinearNetConfig),
}

#[derive(Clone, Debug)]
pub struct Candidate {
    pub hyperparameters: Hyperparameters,
    pub net: NetConfig,
}

/// Sizes of the sample the first layer is built for.
#[derive(Clone, Copy, Debug)]
pub struct InputShape {
    pub num_nodes: usize,
    pub num_feats: usize,
}

impl<B: Backend> From<&GraphTensors<B>> for InputShape {
    fn from(sample: &GraphTensors<B>) -> Self {
        Self {
            num_nodes: sample.num_nodes,
            num_feats: sample.num_feats,
        }
    }
}

/// Every pooling-network variant of the grid: each pooling block count, with each final pooling.
pub fn define_pooling_models(
    shape: InputShape,
    grid: &GridConfig,
    run: &RunConfig,
) -> Vec<Candidate> {
    let hidden = run.out_channels * 4 * grid.channels_optuna * grid.optuna_multiplier;

    let mut result = Vec::new();
    for &pooling_layers in &grid.pooling_layers {
        for &final_pooling in &grid.final_pooling {
            let hyperparameters = Hyperparameters::Pooling(PoolingHyperparameters {
                channels_optuna: grid.channels_optuna,
                dense_output: grid.dense_output,
                final_pooling,
                topk_ratio: grid.topk_ratio,
                pooling_layers,
                pooling_type: grid.pooling_type,
                final_nodes: grid.final_nodes,
                optuna_multiplier: grid.optuna_multiplier,
            });

            let net = NetConfig::Pooling(PoolingNetConfig::new(
                shape.num_feats,
                hidden,
                pooling_layers,
                grid.pooling_type,
                grid.topk_ratio,
                run.convolution,
                run.convolutions,
                final_pooling,
                grid.final_nodes,
                grid.dense_output,
            ));

            result.push(Candidate {
                hyperparameters,
                net,
            });
        }
    }

    result
}

/// One dense network per configured depth. Hidden widths are the first `layers` of
/// `linear_nodes`.
pub fn define_linear_models(shape: InputShape, grid: &GridConfig) -> Result<Vec<Candidate>> {
    let [nodes1, nodes2, nodes3, nodes4] = grid.linear_nodes;

    let mut result = Vec::new();
    for &layers in &grid.linear_layers {
        if !(1..=4).contains(&layers) {
            return Err(Error::Config(format!(
                "Linear networks have 1 to 4 hidden layers; got {layers}"
            )));
        }

        let hyperparameters = Hyperparameters::Linear(LinearHyperparameters {
            nodes1,
            nodes2,
            nodes3,
            nodes4,
            layers,
        });

        let net = NetConfig::Linear(LinearNetConfig::new(
            shape.num_nodes * shape.num_feats,
            grid.linear_nodes[..layers].to_vec(),
        ));

        result.push(Candidate {
            hyperparameters,
            net,
        });
    }

    Ok(result)
}

pub fn define_models(
    architecture: Architecture,
    shape: InputShape,
    grid: &GridConfig,
    run: &RunConfig,
) -> Result<Vec<Candidate>> {
    match architecture {
        Architecture::Pooling => Ok(define_pooling_models(shape, grid, run)),
        Architecture::Linear => define_linear_models(shape, grid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHAPE: InputShape = InputShape {
        num_nodes: 9,
        num_feats: 8,
    };

    #[test]
    fn pooling_grid() {
        let cands = define_pooling_models(SHAPE, &GridConfig::default(), &RunConfig::default());
        assert_eq!(cands.len(), 4);

        let suffixes: Vec<_> = cands.iter().map(|c| c.hyperparameters.suffix()).collect();
        assert_eq!(
            suffixes,
            vec!["1&max_pool_x", "1&avg_pool_x", "1&sort_pooling", "1&topk"]
        );

        match &cands[0].net {
            NetConfig::Pooling(cfg) => {
                assert_eq!(cfg.hidden, 16);
                assert_eq!(cfg.num_feats, 8);
                assert_eq!(cfg.pooling_type, PoolingType::EdgePooling);
            }
            NetConfig::Linear(_) => panic!("Expected a pooling network"),
        }
    }

    #[test]
    fn linear_grid() {
        let cands = define_linear_models(SHAPE, &GridConfig::default()).unwrap();
        assert_eq!(cands.len(), 2);

        match &cands[1].net {
            NetConfig::Linear(cfg) => {
                assert_eq!(cfg.input_size, 72);
                assert_eq!(cfg.hidden, vec![65, 340, 441, 220]);
            }
            NetConfig::Pooling(_) => panic!("Expected a linear network"),
        }
    }

    #[test]
    fn linear_depth_out_of_range() {
        let grid = GridConfig {
            linear_layers: vec![5],
            ..GridConfig::default()
        };
        assert!(matches!(
            define_linear_models(SHAPE, &grid),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn hyperparameters_are_flat_dicts() {
        let cands = define_pooling_models(SHAPE, &GridConfig::default(), &RunConfig::default());
        let v = serde_json::to_value(&cands[2].hyperparameters).unwrap();

        assert_eq!(v["final_pooling"], "sort_pooling");
        assert_eq!(v["pooling_type"], "EdgePooling");
        assert_eq!(v["topk_ratio"], 0.5);
        assert_eq!(v.as_object().unwrap().len(), 8);

        let back: Hyperparameters = serde_json::from_value(v).unwrap();
        assert_eq!(back, cands[2].hyperparameters);
    }
}
