//! Graph network: blocks of convolution and pooling, more convolutions, a fixed-size readout,
//! and a dense head.

use burn::{
    config::Config,
    module::Module,
    nn::{Linear, LinearConfig},
    tensor::{Tensor, activation, backend::Backend},
};

use super::{
    Convolution, FinalPooling, PoolingType, Regressor,
    layers::{ConvLayer, PoolLayer, Readout},
};
use crate::dataset::GraphTensors;

#[derive(Config, Debug)]
pub struct PoolingNetConfig {
    pub num_feats: usize,
    /// Channel count of every convolution.
    pub hidden: usize,
    /// Convolution + pooling blocks.
    pub pooling_layers: usize,
    pub pooling_type: PoolingType,
    pub topk_ratio: f32,
    pub convolution: Convolution,
    /// Convolutions after the last pooling block.
    pub convolutions: usize,
    pub final_pooling: FinalPooling,
    pub final_nodes: usize,
    pub dense_output: bool,
}

impl PoolingNetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> PoolingNet<B> {
        let h = self.hidden;

        let mut blocks = Vec::with_capacity(self.pooling_layers);
        for i in 0..self.pooling_layers {
            let d_in = if i == 0 { self.num_feats } else { h };
            blocks.push(PoolBlock {
                conv: ConvLayer::new(self.convolution, d_in, h, device),
                pool: PoolLayer::new(self.pooling_type, h, self.topk_ratio, device),
            });
        }

        let n_convs = self.convolutions.max(1);
        let mut convs = Vec::with_capacity(n_convs);
        for i in 0..n_convs {
            let d_in = if i == 0 && self.pooling_layers == 0 {
                self.num_feats
            } else {
                h
            };
            convs.push(ConvLayer::new(self.convolution, d_in, h, device));
        }

        let readout_dim = h * self.final_nodes;
        let dense = self
            .dense_output
            .then(|| LinearConfig::new(readout_dim, readout_dim).init(device));

        PoolingNet {
            blocks,
            convs,
            readout: Readout::new(self.final_pooling, h, self.final_nodes, device),
            dense,
            head: LinearConfig::new(readout_dim, 1).init(device),
        }
    }
}

#[derive(Module, Debug)]
pub struct PoolBlock<B: Backend> {
    conv: ConvLayer<B>,
    pool: PoolLayer<B>,
}

#[derive(Module, Debug)]
pub struct PoolingNet<B: Backend> {
    blocks: Vec<PoolBlock<B>>,
    convs: Vec<ConvLayer<B>>,
    readout: Readout<B>,
    /// Present when `dense_output` is set.
    dense: Option<Linear<B>>,
    head: Linear<B>,
}

impl<B: Backend> PoolingNet<B> {
    pub fn forward(&self, x: Tensor<B, 2>, adj: Tensor<B, 2>) -> Tensor<B, 2> {
        let mut x = x;
        let mut adj = adj;

        for block in &self.blocks {
            x = activation::relu(block.conv.forward(x, &adj));
            (x, adj) = block.pool.forward(x, adj);
        }
        for conv in &self.convs {
            x = activation::relu(conv.forward(x, &adj));
        }

        let mut z = self.readout.forward(x);
        if let Some(dense) = &self.dense {
            z = activation::relu(dense.forward(z));
        }

        self.head.forward(z)
    }
}

impl<B: Backend> Regressor<B> for PoolingNet<B> {
    fn predict(&self, sample: &GraphTensors<B>) -> Tensor<B, 2> {
        self.forward(sample.x.clone(), sample.adj.clone())
    }
}

#[cfg(test)]
mod tests {
    use burn::{backend::NdArray, tensor::TensorData};

    use super::*;

    type B = NdArray;

    fn ring(n: usize, f: usize) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let device = Default::default();
        let mut adj = vec![0_f32; n * n];
        for i in 0..n {
            let j = (i + 1) % n;
            adj[i * n + j] = 1.;
            adj[j * n + i] = 1.;
        }
        let x: Vec<f32> = (0..n * f).map(|v| (v as f32 * 0.37).sin()).collect();
        (
            Tensor::from_data(TensorData::new(x, [n, f]), &device),
            Tensor::from_data(TensorData::new(adj, [n, n]), &device),
        )
    }

    #[test]
    fn every_variant_yields_one_value() {
        let device = Default::default();
        let (x, adj) = ring(9, 8);

        for pooling_type in [PoolingType::EdgePooling, PoolingType::TopK, PoolingType::Sag] {
            for final_pooling in [
                FinalPooling::MaxPool,
                FinalPooling::SortPool,
                FinalPooling::TopK,
            ] {
                for dense_output in [false, true] {
                    let net = PoolingNetConfig::new(
                        8,
                        16,
                        1,
                        pooling_type,
                        0.5,
                        Convolution::GraphConv,
                        3,
                        final_pooling,
                        3,
                        dense_output,
                    )
                    .init::<B>(&device);

                    assert_eq!(net.forward(x.clone(), adj.clone()).dims(), [1, 1]);
                }
            }
        }
    }

    #[test]
    fn gat_with_two_pooling_blocks() {
        let device = Default::default();
        let (x, adj) = ring(6, 8);

        let net = PoolingNetConfig::new(
            8,
            8,
            2,
            PoolingType::EdgePooling,
            0.5,
            Convolution::Gat,
            1,
            FinalPooling::AvgPool,
            3,
            false,
        )
        .init::<B>(&device);

        assert_eq!(net.forward(x, adj).dims(), [1, 1]);
    }
}
