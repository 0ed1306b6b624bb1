//! Dense baseline: ignores graph structure, and regresses on the flattened node features.

use burn::{
    config::Config,
    module::Module,
    nn::{Linear, LinearConfig},
    tensor::{Tensor, activation, backend::Backend},
};

use super::Regressor;
use crate::dataset::GraphTensors;

#[derive(Config, Debug)]
pub struct LinearNetConfig {
    /// `num_nodes * num_feats` of the sample used for sizing. Other graphs are zero-padded or
    /// truncated to this.
    pub input_size: usize,
    /// Hidden layer widths, in order.
    pub hidden: Vec<usize>,
}

impl LinearNetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> LinearNet<B> {
        let mut layers = Vec::with_capacity(self.hidden.len());
        let mut d_in = self.input_size;
        for &d_out in &self.hidden {
            layers.push(LinearConfig::new(d_in, d_out).init(device));
            d_in = d_out;
        }

        LinearNet {
            layers,
            head: LinearConfig::new(d_in, 1).init(device),
            input_size: self.input_size,
        }
    }
}

#[derive(Module, Debug)]
pub struct LinearNet<B: Backend> {
    layers: Vec<Linear<B>>,
    head: Linear<B>,
    #[module(skip)]
    input_size: usize,
}

impl<B: Backend> LinearNet<B> {
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let [n, f] = x.dims();
        let mut flat = x.reshape([1, n * f]);

        if n * f > self.input_size {
            flat = flat.slice([0..1, 0..self.input_size]);
        } else if n * f < self.input_size {
            let device = flat.device();
            flat = Tensor::cat(
                vec![flat, Tensor::zeros([1, self.input_size - n * f], &device)],
                1,
            );
        }

        let mut h = flat;
        for layer in &self.layers {
            h = activation::relu(layer.forward(h));
        }

        self.head.forward(h)
    }
}

impl<B: Backend> Regressor<B> for LinearNet<B> {
    fn predict(&self, sample: &GraphTensors<B>) -> Tensor<B, 2> {
        self.forward(sample.x.clone())
    }
}
