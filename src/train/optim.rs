//! SGD with weight decay, and momentum that cools from its initial value to 0 over a fixed
//! number of steps.

use burn::{
    module::AutodiffModule,
    optim::{LearningRate, SimpleOptimizer, adaptor::OptimizerAdaptor},
    record::Record,
    tensor::{
        Tensor,
        backend::{AutodiffBackend, Backend},
    },
};

use crate::config::OptimConfig;

#[derive(Clone, Debug)]
pub struct CoolMomentum {
    momentum: f64,
    weight_decay: f64,
    /// Per-step cooling factor, < 1.
    beta: f64,
}

#[derive(Record, Clone)]
pub struct CoolMomentumState<B: Backend, const D: usize> {
    pub velocity: Tensor<B, D>,
    /// Steps taken on this parameter.
    pub time: usize,
}

impl CoolMomentum {
    pub fn new(cfg: &OptimConfig, epochs: usize) -> Self {
        Self {
            momentum: cfg.momentum,
            weight_decay: cfg.weight_decay,
            beta: cfg.cooling_beta(epochs),
        }
    }

    /// Momentum for step `t`, counting from 0.
    pub fn momentum_at(&self, t: usize) -> f64 {
        let rho = 1. - (1. - self.momentum) / self.beta.powf(t as f64);
        rho.max(0.)
    }

    pub fn init<B: AutodiffBackend, M: AutodiffModule<B>>(
        self,
    ) -> OptimizerAdaptor<Self, M, B> {
        OptimizerAdaptor::from(self)
    }
}

impl<B: Backend> SimpleOptimizer<B> for CoolMomentum {
    type State<const D: usize> = CoolMomentumState<B, D>;

    fn step<const D: usize>(
        &self,
        lr: LearningRate,
        tensor: Tensor<B, D>,
        grad: Tensor<B, D>,
        state: Option<Self::State<D>>,
    ) -> (Tensor<B, D>, Option<Self::State<D>>) {
        let grad = if self.weight_decay > 0. {
            grad + tensor.clone() * self.weight_decay
        } else {
            grad
        };

        let (velocity, time) = match state {
            Some(s) => (s.velocity, s.time),
            None => (Tensor::zeros(grad.dims(), &grad.device()), 0),
        };

        let rho = self.momentum_at(time);
        let velocity = velocity * rho - grad * lr;

        let tensor = tensor + velocity.clone();

        (
            tensor,
            Some(CoolMomentumState {
                velocity,
                time: time + 1,
            }),
        )
    }

    fn to_device<const D: usize>(mut state: Self::State<D>, device: &B::Device) -> Self::State<D> {
        state.velocity = state.velocity.to_device(device);
        state
    }
}
