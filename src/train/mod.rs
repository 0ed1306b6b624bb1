//! The per-candidate training loop: one sample per step, L1 loss, validation after every epoch,
//! and early stopping.

pub mod early_stopping;
pub mod optim;

use burn::{
    module::{AutodiffModule, Module},
    optim::{GradientsParams, Optimizer},
    tensor::{
        ElementConversion, Tensor,
        backend::{AutodiffBackend, Backend},
    },
};
use indicatif::{ProgressBar, ProgressStyle};
use rand::{Rng, seq::SliceRandom};
use tracing::{debug, info, warn};

pub use early_stopping::EarlyStopping;
pub use optim::CoolMomentum;

use crate::{
    config::Config,
    dataset::{Dataset, GraphTensors},
    error::Result,
    model::Regressor,
};

#[derive(Debug)]
pub struct Trained<M> {
    pub model: M,
    pub epochs_run: usize,
    pub stopped_early: bool,
    /// Best validation MAE seen, in target units.
    pub best_validation: f32,
}

/// Mean absolute error, `[1]`.
pub fn l1_loss<B: Backend>(pred: Tensor<B, 2>, target: Tensor<B, 2>) -> Tensor<B, 1> {
    (pred - target).abs().mean()
}

/// Mean L1 loss over `indices`, without gradients. NaN if `indices` is empty.
pub fn mean_loss<B, M>(model: &M, samples: &[GraphTensors<B>], indices: &[usize]) -> f32
where
    B: Backend,
    M: Regressor<B>,
{
    let mut sum = 0.;
    for &i in indices {
        let sample = &samples[i];
        let loss = l1_loss(model.predict(sample), sample.y.clone());
        sum += loss.into_scalar().elem::<f32>();
    }

    sum / indices.len() as f32
}

/// Trains `model` on the dataset's training split. Returns once the epoch budget is spent, or
/// validation stops improving.
pub fn train<B, M, R>(
    model: M,
    dataset: &Dataset<B>,
    cfg: &Config,
    rng: &mut R,
) -> Result<Trained<M>>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + Regressor<B>,
    M::InnerModule: Regressor<B::InnerBackend>,
    R: Rng + ?Sized,
{
    let epochs = cfg.run.epochs;
    let lr = cfg.optim.learning_rate;
    // Losses are reported in target units.
    let scale = if cfg.data.normalize_target {
        dataset.target_std()
    } else {
        1.
    };

    let samples = &dataset.samples;
    let valid_samples: Vec<_> = samples.iter().map(GraphTensors::inner).collect();

    let mut train_ind = dataset.split.train.clone();
    let validation_ind = &dataset.split.validation;

    if validation_ind.is_empty() {
        warn!(
            "The validation set is empty; early stopping will halt after {} epochs",
            cfg.run.patience
        );
    }

    info!(
        "Training for up to {epochs} epochs on {} samples. Model parameter count: {}",
        train_ind.len(),
        model.num_params()
    );

    let optim = CoolMomentum::new(&cfg.optim, epochs);
    debug!("Momentum cooling factor: {}", cfg.optim.cooling_beta(epochs));
    let mut optim = optim.init::<B, M>();

    let mut model = model;
    let mut stopping = EarlyStopping::new(cfg.run.patience);
    let mut epochs_run = epochs;
    let mut stopped_early = false;

    let style = ProgressStyle::default_bar()
        .template("{msg} {bar:40.cyan/blue} {pos}/{len} ({eta})")?;

    for epoch in 0..epochs {
        train_ind.shuffle(rng);

        let pb = ProgressBar::new(train_ind.len() as u64);
        pb.set_style(style.clone());
        pb.set_message(format!("Epoch {}", epoch + 1));

        let mut train_loss_sum = 0.;
        for &j in &train_ind {
            let sample = &samples[j];

            let loss = l1_loss(model.predict(sample), sample.y.clone());
            train_loss_sum += loss.clone().into_scalar().elem::<f32>();

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optim.step(lr, model, grads);

            pb.inc(1);
        }
        pb.finish_and_clear();

        let train_loss = train_loss_sum / train_ind.len() as f32 * scale;

        let valid_model = model.valid();
        let val_loss = mean_loss(&valid_model, &valid_samples, validation_ind) * scale;

        info!(
            "Epoch {} - Validation MAE: {:.2} - Train MAE: {:.2}",
            epoch + 1,
            val_loss,
            train_loss
        );

        if stopping.check(val_loss) {
            epochs_run = epoch + 1;
            stopped_early = true;
            info!(
                "Training finished because of early stopping. Best loss on validation: {:.2}",
                stopping.best_score
            );
            break;
        }
    }

    Ok(Trained {
        model,
        epochs_run,
        stopped_early,
        best_validation: stopping.best_score,
    })
}
