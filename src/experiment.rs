//! One full run: load the dataset once, then train, evaluate, and save every candidate.

use std::path::PathBuf;

use burn::{module::AutodiffModule, tensor::backend::AutodiffBackend};
use rand::{Rng, SeedableRng, rngs::StdRng};
use tracing::info;

use crate::{
    config::{Config, RunParameters},
    dataset::{Dataset, GraphTensors},
    error::{Error, Result},
    model::{self, Candidate, InputShape, NetConfig, Regressor},
    report::{self, ResultManifest},
    train,
};

/// Returns the result directory of each candidate, in grid order. `train_split` is the training
/// fraction handed to the loader, and recorded with each result.
pub fn run<B: AutodiffBackend>(
    cfg: &Config,
    train_split: f32,
    device: &B::Device,
) -> Result<Vec<PathBuf>> {
    let mut seed = cfg.run.seed;
    let mut rng = StdRng::seed_from_u64(seed);
    B::seed(device, seed);

    let dataset = Dataset::<B>::load(cfg, train_split, device, &mut rng)?;

    let first = dataset
        .samples
        .first()
        .ok_or_else(|| Error::Data("The dataset has no samples".to_owned()))?;
    let candidates = model::define_models(
        cfg.run.architecture,
        InputShape::from(first),
        &cfg.grid,
        &cfg.run,
    )?;

    let run_params = RunParameters {
        train_split,
        ..RunParameters::new(cfg)
    };

    let mut result = Vec::with_capacity(candidates.len());
    for candidate in &candidates {
        seed += 1;
        B::seed(device, seed);

        info!(
            "Candidate {}: {}",
            candidate.hyperparameters.suffix(),
            serde_json::to_string(&candidate.hyperparameters)?
        );

        let dir = match &candidate.net {
            NetConfig::Pooling(c) => run_candidate(
                c.init::<B>(device),
                candidate,
                &dataset,
                cfg,
                run_params.clone(),
                &mut rng,
            )?,
            NetConfig::Linear(c) => run_candidate(
                c.init::<B>(device),
                candidate,
                &dataset,
                cfg,
                run_params.clone(),
                &mut rng,
            )?,
        };
        result.push(dir);
    }

    Ok(result)
}

fn run_candidate<B, M, R>(
    model: M,
    candidate: &Candidate,
    dataset: &Dataset<B>,
    cfg: &Config,
    mut run_params: RunParameters,
    rng: &mut R,
) -> Result<PathBuf>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + Regressor<B>,
    M::InnerModule: Regressor<B::InnerBackend>,
    R: Rng + ?Sized,
{
    let trained = train::train(model, dataset, cfg, rng)?;
    run_params.epochs_run = Some(trained.epochs_run);

    let scale = if cfg.data.normalize_target {
        dataset.target_std()
    } else {
        1.
    };

    let model = trained.model.valid();
    let samples: Vec<_> = dataset.samples.iter().map(GraphTensors::inner).collect();
    let eval = report::evaluate(&model, &samples, &dataset.split.test, scale)?;
    info!("Mean Absolute Error on test: {:.2}", eval.mae);

    let manifest = ResultManifest {
        hyperparameters: candidate.hyperparameters.clone(),
        run_parameters: run_params,
        predicted: eval.predicted,
        target: eval.target,
        target_std: dataset.target_std(),
        target_mean: dataset.target_mean(),
        test_frames: dataset.split.test.clone(),
        train_frames: dataset.split.train.clone(),
    };

    let dir = report::result_dir(
        &cfg.run.log_dir,
        &cfg.data.dataset_type,
        eval.mae,
        &candidate.hyperparameters.suffix(),
    );
    report::save::<B::InnerBackend, _>(&dir, &manifest, &candidate.net, model)?;

    Ok(dir)
}
