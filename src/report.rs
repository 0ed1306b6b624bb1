//! Test-set evaluation, and the artifacts saved for each trained candidate: `result.json`,
//! `parameters.mpk` (weights), and `config.json` (what's needed to rebuild the network).

use std::{
    fs,
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
};

use burn::{
    module::Module,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::{ElementConversion, Tensor, backend::Backend},
};
use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    config::RunParameters,
    dataset::GraphTensors,
    error::{Error, Result},
    model::{Hyperparameters, LinearNet, NetConfig, PoolingNet, Regressor},
};

const RESULT_FILE: &str = "result.json";
const CONFIG_FILE: &str = "config.json";
/// The recorder adds the `.mpk` extension.
const PARAMS_FILE: &str = "parameters";

#[derive(Clone, Debug)]
pub struct Evaluation {
    /// Normalized space, in test-index order.
    pub predicted: Vec<f32>,
    pub target: Vec<f32>,
    /// In target units.
    pub mae: f32,
}

/// Runs the model on every test sample. `scale` converts normalized errors to target units; 1
/// if targets aren't normalized.
pub fn evaluate<B, M>(
    model: &M,
    samples: &[GraphTensors<B>],
    test_ind: &[usize],
    scale: f32,
) -> Result<Evaluation>
where
    B: Backend,
    M: Regressor<B>,
{
    if test_ind.is_empty() {
        return Err(Error::Data("The test set is empty".to_owned()));
    }

    let mut predicted = Vec::with_capacity(test_ind.len());
    let mut target = Vec::with_capacity(test_ind.len());
    let mut abs_err_sum = 0.;

    for &j in test_ind {
        let sample = samples.get(j).ok_or_else(|| {
            Error::Data(format!("Test index {j} is out of range of {} samples", samples.len()))
        })?;

        let pred = model.predict(sample).into_scalar().elem::<f32>();
        let y = sample.y.clone().into_scalar().elem::<f32>();

        abs_err_sum += (pred - y).abs();
        predicted.push(pred);
        target.push(y);
    }

    let mae = abs_err_sum / test_ind.len() as f32 * scale;

    Ok(Evaluation {
        predicted,
        target,
        mae,
    })
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResultManifest {
    pub hyperparameters: Hyperparameters,
    pub run_parameters: RunParameters,
    pub predicted: Vec<f32>,
    pub target: Vec<f32>,
    pub target_std: f32,
    pub target_mean: f32,
    pub test_frames: Vec<usize>,
    pub train_frames: Vec<usize>,
}

impl ResultManifest {
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(RESULT_FILE);
        let text = fs::read_to_string(&path)?;
        serde_json::from_str(&text).map_err(|e| Error::json(&path, e))
    }
}

/// E.g. `logs/medium-0312-1547-mae:0.87-1&max_pool_x`
pub fn result_dir(log_dir: &Path, dataset_type: &str, mae: f32, suffix: &str) -> PathBuf {
    let stamp = Local::now().format("%m%d-%H%M");
    log_dir.join(format!("{dataset_type}-{stamp}-mae:{mae:.2}-{suffix}"))
}

/// Creates the result directory, which must not already exist, and writes every artifact to it.
pub fn save<B, M>(
    dir: &Path,
    manifest: &ResultManifest,
    net: &NetConfig,
    model: M,
) -> Result<()>
where
    B: Backend,
    M: Module<B>,
{
    if let Some(parent) = dir.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::create_dir(dir)?;

    let file = File::create(dir.join(RESULT_FILE))?;
    serde_json::to_writer(BufWriter::new(file), manifest)?;

    let file = File::create(dir.join(CONFIG_FILE))?;
    serde_json::to_writer_pretty(BufWriter::new(file), net)?;

    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    model.save_file(dir.join(PARAMS_FILE), &recorder)?;

    info!("Saved results, config and parameters to {dir:?}");

    Ok(())
}

/// A network restored from a result directory.
#[derive(Debug)]
pub enum LoadedNet<B: Backend> {
    Pooling(PoolingNet<B>),
    Linear(LinearNet<B>),
}

impl<B: Backend> Regressor<B> for LoadedNet<B> {
    fn predict(&self, sample: &GraphTensors<B>) -> Tensor<B, 2> {
        match self {
            Self::Pooling(net) => net.predict(sample),
            Self::Linear(net) => net.predict(sample),
        }
    }
}

pub fn load_checkpoint<B: Backend>(dir: &Path, device: &B::Device) -> Result<LoadedNet<B>> {
    let path = dir.join(CONFIG_FILE);
    let text = fs::read_to_string(&path)?;
    let net: NetConfig = serde_json::from_str(&text).map_err(|e| Error::json(&path, e))?;

    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    let params = dir.join(PARAMS_FILE);

    Ok(match net {
        NetConfig::Pooling(cfg) => {
            LoadedNet::Pooling(cfg.init::<B>(device).load_file(params, &recorder, device)?)
        }
        NetConfig::Linear(cfg) => {
            LoadedNet::Linear(cfg.init::<B>(device).load_file(params, &recorder, device)?)
        }
    })
}
