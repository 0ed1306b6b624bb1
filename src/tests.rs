//! End-to-end scenarios over small synthetic datasets written to a scratch directory.

use std::{fs, path::Path};

use approx::assert_relative_eq;
use burn::{
    backend::{Autodiff, NdArray},
    tensor::{Tensor, TensorData, backend::Backend},
};
use rand::{SeedableRng, rngs::StdRng};

use crate::{
    config::{Architecture, Config, Region},
    dataset::{Dataset, GraphTensors},
    experiment,
    graph::{AtomRecord, StructuralRecord},
    model::{FinalPooling, Regressor},
    report::{self, ResultManifest},
};

type B = NdArray;
type TB = Autodiff<NdArray>;

/// A 6-atom backbone whose geometry varies with `i`.
fn record(i: usize) -> StructuralRecord {
    let elements = ["C", "N", "C", "C", "O", "C"];
    let atoms = elements
        .iter()
        .enumerate()
        .map(|(k, el)| {
            let t = k as f64;
            let wobble = 0.3 * ((i + 1) as f64 * (t + 0.5)).sin();
            AtomRecord {
                element: el.to_string(),
                position: [1.3 * t, if k % 2 == 0 { 0. } else { 0.9 }, wobble + 0.05 * t * t],
            }
        })
        .collect();
    let bonds = (0..elements.len() - 1).map(|k| [k, k + 1]).collect();

    StructuralRecord { atoms, bonds }
}

fn write_fixture(dir: &Path, targets: &[f32]) {
    for i in 0..targets.len() {
        let text = serde_json::to_string(&record(i)).unwrap();
        fs::write(dir.join(format!("{i}.json")), text).unwrap();
    }

    let lines: Vec<_> = targets.iter().map(|t| t.to_string()).collect();
    fs::write(dir.join("fe.dat"), lines.join("\n")).unwrap();
}

fn config(dir: &Path, n: usize) -> Config {
    let mut cfg = Config::default();
    cfg.data.dataset_type = "test".to_owned();
    cfg.data.data_dir = dir.to_owned();
    cfg.data.target_file = dir.join("fe.dat");
    cfg.data.n_samples = Some(n);
    cfg.run.shuffle_split = false;
    cfg.run.train_split = 0.5;
    cfg.run.validation_split = 0.25;
    cfg.run.log_dir = dir.join("logs");
    cfg
}

/// Always predicts the same value.
struct Constant(f32);

impl<Bk: Backend> Regressor<Bk> for Constant {
    fn predict(&self, sample: &GraphTensors<Bk>) -> Tensor<Bk, 2> {
        Tensor::from_data(TensorData::new(vec![self.0], [1, 1]), &sample.y.device())
    }
}

#[test]
fn constant_training_mean_scenario() {
    let dir = tempfile::tempdir().unwrap();
    write_fixture(dir.path(), &[1., 2., 3., 4.]);

    for normalize_target in [false, true] {
        let mut cfg = config(dir.path(), 4);
        cfg.data.normalize_target = normalize_target;

        let mut rng = StdRng::seed_from_u64(cfg.run.seed);
        let device = Default::default();
        let dataset = Dataset::<B>::load(&cfg, 0.5, &device, &mut rng).unwrap();

        assert_eq!(dataset.split.train, vec![0, 1]);
        assert_eq!(dataset.split.validation, vec![2]);
        assert_eq!(dataset.split.test, vec![3]);

        // The mean of the training targets, in the space the model predicts in.
        let train_mean = dataset.scaler.normalize_target(1.5);
        let scale = if normalize_target { dataset.target_std() } else { 1. };

        let eval = report::evaluate(
            &Constant(train_mean),
            &dataset.samples,
            &dataset.split.test,
            scale,
        )
        .unwrap();

        assert_relative_eq!(eval.mae, 2.5, epsilon = 1e-5);
    }
}

#[test]
fn cache_hit_loads_identical_graphs() {
    let dir = tempfile::tempdir().unwrap();
    write_fixture(dir.path(), &[1., 2., 3., 4.]);

    let mut cfg = config(dir.path(), 4);
    cfg.data.persist_missing = true;
    let device = Default::default();

    let first = Dataset::<B>::load(&cfg, 0.5, &device, &mut StdRng::seed_from_u64(1)).unwrap();
    for i in 0..4 {
        assert!(dir.path().join(format!("{i}-dihedrals-graph.bin")).exists());
        // Without its structural record, a sample can only come from the cache.
        fs::remove_file(dir.path().join(format!("{i}.json"))).unwrap();
    }

    let second = Dataset::<B>::load(&cfg, 0.5, &device, &mut StdRng::seed_from_u64(1)).unwrap();

    for (a, b) in first.samples.iter().zip(&second.samples) {
        assert_eq!(a.x.to_data(), b.x.to_data());
        assert_eq!(a.adj.to_data(), b.adj.to_data());
    }
}

#[test]
fn overwrite_cache_rebuilds_from_records() {
    let dir = tempfile::tempdir().unwrap();
    write_fixture(dir.path(), &[1., 2.]);
    // A stale cache that doesn't decode.
    fs::write(dir.path().join("0-dihedrals-graph.bin"), [0xff, 0xff]).unwrap();

    let mut cfg = config(dir.path(), 2);
    let device = Default::default();
    assert!(Dataset::<B>::load(&cfg, 0.5, &device, &mut StdRng::seed_from_u64(1)).is_err());

    cfg.data.overwrite_cache = true;
    assert!(Dataset::<B>::load(&cfg, 0.5, &device, &mut StdRng::seed_from_u64(1)).is_ok());
    assert!(dir.path().join("1-dihedrals-graph.bin").exists());
}

#[test]
fn held_out_left_region() {
    let dir = tempfile::tempdir().unwrap();
    write_fixture(dir.path(), &[0.5, 1., 1.5, 2., 2.5, 3., 3.5, 4.]);
    fs::write(dir.path().join("left.json"), "[1, 3, 4, 6]").unwrap();
    fs::write(dir.path().join("right.json"), "[0, 2, 5, 7]").unwrap();

    let mut cfg = config(dir.path(), 8);
    cfg.data.unseen_region = Some(Region::Left);

    let device = Default::default();
    let dataset = Dataset::<B>::load(&cfg, 0.1, &device, &mut StdRng::seed_from_u64(3)).unwrap();
    let left = [1, 3, 4, 6];

    assert_eq!(dataset.split.train, vec![0, 2, 5, 7]);
    assert!(dataset.split.train.iter().all(|i| !left.contains(i)));
    assert!(
        dataset
            .split
            .validation
            .iter()
            .chain(&dataset.split.test)
            .all(|i| left.contains(i))
    );
    assert_eq!(dataset.split.validation.len(), 2);
    assert_eq!(dataset.split.test.len(), 2);
}

#[test]
fn linear_run_writes_reloadable_results() {
    let dir = tempfile::tempdir().unwrap();
    let targets: Vec<f32> = (0..8).map(|i| 1. + 0.25 * i as f32).collect();
    write_fixture(dir.path(), &targets);

    let mut cfg = config(dir.path(), 8);
    cfg.run.epochs = 2;
    cfg.run.patience = 1;
    cfg.run.architecture = Architecture::Linear;
    cfg.grid.linear_nodes = [8, 6, 5, 4];

    let device = Default::default();
    let dirs = experiment::run::<TB>(&cfg, cfg.run.train_split, &device).unwrap();
    assert_eq!(dirs.len(), 2);

    for (out, layers) in dirs.iter().zip(["1", "4"]) {
        let name = out.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("test-"));
        assert!(name.ends_with(&format!("-{layers}")));

        let manifest = ResultManifest::load(out).unwrap();
        let epochs_run = manifest.run_parameters.epochs_run.unwrap();
        assert!((1..=2).contains(&epochs_run));
        assert_eq!(manifest.train_frames, vec![0, 1, 2, 3]);
        assert_eq!(manifest.test_frames, vec![6, 7]);
        assert_eq!(manifest.predicted.len(), 2);
        assert!(manifest.target_std > 0.);

        let mut rng = StdRng::seed_from_u64(0);
        let dataset = Dataset::<B>::load(&cfg, 0.5, &device, &mut rng).unwrap();
        let net = report::load_checkpoint::<B>(out, &device).unwrap();
        let eval = report::evaluate(&net, &dataset.samples, &manifest.test_frames, 1.).unwrap();

        for (a, b) in eval.predicted.iter().zip(&manifest.predicted) {
            assert_relative_eq!(a, b, epsilon = 1e-5);
        }
    }
}

#[test]
fn pooling_run_respects_the_epoch_budget() {
    let dir = tempfile::tempdir().unwrap();
    write_fixture(dir.path(), &[3., 1., 4., 1., 5., 9., 2., 6.]);

    let mut cfg = config(dir.path(), 8);
    cfg.run.epochs = 3;
    cfg.run.architecture = Architecture::Pooling;
    cfg.run.convolutions = 1;
    cfg.grid.final_pooling = vec![FinalPooling::SortPool];

    let device = Default::default();
    let dirs = experiment::run::<TB>(&cfg, cfg.run.train_split, &device).unwrap();
    assert_eq!(dirs.len(), 1);

    let manifest = ResultManifest::load(&dirs[0]).unwrap();
    assert!(manifest.run_parameters.epochs_run.unwrap() <= 3);
    assert!(dirs[0].join("parameters.mpk").exists());
    assert!(dirs[0].join("config.json").exists());

    let v: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dirs[0].join("result.json")).unwrap()).unwrap();
    assert_eq!(v["hyperparameters"]["final_pooling"], "sort_pooling");
    assert_eq!(v["run_parameters"]["graph_type"], "De Bruijn");
}

#[test]
fn results_record_the_train_split_used() {
    let dir = tempfile::tempdir().unwrap();
    let targets: Vec<f32> = (0..8).map(|i| 0.5 * i as f32).collect();
    write_fixture(dir.path(), &targets);

    let mut cfg = config(dir.path(), 8);
    cfg.run.epochs = 1;
    cfg.run.architecture = Architecture::Linear;
    cfg.grid.linear_layers = vec![1];
    cfg.grid.linear_nodes = [4, 4, 4, 4];

    let device = Default::default();
    let dirs = experiment::run::<TB>(&cfg, 0.25, &device).unwrap();
    assert_eq!(dirs.len(), 1);

    let manifest = ResultManifest::load(&dirs[0]).unwrap();
    assert_relative_eq!(manifest.run_parameters.train_split, 0.25);
    assert_eq!(manifest.train_frames, vec![0, 1]);
    assert_eq!(cfg.run.train_split, 0.5);
}
