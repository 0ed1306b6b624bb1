//! Partitioning of sample indices into train, validation, and test sets.

use std::{collections::HashSet, fs, path::Path};

use rand::{Rng, seq::SliceRandom};
use serde::{Deserialize, Serialize};

use crate::{
    config::Region,
    error::{Error, Result},
};

/// Disjoint index lists. Not necessarily exhaustive over the sample range.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Split {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
    pub test: Vec<usize>,
}

impl Split {
    /// Shuffles `0..n_samples` (if `shuffle`), keeps the first `dataset_perc` of them, then cuts
    /// train | validation | test in that order. Test takes whatever remains.
    pub fn random<R: Rng + ?Sized>(
        n_samples: usize,
        dataset_perc: f32,
        train_split: f32,
        validation_split: f32,
        shuffle: bool,
        rng: &mut R,
    ) -> Self {
        let mut indexes: Vec<usize> = (0..n_samples).collect();
        if shuffle {
            indexes.shuffle(rng);
        }
        indexes.truncate(frac_floor(dataset_perc, n_samples));

        let len = indexes.len();
        let split = frac_floor(train_split, len);
        let split2 = (split + frac_floor(validation_split, len)).min(len);

        Self {
            train: indexes[..split].to_vec(),
            validation: indexes[split..split2].to_vec(),
            test: indexes[split2..].to_vec(),
        }
    }

    /// Trains on every index outside `held_out`, in ascending order. The held-out indices are
    /// shuffled, and split in half: validation first, then test.
    pub fn held_out<R: Rng + ?Sized>(
        n_samples: usize,
        mut held_out: Vec<usize>,
        rng: &mut R,
    ) -> Result<Self> {
        let mut seen = HashSet::with_capacity(held_out.len());
        for &i in &held_out {
            if i >= n_samples {
                return Err(Error::Data(format!(
                    "Region index {i} is outside the {n_samples}-sample range"
                )));
            }
            if !seen.insert(i) {
                return Err(Error::Data(format!("Region index {i} is listed twice")));
            }
        }

        let train = (0..n_samples).filter(|i| !seen.contains(i)).collect();

        held_out.shuffle(rng);
        let split = frac_floor(0.5, held_out.len());
        let test = held_out.split_off(split);

        Ok(Self {
            train,
            validation: held_out,
            test,
        })
    }
}

/// Reads both region files from the data directory, and returns the membership of `region`.
pub fn read_region(data_dir: &Path, region: Region) -> Result<Vec<usize>> {
    let mut result = Vec::new();

    for r in [Region::Left, Region::Right] {
        let path = data_dir.join(r.file_name());
        let text = fs::read_to_string(&path)?;
        let indexes: Vec<usize> = serde_json::from_str(&text).map_err(|e| Error::json(&path, e))?;

        if r == region {
            result = indexes;
        }
    }

    Ok(result)
}

fn frac_floor(frac: f32, len: usize) -> usize {
    ((frac as f64 * len as f64).floor() as usize).min(len)
}
