//! Standardization of node features and targets.

use serde::{Deserialize, Serialize};

use crate::graph::DihedralGraph;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    /// Per node-feature column.
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
    pub y_mean: f32,
    pub y_std: f32,
}

impl StandardScaler {
    /// Leaves everything unchanged.
    pub fn identity(num_feats: usize) -> Self {
        Self {
            mean: vec![0.; num_feats],
            std: vec![1.; num_feats],
            y_mean: 0.,
            y_std: 1.,
        }
    }

    pub fn normalize_target(&self, y: f32) -> f32 {
        (y - self.y_mean) / safe_std(self.y_std)
    }

    pub fn denormalize_target(&self, y_norm: f32) -> f32 {
        y_norm * safe_std(self.y_std) + self.y_mean
    }

    /// Standardizes a row-major `[n, num_feats]` node feature block.
    pub fn apply_in_place(&self, x: &mut [f32]) {
        let f = self.mean.len();
        if f == 0 {
            return;
        }
        for row in x.chunks_mut(f) {
            for (i, v) in row.iter_mut().enumerate() {
                *v = (*v - self.mean[i]) / safe_std(self.std[i]);
            }
        }
    }
}

fn safe_std(s: f32) -> f32 {
    if s.abs() < 1e-9 { 1. } else { s }
}

/// Per-column (mean, population std) over every node of every graph given.
pub fn fit_features<'a>(
    graphs: impl IntoIterator<Item = &'a DihedralGraph>,
    num_feats: usize,
) -> (Vec<f32>, Vec<f32>) {
    let mut sum = vec![0.0_f64; num_feats];
    let mut sum_sq = vec![0.0_f64; num_feats];
    let mut n = 0_usize;

    for g in graphs {
        for i in 0..g.num_nodes {
            for (j, &v) in g.node(i).iter().enumerate().take(num_feats) {
                sum[j] += v as f64;
                sum_sq[j] += (v as f64).powi(2);
            }
            n += 1;
        }
    }

    let n = n.max(1) as f64;
    let mean: Vec<f64> = sum.iter().map(|s| s / n).collect();
    let std = sum_sq
        .iter()
        .zip(&mean)
        .map(|(sq, m)| ((sq / n - m * m).max(0.)).sqrt() as f32)
        .collect();

    (mean.into_iter().map(|m| m as f32).collect(), std)
}

/// Mean, and unbiased (n - 1) standard deviation.
pub fn fit_target(y: &[f32]) -> (f32, f32) {
    let n = y.len();
    if n == 0 {
        return (0., 1.);
    }

    let mean = y.iter().map(|&v| v as f64).sum::<f64>() / n as f64;
    if n == 1 {
        return (mean as f32, 1.);
    }

    let var = y.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / (n - 1) as f64;

    (mean as f32, var.sqrt() as f32)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn unbiased_target_std() {
        let (mean, std) = fit_target(&[1., 2., 3., 4.]);
        assert_relative_eq!(mean, 2.5);
        // sqrt(5 / 3)
        assert_relative_eq!(std, 1.290_994_4, epsilon = 1e-6);
    }

    #[test]
    fn target_round_trip() {
        let y = [-3.2, 0., 0.7, 12.5, 4.4];
        let (y_mean, y_std) = fit_target(&y);
        let scaler = StandardScaler {
            y_mean,
            y_std,
            ..StandardScaler::identity(0)
        };

        for v in y {
            let back = scaler.denormalize_target(scaler.normalize_target(v));
            assert_relative_eq!(back, v, epsilon = 1e-5);
        }
    }

    #[test]
    fn constant_column_left_unscaled() {
        let g = DihedralGraph {
            node_feats: vec![1., 5., 3., 5.],
            num_nodes: 2,
            num_feats: 2,
            edges: vec![(0, 1), (1, 0)],
        };
        let (mean, std) = fit_features([&g], 2);
        assert_eq!(mean, vec![2., 5.]);
        assert_eq!(std, vec![1., 0.]);

        let scaler = StandardScaler {
            mean,
            std,
            ..StandardScaler::identity(2)
        };
        let mut x = g.node_feats.clone();
        scaler.apply_in_place(&mut x);
        assert_eq!(x, vec![-1., 0., 1., 0.]);
    }
}
