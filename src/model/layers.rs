//! Graph convolution and pooling layers, over a single graph held as a node feature matrix
//! `[N, C]` and a dense, symmetric adjacency matrix `[N, N]`.

use burn::{
    module::{Ignored, Module, Param},
    nn::{Linear, LinearConfig},
    prelude::Int,
    tensor::{Tensor, TensorData, activation, backend::Backend},
};

use super::{Convolution, FinalPooling, PoolingType};

/// Stand-in for -∞ in masked attention logits.
const MASKED: f32 = -1e9;

/// Host copy of a float tensor's values, in row-major order.
pub(crate) fn host_values<B: Backend, const D: usize>(t: &Tensor<B, D>) -> Vec<f32> {
    t.to_data().iter::<f32>().collect()
}

pub(crate) fn index_tensor<B: Backend>(idx: &[usize], device: &B::Device) -> Tensor<B, 1, Int> {
    let data: Vec<i32> = idx.iter().map(|&i| i as i32).collect();
    Tensor::from_data(TensorData::new(data, [idx.len()]), device)
}

fn identity<B: Backend>(n: usize, device: &B::Device) -> Tensor<B, 2> {
    let mut data = vec![0_f32; n * n];
    for i in 0..n {
        data[i * n + i] = 1.;
    }
    Tensor::from_data(TensorData::new(data, [n, n]), device)
}

/// Indices of the `k` largest values, largest first. Ties keep the lower index first.
fn top_k(values: &[f32], k: usize) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..values.len()).collect();
    idx.sort_by(|&a, &b| values[b].total_cmp(&values[a]));
    idx.truncate(k);
    idx
}

/// `x' = W_root x + W_rel Σ_{j ∈ N(i)} x_j`
#[derive(Module, Debug)]
pub struct GraphConv<B: Backend> {
    lin_rel: Linear<B>,
    lin_root: Linear<B>,
}

impl<B: Backend> GraphConv<B> {
    pub fn new(d_in: usize, d_out: usize, device: &B::Device) -> Self {
        Self {
            lin_rel: LinearConfig::new(d_in, d_out).init(device),
            lin_root: LinearConfig::new(d_in, d_out).with_bias(false).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 2>, adj: &Tensor<B, 2>) -> Tensor<B, 2> {
        let agg = adj.clone().matmul(x.clone());
        self.lin_rel.forward(agg) + self.lin_root.forward(x)
    }
}

/// Single-head graph attention. Each node attends over its neighbours and itself.
#[derive(Module, Debug)]
pub struct GatConv<B: Backend> {
    lin: Linear<B>,
    att_src: Linear<B>,
    att_dst: Linear<B>,
    bias: Param<Tensor<B, 1>>,
}

impl<B: Backend> GatConv<B> {
    pub fn new(d_in: usize, d_out: usize, device: &B::Device) -> Self {
        Self {
            lin: LinearConfig::new(d_in, d_out).with_bias(false).init(device),
            att_src: LinearConfig::new(d_out, 1).with_bias(false).init(device),
            att_dst: LinearConfig::new(d_out, 1).with_bias(false).init(device),
            bias: Param::from_tensor(Tensor::zeros([d_out], device)),
        }
    }

    pub fn forward(&self, x: Tensor<B, 2>, adj: &Tensor<B, 2>) -> Tensor<B, 2> {
        let n = x.dims()[0];
        let device = x.device();

        let h = self.lin.forward(x);

        // logits[i, j] = a_dst·h_i + a_src·h_j
        let dst = self.att_dst.forward(h.clone()); // [N, 1]
        let src = self.att_src.forward(h.clone()).transpose(); // [1, N]
        let logits = activation::leaky_relu(dst + src, 0.2);

        let not_linked = (adj.clone() + identity::<B>(n, &device)).equal_elem(0.);
        let att = activation::softmax(logits.mask_fill(not_linked, MASKED), 1);

        att.matmul(h) + self.bias.val().unsqueeze_dim::<2>(0)
    }
}

/// One convolution of the configured family.
#[derive(Module, Debug)]
pub enum ConvLayer<B: Backend> {
    Graph(GraphConv<B>),
    Gat(GatConv<B>),
}

impl<B: Backend> ConvLayer<B> {
    pub fn new(kind: Convolution, d_in: usize, d_out: usize, device: &B::Device) -> Self {
        match kind {
            Convolution::GraphConv => Self::Graph(GraphConv::new(d_in, d_out, device)),
            Convolution::Gat => Self::Gat(GatConv::new(d_in, d_out, device)),
        }
    }

    pub fn forward(&self, x: Tensor<B, 2>, adj: &Tensor<B, 2>) -> Tensor<B, 2> {
        match self {
            Self::Graph(conv) => conv.forward(x, adj),
            Self::Gat(conv) => conv.forward(x, adj),
        }
    }
}

/// Learned node or edge scores that drive a pooling step.
#[derive(Module, Debug)]
pub enum PoolScorer<B: Backend> {
    /// Projection vector for TopK scores.
    TopK(Linear<B>),
    /// One-channel convolution for SAG scores.
    Sag(GraphConv<B>),
    /// Edge scores from concatenated endpoint features.
    Edge(Linear<B>),
}

/// Coarsens a graph between convolution blocks.
#[derive(Module, Debug)]
pub struct PoolLayer<B: Backend> {
    scorer: PoolScorer<B>,
    #[module(skip)]
    ratio: f32,
}

impl<B: Backend> PoolLayer<B> {
    pub fn new(kind: PoolingType, channels: usize, ratio: f32, device: &B::Device) -> Self {
        let scorer = match kind {
            PoolingType::TopK => {
                PoolScorer::TopK(LinearConfig::new(channels, 1).with_bias(false).init(device))
            }
            PoolingType::Sag => PoolScorer::Sag(GraphConv::new(channels, 1, device)),
            PoolingType::EdgePooling => {
                PoolScorer::Edge(LinearConfig::new(2 * channels, 1).init(device))
            }
        };

        Self { scorer, ratio }
    }

    pub fn forward(&self, x: Tensor<B, 2>, adj: Tensor<B, 2>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let n = x.dims()[0];
        let k = ((self.ratio * n as f32).ceil() as usize).clamp(1, n.max(1));

        match &self.scorer {
            PoolScorer::TopK(p) => {
                let score = topk_score(p, x.clone());
                select_nodes(x, Some(adj), score, k)
            }
            PoolScorer::Sag(conv) => {
                let score = conv.forward(x.clone(), &adj).tanh();
                select_nodes(x, Some(adj), score, k)
            }
            PoolScorer::Edge(lin) => edge_pool(lin, x, adj),
        }
    }
}

/// `tanh(x·p / ‖p‖)`, `[N, 1]`.
fn topk_score<B: Backend>(p: &Linear<B>, x: Tensor<B, 2>) -> Tensor<B, 2> {
    let norm = p.weight.val().powf_scalar(2.).sum().sqrt().unsqueeze_dim::<2>(0); // [1, 1]
    (p.forward(x) / norm).tanh()
}

/// Keeps the `k` best-scoring nodes, gated by their score, along with their induced
/// sub-adjacency.
fn select_nodes<B: Backend>(
    x: Tensor<B, 2>,
    adj: Option<Tensor<B, 2>>,
    score: Tensor<B, 2>,
    k: usize,
) -> (Tensor<B, 2>, Tensor<B, 2>) {
    let device = x.device();

    let keep = top_k(&host_values(&score), k);
    let idx = index_tensor::<B>(&keep, &device);

    let x = x.select(0, idx.clone()) * score.select(0, idx.clone());
    let adj = match adj {
        Some(a) => a.select(0, idx.clone()).select(1, idx),
        None => Tensor::zeros([keep.len(), keep.len()], &device),
    };

    (x, adj)
}

/// Greedy edge contraction. Edges are visited by descending score
/// `sigmoid(w·[x_i ‖ x_j]) + 0.5`; an edge is contracted if neither endpoint has been merged
/// yet. A merged node's features are `(x_i + x_j) · score`. Unmerged nodes carry over
/// unchanged.
fn edge_pool<B: Backend>(
    lin: &Linear<B>,
    x: Tensor<B, 2>,
    adj: Tensor<B, 2>,
) -> (Tensor<B, 2>, Tensor<B, 2>) {
    let n = x.dims()[0];
    let device = x.device();

    let adj_host = host_values(&adj);
    let mut edges = Vec::new();
    for s in 0..n {
        for t in 0..n {
            if s != t && adj_host[s * n + t] > 0. {
                edges.push((s, t));
            }
        }
    }
    if edges.is_empty() {
        return (x, adj);
    }

    let (src, dst): (Vec<usize>, Vec<usize>) = edges.iter().copied().unzip();
    let pairs = Tensor::cat(
        vec![
            x.clone().select(0, index_tensor::<B>(&src, &device)),
            x.clone().select(0, index_tensor::<B>(&dst, &device)),
        ],
        1,
    );
    let score = activation::sigmoid(lin.forward(pairs)) + 0.5; // [E, 1]

    let score_host = host_values(&score);
    let mut merged = vec![false; n];
    // cluster of each node
    let mut cluster = vec![0; n];
    // Index into `score` for each cluster; `edges.len()` points at a constant 1.
    let mut cluster_score = Vec::new();

    for e in top_k(&score_host, edges.len()) {
        let (s, t) = edges[e];
        if merged[s] || merged[t] {
            continue;
        }
        merged[s] = true;
        merged[t] = true;
        cluster[s] = cluster_score.len();
        cluster[t] = cluster_score.len();
        cluster_score.push(e);
    }
    for i in 0..n {
        if !merged[i] {
            cluster[i] = cluster_score.len();
            cluster_score.push(edges.len());
        }
    }

    let n_clusters = cluster_score.len();
    let mut assign = vec![0_f32; n * n_clusters];
    for (i, &c) in cluster.iter().enumerate() {
        assign[i * n_clusters + c] = 1.;
    }
    let s = Tensor::<B, 2>::from_data(TensorData::new(assign, [n, n_clusters]), &device);

    let score_ext = Tensor::cat(vec![score, Tensor::ones([1, 1], &device)], 0);
    let gate = score_ext.select(0, index_tensor::<B>(&cluster_score, &device)); // [K, 1]

    let x = s.clone().transpose().matmul(x) * gate;

    let coarse = s.clone().transpose().matmul(adj).matmul(s);
    let no_self = identity::<B>(n_clusters, &device).neg() + 1.;
    let adj = (coarse * no_self).greater_elem(0.).float();

    (x, adj)
}

/// Final readout: reduces a graph to exactly `final_nodes` rows, flattened to
/// `[1, final_nodes * C]`.
#[derive(Module, Debug)]
pub struct Readout<B: Backend> {
    topk: Option<Linear<B>>,
    kind: Ignored<FinalPooling>,
    #[module(skip)]
    final_nodes: usize,
}

impl<B: Backend> Readout<B> {
    pub fn new(kind: FinalPooling, channels: usize, final_nodes: usize, device: &B::Device) -> Self {
        let topk = match kind {
            FinalPooling::TopK => Some(LinearConfig::new(channels, 1).with_bias(false).init(device)),
            _ => None,
        };

        Self {
            topk,
            kind: Ignored(kind),
            final_nodes,
        }
    }

    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let [n, c] = x.dims();
        let k = self.final_nodes;
        let device = x.device();

        let rows = match self.kind.0 {
            FinalPooling::MaxPool | FinalPooling::AvgPool => {
                let mut clusters = Vec::with_capacity(k);
                for cl in 0..k {
                    // Node i belongs to cluster floor(i * k / n).
                    let start = (cl * n).div_ceil(k);
                    let end = ((cl + 1) * n).div_ceil(k);

                    clusters.push(if start >= end {
                        Tensor::zeros([1, c], &device)
                    } else {
                        let members = x.clone().slice([start..end, 0..c]);
                        if self.kind.0 == FinalPooling::MaxPool {
                            members.max_dim(0)
                        } else {
                            members.mean_dim(0)
                        }
                    });
                }
                Tensor::cat(clusters, 0)
            }
            FinalPooling::SortPool => {
                let last = x.clone().slice([0..n, c - 1..c]);
                let keep = top_k(&host_values(&last), k);
                pad_rows(x.select(0, index_tensor::<B>(&keep, &device)), k)
            }
            FinalPooling::TopK => match &self.topk {
                Some(p) => {
                    let score = topk_score(p, x.clone());
                    let (x, _) = select_nodes(x, None, score, k.min(n));
                    pad_rows(x, k)
                }
                None => pad_rows(x.slice([0..n.min(k), 0..c]), k),
            },
        };

        rows.reshape([1, k * c])
    }
}

/// Zero-pads `[m, C]` to `[k, C]`.
fn pad_rows<B: Backend>(x: Tensor<B, 2>, k: usize) -> Tensor<B, 2> {
    let [m, c] = x.dims();
    if m >= k {
        return x;
    }
    let device = x.device();
    Tensor::cat(vec![x, Tensor::zeros([k - m, c], &device)], 0)
}

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;

    use super::*;

    type B = NdArray;

    fn path_graph(n: usize, c: usize) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let device = Default::default();
        let feats: Vec<f32> = (0..n * c).map(|v| v as f32 * 0.1).collect();
        let mut adj = vec![0_f32; n * n];
        for i in 0..n - 1 {
            adj[i * n + i + 1] = 1.;
            adj[(i + 1) * n + i] = 1.;
        }
        (
            Tensor::from_data(TensorData::new(feats, [n, c]), &device),
            Tensor::from_data(TensorData::new(adj, [n, n]), &device),
        )
    }

    #[test]
    fn top_k_orders_by_value() {
        assert_eq!(top_k(&[0.1, 0.9, -2., 0.5], 3), vec![1, 3, 0]);
        assert_eq!(top_k(&[1., 2.], 5), vec![1, 0]);
    }

    #[test]
    fn convolutions_keep_node_count() {
        let device = Default::default();
        let (x, adj) = path_graph(5, 3);

        for kind in [Convolution::GraphConv, Convolution::Gat] {
            let conv = ConvLayer::<B>::new(kind, 3, 8, &device);
            assert_eq!(conv.forward(x.clone(), &adj).dims(), [5, 8]);
        }
    }

    #[test]
    fn layers_hold_only_their_own_parameters() {
        let device = Default::default();

        let conv = ConvLayer::<B>::new(Convolution::GraphConv, 3, 8, &device);
        assert!(matches!(conv, ConvLayer::Graph(_)));
        // lin_rel 3x8 + 8, lin_root 3x8
        assert_eq!(conv.num_params(), 56);

        let conv = ConvLayer::<B>::new(Convolution::Gat, 3, 8, &device);
        assert!(matches!(conv, ConvLayer::Gat(_)));
        // lin 3x8, two attention vectors of 8, bias 8
        assert_eq!(conv.num_params(), 48);

        for (kind, params) in [
            (PoolingType::TopK, 4),
            (PoolingType::Sag, 9),
            (PoolingType::EdgePooling, 9),
        ] {
            let pool = PoolLayer::<B>::new(kind, 4, 0.5, &device);
            assert_eq!(pool.num_params(), params, "{kind:?}");
        }
        let pool = PoolLayer::<B>::new(PoolingType::Sag, 4, 0.5, &device);
        assert!(matches!(pool.scorer, PoolScorer::Sag(_)));
    }

    #[test]
    fn topk_and_sag_keep_ceil_ratio() {
        let device = Default::default();
        let (x, adj) = path_graph(5, 4);

        for kind in [PoolingType::TopK, PoolingType::Sag] {
            let pool = PoolLayer::<B>::new(kind, 4, 0.5, &device);
            let (x2, adj2) = pool.forward(x.clone(), adj.clone());
            assert_eq!(x2.dims(), [3, 4]);
            assert_eq!(adj2.dims(), [3, 3]);
        }
    }

    #[test]
    fn edge_pooling_contracts_a_matching() {
        let device = Default::default();
        let (x, adj) = path_graph(4, 2);

        let pool = PoolLayer::<B>::new(PoolingType::EdgePooling, 2, 0.5, &device);
        let (x2, adj2) = pool.forward(x, adj);

        // A path of 4 nodes has a matching of size 1 or 2; either way, 2 or 3 nodes remain.
        let m = x2.dims()[0];
        assert!(m == 2 || m == 3, "{m} nodes after pooling");

        let a = host_values(&adj2);
        for i in 0..m {
            assert_eq!(a[i * m + i], 0.);
            for j in 0..m {
                assert_eq!(a[i * m + j], a[j * m + i]);
            }
        }
    }

    #[test]
    fn readouts_have_fixed_width() {
        let device = Default::default();

        for n in [1, 2, 7] {
            let (x, _) = path_graph(n, 4);
            for kind in [
                FinalPooling::MaxPool,
                FinalPooling::AvgPool,
                FinalPooling::SortPool,
                FinalPooling::TopK,
            ] {
                let readout = Readout::<B>::new(kind, 4, 3, &device);
                assert_eq!(readout.forward(x.clone()).dims(), [1, 12], "{kind:?}, {n} nodes");
            }
        }
    }

    #[test]
    fn max_pool_clusters_are_contiguous() {
        let device = Default::default();
        let x = Tensor::<B, 2>::from_data(
            TensorData::new(vec![1_f32, 5., 2., 4., 3., 0.], [6, 1]),
            &device,
        );
        let readout = Readout::<B>::new(FinalPooling::MaxPool, 1, 3, &device);

        assert_eq!(host_values(&readout.forward(x)), vec![5., 4., 3.]);
    }
}
