//! Sparse edge-list layer variants.
//!
//! Instead of materializing an `[N, N]` score matrix, these variants lift
//! per-node scores and features onto the edge list with a gather, normalize
//! per-edge scores with a scatter-add softmax restricted to each target
//! node's neighborhood, and aggregate with a second scatter-add. Cost is
//! O(E * heads * F_out), linear in edge count.
//!
//! The two types differ only in how the fused projection is held:
//! [`SparseFusedGat`] wraps a `Linear` module, [`SparseRawGat`] keeps the
//! raw `[F_in, heads * F_out]` weight matrix and applies it with an explicit
//! matmul.

use super::base::{GatLayerConfig, LayerCore, LEAKY_RELU_SLOPE};
use super::graph::{Connectivity, EdgeList};
use super::{GatLayer, LayerKind};
use crate::error::{AtenderError, Result};
use crate::nn::init::xavier_uniform;
use crate::nn::{Linear, Module};
use crate::tensor::Tensor;

/// Denominator floor for the neighborhood softmax. Only reachable by a
/// target node with no incoming edges, whose weights then stay exactly
/// zero instead of dividing by zero.
const SOFTMAX_EPS: f32 = 1e-16;

/// Normalize per-edge scores so that, per head, scores sharing a target
/// node sum to one.
///
/// `scores` is `[E, heads]` raw (post-LeakyReLU) values; returns the
/// attention weights in the same shape.
fn neighborhood_softmax(scores: &Tensor, target: &[usize], num_nodes: usize) -> Tensor {
    let num_edges = scores.shape()[0];
    let heads = scores.shape()[1];

    // Softmax is shift-invariant; subtracting the global max keeps the
    // exponentials in range without changing the result.
    let max = scores
        .data()
        .iter()
        .fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let exp_data: Vec<f32> = scores.data().iter().map(|&s| (s - max).exp()).collect();
    let exp_scores = Tensor::from_vec(exp_data, &[num_edges, heads]);

    // Per-target-node denominators, then gathered back to edge length
    let mut denominators = Tensor::zeros(&[num_nodes, heads]);
    denominators.scatter_add_rows(target, &exp_scores);
    let denom_lifted = denominators.index_select(target);

    let att: Vec<f32> = exp_scores
        .data()
        .iter()
        .zip(denom_lifted.data())
        .map(|(&e, &d)| e / (d + SOFTMAX_EPS))
        .collect();

    Tensor::from_vec(att, &[num_edges, heads])
}

/// Attention round over an edge list.
///
/// `proj` is node-major `[N, heads, F_out]`; returns finalized node
/// features `[N, width]`.
fn edge_attention(core: &LayerCore, proj: &Tensor, edges: &EdgeList) -> Tensor {
    let n = proj.shape()[0];
    let heads = proj.shape()[1];
    let f_out = proj.shape()[2];
    let num_edges = edges.num_edges();

    let proj = core.dropout().forward(proj);
    let (s_src, s_tgt) = core.scores_node_major(&proj);

    // Lift per-node scores and features onto the edges
    let src_lifted = s_src.index_select(edges.source());
    let tgt_lifted = s_tgt.index_select(edges.target());
    let proj_lifted = proj.index_select(edges.source());

    let mut scores = vec![0.0f32; num_edges * heads];
    for (s, (&a, &b)) in scores
        .iter_mut()
        .zip(src_lifted.data().iter().zip(tgt_lifted.data()))
    {
        let raw = a + b;
        *s = if raw > 0.0 { raw } else { LEAKY_RELU_SLOPE * raw };
    }
    let scores = Tensor::from_vec(scores, &[num_edges, heads]);

    let attention = core
        .dropout()
        .forward(&neighborhood_softmax(&scores, edges.target(), n));
    core.record_attention(&attention);

    // Weight lifted features, then scatter-add into per-node accumulators
    let att = attention.data();
    let lifted = proj_lifted.data();
    let mut weighted = vec![0.0f32; num_edges * heads * f_out];
    for e in 0..num_edges {
        for h in 0..heads {
            let a = att[e * heads + h];
            let base = (e * heads + h) * f_out;
            for k in 0..f_out {
                weighted[base + k] = a * lifted[base + k];
            }
        }
    }
    let weighted = Tensor::from_vec(weighted, &[num_edges, heads, f_out]);

    let mut aggregated = Tensor::zeros(&[n, heads, f_out]);
    aggregated.scatter_add_rows(edges.target(), &weighted);

    core.finalize_node_major(&aggregated)
}

/// Unwrap the edge-list connectivity and check it against N nodes.
fn expect_edges(connectivity: Connectivity, n: usize) -> Result<EdgeList> {
    let edges = match connectivity {
        Connectivity::Edges(edges) => edges,
        other => {
            return Err(AtenderError::connectivity_mismatch(
                "edge list",
                other.kind_name(),
            ))
        }
    };

    edges.validate(n)?;
    Ok(edges)
}

/// Edge-list layer with the fused projection wrapped in a `Linear` module.
pub struct SparseFusedGat {
    core: LayerCore,
    /// Fused projection: F_in -> heads * F_out, no bias
    proj: Linear,
}

impl SparseFusedGat {
    /// Create a layer from a configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AtenderError::InvalidHyperparameter`] for invalid
    /// hyperparameters.
    pub fn new(config: GatLayerConfig) -> Result<Self> {
        let proj = Linear::without_bias_with_seed(
            config.num_in_features,
            config.num_heads * config.num_out_features,
            config.seed,
        );
        let core = LayerCore::new(&config)?;

        Ok(Self { core, proj })
    }

    /// Project node features into node-major `[N, heads, F_out]`.
    fn project(&self, x: &Tensor) -> Tensor {
        let n = x.shape()[0];
        self.proj
            .forward(x)
            .view(&[n, self.core.num_heads(), self.core.num_out_features()])
    }

    /// Replace the fused projection weight, shape `[heads * F_out, F_in]`.
    pub fn set_projection(&mut self, weight: Tensor) {
        self.proj.set_weight(weight);
    }

    /// Replace the scoring vectors, each `[heads, F_out]`.
    pub fn set_scoring(&mut self, source: Tensor, target: Tensor) {
        self.core.set_scoring(source, target);
    }

    /// Replace the bias.
    pub fn set_bias(&mut self, bias: Tensor) {
        self.core.set_bias(bias);
    }

    /// Input feature dimension.
    #[must_use]
    pub fn in_features(&self) -> usize {
        self.core.num_in_features()
    }

    /// Output feature dimension per head.
    #[must_use]
    pub fn out_features(&self) -> usize {
        self.core.num_out_features()
    }

    /// Number of attention heads.
    #[must_use]
    pub fn num_heads(&self) -> usize {
        self.core.num_heads()
    }

    /// Whether the skip-connection flag was set (accepted, not applied).
    #[must_use]
    pub fn add_skip_connection(&self) -> bool {
        self.core.add_skip_connection()
    }
}

impl GatLayer for SparseFusedGat {
    fn forward(&self, features: &Tensor, connectivity: Connectivity) -> Result<(Tensor, Connectivity)> {
        let n = self.core.check_input(features)?;
        let edges = expect_edges(connectivity, n)?;

        let x = self.core.dropout().forward(features);
        let proj = self.project(&x);
        let out = edge_attention(&self.core, &proj, &edges);

        Ok((out, Connectivity::Edges(edges)))
    }

    fn kind(&self) -> LayerKind {
        LayerKind::SparseFused
    }

    fn output_width(&self) -> usize {
        self.core.output_width()
    }

    fn parameters(&self) -> Vec<&Tensor> {
        let mut params = self.proj.parameters();
        params.extend(self.core.parameters());
        params
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut params = self.proj.parameters_mut();
        params.extend(self.core.parameters_mut());
        params
    }

    fn train(&mut self) {
        self.core.train();
    }

    fn eval(&mut self) {
        self.core.eval();
    }

    fn training(&self) -> bool {
        self.core.training()
    }

    fn attention_weights(&self) -> Option<Tensor> {
        self.core.cached_attention()
    }
}

impl std::fmt::Debug for SparseFusedGat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SparseFusedGat")
            .field("in_features", &self.in_features())
            .field("out_features", &self.out_features())
            .field("num_heads", &self.num_heads())
            .finish_non_exhaustive()
    }
}

/// Edge-list layer holding the fused projection as a raw weight matrix.
///
/// Identical algorithm to [`SparseFusedGat`]; the projection is a plain
/// `[F_in, heads * F_out]` parameter applied with an explicit matmul
/// rather than a `Linear` module.
pub struct SparseRawGat {
    core: LayerCore,
    /// Projection weight, shape [F_in, heads * F_out]
    proj_weight: Tensor,
}

impl SparseRawGat {
    /// Create a layer from a configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AtenderError::InvalidHyperparameter`] for invalid
    /// hyperparameters.
    pub fn new(config: GatLayerConfig) -> Result<Self> {
        let proj_weight = xavier_uniform(
            &[
                config.num_in_features,
                config.num_heads * config.num_out_features,
            ],
            config.num_in_features,
            config.num_heads * config.num_out_features,
            config.seed,
        );
        let core = LayerCore::new(&config)?;

        Ok(Self { core, proj_weight })
    }

    /// Project node features into node-major `[N, heads, F_out]`.
    fn project(&self, x: &Tensor) -> Tensor {
        let n = x.shape()[0];
        x.matmul(&self.proj_weight)
            .view(&[n, self.core.num_heads(), self.core.num_out_features()])
    }

    /// Replace the projection weight, shape `[F_in, heads * F_out]`.
    ///
    /// # Panics
    ///
    /// Panics on a shape disagreement.
    pub fn set_projection(&mut self, weight: Tensor) {
        let expected = [
            self.core.num_in_features(),
            self.core.num_heads() * self.core.num_out_features(),
        ];
        assert_eq!(weight.shape(), &expected, "projection weight shape");
        self.proj_weight = weight;
    }

    /// Replace the scoring vectors, each `[heads, F_out]`.
    pub fn set_scoring(&mut self, source: Tensor, target: Tensor) {
        self.core.set_scoring(source, target);
    }

    /// Replace the bias.
    pub fn set_bias(&mut self, bias: Tensor) {
        self.core.set_bias(bias);
    }

    /// Input feature dimension.
    #[must_use]
    pub fn in_features(&self) -> usize {
        self.core.num_in_features()
    }

    /// Output feature dimension per head.
    #[must_use]
    pub fn out_features(&self) -> usize {
        self.core.num_out_features()
    }

    /// Number of attention heads.
    #[must_use]
    pub fn num_heads(&self) -> usize {
        self.core.num_heads()
    }

    /// Whether the skip-connection flag was set (accepted, not applied).
    #[must_use]
    pub fn add_skip_connection(&self) -> bool {
        self.core.add_skip_connection()
    }
}

impl GatLayer for SparseRawGat {
    fn forward(&self, features: &Tensor, connectivity: Connectivity) -> Result<(Tensor, Connectivity)> {
        let n = self.core.check_input(features)?;
        let edges = expect_edges(connectivity, n)?;

        let x = self.core.dropout().forward(features);
        let proj = self.project(&x);
        let out = edge_attention(&self.core, &proj, &edges);

        Ok((out, Connectivity::Edges(edges)))
    }

    fn kind(&self) -> LayerKind {
        LayerKind::SparseRaw
    }

    fn output_width(&self) -> usize {
        self.core.output_width()
    }

    fn parameters(&self) -> Vec<&Tensor> {
        let mut params = vec![&self.proj_weight];
        params.extend(self.core.parameters());
        params
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut params = vec![&mut self.proj_weight];
        params.extend(self.core.parameters_mut());
        params
    }

    fn train(&mut self) {
        self.core.train();
    }

    fn eval(&mut self) {
        self.core.eval();
    }

    fn training(&self) -> bool {
        self.core.training()
    }

    fn attention_weights(&self) -> Option<Tensor> {
        self.core.cached_attention()
    }
}

impl std::fmt::Debug for SparseRawGat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SparseRawGat")
            .field("in_features", &self.in_features())
            .field("out_features", &self.out_features())
            .field("num_heads", &self.num_heads())
            .finish_non_exhaustive()
    }
}
