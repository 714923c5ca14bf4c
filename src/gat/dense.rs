//! Dense-mask layer variants.
//!
//! Both variants score every node pair in one `[heads, N, N]` broadcast,
//! force non-edges to negative infinity with the additive connectivity mask,
//! softmax along each row, and aggregate with a batched matrix multiply.
//! Cost is O(heads * N^2 * F_out) regardless of edge count, so these suit
//! small or dense graphs; the edge-list variants in [`super::sparse`] scale
//! with E instead.
//!
//! The two types differ only in projection layout:
//! [`DensePerHeadGat`] holds one `[F_in, F_out]` matrix per head,
//! [`DenseFusedGat`] a single fused `Linear` of width `heads * F_out`.

use super::base::{GatLayerConfig, LayerCore, LEAKY_RELU_SLOPE};
use super::graph::{Connectivity, ConnectivityMask};
use super::{GatLayer, LayerKind};
use crate::error::{AtenderError, Result};
use crate::nn::init::xavier_uniform;
use crate::nn::{Linear, Module};
use crate::tensor::Tensor;

/// Attention round over a dense connectivity mask.
///
/// `proj` is head-major `[heads, N, F_out]` (already feature-dropped);
/// returns finalized node features `[N, width]`.
fn masked_attention(core: &LayerCore, proj: &Tensor, mask: &ConnectivityMask) -> Tensor {
    let heads = proj.shape()[0];
    let n = proj.shape()[1];

    let proj = core.dropout().forward(proj);
    let (s_src, s_tgt) = core.scores_head_major(&proj);
    let src = s_src.data();
    let tgt = s_tgt.data();
    let m = mask.tensor().data();

    // scores[h, i, j]: target node i attending to source node j, one
    // broadcast instead of per-edge work
    let mut scores = vec![0.0f32; heads * n * n];
    for h in 0..heads {
        for i in 0..n {
            let row = (h * n + i) * n;
            let t = tgt[h * n + i];
            for j in 0..n {
                let raw = t + src[h * n + j];
                let e = if raw > 0.0 { raw } else { LEAKY_RELU_SLOPE * raw };
                scores[row + j] = e + m[i * n + j];
            }
        }
    }

    // Row softmax. exp(-inf) = 0, so masking and normalization happen in
    // one pass; a row with no permitted sources stays all-zero instead of
    // going NaN, matching the sparse variants' zero-in-degree behavior.
    for row in scores.chunks_mut(n) {
        let max = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
        if max == f32::NEG_INFINITY {
            for v in row.iter_mut() {
                *v = 0.0;
            }
            continue;
        }
        let mut sum = 0.0f32;
        for v in row.iter_mut() {
            *v = (*v - max).exp();
            sum += *v;
        }
        for v in row.iter_mut() {
            *v /= sum;
        }
    }

    let attention = core
        .dropout()
        .forward(&Tensor::from_vec(scores, &[heads, n, n]));
    core.record_attention(&attention);

    // [heads, N, N] x [heads, N, F_out] -> [heads, N, F_out]
    let aggregated = attention.bmm(&proj);
    core.finalize_head_major(&aggregated)
}

/// Unwrap the dense-mask connectivity and check it against N nodes.
fn expect_mask(connectivity: Connectivity, n: usize) -> Result<ConnectivityMask> {
    let mask = match connectivity {
        Connectivity::Mask(mask) => mask,
        other => {
            return Err(AtenderError::connectivity_mismatch(
                "dense mask",
                other.kind_name(),
            ))
        }
    };

    if mask.num_nodes() != n {
        return Err(AtenderError::shape_mismatch(
            format!("({n}, {n}) connectivity mask"),
            format!("({m}, {m})", m = mask.num_nodes()),
        ));
    }

    Ok(mask)
}

/// Dense-mask layer with independent per-head projection matrices.
///
/// Holds the projection as a `[heads, F_in, F_out]` parameter tensor and
/// applies it head by head, keeping the per-head weights separately
/// addressable. Mathematically equivalent to [`DenseFusedGat`], numerically
/// a different lowering.
pub struct DensePerHeadGat {
    core: LayerCore,
    /// Projection weight, shape [heads, F_in, F_out]
    proj_weight: Tensor,
}

impl DensePerHeadGat {
    /// Create a layer from a configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AtenderError::InvalidHyperparameter`] for invalid
    /// hyperparameters.
    pub fn new(config: GatLayerConfig) -> Result<Self> {
        let proj_weight = xavier_uniform(
            &[
                config.num_heads,
                config.num_in_features,
                config.num_out_features,
            ],
            config.num_in_features,
            config.num_out_features,
            config.seed,
        );
        let core = LayerCore::new(&config)?;

        Ok(Self { core, proj_weight })
    }

    /// Project node features head by head into `[heads, N, F_out]`.
    fn project(&self, x: &Tensor) -> Tensor {
        let n = x.shape()[0];
        let heads = self.core.num_heads();
        let f_in = self.core.num_in_features();
        let f_out = self.core.num_out_features();
        let w = self.proj_weight.data();

        let mut out = Vec::with_capacity(heads * n * f_out);
        for h in 0..heads {
            let w_h = Tensor::new(&w[h * f_in * f_out..(h + 1) * f_in * f_out], &[f_in, f_out]);
            out.extend_from_slice(x.matmul(&w_h).data());
        }

        Tensor::from_vec(out, &[heads, n, f_out])
    }

    /// Replace the projection weight (e.g. with pre-trained parameters).
    ///
    /// # Panics
    ///
    /// Panics unless the shape is `[heads, F_in, F_out]`.
    pub fn set_projection(&mut self, weight: Tensor) {
        let expected = [
            self.core.num_heads(),
            self.core.num_in_features(),
            self.core.num_out_features(),
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

impl GatLayer for DensePerHeadGat {
    fn forward(&self, features: &Tensor, connectivity: Connectivity) -> Result<(Tensor, Connectivity)> {
        let n = self.core.check_input(features)?;
        let mask = expect_mask(connectivity, n)?;

        let x = self.core.dropout().forward(features);
        let proj = self.project(&x);
        let out = masked_attention(&self.core, &proj, &mask);

        Ok((out, Connectivity::Mask(mask)))
    }

    fn kind(&self) -> LayerKind {
        LayerKind::DensePerHead
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

impl std::fmt::Debug for DensePerHeadGat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DensePerHeadGat")
            .field("in_features", &self.in_features())
            .field("out_features", &self.out_features())
            .field("num_heads", &self.num_heads())
            .finish_non_exhaustive()
    }
}

/// Dense-mask layer with a single fused linear projection.
///
/// Projects through one `Linear` of width `heads * F_out` and splits the
/// result into heads afterwards.
pub struct DenseFusedGat {
    core: LayerCore,
    /// Fused projection: F_in -> heads * F_out, no bias
    proj: Linear,
}

impl DenseFusedGat {
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

    /// Project node features and rearrange into head-major `[heads, N, F_out]`.
    fn project(&self, x: &Tensor) -> Tensor {
        let n = x.shape()[0];
        let heads = self.core.num_heads();
        let f_out = self.core.num_out_features();

        let flat = self.proj.forward(x); // [N, heads * F_out]
        let src = flat.data();
        let mut out = vec![0.0f32; heads * n * f_out];
        for node in 0..n {
            for h in 0..heads {
                for k in 0..f_out {
                    out[(h * n + node) * f_out + k] = src[(node * heads + h) * f_out + k];
                }
            }
        }

        Tensor::from_vec(out, &[heads, n, f_out])
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

impl GatLayer for DenseFusedGat {
    fn forward(&self, features: &Tensor, connectivity: Connectivity) -> Result<(Tensor, Connectivity)> {
        let n = self.core.check_input(features)?;
        let mask = expect_mask(connectivity, n)?;

        let x = self.core.dropout().forward(features);
        let proj = self.project(&x);
        let out = masked_attention(&self.core, &proj, &mask);

        Ok((out, Connectivity::Mask(mask)))
    }

    fn kind(&self) -> LayerKind {
        LayerKind::DenseFused
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

impl std::fmt::Debug for DenseFusedGat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DenseFusedGat")
            .field("in_features", &self.in_features())
            .field("out_features", &self.out_features())
            .field("num_heads", &self.num_heads())
            .finish_non_exhaustive()
    }
}
