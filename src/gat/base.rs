//! Shared state and scoring logic for all layer variants.
//!
//! Every variant owns a [`LayerCore`]: the per-head scoring vectors, the
//! optional bias, the dropout module, the activation, and the attention
//! cache. The variants differ only in projection layout and in how they
//! turn per-node scores into normalized per-edge (or per-cell) attention.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::nn::init::{xavier_uniform, zeros};
use crate::nn::{Dropout, Module};
use crate::tensor::Tensor;

/// Negative slope of the LeakyReLU applied to raw attention scores
/// (Velickovic et al., 2018 use 0.2; not configurable).
pub(crate) const LEAKY_RELU_SLOPE: f32 = 0.2;

/// Nonlinearity applied to a layer's output features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Activation {
    /// Exponential linear unit, the hidden-layer default.
    #[default]
    Elu,
    /// Pass features through unchanged (final-layer convention, so the
    /// output can feed an external task head).
    Identity,
}

impl Activation {
    /// Apply the activation elementwise.
    #[must_use]
    pub fn apply(&self, x: &Tensor) -> Tensor {
        match self {
            Activation::Elu => x.elu(),
            Activation::Identity => x.clone(),
        }
    }
}

/// Configuration for a single attention layer.
///
/// Defaults follow the transductive GAT setup: `dropout = 0.6`, heads
/// concatenated, ELU activation, bias enabled, no attention logging.
///
/// # Example
///
/// ```
/// use atender::gat::{Activation, GatLayerConfig};
///
/// let config = GatLayerConfig::new(16, 8, 4)
///     .with_dropout(0.3)
///     .with_activation(Activation::Identity)
///     .with_seed(42);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatLayerConfig {
    /// Input feature dimension per node
    pub num_in_features: usize,
    /// Output feature dimension per head
    pub num_out_features: usize,
    /// Number of attention heads
    pub num_heads: usize,
    /// Dropout probability (input features, projected features, attention)
    pub dropout: f32,
    /// Concatenate head outputs (true) or average them (false)
    pub concat: bool,
    /// Output nonlinearity
    pub activation: Activation,
    /// Accepted for configuration compatibility; not applied by any variant
    pub add_skip_connection: bool,
    /// Whether the layer carries a bias term
    pub bias: bool,
    /// Retain the most recent attention weights for external inspection
    pub log_attention_weights: bool,
    /// Seed for parameter initialization and dropout masks
    pub seed: Option<u64>,
}

impl GatLayerConfig {
    /// Create a configuration with the defaults described above.
    #[must_use]
    pub fn new(num_in_features: usize, num_out_features: usize, num_heads: usize) -> Self {
        Self {
            num_in_features,
            num_out_features,
            num_heads,
            dropout: 0.6,
            concat: true,
            activation: Activation::Elu,
            add_skip_connection: true,
            bias: true,
            log_attention_weights: false,
            seed: None,
        }
    }

    /// Set the dropout probability.
    #[must_use]
    pub fn with_dropout(mut self, dropout: f32) -> Self {
        self.dropout = dropout;
        self
    }

    /// Set the output activation.
    #[must_use]
    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    /// Concatenate (true) or average (false) head outputs.
    #[must_use]
    pub fn with_concat(mut self, concat: bool) -> Self {
        self.concat = concat;
        self
    }

    /// Disable the bias term.
    #[must_use]
    pub fn without_bias(mut self) -> Self {
        self.bias = false;
        self
    }

    /// Disable the (currently inert) skip-connection flag.
    #[must_use]
    pub fn without_skip_connection(mut self) -> Self {
        self.add_skip_connection = false;
        self
    }

    /// Retain attention weights after each forward call.
    #[must_use]
    pub fn with_attention_logging(mut self) -> Self {
        self.log_attention_weights = true;
        self
    }

    /// Seed parameter initialization and dropout for reproducibility.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Validate the hyperparameters.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AtenderError::InvalidHyperparameter`] for a dropout
    /// probability outside `[0, 1)` or a zero dimension.
    pub fn validate(&self) -> Result<()> {
        use crate::error::AtenderError;

        if self.num_in_features == 0 {
            return Err(AtenderError::invalid_hyperparameter(
                "num_in_features",
                self.num_in_features,
                ">= 1",
            ));
        }
        if self.num_out_features == 0 {
            return Err(AtenderError::invalid_hyperparameter(
                "num_out_features",
                self.num_out_features,
                ">= 1",
            ));
        }
        if self.num_heads == 0 {
            return Err(AtenderError::invalid_hyperparameter(
                "num_heads",
                self.num_heads,
                ">= 1",
            ));
        }
        if !self.dropout.is_finite() || !(0.0..1.0).contains(&self.dropout) {
            return Err(AtenderError::invalid_hyperparameter(
                "dropout",
                self.dropout,
                "[0, 1)",
            ));
        }

        Ok(())
    }
}

/// Derive a sub-seed so each parameter tensor draws from its own stream.
pub(crate) fn seed_offset(seed: Option<u64>, offset: u64) -> Option<u64> {
    seed.map(|s| s.wrapping_add(offset))
}

/// State shared by all four layer variants.
pub(crate) struct LayerCore {
    num_in_features: usize,
    num_out_features: usize,
    num_heads: usize,
    concat: bool,
    activation: Activation,
    add_skip_connection: bool,
    dropout: Dropout,
    /// Source scoring vectors, shape [heads, F_out]
    scoring_src: Tensor,
    /// Target scoring vectors, shape [heads, F_out]
    scoring_tgt: Tensor,
    /// Bias, shape [heads * F_out] when concatenating else [F_out]
    bias: Option<Tensor>,
    log_attention_weights: bool,
    /// Single-slot cache of the last attention weights, overwritten per
    /// forward call; read-only diagnostics, never consumed by computation
    attention_weights: Mutex<Option<Tensor>>,
}

impl LayerCore {
    /// Allocate the shared parameters for a validated configuration.
    pub(crate) fn new(config: &GatLayerConfig) -> Result<Self> {
        config.validate()?;

        let f_out = config.num_out_features;
        let heads = config.num_heads;
        let scoring_src = xavier_uniform(&[heads, f_out], f_out, 1, seed_offset(config.seed, 1));
        let scoring_tgt = xavier_uniform(&[heads, f_out], f_out, 1, seed_offset(config.seed, 2));
        let bias = config.bias.then(|| {
            let width = if config.concat { heads * f_out } else { f_out };
            zeros(&[width])
        });
        let dropout = match config.seed {
            Some(s) => Dropout::with_seed(config.dropout, s.wrapping_add(3)),
            None => Dropout::new(config.dropout),
        };

        Ok(Self {
            num_in_features: config.num_in_features,
            num_out_features: f_out,
            num_heads: heads,
            concat: config.concat,
            activation: config.activation,
            add_skip_connection: config.add_skip_connection,
            dropout,
            scoring_src,
            scoring_tgt,
            bias,
            log_attention_weights: config.log_attention_weights,
            attention_weights: Mutex::new(None),
        })
    }

    pub(crate) fn num_in_features(&self) -> usize {
        self.num_in_features
    }

    pub(crate) fn num_out_features(&self) -> usize {
        self.num_out_features
    }

    pub(crate) fn num_heads(&self) -> usize {
        self.num_heads
    }

    pub(crate) fn add_skip_connection(&self) -> bool {
        self.add_skip_connection
    }

    pub(crate) fn dropout(&self) -> &Dropout {
        &self.dropout
    }

    /// Output feature width: `heads * F_out` when concatenating, `F_out`
    /// when averaging.
    pub(crate) fn output_width(&self) -> usize {
        if self.concat {
            self.num_heads * self.num_out_features
        } else {
            self.num_out_features
        }
    }

    /// Check a node feature matrix against the layer's input contract.
    ///
    /// Returns the node count N on success.
    pub(crate) fn check_input(&self, features: &Tensor) -> Result<usize> {
        use crate::error::AtenderError;

        if features.ndim() != 2 || features.shape()[1] != self.num_in_features {
            return Err(AtenderError::shape_mismatch(
                format!("(N, {}) node features", self.num_in_features),
                format!("{:?}", features.shape()),
            ));
        }
        Ok(features.shape()[0])
    }

    /// Per-node source/target scores from head-major projected features
    /// `[heads, N, F_out]`. Returns `(scores_source, scores_target)`, each
    /// `[heads, N]`.
    pub(crate) fn scores_head_major(&self, proj: &Tensor) -> (Tensor, Tensor) {
        let (heads, n, f_out) = (proj.shape()[0], proj.shape()[1], proj.shape()[2]);
        let p = proj.data();
        let a_src = self.scoring_src.data();
        let a_tgt = self.scoring_tgt.data();

        let mut s_src = vec![0.0f32; heads * n];
        let mut s_tgt = vec![0.0f32; heads * n];
        for h in 0..heads {
            for node in 0..n {
                let base = (h * n + node) * f_out;
                let mut src = 0.0f32;
                let mut tgt = 0.0f32;
                for k in 0..f_out {
                    let v = p[base + k];
                    src += v * a_src[h * f_out + k];
                    tgt += v * a_tgt[h * f_out + k];
                }
                s_src[h * n + node] = src;
                s_tgt[h * n + node] = tgt;
            }
        }

        (
            Tensor::from_vec(s_src, &[heads, n]),
            Tensor::from_vec(s_tgt, &[heads, n]),
        )
    }

    /// Per-node source/target scores from node-major projected features
    /// `[N, heads, F_out]`. Returns `(scores_source, scores_target)`, each
    /// `[N, heads]`.
    pub(crate) fn scores_node_major(&self, proj: &Tensor) -> (Tensor, Tensor) {
        let (n, heads, f_out) = (proj.shape()[0], proj.shape()[1], proj.shape()[2]);
        let p = proj.data();
        let a_src = self.scoring_src.data();
        let a_tgt = self.scoring_tgt.data();

        let mut s_src = vec![0.0f32; n * heads];
        let mut s_tgt = vec![0.0f32; n * heads];
        for node in 0..n {
            for h in 0..heads {
                let base = (node * heads + h) * f_out;
                let mut src = 0.0f32;
                let mut tgt = 0.0f32;
                for k in 0..f_out {
                    let v = p[base + k];
                    src += v * a_src[h * f_out + k];
                    tgt += v * a_tgt[h * f_out + k];
                }
                s_src[node * heads + h] = src;
                s_tgt[node * heads + h] = tgt;
            }
        }

        (
            Tensor::from_vec(s_src, &[n, heads]),
            Tensor::from_vec(s_tgt, &[n, heads]),
        )
    }

    /// Reshape head-major aggregated features `[heads, N, F_out]` into the
    /// layer output `[N, width]`, then apply bias and activation.
    pub(crate) fn finalize_head_major(&self, aggregated: &Tensor) -> Tensor {
        let (heads, n, f_out) = (
            aggregated.shape()[0],
            aggregated.shape()[1],
            aggregated.shape()[2],
        );
        let a = aggregated.data();

        let out = if self.concat {
            let mut data = vec![0.0f32; n * heads * f_out];
            for h in 0..heads {
                for node in 0..n {
                    for k in 0..f_out {
                        data[node * heads * f_out + h * f_out + k] = a[(h * n + node) * f_out + k];
                    }
                }
            }
            Tensor::from_vec(data, &[n, heads * f_out])
        } else {
            let mut data = vec![0.0f32; n * f_out];
            for node in 0..n {
                for k in 0..f_out {
                    let mut sum = 0.0f32;
                    for h in 0..heads {
                        sum += a[(h * n + node) * f_out + k];
                    }
                    data[node * f_out + k] = sum / heads as f32;
                }
            }
            Tensor::from_vec(data, &[n, f_out])
        };

        self.bias_and_activate(out)
    }

    /// Reshape node-major aggregated features `[N, heads, F_out]` into the
    /// layer output `[N, width]`, then apply bias and activation.
    pub(crate) fn finalize_node_major(&self, aggregated: &Tensor) -> Tensor {
        let (n, heads, f_out) = (
            aggregated.shape()[0],
            aggregated.shape()[1],
            aggregated.shape()[2],
        );

        let out = if self.concat {
            // Node-major rows are already contiguous per node
            aggregated.view(&[n, heads * f_out])
        } else {
            let a = aggregated.data();
            let mut data = vec![0.0f32; n * f_out];
            for node in 0..n {
                for k in 0..f_out {
                    let mut sum = 0.0f32;
                    for h in 0..heads {
                        sum += a[(node * heads + h) * f_out + k];
                    }
                    data[node * f_out + k] = sum / heads as f32;
                }
            }
            Tensor::from_vec(data, &[n, f_out])
        };

        self.bias_and_activate(out)
    }

    fn bias_and_activate(&self, out: Tensor) -> Tensor {
        let out = match &self.bias {
            Some(bias) => out.broadcast_add(bias),
            None => out,
        };
        self.activation.apply(&out)
    }

    /// Overwrite the attention cache when logging is enabled.
    pub(crate) fn record_attention(&self, attention: &Tensor) {
        if self.log_attention_weights {
            *self
                .attention_weights
                .lock()
                .expect("attention cache lock poisoned") = Some(attention.clone());
        }
    }

    /// Read the most recent attention weights.
    pub(crate) fn cached_attention(&self) -> Option<Tensor> {
        self.attention_weights
            .lock()
            .expect("attention cache lock poisoned")
            .clone()
    }

    /// Shared parameters: scoring vectors and bias.
    pub(crate) fn parameters(&self) -> Vec<&Tensor> {
        let mut params = vec![&self.scoring_src, &self.scoring_tgt];
        if let Some(bias) = &self.bias {
            params.push(bias);
        }
        params
    }

    pub(crate) fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut params = vec![&mut self.scoring_src, &mut self.scoring_tgt];
        if let Some(bias) = &mut self.bias {
            params.push(bias);
        }
        params
    }

    /// Replace the scoring vectors (e.g. with pre-trained parameters).
    ///
    /// # Panics
    ///
    /// Panics unless both tensors have shape `[heads, F_out]`.
    pub(crate) fn set_scoring(&mut self, source: Tensor, target: Tensor) {
        let expected = [self.num_heads, self.num_out_features];
        assert_eq!(source.shape(), &expected, "source scoring shape");
        assert_eq!(target.shape(), &expected, "target scoring shape");
        self.scoring_src = source;
        self.scoring_tgt = target;
    }

    /// Replace the bias (e.g. with pre-trained parameters).
    ///
    /// # Panics
    ///
    /// Panics if the element count doesn't match the output width.
    pub(crate) fn set_bias(&mut self, bias: Tensor) {
        assert_eq!(bias.numel(), self.output_width(), "bias width");
        self.bias = Some(bias);
    }

    pub(crate) fn train(&mut self) {
        self.dropout.train();
    }

    pub(crate) fn eval(&mut self) {
        self.dropout.eval();
    }

    pub(crate) fn training(&self) -> bool {
        self.dropout.training()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activation_apply() {
        let x = Tensor::from_slice(&[-1.0, 2.0]);

        let elu = Activation::Elu.apply(&x);
        assert!(elu.data()[0] < 0.0 && elu.data()[0] > -1.0);
        assert_eq!(elu.data()[1], 2.0);

        let id = Activation::Identity.apply(&x);
        assert_eq!(id.data(), x.data());
    }

    #[test]
    fn test_config_defaults() {
        let config = GatLayerConfig::new(16, 8, 4);
        assert_eq!(config.dropout, 0.6);
        assert!(config.concat);
        assert_eq!(config.activation, Activation::Elu);
        assert!(config.add_skip_connection);
        assert!(config.bias);
        assert!(!config.log_attention_weights);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_dropout() {
        let config = GatLayerConfig::new(4, 4, 1).with_dropout(1.0);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("dropout"));

        let config = GatLayerConfig::new(4, 4, 1).with_dropout(-0.1);
        assert!(config.validate().is_err());

        let config = GatLayerConfig::new(4, 4, 1).with_dropout(f32::NAN);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_dimensions() {
        assert!(GatLayerConfig::new(0, 4, 1).validate().is_err());
        assert!(GatLayerConfig::new(4, 0, 1).validate().is_err());
        assert!(GatLayerConfig::new(4, 4, 0).validate().is_err());
    }

    #[test]
    fn test_core_parameter_shapes() {
        let config = GatLayerConfig::new(3, 4, 2).with_seed(0);
        let core = LayerCore::new(&config).expect("valid config");

        let params = core.parameters();
        assert_eq!(params.len(), 3); // scoring_src, scoring_tgt, bias
        assert_eq!(params[0].shape(), &[2, 4]);
        assert_eq!(params[1].shape(), &[2, 4]);
        assert_eq!(params[2].shape(), &[8]); // concat: heads * F_out
    }

    #[test]
    fn test_core_bias_width_when_averaging() {
        let config = GatLayerConfig::new(3, 4, 2).with_concat(false).with_seed(0);
        let core = LayerCore::new(&config).expect("valid config");
        assert_eq!(core.output_width(), 4);
        assert_eq!(core.parameters()[2].shape(), &[4]);
    }

    #[test]
    fn test_core_no_bias() {
        let config = GatLayerConfig::new(3, 4, 2).without_bias();
        let core = LayerCore::new(&config).expect("valid config");
        assert_eq!(core.parameters().len(), 2);
    }

    #[test]
    fn test_core_check_input() {
        let config = GatLayerConfig::new(3, 4, 2);
        let core = LayerCore::new(&config).expect("valid config");

        assert_eq!(core.check_input(&Tensor::zeros(&[5, 3])).unwrap(), 5);
        assert!(core.check_input(&Tensor::zeros(&[5, 4])).is_err());
        assert!(core.check_input(&Tensor::zeros(&[5])).is_err());
    }

    #[test]
    fn test_scores_layouts_agree() {
        // The same projected features in both layouts must give the same
        // per-node scores.
        let config = GatLayerConfig::new(3, 2, 2).with_seed(9);
        let core = LayerCore::new(&config).expect("valid config");

        // [N=2, H=2, F=2] node-major
        let node_major = Tensor::new(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0], &[2, 2, 2]);
        // Head-major equivalent [H, N, F]
        let head_major = Tensor::new(&[1.0, 2.0, 5.0, 6.0, 3.0, 4.0, 7.0, 8.0], &[2, 2, 2]);

        let (src_nm, tgt_nm) = core.scores_node_major(&node_major);
        let (src_hm, tgt_hm) = core.scores_head_major(&head_major);

        for node in 0..2 {
            for h in 0..2 {
                let nm = src_nm.data()[node * 2 + h];
                let hm = src_hm.data()[h * 2 + node];
                assert!((nm - hm).abs() < 1e-6);

                let nm = tgt_nm.data()[node * 2 + h];
                let hm = tgt_hm.data()[h * 2 + node];
                assert!((nm - hm).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_finalize_layouts_agree() {
        let config = GatLayerConfig::new(3, 2, 2).with_seed(1);
        let core = LayerCore::new(&config).expect("valid config");

        let node_major = Tensor::new(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0], &[2, 2, 2]);
        let head_major = Tensor::new(&[1.0, 2.0, 5.0, 6.0, 3.0, 4.0, 7.0, 8.0], &[2, 2, 2]);

        let from_nm = core.finalize_node_major(&node_major);
        let from_hm = core.finalize_head_major(&head_major);

        assert_eq!(from_nm.shape(), &[2, 4]);
        for (a, b) in from_nm.data().iter().zip(from_hm.data()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_finalize_mean_over_heads() {
        let config = GatLayerConfig::new(3, 2, 2)
            .with_concat(false)
            .with_activation(Activation::Identity)
            .without_bias();
        let core = LayerCore::new(&config).expect("valid config");

        // Node 0 heads: [1, 2] and [3, 4] -> mean [2, 3]
        let node_major = Tensor::new(&[1.0, 2.0, 3.0, 4.0], &[1, 2, 2]);
        let out = core.finalize_node_major(&node_major);

        assert_eq!(out.shape(), &[1, 2]);
        assert!((out.data()[0] - 2.0).abs() < 1e-6);
        assert!((out.data()[1] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_attention_cache_disabled_by_default() {
        let config = GatLayerConfig::new(3, 2, 1);
        let core = LayerCore::new(&config).expect("valid config");

        core.record_attention(&Tensor::ones(&[2, 1]));
        assert!(core.cached_attention().is_none());
    }

    #[test]
    fn test_attention_cache_single_slot() {
        let config = GatLayerConfig::new(3, 2, 1).with_attention_logging();
        let core = LayerCore::new(&config).expect("valid config");

        core.record_attention(&Tensor::ones(&[2, 1]));
        core.record_attention(&Tensor::zeros(&[3, 1]));

        let cached = core.cached_attention().expect("cache populated");
        assert_eq!(cached.shape(), &[3, 1]);
    }

    #[test]
    fn test_seeded_core_reproducible() {
        let config = GatLayerConfig::new(5, 3, 2).with_seed(77);
        let a = LayerCore::new(&config).expect("valid config");
        let b = LayerCore::new(&config).expect("valid config");

        assert_eq!(a.parameters()[0].data(), b.parameters()[0].data());
        assert_eq!(a.parameters()[1].data(), b.parameters()[1].data());
    }
}
