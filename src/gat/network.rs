//! Layer stack: composes attention layers into a network.

use serde::{Deserialize, Serialize};

use super::base::{Activation, GatLayerConfig};
use super::graph::Connectivity;
use super::{build_layer, GatLayer, LayerKind};
use crate::error::{AtenderError, Result};
use crate::tensor::Tensor;

/// Configuration for a whole network.
///
/// `num_features_per_layer` has one more entry than `num_heads_per_layer`:
/// entry 0 is the input feature width, entry i+1 the per-head output width
/// of layer i. Hidden layers concatenate their heads, so layer i's input
/// width is `num_features_per_layer[i] * num_heads_per_layer[i-1]`; the
/// final layer averages its heads and applies no activation, producing a
/// plain `num_features_per_layer[L]`-wide embedding for an external task
/// head.
///
/// # Example
///
/// ```
/// use atender::gat::GatConfig;
///
/// // 2 layers: 1433 -> 8 features x 8 heads -> 7 classes
/// let config = GatConfig::new(2, vec![8, 1], vec![1433, 8, 7]);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatConfig {
    /// Number of stacked layers
    pub num_layers: usize,
    /// Attention heads per layer (one entry per layer)
    pub num_heads_per_layer: Vec<usize>,
    /// Per-head feature widths (input width first, then one per layer)
    pub num_features_per_layer: Vec<usize>,
    /// Dropout probability used by every layer
    pub dropout: f32,
    /// Which layer variant to stack
    pub layer_kind: LayerKind,
    /// Whether layers carry bias terms
    pub bias: bool,
    /// Retain attention weights in every layer
    pub log_attention_weights: bool,
    /// Seed for parameter initialization and dropout masks
    pub seed: Option<u64>,
}

impl GatConfig {
    /// Create a configuration with the transductive defaults
    /// (`dropout = 0.6`, bias on, sparse fused layers, no logging).
    #[must_use]
    pub fn new(
        num_layers: usize,
        num_heads_per_layer: Vec<usize>,
        num_features_per_layer: Vec<usize>,
    ) -> Self {
        Self {
            num_layers,
            num_heads_per_layer,
            num_features_per_layer,
            dropout: 0.6,
            layer_kind: LayerKind::default(),
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

    /// Select the layer variant.
    #[must_use]
    pub fn with_layer_kind(mut self, kind: LayerKind) -> Self {
        self.layer_kind = kind;
        self
    }

    /// Disable bias terms in every layer.
    #[must_use]
    pub fn without_bias(mut self) -> Self {
        self.bias = false;
        self
    }

    /// Retain attention weights after each forward call, in every layer.
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

    /// Validate the per-layer lists and hyperparameters.
    ///
    /// # Errors
    ///
    /// Returns [`AtenderError::InvalidHyperparameter`] describing the first
    /// violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.num_layers == 0 {
            return Err(AtenderError::invalid_hyperparameter(
                "num_layers",
                self.num_layers,
                ">= 1",
            ));
        }
        if self.num_heads_per_layer.len() != self.num_layers {
            return Err(AtenderError::invalid_hyperparameter(
                "num_heads_per_layer",
                self.num_heads_per_layer.len(),
                "one entry per layer",
            ));
        }
        if self.num_features_per_layer.len() != self.num_layers + 1 {
            return Err(AtenderError::invalid_hyperparameter(
                "num_features_per_layer",
                self.num_features_per_layer.len(),
                "num_layers + 1 entries",
            ));
        }
        if self.num_heads_per_layer.iter().any(|&h| h == 0) {
            return Err(AtenderError::invalid_hyperparameter(
                "num_heads_per_layer",
                "0",
                "every entry >= 1",
            ));
        }
        if self.num_features_per_layer.iter().any(|&f| f == 0) {
            return Err(AtenderError::invalid_hyperparameter(
                "num_features_per_layer",
                "0",
                "every entry >= 1",
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

/// A stack of attention layers threading `(features, connectivity)`.
///
/// Hidden layers use concatenated multi-head output and ELU; the final
/// layer averages its heads with no activation. All layers share one
/// connectivity encoding, fixed by the configured [`LayerKind`].
pub struct Gat {
    layers: Vec<Box<dyn GatLayer>>,
    kind: LayerKind,
    training: bool,
}

impl Gat {
    /// Build the network described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`AtenderError::InvalidHyperparameter`] when the configuration
    /// fails validation.
    pub fn new(config: GatConfig) -> Result<Self> {
        config.validate()?;

        let mut layers: Vec<Box<dyn GatLayer>> = Vec::with_capacity(config.num_layers);
        for i in 0..config.num_layers {
            // The first layer consumes raw input features; every later layer
            // consumes the previous layer's concatenated heads.
            let heads_in = if i == 0 {
                1
            } else {
                config.num_heads_per_layer[i - 1]
            };
            let last = i + 1 == config.num_layers;

            let mut layer_config = GatLayerConfig::new(
                config.num_features_per_layer[i] * heads_in,
                config.num_features_per_layer[i + 1],
                config.num_heads_per_layer[i],
            )
            .with_dropout(config.dropout)
            .with_concat(!last)
            .with_activation(if last {
                Activation::Identity
            } else {
                Activation::Elu
            });

            if !config.bias {
                layer_config = layer_config.without_bias();
            }
            if config.log_attention_weights {
                layer_config = layer_config.with_attention_logging();
            }
            if let Some(seed) = config.seed {
                layer_config = layer_config.with_seed(seed.wrapping_add(101 * i as u64));
            }

            layers.push(build_layer(config.layer_kind, layer_config)?);
        }

        Ok(Self {
            layers,
            kind: config.layer_kind,
            training: true,
        })
    }

    /// Forward pass through every layer in order.
    ///
    /// # Errors
    ///
    /// Propagates the first layer error (shape or connectivity mismatch).
    pub fn forward(
        &self,
        features: &Tensor,
        connectivity: Connectivity,
    ) -> Result<(Tensor, Connectivity)> {
        let mut features = features.clone();
        let mut connectivity = connectivity;

        for layer in &self.layers {
            let (next, conn) = layer.forward(&features, connectivity)?;
            features = next;
            connectivity = conn;
        }

        Ok((features, connectivity))
    }

    /// The stacked layers, in forward order.
    #[must_use]
    pub fn layers(&self) -> &[Box<dyn GatLayer>] {
        &self.layers
    }

    /// Number of layers.
    #[must_use]
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// The variant every layer uses.
    #[must_use]
    pub fn layer_kind(&self) -> LayerKind {
        self.kind
    }

    /// Output feature width of the final layer.
    #[must_use]
    pub fn output_width(&self) -> usize {
        self.layers
            .last()
            .map(|layer| layer.output_width())
            .unwrap_or(0)
    }

    /// All parameter tensors across the stack.
    #[must_use]
    pub fn parameters(&self) -> Vec<&Tensor> {
        self.layers
            .iter()
            .flat_map(|layer| layer.parameters())
            .collect()
    }

    /// Mutable references to all parameter tensors across the stack.
    pub fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        self.layers
            .iter_mut()
            .flat_map(|layer| layer.parameters_mut())
            .collect()
    }

    /// Total number of scalar parameters.
    #[must_use]
    pub fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.numel()).sum()
    }

    /// Switch every layer to training mode.
    pub fn train(&mut self) {
        self.training = true;
        for layer in &mut self.layers {
            layer.train();
        }
    }

    /// Switch every layer to evaluation mode.
    pub fn eval(&mut self) {
        self.training = false;
        for layer in &mut self.layers {
            layer.eval();
        }
    }

    /// Whether the network is in training mode.
    #[must_use]
    pub fn training(&self) -> bool {
        self.training
    }
}

impl std::fmt::Debug for Gat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gat")
            .field("num_layers", &self.layers.len())
            .field("layer_kind", &self.kind)
            .field("training", &self.training)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gat::graph::{ConnectivityMask, EdgeList};

    fn ring_edges(n: usize) -> EdgeList {
        let pairs: Vec<[usize; 2]> = (0..n).map(|i| [i, (i + 1) % n]).collect();
        EdgeList::from_edge_index(&pairs, n).with_self_loops()
    }

    #[test]
    fn test_config_validation() {
        assert!(GatConfig::new(2, vec![4, 1], vec![3, 8, 2]).validate().is_ok());

        let err = GatConfig::new(0, vec![], vec![3]).validate().unwrap_err();
        assert!(err.to_string().contains("num_layers"));

        let err = GatConfig::new(2, vec![4], vec![3, 8, 2]).validate().unwrap_err();
        assert!(err.to_string().contains("num_heads_per_layer"));

        let err = GatConfig::new(2, vec![4, 1], vec![3, 8]).validate().unwrap_err();
        assert!(err.to_string().contains("num_features_per_layer"));

        let err = GatConfig::new(1, vec![0], vec![3, 8]).validate().unwrap_err();
        assert!(err.to_string().contains("every entry"));

        let err = GatConfig::new(1, vec![2], vec![3, 8])
            .with_dropout(1.5)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("dropout"));
    }

    #[test]
    fn test_gat_stack_shapes_sparse() {
        let config = GatConfig::new(2, vec![4, 1], vec![3, 8, 2]).with_seed(42);
        let mut gat = Gat::new(config).expect("valid config");
        gat.eval();

        assert_eq!(gat.num_layers(), 2);
        // Hidden layer concatenates 4 heads of width 8; final layer averages.
        assert_eq!(gat.layers()[0].output_width(), 32);
        assert_eq!(gat.output_width(), 2);

        let x = Tensor::ones(&[6, 3]);
        let (out, conn) = gat
            .forward(&x, Connectivity::Edges(ring_edges(6)))
            .expect("forward");

        assert_eq!(out.shape(), &[6, 2]);
        assert_eq!(conn.kind_name(), "edge list");
    }

    #[test]
    fn test_gat_stack_shapes_dense() {
        let config = GatConfig::new(2, vec![2, 2], vec![3, 4, 5])
            .with_layer_kind(LayerKind::DensePerHead)
            .with_seed(42);
        let mut gat = Gat::new(config).expect("valid config");
        gat.eval();

        let mask = ConnectivityMask::from_edge_list(&ring_edges(4));
        let x = Tensor::ones(&[4, 3]);
        let (out, conn) = gat
            .forward(&x, Connectivity::Mask(mask))
            .expect("forward");

        assert_eq!(out.shape(), &[4, 5]);
        assert_eq!(conn.kind_name(), "dense mask");
    }

    #[test]
    fn test_gat_single_layer_averages_heads() {
        let config = GatConfig::new(1, vec![3], vec![4, 6]).with_seed(1);
        let mut gat = Gat::new(config).expect("valid config");
        gat.eval();

        let x = Tensor::ones(&[5, 4]);
        let (out, _) = gat
            .forward(&x, Connectivity::Edges(ring_edges(5)))
            .expect("forward");

        // Single layer is also the final layer: head-averaged output
        assert_eq!(out.shape(), &[5, 6]);
    }

    #[test]
    fn test_gat_rejects_wrong_connectivity_encoding() {
        let config = GatConfig::new(1, vec![2], vec![3, 4]).with_seed(0);
        let gat = Gat::new(config).expect("valid config");

        let x = Tensor::ones(&[4, 3]);
        let mask = ConnectivityMask::from_edge_list(&ring_edges(4));
        let err = gat.forward(&x, Connectivity::Mask(mask)).unwrap_err();

        assert!(err.to_string().contains("connectivity mismatch"));
    }

    #[test]
    fn test_gat_seeded_forward_is_deterministic() {
        let config = GatConfig::new(2, vec![2, 1], vec![3, 4, 2]).with_seed(7);
        let mut a = Gat::new(config.clone()).expect("valid config");
        let mut b = Gat::new(config).expect("valid config");
        a.eval();
        b.eval();

        let x = Tensor::ones(&[4, 3]);
        let (out_a, _) = a
            .forward(&x, Connectivity::Edges(ring_edges(4)))
            .expect("forward");
        let (out_b, _) = b
            .forward(&x, Connectivity::Edges(ring_edges(4)))
            .expect("forward");

        assert_eq!(out_a.data(), out_b.data());
    }

    #[test]
    fn test_gat_parameters_cover_every_layer() {
        let config = GatConfig::new(2, vec![2, 1], vec![3, 4, 2]).with_seed(0);
        let gat = Gat::new(config).expect("valid config");

        // Per layer: projection + scoring_src + scoring_tgt + bias
        assert_eq!(gat.parameters().len(), 8);
        assert!(gat.num_parameters() > 0);
    }

    #[test]
    fn test_gat_train_eval_propagates() {
        let config = GatConfig::new(2, vec![2, 1], vec![3, 4, 2]).with_seed(0);
        let mut gat = Gat::new(config).expect("valid config");

        assert!(gat.training());
        gat.eval();
        assert!(!gat.training());
        assert!(gat.layers().iter().all(|layer| !layer.training()));

        gat.train();
        assert!(gat.layers().iter().all(|layer| layer.training()));
    }

    #[test]
    fn test_gat_attention_logging_reaches_layers() {
        let config = GatConfig::new(1, vec![2], vec![3, 4])
            .with_seed(5)
            .with_attention_logging();
        let mut gat = Gat::new(config).expect("valid config");
        gat.eval();

        assert!(gat.layers()[0].attention_weights().is_none());

        let x = Tensor::ones(&[4, 3]);
        gat.forward(&x, Connectivity::Edges(ring_edges(4)))
            .expect("forward");

        let att = gat.layers()[0].attention_weights().expect("logged");
        assert_eq!(att.shape(), &[8, 2]); // 8 edges (4 ring + 4 loops), 2 heads
    }

    #[test]
    fn test_gat_debug_format() {
        let config = GatConfig::new(1, vec![2], vec![3, 4]).with_seed(0);
        let gat = Gat::new(config).expect("valid config");
        let s = format!("{gat:?}");
        assert!(s.contains("Gat"));
        assert!(s.contains("num_layers"));
    }
}
