//! Graph attention network layers (Velickovic et al., 2018).
//!
//! Each node recomputes its representation by attending over its neighbors'
//! projected features with learned, softmax-normalized attention weights,
//! across several independent heads. Four interchangeable layer variants
//! implement the same forward contract with different connectivity
//! encodings and projection layouts:
//!
//! | Variant             | Connectivity | Projection                  | Cost                  |
//! |---------------------|--------------|-----------------------------|-----------------------|
//! | [`DensePerHeadGat`] | dense mask   | per-head `[F_in, F_out]`    | O(H * N^2 * F)        |
//! | [`DenseFusedGat`]   | dense mask   | fused `Linear`              | O(H * N^2 * F)        |
//! | [`SparseFusedGat`]  | edge list    | fused `Linear`              | O(H * E * F)          |
//! | [`SparseRawGat`]    | edge list    | fused raw weight matrix     | O(H * E * F)          |
//!
//! All four honor one invariant: per head, the attention weights of the
//! edges sharing a target node sum to one. A node with no incoming edges
//! aggregates to the zero vector.
//!
//! # Example
//!
//! ```
//! use atender::gat::{build_layer, Connectivity, EdgeList, GatLayerConfig, LayerKind};
//! use atender::tensor::Tensor;
//!
//! let config = GatLayerConfig::new(8, 4, 2).with_seed(7);
//! let mut layer = build_layer(LayerKind::SparseFused, config).unwrap();
//! layer.eval();
//!
//! let features = Tensor::ones(&[4, 8]);
//! let edges = EdgeList::from_edge_index(&[[0, 1], [1, 2], [2, 3]], 4).with_self_loops();
//! let (out, _) = layer.forward(&features, Connectivity::Edges(edges)).unwrap();
//! assert_eq!(out.shape(), &[4, 8]); // heads * F_out
//! ```
//!
//! # References
//!
//! - Velickovic, P., et al. (2018). Graph Attention Networks. ICLR.

mod base;
mod dense;
mod graph;
mod network;
mod sparse;

pub use base::{Activation, GatLayerConfig};
pub use dense::{DenseFusedGat, DensePerHeadGat};
pub use graph::{Connectivity, ConnectivityMask, EdgeList};
pub use network::{Gat, GatConfig};
pub use sparse::{SparseFusedGat, SparseRawGat};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AtenderError, Result};
use crate::tensor::Tensor;

/// Configuration tag selecting one of the four layer variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LayerKind {
    /// Dense connectivity mask, independent per-head projection matrices.
    DensePerHead,
    /// Dense connectivity mask, one fused linear projection.
    DenseFused,
    /// Sparse edge list, fused linear projection.
    #[default]
    SparseFused,
    /// Sparse edge list, fused projection held as a raw weight matrix.
    SparseRaw,
}

impl LayerKind {
    /// Kebab-case tag, the inverse of [`FromStr`].
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            LayerKind::DensePerHead => "dense-per-head",
            LayerKind::DenseFused => "dense-fused",
            LayerKind::SparseFused => "sparse-fused",
            LayerKind::SparseRaw => "sparse-raw",
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LayerKind {
    type Err = AtenderError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dense-per-head" => Ok(LayerKind::DensePerHead),
            "dense-fused" => Ok(LayerKind::DenseFused),
            "sparse-fused" => Ok(LayerKind::SparseFused),
            "sparse-raw" => Ok(LayerKind::SparseRaw),
            other => Err(AtenderError::UnsupportedVariant {
                name: other.to_string(),
            }),
        }
    }
}

/// Common interface of the four layer variants.
///
/// A layer is a pure function of its inputs and current parameters: one
/// forward call consumes `(features, connectivity)` and returns the updated
/// features together with the untouched connectivity, ready for the next
/// layer in a stack.
pub trait GatLayer: fmt::Debug {
    /// One attention round.
    ///
    /// # Errors
    ///
    /// Fails with [`AtenderError::ShapeMismatch`] when the feature matrix and
    /// connectivity disagree, or [`AtenderError::ConnectivityMismatch`] when
    /// given the wrong connectivity encoding.
    fn forward(&self, features: &Tensor, connectivity: Connectivity) -> Result<(Tensor, Connectivity)>;

    /// Which variant this layer is.
    fn kind(&self) -> LayerKind;

    /// Output feature width: `heads * F_out` when concatenating heads,
    /// `F_out` when averaging.
    fn output_width(&self) -> usize;

    /// All parameter tensors of this layer.
    fn parameters(&self) -> Vec<&Tensor>;

    /// Mutable references to all parameter tensors, for external updates.
    fn parameters_mut(&mut self) -> Vec<&mut Tensor>;

    /// Switch to training mode (dropout active).
    fn train(&mut self);

    /// Switch to evaluation mode (dropout inactive).
    fn eval(&mut self);

    /// Whether the layer is in training mode.
    fn training(&self) -> bool;

    /// The most recent attention weights, when logging was configured.
    ///
    /// Dense variants retain `[heads, N, N]` coefficients, sparse variants
    /// `[E, heads]`.
    fn attention_weights(&self) -> Option<Tensor>;
}

/// Construct a layer of the given variant.
///
/// # Errors
///
/// Returns [`AtenderError::InvalidHyperparameter`] when the configuration
/// fails validation.
pub fn build_layer(kind: LayerKind, config: GatLayerConfig) -> Result<Box<dyn GatLayer>> {
    Ok(match kind {
        LayerKind::DensePerHead => Box::new(DensePerHeadGat::new(config)?),
        LayerKind::DenseFused => Box::new(DenseFusedGat::new(config)?),
        LayerKind::SparseFused => Box::new(SparseFusedGat::new(config)?),
        LayerKind::SparseRaw => Box::new(SparseRawGat::new(config)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_kind_round_trip() {
        for kind in [
            LayerKind::DensePerHead,
            LayerKind::DenseFused,
            LayerKind::SparseFused,
            LayerKind::SparseRaw,
        ] {
            let parsed: LayerKind = kind.as_str().parse().expect("round trip");
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn test_layer_kind_unknown_tag() {
        let err = "sparse-csr".parse::<LayerKind>().unwrap_err();
        assert!(matches!(err, AtenderError::UnsupportedVariant { .. }));
        assert!(err.to_string().contains("sparse-csr"));
    }

    #[test]
    fn test_layer_kind_default_is_sparse_fused() {
        assert_eq!(LayerKind::default(), LayerKind::SparseFused);
    }

    #[test]
    fn test_build_layer_each_kind() {
        for kind in [
            LayerKind::DensePerHead,
            LayerKind::DenseFused,
            LayerKind::SparseFused,
            LayerKind::SparseRaw,
        ] {
            let layer =
                build_layer(kind, GatLayerConfig::new(3, 4, 2).with_seed(0)).expect("built");
            assert_eq!(layer.kind(), kind);
            assert_eq!(layer.output_width(), 8);
        }
    }

    #[test]
    fn test_build_layer_invalid_config() {
        let err = build_layer(
            LayerKind::SparseFused,
            GatLayerConfig::new(3, 4, 2).with_dropout(2.0),
        )
        .unwrap_err();
        assert!(matches!(err, AtenderError::InvalidHyperparameter { .. }));
    }
}
