//! Atender: graph attention network layers in pure Rust.
//!
//! Atender implements the GAT forward pass (Velickovic et al., 2018), where
//! multi-head self-attention is restricted to graph neighborhoods, with four
//! interchangeable layer variants covering both connectivity encodings
//! (dense additive mask, sparse edge list) and both projection layouts
//! (per-head matrices, one fused map). Layers stack into a [`Gat`] network
//! that threads `(node_features, connectivity)` from layer to layer.
//!
//! Training loops, dataset loading and visualization live outside this
//! crate: parameters are exposed through `parameters_mut()` for an external
//! optimizer, and per-edge attention weights can be retained for external
//! inspection via `log_attention_weights`.
//!
//! # Quick Start
//!
//! ```
//! use atender::{Connectivity, EdgeList, Gat, GatConfig, LayerKind};
//! use atender::tensor::Tensor;
//!
//! // Two layers: 3 input features -> 8 features x 4 heads -> 2 classes
//! let config = GatConfig::new(2, vec![4, 1], vec![3, 8, 2])
//!     .with_layer_kind(LayerKind::SparseFused)
//!     .with_seed(42);
//! let mut gat = Gat::new(config).unwrap();
//! gat.eval(); // disable dropout for inference
//!
//! let features = Tensor::ones(&[5, 3]);
//! let edges = EdgeList::from_edge_index(&[[0, 1], [1, 2], [2, 3], [3, 4]], 5)
//!     .with_self_loops();
//!
//! let (embeddings, _connectivity) = gat
//!     .forward(&features, Connectivity::Edges(edges))
//!     .unwrap();
//! assert_eq!(embeddings.shape(), &[5, 2]);
//! ```
//!
//! # Modules
//!
//! - [`gat`]: the four layer variants, connectivity types, and the network
//! - [`nn`]: linear projection, dropout, initialization building blocks
//! - [`tensor`]: the dense row-major tensor and its kernels
//! - [`error`]: error type and `Result` alias
//!
//! # References
//!
//! - Velickovic, P., et al. (2018). Graph Attention Networks. ICLR.

pub mod error;
pub mod gat;
pub mod nn;
pub mod tensor;

pub use error::{AtenderError, Result};
pub use gat::{
    build_layer, Activation, Connectivity, ConnectivityMask, DenseFusedGat, DensePerHeadGat,
    EdgeList, Gat, GatConfig, GatLayer, GatLayerConfig, LayerKind, SparseFusedGat, SparseRawGat,
};
pub use tensor::Tensor;
