//! Neural network building blocks for the attention layers.
//!
//! The module is organized around the [`Module`] trait, which defines the
//! interface shared by all parameterized layers:
//!
//! - **Layers**: [`Linear`]
//! - **Regularization**: [`Dropout`]
//! - **Initialization**: [`xavier_uniform`] and friends in [`init`]
//!
//! # Example
//!
//! ```
//! use atender::nn::{Module, Linear};
//! use atender::tensor::Tensor;
//!
//! let layer = Linear::with_seed(20, 30, Some(7));
//! let x = Tensor::ones(&[4, 20]);
//! let output = layer.forward(&x);
//! assert_eq!(output.shape(), &[4, 30]);
//! ```
//!
//! # References
//!
//! - Glorot, X., & Bengio, Y. (2010). Understanding the difficulty of training
//!   deep feedforward neural networks. AISTATS.
//! - Srivastava, N., et al. (2014). Dropout: A simple way to prevent neural
//!   networks from overfitting. JMLR.

mod dropout;
pub mod init;
mod linear;
mod module;

pub use dropout::Dropout;
pub use init::xavier_uniform;
pub use linear::Linear;
pub use module::Module;
