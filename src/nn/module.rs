//! The `Module` trait: common interface for parameterized layers.

use crate::tensor::Tensor;

/// Interface for neural network layers.
///
/// A module owns its parameter tensors and exposes them as flat lists so an
/// external optimizer can read and update them. Modules with stochastic
/// behavior (dropout) switch between training and evaluation mode via
/// [`train`](Module::train) / [`eval`](Module::eval).
pub trait Module {
    /// Forward pass on a single input tensor.
    fn forward(&self, input: &Tensor) -> Tensor;

    /// All parameter tensors of this module.
    fn parameters(&self) -> Vec<&Tensor> {
        Vec::new()
    }

    /// Mutable references to all parameter tensors, for external updates.
    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        Vec::new()
    }

    /// Switch to training mode.
    fn train(&mut self) {}

    /// Switch to evaluation mode.
    fn eval(&mut self) {}

    /// Whether the module is in training mode.
    fn training(&self) -> bool {
        true
    }

    /// Total number of scalar parameters.
    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.numel()).sum()
    }
}
