//! Module defining the core `Module` trait for all network layers.

use crate::tensor::Tensor;

/// Common interface of every layer.
///
/// In the graph-based architecture a `Module` is any component that adds a
/// fixed pattern of operations and parameters to the graph.
pub trait Module {
    /// Symbolic forward pass: appends this layer's nodes after `inputs`.
    fn forward(&self, inputs: &Tensor) -> Tensor;

    /// Trainable parameters owned by this module.
    fn parameters(&self) -> Vec<Tensor>;
}
