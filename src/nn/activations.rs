//! Activation layers in graph form.

use crate::nn::module::Module;
use crate::tensor::Tensor;

/// Rectified linear unit, `max(0, x)` element-wise. No parameters.
pub struct ReLU;

impl ReLU {
    /// Parameterless; `ReLU` and `ReLU::new()` are the same thing.
    pub fn new() -> Self {
        ReLU
    }
}

impl Default for ReLU {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for ReLU {
    fn forward(&self, inputs: &Tensor) -> Tensor {
        inputs.relu()
    }

    fn parameters(&self) -> Vec<Tensor> {
        Vec::new()
    }
}
