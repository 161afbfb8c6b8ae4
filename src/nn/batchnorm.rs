//! Batch normalization layer in graph form.

use crate::nn::Module;
use crate::tensor::{GraphContext, Initializer, Tensor};
use ndarray::arr0;
use std::cell::RefCell;
use std::rc::Rc;

/// Default variance epsilon.
pub const DEFAULT_EPS: f32 = 0.001;

/// Batch normalization.
///
/// Normalizes every feature over the batch axis (axis 0):
/// `y = gamma * (x - mean) / sqrt(var + eps) + beta`, with `gamma` starting
/// at one and `beta` at zero, both shaped `[1, features]`.
///
/// The statistics are always those of the batch being evaluated. No running
/// averages are kept, so inference on a different batch (e.g. a held-out grid)
/// normalizes with that batch's own statistics.
pub struct BatchNorm {
    /// Per-feature scale, `"{name}.gamma"`.
    pub gamma: Tensor,
    /// Per-feature shift, `"{name}.beta"`.
    pub beta: Tensor,
    /// Literal added to the variance before the square root.
    eps: Tensor,
    pub name: String,
}

impl BatchNorm {
    /// Batch normalization over `features` columns with [`DEFAULT_EPS`].
    pub fn new(ctx: &Rc<RefCell<GraphContext>>, features: usize, name: &str) -> Self {
        Self::with_eps(ctx, features, name, DEFAULT_EPS)
    }

    /// Same as [`BatchNorm::new`] with an explicit variance epsilon.
    pub fn with_eps(ctx: &Rc<RefCell<GraphContext>>, features: usize, name: &str, eps: f32) -> Self {
        let gamma = Tensor::new_parameter(
            ctx,
            &format!("{name}.gamma"),
            vec![1, features],
            Initializer::Constant(1.0),
        );
        let beta = Tensor::new_parameter(
            ctx,
            &format!("{name}.beta"),
            vec![1, features],
            Initializer::Constant(0.0),
        );
        let eps = Tensor::new_literal(ctx, arr0(eps).into_dyn(), &format!("{name}.eps"));

        Self { gamma, beta, eps, name: name.to_string() }
    }
}

impl Module for BatchNorm {
    /// Appends the normalization of `x` (`[batch, features]`) to the graph.
    ///
    /// Mean and variance are taken over axis 0 and kept as `[1, features]`
    /// rows, so every step broadcasts over the batch. Gradients flow through
    /// the statistics as well.
    fn forward(&self, x: &Tensor) -> Tensor {
        let (mean, variance) = x.moments(0);
        let centered = x - &mean;
        let std = (&variance + &self.eps).sqrt();
        let normalized = &centered / &std;
        &(&normalized * &self.gamma) + &self.beta
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![self.gamma.clone(), self.beta.clone()]
    }
}
