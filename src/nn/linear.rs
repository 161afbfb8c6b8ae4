//! Fully connected layer in graph form.

use crate::nn::module::Module;
use crate::tensor::{GraphContext, Initializer, Tensor};
use std::cell::RefCell;
use std::rc::Rc;

/// Standard deviation of the initial weights.
pub const WEIGHT_STD_DEV: f32 = 1.0;
/// Initial value of every bias.
pub const BIAS_INIT: f32 = 0.1;

/// Fully connected layer, `y = xW + b`.
///
/// Holds no data: `weights` (`[in, out]`, drawn from N(0, 1)) and `bias`
/// (`[1, out]`, all 0.1) are `Parameter` nodes whose values live in the
/// session.
pub struct Linear {
    /// Symbolic handle of the `[in, out]` weight matrix.
    pub weights: Tensor,
    /// Symbolic handle of the `[1, out]` bias row, broadcast over the batch.
    pub bias: Tensor,
}

impl Linear {
    /// Declares the layer's parameters as `"{name}.weights"` and `"{name}.bias"`.
    ///
    /// # Arguments
    ///
    /// * `context` - graph the parameters are added to.
    /// * `in_features` - width of the incoming activations.
    /// * `out_features` - number of units.
    /// * `name` - prefix of both parameter names, e.g. `"bn.layer3"`. The part
    ///   before the first `.` selects the initialization stream.
    pub fn new(
        context: &Rc<RefCell<GraphContext>>,
        in_features: usize,
        out_features: usize,
        name: &str,
    ) -> Self {
        let weights = Tensor::new_parameter(
            context,
            &format!("{name}.weights"),
            vec![in_features, out_features],
            Initializer::Normal { mean: 0.0, std_dev: WEIGHT_STD_DEV },
        );
        let bias = Tensor::new_parameter(
            context,
            &format!("{name}.bias"),
            vec![1, out_features],
            Initializer::Constant(BIAS_INIT),
        );
        Self { weights, bias }
    }
}

impl Module for Linear {
    /// Appends `inputs.dot(weights) + bias` to the graph.
    ///
    /// `inputs` must be `[batch, in_features]`; the result is
    /// `[batch, out_features]`. Shapes are checked by shape inference, not here.
    fn forward(&self, inputs: &Tensor) -> Tensor {
        let product = inputs.dot(&self.weights);
        &product + &self.bias
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![self.weights.clone(), self.bias.clone()]
    }
}
