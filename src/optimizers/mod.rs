//! Optimizers that update parameter values.
//!
//! Optimizers work on concrete values (`Value`) on the host: they receive the
//! current parameters and their gradients, both keyed by parameter name, and
//! apply their update rule in place.

use crate::asg::{NodeId, Shape, Value};
use crate::tensor::Tensor;
use std::collections::HashMap;
use thiserror::Error;

/// A gradient that cannot be applied to its parameter. Every one of these
/// points at a gradient graph that disagrees with the forward graph.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OptimizerError {
    #[error("gradient for unknown parameter '{0}'")]
    UnknownParameter(String),
    #[error("gradient of '{name}' has shape {gradient:?}, parameter has {parameter:?}")]
    ShapeMismatch { name: String, parameter: Shape, gradient: Shape },
}

/// Common interface of every optimizer.
pub trait Optimizer {
    /// Applies one update.
    ///
    /// * `parameters` - current values, keyed by parameter name
    ///   (e.g. `"bn.layer1.weights"`).
    /// * `gradients` - gradients of the loss for some of those parameters.
    ///
    /// Every gradient is checked before any parameter changes, so a failed
    /// step leaves `parameters` untouched.
    fn step(
        &self,
        parameters: &mut HashMap<String, Value>,
        gradients: &HashMap<String, Value>,
    ) -> Result<(), OptimizerError>;
}

/// Stochastic gradient descent: `param -= lr * grad`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sgd {
    lr: f32,
}

impl Sgd {
    pub fn new(lr: f32) -> Self {
        Self { lr }
    }

    pub fn learning_rate(&self) -> f32 {
        self.lr
    }

    /// Training handle that minimizes `loss` over `var_list`.
    pub fn minimize(self, loss: &Tensor, var_list: &[Tensor]) -> TrainOp {
        TrainOp {
            loss: loss.node_id,
            var_list: var_list.iter().map(|t| t.node_id).collect(),
            optimizer: Box::new(self),
        }
    }
}

impl Optimizer for Sgd {
    fn step(
        &self,
        parameters: &mut HashMap<String, Value>,
        gradients: &HashMap<String, Value>,
    ) -> Result<(), OptimizerError> {
        for (name, grad) in gradients {
            let param = parameters
                .get(name)
                .ok_or_else(|| OptimizerError::UnknownParameter(name.clone()))?;
            if param.shape() != grad.shape() {
                return Err(OptimizerError::ShapeMismatch {
                    name: name.clone(),
                    parameter: param.shape(),
                    gradient: grad.shape(),
                });
            }
        }

        for (name, grad) in gradients {
            let grad = grad.as_array();
            match parameters.get_mut(name) {
                Some(Value::Tensor(param)) => {
                    ndarray::azip!((p in param, &g in &*grad) *p -= self.lr * g);
                }
                Some(Value::Scalar(param)) => *param -= self.lr * grad.sum(),
                None => {}
            }
        }
        Ok(())
    }
}

/// One optimization step of a loss over a set of parameters, run through
/// [`Session::run_train`](crate::runtime::session::Session::run_train).
pub struct TrainOp {
    pub loss: NodeId,
    pub var_list: Vec<NodeId>,
    pub optimizer: Box<dyn Optimizer>,
}

impl std::fmt::Debug for TrainOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainOp")
            .field("loss", &self.loss)
            .field("var_list", &self.var_list)
            .finish_non_exhaustive()
    }
}
