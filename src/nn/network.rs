//! The fully connected regression network used in the comparison.

use crate::config::NetworkConfig;
use crate::losses::mse_loss_mean;
use crate::nn::{BatchNorm, Linear, Module, ReLU};
use crate::optimizers::{Sgd, TrainOp};
use crate::tensor::{GraphContext, Tensor};
use std::cell::RefCell;
use std::rc::Rc;

/// Handles of one built network.
#[derive(Debug)]
pub struct Network {
    /// Prefix of every parameter name.
    pub name: String,
    /// Whether batch normalization was inserted.
    pub normalize: bool,
    /// One plain gradient-descent step over `parameters`.
    pub train_op: TrainOp,
    /// Mean squared error over the batch.
    pub loss: Tensor,
    /// `[batch, 1]` output column.
    pub prediction: Tensor,
    /// What each hidden layer receives: the (possibly normalized) raw input
    /// first, then the output of every hidden layer. The output layer's input
    /// is the last entry.
    pub layer_inputs: Vec<Tensor>,
    /// Every trainable parameter, in declaration order.
    pub parameters: Vec<Tensor>,
}

impl Network {
    /// Builds `config.n_layers` hidden layers of `config.n_hidden` ReLU units
    /// and a linear output column on top of `xs`, plus the loss against `ys`.
    ///
    /// With `config.normalize`, the raw input is batch-normalized and every
    /// hidden layer normalizes its linear output before the activation. The
    /// output layer is never normalized.
    pub fn build(
        ctx: &Rc<RefCell<GraphContext>>,
        xs: &Tensor,
        ys: &Tensor,
        config: &NetworkConfig,
        name: &str,
    ) -> Self {
        let mut parameters = Vec::new();
        let relu = ReLU::new();

        let input = if config.normalize {
            let bn = BatchNorm::with_eps(ctx, 1, &format!("{name}.input"), config.epsilon);
            parameters.extend(bn.parameters());
            bn.forward(xs)
        } else {
            xs.clone()
        };

        let mut layer_inputs = vec![input];
        let mut in_size = 1;
        for i in 0..config.n_layers {
            let layer_name = format!("{name}.layer{i}");
            let linear = Linear::new(ctx, in_size, config.n_hidden, &layer_name);
            parameters.extend(linear.parameters());

            let mut h = linear.forward(&layer_inputs[i]);
            if config.normalize {
                let bn = BatchNorm::with_eps(ctx, config.n_hidden, &layer_name, config.epsilon);
                parameters.extend(bn.parameters());
                h = bn.forward(&h);
            }
            layer_inputs.push(relu.forward(&h));
            in_size = config.n_hidden;
        }

        let output = Linear::new(ctx, in_size, 1, &format!("{name}.output"));
        parameters.extend(output.parameters());
        let prediction = output.forward(&layer_inputs[config.n_layers]);

        let loss = mse_loss_mean(&prediction, ys);
        let train_op = Sgd::new(config.learning_rate).minimize(&loss, &parameters);

        Self {
            name: name.to_string(),
            normalize: config.normalize,
            train_op,
            loss,
            prediction,
            layer_inputs,
            parameters,
        }
    }

    /// `layer_inputs` as plain references, for `Session::run`.
    pub fn layer_input_refs(&self) -> Vec<&Tensor> {
        self.layer_inputs.iter().collect()
    }
}
