//! Loss functions in graph form.
//!
//! These are plain functions over symbolic `Tensor` handles: they append the
//! nodes that compute the error and return the handle of the scalar result.

use crate::tensor::Tensor;

/// Mean squared error over every element.
///
/// Formula: `MSE = mean((y_pred - y_true)^2)`.
///
/// # Arguments
///
/// * `y_pred` - Symbolic `Tensor` with model predictions.
/// * `y_true` - Symbolic `Tensor` with true values, same shape as `y_pred`.
pub fn mse_loss_mean(y_pred: &Tensor, y_true: &Tensor) -> Tensor {
    let error = y_pred - y_true;
    error.square().mean()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asg::NodeType;
    use crate::tensor::GraphContext;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn mse_is_a_mean_of_squares() {
        let ctx = Rc::new(RefCell::new(GraphContext::new()));
        let pred = Tensor::new_input(&ctx, "pred");
        let target = Tensor::new_input(&ctx, "target");
        let loss = mse_loss_mean(&pred, &target);

        let ctx = ctx.borrow();
        let graph = ctx.main_graph();
        let NodeType::Mean(sq) = graph.get_node(loss.node_id).unwrap().node_type else {
            panic!("loss is not a mean");
        };
        let NodeType::Multiply(a, b) = graph.get_node(sq).unwrap().node_type else {
            panic!("mean is not over a square");
        };
        assert_eq!(a, b);
        assert_eq!(
            graph.get_node(a).unwrap().node_type,
            NodeType::Subtract(pred.node_id, target.node_id)
        );
    }
}
