//! Autograd: builds the graph of d(loss)/d(parameter).
//!
//! The algorithm:
//!  - walk the forward graph in reverse topological order, starting from the
//!    loss with a seed gradient of 1.0;
//!  - for every node holding an upstream gradient, append the nodes computing
//!    its operands' contributions to a separate gradient ASG and accumulate
//!    contributions that reach the same operand;
//!  - forward values the derivatives need (operands of `Multiply`, the mask of
//!    `ReLU`, ...) are referenced through `External` nodes, so the gradient
//!    graph is evaluated with the forward memo as its starting point.
//!
//! Only nodes lying on a path to one of the requested parameters receive
//! gradients; inputs and targets are skipped entirely.
//!
//! The forward graph must have been through shape inference: mean reductions
//! read their element counts from it.

use crate::asg::{Asg, AsgError, AsgId, NodeId, NodeType, Value};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::analysis::shape_inference::{ShapeInference, ShapeInferenceError};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AutogradError {
    #[error("ASG: {0}")]
    Asg(#[from] AsgError),
    #[error("shape: {0}")]
    Shape(#[from] ShapeInferenceError),
}

pub type AutogradResult<T> = Result<T, AutogradError>;

/// Builder of a gradient graph for one forward graph.
pub struct Gradients<'a> {
    /// Forward graph, with shapes.
    src: &'a Asg,
    /// Gradient graph under construction.
    grad: Asg,
    /// Forward node -> accumulated gradient node (in `grad`).
    gmap: HashMap<NodeId, NodeId>,
    /// Forward node -> its `External` image (in `grad`).
    images: HashMap<NodeId, NodeId>,
}

impl<'a> Gradients<'a> {
    pub fn new(src: &'a Asg, grad_id: AsgId) -> Self {
        Self {
            src,
            grad: Asg::new(grad_id, Some("grad".to_string())),
            gmap: HashMap::new(),
            images: HashMap::new(),
        }
    }

    /// Builds the gradient graph of `loss_id` with respect to `wrt`.
    ///
    /// The returned graph's outputs are the gradients in the order of `wrt`,
    /// each with the shape of its parameter. A parameter the loss does not
    /// depend on gets an explicit zero gradient.
    pub fn build(mut self, loss_id: NodeId, wrt: &[NodeId]) -> AutogradResult<Asg> {
        let order = ShapeInference::schedule(self.src, &[loss_id])?;
        let needs_grad = self.needs_grad(&order, wrt)?;

        let seed = self.lit_scalar(1.0);
        self.gmap.insert(loss_id, seed);

        for &id in order.iter().rev() {
            let g_out = match self.gmap.get(&id).copied() {
                Some(g) => g,
                None => continue,
            };
            let node_type = self.src.get_node(id)?.node_type.clone();
            let wants = |n: &NodeId| needs_grad.contains(n);

            match node_type {
                NodeType::Input { .. }
                | NodeType::Parameter { .. }
                | NodeType::Literal(_)
                | NodeType::External { .. } => {}

                NodeType::Add(a, b) => {
                    if wants(&a) {
                        let ra = self.reduce_to(g_out, id, a)?;
                        self.acc(a, ra);
                    }
                    if wants(&b) {
                        let rb = self.reduce_to(g_out, id, b)?;
                        self.acc(b, rb);
                    }
                }
                NodeType::Subtract(a, b) => {
                    if wants(&a) {
                        let ra = self.reduce_to(g_out, id, a)?;
                        self.acc(a, ra);
                    }
                    if wants(&b) {
                        let neg = self.add_node(NodeType::Negate(g_out));
                        let rb = self.reduce_to(neg, id, b)?;
                        self.acc(b, rb);
                    }
                }
                NodeType::Multiply(a, b) => {
                    if wants(&a) {
                        let b_im = self.image(b)?;
                        let g_a = self.add_node(NodeType::Multiply(g_out, b_im));
                        let ra = self.reduce_to(g_a, id, a)?;
                        self.acc(a, ra);
                    }
                    if wants(&b) {
                        let a_im = self.image(a)?;
                        let g_b = self.add_node(NodeType::Multiply(g_out, a_im));
                        let rb = self.reduce_to(g_b, id, b)?;
                        self.acc(b, rb);
                    }
                }
                NodeType::Divide(a, b) => {
                    let b_im = self.image(b)?;
                    if wants(&a) {
                        // d(a/b)/da = 1/b
                        let g_a = self.add_node(NodeType::Divide(g_out, b_im));
                        let ra = self.reduce_to(g_a, id, a)?;
                        self.acc(a, ra);
                    }
                    if wants(&b) {
                        // d(a/b)/db = -(a/b)/b
                        let y_im = self.image(id)?;
                        let y_over_b = self.add_node(NodeType::Divide(y_im, b_im));
                        let scaled = self.add_node(NodeType::Multiply(g_out, y_over_b));
                        let g_b = self.add_node(NodeType::Negate(scaled));
                        let rb = self.reduce_to(g_b, id, b)?;
                        self.acc(b, rb);
                    }
                }
                NodeType::MatrixMultiply(a, b) => {
                    if wants(&a) {
                        // g_a = g_out @ b^T
                        let b_im = self.image(b)?;
                        let bt = self.add_node(NodeType::Transpose(b_im, 0, 1));
                        let g_a = self.add_node(NodeType::MatrixMultiply(g_out, bt));
                        self.acc(a, g_a);
                    }
                    if wants(&b) {
                        // g_b = a^T @ g_out
                        let a_im = self.image(a)?;
                        let at = self.add_node(NodeType::Transpose(a_im, 0, 1));
                        let g_b = self.add_node(NodeType::MatrixMultiply(at, g_out));
                        self.acc(b, g_b);
                    }
                }
                // Piecewise constant.
                NodeType::GreaterThan(..) => {}

                NodeType::Negate(x) => {
                    if wants(&x) {
                        let g_x = self.add_node(NodeType::Negate(g_out));
                        self.acc(x, g_x);
                    }
                }
                NodeType::Sqrt(x) => {
                    if wants(&x) {
                        // d sqrt(x)/dx = 1 / (2 sqrt(x)), reusing the forward result
                        let y_im = self.image(id)?;
                        let two = self.lit_scalar(2.0);
                        let denom = self.add_node(NodeType::Multiply(two, y_im));
                        let g_x = self.add_node(NodeType::Divide(g_out, denom));
                        self.acc(x, g_x);
                    }
                }
                NodeType::ReLU(x) => {
                    if wants(&x) {
                        let zero = self.lit_scalar(0.0);
                        let x_im = self.image(x)?;
                        let mask = self.add_node(NodeType::GreaterThan(x_im, zero));
                        let g_x = self.add_node(NodeType::Multiply(g_out, mask));
                        self.acc(x, g_x);
                    }
                }

                NodeType::Mean(x) => {
                    if wants(&x) {
                        let n: usize = self.src.shape_of(x)?.iter().product();
                        let g_x = self.scaled_broadcast(g_out, x, n)?;
                        self.acc(x, g_x);
                    }
                }
                NodeType::MeanAxis(x, axis) => {
                    if wants(&x) {
                        let shape = self.src.shape_of(x)?;
                        let n = *shape.get(axis).ok_or(AsgError::InvalidShape(x))?;
                        let g_x = self.scaled_broadcast(g_out, x, n)?;
                        self.acc(x, g_x);
                    }
                }

                NodeType::Transpose(x, a1, a2) => {
                    if wants(&x) {
                        let g_x = self.add_node(NodeType::Transpose(g_out, a2, a1));
                        self.acc(x, g_x);
                    }
                }
                NodeType::Broadcast(x, _) => {
                    if wants(&x) {
                        let x_im = self.image(x)?;
                        let g_x = self.add_node(NodeType::ReduceSumTo(g_out, x_im));
                        self.acc(x, g_x);
                    }
                }
                NodeType::ReduceSumTo(x, _) => {
                    if wants(&x) {
                        let x_im = self.image(x)?;
                        let g_x = self.add_node(NodeType::Broadcast(g_out, x_im));
                        self.acc(x, g_x);
                    }
                }
            }
        }

        let mut outputs = Vec::with_capacity(wrt.len());
        for &param in wrt {
            let g = match self.gmap.get(&param).copied() {
                Some(g) => g,
                None => {
                    let zero = self.lit_scalar(0.0);
                    let p_im = self.image(param)?;
                    self.add_node(NodeType::Broadcast(zero, p_im))
                }
            };
            // Gradients carry the parameter's name, like the parameter itself.
            if let NodeType::Parameter { name } | NodeType::Input { name } =
                &self.src.get_node(param)?.node_type
            {
                self.grad.get_node_mut(g)?.name = Some(format!("grad/{name}"));
            }
            outputs.push(g);
        }
        self.grad.set_outputs(outputs);
        Ok(self.grad)
    }

    /// Nodes of `order` that are, or depend on, one of `wrt`.
    fn needs_grad(&self, order: &[NodeId], wrt: &[NodeId]) -> AutogradResult<HashSet<NodeId>> {
        let mut set: HashSet<NodeId> = wrt.iter().copied().collect();
        for &id in order {
            let node = self.src.get_node(id)?;
            if node.node_type.inputs().iter().any(|i| set.contains(i)) {
                set.insert(id);
            }
        }
        Ok(set)
    }

    fn add_node(&mut self, node_type: NodeType) -> NodeId {
        self.grad.add_node(None, node_type)
    }

    fn lit_scalar(&mut self, v: f32) -> NodeId {
        self.grad.add_node(None, NodeType::Literal(Value::Scalar(v)))
    }

    /// `External` node standing for the value of forward node `src_id`.
    fn image(&mut self, src_id: NodeId) -> AutogradResult<NodeId> {
        if let Some(&existing) = self.images.get(&src_id) {
            return Ok(existing);
        }
        let shape = self.src.shape_of(src_id)?.clone();
        let id = self.grad.add_node(
            Some(format!("external_{}_{}", self.src.id, src_id)),
            NodeType::External {
                name: format!("external_{}_{}", self.src.id, src_id),
                source_asg_id: self.src.id,
                source_node_id: src_id,
            },
        );
        self.grad.get_node_mut(id)?.shape = Some(shape);
        self.images.insert(src_id, id);
        Ok(id)
    }

    /// dL/d(target) += contrib
    fn acc(&mut self, target: NodeId, contrib: NodeId) {
        let total = match self.gmap.get(&target).copied() {
            Some(prev) => self.add_node(NodeType::Add(prev, contrib)),
            None => contrib,
        };
        self.gmap.insert(target, total);
    }

    /// Sums `g` (shaped like forward node `out`) down to the shape of operand
    /// `src`, undoing any broadcast the forward op applied.
    fn reduce_to(&mut self, g: NodeId, out: NodeId, src: NodeId) -> AutogradResult<NodeId> {
        if self.src.shape_of(out)? == self.src.shape_of(src)? {
            return Ok(g);
        }
        let src_im = self.image(src)?;
        Ok(self.add_node(NodeType::ReduceSumTo(g, src_im)))
    }

    /// `broadcast(g / n)` to the shape of forward node `x`: the adjoint of a mean.
    fn scaled_broadcast(&mut self, g: NodeId, x: NodeId, n: usize) -> AutogradResult<NodeId> {
        let inv_n = self.lit_scalar(1.0 / n.max(1) as f32);
        let scaled = self.add_node(NodeType::Multiply(g, inv_n));
        let x_im = self.image(x)?;
        Ok(self.add_node(NodeType::Broadcast(scaled, x_im)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{GraphContext, Initializer, Tensor};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn inferred(ctx: &Rc<RefCell<GraphContext>>, out: &Tensor, x_shape: Vec<usize>) -> Asg {
        let mut graph = ctx.borrow().main_graph().clone();
        graph.set_output(out.node_id);
        let shapes = HashMap::from([("x".to_string(), x_shape)]);
        ShapeInference::run(&mut graph, &shapes).unwrap();
        graph
    }

    #[test]
    fn outputs_follow_wrt_order_and_are_named() {
        let ctx = Rc::new(RefCell::new(GraphContext::new()));
        let x = Tensor::new_input(&ctx, "x");
        let w = Tensor::new_parameter(&ctx, "w", vec![1, 4], Initializer::Constant(1.0));
        let b = Tensor::new_parameter(&ctx, "b", vec![1, 4], Initializer::Constant(0.0));
        let loss = (&x.dot(&w) + &b).mean();
        let graph = inferred(&ctx, &loss, vec![8, 1]);

        let grad = Gradients::new(&graph, 1).build(loss.node_id, &[b.node_id, w.node_id]).unwrap();
        assert_eq!(grad.id, 1);
        assert_eq!(grad.outputs.len(), 2);
        let names: Vec<_> = grad
            .outputs
            .iter()
            .map(|id| grad.get_node(*id).unwrap().name.clone().unwrap())
            .collect();
        assert_eq!(names, vec!["grad/b", "grad/w"]);
    }

    #[test]
    fn inputs_receive_no_gradient_nodes() {
        let ctx = Rc::new(RefCell::new(GraphContext::new()));
        let x = Tensor::new_input(&ctx, "x");
        let w = Tensor::new_parameter(&ctx, "w", vec![1, 1], Initializer::Constant(1.0));
        let loss = x.dot(&w).square().mean();
        let graph = inferred(&ctx, &loss, vec![4, 1]);

        let grad = Gradients::new(&graph, 1).build(loss.node_id, &[w.node_id]).unwrap();
        // Only `w` flows out; no gradient is built for the `x` operand of the matmul.
        let matmuls = grad
            .nodes
            .values()
            .filter(|n| matches!(n.node_type, NodeType::MatrixMultiply(..)))
            .count();
        assert_eq!(matmuls, 1);
    }

    #[test]
    fn unrelated_parameter_gets_zero_gradient() {
        let ctx = Rc::new(RefCell::new(GraphContext::new()));
        let x = Tensor::new_input(&ctx, "x");
        let unused = Tensor::new_parameter(&ctx, "unused", vec![2, 2], Initializer::Constant(1.0));
        let loss = x.relu().mean();
        let mut graph = ctx.borrow().main_graph().clone();
        graph.set_outputs(vec![loss.node_id, unused.node_id]);
        ShapeInference::run(&mut graph, &HashMap::from([("x".to_string(), vec![3, 1])])).unwrap();

        let grad = Gradients::new(&graph, 1).build(loss.node_id, &[unused.node_id]).unwrap();
        let out = grad.get_node(grad.outputs[0]).unwrap();
        assert!(matches!(out.node_type, NodeType::Broadcast(..)));
    }

    #[test]
    fn requires_forward_shapes() {
        let ctx = Rc::new(RefCell::new(GraphContext::new()));
        let x = Tensor::new_input(&ctx, "x");
        let w = Tensor::new_parameter(&ctx, "w", vec![1, 1], Initializer::Constant(1.0));
        let loss = x.dot(&w).mean();
        let graph = ctx.borrow().main_graph().clone();

        let err = Gradients::new(&graph, 1).build(loss.node_id, &[w.node_id]).unwrap_err();
        assert!(matches!(err, AutogradError::Asg(AsgError::InvalidShape(_))));
    }
}
