//! `Tensor` handles and the `GraphContext` that owns the graph they describe.
//!
//! A `Tensor` holds no data. It is the id of a node in the main ASG plus a
//! shared reference to the context, and every operation on it appends a node
//! instead of computing anything. Values only exist once a
//! [`Session`](crate::runtime::session::Session) evaluates the graph.

use crate::asg::{Asg, NodeId, NodeType, Shape, Value};
use ndarray::ArrayD;
use std::cell::RefCell;
use std::ops::{Add, Div, Mul, Sub};
use std::rc::Rc;

/// How a parameter gets its first value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Initializer {
    Constant(f32),
    /// Drawn from the session's seeded generator.
    Normal { mean: f32, std_dev: f32 },
}

/// Declaration of a trainable parameter, recorded when the node is created.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    pub node_id: NodeId,
    pub name: String,
    pub shape: Shape,
    pub init: Initializer,
}

/// Owns the main graph while it is being built.
///
/// Shared between handles as `Rc<RefCell<GraphContext>>`; both networks of
/// the experiment are built into the same context.
#[derive(Debug, Clone)]
pub struct GraphContext {
    main_graph: Asg,
    parameters: Vec<ParameterSpec>,
}

impl GraphContext {
    pub fn new() -> Self {
        Self {
            main_graph: Asg::new(0, Some("main".to_string())),
            parameters: Vec::new(),
        }
    }

    pub fn main_graph_mut(&mut self) -> &mut Asg {
        &mut self.main_graph
    }

    pub fn main_graph(&self) -> &Asg {
        &self.main_graph
    }

    /// Every declared parameter, in creation order.
    pub fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    pub fn parameter(&self, node_id: NodeId) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.node_id == node_id)
    }
}

impl Default for GraphContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Symbolic handle to a node of the main graph.
#[derive(Debug, Clone)]
pub struct Tensor {
    pub node_id: NodeId,
    pub context: Rc<RefCell<GraphContext>>,
}

impl Tensor {
    /// Placeholder fed with real data at run time.
    pub fn new_input(context: &Rc<RefCell<GraphContext>>, name: &str) -> Self {
        let mut ctx = context.borrow_mut();
        let graph = ctx.main_graph_mut();
        let node_id = graph.add_node(
            Some(name.to_string()),
            NodeType::Input { name: name.to_string() },
        );
        graph.inputs.push(node_id);
        Self { node_id, context: Rc::clone(context) }
    }

    /// Trainable parameter with a fixed shape and initializer.
    pub fn new_parameter(
        context: &Rc<RefCell<GraphContext>>,
        name: &str,
        shape: Shape,
        init: Initializer,
    ) -> Self {
        let mut ctx = context.borrow_mut();
        let graph = ctx.main_graph_mut();
        let node_id = graph.add_node(
            Some(name.to_string()),
            NodeType::Parameter { name: name.to_string() },
        );
        if let Some(node) = graph.nodes.get_mut(&node_id) {
            node.shape = Some(shape.clone());
        }
        ctx.parameters.push(ParameterSpec {
            node_id,
            name: name.to_string(),
            shape,
            init,
        });
        Self { node_id, context: Rc::clone(context) }
    }

    /// Constant embedded in the graph.
    pub fn new_literal(context: &Rc<RefCell<GraphContext>>, data: ArrayD<f32>, name: &str) -> Self {
        let node_id = context
            .borrow_mut()
            .main_graph_mut()
            .add_node(Some(name.to_string()), NodeType::Literal(Value::Tensor(data)));
        Self { node_id, context: Rc::clone(context) }
    }

    /// Scalar constant in the same context as `self`.
    pub fn scalar(&self, value: f32) -> Self {
        self.push(NodeType::Literal(Value::Scalar(value)))
    }

    /// Name the node was created with, if any.
    pub fn name(&self) -> Option<String> {
        self.context
            .borrow()
            .main_graph()
            .nodes
            .get(&self.node_id)
            .and_then(|n| n.name.clone())
    }

    fn push(&self, node_type: NodeType) -> Self {
        let node_id = self.context.borrow_mut().main_graph_mut().add_node(None, node_type);
        Self { node_id, context: Rc::clone(&self.context) }
    }

    pub fn dot(&self, other: &Tensor) -> Self {
        self.push(NodeType::MatrixMultiply(self.node_id, other.node_id))
    }

    pub fn relu(&self) -> Self {
        self.push(NodeType::ReLU(self.node_id))
    }

    pub fn sqrt(&self) -> Self {
        self.push(NodeType::Sqrt(self.node_id))
    }

    pub fn neg(&self) -> Self {
        self.push(NodeType::Negate(self.node_id))
    }

    pub fn square(&self) -> Self {
        self * self
    }

    /// Mean of all elements.
    pub fn mean(&self) -> Self {
        self.push(NodeType::Mean(self.node_id))
    }

    /// Mean along `axis`, which is kept with length 1.
    pub fn mean_axis(&self, axis: usize) -> Self {
        self.push(NodeType::MeanAxis(self.node_id, axis))
    }

    /// Population mean and variance along `axis` (both keepdim).
    pub fn moments(&self, axis: usize) -> (Tensor, Tensor) {
        let mean = self.mean_axis(axis);
        let centered = self - &mean;
        let variance = centered.square().mean_axis(axis);
        (mean, variance)
    }

    pub fn transpose(&self, axis1: usize, axis2: usize) -> Self {
        self.push(NodeType::Transpose(self.node_id, axis1, axis2))
    }
}

impl Add<&Tensor> for &Tensor {
    type Output = Tensor;
    fn add(self, rhs: &Tensor) -> Tensor {
        self.push(NodeType::Add(self.node_id, rhs.node_id))
    }
}

impl Sub<&Tensor> for &Tensor {
    type Output = Tensor;
    fn sub(self, rhs: &Tensor) -> Tensor {
        self.push(NodeType::Subtract(self.node_id, rhs.node_id))
    }
}

impl Mul<&Tensor> for &Tensor {
    type Output = Tensor;
    fn mul(self, rhs: &Tensor) -> Tensor {
        self.push(NodeType::Multiply(self.node_id, rhs.node_id))
    }
}

impl Div<&Tensor> for &Tensor {
    type Output = Tensor;
    fn div(self, rhs: &Tensor) -> Tensor {
        self.push(NodeType::Divide(self.node_id, rhs.node_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Rc<RefCell<GraphContext>> {
        Rc::new(RefCell::new(GraphContext::new()))
    }

    #[test]
    fn operations_append_nodes() {
        let context = ctx();
        let x = Tensor::new_input(&context, "x");
        let w = Tensor::new_parameter(&context, "w", vec![1, 3], Initializer::Constant(0.0));
        let y = x.dot(&w).relu();

        let graph = context.borrow().main_graph().clone();
        assert_eq!(graph.len(), 4);
        assert_eq!(graph.inputs, vec![x.node_id]);
        assert_eq!(graph.get_node(y.node_id).unwrap().node_type, NodeType::ReLU(y.node_id - 1));
    }

    #[test]
    fn parameters_are_declared_with_shape() {
        let context = ctx();
        let w = Tensor::new_parameter(
            &context,
            "layer0.weights",
            vec![2, 4],
            Initializer::Normal { mean: 0.0, std_dev: 1.0 },
        );
        let ctx = context.borrow();
        let spec = ctx.parameter(w.node_id).unwrap();
        assert_eq!(spec.name, "layer0.weights");
        assert_eq!(ctx.main_graph().shape_of(w.node_id).unwrap(), &vec![2, 4]);
        assert_eq!(w.name().as_deref(), Some("layer0.weights"));
    }

    #[test]
    fn moments_reduce_along_the_requested_axis() {
        let context = ctx();
        let x = Tensor::new_input(&context, "x");
        let (mean, var) = x.moments(0);
        let ctx = context.borrow();
        let graph = ctx.main_graph();
        assert_eq!(graph.get_node(mean.node_id).unwrap().node_type, NodeType::MeanAxis(x.node_id, 0));
        assert!(matches!(graph.get_node(var.node_id).unwrap().node_type, NodeType::MeanAxis(_, 0)));
    }
}
