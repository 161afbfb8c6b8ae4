//! ASG: Abstract Semantic Graph.
//!
//! The intermediate representation every other layer of the engine works on.
//! Nodes are appended in creation order, so a node only ever references nodes
//! with smaller ids of the same graph (or, for [`NodeType::External`], nodes of
//! another graph that has already been evaluated).

use ndarray::{arr0, ArrayD};
use std::borrow::Cow;
use std::collections::HashMap;
use thiserror::Error;

/// Node identifier inside one graph.
pub type NodeId = usize;
/// Graph identifier.
pub type AsgId = usize;
/// Tensor shape.
pub type Shape = Vec<usize>;

pub type AsgResult<T> = std::result::Result<T, AsgError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AsgError {
    #[error("node {0} not found")]
    NodeNotFound(NodeId),
    #[error("node {0} has no shape information")]
    InvalidShape(NodeId),
    #[error("graph contains a cycle through node {0}")]
    Cycle(NodeId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Duplicates the map key so that callers holding a `&Node` know its id.
    pub id: NodeId,
    pub name: Option<String>,
    pub node_type: NodeType,
    pub shape: Option<Shape>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeType {
    // Leaves
    Input { name: String },
    Parameter { name: String },
    Literal(Value),
    External { name: String, source_asg_id: AsgId, source_node_id: NodeId },

    // Binary, numpy-style broadcasting
    Add(NodeId, NodeId),
    Subtract(NodeId, NodeId),
    Multiply(NodeId, NodeId),
    Divide(NodeId, NodeId),
    MatrixMultiply(NodeId, NodeId),
    /// 1.0 where lhs > rhs, 0.0 elsewhere.
    GreaterThan(NodeId, NodeId),

    // Unary
    Negate(NodeId),
    Sqrt(NodeId),
    ReLU(NodeId),

    // Reductions
    /// Mean over every element, producing a scalar.
    Mean(NodeId),
    /// Mean over one axis, keeping it with length 1.
    MeanAxis(NodeId, usize),

    // Transformations
    Transpose(NodeId, usize, usize),
    /// Broadcast the first operand to the shape of the second.
    Broadcast(NodeId, NodeId),
    /// Sum the first operand down to the shape of the second.
    ReduceSumTo(NodeId, NodeId),
}

impl NodeType {
    /// Operand ids in evaluation order. Leaves have none.
    pub fn inputs(&self) -> Vec<NodeId> {
        match self {
            NodeType::Input { .. }
            | NodeType::Parameter { .. }
            | NodeType::Literal(_)
            | NodeType::External { .. } => vec![],

            NodeType::Add(a, b)
            | NodeType::Subtract(a, b)
            | NodeType::Multiply(a, b)
            | NodeType::Divide(a, b)
            | NodeType::MatrixMultiply(a, b)
            | NodeType::GreaterThan(a, b)
            | NodeType::Broadcast(a, b)
            | NodeType::ReduceSumTo(a, b) => vec![*a, *b],

            NodeType::Negate(a)
            | NodeType::Sqrt(a)
            | NodeType::ReLU(a)
            | NodeType::Mean(a)
            | NodeType::MeanAxis(a, _)
            | NodeType::Transpose(a, _, _) => vec![*a],
        }
    }

    /// Short operator label used in logs and error messages.
    pub fn label(&self) -> &'static str {
        match self {
            NodeType::Input { .. } => "Input",
            NodeType::Parameter { .. } => "Parameter",
            NodeType::Literal(_) => "Literal",
            NodeType::External { .. } => "External",
            NodeType::Add(..) => "Add",
            NodeType::Subtract(..) => "Subtract",
            NodeType::Multiply(..) => "Multiply",
            NodeType::Divide(..) => "Divide",
            NodeType::MatrixMultiply(..) => "MatrixMultiply",
            NodeType::GreaterThan(..) => "GreaterThan",
            NodeType::Negate(_) => "Negate",
            NodeType::Sqrt(_) => "Sqrt",
            NodeType::ReLU(_) => "ReLU",
            NodeType::Mean(_) => "Mean",
            NodeType::MeanAxis(..) => "MeanAxis",
            NodeType::Transpose(..) => "Transpose",
            NodeType::Broadcast(..) => "Broadcast",
            NodeType::ReduceSumTo(..) => "ReduceSumTo",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Tensor(ArrayD<f32>),
    Scalar(f32),
}

impl Value {
    /// View the value as an array; scalars become 0-d arrays.
    pub fn as_array(&self) -> Cow<'_, ArrayD<f32>> {
        match self {
            Value::Tensor(arr) => Cow::Borrowed(arr),
            Value::Scalar(v) => Cow::Owned(arr0(*v).into_dyn()),
        }
    }

    pub fn into_array(self) -> ArrayD<f32> {
        match self {
            Value::Tensor(arr) => arr,
            Value::Scalar(v) => arr0(v).into_dyn(),
        }
    }

    pub fn shape(&self) -> Shape {
        match self {
            Value::Tensor(arr) => arr.shape().to_vec(),
            Value::Scalar(_) => vec![],
        }
    }
}

impl From<ArrayD<f32>> for Value {
    fn from(arr: ArrayD<f32>) -> Self {
        Value::Tensor(arr)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Asg {
    pub id: AsgId,
    pub name: Option<String>,
    pub nodes: HashMap<NodeId, Node>,
    pub inputs: Vec<NodeId>,
    pub outputs: Vec<NodeId>,
}

impl Asg {
    pub fn new(id: AsgId, name: Option<String>) -> Self {
        Self { id, name, nodes: HashMap::new(), inputs: vec![], outputs: vec![] }
    }

    pub fn add_node(&mut self, name: Option<String>, node_type: NodeType) -> NodeId {
        let id = self.nodes.len();
        // Literals know their shape up front, everything else waits for inference.
        let shape = match &node_type {
            NodeType::Literal(value) => Some(value.shape()),
            _ => None,
        };
        self.nodes.insert(id, Node { id, name, node_type, shape });
        id
    }

    pub fn set_outputs(&mut self, outputs: Vec<NodeId>) {
        self.outputs = outputs;
    }

    pub fn set_output(&mut self, output: NodeId) {
        self.set_outputs(vec![output]);
    }

    pub fn get_node(&self, id: NodeId) -> AsgResult<&Node> {
        self.nodes.get(&id).ok_or(AsgError::NodeNotFound(id))
    }

    pub fn get_node_mut(&mut self, id: NodeId) -> AsgResult<&mut Node> {
        self.nodes.get_mut(&id).ok_or(AsgError::NodeNotFound(id))
    }

    pub fn shape_of(&self, id: NodeId) -> AsgResult<&Shape> {
        self.get_node(id)?.shape.as_ref().ok_or(AsgError::InvalidShape(id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Named leaves (`Input` and `Parameter`) as `(id, name, is_parameter)`,
    /// ordered by id.
    pub fn named_leaves(&self) -> Vec<(NodeId, &str, bool)> {
        let mut leaves: Vec<_> = self
            .nodes
            .values()
            .filter_map(|node| match &node.node_type {
                NodeType::Input { name } => Some((node.id, name.as_str(), false)),
                NodeType::Parameter { name } => Some((node.id, name.as_str(), true)),
                _ => None,
            })
            .collect();
        leaves.sort_by_key(|(id, _, _)| *id);
        leaves
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_follow_insertion_order() {
        let mut asg = Asg::new(0, Some("main".into()));
        let x = asg.add_node(Some("x".into()), NodeType::Input { name: "x".into() });
        let y = asg.add_node(None, NodeType::ReLU(x));
        assert_eq!((x, y), (0, 1));
        assert_eq!(asg.get_node(y).unwrap().node_type.inputs(), vec![x]);
        assert_eq!(asg.get_node(7), Err(AsgError::NodeNotFound(7)));
    }

    #[test]
    fn literal_nodes_carry_their_shape() {
        let mut asg = Asg::new(0, None);
        let s = asg.add_node(None, NodeType::Literal(Value::Scalar(2.0)));
        let t = asg.add_node(
            None,
            NodeType::Literal(Value::Tensor(ArrayD::zeros(ndarray::IxDyn(&[3, 2])))),
        );
        assert_eq!(asg.shape_of(s).unwrap(), &Vec::<usize>::new());
        assert_eq!(asg.shape_of(t).unwrap(), &vec![3, 2]);
    }

    #[test]
    fn named_leaves_are_sorted_and_tagged() {
        let mut asg = Asg::new(0, None);
        asg.add_node(None, NodeType::Parameter { name: "w".into() });
        asg.add_node(None, NodeType::Input { name: "x".into() });
        asg.add_node(None, NodeType::ReLU(1));
        assert_eq!(asg.named_leaves(), vec![(0, "w", true), (1, "x", false)]);
    }

    #[test]
    fn scalar_value_views_as_zero_dim_array() {
        let v = Value::Scalar(3.5);
        assert_eq!(v.as_array().ndim(), 0);
        assert_eq!(v.into_array().sum(), 3.5);
    }
}
