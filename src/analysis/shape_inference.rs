//! Shape inference.
//!
//! Walks the graph in topological order and fills in `Node::shape` for every
//! node reachable from the requested roots, rejecting shape mismatches before
//! anything is executed.

use crate::asg::{Asg, AsgError, Node, NodeId, NodeType, Shape};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShapeInferenceError {
    #[error("graph error: {0}")]
    AsgError(#[from] AsgError),

    #[error("incompatible shapes for '{op}': left operand {shape1:?}, right operand {shape2:?}")]
    IncompatibleShapes {
        op: String,
        shape1: Shape,
        shape2: Shape,
    },

    #[error("no shape supplied for '{0}'; add it to the initial shapes (or feed it)")]
    MissingInitialShape(String),

    #[error("invalid rank for node {node_id}: expected {expected}D, got {actual}D")]
    InvalidRank {
        node_id: NodeId,
        expected: usize,
        actual: usize,
    },

    #[error("axis {axis} out of range for node {node_id} of rank {rank}")]
    InvalidAxis {
        node_id: NodeId,
        axis: usize,
        rank: usize,
    },

    #[error("matrix multiplication error: incompatible inner dimensions {0} and {1}")]
    MatmulDimensionError(usize, usize),
}

type Result<T> = std::result::Result<T, ShapeInferenceError>;

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Open,
    Done,
}

pub struct ShapeInference;

impl ShapeInference {
    /// Infers shapes for everything reachable from the graph outputs, or for
    /// the whole graph when no outputs are set.
    ///
    /// `initial_shapes` maps `Input` names (and parameters declared without a
    /// shape) to their shapes.
    pub fn run(asg: &mut Asg, initial_shapes: &HashMap<String, Shape>) -> Result<()> {
        let roots = Self::default_roots(asg);
        Self::run_from(asg, &roots, initial_shapes)
    }

    /// Infers shapes for everything reachable from `roots`.
    pub fn run_from(
        asg: &mut Asg,
        roots: &[NodeId],
        initial_shapes: &HashMap<String, Shape>,
    ) -> Result<()> {
        for node_id in Self::schedule(asg, roots)? {
            let shape = Self::infer_node_shape(asg, asg.get_node(node_id)?, initial_shapes)?;
            asg.get_node_mut(node_id)?.shape = Some(shape);
        }
        Ok(())
    }

    /// Topological order of the nodes reachable from the outputs (or of every
    /// node when no outputs are set).
    pub fn topological_sort(asg: &Asg) -> Result<Vec<NodeId>> {
        Self::schedule(asg, &Self::default_roots(asg))
    }

    /// Post-order of the nodes reachable from `roots`: every node appears after
    /// all of its operands. Iterative, so deep gradient chains cannot overflow
    /// the stack.
    pub fn schedule(asg: &Asg, roots: &[NodeId]) -> Result<Vec<NodeId>> {
        let mut order = Vec::new();
        let mut marks: HashMap<NodeId, Mark> = HashMap::new();

        for &root in roots {
            let mut stack = vec![(root, false)];
            while let Some((id, expanded)) = stack.pop() {
                if expanded {
                    marks.insert(id, Mark::Done);
                    order.push(id);
                    continue;
                }
                match marks.get(&id) {
                    Some(Mark::Done) => continue,
                    Some(Mark::Open) => return Err(AsgError::Cycle(id).into()),
                    None => {}
                }
                marks.insert(id, Mark::Open);
                stack.push((id, true));
                for input in asg.get_node(id)?.node_type.inputs().into_iter().rev() {
                    match marks.get(&input) {
                        Some(Mark::Done) => {}
                        Some(Mark::Open) => return Err(AsgError::Cycle(input).into()),
                        None => stack.push((input, false)),
                    }
                }
            }
        }
        Ok(order)
    }

    /// Numpy-style broadcast of two shapes, `None` when they are incompatible.
    pub fn broadcast_shapes(a: &[usize], b: &[usize]) -> Option<Shape> {
        let rank = a.len().max(b.len());
        let mut out = vec![0; rank];
        for i in 0..rank {
            let da = if i < rank - a.len() { 1 } else { a[i - (rank - a.len())] };
            let db = if i < rank - b.len() { 1 } else { b[i - (rank - b.len())] };
            out[i] = match (da, db) {
                (x, y) if x == y => x,
                (1, y) => y,
                (x, 1) => x,
                _ => return None,
            };
        }
        Some(out)
    }

    fn default_roots(asg: &Asg) -> Vec<NodeId> {
        if asg.outputs.is_empty() {
            let mut all: Vec<_> = asg.nodes.keys().copied().collect();
            all.sort_unstable();
            all
        } else {
            asg.outputs.clone()
        }
    }

    fn infer_node_shape(
        asg: &Asg,
        node: &Node,
        initial_shapes: &HashMap<String, Shape>,
    ) -> Result<Shape> {
        match &node.node_type {
            NodeType::Input { name } => initial_shapes
                .get(name)
                .or(node.shape.as_ref())
                .cloned()
                .ok_or_else(|| ShapeInferenceError::MissingInitialShape(name.clone())),

            NodeType::Parameter { name } | NodeType::External { name, .. } => node
                .shape
                .as_ref()
                .or_else(|| initial_shapes.get(name))
                .cloned()
                .ok_or_else(|| ShapeInferenceError::MissingInitialShape(name.clone())),

            NodeType::Literal(value) => Ok(value.shape()),

            NodeType::Add(l, r)
            | NodeType::Subtract(l, r)
            | NodeType::Multiply(l, r)
            | NodeType::Divide(l, r)
            | NodeType::GreaterThan(l, r) => {
                let ls = Self::shape(asg, *l)?;
                let rs = Self::shape(asg, *r)?;
                Self::broadcast_shapes(&ls, &rs).ok_or(ShapeInferenceError::IncompatibleShapes {
                    op: node.node_type.label().to_string(),
                    shape1: ls,
                    shape2: rs,
                })
            }

            NodeType::MatrixMultiply(l, r) => {
                let ls = Self::shape(asg, *l)?;
                let rs = Self::shape(asg, *r)?;
                for s in [&ls, &rs] {
                    if s.len() != 2 {
                        return Err(ShapeInferenceError::InvalidRank {
                            node_id: node.id,
                            expected: 2,
                            actual: s.len(),
                        });
                    }
                }
                if ls[1] != rs[0] {
                    return Err(ShapeInferenceError::MatmulDimensionError(ls[1], rs[0]));
                }
                Ok(vec![ls[0], rs[1]])
            }

            NodeType::Negate(id) | NodeType::Sqrt(id) | NodeType::ReLU(id) => Self::shape(asg, *id),

            NodeType::Mean(_) => Ok(vec![]),

            NodeType::MeanAxis(id, axis) => {
                let mut shape = Self::shape(asg, *id)?;
                Self::check_axis(node.id, *axis, &shape)?;
                shape[*axis] = 1;
                Ok(shape)
            }

            NodeType::Transpose(id, axis1, axis2) => {
                let mut shape = Self::shape(asg, *id)?;
                Self::check_axis(node.id, *axis1, &shape)?;
                Self::check_axis(node.id, *axis2, &shape)?;
                shape.swap(*axis1, *axis2);
                Ok(shape)
            }

            NodeType::Broadcast(source, target) => {
                let ss = Self::shape(asg, *source)?;
                let ts = Self::shape(asg, *target)?;
                match Self::broadcast_shapes(&ss, &ts) {
                    Some(out) if out == ts => Ok(ts),
                    _ => Err(ShapeInferenceError::IncompatibleShapes {
                        op: "Broadcast".to_string(),
                        shape1: ss,
                        shape2: ts,
                    }),
                }
            }

            NodeType::ReduceSumTo(source, target) => {
                let ss = Self::shape(asg, *source)?;
                let ts = Self::shape(asg, *target)?;
                match Self::broadcast_shapes(&ts, &ss) {
                    Some(out) if out == ss => Ok(ts),
                    _ => Err(ShapeInferenceError::IncompatibleShapes {
                        op: "ReduceSumTo".to_string(),
                        shape1: ss,
                        shape2: ts,
                    }),
                }
            }
        }
    }

    fn shape(asg: &Asg, id: NodeId) -> Result<Shape> {
        Ok(asg.shape_of(id)?.clone())
    }

    fn check_axis(node_id: NodeId, axis: usize, shape: &Shape) -> Result<()> {
        if axis >= shape.len() {
            return Err(ShapeInferenceError::InvalidAxis { node_id, axis, rank: shape.len() });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{GraphContext, Initializer, Tensor};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn shapes(entries: &[(&str, Shape)]) -> HashMap<String, Shape> {
        entries.iter().map(|(n, s)| (n.to_string(), s.clone())).collect()
    }

    #[test]
    fn broadcast_follows_numpy_rules() {
        assert_eq!(ShapeInference::broadcast_shapes(&[500, 30], &[1, 30]), Some(vec![500, 30]));
        assert_eq!(ShapeInference::broadcast_shapes(&[], &[4, 1]), Some(vec![4, 1]));
        assert_eq!(ShapeInference::broadcast_shapes(&[3], &[2, 1]), Some(vec![2, 3]));
        assert_eq!(ShapeInference::broadcast_shapes(&[2, 3], &[3, 2]), None);
    }

    #[test]
    fn infers_a_linear_layer_with_batch_moments() {
        let ctx = Rc::new(RefCell::new(GraphContext::new()));
        let x = Tensor::new_input(&ctx, "x");
        let w = Tensor::new_parameter(&ctx, "w", vec![1, 30], Initializer::Constant(1.0));
        let b = Tensor::new_parameter(&ctx, "b", vec![1, 30], Initializer::Constant(0.1));
        let h = &x.dot(&w) + &b;
        let (mean, var) = h.moments(0);
        let loss = h.relu().mean();

        let mut graph = ctx.borrow().main_graph().clone();
        graph.set_outputs(vec![mean.node_id, var.node_id, loss.node_id]);
        ShapeInference::run(&mut graph, &shapes(&[("x", vec![500, 1])])).unwrap();

        assert_eq!(graph.shape_of(h.node_id).unwrap(), &vec![500, 30]);
        assert_eq!(graph.shape_of(mean.node_id).unwrap(), &vec![1, 30]);
        assert_eq!(graph.shape_of(var.node_id).unwrap(), &vec![1, 30]);
        assert_eq!(graph.shape_of(loss.node_id).unwrap(), &Vec::<usize>::new());
    }

    #[test]
    fn rejects_mismatched_matmul() {
        let ctx = Rc::new(RefCell::new(GraphContext::new()));
        let x = Tensor::new_input(&ctx, "x");
        let w = Tensor::new_parameter(&ctx, "w", vec![3, 2], Initializer::Constant(1.0));
        let y = x.dot(&w);

        let mut graph = ctx.borrow().main_graph().clone();
        graph.set_output(y.node_id);
        let err = ShapeInference::run(&mut graph, &shapes(&[("x", vec![10, 1])])).unwrap_err();
        assert_eq!(err, ShapeInferenceError::MatmulDimensionError(1, 3));
    }

    #[test]
    fn missing_feed_shape_is_reported_by_name() {
        let ctx = Rc::new(RefCell::new(GraphContext::new()));
        let x = Tensor::new_input(&ctx, "x");
        let y = x.relu();
        let mut graph = ctx.borrow().main_graph().clone();
        graph.set_output(y.node_id);
        let err = ShapeInference::run(&mut graph, &HashMap::new()).unwrap_err();
        assert_eq!(err, ShapeInferenceError::MissingInitialShape("x".into()));
    }

    #[test]
    fn schedule_places_operands_first_and_skips_unreachable() {
        let ctx = Rc::new(RefCell::new(GraphContext::new()));
        let x = Tensor::new_input(&ctx, "x");
        let unused = x.sqrt();
        let sq = x.square();
        let out = sq.relu();

        let graph = ctx.borrow().main_graph().clone();
        let order = ShapeInference::schedule(&graph, &[out.node_id]).unwrap();
        assert_eq!(order, vec![x.node_id, sq.node_id, out.node_id]);
        assert!(!order.contains(&unused.node_id));
    }

    #[test]
    fn schedule_detects_cycles() {
        let mut graph = Asg::new(0, None);
        let a = graph.add_node(None, NodeType::ReLU(1));
        graph.add_node(None, NodeType::ReLU(a));
        assert!(matches!(
            ShapeInference::schedule(&graph, &[a]),
            Err(ShapeInferenceError::AsgError(AsgError::Cycle(_)))
        ));
    }
}
