//! Backend that evaluates an ASG on the CPU with `ndarray`.
//!
//! Nodes are visited in dependency order; each result goes into the memo and
//! operands are read back from it by reference, so nothing is evaluated twice.

use super::backend::{Backend, Memo, RuntimeError};
use crate::analysis::shape_inference::ShapeInference;
use crate::asg::{Asg, NodeId, NodeType, Value};
use ndarray::{arr0, ArrayD, Axis, Ix2, IxDyn, Zip};
use std::collections::HashMap;

type RuntimeResult<T> = Result<T, RuntimeError>;

/// Evaluation state for one graph.
struct ExecutionContext<'a> {
    asg: &'a Asg,
    memo: Memo<Value>,
}

impl<'a> ExecutionContext<'a> {
    fn new(asg: &'a Asg, memo: Memo<Value>) -> Self {
        Self { asg, memo }
    }

    fn value(&self, node_id: NodeId) -> RuntimeResult<&Value> {
        self.memo
            .get(&(self.asg.id, node_id))
            .ok_or(RuntimeError::NodeNotFound(node_id, self.asg.id))
    }

    fn array(&self, node_id: NodeId) -> RuntimeResult<std::borrow::Cow<'_, ArrayD<f32>>> {
        Ok(self.value(node_id)?.as_array())
    }

    /// Computes `node_id`, assuming its operands are already in the memo.
    fn evaluate_node(&mut self, node_id: NodeId) -> RuntimeResult<()> {
        let asg = self.asg;
        let asg_id = asg.id;
        if self.memo.contains_key(&(asg_id, node_id)) {
            return Ok(());
        }
        let node = asg
            .nodes
            .get(&node_id)
            .ok_or(RuntimeError::NodeNotFound(node_id, asg_id))?;

        let result = match &node.node_type {
            NodeType::Input { name } => {
                return Err(RuntimeError::MissingInput(name.clone(), node_id));
            }
            NodeType::Parameter { name } => {
                return Err(RuntimeError::MissingParameter(name.clone(), node_id));
            }
            NodeType::Literal(value) => value.clone(),
            NodeType::External { source_asg_id, source_node_id, .. } => self
                .memo
                .get(&(*source_asg_id, *source_node_id))
                .cloned()
                .ok_or(RuntimeError::MissingExternal(*source_node_id, *source_asg_id))?,

            NodeType::Add(l, r) => binary(&*self.array(*l)?, &*self.array(*r)?, "Add", |a, b| a + b)?,
            NodeType::Subtract(l, r) => {
                binary(&*self.array(*l)?, &*self.array(*r)?, "Subtract", |a, b| a - b)?
            }
            NodeType::Multiply(l, r) => {
                binary(&*self.array(*l)?, &*self.array(*r)?, "Multiply", |a, b| a * b)?
            }
            NodeType::Divide(l, r) => binary(&*self.array(*l)?, &*self.array(*r)?, "Divide", |a, b| a / b)?,
            NodeType::GreaterThan(l, r) => binary(&*self.array(*l)?, &*self.array(*r)?, "GreaterThan", |a, b| {
                if a > b {
                    1.0
                } else {
                    0.0
                }
            })?,
            NodeType::MatrixMultiply(l, r) => op_matmul(&*self.array(*l)?, &*self.array(*r)?)?,

            NodeType::Negate(x) => Value::Tensor(self.array(*x)?.mapv(|v| -v)),
            NodeType::Sqrt(x) => Value::Tensor(self.array(*x)?.mapv(f32::sqrt)),
            NodeType::ReLU(x) => Value::Tensor(self.array(*x)?.mapv(|v| v.max(0.0))),

            NodeType::Mean(x) => {
                let a = self.array(*x)?;
                let mean = a
                    .mean()
                    .ok_or_else(|| RuntimeError::ComputationError(format!("mean of empty node {x}")))?;
                Value::Tensor(arr0(mean).into_dyn())
            }
            NodeType::MeanAxis(x, axis) => op_mean_axis(&*self.array(*x)?, *axis)?,
            NodeType::Transpose(x, a1, a2) => op_transpose(&*self.array(*x)?, *a1, *a2)?,
            NodeType::Broadcast(x, target) => {
                let target_shape = self.value(*target)?.shape();
                op_broadcast(&*self.array(*x)?, &target_shape)?
            }
            NodeType::ReduceSumTo(x, target) => {
                let target_shape = self.value(*target)?.shape();
                op_reduce_sum_to(&*self.array(*x)?, &target_shape)?
            }
        };

        self.memo.insert((asg_id, node_id), result);
        Ok(())
    }
}

pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for CpuBackend {
    type DeviceData = Value;

    fn load_data(
        &self,
        data: &HashMap<String, Value>,
    ) -> Result<HashMap<String, Self::DeviceData>, RuntimeError> {
        Ok(data.clone())
    }

    fn run(
        &self,
        asg: &Asg,
        initial_memo: Memo<Self::DeviceData>,
    ) -> Result<(Vec<Self::DeviceData>, Memo<Self::DeviceData>), RuntimeError> {
        let order = ShapeInference::schedule(asg, &asg.outputs)
            .map_err(|e| RuntimeError::Schedule(asg.id, e.to_string()))?;

        let mut context = ExecutionContext::new(asg, initial_memo);
        for node_id in order {
            context.evaluate_node(node_id)?;
        }

        let results = asg
            .outputs
            .iter()
            .map(|id| context.value(*id).cloned())
            .collect::<RuntimeResult<Vec<_>>>()?;
        Ok((results, context.memo))
    }

    fn retrieve_data(&self, device_data: &[Self::DeviceData]) -> Result<Vec<Value>, RuntimeError> {
        Ok(device_data.to_vec())
    }
}

/// Element-wise binary op with numpy-style broadcasting.
fn binary(
    a: &ArrayD<f32>,
    b: &ArrayD<f32>,
    op: &str,
    f: impl Fn(f32, f32) -> f32,
) -> RuntimeResult<Value> {
    let shape = ShapeInference::broadcast_shapes(a.shape(), b.shape()).ok_or_else(|| {
        RuntimeError::ShapeError(format!(
            "{op}: cannot broadcast {:?} with {:?}",
            a.shape(),
            b.shape()
        ))
    })?;
    let dim = IxDyn(&shape);
    let (av, bv) = match (a.broadcast(dim.clone()), b.broadcast(dim)) {
        (Some(av), Some(bv)) => (av, bv),
        _ => {
            return Err(RuntimeError::ShapeError(format!(
                "{op}: cannot broadcast {:?} with {:?}",
                a.shape(),
                b.shape()
            )))
        }
    };
    Ok(Value::Tensor(Zip::from(&av).and(&bv).map_collect(|&x, &y| f(x, y))))
}

fn op_matmul(a: &ArrayD<f32>, b: &ArrayD<f32>) -> RuntimeResult<Value> {
    let a_mat = a
        .view()
        .into_dimensionality::<Ix2>()
        .map_err(|e| RuntimeError::ShapeError(format!("MatrixMultiply lhs {:?}: {e}", a.shape())))?;
    let b_mat = b
        .view()
        .into_dimensionality::<Ix2>()
        .map_err(|e| RuntimeError::ShapeError(format!("MatrixMultiply rhs {:?}: {e}", b.shape())))?;
    if a_mat.ncols() != b_mat.nrows() {
        return Err(RuntimeError::ShapeError(format!(
            "incompatible matmul shapes: {:?} and {:?}",
            a.shape(),
            b.shape()
        )));
    }
    Ok(Value::Tensor(a_mat.dot(&b_mat).into_dyn()))
}

fn op_mean_axis(a: &ArrayD<f32>, axis: usize) -> RuntimeResult<Value> {
    if axis >= a.ndim() {
        return Err(RuntimeError::ShapeError(format!(
            "MeanAxis: axis {axis} out of range for shape {:?}",
            a.shape()
        )));
    }
    let mean = a
        .mean_axis(Axis(axis))
        .ok_or_else(|| RuntimeError::ComputationError(format!("MeanAxis over empty axis {axis}")))?;
    Ok(Value::Tensor(mean.insert_axis(Axis(axis))))
}

fn op_transpose(a: &ArrayD<f32>, axis1: usize, axis2: usize) -> RuntimeResult<Value> {
    if axis1 >= a.ndim() || axis2 >= a.ndim() {
        return Err(RuntimeError::ShapeError(format!(
            "Transpose: axes ({axis1}, {axis2}) out of range for shape {:?}",
            a.shape()
        )));
    }
    let mut axes: Vec<usize> = (0..a.ndim()).collect();
    axes.swap(axis1, axis2);
    Ok(Value::Tensor(a.view().permuted_axes(axes).to_owned()))
}

fn op_broadcast(a: &ArrayD<f32>, target_shape: &[usize]) -> RuntimeResult<Value> {
    let view = a.broadcast(IxDyn(target_shape)).ok_or_else(|| {
        RuntimeError::ShapeError(format!("cannot broadcast {:?} to {:?}", a.shape(), target_shape))
    })?;
    Ok(Value::Tensor(view.to_owned()))
}

/// Sums `a` down to `target_shape`: leading extra axes are summed away, then
/// every axis where the target has length 1 and `a` does not.
fn op_reduce_sum_to(a: &ArrayD<f32>, target_shape: &[usize]) -> RuntimeResult<Value> {
    let mut reduced = a.clone();
    while reduced.ndim() > target_shape.len() {
        reduced = reduced.sum_axis(Axis(0));
    }
    for (i, &t) in target_shape.iter().enumerate() {
        if t == 1 && reduced.shape()[i] != 1 {
            reduced = reduced.sum_axis(Axis(i)).insert_axis(Axis(i));
        }
    }
    if reduced.shape() != target_shape {
        return Err(RuntimeError::ShapeError(format!(
            "cannot reduce {:?} to {:?}",
            a.shape(),
            target_shape
        )));
    }
    Ok(Value::Tensor(reduced))
}
