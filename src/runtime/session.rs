//! Execution context tying the graph, the backend and the parameter values
//! together.
//!
//! A [`Session`] owns the values of every parameter declared in its
//! [`GraphContext`]. Inputs are fed by name on every call. Gradient graphs are
//! compiled the first time a [`TrainOp`] runs with a given set of input
//! shapes and reused afterwards.

use super::backend::{Backend, Memo, RuntimeError};
use super::cpu_backend::CpuBackend;
use crate::analysis::shape_inference::{ShapeInference, ShapeInferenceError};
use crate::asg::{Asg, AsgId, NodeId, NodeType, Shape, Value};
use crate::autograd::{AutogradError, Gradients};
use crate::optimizers::{OptimizerError, TrainOp};
use crate::tensor::{GraphContext, Initializer, Tensor};
use ndarray::{ArrayD, IxDyn};
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, info};

/// Input values by placeholder name.
pub type Feed = HashMap<String, ArrayD<f32>>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error(transparent)]
    Shape(#[from] ShapeInferenceError),
    #[error(transparent)]
    Autograd(#[from] AutogradError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Optimizer(#[from] OptimizerError),
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),
    #[error("node {0} is not a parameter")]
    NotAParameter(NodeId),
    #[error("cannot initialize '{name}': {reason}")]
    Initializer { name: String, reason: String },
    #[error("parameter '{name}' has shape {expected:?}, got {actual:?}")]
    ParameterShape { name: String, expected: Shape, actual: Shape },
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Feed names and shapes, sorted by name.
type Signature = Vec<(String, Shape)>;

struct CompiledGradients {
    graph: Asg,
    /// Parameter names, in the order of `graph.outputs`.
    names: Vec<String>,
}

pub struct Session<B: Backend<DeviceData = Value> = CpuBackend> {
    backend: B,
    context: Rc<RefCell<GraphContext>>,
    /// Snapshot of the main graph, refreshed when nodes were added since.
    forward: Asg,
    parameters: HashMap<String, Value>,
    /// Keyed by loss, parameters and feed signature.
    compiled: HashMap<(NodeId, Vec<NodeId>, Signature), CompiledGradients>,
    next_asg_id: AsgId,
}

impl Session<CpuBackend> {
    pub fn new(context: &Rc<RefCell<GraphContext>>) -> Self {
        Self::with_backend(context, CpuBackend::new())
    }
}

impl<B: Backend<DeviceData = Value>> Session<B> {
    pub fn with_backend(context: &Rc<RefCell<GraphContext>>, backend: B) -> Self {
        let forward = context.borrow().main_graph().clone();
        Self {
            backend,
            context: Rc::clone(context),
            next_asg_id: forward.id + 1,
            forward,
            parameters: HashMap::new(),
            compiled: HashMap::new(),
        }
    }

    /// Gives every declared parameter its initial value.
    ///
    /// Parameters are grouped by the prefix before the first `.` of their
    /// name. Each group draws from its own generator seeded with `seed`, in
    /// declaration order, so groups declared the same way start out equal.
    pub fn initialize(&mut self, seed: u64) -> SessionResult<()> {
        let specs = self.context.borrow().parameters().to_vec();
        let mut generators: HashMap<String, StdRng> = HashMap::new();

        for spec in specs {
            let group = spec.name.split('.').next().unwrap_or_default().to_string();
            let rng = generators
                .entry(group)
                .or_insert_with(|| StdRng::seed_from_u64(seed));
            let value = match spec.init {
                Initializer::Constant(c) => ArrayD::from_elem(IxDyn(&spec.shape), c),
                Initializer::Normal { mean, std_dev } => {
                    let normal = Normal::new(mean, std_dev).map_err(|e| SessionError::Initializer {
                        name: spec.name.clone(),
                        reason: e.to_string(),
                    })?;
                    ArrayD::random_using(IxDyn(&spec.shape), normal, rng)
                }
            };
            self.parameters.insert(spec.name, Value::Tensor(value));
        }
        info!(parameters = self.parameters.len(), seed, "initialized parameters");
        Ok(())
    }

    pub fn parameter(&self, name: &str) -> SessionResult<ArrayD<f32>> {
        self.parameters
            .get(name)
            .map(|v| v.as_array().into_owned())
            .ok_or_else(|| SessionError::UnknownParameter(name.to_string()))
    }

    pub fn set_parameter(&mut self, name: &str, value: ArrayD<f32>) -> SessionResult<()> {
        let current = self
            .parameters
            .get_mut(name)
            .ok_or_else(|| SessionError::UnknownParameter(name.to_string()))?;
        if current.shape() != value.shape() {
            return Err(SessionError::ParameterShape {
                name: name.to_string(),
                expected: current.shape(),
                actual: value.shape().to_vec(),
            });
        }
        *current = Value::Tensor(value);
        Ok(())
    }

    /// Names of all initialized parameters, sorted.
    pub fn parameter_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.parameters.keys().cloned().collect();
        names.sort();
        names
    }

    /// Evaluates `fetches` in one pass over the main graph.
    pub fn run(&mut self, fetches: &[&Tensor], feed: &Feed) -> SessionResult<Vec<ArrayD<f32>>> {
        self.refresh();
        self.forward.set_outputs(fetches.iter().map(|t| t.node_id).collect());
        let memo = self.initial_memo(feed)?;
        let (outputs, _) = self.backend.run(&self.forward, memo)?;
        Ok(self
            .backend
            .retrieve_data(&outputs)?
            .into_iter()
            .map(Value::into_array)
            .collect())
    }

    /// Runs one step of every train op on the same feed.
    ///
    /// The losses are evaluated in a single forward pass, every gradient is
    /// computed from that pass, and only then are the optimizers applied.
    /// Returns the losses as they were before the update.
    pub fn run_train(&mut self, train_ops: &[&TrainOp], feed: &Feed) -> SessionResult<Vec<f32>> {
        self.refresh();
        let signature = signature(feed);
        for op in train_ops {
            self.compile(op.loss, &op.var_list, &signature)?;
        }

        self.forward.set_outputs(train_ops.iter().map(|op| op.loss).collect());
        let memo = self.initial_memo(feed)?;
        let (losses, mut memo) = self.backend.run(&self.forward, memo)?;

        let mut gradients = Vec::with_capacity(train_ops.len());
        for op in train_ops {
            let compiled = self
                .compiled
                .get(&(op.loss, op.var_list.clone(), signature.clone()))
                .ok_or(RuntimeError::NodeNotFound(op.loss, self.forward.id))?;
            let (grads, next) = self.backend.run(&compiled.graph, memo)?;
            memo = next;
            let grads = self.backend.retrieve_data(&grads)?;
            gradients.push(compiled.names.iter().cloned().zip(grads).collect::<HashMap<_, _>>());
        }

        for (op, grads) in train_ops.iter().zip(&gradients) {
            op.optimizer.step(&mut self.parameters, grads)?;
        }

        self.backend
            .retrieve_data(&losses)?
            .iter()
            .map(scalar)
            .collect()
    }

    /// Gradients of `loss` with respect to each of `wrt` (all parameters),
    /// without updating anything.
    pub fn gradients(
        &mut self,
        loss: &Tensor,
        wrt: &[Tensor],
        feed: &Feed,
    ) -> SessionResult<Vec<ArrayD<f32>>> {
        self.refresh();
        let signature = signature(feed);
        let var_list: Vec<NodeId> = wrt.iter().map(|t| t.node_id).collect();
        self.compile(loss.node_id, &var_list, &signature)?;

        self.forward.set_output(loss.node_id);
        let memo = self.initial_memo(feed)?;
        let (_, memo) = self.backend.run(&self.forward, memo)?;
        let compiled = self
            .compiled
            .get(&(loss.node_id, var_list, signature))
            .ok_or(RuntimeError::NodeNotFound(loss.node_id, self.forward.id))?;
        let (grads, _) = self.backend.run(&compiled.graph, memo)?;
        Ok(self
            .backend
            .retrieve_data(&grads)?
            .into_iter()
            .map(Value::into_array)
            .collect())
    }

    fn refresh(&mut self) {
        let ctx = self.context.borrow();
        if ctx.main_graph().len() != self.forward.len() {
            self.forward = ctx.main_graph().clone();
        }
    }

    fn initial_memo(&self, feed: &Feed) -> SessionResult<Memo<Value>> {
        let mut host = self.parameters.clone();
        host.extend(feed.iter().map(|(k, v)| (k.clone(), Value::Tensor(v.clone()))));
        let mut device = self.backend.load_data(&host)?;

        let mut memo = Memo::new();
        for (id, name, _) in self.forward.named_leaves() {
            if let Some(value) = device.remove(name) {
                memo.insert((self.forward.id, id), value);
            }
        }
        Ok(memo)
    }

    /// Builds the gradient graph of `loss` over `var_list` for inputs shaped
    /// as in `signature`.
    fn compile(&mut self, loss: NodeId, var_list: &[NodeId], signature: &Signature) -> SessionResult<()> {
        let key = (loss, var_list.to_vec(), signature.clone());
        if self.compiled.contains_key(&key) {
            return Ok(());
        }

        let mut graph = self.forward.clone();
        let mut roots = vec![loss];
        roots.extend(var_list);
        graph.set_outputs(roots);
        let shapes: HashMap<String, Shape> = signature.iter().cloned().collect();
        ShapeInference::run(&mut graph, &shapes)?;

        let names = var_list
            .iter()
            .map(|&id| match &graph.get_node(id).map_err(AutogradError::from)?.node_type {
                NodeType::Parameter { name } => Ok(name.clone()),
                _ => Err(SessionError::NotAParameter(id)),
            })
            .collect::<SessionResult<Vec<_>>>()?;

        let grad_id = self.next_asg_id;
        self.next_asg_id += 1;
        let grad_graph = Gradients::new(&graph, grad_id).build(loss, var_list)?;
        debug!(
            loss,
            parameters = names.len(),
            forward_nodes = graph.len(),
            gradient_nodes = grad_graph.len(),
            "compiled gradient graph {grad_id}"
        );
        self.compiled.insert(key, CompiledGradients { graph: grad_graph, names });
        Ok(())
    }
}

fn signature(feed: &Feed) -> Signature {
    let mut sig: Signature = feed.iter().map(|(k, v)| (k.clone(), v.shape().to_vec())).collect();
    sig.sort();
    sig
}

fn scalar(value: &Value) -> SessionResult<f32> {
    value
        .as_array()
        .first()
        .copied()
        .ok_or_else(|| RuntimeError::ComputationError("empty loss value".to_string()).into())
}
