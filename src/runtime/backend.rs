//! Abstract interface of an execution backend.

use crate::asg::{Asg, AsgId, NodeId, Value};
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised while evaluating a graph. Shared by every backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("node {0} not found in graph {1}")]
    NodeNotFound(NodeId, AsgId),

    #[error("value of node {0} of graph {1} is not available; evaluate graph {1} first")]
    MissingExternal(NodeId, AsgId),

    #[error("tensor shape error: {0}")]
    ShapeError(String),

    #[error("no value fed for input '{0}' (node {1})")]
    MissingInput(String, NodeId),

    #[error("parameter '{0}' (node {1}) has no value; initialize it before running")]
    MissingParameter(String, NodeId),

    #[error("graph {0} cannot be scheduled: {1}")]
    Schedule(AsgId, String),

    #[error("computation error: {0}")]
    ComputationError(String),
}

/// Values already computed, keyed by `(AsgId, NodeId)`.
///
/// A gradient graph reads its `External` operands from the entries its
/// forward graph left here.
pub type Memo<T> = HashMap<(AsgId, NodeId), T>;

/// Anything that can take an ASG plus its starting values and evaluate it.
pub trait Backend {
    /// Device-side representation of a value.
    type DeviceData: std::fmt::Debug;

    /// Moves host values to the device.
    fn load_data(
        &self,
        data: &HashMap<String, Value>,
    ) -> Result<HashMap<String, Self::DeviceData>, RuntimeError>;

    /// Evaluates `asg`'s outputs, starting from `initial_memo`.
    ///
    /// Returns the outputs in order together with the memo, which now also
    /// holds every intermediate value of `asg`.
    fn run(
        &self,
        asg: &Asg,
        initial_memo: Memo<Self::DeviceData>,
    ) -> Result<(Vec<Self::DeviceData>, Memo<Self::DeviceData>), RuntimeError>;

    /// Copies results back to the host.
    fn retrieve_data(&self, device_data: &[Self::DeviceData]) -> Result<Vec<Value>, RuntimeError>;
}
