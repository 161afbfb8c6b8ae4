//! # Graph Analysis Module
//!
//! Passes that process the ASG before execution.
//!
//! - [`ShapeInference`](shape_inference::ShapeInference): propagates tensor
//!   shapes from the fed inputs and declared parameters, so that a mismatch is
//!   reported before the first training step runs. The autograd pass relies on
//!   these shapes to size mean reductions.
//!
//! ```text
//! ASG (untyped) -> Shape Inference -> ASG (with shapes) -> Autograd
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use bnscope::analysis::shape_inference::ShapeInference;
//!
//! let mut graph = context.borrow().main_graph().clone();
//! graph.set_output(loss.node_id);
//! let shapes = HashMap::from([("xs".to_string(), vec![500, 1])]);
//! ShapeInference::run(&mut graph, &shapes)?;
//! ```

pub mod shape_inference;
