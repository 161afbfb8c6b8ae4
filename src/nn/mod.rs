//! # Network Layers
//!
//! Building blocks of the compared networks. In the graph-based architecture
//! each layer is a constructor that adds a fixed pattern of nodes (operations
//! and parameters) to the ASG.
//!
//! - [`Linear`]: fully connected layer
//! - [`BatchNorm`]: batch normalization over axis 0
//! - [`ReLU`]: activation
//! - [`Network`]: the regression network, with or without normalization
//!
//! ## Example
//!
//! ```ignore
//! use bnscope::nn::{Linear, ReLU, Module};
//! use bnscope::tensor::{GraphContext, Tensor};
//!
//! let ctx = Rc::new(RefCell::new(GraphContext::new()));
//! let linear = Linear::new(&ctx, 1, 30, "fc1");
//!
//! let x = Tensor::new_input(&ctx, "xs");
//! let h = ReLU.forward(&linear.forward(&x));
//! ```

pub mod activations;
pub mod batchnorm;
pub mod linear;
pub mod module;
pub mod network;

pub use activations::ReLU;
pub use batchnorm::BatchNorm;
pub use linear::Linear;
pub use module::Module;
pub use network::Network;
