//! # bnscope: batch normalization under a magnifying glass
//!
//! Trains two identical fully connected regression networks on noisy
//! quadratic data, one of them with batch normalization after every linear
//! layer, and shows how their activation distributions and losses evolve.
//!
//! The numerics run on a small graph engine built around an **Abstract
//! Semantic Graph (ASG)**: symbolic [`tensor::Tensor`] handles describe the
//! computation, [`analysis`] checks shapes, [`autograd`] derives a separate
//! gradient graph and [`runtime`] executes both on the CPU.
//!
//! ## Usage Example
//!
//! ```no_run
//! use bnscope::config::ExperimentConfig;
//! use bnscope::training::Experiment;
//! use bnscope::visualizer::TextVisualizer;
//!
//! let experiment = Experiment::new(ExperimentConfig::default()).unwrap();
//! let report = experiment.run(&mut TextVisualizer::default()).unwrap();
//! assert!(report.normalized_outperforms());
//! ```

pub mod analysis;
pub mod asg;
pub mod autograd;
pub mod config;
pub mod data;
pub mod losses;
pub mod metrics;
pub mod nn;
pub mod optimizers;
pub mod runtime;
pub mod tensor;
pub mod training;
pub mod visualizer;
