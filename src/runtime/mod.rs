//! Execution of ASGs.
//!
//! [`backend::Backend`] is the interface, [`cpu_backend::CpuBackend`] the
//! ndarray implementation and [`session::Session`] the stateful entry point
//! that feeds inputs, holds parameter values and applies training steps.

pub mod backend;
pub mod cpu_backend;
pub mod session;
