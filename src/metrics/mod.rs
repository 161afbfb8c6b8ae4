//! Metrics for judging the trained networks.
//!
//! # Example
//!
//! ```rust,ignore
//! use bnscope::metrics::{MeanSquaredError, Metric};
//!
//! let mut mse = MeanSquaredError::new();
//! mse.update(&predictions, &targets);
//! tracing::info!("held-out MSE: {:.4}", mse.compute());
//! ```

pub mod regression;

pub use regression::MeanSquaredError;

/// Base trait of every metric.
///
/// A metric accumulates over any number of [`update`](Metric::update) calls
/// and reports the aggregate with [`compute`](Metric::compute).
pub trait Metric {
    /// Type of the predictions, e.g. an `[n, 1]` column.
    type Prediction;
    /// Type of the targets, shaped like the predictions.
    type Target;
    /// Type of the result.
    type Output;

    /// Accumulates another batch.
    fn update(&mut self, predictions: &Self::Prediction, targets: &Self::Target);

    /// Value over everything accumulated since the last reset.
    fn compute(&self) -> Self::Output;

    /// Forgets all accumulated batches.
    fn reset(&mut self);

    /// Short name for logs.
    fn name(&self) -> &str;
}
