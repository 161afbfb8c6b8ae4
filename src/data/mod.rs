//! # Data
//!
//! The synthetic regression data both networks are trained on.
//!
//! ```ignore
//! use bnscope::data::Dataset;
//!
//! let data = Dataset::generate(&DataConfig::default())?;
//! let feed = Feed::from([("xs".into(), data.xs().clone()), ("ys".into(), data.ys().clone())]);
//! ```

pub mod dataset;

pub use dataset::{ground_truth, DataError, Dataset};
