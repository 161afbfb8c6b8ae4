//! Presentation of the experiment: raw data, per-layer activation histograms
//! and the loss comparison.
//!
//! The training driver only talks to the [`Visualizer`] trait. Two renderers
//! exist: [`text::TextVisualizer`] writes everything through `tracing`, and
//! [`gui::ChannelVisualizer`] forwards it to the egui window.

pub mod gui;
pub mod text;

use crate::data::Dataset;
use crate::training::{ActivationSnapshot, LossHistory};
use ndarray::ArrayD;
use serde::Serialize;
use thiserror::Error;

pub use gui::{ChannelVisualizer, ExperimentViewerApp, VizEvent};
pub use text::TextVisualizer;

/// Histogram range of the first row (the raw or normalized input).
pub const INPUT_RANGE: (f32, f32) = (-7.0, 10.0);
/// Histogram range of every hidden layer.
pub const HIDDEN_RANGE: (f32, f32) = (-1.0, 1.0);

/// Column titles, indexed by "is normalized".
pub const VARIANT_TITLES: [&str; 2] = ["Without normalizing", "With normalizing"];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VisualizerError {
    #[error("the viewer window has been closed")]
    Disconnected,
}

/// Renders the experiment as it runs.
pub trait Visualizer {
    /// The raw training data, shown once before training.
    fn show_dataset(&mut self, dataset: &Dataset) -> Result<(), VisualizerError>;

    /// Activation distributions of both networks at one iteration.
    fn show_activations(&mut self, snapshot: &ActivationSnapshot) -> Result<(), VisualizerError>;

    /// A freshly recorded pair of losses.
    fn record_loss(
        &mut self,
        iteration: usize,
        plain: f32,
        normalized: f32,
    ) -> Result<(), VisualizerError>;

    /// The complete loss comparison, after training.
    fn show_losses(&mut self, history: &LossHistory) -> Result<(), VisualizerError>;
}

/// Fixed-range histogram.
///
/// Bins are equally wide over `range`; the last bin includes its right edge.
/// Values outside the range and non-finite values are not counted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Histogram {
    pub range: (f32, f32),
    pub counts: Vec<usize>,
}

impl Histogram {
    pub fn new(values: impl IntoIterator<Item = f32>, bins: usize, range: (f32, f32)) -> Self {
        let bins = bins.max(1);
        let (lo, hi) = range;
        let width = (hi - lo) / bins as f32;
        let mut counts = vec![0; bins];
        for v in values {
            if !v.is_finite() || v < lo || v > hi {
                continue;
            }
            let bin = (((v - lo) / width) as usize).min(bins - 1);
            counts[bin] += 1;
        }
        Self { range, counts }
    }

    pub fn of_array(values: &ArrayD<f32>, bins: usize, range: (f32, f32)) -> Self {
        Self::new(values.iter().copied(), bins, range)
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    pub fn max_count(&self) -> usize {
        self.counts.iter().copied().max().unwrap_or(0)
    }
}

/// Histogram range of layer row `layer`.
pub fn layer_range(layer: usize) -> (f32, f32) {
    if layer == 0 {
        INPUT_RANGE
    } else {
        HIDDEN_RANGE
    }
}

/// One histogram per layer for each variant: `[plain, normalized]`.
pub fn histogram_panel(snapshot: &ActivationSnapshot, bins: usize) -> [Vec<Histogram>; 2] {
    let row = |layers: &[ArrayD<f32>]| {
        layers
            .iter()
            .enumerate()
            .map(|(i, values)| Histogram::of_array(values, bins, layer_range(i)))
            .collect::<Vec<_>>()
    };
    [row(&snapshot.plain), row(&snapshot.normalized)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn right_edge_is_inclusive_and_outliers_dropped() {
        let h = Histogram::new([-1.0, -0.99, 0.0, 1.0, 1.5, f32::NAN, f32::INFINITY], 4, (-1.0, 1.0));
        assert_eq!(h.counts, vec![2, 0, 1, 1]);
        assert_eq!(h.total(), 4);
        assert_eq!(h.max_count(), 2);
    }

    #[test]
    fn input_row_uses_the_data_range() {
        let snapshot = ActivationSnapshot {
            iteration: 0,
            plain: vec![array![[-7.0f32], [10.0]].into_dyn(), array![[5.0f32], [0.5]].into_dyn()],
            normalized: vec![array![[0.0f32]].into_dyn(), array![[0.0f32]].into_dyn()],
        };
        let [plain, normalized] = histogram_panel(&snapshot, 15);
        assert_eq!(plain[0].range, INPUT_RANGE);
        assert_eq!(plain[0].total(), 2);
        assert_eq!(plain[1].range, HIDDEN_RANGE);
        // 5.0 is outside the hidden range
        assert_eq!(plain[1].total(), 1);
        assert_eq!(normalized.len(), 2);
        assert_eq!(plain[0].counts.len(), 15);
    }
}
