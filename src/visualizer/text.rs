//! Headless renderer: everything goes to the log.

use super::{histogram_panel, Histogram, Visualizer, VisualizerError, VARIANT_TITLES};
use crate::data::Dataset;
use crate::training::{ActivationSnapshot, LossHistory};
use tracing::{debug, info};

const BARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Logs histograms as sparklines and the losses as a table.
#[derive(Debug, Clone)]
pub struct TextVisualizer {
    bins: usize,
}

impl TextVisualizer {
    pub fn new(bins: usize) -> Self {
        Self { bins }
    }
}

impl Default for TextVisualizer {
    fn default() -> Self {
        Self::new(15)
    }
}

/// One character per bin, scaled to the fullest bin; empty bins are blank.
pub fn sparkline(histogram: &Histogram) -> String {
    let max = histogram.max_count();
    histogram
        .counts
        .iter()
        .map(|&c| {
            if c == 0 || max == 0 {
                ' '
            } else {
                BARS[((c * BARS.len() - 1) / max).min(BARS.len() - 1)]
            }
        })
        .collect()
}

impl Visualizer for TextVisualizer {
    fn show_dataset(&mut self, dataset: &Dataset) -> Result<(), VisualizerError> {
        let points = dataset.points();
        let (y_min, y_max) = points
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &(_, y)| (lo.min(y), hi.max(y)));
        let (x_min, x_max) = match (points.first(), points.last()) {
            (Some(first), Some(last)) => (first.0, last.0),
            _ => (0.0, 0.0),
        };
        info!(
            points = points.len(),
            "dataset: x in [{x_min:.1}, {x_max:.1}], y in [{y_min:.1}, {y_max:.1}]"
        );
        Ok(())
    }

    fn show_activations(&mut self, snapshot: &ActivationSnapshot) -> Result<(), VisualizerError> {
        let panel = histogram_panel(snapshot, self.bins);
        for (title, row) in VARIANT_TITLES.iter().zip(panel.iter()) {
            info!(iteration = snapshot.iteration, "{title}");
            for (layer, histogram) in row.iter().enumerate() {
                let (lo, hi) = histogram.range;
                info!(
                    "  layer {layer} [{lo:>4}, {hi:>3}] |{}| {} in range",
                    sparkline(histogram),
                    histogram.total()
                );
            }
        }
        Ok(())
    }

    fn record_loss(
        &mut self,
        iteration: usize,
        plain: f32,
        normalized: f32,
    ) -> Result<(), VisualizerError> {
        debug!(iteration, plain, normalized, "recorded loss");
        Ok(())
    }

    fn show_losses(&mut self, history: &LossHistory) -> Result<(), VisualizerError> {
        info!("{:>9} {:>14} {:>14}", "iteration", "no BN", "BN");
        for ((iteration, plain), normalized) in
            history.iterations.iter().zip(&history.plain).zip(&history.normalized)
        {
            info!("{iteration:>9} {plain:>14.4} {normalized:>14.4}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparkline_scales_to_the_fullest_bin() {
        let h = Histogram { range: (0.0, 1.0), counts: vec![0, 1, 4, 8] };
        let line = sparkline(&h);
        assert_eq!(line.chars().count(), 4);
        assert_eq!(line.chars().next(), Some(' '));
        assert_eq!(line.chars().last(), Some('█'));
    }

    #[test]
    fn empty_histogram_is_blank() {
        let h = Histogram { range: (0.0, 1.0), counts: vec![0; 5] };
        assert_eq!(sparkline(&h), "     ");
    }
}
