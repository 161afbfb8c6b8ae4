//! Native real-time view of the experiment with egui.
//!
//! The computation runs on its own thread and pushes [`VizEvent`]s through a
//! channel; [`ExperimentViewerApp`] drains the channel every frame and redraws
//! the scatter, the histogram grid and the loss chart in place.

use super::{histogram_panel, Histogram, Visualizer, VisualizerError, VARIANT_TITLES};
use crate::data::Dataset;
use crate::training::{ActivationSnapshot, LossHistory};
use eframe::egui;
use std::sync::mpsc::{Receiver, Sender};
use std::thread;
use std::time::Duration;

const BAR_COLOR: egui::Color32 = egui::Color32::from_rgb(255, 87, 51);
const PLAIN_COLOR: egui::Color32 = egui::Color32::from_rgb(90, 160, 255);
const NORMALIZED_COLOR: egui::Color32 = egui::Color32::from_rgb(255, 170, 60);
const PANEL_GAP: f32 = 8.0;

/// What the computation thread tells the window.
#[derive(Debug, Clone)]
pub enum VizEvent {
    Dataset(Vec<(f32, f32)>),
    /// `[plain, normalized]` rows of per-layer histograms.
    Activations { iteration: usize, panels: [Vec<Histogram>; 2] },
    Loss { iteration: usize, plain: f32, normalized: f32 },
    Finished(LossHistory),
}

/// [`Visualizer`] that sends everything to an [`ExperimentViewerApp`].
pub struct ChannelVisualizer {
    tx: Sender<VizEvent>,
    bins: usize,
    pause: Duration,
}

impl ChannelVisualizer {
    /// `pause` is slept after every histogram update so the window gets a
    /// chance to draw it before the next one arrives.
    pub fn new(tx: Sender<VizEvent>, bins: usize, pause: Duration) -> Self {
        Self { tx, bins, pause }
    }

    fn send(&self, event: VizEvent) -> Result<(), VisualizerError> {
        self.tx.send(event).map_err(|_| VisualizerError::Disconnected)
    }
}

impl Visualizer for ChannelVisualizer {
    fn show_dataset(&mut self, dataset: &Dataset) -> Result<(), VisualizerError> {
        self.send(VizEvent::Dataset(dataset.points()))
    }

    fn show_activations(&mut self, snapshot: &ActivationSnapshot) -> Result<(), VisualizerError> {
        self.send(VizEvent::Activations {
            iteration: snapshot.iteration,
            panels: histogram_panel(snapshot, self.bins),
        })?;
        thread::sleep(self.pause);
        Ok(())
    }

    fn record_loss(
        &mut self,
        iteration: usize,
        plain: f32,
        normalized: f32,
    ) -> Result<(), VisualizerError> {
        self.send(VizEvent::Loss { iteration, plain, normalized })
    }

    fn show_losses(&mut self, history: &LossHistory) -> Result<(), VisualizerError> {
        self.send(VizEvent::Finished(history.clone()))
    }
}

/// The viewer window.
pub struct ExperimentViewerApp {
    rx: Receiver<VizEvent>,
    dataset: Vec<(f32, f32)>,
    iteration: Option<usize>,
    panels: [Vec<Histogram>; 2],
    losses: Vec<(usize, f32, f32)>,
    finished: bool,
}

impl ExperimentViewerApp {
    pub fn new(cc: &eframe::CreationContext<'_>, rx: Receiver<VizEvent>) -> Self {
        cc.egui_ctx.set_visuals(egui::Visuals::dark());
        Self {
            rx,
            dataset: Vec::new(),
            iteration: None,
            panels: [Vec::new(), Vec::new()],
            losses: Vec::new(),
            finished: false,
        }
    }

    fn apply(&mut self, event: VizEvent) {
        match event {
            VizEvent::Dataset(points) => self.dataset = points,
            VizEvent::Activations { iteration, panels } => {
                self.iteration = Some(iteration);
                self.panels = panels;
            }
            VizEvent::Loss { iteration, plain, normalized } => {
                self.losses.push((iteration, plain, normalized));
            }
            VizEvent::Finished(history) => {
                self.losses = history
                    .iterations
                    .iter()
                    .zip(&history.plain)
                    .zip(&history.normalized)
                    .map(|((&i, &p), &n)| (i, p, n))
                    .collect();
                self.finished = true;
            }
        }
    }
}

impl eframe::App for ExperimentViewerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        while let Ok(event) = self.rx.try_recv() {
            self.apply(event);
        }

        egui::TopBottomPanel::top("status").show(ctx, |ui| {
            let status = match (self.finished, self.iteration) {
                (true, _) => "training finished".to_string(),
                (false, Some(i)) => format!("activations at iteration {i}"),
                (false, None) => "waiting for the first snapshot...".to_string(),
            };
            ui.label(status);
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            let (response, painter) = ui.allocate_painter(ui.available_size(), egui::Sense::hover());
            let area = response.rect;
            let top_height = area.height() * 0.55;
            let top = egui::Rect::from_min_size(area.min, egui::vec2(area.width(), top_height));
            let bottom = egui::Rect::from_min_max(
                egui::pos2(area.left(), top.bottom() + PANEL_GAP),
                area.max,
            );
            let scatter = egui::Rect::from_min_max(
                bottom.min,
                egui::pos2(bottom.center().x - PANEL_GAP / 2.0, bottom.bottom()),
            );
            let chart = egui::Rect::from_min_max(
                egui::pos2(bottom.center().x + PANEL_GAP / 2.0, bottom.top()),
                bottom.max,
            );

            draw_histogram_grid(&painter, top, &self.panels);
            draw_scatter(&painter, scatter, &self.dataset);
            draw_loss_chart(&painter, chart, &self.losses);
        });

        ctx.request_repaint_after(Duration::from_millis(16));
    }
}

fn frame(painter: &egui::Painter, rect: egui::Rect) {
    painter.rect_stroke(rect, 2.0, egui::Stroke::new(1.0, egui::Color32::DARK_GRAY));
}

fn label(painter: &egui::Painter, pos: egui::Pos2, anchor: egui::Align2, text: impl ToString) {
    painter.text(
        pos,
        anchor,
        text,
        egui::FontId::proportional(12.0),
        egui::Color32::LIGHT_GRAY,
    );
}

fn draw_histogram_grid(painter: &egui::Painter, rect: egui::Rect, panels: &[Vec<Histogram>; 2]) {
    let columns = panels.iter().map(Vec::len).max().unwrap_or(0);
    if columns == 0 {
        return;
    }
    let cell_w = rect.width() / columns as f32;
    let cell_h = rect.height() / 2.0;

    for (row, (title, histograms)) in VARIANT_TITLES.iter().zip(panels).enumerate() {
        let row_top = rect.top() + row as f32 * cell_h;
        label(
            painter,
            egui::pos2(rect.center().x, row_top + 2.0),
            egui::Align2::CENTER_TOP,
            title,
        );
        for (col, histogram) in histograms.iter().enumerate() {
            let cell = egui::Rect::from_min_size(
                egui::pos2(rect.left() + col as f32 * cell_w, row_top + 18.0),
                egui::vec2(cell_w, cell_h - 22.0),
            )
            .shrink(4.0);
            draw_histogram(painter, cell, histogram, row == 1);
        }
    }
}

fn draw_histogram(painter: &egui::Painter, rect: egui::Rect, histogram: &Histogram, show_range: bool) {
    frame(painter, rect);
    let max = histogram.max_count().max(1) as f32;
    let bar_w = rect.width() / histogram.counts.len().max(1) as f32;
    for (i, &count) in histogram.counts.iter().enumerate() {
        let h = rect.height() * count as f32 / max;
        let bar = egui::Rect::from_min_max(
            egui::pos2(rect.left() + i as f32 * bar_w, rect.bottom() - h),
            egui::pos2(rect.left() + (i + 1) as f32 * bar_w - 1.0, rect.bottom()),
        );
        painter.rect_filled(bar, 0.0, BAR_COLOR);
    }
    if show_range {
        let (lo, hi) = histogram.range;
        label(painter, rect.left_bottom(), egui::Align2::LEFT_TOP, lo);
        label(painter, rect.right_bottom(), egui::Align2::RIGHT_TOP, hi);
    }
}

/// Maps data coordinates into `rect`.
struct Axes {
    rect: egui::Rect,
    x: (f32, f32),
    y: (f32, f32),
}

impl Axes {
    fn fit(rect: egui::Rect, points: impl Iterator<Item = (f32, f32)>) -> Option<Self> {
        let mut x = (f32::INFINITY, f32::NEG_INFINITY);
        let mut y = (f32::INFINITY, f32::NEG_INFINITY);
        for (px, py) in points.filter(|(a, b)| a.is_finite() && b.is_finite()) {
            x = (x.0.min(px), x.1.max(px));
            y = (y.0.min(py), y.1.max(py));
        }
        if x.0 > x.1 {
            return None;
        }
        let pad = |(lo, hi): (f32, f32)| if hi > lo { (lo, hi) } else { (lo - 1.0, hi + 1.0) };
        Some(Self { rect: rect.shrink(6.0), x: pad(x), y: pad(y) })
    }

    fn to_screen(&self, (x, y): (f32, f32)) -> egui::Pos2 {
        let tx = (x - self.x.0) / (self.x.1 - self.x.0);
        let ty = (y - self.y.0) / (self.y.1 - self.y.0);
        egui::pos2(
            self.rect.left() + tx * self.rect.width(),
            self.rect.bottom() - ty * self.rect.height(),
        )
    }
}

fn draw_scatter(painter: &egui::Painter, rect: egui::Rect, points: &[(f32, f32)]) {
    frame(painter, rect);
    label(painter, rect.center_top(), egui::Align2::CENTER_TOP, "data");
    let Some(axes) = Axes::fit(rect, points.iter().copied()) else {
        return;
    };
    for &p in points {
        painter.circle_filled(axes.to_screen(p), 1.5, PLAIN_COLOR);
    }
}

/// Loss curves on a log10 scale; non-finite losses leave a gap.
fn draw_loss_chart(painter: &egui::Painter, rect: egui::Rect, losses: &[(usize, f32, f32)]) {
    frame(painter, rect);
    label(painter, rect.center_top(), egui::Align2::CENTER_TOP, "log10 loss: no BN / BN");
    let log = |v: f32| if v > 0.0 { v.log10() } else { f32::NAN };
    let series = |pick: fn(&(usize, f32, f32)) -> f32| {
        losses
            .iter()
            .map(move |l| (l.0 as f32, log(pick(l))))
            .collect::<Vec<_>>()
    };
    let plain = series(|l| l.1);
    let normalized = series(|l| l.2);

    let Some(axes) = Axes::fit(rect, plain.iter().chain(&normalized).copied()) else {
        return;
    };
    for (line, color) in [(&plain, PLAIN_COLOR), (&normalized, NORMALIZED_COLOR)] {
        for pair in line.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if a.1.is_finite() && b.1.is_finite() {
                painter.line_segment([axes.to_screen(a), axes.to_screen(b)], egui::Stroke::new(1.5, color));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::ActivationSnapshot;
    use ndarray::array;
    use std::sync::mpsc;

    #[test]
    fn channel_visualizer_sends_histograms() {
        let (tx, rx) = mpsc::channel();
        let mut viz = ChannelVisualizer::new(tx, 15, Duration::ZERO);
        let snapshot = ActivationSnapshot {
            iteration: 50,
            plain: vec![array![[1.0f32]].into_dyn()],
            normalized: vec![array![[0.0f32]].into_dyn()],
        };
        viz.show_activations(&snapshot).unwrap();
        viz.record_loss(5, 1.0, 2.0).unwrap();

        match rx.recv().unwrap() {
            VizEvent::Activations { iteration, panels } => {
                assert_eq!(iteration, 50);
                assert_eq!(panels[0][0].counts.len(), 15);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(rx.recv().unwrap(), VizEvent::Loss { iteration: 5, .. }));
    }

    #[test]
    fn closed_window_is_reported() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        let mut viz = ChannelVisualizer::new(tx, 15, Duration::ZERO);
        assert_eq!(viz.record_loss(0, 1.0, 1.0), Err(VisualizerError::Disconnected));
    }
}
