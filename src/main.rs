//! Runs the batch normalization comparison, headless or with a live window.

use anyhow::Context;
use bnscope::config::ExperimentConfig;
use bnscope::training::{Experiment, ExperimentError, ExperimentReport};
use bnscope::visualizer::{
    ChannelVisualizer, ExperimentViewerApp, TextVisualizer, Visualizer, VisualizerError,
};
use clap::Parser;
use eframe::egui;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about = "Train two networks, with and without batch normalization, and compare them", long_about = None)]
struct Args {
    /// Open a window with live histograms and the loss chart
    #[arg(short, long)]
    visualize: bool,

    /// Seed for the data noise and the weight initialization
    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// Last training iteration (the loop runs 0..=N)
    #[arg(long, default_value_t = 250)]
    iterations: usize,

    /// Write the experiment report as JSON to this file
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = ExperimentConfig::new()
        .with_seed(args.seed)
        .with_iterations(args.iterations);

    if args.visualize {
        let (tx, rx) = mpsc::channel();
        let bins = config.histogram_bins;
        let pause = config.redraw_pause;
        let report_path = args.report.clone();
        let computation = thread::spawn(move || {
            let mut viz = ChannelVisualizer::new(tx, bins, pause);
            run_computation(config, &mut viz, report_path.as_deref())
        });

        let options = eframe::NativeOptions {
            viewport: egui::ViewportBuilder::default().with_inner_size([1280.0, 720.0]),
            ..Default::default()
        };
        eframe::run_native(
            "bnscope - batch normalization",
            options,
            Box::new(|cc| Ok(Box::new(ExperimentViewerApp::new(cc, rx)))),
        )
        .map_err(|e| anyhow::anyhow!("viewer failed: {e}"))?;

        match computation.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) if is_window_closed(&e) => info!("viewer closed before training finished"),
            Ok(Err(e)) => return Err(e),
            Err(_) => anyhow::bail!("computation thread panicked"),
        }
    } else {
        let mut viz = TextVisualizer::new(config.histogram_bins);
        run_computation(config, &mut viz, args.report.as_deref())?;
    }
    Ok(())
}

/// Trains both networks and writes the report if asked to.
fn run_computation(
    config: ExperimentConfig,
    viz: &mut dyn Visualizer,
    report_path: Option<&Path>,
) -> anyhow::Result<()> {
    let experiment = Experiment::new(config).context("setting up the experiment")?;
    let report = experiment.run(viz).map_err(|e| {
        if !matches!(e, ExperimentError::Visualizer(_)) {
            error!("training failed: {e}");
        }
        anyhow::Error::from(e)
    })?;

    if let Some((plain, normalized)) = report.final_losses() {
        info!(
            plain,
            normalized,
            normalized_better = report.normalized_outperforms(),
            "final losses"
        );
    }
    if let Some(path) = report_path {
        write_report(&report, path)?;
        info!(path = %path.display(), "report written");
    }
    Ok(())
}

fn write_report(report: &ExperimentReport, path: &Path) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))
}

fn is_window_closed(e: &anyhow::Error) -> bool {
    matches!(
        e.downcast_ref::<ExperimentError>(),
        Some(ExperimentError::Visualizer(VisualizerError::Disconnected))
    )
}
