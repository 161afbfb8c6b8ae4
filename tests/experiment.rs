//! End-to-end behavior of the comparison: data, initialization, training.

use bnscope::config::{DataConfig, ExperimentConfig};
use bnscope::data::Dataset;
use bnscope::training::{ActivationSnapshot, Experiment, LossHistory};
use bnscope::visualizer::{Visualizer, VisualizerError};

use ndarray::{ArrayD, Axis};

/// Remembers what the loop handed over.
#[derive(Default)]
struct Recorder {
    datasets: usize,
    snapshots: Vec<usize>,
    recorded: Vec<usize>,
    final_history: Option<LossHistory>,
}

impl Visualizer for Recorder {
    fn show_dataset(&mut self, _dataset: &Dataset) -> Result<(), VisualizerError> {
        self.datasets += 1;
        Ok(())
    }

    fn show_activations(&mut self, snapshot: &ActivationSnapshot) -> Result<(), VisualizerError> {
        self.snapshots.push(snapshot.iteration);
        Ok(())
    }

    fn record_loss(&mut self, iteration: usize, _: f32, _: f32) -> Result<(), VisualizerError> {
        self.recorded.push(iteration);
        Ok(())
    }

    fn show_losses(&mut self, history: &LossHistory) -> Result<(), VisualizerError> {
        self.final_history = Some(history.clone());
        Ok(())
    }
}

fn std_dev(values: &ArrayD<f32>) -> f32 {
    let n = values.len() as f32;
    let mean = values.sum() / n;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n).sqrt()
}

/// Bitwise comparison, since a diverged history holds NaN.
fn assert_same_history(a: &LossHistory, b: &LossHistory) {
    assert_eq!(a.iterations, b.iterations);
    let bits = |v: &[f32]| v.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
    assert_eq!(bits(&a.plain), bits(&b.plain));
    assert_eq!(bits(&a.normalized), bits(&b.normalized));
}

#[test]
fn dataset_is_reproducible_per_seed() {
    let config = DataConfig::default();
    let a = Dataset::generate(&config).unwrap();
    let b = Dataset::generate(&config).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.len(), 500);
    assert_eq!(a.xs().shape(), &[500, 1]);

    let other = Dataset::generate(&DataConfig { seed: 2, ..config }).unwrap();
    assert_eq!(a.xs(), other.xs());
    assert_ne!(a.ys(), other.ys());
}

#[test]
fn both_networks_start_from_the_same_weights() {
    let experiment = Experiment::new(ExperimentConfig::default()).unwrap();
    let session = experiment.session();

    for layer in ["layer0", "layer3", "layer6", "output"] {
        for param in ["weights", "bias"] {
            let plain = session.parameter(&format!("plain.{layer}.{param}")).unwrap();
            let normalized = session.parameter(&format!("bn.{layer}.{param}")).unwrap();
            assert_eq!(plain, normalized, "{layer}.{param} differs");
        }
    }
    assert!(session.parameter("bn.layer2.gamma").unwrap().iter().all(|&g| g == 1.0));
    assert!(session.parameter("bn.layer2.beta").unwrap().iter().all(|&b| b == 0.0));
    assert!(session.parameter("plain.layer2.gamma").is_err());
}

#[test]
fn normalized_layer_inputs_are_narrower_at_start() {
    let mut experiment = Experiment::new(ExperimentConfig::default()).unwrap();
    let snapshot = experiment.snapshot(0).unwrap();
    assert_eq!(snapshot.plain.len(), 8);
    assert_eq!(snapshot.normalized.len(), 8);

    for (layer, (plain, normalized)) in snapshot.plain.iter().zip(&snapshot.normalized).enumerate() {
        assert_eq!(plain.len_of(Axis(0)), 500);
        let (p, n) = (std_dev(plain), std_dev(normalized));
        assert!(n < p, "layer {layer}: normalized std {n} not below plain std {p}");
    }
}

#[test]
fn full_run_favors_batch_normalization() {
    let config = ExperimentConfig::default();
    let experiment = Experiment::new(config.clone()).unwrap();
    let mut recorder = Recorder::default();
    let report = experiment.run(&mut recorder).unwrap();

    assert_eq!(recorder.datasets, 1);
    assert_eq!(recorder.snapshots, vec![0, 50, 100, 150, 200, 250]);
    assert_eq!(recorder.recorded.len(), 51);
    let shown = recorder.final_history.as_ref().unwrap();
    assert_same_history(shown, &report.losses);

    let losses = &report.losses;
    assert_eq!(losses.len(), config.recorded_points());
    assert_eq!(losses.iterations.first(), Some(&0));
    assert_eq!(losses.iterations.last(), Some(&250));

    let first = losses.normalized[0];
    let (_, last) = report.final_losses().unwrap();
    assert!(last.is_finite());
    assert!(last < first / 5.0, "normalized loss went from {first} to {last}");
    assert!(report.normalized_outperforms());

    assert_eq!(report.held_out_x.len(), config.data.n_held_out);
    assert_eq!(report.plain_predictions.len(), report.held_out_x.len());
    assert_eq!(report.normalized_predictions.len(), report.held_out_x.len());
    assert!(report.normalized_held_out_mse.is_finite());
}

#[test]
fn report_round_trips_through_a_file() {
    let config = ExperimentConfig::default().with_iterations(10);
    let report = Experiment::new(config).unwrap().run(&mut Recorder::default()).unwrap();
    assert_eq!(report.losses.len(), 3);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.json");
    std::fs::write(&path, serde_json::to_string_pretty(&report).unwrap()).unwrap();

    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["config"]["iterations"], 10);
    assert_eq!(json["losses"]["iterations"].as_array().unwrap().len(), 3);
    assert_eq!(json["held_out_x"].as_array().unwrap().len(), 100);
}
