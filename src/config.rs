//! Experiment configuration.
//!
//! Every constant of the experiment lives here with its default value. The
//! command line only overrides the seed and the iteration count.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Synthetic dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    pub seed: u64,
    pub n_samples: usize,
    /// Inclusive range of the evenly spaced inputs.
    pub x_min: f32,
    pub x_max: f32,
    /// Standard deviation of the Gaussian noise added to `x^2 - 5`.
    pub noise_std: f32,
    /// Points of the held-out evaluation grid.
    pub n_held_out: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            seed: 1,
            n_samples: 500,
            x_min: -7.0,
            x_max: 10.0,
            noise_std: 8.0,
            n_held_out: 100,
        }
    }
}

/// One network of the comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Batch-normalize the raw input and every hidden pre-activation.
    pub normalize: bool,
    pub n_layers: usize,
    pub n_hidden: usize,
    pub learning_rate: f32,
    /// Variance epsilon of the normalization.
    pub epsilon: f32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            normalize: false,
            n_layers: 7,
            n_hidden: 30,
            learning_rate: 0.001,
            epsilon: 0.001,
        }
    }
}

impl NetworkConfig {
    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }
}

/// The whole experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Seeds both the data noise and the weight initialization.
    pub seed: u64,
    pub data: DataConfig,
    /// Shared by both networks; `normalize` is set per network.
    pub network: NetworkConfig,
    /// Last iteration; the loop runs `0..=iterations`.
    pub iterations: usize,
    /// Activation histograms every this many iterations.
    pub snapshot_every: usize,
    /// Loss recording every this many iterations.
    pub record_every: usize,
    pub histogram_bins: usize,
    /// Pause after each histogram update so a window can redraw.
    #[serde(with = "millis")]
    pub redraw_pause: Duration,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            seed: 1,
            data: DataConfig::default(),
            network: NetworkConfig::default(),
            iterations: 250,
            snapshot_every: 50,
            record_every: 5,
            histogram_bins: 15,
            redraw_pause: Duration::from_millis(10),
        }
    }
}

impl ExperimentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the experiment seed, which also reseeds the data.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.data.seed = seed;
        self
    }

    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_redraw_pause(mut self, pause: Duration) -> Self {
        self.redraw_pause = pause;
        self
    }

    /// Number of entries each loss history ends up with.
    pub fn recorded_points(&self) -> usize {
        self.iterations / self.record_every.max(1) + 1
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
