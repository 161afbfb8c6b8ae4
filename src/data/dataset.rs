//! The synthetic noisy-quadratic dataset.

use crate::config::DataConfig;
use ndarray::{Array, Array2, ArrayD, Axis};
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataError {
    #[error("invalid noise standard deviation {0}")]
    InvalidNoise(f32),
    #[error("dataset needs at least 2 points, got {0}")]
    TooFewPoints(usize),
}

/// The curve the data is sampled from.
pub fn ground_truth(x: f32) -> f32 {
    x * x - 5.0
}

/// Ordered `(x, y)` pairs held as two `[n, 1]` columns.
///
/// `x` is evenly spaced over `[x_min, x_max]` and `y = x^2 - 5 + N(0, noise_std)`.
/// Generation is a pure function of the config: the same seed always yields
/// the same bits.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    xs: ArrayD<f32>,
    ys: ArrayD<f32>,
}

impl Dataset {
    pub fn generate(config: &DataConfig) -> Result<Self, DataError> {
        if config.n_samples < 2 {
            return Err(DataError::TooFewPoints(config.n_samples));
        }
        let noise = Normal::new(0.0f32, config.noise_std)
            .map_err(|_| DataError::InvalidNoise(config.noise_std))?;
        let mut rng = StdRng::seed_from_u64(config.seed);

        let xs = column(config.x_min, config.x_max, config.n_samples);
        let noise: Array2<f32> = Array::random_using((config.n_samples, 1), noise, &mut rng);
        let ys = xs.mapv(ground_truth) + noise;

        Ok(Self { xs: xs.into_dyn(), ys: ys.into_dyn() })
    }

    /// Evenly spaced inputs over the same range with their noiseless targets.
    pub fn held_out(config: &DataConfig, n: usize) -> Result<Self, DataError> {
        if n < 2 {
            return Err(DataError::TooFewPoints(n));
        }
        let xs = column(config.x_min, config.x_max, n);
        let ys = xs.mapv(ground_truth);
        Ok(Self { xs: xs.into_dyn(), ys: ys.into_dyn() })
    }

    pub fn xs(&self) -> &ArrayD<f32> {
        &self.xs
    }

    pub fn ys(&self) -> &ArrayD<f32> {
        &self.ys
    }

    pub fn len(&self) -> usize {
        self.xs.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(x, y)` pairs, for scatter plots.
    pub fn points(&self) -> Vec<(f32, f32)> {
        self.xs.iter().copied().zip(self.ys.iter().copied()).collect()
    }
}

fn column(start: f32, end: f32, n: usize) -> Array2<f32> {
    Array::linspace(start, end, n).insert_axis(Axis(1))
}
