//! Regression metrics.

use super::Metric;
use ndarray::ArrayD;

/// Mean Squared Error (MSE).
///
/// MSE = (1/n) * Σ(y_pred - y_true)²
///
/// Accumulates in `f64`. A single non-finite prediction makes the result
/// non-finite, which is how a diverged network shows up.
#[derive(Debug, Clone, Default)]
pub struct MeanSquaredError {
    /// Running Σ(y_pred - y_true)².
    sum_squared_error: f64,
    /// Number of elements seen.
    count: usize,
}

impl MeanSquaredError {
    /// Empty accumulator; `compute` returns 0 until the first update.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Metric for MeanSquaredError {
    type Prediction = ArrayD<f32>;
    type Target = ArrayD<f32>;
    type Output = f64;

    /// Pairs predictions and targets element by element in logical order.
    /// Extra elements of the longer array are ignored.
    fn update(&mut self, predictions: &Self::Prediction, targets: &Self::Target) {
        for (pred, target) in predictions.iter().zip(targets.iter()) {
            let diff = *pred as f64 - *target as f64;
            self.sum_squared_error += diff * diff;
            self.count += 1;
        }
    }

    fn compute(&self) -> Self::Output {
        if self.count == 0 {
            0.0
        } else {
            self.sum_squared_error / self.count as f64
        }
    }

    fn reset(&mut self) {
        self.sum_squared_error = 0.0;
        self.count = 0;
    }

    fn name(&self) -> &str {
        "MSE"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn accumulates_across_updates() {
        let mut mse = MeanSquaredError::new();
        mse.update(&array![[1.0f32], [2.0]].into_dyn(), &array![[1.0f32], [4.0]].into_dyn());
        mse.update(&array![[0.0f32]].into_dyn(), &array![[1.0f32]].into_dyn());
        assert_relative_eq!(mse.compute(), 5.0 / 3.0);
        mse.reset();
        assert_eq!(mse.compute(), 0.0);
    }

    #[test]
    fn diverged_predictions_give_non_finite_error() {
        let mut mse = MeanSquaredError::new();
        mse.update(&array![f32::NAN, 1.0].into_dyn(), &array![0.0f32, 1.0].into_dyn());
        assert!(!mse.compute().is_finite());
    }
}
