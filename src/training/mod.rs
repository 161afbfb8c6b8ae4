//! The training driver: both networks, one session, one loop.
//!
//! Each iteration runs one gradient-descent step of both networks on the
//! whole dataset, co-evaluated in a single session call. Activation snapshots
//! and losses are sampled on the way and handed to a [`Visualizer`].

use crate::config::ExperimentConfig;
use crate::data::{DataError, Dataset};
use crate::metrics::{MeanSquaredError, Metric};
use crate::nn::Network;
use crate::runtime::session::{Feed, Session, SessionError};
use crate::tensor::{GraphContext, Tensor};
use crate::visualizer::{Visualizer, VisualizerError};
use ndarray::ArrayD;
use serde::Serialize;
use std::cell::RefCell;
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const INPUT_NAME: &str = "xs";
pub const TARGET_NAME: &str = "ys";
pub const PLAIN_NAME: &str = "plain";
pub const NORMALIZED_NAME: &str = "bn";

#[derive(Error, Debug)]
pub enum ExperimentError {
    #[error("data: {0}")]
    Data(#[from] DataError),
    #[error("session: {0}")]
    Session(#[from] SessionError),
    #[error("visualizer: {0}")]
    Visualizer(#[from] VisualizerError),
    #[error("expected one value per network, got {0}")]
    UnexpectedOutputs(usize),
}

pub type ExperimentResult<T> = Result<T, ExperimentError>;

/// Losses sampled every `record_every` iterations, after that iteration's step.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LossHistory {
    pub iterations: Vec<usize>,
    /// Non-finite once the plain network diverges (serialized as `null`).
    pub plain: Vec<f32>,
    pub normalized: Vec<f32>,
}

impl LossHistory {
    pub fn push(&mut self, iteration: usize, plain: f32, normalized: f32) {
        self.iterations.push(iteration);
        self.plain.push(plain);
        self.normalized.push(normalized);
    }

    pub fn len(&self) -> usize {
        self.iterations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.iterations.is_empty()
    }
}

/// Layer inputs of both networks over the whole dataset at one iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivationSnapshot {
    pub iteration: usize,
    pub plain: Vec<ArrayD<f32>>,
    pub normalized: Vec<ArrayD<f32>>,
}

/// Everything the run produced.
#[derive(Debug, Clone, Serialize)]
pub struct ExperimentReport {
    pub config: ExperimentConfig,
    pub losses: LossHistory,
    pub held_out_x: Vec<f32>,
    pub held_out_target: Vec<f32>,
    pub plain_predictions: Vec<f32>,
    pub normalized_predictions: Vec<f32>,
    pub plain_held_out_mse: f64,
    pub normalized_held_out_mse: f64,
}

impl ExperimentReport {
    /// Last recorded losses, `(plain, normalized)`.
    pub fn final_losses(&self) -> Option<(f32, f32)> {
        Some((*self.losses.plain.last()?, *self.losses.normalized.last()?))
    }

    /// Whether the normalized network ended with the lower loss. A
    /// non-finite loss counts as worse than any finite one.
    pub fn normalized_outperforms(&self) -> bool {
        match self.final_losses() {
            Some((plain, normalized)) => rank(normalized) < rank(plain),
            None => false,
        }
    }
}

fn rank(loss: f32) -> f32 {
    if loss.is_finite() {
        loss
    } else {
        f32::INFINITY
    }
}

/// Both networks, their data and the session that trains them.
pub struct Experiment {
    config: ExperimentConfig,
    dataset: Dataset,
    feed: Feed,
    xs: Tensor,
    plain: Network,
    normalized: Network,
    session: Session,
    diverged: [bool; 2],
}

impl Experiment {
    /// Generates the data, builds both networks into one graph and
    /// initializes their parameters.
    pub fn new(config: ExperimentConfig) -> ExperimentResult<Self> {
        let dataset = Dataset::generate(&config.data)?;
        let feed = Feed::from([
            (INPUT_NAME.to_string(), dataset.xs().clone()),
            (TARGET_NAME.to_string(), dataset.ys().clone()),
        ]);

        let context = Rc::new(RefCell::new(GraphContext::new()));
        let xs = Tensor::new_input(&context, INPUT_NAME);
        let ys = Tensor::new_input(&context, TARGET_NAME);
        let plain = Network::build(
            &context,
            &xs,
            &ys,
            &config.network.clone().with_normalize(false),
            PLAIN_NAME,
        );
        let normalized = Network::build(
            &context,
            &xs,
            &ys,
            &config.network.clone().with_normalize(true),
            NORMALIZED_NAME,
        );
        debug!(nodes = context.borrow().main_graph().len(), "built both networks");

        let mut session = Session::new(&context);
        session.initialize(config.seed)?;

        Ok(Self {
            config,
            dataset,
            feed,
            xs,
            plain,
            normalized,
            session,
            diverged: [false; 2],
        })
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn plain(&self) -> &Network {
        &self.plain
    }

    pub fn normalized(&self) -> &Network {
        &self.normalized
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Layer inputs of both networks, evaluated together on the dataset.
    pub fn snapshot(&mut self, iteration: usize) -> ExperimentResult<ActivationSnapshot> {
        let fetches: Vec<&Tensor> = self
            .plain
            .layer_inputs
            .iter()
            .chain(&self.normalized.layer_inputs)
            .collect();
        let mut values = self.session.run(&fetches, &self.feed)?;
        let normalized = values.split_off(self.plain.layer_inputs.len());
        Ok(ActivationSnapshot { iteration, plain: values, normalized })
    }

    /// One optimization step of both networks on the same batch. Returns the
    /// losses before the update, `[plain, normalized]`.
    pub fn step(&mut self) -> ExperimentResult<[f32; 2]> {
        let losses = self
            .session
            .run_train(&[&self.plain.train_op, &self.normalized.train_op], &self.feed)?;
        pair(losses)
    }

    /// Current losses on the dataset, `[plain, normalized]`.
    pub fn losses(&mut self) -> ExperimentResult<[f32; 2]> {
        let values = self
            .session
            .run(&[&self.plain.loss, &self.normalized.loss], &self.feed)?;
        let [plain, normalized] = pair(values)?;
        Ok([scalar(&plain), scalar(&normalized)])
    }

    /// Predictions of both networks for the `[n, 1]` inputs `xs`.
    ///
    /// The normalized network normalizes with the statistics of `xs` itself.
    pub fn predict(&mut self, xs: &ArrayD<f32>) -> ExperimentResult<[ArrayD<f32>; 2]> {
        let feed = Feed::from([(INPUT_NAME.to_string(), xs.clone())]);
        let values = self
            .session
            .run(&[&self.plain.prediction, &self.normalized.prediction], &feed)?;
        pair(values)
    }

    /// Runs the whole loop, `0..=iterations`, and evaluates on the held-out
    /// grid afterwards.
    pub fn run(mut self, visualizer: &mut dyn Visualizer) -> ExperimentResult<ExperimentReport> {
        let config = self.config.clone();
        visualizer.show_dataset(&self.dataset)?;
        info!(
            iterations = config.iterations,
            seed = config.seed,
            "training '{PLAIN_NAME}' and '{NORMALIZED_NAME}' networks"
        );

        let mut history = LossHistory::default();
        for i in 0..=config.iterations {
            if i % config.snapshot_every.max(1) == 0 {
                let snapshot = self.snapshot(i)?;
                visualizer.show_activations(&snapshot)?;
            }

            let before = self.step()?;
            self.watch_divergence(i, before);

            if i % config.record_every.max(1) == 0 {
                let [plain, normalized] = self.losses()?;
                self.watch_divergence(i, [plain, normalized]);
                info!(iteration = i, plain, normalized, "loss");
                history.push(i, plain, normalized);
                visualizer.record_loss(i, plain, normalized)?;
            }
        }

        let grid = Dataset::held_out(&config.data, config.data.n_held_out)?;
        let [plain_pred, normalized_pred] = self.predict(grid.xs())?;
        let plain_mse = held_out_mse(&plain_pred, grid.ys());
        let normalized_mse = held_out_mse(&normalized_pred, grid.ys());
        info!(plain = plain_mse, normalized = normalized_mse, "held-out MSE");

        visualizer.show_losses(&history)?;

        Ok(ExperimentReport {
            losses: history,
            held_out_x: grid.xs().iter().copied().collect(),
            held_out_target: grid.ys().iter().copied().collect(),
            plain_predictions: plain_pred.iter().copied().collect(),
            normalized_predictions: normalized_pred.iter().copied().collect(),
            plain_held_out_mse: plain_mse,
            normalized_held_out_mse: normalized_mse,
            config,
        })
    }

    /// Logs once per network when its loss stops being finite.
    fn watch_divergence(&mut self, iteration: usize, losses: [f32; 2]) {
        let names = [PLAIN_NAME, NORMALIZED_NAME];
        for k in 0..2 {
            if !self.diverged[k] && !losses[k].is_finite() {
                self.diverged[k] = true;
                warn!(iteration, loss = losses[k], "network '{}' diverged", names[k]);
            }
        }
    }

    /// The input placeholder both networks share.
    pub fn input(&self) -> &Tensor {
        &self.xs
    }
}

fn pair<T>(values: Vec<T>) -> ExperimentResult<[T; 2]> {
    <[T; 2]>::try_from(values).map_err(|v| ExperimentError::UnexpectedOutputs(v.len()))
}

fn scalar(value: &ArrayD<f32>) -> f32 {
    value.iter().next().copied().unwrap_or(f32::NAN)
}

fn held_out_mse(predictions: &ArrayD<f32>, targets: &ArrayD<f32>) -> f64 {
    let mut mse = MeanSquaredError::new();
    mse.update(predictions, targets);
    mse.compute()
}
