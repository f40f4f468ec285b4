//! Training (Burn autodiff + Adam) and evaluation for binary Neural CDE classifiers.
//!
//! The loop follows the usual minibatch shape:
//! coefficients → batch slice → forward (interpolate, integrate, read out) → BCE-with-logits →
//! backward → Adam step. Gradients are consumed by each step, so there is nothing to reset.
//!
//! The per-epoch loss reported is the loss of the epoch's **last minibatch**, not an average.

use burn_core as burn;

use burn::tensor::{activation, backend::Backend, ElementConversion, Tensor, TensorData};
use burn_optim::{AdamConfig, GradientsParams, LearningRate, Optimizer};
use ndarray::{Array1, ArrayView1};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::cdeint::CdeSolverConfig;
use crate::model::{NeuralCde, NeuralCdeConfig};
use crate::path::CubicPath;
use crate::spline::NaturalCubicCoeffs;
use crate::{BurnBackend, Error, Result};

/// Training configuration.
#[derive(Debug, Clone)]
pub struct TrainConfig {
    /// Passes over the training set.
    pub epochs: usize,
    /// Minibatch size (the last batch may be smaller).
    pub batch_size: usize,
    /// Adam learning rate.
    pub lr: LearningRate,
    /// Adam denominator epsilon.
    pub adam_epsilon: f32,
    /// Reshuffle sample order at the start of every epoch.
    pub shuffle: bool,
    /// RNG seed for shuffling.
    pub seed: u64,
    /// Solver used in every forward pass.
    pub solver: CdeSolverConfig,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 100,
            batch_size: 32,
            lr: 1e-3,
            adam_epsilon: 1e-8,
            shuffle: false,
            seed: 0,
            solver: CdeSolverConfig::default(),
        }
    }
}

/// What one epoch reports.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochReport {
    pub epoch: usize,
    /// Loss of the final minibatch of the epoch.
    pub last_batch_loss: f32,
}

/// Mean binary cross-entropy on logits: `max(x, 0) - x y + log(1 + exp(-|x|))`.
pub fn bce_with_logits<B: Backend>(logits: Tensor<B, 1>, targets: Tensor<B, 1>) -> Tensor<B, 1> {
    let relu = logits.clone().clamp_min(0.0);
    let softplus = logits.clone().abs().neg().exp().log1p();
    (relu - logits * targets + softplus).mean()
}

fn validate_labels(labels: &ArrayView1<f32>, batch: usize) -> Result<()> {
    if labels.len() != batch {
        return Err(Error::Shape("labels length must match coefficient batch"));
    }
    if labels.iter().any(|&v| v != 0.0 && v != 1.0) {
        return Err(Error::Domain("labels must be 0 or 1"));
    }
    Ok(())
}

fn labels_to_burn<B: Backend>(
    device: &B::Device,
    labels: &ArrayView1<f32>,
    idx: &[usize],
) -> Tensor<B, 1> {
    let v: Vec<f32> = idx.iter().map(|&i| labels[i]).collect();
    Tensor::from_data(TensorData::new(v, [idx.len()]), device)
}

/// Train a binary Neural CDE classifier on precomputed spline coefficients.
///
/// The state is integrated over the full knot range of `coeffs`. `on_epoch` sees each
/// [`EpochReport`] as soon as the epoch finishes; the same reports are returned as a history.
pub fn train_neural_cde(
    device: &<BurnBackend as Backend>::Device,
    model_cfg: &NeuralCdeConfig,
    coeffs: &NaturalCubicCoeffs,
    labels: &ArrayView1<f32>,
    cfg: &TrainConfig,
    mut on_epoch: impl FnMut(&EpochReport),
) -> Result<(NeuralCde<BurnBackend>, Vec<EpochReport>)> {
    let n = coeffs.batch();
    validate_labels(labels, n)?;
    if model_cfg.output_channels != 1 {
        return Err(Error::Shape("binary classification needs output_channels == 1"));
    }
    if model_cfg.input_channels != coeffs.channels() {
        return Err(Error::Shape("input_channels must match coefficient channels"));
    }
    if cfg.epochs == 0 || cfg.batch_size == 0 {
        return Err(Error::Domain("epochs and batch_size must be >= 1"));
    }
    if !cfg.lr.is_finite() || cfg.lr <= 0.0 {
        return Err(Error::Domain("lr must be positive and finite"));
    }
    if !cfg.adam_epsilon.is_finite() || cfg.adam_epsilon <= 0.0 {
        return Err(Error::Domain("adam_epsilon must be positive and finite"));
    }

    let (t0, t1) = (coeffs.t_start(), coeffs.t_end());
    let mut model = model_cfg.init::<BurnBackend>(device)?;
    let mut optim = AdamConfig::new()
        .with_epsilon(cfg.adam_epsilon)
        .init::<BurnBackend, NeuralCde<BurnBackend>>();
    let mut rng = ChaCha8Rng::seed_from_u64(cfg.seed);

    let mut order: Vec<usize> = (0..n).collect();
    let mut history = Vec::with_capacity(cfg.epochs);
    for epoch in 0..cfg.epochs {
        if cfg.shuffle {
            order.shuffle(&mut rng);
        }
        let mut last_batch_loss = f32::NAN;
        for (step, idx) in order.chunks(cfg.batch_size).enumerate() {
            let path = CubicPath::<BurnBackend>::new(&coeffs.select(idx)?, device);
            let targets = labels_to_burn::<BurnBackend>(device, labels, idx);

            let logits = model.forward(&path, t0, t1, &cfg.solver)?.reshape([idx.len()]);
            let loss = bce_with_logits(logits, targets);
            last_batch_loss = loss.clone().into_scalar().elem::<f32>();
            if !last_batch_loss.is_finite() {
                return Err(Error::Solver("training loss is not finite"));
            }
            tracing::trace!(epoch, step, loss = last_batch_loss, "minibatch");

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optim.step(cfg.lr, model, grads);
        }

        let report = EpochReport {
            epoch,
            last_batch_loss,
        };
        tracing::debug!(epoch, loss = last_batch_loss, "epoch done");
        on_epoch(&report);
        history.push(report);
    }

    Ok((model, history))
}

/// Sigmoid probabilities for every sample in `coeffs`, integrating over the full knot range.
pub fn predict_probabilities<B: Backend>(
    model: &NeuralCde<B>,
    coeffs: &NaturalCubicCoeffs,
    solver: &CdeSolverConfig,
    device: &B::Device,
) -> Result<Array1<f32>> {
    let path = CubicPath::<B>::new(coeffs, device);
    let logits = model.forward(&path, coeffs.t_start(), coeffs.t_end(), solver)?;
    let [batch, out] = logits.dims();
    if out != 1 {
        return Err(Error::Shape("binary classification needs output_channels == 1"));
    }
    let probs = activation::sigmoid(logits.reshape([batch]));
    let v = probs
        .into_data()
        .to_vec::<f32>()
        .map_err(|_| Error::Shape("probabilities are not f32"))?;
    Ok(Array1::from_vec(v))
}

/// Fraction of samples where `p > 0.5` agrees with the 0/1 label.
pub fn accuracy_from_probabilities(
    probs: &ArrayView1<f32>,
    labels: &ArrayView1<f32>,
) -> Result<f32> {
    if probs.is_empty() {
        return Err(Error::Domain("probs must be non-empty"));
    }
    validate_labels(labels, probs.len())?;
    let correct = probs
        .iter()
        .zip(labels.iter())
        .filter(|&(&p, &y)| (if p > 0.5 { 1.0 } else { 0.0 }) == y)
        .count();
    Ok(correct as f32 / probs.len() as f32)
}

/// Test accuracy of `model` on `coeffs` against `labels`.
pub fn evaluate_accuracy<B: Backend>(
    model: &NeuralCde<B>,
    coeffs: &NaturalCubicCoeffs,
    labels: &ArrayView1<f32>,
    solver: &CdeSolverConfig,
    device: &B::Device,
) -> Result<f32> {
    validate_labels(labels, coeffs.batch())?;
    let probs = predict_probabilities(model, coeffs, solver, device)?;
    accuracy_from_probabilities(&probs.view(), labels)
}
