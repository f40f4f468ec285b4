//! Train a Neural CDE to tell clockwise from anticlockwise spirals.
//!
//! ```bash
//! cargo run --release --bin train_spirals
//! RUST_LOG=neuralcde=debug cargo run --release --bin train_spirals
//! ```
//!
//! Prints one line per epoch (the loss of that epoch's last minibatch) and the test accuracy.

use burn_core::module::AutodiffModule;
use burn_core::tensor::backend::Backend;
use neuralcde::model::NeuralCdeConfig;
use neuralcde::spirals::{generate_spirals, SpiralConfig};
use neuralcde::spline::natural_cubic_spline_coeffs;
use neuralcde::train::{evaluate_accuracy, train_neural_cde, TrainConfig};
use neuralcde::BurnBackend;
use tracing_subscriber::EnvFilter;

fn main() -> neuralcde::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let device = <BurnBackend as Backend>::Device::default();

    // Time grid is shared across the dataset, so it carries no batch dimension.
    let train = generate_spirals(&SpiralConfig {
        seed: 0,
        ..Default::default()
    })?;

    // 2 input channels (x, y), 8 hidden channels, 1 logit.
    let model_cfg = NeuralCdeConfig::new(2, 8, 1);
    let cfg = TrainConfig::default();

    // Interpolation is the expensive part; do it once and slice per batch.
    let train_coeffs = natural_cubic_spline_coeffs(&train.t.view(), &train.x.view())?;

    let (model, _history) = train_neural_cde(
        &device,
        &model_cfg,
        &train_coeffs,
        &train.y.view(),
        &cfg,
        |report| {
            println!(
                "Epoch: {}   Training loss: {}",
                report.epoch, report.last_batch_loss
            )
        },
    )?;

    let test = generate_spirals(&SpiralConfig {
        seed: 1,
        ..Default::default()
    })?;
    let test_coeffs = natural_cubic_spline_coeffs(&test.t.view(), &test.x.view())?;
    let accuracy = evaluate_accuracy(
        &model.valid(),
        &test_coeffs,
        &test.y.view(),
        &cfg.solver,
        &device,
    )?;
    println!("Test Accuracy: {accuracy}");

    Ok(())
}
