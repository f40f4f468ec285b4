use burn_core::module::AutodiffModule;
use burn_core::tensor::backend::Backend;
use neuralcde::cdeint::{CdeMethod, CdeSolverConfig};
use neuralcde::model::NeuralCdeConfig;
use neuralcde::spirals::{generate_spirals, SpiralConfig};
use neuralcde::spline::natural_cubic_spline_coeffs;
use neuralcde::train::{evaluate_accuracy, predict_probabilities, train_neural_cde, TrainConfig};
use neuralcde::BurnBackend;

#[test]
#[ignore = "full 100-epoch run; takes minutes on CPU"]
fn spirals_full_run_beats_chance_by_a_wide_margin() {
    let device = <BurnBackend as Backend>::Device::default();
    let train = generate_spirals(&SpiralConfig::default()).unwrap();
    let test = generate_spirals(&SpiralConfig {
        seed: 1,
        ..Default::default()
    })
    .unwrap();
    let train_coeffs = natural_cubic_spline_coeffs(&train.t.view(), &train.x.view()).unwrap();
    let test_coeffs = natural_cubic_spline_coeffs(&test.t.view(), &test.x.view()).unwrap();

    let cfg = TrainConfig::default();
    let (model, history) = train_neural_cde(
        &device,
        &NeuralCdeConfig::new(2, 8, 1),
        &train_coeffs,
        &train.y.view(),
        &cfg,
        |_| {},
    )
    .expect("training should succeed");
    assert_eq!(history.len(), 100);

    let acc = evaluate_accuracy(
        &model.valid(),
        &test_coeffs,
        &test.y.view(),
        &cfg.solver,
        &device,
    )
    .unwrap();
    assert!(acc > 0.7, "test accuracy too low: {acc}");
}

#[test]
fn coarse_spirals_are_learned_in_a_few_epochs() {
    let device = <BurnBackend as Backend>::Device::default();
    let coarse = SpiralConfig {
        n_steps: 30,
        ..Default::default()
    };
    let train = generate_spirals(&coarse).unwrap();
    let test = generate_spirals(&SpiralConfig { seed: 1, ..coarse }).unwrap();
    let train_coeffs = natural_cubic_spline_coeffs(&train.t.view(), &train.x.view()).unwrap();
    let test_coeffs = natural_cubic_spline_coeffs(&test.t.view(), &test.x.view()).unwrap();

    let cfg = TrainConfig {
        epochs: 25,
        lr: 5e-3,
        ..Default::default()
    };
    let (model, history) = train_neural_cde(
        &device,
        &NeuralCdeConfig::new(2, 8, 1),
        &train_coeffs,
        &train.y.view(),
        &cfg,
        |_| {},
    )
    .expect("training should succeed");
    assert!(
        history[24].last_batch_loss < history[0].last_batch_loss,
        "loss did not fall: {history:?}"
    );

    let acc = evaluate_accuracy(
        &model.valid(),
        &test_coeffs,
        &test.y.view(),
        &cfg.solver,
        &device,
    )
    .unwrap();
    assert!(acc > 0.6, "test accuracy too low after a short run: {acc}");
}

#[test]
fn short_run_produces_finite_losses_and_valid_probabilities() {
    let device = <BurnBackend as Backend>::Device::default();
    let data_cfg = SpiralConfig {
        n_samples: 16,
        n_steps: 20,
        seed: 5,
        ..Default::default()
    };
    let train = generate_spirals(&data_cfg).unwrap();
    let coeffs = natural_cubic_spline_coeffs(&train.t.view(), &train.x.view()).unwrap();

    let cfg = TrainConfig {
        epochs: 2,
        batch_size: 8,
        ..Default::default()
    };
    let mut printed = Vec::new();
    let (model, history) = train_neural_cde(
        &device,
        &NeuralCdeConfig::new(2, 8, 1),
        &coeffs,
        &train.y.view(),
        &cfg,
        |r| printed.push(format!("Epoch: {}   Training loss: {}", r.epoch, r.last_batch_loss)),
    )
    .unwrap();

    assert_eq!(printed.len(), 2);
    assert!(printed[0].starts_with("Epoch: 0   Training loss: "));
    assert!(history.iter().all(|r| r.last_batch_loss.is_finite() && r.last_batch_loss >= 0.0));

    let probs = predict_probabilities(&model.valid(), &coeffs, &cfg.solver, &device).unwrap();
    assert_eq!(probs.len(), 16);
    assert!(probs.iter().all(|&p| (0.0..=1.0).contains(&p)));
}

#[test]
fn adaptive_solver_trains_too() {
    let device = <BurnBackend as Backend>::Device::default();
    let train = generate_spirals(&SpiralConfig {
        n_samples: 8,
        n_steps: 12,
        seed: 9,
        ..Default::default()
    })
    .unwrap();
    let coeffs = natural_cubic_spline_coeffs(&train.t.view(), &train.x.view()).unwrap();
    let cfg = TrainConfig {
        epochs: 1,
        batch_size: 4,
        solver: CdeSolverConfig::default().with_method(CdeMethod::Dopri5),
        ..Default::default()
    };
    let (_model, history) = train_neural_cde(
        &device,
        &NeuralCdeConfig::new(2, 4, 1).with_field_width(32),
        &coeffs,
        &train.y.view(),
        &cfg,
        |_| {},
    )
    .unwrap();
    assert!(history[0].last_batch_loss.is_finite());
}
