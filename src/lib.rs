//! # neuralcde
//!
//! Neural controlled differential equations (Neural CDEs) as a small library on top of `burn`.
//!
//! A Neural CDE evolves a hidden state driven by a continuous path \(X\) built from data:
//! \[
//! z_t = z_{t_0} + \int_{t_0}^{t} f_\theta(z_s)\, dX_s,
//! \]
//! where \(f_\theta\) maps the hidden state to a `hidden × channels` matrix.
//!
//! This crate is intentionally small:
//!
//! - interpolation (natural cubic splines) is precomputed on the host with `ndarray`,
//! - integration happens on `burn` tensors so gradients flow through every solver step,
//! - layers, autodiff and the optimizer are `burn`'s.
//!
//! ## Public invariants (must not change)
//!
//! - **Determinism knobs are explicit**: data generation and batch shuffling take a `seed`.
//! - **Coefficients are a dataset**: spline coefficients are computed once and only ever sliced.
//! - **Knots are breakpoints**: the integrator never takes a step across a spline knot.
//!
//! ## Module map
//!
//! - `spirals`: toy dataset (clockwise vs anticlockwise spirals)
//! - `spline`: natural cubic spline coefficients on a shared time grid
//! - `path`: device-resident cubic path (value and derivative at any time)
//! - `cdeint`: CDE integration (`Euler`, `Heun`, `Rk4`, adaptive `Dopri5`)
//! - `model`: the vector field `CdeFunc` and the `NeuralCde` classifier
//! - `train`: Adam training loop, BCE-with-logits, accuracy

pub mod cdeint;
pub mod model;
pub mod path;
pub mod spirals;
pub mod spline;
pub mod train;

use burn_autodiff::Autodiff;
use burn_ndarray::NdArray;

/// Default training backend: ndarray + autodiff.
pub type BurnBackend = Autodiff<NdArray<f32>>;

/// Backend for evaluation once a model has been detached with `AutodiffModule::valid`.
pub type InferenceBackend = NdArray<f32>;

/// neuralcde error variants.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("shape mismatch: {0}")]
    Shape(&'static str),
    #[error("domain error: {0}")]
    Domain(&'static str),
    #[error("solver error: {0}")]
    Solver(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
