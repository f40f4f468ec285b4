//! Controlled differential equation solvers.
//!
//! Solves
//! \[
//! \frac{dz}{dt} = f(z_t)\,\frac{dX}{dt}(t), \qquad z_{t_0} = z_0,
//! \]
//! where \(f(z)\) is a `hidden × channels` matrix per sample and \(X\) is a [`CubicPath`].
//!
//! Every operation is a `burn` tensor op, so on an autodiff backend gradients reach the
//! parameters of \(f\) and \(z_0\) by backpropagating through the solver steps.
//!
//! Spline knots are always breakpoints: the path's derivative is only piecewise smooth, and
//! stepping across a knot would cost accuracy for no gain.

use burn_core as burn;

use burn::tensor::{backend::Backend, ElementConversion, Tensor};

use crate::path::CubicPath;
use crate::{Error, Result};

/// A learned (or fixed) vector field \(f\) for a CDE.
pub trait VectorField<B: Backend> {
    /// `z`: `[batch, hidden]` → `[batch, hidden, channels]`.
    fn field(&self, z: Tensor<B, 2>) -> Tensor<B, 3>;
}

impl<B: Backend, F> VectorField<B> for F
where
    F: Fn(Tensor<B, 2>) -> Tensor<B, 3>,
{
    fn field(&self, z: Tensor<B, 2>) -> Tensor<B, 3> {
        self(z)
    }
}

/// Integration method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CdeMethod {
    /// Explicit Euler (1st order).
    Euler,
    /// Heun / explicit trapezoid (2nd order).
    Heun,
    /// Classic Runge–Kutta (4th order).
    Rk4,
    /// Dormand–Prince 5(4) with adaptive step size.
    Dopri5,
}

/// Solver settings.
#[derive(Debug, Clone)]
pub struct CdeSolverConfig {
    pub method: CdeMethod,
    /// Largest step taken inside one knot interval.
    ///
    /// Fixed-step methods take exactly one step per knot interval when `None`. For `Dopri5` this
    /// is the initial step guess.
    pub step_size: Option<f32>,
    /// Relative tolerance (`Dopri5` only).
    pub rtol: f32,
    /// Absolute tolerance (`Dopri5` only).
    pub atol: f32,
    /// Upper bound on attempted steps over the whole solve.
    pub max_steps: usize,
}

impl Default for CdeSolverConfig {
    fn default() -> Self {
        Self {
            method: CdeMethod::Rk4,
            step_size: None,
            rtol: 1e-4,
            atol: 1e-6,
            max_steps: 10_000,
        }
    }
}

impl CdeSolverConfig {
    pub fn with_method(mut self, method: CdeMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_step_size(mut self, step_size: f32) -> Self {
        self.step_size = Some(step_size);
        self
    }

    fn validate(&self) -> Result<()> {
        if let Some(h) = self.step_size {
            if !h.is_finite() || h <= 0.0 {
                return Err(Error::Domain("step_size must be positive and finite"));
            }
        }
        if self.max_steps == 0 {
            return Err(Error::Domain("max_steps must be >= 1"));
        }
        if self.method == CdeMethod::Dopri5
            && (!self.rtol.is_finite() || !self.atol.is_finite() || self.rtol <= 0.0 || self.atol < 0.0)
        {
            return Err(Error::Domain("rtol must be positive and atol nonnegative"));
        }
        Ok(())
    }
}

/// Right-hand side \(f(z)\,X'(t)\), shape `[batch, hidden]`.
fn cde_rhs<B: Backend, F: VectorField<B> + ?Sized>(
    path: &CubicPath<B>,
    func: &F,
    z: Tensor<B, 2>,
    t: f32,
) -> Tensor<B, 2> {
    let [batch, hidden] = z.dims();
    let dx = path.derivative(t);
    let channels = dx.dims()[1];
    func.field(z)
        .matmul(dx.reshape([batch, channels, 1]))
        .reshape([batch, hidden])
}

struct StepBudget {
    used: usize,
    max: usize,
}

impl StepBudget {
    fn take(&mut self) -> Result<()> {
        self.used += 1;
        if self.used > self.max {
            return Err(Error::Solver("exceeded max_steps"));
        }
        Ok(())
    }
}

fn integrate_fixed<B: Backend>(
    method: CdeMethod,
    rhs: &impl Fn(Tensor<B, 2>, f32) -> Tensor<B, 2>,
    mut z: Tensor<B, 2>,
    t0: f32,
    t1: f32,
    step_size: Option<f32>,
    budget: &mut StepBudget,
) -> Result<Tensor<B, 2>> {
    let steps = match step_size {
        Some(h) => ((t1 - t0) / h).ceil().max(1.0) as usize,
        None => 1,
    };
    let dt = (t1 - t0) / steps as f32;

    for k in 0..steps {
        budget.take()?;
        let t = t0 + dt * k as f32;
        z = match method {
            CdeMethod::Euler => z.clone() + rhs(z, t).mul_scalar(dt),
            CdeMethod::Heun => {
                let k1 = rhs(z.clone(), t);
                // predictor
                let z_pred = z.clone() + k1.clone().mul_scalar(dt);
                // corrector
                let k2 = rhs(z_pred, t + dt);
                z + (k1 + k2).mul_scalar(0.5 * dt)
            }
            CdeMethod::Rk4 | CdeMethod::Dopri5 => {
                let half = 0.5 * dt;
                let k1 = rhs(z.clone(), t);
                let k2 = rhs(z.clone() + k1.clone().mul_scalar(half), t + half);
                let k3 = rhs(z.clone() + k2.clone().mul_scalar(half), t + half);
                let k4 = rhs(z.clone() + k3.clone().mul_scalar(dt), t + dt);
                let incr = k1 + k2.mul_scalar(2.0) + k3.mul_scalar(2.0) + k4;
                z + incr.mul_scalar(dt / 6.0)
            }
        };
    }
    Ok(z)
}

/// One Dormand–Prince step: (5th-order solution, embedded error estimate).
fn dopri5_step<B: Backend>(
    rhs: &impl Fn(Tensor<B, 2>, f32) -> Tensor<B, 2>,
    z: &Tensor<B, 2>,
    t: f32,
    h: f32,
) -> (Tensor<B, 2>, Tensor<B, 2>) {
    const C2: f32 = 1.0 / 5.0;
    const C3: f32 = 3.0 / 10.0;
    const C4: f32 = 4.0 / 5.0;
    const C5: f32 = 8.0 / 9.0;

    const A21: f32 = 1.0 / 5.0;
    const A31: f32 = 3.0 / 40.0;
    const A32: f32 = 9.0 / 40.0;
    const A41: f32 = 44.0 / 45.0;
    const A42: f32 = -56.0 / 15.0;
    const A43: f32 = 32.0 / 9.0;
    const A51: f32 = 19372.0 / 6561.0;
    const A52: f32 = -25360.0 / 2187.0;
    const A53: f32 = 64448.0 / 6561.0;
    const A54: f32 = -212.0 / 729.0;
    const A61: f32 = 9017.0 / 3168.0;
    const A62: f32 = -355.0 / 33.0;
    const A63: f32 = 46732.0 / 5247.0;
    const A64: f32 = 49.0 / 176.0;
    const A65: f32 = -5103.0 / 18656.0;

    // 5th-order weights (also row 7 of the tableau).
    const B1: f32 = 35.0 / 384.0;
    const B3: f32 = 500.0 / 1113.0;
    const B4: f32 = 125.0 / 192.0;
    const B5: f32 = -2187.0 / 6784.0;
    const B6: f32 = 11.0 / 84.0;

    // 5th minus 4th order weights.
    const E1: f32 = 71.0 / 57600.0;
    const E3: f32 = -71.0 / 16695.0;
    const E4: f32 = 71.0 / 1920.0;
    const E5: f32 = -17253.0 / 339200.0;
    const E6: f32 = 22.0 / 525.0;
    const E7: f32 = -1.0 / 40.0;

    let k1 = rhs(z.clone(), t);
    let k2 = rhs(z.clone() + k1.clone().mul_scalar(h * A21), t + C2 * h);
    let k3 = rhs(
        z.clone() + k1.clone().mul_scalar(h * A31) + k2.clone().mul_scalar(h * A32),
        t + C3 * h,
    );
    let k4 = rhs(
        z.clone()
            + k1.clone().mul_scalar(h * A41)
            + k2.clone().mul_scalar(h * A42)
            + k3.clone().mul_scalar(h * A43),
        t + C4 * h,
    );
    let k5 = rhs(
        z.clone()
            + k1.clone().mul_scalar(h * A51)
            + k2.clone().mul_scalar(h * A52)
            + k3.clone().mul_scalar(h * A53)
            + k4.clone().mul_scalar(h * A54),
        t + C5 * h,
    );
    let k6 = rhs(
        z.clone()
            + k1.clone().mul_scalar(h * A61)
            + k2.mul_scalar(h * A62)
            + k3.clone().mul_scalar(h * A63)
            + k4.clone().mul_scalar(h * A64)
            + k5.clone().mul_scalar(h * A65),
        t + h,
    );

    let z_new = z.clone()
        + k1.clone().mul_scalar(h * B1)
        + k3.clone().mul_scalar(h * B3)
        + k4.clone().mul_scalar(h * B4)
        + k5.clone().mul_scalar(h * B5)
        + k6.clone().mul_scalar(h * B6);
    let k7 = rhs(z_new.clone(), t + h);

    let z_err = k1.mul_scalar(h * E1)
        + k3.mul_scalar(h * E3)
        + k4.mul_scalar(h * E4)
        + k5.mul_scalar(h * E5)
        + k6.mul_scalar(h * E6)
        + k7.mul_scalar(h * E7);

    (z_new, z_err)
}

/// RMS of the error relative to `atol + rtol * max(|z|, |z_new|)`. Computed off the tape.
fn error_norm<B: Backend>(
    z_err: Tensor<B, 2>,
    z: &Tensor<B, 2>,
    z_new: &Tensor<B, 2>,
    rtol: f32,
    atol: f32,
) -> f32 {
    let scale = z
        .clone()
        .detach()
        .abs()
        .max_pair(z_new.clone().detach().abs())
        .mul_scalar(rtol)
        .add_scalar(atol);
    let ratio = z_err.detach() / scale;
    ratio
        .powf_scalar(2.0)
        .mean()
        .sqrt()
        .into_scalar()
        .elem::<f32>()
}

fn next_step(h: f32, err: f32) -> f32 {
    const SAFETY: f32 = 0.9;
    const MIN_FACTOR: f32 = 0.2;
    const MAX_FACTOR: f32 = 10.0;
    if err == 0.0 {
        return h * MAX_FACTOR;
    }
    let factor = (SAFETY * err.powf(-0.2)).clamp(MIN_FACTOR, MAX_FACTOR);
    h * factor
}

fn integrate_adaptive<B: Backend>(
    rhs: &impl Fn(Tensor<B, 2>, f32) -> Tensor<B, 2>,
    mut z: Tensor<B, 2>,
    t0: f32,
    t1: f32,
    cfg: &CdeSolverConfig,
    budget: &mut StepBudget,
) -> Result<Tensor<B, 2>> {
    let mut t = t0;
    let mut h = cfg.step_size.unwrap_or(t1 - t0).min(t1 - t0);
    let min_step = f32::EPSILON * t0.abs().max(t1.abs()).max(1.0);

    while t < t1 {
        let remaining = t1 - t;
        // A leftover shorter than `min_step` is rounding; finish the segment in this step.
        let last = h >= remaining - min_step;
        if last {
            h = remaining;
        }
        if h <= min_step {
            return Err(Error::Solver("step size underflow"));
        }
        budget.take()?;

        let (z_new, z_err) = dopri5_step(rhs, &z, t, h);
        let err = error_norm(z_err, &z, &z_new, cfg.rtol, cfg.atol);
        if !err.is_finite() {
            return Err(Error::Solver("non-finite error estimate"));
        }
        if err <= 1.0 {
            t = if last { t1 } else { t + h };
            z = z_new;
        } else {
            tracing::debug!(t, h, err, "dopri5 step rejected");
        }
        h = next_step(h, err);
    }
    Ok(z)
}

/// Solve the CDE driven by `path` from `ts[0]`, reporting the state at every time in `ts`.
///
/// - `z0`: `[batch, hidden]`, the state at `ts[0]`.
/// - `ts`: non-empty, strictly increasing, inside `[path.t_start(), path.t_end()]`.
///
/// Returns `[batch, ts.len(), hidden]`; slot `0` is `z0` itself.
pub fn cdeint<B, F>(
    path: &CubicPath<B>,
    func: &F,
    z0: Tensor<B, 2>,
    ts: &[f32],
    cfg: &CdeSolverConfig,
) -> Result<Tensor<B, 3>>
where
    B: Backend,
    F: VectorField<B> + ?Sized,
{
    cfg.validate()?;
    if ts.is_empty() {
        return Err(Error::Domain("ts must be non-empty"));
    }
    if ts.iter().any(|t| !t.is_finite()) {
        return Err(Error::Domain("ts must be finite"));
    }
    if ts.windows(2).any(|w| w[1] <= w[0]) {
        return Err(Error::Domain("ts must be strictly increasing"));
    }
    if ts[0] < path.t_start() || ts[ts.len() - 1] > path.t_end() {
        return Err(Error::Domain("ts must lie within the path's time range"));
    }
    if z0.dims()[0] != path.batch() {
        return Err(Error::Shape("z0 batch must match path batch"));
    }

    let rhs = |z: Tensor<B, 2>, t: f32| cde_rhs(path, func, z, t);
    let mut budget = StepBudget {
        used: 0,
        max: cfg.max_steps,
    };

    let mut z = z0;
    let mut out = Vec::with_capacity(ts.len());
    out.push(z.clone());
    for w in ts.windows(2) {
        let mut breaks = vec![w[0]];
        breaks.extend(path.knots_between(w[0], w[1]));
        breaks.push(w[1]);
        for seg in breaks.windows(2) {
            z = match cfg.method {
                CdeMethod::Dopri5 => integrate_adaptive(&rhs, z, seg[0], seg[1], cfg, &mut budget)?,
                method => integrate_fixed(method, &rhs, z, seg[0], seg[1], cfg.step_size, &mut budget)?,
            };
        }
        out.push(z.clone());
    }
    tracing::trace!(steps = budget.used, method = ?cfg.method, "cdeint done");

    Ok(Tensor::stack(out, 1))
}
