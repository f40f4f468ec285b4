//! Natural cubic spline coefficients on a shared time grid.
//!
//! On interval `i` (`t_i <= t <= t_{i+1}`, `s = t - t_i`) the interpolant is
//! \[
//! X(t) = a_i + b_i s + \tfrac12 (2c)_i s^2 + \tfrac13 (3d)_i s^3,
//! \qquad
//! X'(t) = b_i + (2c)_i s + (3d)_i s^2 .
//! \]
//! Boundary second derivatives are zero ("natural" spline).
//!
//! Coefficients are computed once, in `f64`, and stored as `f32` arrays with shape
//! `(batch, intervals, channels)`. They are meant to be treated as a dataset: slice them with
//! [`NaturalCubicCoeffs::select`] rather than recomputing.

use crate::{Error, Result};
use ndarray::{Array2, Array3, ArrayView1, ArrayView3, Axis};

/// Spline coefficients for a batch of multichannel series sharing one time grid.
#[derive(Debug, Clone)]
pub struct NaturalCubicCoeffs {
    times: Vec<f32>,
    a: Array3<f32>,
    b: Array3<f32>,
    two_c: Array3<f32>,
    three_d: Array3<f32>,
}

/// Interval containing `t` and the offset of `t` from its left knot.
///
/// Times outside the grid map to the first or last interval (the cubic is extrapolated).
pub(crate) fn locate(times: &[f32], t: f32) -> (usize, f32) {
    debug_assert!(times.len() >= 2);
    let last = times.len() - 2;
    let idx = times.partition_point(|&s| s <= t).saturating_sub(1).min(last);
    (idx, t - times[idx])
}

impl NaturalCubicCoeffs {
    pub fn batch(&self) -> usize {
        self.a.len_of(Axis(0))
    }

    pub fn intervals(&self) -> usize {
        self.a.len_of(Axis(1))
    }

    pub fn channels(&self) -> usize {
        self.a.len_of(Axis(2))
    }

    /// Knot times (length `intervals + 1`).
    pub fn times(&self) -> &[f32] {
        &self.times
    }

    pub fn t_start(&self) -> f32 {
        self.times[0]
    }

    /// Values at the left knot of each interval.
    pub fn a(&self) -> ArrayView3<'_, f32> {
        self.a.view()
    }

    /// First derivatives at the left knot.
    pub fn b(&self) -> ArrayView3<'_, f32> {
        self.b.view()
    }

    /// Second derivatives at the left knot (`2c`).
    pub fn two_c(&self) -> ArrayView3<'_, f32> {
        self.two_c.view()
    }

    /// Third derivative divided by two (`3d`), constant on each interval.
    pub fn three_d(&self) -> ArrayView3<'_, f32> {
        self.three_d.view()
    }

    pub fn t_end(&self) -> f32 {
        self.times[self.times.len() - 1]
    }

    /// Interpolated values at time `t`, shape `(batch, channels)`.
    pub fn evaluate(&self, t: f32) -> Array2<f32> {
        let (idx, s) = locate(&self.times, t);
        let a = self.a.index_axis(Axis(1), idx);
        let b = self.b.index_axis(Axis(1), idx);
        let c2 = self.two_c.index_axis(Axis(1), idx);
        let d3 = self.three_d.index_axis(Axis(1), idx);
        let mut out = a.to_owned();
        ndarray::Zip::from(&mut out)
            .and(&b)
            .and(&c2)
            .and(&d3)
            .for_each(|o, &b, &c2, &d3| {
                let inner = b + (0.5 * c2 + d3 * s / 3.0) * s;
                *o += inner * s;
            });
        out
    }

    /// Time derivative of the interpolant at `t`, shape `(batch, channels)`.
    pub fn derivative(&self, t: f32) -> Array2<f32> {
        let (idx, s) = locate(&self.times, t);
        let mut out = self.b.index_axis(Axis(1), idx).to_owned();
        let c2 = self.two_c.index_axis(Axis(1), idx);
        let d3 = self.three_d.index_axis(Axis(1), idx);
        ndarray::Zip::from(&mut out)
            .and(&c2)
            .and(&d3)
            .for_each(|o, &c2, &d3| *o += (c2 + d3 * s) * s);
        out
    }

    /// Coefficients for a subset (or reordering) of the batch.
    pub fn select(&self, indices: &[usize]) -> Result<Self> {
        if indices.is_empty() {
            return Err(Error::Domain("indices must be non-empty"));
        }
        if indices.iter().any(|&i| i >= self.batch()) {
            return Err(Error::Shape("index out of range for coefficient batch"));
        }
        Ok(Self {
            times: self.times.clone(),
            a: self.a.select(Axis(0), indices),
            b: self.b.select(Axis(0), indices),
            two_c: self.two_c.select(Axis(0), indices),
            three_d: self.three_d.select(Axis(0), indices),
        })
    }
}

/// Fill `NaN` entries by linear interpolation in time, with constant extension at both ends.
///
/// Returns `false` if the series has no observed value at all.
fn fill_missing(t: &[f64], y: &mut [f64]) -> bool {
    let observed: Vec<usize> = (0..y.len()).filter(|&i| !y[i].is_nan()).collect();
    let (Some(&first), Some(&last)) = (observed.first(), observed.last()) else {
        return false;
    };
    if observed.len() == y.len() {
        return true;
    }
    for i in 0..first {
        y[i] = y[first];
    }
    for i in last + 1..y.len() {
        y[i] = y[last];
    }
    for w in observed.windows(2) {
        let (l, r) = (w[0], w[1]);
        for i in l + 1..r {
            let frac = (t[i] - t[l]) / (t[r] - t[l]);
            y[i] = y[l] + frac * (y[r] - y[l]);
        }
    }
    true
}

/// Knot second derivatives `M_0..M_n` of the natural cubic spline through `(t_i, y_i)`.
///
/// Interior knots satisfy
/// `h_{i-1} M_{i-1} + 2 (h_{i-1} + h_i) M_i + h_i M_{i+1} = 6 (slope_i - slope_{i-1})`,
/// with `M_0 = M_n = 0`. Solved with the Thomas algorithm (the system is diagonally dominant).
fn second_derivatives(h: &[f64], slopes: &[f64]) -> Vec<f64> {
    let n = h.len();
    let mut m = vec![0.0f64; n + 1];
    if n < 2 {
        return m;
    }
    let k = n - 1;
    let mut diag = vec![0.0f64; k];
    let mut rhs = vec![0.0f64; k];
    for j in 0..k {
        diag[j] = 2.0 * (h[j] + h[j + 1]);
        rhs[j] = 6.0 * (slopes[j + 1] - slopes[j]);
    }
    // sub[j] = h[j] (couples M_j), sup[j] = h[j + 1] (couples M_{j + 2}).
    for j in 1..k {
        let w = h[j] / diag[j - 1];
        diag[j] -= w * h[j];
        rhs[j] -= w * rhs[j - 1];
    }
    m[k] = rhs[k - 1] / diag[k - 1];
    for j in (0..k - 1).rev() {
        m[j + 1] = (rhs[j] - h[j + 1] * m[j + 2]) / diag[j];
    }
    m
}

/// Natural cubic spline coefficients for `x` observed at times `t`.
///
/// - `t`: shape `(time,)`, finite and strictly increasing, length >= 2.
/// - `x`: shape `(batch, time, channels)`. `NaN` marks a missing observation; missing values are
///   filled per series by linear interpolation before fitting.
pub fn natural_cubic_spline_coeffs(
    t: &ArrayView1<f32>,
    x: &ArrayView3<f32>,
) -> Result<NaturalCubicCoeffs> {
    let (batch, len, channels) = x.dim();
    if t.len() < 2 {
        return Err(Error::Domain("t must have at least two points"));
    }
    if len != t.len() {
        return Err(Error::Shape("x time axis must match t length"));
    }
    if batch == 0 || channels == 0 {
        return Err(Error::Domain("x must be non-empty"));
    }
    let times: Vec<f32> = t.to_vec();
    if times.iter().any(|v| !v.is_finite()) {
        return Err(Error::Domain("t must be finite"));
    }
    if times.windows(2).any(|w| w[1] <= w[0]) {
        return Err(Error::Domain("t must be strictly increasing"));
    }
    if x.iter().any(|v| v.is_infinite()) {
        return Err(Error::Domain("x must not contain infinite values"));
    }

    let t64: Vec<f64> = times.iter().map(|&v| v as f64).collect();
    let n = len - 1;
    let h: Vec<f64> = (0..n).map(|i| t64[i + 1] - t64[i]).collect();

    let mut a = Array3::<f32>::zeros((batch, n, channels));
    let mut b = Array3::<f32>::zeros((batch, n, channels));
    let mut two_c = Array3::<f32>::zeros((batch, n, channels));
    let mut three_d = Array3::<f32>::zeros((batch, n, channels));

    let mut y = vec![0.0f64; len];
    let mut slopes = vec![0.0f64; n];
    for bi in 0..batch {
        for ch in 0..channels {
            for i in 0..len {
                y[i] = x[[bi, i, ch]] as f64;
            }
            if !fill_missing(&t64, &mut y) {
                return Err(Error::Domain("a series has no observed values"));
            }
            for i in 0..n {
                slopes[i] = (y[i + 1] - y[i]) / h[i];
            }
            let m = second_derivatives(&h, &slopes);
            for i in 0..n {
                a[[bi, i, ch]] = y[i] as f32;
                b[[bi, i, ch]] = (slopes[i] - h[i] * (2.0 * m[i] + m[i + 1]) / 6.0) as f32;
                two_c[[bi, i, ch]] = m[i] as f32;
                three_d[[bi, i, ch]] = ((m[i + 1] - m[i]) / (2.0 * h[i])) as f32;
            }
        }
    }

    Ok(NaturalCubicCoeffs {
        times,
        a,
        b,
        two_c,
        three_d,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array3};
    use proptest::prelude::*;

    fn grid(n: usize) -> Array1<f32> {
        Array1::from_iter((0..n).map(|i| i as f32))
    }

    #[test]
    fn locate_clamps_to_grid() {
        let t = [0.0f32, 1.0, 2.0, 3.0];
        assert_eq!(locate(&t, -1.0), (0, -1.0));
        assert_eq!(locate(&t, 0.0), (0, 0.0));
        assert_eq!(locate(&t, 1.5), (1, 0.5));
        assert_eq!(locate(&t, 2.0), (2, 0.0));
        assert_eq!(locate(&t, 3.0), (2, 1.0));
        assert_eq!(locate(&t, 4.0), (2, 2.0));
    }

    #[test]
    fn linear_data_is_reproduced_exactly() {
        let t = Array1::from_vec(vec![0.0f32, 0.5, 2.0, 3.0, 4.5]);
        let mut x = Array3::<f32>::zeros((1, 5, 2));
        for i in 0..5 {
            x[[0, i, 0]] = 2.0 * t[i] - 1.0;
            x[[0, i, 1]] = -0.5 * t[i];
        }
        let coeffs = natural_cubic_spline_coeffs(&t.view(), &x.view()).unwrap();
        for &q in &[0.0f32, 0.25, 1.3, 3.7, 4.5] {
            let v = coeffs.evaluate(q);
            let dv = coeffs.derivative(q);
            assert!((v[[0, 0]] - (2.0 * q - 1.0)).abs() < 1e-5);
            assert!((v[[0, 1]] + 0.5 * q).abs() < 1e-5);
            assert!((dv[[0, 0]] - 2.0).abs() < 1e-5);
            assert!((dv[[0, 1]] + 0.5).abs() < 1e-5);
        }
    }

    #[test]
    fn second_derivative_vanishes_at_the_ends() {
        let t = grid(6);
        let x = Array3::from_shape_vec((1, 6, 1), vec![0.0, 1.0, -1.0, 2.0, 0.5, 3.0]).unwrap();
        let coeffs = natural_cubic_spline_coeffs(&t.view(), &x.view()).unwrap();
        let last = coeffs.intervals() - 1;
        assert!(coeffs.two_c()[[0, 0, 0]].abs() < 1e-6);
        // X'' at the right end: 2c + 2 * 3d * h.
        let end = coeffs.two_c()[[0, last, 0]] + 2.0 * coeffs.three_d()[[0, last, 0]];
        assert!(end.abs() < 1e-5, "end={end}");
    }

    #[test]
    fn derivative_is_continuous_at_interior_knots() {
        let t = grid(7);
        let x = Array3::from_shape_vec((1, 7, 1), vec![0.0, 2.0, 1.0, -1.0, 0.0, 4.0, 1.0]).unwrap();
        let coeffs = natural_cubic_spline_coeffs(&t.view(), &x.view()).unwrap();
        for i in 1..6 {
            let left = coeffs.b()[[0, i - 1, 0]]
                + coeffs.two_c()[[0, i - 1, 0]]
                + coeffs.three_d()[[0, i - 1, 0]];
            let right = coeffs.b()[[0, i, 0]];
            assert!((left - right).abs() < 1e-4, "knot {i}: {left} vs {right}");
        }
    }

    #[test]
    fn missing_values_are_filled_linearly() {
        let t = grid(5);
        let x = Array3::from_shape_vec((1, 5, 1), vec![f32::NAN, 1.0, f32::NAN, 3.0, f32::NAN])
            .unwrap();
        let coeffs = natural_cubic_spline_coeffs(&t.view(), &x.view()).unwrap();
        let expect = [1.0f32, 1.0, 2.0, 3.0, 3.0];
        for (i, &e) in expect.iter().enumerate() {
            let v = coeffs.evaluate(i as f32)[[0, 0]];
            assert!((v - e).abs() < 1e-5, "t={i}: {v} vs {e}");
        }
    }

    #[test]
    fn select_reorders_the_batch() {
        let t = grid(3);
        let x = Array3::from_shape_vec((3, 3, 1), vec![0.0, 1.0, 2.0, 10.0, 11.0, 12.0, 20.0, 21.0, 22.0])
            .unwrap();
        let coeffs = natural_cubic_spline_coeffs(&t.view(), &x.view()).unwrap();
        let sub = coeffs.select(&[2, 0]).unwrap();
        assert_eq!(sub.batch(), 2);
        let v = sub.evaluate(0.0);
        assert_eq!(v[[0, 0]], 20.0);
        assert_eq!(v[[1, 0]], 0.0);
        assert!(coeffs.select(&[3]).is_err());
        assert!(coeffs.select(&[]).is_err());
    }

    #[test]
    fn coefficient_views_share_one_shape() {
        let t = grid(4);
        let x = Array3::from_shape_fn((3, 4, 2), |(b, i, c)| (b + i * c) as f32);
        let coeffs = natural_cubic_spline_coeffs(&t.view(), &x.view()).unwrap();
        for view in [coeffs.a(), coeffs.b(), coeffs.two_c(), coeffs.three_d()] {
            assert_eq!(view.dim(), (3, 3, 2));
        }
        assert_eq!(coeffs.a()[[2, 1, 1]], x[[2, 1, 1]]);
        let sub = coeffs.select(&[1]).unwrap();
        assert_eq!(sub.a().dim(), (1, 3, 2));
    }

    #[test]
    fn rejects_bad_inputs() {
        let x = Array3::<f32>::zeros((2, 4, 1));
        assert!(natural_cubic_spline_coeffs(&grid(3).view(), &x.view()).is_err());
        let unsorted = Array1::from_vec(vec![0.0f32, 2.0, 1.0, 3.0]);
        assert!(natural_cubic_spline_coeffs(&unsorted.view(), &x.view()).is_err());
        let mut all_nan = x.clone();
        all_nan.index_axis_mut(Axis(0), 1).fill(f32::NAN);
        assert!(natural_cubic_spline_coeffs(&grid(4).view(), &all_nan.view()).is_err());
        let mut inf = x.clone();
        inf[[0, 0, 0]] = f32::INFINITY;
        assert!(natural_cubic_spline_coeffs(&grid(4).view(), &inf.view()).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            .. ProptestConfig::default()
        })]
        #[test]
        fn prop_spline_passes_through_every_knot(
            len in 2usize..24,
            channels in 1usize..4,
            vals in prop::collection::vec(-5.0f32..5.0f32, 24 * 4),
            gaps in prop::collection::vec(0.1f32..2.0f32, 24),
        ) {
            let mut t = Array1::<f32>::zeros(len);
            for i in 1..len {
                t[i] = t[i - 1] + gaps[i];
            }
            let x = Array3::from_shape_fn((1, len, channels), |(_, i, c)| vals[i * 4 + c]);
            let coeffs = natural_cubic_spline_coeffs(&t.view(), &x.view()).unwrap();
            for i in 0..len {
                let v = coeffs.evaluate(t[i]);
                for c in 0..channels {
                    let tol = 1e-3 * (1.0 + x[[0, i, c]].abs());
                    prop_assert!((v[[0, c]] - x[[0, i, c]]).abs() <= tol, "knot {} channel {}", i, c);
                }
            }
        }
    }
}
