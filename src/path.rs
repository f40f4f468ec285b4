//! Device-resident cubic path for use inside the integrator.
//!
//! Mirrors [`NaturalCubicCoeffs`] with `burn` tensors so that the path value and derivative can be
//! combined with tracked tensors. The coefficients themselves are constants: gradients never flow
//! into them.

use burn_core as burn;

use burn::tensor::{backend::Backend, Tensor, TensorData};

use crate::spline::{locate, NaturalCubicCoeffs};

fn array3_to_burn<B: Backend>(device: &B::Device, x: ndarray::ArrayView3<f32>) -> Tensor<B, 3> {
    let (a, b, c) = x.dim();
    let data = TensorData::new(x.iter().copied().collect::<Vec<f32>>(), [a, b, c]);
    Tensor::from_data(data, device)
}

/// A batch of natural cubic paths, evaluable at any time.
#[derive(Debug, Clone)]
pub struct CubicPath<B: Backend> {
    times: Vec<f32>,
    a: Tensor<B, 3>,
    b: Tensor<B, 3>,
    two_c: Tensor<B, 3>,
    three_d: Tensor<B, 3>,
}

impl<B: Backend> CubicPath<B> {
    pub fn new(coeffs: &NaturalCubicCoeffs, device: &B::Device) -> Self {
        Self {
            times: coeffs.times().to_vec(),
            a: array3_to_burn(device, coeffs.a()),
            b: array3_to_burn(device, coeffs.b()),
            two_c: array3_to_burn(device, coeffs.two_c()),
            three_d: array3_to_burn(device, coeffs.three_d()),
        }
    }

    pub fn batch(&self) -> usize {
        self.a.dims()[0]
    }

    pub fn channels(&self) -> usize {
        self.a.dims()[2]
    }

    pub fn times(&self) -> &[f32] {
        &self.times
    }

    pub fn t_start(&self) -> f32 {
        self.times[0]
    }

    pub fn t_end(&self) -> f32 {
        self.times[self.times.len() - 1]
    }

    /// Knots strictly between `t0` and `t1`, in increasing order.
    pub fn knots_between(&self, t0: f32, t1: f32) -> impl Iterator<Item = f32> + '_ {
        self.times
            .iter()
            .copied()
            .filter(move |&k| k > t0 && k < t1)
    }

    fn interval(&self, coeff: &Tensor<B, 3>, idx: usize) -> Tensor<B, 2> {
        let [batch, _, channels] = coeff.dims();
        coeff
            .clone()
            .slice([0..batch, idx..idx + 1, 0..channels])
            .reshape([batch, channels])
    }

    /// Path value at `t`, shape `[batch, channels]`.
    pub fn evaluate(&self, t: f32) -> Tensor<B, 2> {
        let (idx, s) = locate(&self.times, t);
        let inner = self.interval(&self.two_c, idx).mul_scalar(0.5)
            + self.interval(&self.three_d, idx).mul_scalar(s / 3.0);
        let inner = self.interval(&self.b, idx) + inner.mul_scalar(s);
        self.interval(&self.a, idx) + inner.mul_scalar(s)
    }

    /// Path derivative `dX/dt` at `t`, shape `[batch, channels]`.
    pub fn derivative(&self, t: f32) -> Tensor<B, 2> {
        let (idx, s) = locate(&self.times, t);
        let inner = self.interval(&self.two_c, idx) + self.interval(&self.three_d, idx).mul_scalar(s);
        self.interval(&self.b, idx) + inner.mul_scalar(s)
    }
}
