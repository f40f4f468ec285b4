//! Neural CDE classifier.
//!
//! ```text
//! x_{t0} = X(t0)
//! z_{t0} = initial(x_{t0})
//! z_{t1} = z_{t0} + ∫ f_θ(z_s) dX_s          (cdeint)
//! logit  = readout(z_{t1})
//! ```

use burn_core as burn;

use burn::module::Module;
use burn::tensor::{activation, backend::Backend, Tensor};
use burn_nn::{Linear, LinearConfig};

use crate::cdeint::{cdeint, CdeSolverConfig, VectorField};
use crate::path::CubicPath;
use crate::{Error, Result};

/// Width of the vector field's hidden layer.
pub const DEFAULT_FIELD_WIDTH: usize = 128;

/// The vector field \(f_\theta\): `hidden → width → hidden · channels`, reshaped to a matrix.
#[derive(Module, Debug)]
pub struct CdeFunc<B: Backend> {
    linear1: Linear<B>,
    linear2: Linear<B>,
    input_channels: usize,
    hidden_channels: usize,
}

impl<B: Backend> CdeFunc<B> {
    pub fn new(
        device: &B::Device,
        input_channels: usize,
        hidden_channels: usize,
        width: usize,
    ) -> Self {
        let linear1 = LinearConfig::new(hidden_channels, width).init(device);
        let linear2 = LinearConfig::new(width, input_channels * hidden_channels).init(device);
        Self {
            linear1,
            linear2,
            input_channels,
            hidden_channels,
        }
    }

    /// Map `[..., hidden]` to `[..., hidden, channels]`.
    ///
    /// Leading (batch) dimensions are preserved as-is; `D2` must be `D + 1`.
    pub fn forward<const D: usize, const D2: usize>(&self, z: Tensor<B, D>) -> Tensor<B, D2> {
        assert_eq!(D2, D + 1, "output rank must be input rank + 1");
        let dims = z.dims();
        let mut shape = [0usize; D2];
        shape[..D - 1].copy_from_slice(&dims[..D - 1]);
        shape[D - 1] = self.hidden_channels;
        shape[D] = self.input_channels;

        let h = activation::tanh(self.linear1.forward(z));
        self.linear2.forward(h).reshape(shape)
    }
}

impl<B: Backend> VectorField<B> for CdeFunc<B> {
    fn field(&self, z: Tensor<B, 2>) -> Tensor<B, 3> {
        self.forward::<2, 3>(z)
    }
}

/// Sizes for [`NeuralCde`].
#[derive(Debug, Clone)]
pub struct NeuralCdeConfig {
    /// Channels of the data path (2 for `(x, y)` spirals).
    pub input_channels: usize,
    /// Size of the evolving state \(z_t\).
    pub hidden_channels: usize,
    /// Logits produced by the readout (1 for binary classification).
    pub output_channels: usize,
    /// Hidden width of the vector field.
    pub field_width: usize,
}

impl Default for NeuralCdeConfig {
    fn default() -> Self {
        Self::new(2, 8, 1)
    }
}

impl NeuralCdeConfig {
    pub fn new(input_channels: usize, hidden_channels: usize, output_channels: usize) -> Self {
        Self {
            input_channels,
            hidden_channels,
            output_channels,
            field_width: DEFAULT_FIELD_WIDTH,
        }
    }

    pub fn with_field_width(mut self, field_width: usize) -> Self {
        self.field_width = field_width;
        self
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<NeuralCde<B>> {
        if self.input_channels == 0
            || self.hidden_channels == 0
            || self.output_channels == 0
            || self.field_width == 0
        {
            return Err(Error::Domain("model sizes must be >= 1"));
        }
        Ok(NeuralCde {
            initial: LinearConfig::new(self.input_channels, self.hidden_channels).init(device),
            func: CdeFunc::new(
                device,
                self.input_channels,
                self.hidden_channels,
                self.field_width,
            ),
            readout: LinearConfig::new(self.hidden_channels, self.output_channels).init(device),
        })
    }
}

/// Initial map, vector field and linear readout.
#[derive(Module, Debug)]
pub struct NeuralCde<B: Backend> {
    initial: Linear<B>,
    func: CdeFunc<B>,
    readout: Linear<B>,
}

impl<B: Backend> NeuralCde<B> {
    pub fn func(&self) -> &CdeFunc<B> {
        &self.func
    }

    /// Predict from a batch of paths: `[batch, output_channels]` logits.
    ///
    /// The state is integrated from `t0` to `t1`; only the final state is read out.
    pub fn forward(
        &self,
        path: &CubicPath<B>,
        t0: f32,
        t1: f32,
        solver: &CdeSolverConfig,
    ) -> Result<Tensor<B, 2>> {
        let z0 = self.initial.forward(path.evaluate(t0));
        let zs = cdeint(path, &self.func, z0, &[t0, t1], solver)?;
        let [batch, _, hidden] = zs.dims();
        let z_t1 = zs.slice([0..batch, 1..2, 0..hidden]).reshape([batch, hidden]);
        Ok(self.readout.forward(z_t1))
    }
}
