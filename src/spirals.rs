//! Synthetic spiral trajectories (clockwise vs anticlockwise).
//!
//! Each sample is a 2-channel `(x, y)` trajectory along a decaying spiral
//! \[
//! r(\theta) = \frac{1}{1 + \theta/2}, \qquad \theta = \theta_0 + s,\ s \in [0, 4\pi],
//! \]
//! with a random starting phase \(\theta_0 \sim U[0, 2\pi)\) and additive uniform noise.
//! Half of the samples have their x-channel negated, which reverses the direction of rotation.
//!
//! Labels: `1.0` = clockwise (x negated), `0.0` = anticlockwise.

use crate::{Error, Result};
use ndarray::{Array1, Array3, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Uniform};

/// Generator settings.
#[derive(Debug, Clone)]
pub struct SpiralConfig {
    /// Number of trajectories (must be even).
    pub n_samples: usize,
    /// Points per trajectory (also the length of the shared time grid).
    pub n_steps: usize,
    /// Half-width of the uniform additive noise, i.e. noise `~ U[-noise, noise]`.
    pub noise: f32,
    /// RNG seed.
    pub seed: u64,
}

impl Default for SpiralConfig {
    fn default() -> Self {
        Self {
            n_samples: 128,
            n_steps: 100,
            noise: 0.03,
            seed: 0,
        }
    }
}

/// A labelled batch of spirals on a shared time grid.
#[derive(Debug, Clone)]
pub struct SpiralDataset {
    /// Time grid `0, 1, ..., n_steps - 1`, shared by every sample.
    pub t: Array1<f32>,
    /// Observations with shape `(n_samples, n_steps, 2)`.
    pub x: Array3<f32>,
    /// Labels in `{0.0, 1.0}`.
    pub y: Array1<f32>,
}

impl SpiralDataset {
    pub fn n_samples(&self) -> usize {
        self.x.len_of(Axis(0))
    }

    /// Number of samples labelled `1.0` (clockwise).
    pub fn n_clockwise(&self) -> usize {
        self.y.iter().filter(|&&v| v == 1.0).count()
    }
}

/// Generate a shuffled, exactly balanced spiral dataset.
///
/// Before shuffling, the first `n_samples / 2` samples are clockwise. The final sample order is a
/// seeded random permutation, so label classes are interleaved.
pub fn generate_spirals(cfg: &SpiralConfig) -> Result<SpiralDataset> {
    let n = cfg.n_samples;
    let steps = cfg.n_steps;
    if n < 2 || n % 2 != 0 {
        return Err(Error::Domain("n_samples must be even and >= 2"));
    }
    if steps < 2 {
        return Err(Error::Domain("n_steps must be >= 2"));
    }
    if !cfg.noise.is_finite() || cfg.noise < 0.0 {
        return Err(Error::Domain("noise must be finite and >= 0"));
    }

    let two_pi = 2.0 * core::f32::consts::PI;
    let span = 2.0 * two_pi;
    let phase = Uniform::new(0.0f32, two_pi).map_err(|_| Error::Domain("invalid phase range"))?;
    let noise = Uniform::new_inclusive(-cfg.noise, cfg.noise)
        .map_err(|_| Error::Domain("invalid noise range"))?;

    let mut rng = ChaCha8Rng::seed_from_u64(cfg.seed);
    let half = n / 2;

    let mut x = Array3::<f32>::zeros((n, steps, 2));
    let mut labels = Array1::<f32>::zeros(n);
    for i in 0..n {
        let start = phase.sample(&mut rng);
        let clockwise = i < half;
        for k in 0..steps {
            let theta = start + span * (k as f32) / ((steps - 1) as f32);
            let r = 1.0 / (1.0 + 0.5 * theta);
            let mut px = theta.cos() * r;
            if clockwise {
                px = -px;
            }
            let py = theta.sin() * r;
            x[[i, k, 0]] = px + noise.sample(&mut rng);
            x[[i, k, 1]] = py + noise.sample(&mut rng);
        }
        if clockwise {
            labels[i] = 1.0;
        }
    }

    let mut perm: Vec<usize> = (0..n).collect();
    perm.shuffle(&mut rng);

    Ok(SpiralDataset {
        t: Array1::from_iter((0..steps).map(|k| k as f32)),
        x: x.select(Axis(0), &perm),
        y: labels.select(Axis(0), &perm),
    })
}
