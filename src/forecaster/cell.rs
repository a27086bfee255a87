//! Closed-form continuous-time (CfC) encoder cell.
//!
//! Runs the normalized daily window through a dense CfC recurrence and
//! returns the final hidden state. Weights are drawn once from a seeded
//! RNG at training time and stored in the artifact; inference never
//! touches an RNG.
//!
//! Per neuron, with `z = [x; h]`:
//! ```text
//! tau = softplus(W_tau z + b_tau)
//! f   = sigmoid(-(dt * tau) * (W_f z + b_f))
//! g   = tanh(W_g z + b_g)
//! h'  = f * g + (1 - f) * h
//! ```

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::features::NUM_FEATURES;

/// One step per day.
const DT: f64 = 1.0;

/// Dense CfC weights. Each gate matrix is `hidden x (NUM_FEATURES + hidden)`,
/// row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderWeights {
    pub hidden: usize,
    pub w_tau: Vec<f64>,
    pub w_f: Vec<f64>,
    pub w_g: Vec<f64>,
    pub b_tau: Vec<f64>,
    pub b_f: Vec<f64>,
    pub b_g: Vec<f64>,
}

impl EncoderWeights {
    /// Xavier-style uniform initialisation from `seed`.
    pub fn init(hidden: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let fan_in = NUM_FEATURES + hidden;
        #[allow(clippy::cast_precision_loss)]
        let std = (2.0 / (fan_in + 1) as f64).sqrt();
        let matrix = |rng: &mut StdRng| -> Vec<f64> {
            (0..hidden * fan_in)
                .map(|_| rng.gen::<f64>().mul_add(2.0 * std, -std))
                .collect()
        };
        let w_tau = matrix(&mut rng);
        let w_f = matrix(&mut rng);
        let w_g = matrix(&mut rng);

        Self {
            hidden,
            w_tau,
            w_f,
            w_g,
            b_tau: vec![0.0; hidden],
            b_f: vec![0.0; hidden],
            b_g: vec![0.0; hidden],
        }
    }

    pub const fn row_len(&self) -> usize {
        NUM_FEATURES + self.hidden
    }

    /// True when every weight vector has the size `hidden` implies.
    pub fn is_consistent(&self) -> bool {
        let m = self.hidden * self.row_len();
        self.hidden > 0
            && self.w_tau.len() == m
            && self.w_f.len() == m
            && self.w_g.len() == m
            && self.b_tau.len() == self.hidden
            && self.b_f.len() == self.hidden
            && self.b_g.len() == self.hidden
    }

    pub fn num_params(&self) -> usize {
        self.w_tau.len() + self.w_f.len() + self.w_g.len() + 3 * self.hidden
    }
}

/// One recurrence step.
fn step(weights: &EncoderWeights, x: &[f64; NUM_FEATURES], h: &[f64]) -> Vec<f64> {
    let row_len = weights.row_len();
    let mut z = Vec::with_capacity(row_len);
    z.extend_from_slice(x);
    z.extend_from_slice(h);

    (0..weights.hidden)
        .map(|n| {
            let row = n * row_len..(n + 1) * row_len;
            let dot = |w: &[f64]| -> f64 { w[row.clone()].iter().zip(&z).map(|(a, b)| a * b).sum() };

            let tau = softplus(dot(&weights.w_tau) + weights.b_tau[n]);
            let f = sigmoid(-(DT * tau) * (dot(&weights.w_f) + weights.b_f[n]));
            let g = (dot(&weights.w_g) + weights.b_g[n]).tanh();
            f.mul_add(g, (1.0 - f) * h[n])
        })
        .collect()
}

/// Encode a normalized window into the final hidden state.
pub fn encode(weights: &EncoderWeights, window: &[[f64; NUM_FEATURES]]) -> Vec<f64> {
    window
        .iter()
        .fold(vec![0.0; weights.hidden], |h, x| step(weights, x, &h))
}

#[inline]
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[inline]
pub fn softplus(x: f64) -> f64 {
    if x > 20.0 {
        x // Avoid overflow
    } else {
        x.exp().ln_1p()
    }
}
