//! Readout training with Adam.
//!
//! The encoder is fixed after seeding, so only the linear readout from
//! `[h_final; x_last]` to the H normalized rainfall targets is fitted.
//! Full-batch gradients are summed in sample order, which keeps training
//! reproducible for a given seed and history.

use serde::{Deserialize, Serialize};

/// Maximum gradient L2 norm before clipping.
const MAX_GRAD_NORM: f64 = 5.0;

/// Linear map with one bias per output. Row `o` of `params` holds the
/// `inputs` weights for output `o` followed by its bias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Readout {
    pub inputs: usize,
    pub outputs: usize,
    pub params: Vec<f64>,
}

impl Readout {
    pub fn zeros(inputs: usize, outputs: usize) -> Self {
        Self {
            inputs,
            outputs,
            params: vec![0.0; outputs * (inputs + 1)],
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.params.len() == self.outputs * (self.inputs + 1)
    }

    pub fn forward(&self, x: &[f64]) -> Vec<f64> {
        let stride = self.inputs + 1;
        (0..self.outputs)
            .map(|o| {
                let row = &self.params[o * stride..(o + 1) * stride];
                row[..self.inputs]
                    .iter()
                    .zip(x)
                    .fold(row[self.inputs], |acc, (w, xi)| w.mul_add(*xi, acc))
            })
            .collect()
    }
}

/// Adam optimizer with decaying base learning rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdamOptimizer {
    /// Base learning rate (decays over time).
    pub lr: f64,
    /// LR decay factor per step.
    pub decay: f64,
    /// Minimum learning rate floor.
    pub lr_floor: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    pub steps: u64,
    m: Vec<f64>,
    v: Vec<f64>,
}

impl AdamOptimizer {
    pub fn new(num_params: usize, lr: f64) -> Self {
        Self {
            lr,
            decay: 0.999,
            lr_floor: lr * 0.1,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            steps: 0,
            m: vec![0.0; num_params],
            v: vec![0.0; num_params],
        }
    }

    /// Apply one update given gradients with the same layout as `weights`.
    pub fn apply(&mut self, weights: &mut [f64], grads: &[f64]) {
        self.steps += 1;
        #[allow(clippy::cast_precision_loss)]
        let t = self.steps as f64;

        let lr_t = self.lr * (1.0 - self.beta2.powf(t)).sqrt() / (1.0 - self.beta1.powf(t));

        for (i, w) in weights.iter_mut().enumerate() {
            let g = grads[i];
            self.m[i] = self.beta1.mul_add(self.m[i], (1.0 - self.beta1) * g);
            self.v[i] = self.beta2.mul_add(self.v[i], (1.0 - self.beta2) * g * g);
            *w -= lr_t * self.m[i] / (self.v[i].sqrt() + self.eps);
        }

        self.lr = (self.lr * self.decay).max(self.lr_floor);
    }
}

/// One encoded training example.
#[derive(Debug, Clone)]
pub struct TrainingSample {
    pub features: Vec<f64>,
    pub targets: Vec<f64>,
}

#[derive(Debug, Clone, Copy)]
pub struct TrainingParams {
    pub epochs: usize,
    pub learning_rate: f64,
    pub l2_penalty: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub samples: usize,
    pub epochs: usize,
    pub initial_loss: f64,
    pub final_loss: f64,
}

/// Mean squared error of `readout` over `samples`.
pub fn mse(readout: &Readout, samples: &[TrainingSample]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let total: f64 = samples
        .iter()
        .map(|s| {
            readout
                .forward(&s.features)
                .iter()
                .zip(&s.targets)
                .map(|(p, y)| (p - y).powi(2))
                .sum::<f64>()
        })
        .sum();
    #[allow(clippy::cast_precision_loss)]
    let n = (samples.len() * readout.outputs) as f64;
    total / n
}

/// Fit a zero-initialised readout to `samples`.
pub fn train_readout(
    samples: &[TrainingSample],
    inputs: usize,
    outputs: usize,
    params: TrainingParams,
) -> (Readout, TrainingReport) {
    let mut readout = Readout::zeros(inputs, outputs);
    let initial_loss = mse(&readout, samples);
    if samples.is_empty() {
        let report = TrainingReport {
            samples: 0,
            epochs: 0,
            initial_loss,
            final_loss: initial_loss,
        };
        return (readout, report);
    }

    let mut adam = AdamOptimizer::new(readout.params.len(), params.learning_rate);
    let stride = inputs + 1;
    #[allow(clippy::cast_precision_loss)]
    let scale = 2.0 / (samples.len() * outputs) as f64;
    let mut grads = vec![0.0; readout.params.len()];

    for _ in 0..params.epochs {
        grads.iter_mut().for_each(|g| *g = 0.0);

        for s in samples {
            let pred = readout.forward(&s.features);
            for o in 0..outputs {
                let err = (pred[o] - s.targets[o]) * scale;
                let row = &mut grads[o * stride..(o + 1) * stride];
                for (g, x) in row[..inputs].iter_mut().zip(&s.features) {
                    *g = err.mul_add(*x, *g);
                }
                row[inputs] += err;
            }
        }

        // Ridge penalty on weights, not biases
        for o in 0..outputs {
            for i in 0..inputs {
                let idx = o * stride + i;
                grads[idx] = (2.0 * params.l2_penalty).mul_add(readout.params[idx], grads[idx]);
            }
        }

        let norm = grads.iter().map(|g| g * g).sum::<f64>().sqrt();
        if norm > MAX_GRAD_NORM {
            let k = MAX_GRAD_NORM / norm;
            grads.iter_mut().for_each(|g| *g *= k);
        }

        adam.apply(&mut readout.params, &grads);
    }

    let report = TrainingReport {
        samples: samples.len(),
        epochs: params.epochs,
        initial_loss,
        final_loss: mse(&readout, samples),
    };
    (readout, report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_samples() -> Vec<TrainingSample> {
        // y0 = 0.5 x0 - 0.2, y1 = -x1
        (0..200)
            .map(|i| {
                let x0 = f64::from(i % 20) / 10.0 - 1.0;
                let x1 = f64::from(i % 7) / 3.0 - 1.0;
                TrainingSample {
                    features: vec![x0, x1],
                    targets: vec![0.5f64.mul_add(x0, -0.2), -x1],
                }
            })
            .collect()
    }

    #[test]
    fn test_readout_forward_with_bias() {
        let r = Readout {
            inputs: 2,
            outputs: 1,
            params: vec![2.0, -1.0, 0.5],
        };
        assert!((r.forward(&[1.0, 3.0])[0] - (-0.5)).abs() < 1e-12);
    }

    #[test]
    fn test_training_reduces_loss() {
        let samples = linear_samples();
        let (_, report) = train_readout(
            &samples,
            2,
            2,
            TrainingParams {
                epochs: 500,
                learning_rate: 0.05,
                l2_penalty: 0.0,
            },
        );
        assert!(report.final_loss < report.initial_loss * 0.05, "{report:?}");
    }

    #[test]
    fn test_training_is_reproducible() {
        let samples = linear_samples();
        let params = TrainingParams {
            epochs: 50,
            learning_rate: 0.01,
            l2_penalty: 1e-4,
        };
        let (a, _) = train_readout(&samples, 2, 2, params);
        let (b, _) = train_readout(&samples, 2, 2, params);
        assert_eq!(a, b);
    }

    #[test]
    fn test_adam_moves_against_gradient() {
        let mut adam = AdamOptimizer::new(2, 0.1);
        let mut w = vec![1.0, -1.0];
        adam.apply(&mut w, &[1.0, -1.0]);
        assert!(w[0] < 1.0);
        assert!(w[1] > -1.0);
        assert_eq!(adam.steps, 1);
    }
}
