//! Rainfall model: scaler + CfC encoder + linear readout.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::cell::{encode, EncoderWeights};
use super::features::{contiguous_runs, DailyFeatures, NUM_FEATURES};
use super::normalizer::FeatureScaler;
use super::training::{train_readout, Readout, TrainingParams, TrainingReport, TrainingSample};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RainfallModel {
    pub window_days: usize,
    pub horizon_days: usize,
    pub scaler: FeatureScaler,
    pub encoder: EncoderWeights,
    pub readout: Readout,
}

impl RainfallModel {
    /// Readout input size for a given hidden size.
    pub const fn readout_inputs(hidden: usize) -> usize {
        hidden + NUM_FEATURES
    }

    /// Fit a model on `days`, which may contain gaps. Samples never span a
    /// gap.
    pub fn fit(
        days: &[DailyFeatures],
        window_days: usize,
        horizon_days: usize,
        hidden: usize,
        seed: u64,
        params: TrainingParams,
    ) -> (Self, TrainingReport) {
        let scaler = FeatureScaler::fit(days);
        let encoder = EncoderWeights::init(hidden, seed);

        let spans: Vec<(&[DailyFeatures], &[DailyFeatures])> = contiguous_runs(days)
            .into_iter()
            .filter(|run| run.len() >= window_days + horizon_days)
            .flat_map(|run| {
                (0..=run.len() - window_days - horizon_days).map(move |start| {
                    let split = start + window_days;
                    (&run[start..split], &run[split..split + horizon_days])
                })
            })
            .collect();

        // Order-preserving parallel encode
        let samples: Vec<TrainingSample> = spans
            .par_iter()
            .map(|(window, target)| TrainingSample {
                features: features_for(&scaler, &encoder, window),
                targets: target
                    .iter()
                    .map(|d| scaler.transform_rainfall(d.rainfall))
                    .collect(),
            })
            .collect();

        let (readout, report) =
            train_readout(&samples, Self::readout_inputs(hidden), horizon_days, params);

        let model = Self {
            window_days,
            horizon_days,
            scaler,
            encoder,
            readout,
        };
        (model, report)
    }

    /// Predict `horizon_days` rainfall totals in millimetres, each clamped
    /// to be non-negative. `window` must hold `window_days` consecutive days.
    pub fn predict(&self, window: &[DailyFeatures]) -> Vec<f64> {
        let features = features_for(&self.scaler, &self.encoder, window);
        self.readout
            .forward(&features)
            .into_iter()
            .map(|z| {
                let mm = self.scaler.inverse_rainfall(z);
                if mm.is_finite() {
                    mm.max(0.0)
                } else {
                    0.0
                }
            })
            .collect()
    }

    pub fn is_consistent(&self) -> bool {
        self.encoder.is_consistent()
            && self.readout.is_consistent()
            && self.readout.inputs == Self::readout_inputs(self.encoder.hidden)
            && self.readout.outputs == self.horizon_days
    }
}

/// `[h_final; x_last]` for a window.
fn features_for(
    scaler: &FeatureScaler,
    encoder: &EncoderWeights,
    window: &[DailyFeatures],
) -> Vec<f64> {
    let normalized: Vec<[f64; NUM_FEATURES]> =
        window.iter().map(|d| scaler.transform(&d.as_array())).collect();
    let mut features = encode(encoder, &normalized);
    features.extend_from_slice(normalized.last().map_or(&[0.0; NUM_FEATURES], |x| x));
    features
}
