//! Sliding-window evaluation of a trained model over recorded history.

use rayon::prelude::*;
use serde::Serialize;

use super::artifact::ModelArtifact;
use super::features::{contiguous_runs, DailyFeatures};
use crate::error::EngineError;
use crate::types::FieldId;

/// Error statistics for one day offset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OffsetError {
    pub day_offset: u32,
    pub mae: f64,
    pub rmse: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestReport {
    pub field_id: FieldId,
    pub model_version: u64,
    pub windows: usize,
    pub offsets: Vec<OffsetError>,
}

impl BacktestReport {
    /// Mean absolute error across all offsets.
    pub fn overall_mae(&self) -> f64 {
        if self.offsets.is_empty() {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let n = self.offsets.len() as f64;
        self.offsets.iter().map(|o| o.mae).sum::<f64>() / n
    }
}

/// Run the model on every gap-free `window + horizon` span in `days` and
/// compare each prediction with the rainfall that followed.
pub fn evaluate(artifact: &ModelArtifact, days: &[DailyFeatures]) -> Result<BacktestReport, EngineError> {
    let window = artifact.window_days;
    let horizon = artifact.horizon_days;

    let spans: Vec<(&[DailyFeatures], &[DailyFeatures])> = contiguous_runs(days)
        .into_iter()
        .filter(|run| run.len() >= window + horizon)
        .flat_map(|run| {
            (0..=run.len() - window - horizon).map(move |start| {
                let split = start + window;
                (&run[start..split], &run[split..split + horizon])
            })
        })
        .collect();

    if spans.is_empty() {
        return Err(EngineError::InsufficientData(format!(
            "no gap-free run of {} days to backtest field {}",
            window + horizon,
            artifact.field_id
        )));
    }

    // (abs sum, squared sum) per offset
    let totals = spans
        .par_iter()
        .map(|(input, actual)| {
            let predicted = artifact.model.predict(input);
            predicted
                .iter()
                .zip(actual.iter())
                .map(|(p, a)| {
                    let e = p - a.rainfall;
                    (e.abs(), e * e)
                })
                .collect::<Vec<_>>()
        })
        .reduce(
            || vec![(0.0, 0.0); horizon],
            |mut acc, errs| {
                for (slot, (abs, sq)) in acc.iter_mut().zip(errs) {
                    slot.0 += abs;
                    slot.1 += sq;
                }
                acc
            },
        );

    #[allow(clippy::cast_precision_loss)]
    let n = spans.len() as f64;
    let offsets = totals
        .into_iter()
        .zip(1u32..)
        .map(|((abs, sq), day_offset)| OffsetError {
            day_offset,
            mae: abs / n,
            rmse: (sq / n).sqrt(),
        })
        .collect();

    Ok(BacktestReport {
        field_id: artifact.field_id.clone(),
        model_version: artifact.version,
        windows: spans.len(),
        offsets,
    })
}
