//! Feedback Tracker
//!
//! Append-only farmer feedback against finalised recommendations, with
//! counters for accuracy dashboards. Feedback never feeds back into
//! training.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::error::EngineError;
use crate::storage::Persistence;
use crate::types::{FeedbackRecord, FeedbackStats};

/// Longest accepted outcome or notes text, in characters.
const MAX_TEXT_CHARS: usize = 2_000;

pub struct FeedbackTracker {
    store: Arc<dyn Persistence>,
}

impl FeedbackTracker {
    pub fn new(store: Arc<dyn Persistence>) -> Self {
        Self { store }
    }

    /// Record feedback for `recommendation_id`.
    pub fn submit(
        &self,
        recommendation_id: Uuid,
        followed: bool,
        outcome: &str,
        notes: Option<&str>,
    ) -> Result<FeedbackRecord, EngineError> {
        let outcome = outcome.trim();
        if outcome.is_empty() {
            return Err(EngineError::ValidationError("outcome must not be empty".to_string()));
        }
        if outcome.chars().count() > MAX_TEXT_CHARS {
            return Err(EngineError::ValidationError(format!(
                "outcome exceeds {MAX_TEXT_CHARS} characters"
            )));
        }
        let notes = notes.map(str::trim).filter(|n| !n.is_empty());
        if notes.is_some_and(|n| n.chars().count() > MAX_TEXT_CHARS) {
            return Err(EngineError::ValidationError(format!(
                "notes exceed {MAX_TEXT_CHARS} characters"
            )));
        }

        let rec = self
            .store
            .get_recommendation(recommendation_id)?
            .ok_or_else(|| EngineError::NotFound(format!("recommendation {recommendation_id}")))?;

        let record = FeedbackRecord {
            id: Uuid::new_v4(),
            recommendation_id,
            field_id: rec.field_id,
            followed,
            outcome: outcome.to_string(),
            notes: notes.map(ToString::to_string),
            submitted_at: Utc::now(),
        };
        self.store.append_feedback(&record)?;

        info!(
            recommendation_id = %recommendation_id,
            field_id = %record.field_id,
            followed,
            "Feedback recorded"
        );
        Ok(record)
    }

    /// Feedback for one recommendation, oldest first.
    pub fn for_recommendation(&self, recommendation_id: Uuid) -> Result<Vec<FeedbackRecord>, EngineError> {
        Ok(self.store.feedback_for(recommendation_id)?)
    }

    /// Counters over all feedback, or one field's.
    pub fn stats(&self, field_id: Option<&str>) -> Result<FeedbackStats, EngineError> {
        let records = self.store.all_feedback()?;
        Ok(summarize(
            records
                .iter()
                .filter(|r| field_id.map_or(true, |f| r.field_id == f)),
        ))
    }
}

fn summarize<'a>(records: impl Iterator<Item = &'a FeedbackRecord>) -> FeedbackStats {
    let mut stats = FeedbackStats::default();
    let mut rated = HashSet::new();
    let mut outcomes: BTreeMap<String, usize> = BTreeMap::new();

    for r in records {
        stats.total += 1;
        if r.followed {
            stats.followed += 1;
        } else {
            stats.not_followed += 1;
        }
        rated.insert(r.recommendation_id);
        *outcomes.entry(r.outcome.trim().to_lowercase()).or_default() += 1;
    }

    stats.recommendations_rated = rated.len();
    #[allow(clippy::cast_precision_loss)]
    let follow_rate = if stats.total > 0 {
        stats.followed as f64 / stats.total as f64
    } else {
        0.0
    };
    stats.follow_rate = follow_rate;
    stats.outcomes = outcomes;
    stats
}
