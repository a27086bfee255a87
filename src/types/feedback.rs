//! Farmer feedback on past recommendations.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::field::FieldId;

/// A farmer's report on whether a recommendation was followed and what
/// happened. Append-only; several records may reference one recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: Uuid,
    pub recommendation_id: Uuid,
    /// Denormalised from the recommendation for per-field statistics.
    pub field_id: FieldId,
    pub followed: bool,
    pub outcome: String,
    #[serde(default)]
    pub notes: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

/// Aggregate feedback counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackStats {
    pub total: usize,
    pub followed: usize,
    pub not_followed: usize,
    /// Distinct recommendations that received at least one record.
    pub recommendations_rated: usize,
    /// `followed / total`, or 0 when there is no feedback.
    pub follow_rate: f64,
    /// Count per normalised (lower-cased, trimmed) outcome text.
    pub outcomes: BTreeMap<String, usize>,
}
