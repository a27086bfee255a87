//! Recommendation records and their parts.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::field::FieldId;
use super::forecast::{ExternalForecast, ExternalForecastStatus, ForecastVector};
use super::state::CompletenessScore;

/// Irrigation half of an action plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrrigationDecision {
    pub irrigate: bool,
    /// Water volume per acre; zero when `irrigate` is false.
    pub liters_per_acre: f64,
    /// `liters_per_acre` scaled by the field area.
    pub total_liters: f64,
    pub timing: String,
    /// Rainfall total used for the decision over the lookahead days.
    pub expected_rain_mm: f64,
    /// True when some or all of `expected_rain_mm` is an assumed zero.
    pub rain_assumed: bool,
}

/// Fertilizer half of an action plan. Deltas are kg per acre.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FertilizerPlan {
    pub apply: bool,
    pub nitrogen_kg_per_acre: f64,
    pub phosphorus_kg_per_acre: f64,
    pub potassium_kg_per_acre: f64,
    pub timing: String,
}

impl FertilizerPlan {
    pub fn total_kg_per_acre(&self) -> f64 {
        self.nitrogen_kg_per_acre + self.phosphorus_kg_per_acre + self.potassium_kg_per_acre
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Crop problem read from the latest image's notes and URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropIssue {
    pub issue: String,
    pub treatment: String,
    pub severity: IssueSeverity,
    /// Visual cue that matched.
    pub cue: String,
    pub image_uri: String,
}

/// Irrigation and fertilizer decisions. Either side is `None` when its
/// rule lacked the inputs it needs. `crop_issue` is set only when the
/// latest image describes a known problem.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionPlan {
    pub irrigation: Option<IrrigationDecision>,
    pub fertilizer: Option<FertilizerPlan>,
    #[serde(default)]
    pub crop_issue: Option<CropIssue>,
}

impl ActionPlan {
    pub fn irrigate(&self) -> Option<bool> {
        self.irrigation.as_ref().map(|i| i.irrigate)
    }
}

/// Ordered human-readable reasons, one or more per evaluated rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Explanation(Vec<String>);

impl Explanation {
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, line: impl Into<String>) {
        self.0.push(line.into());
    }

    pub fn extend(&mut self, other: Self) {
        self.0.extend(other.0);
    }

    pub fn lines(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if any line contains `needle`.
    pub fn mentions(&self, needle: &str) -> bool {
        self.0.iter().any(|l| l.contains(needle))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
        }
    }
}

/// Internal and external rainfall forecasts disagree for one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAlert {
    pub day_offset: u32,
    pub internal_mm: f64,
    pub external_mm: f64,
    pub absolute_diff_mm: f64,
    pub relative_diff: f64,
    pub severity: AlertSeverity,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    Timeout { after_ms: u64 },
    Error { message: String },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { after_ms } => write!(f, "timed out after {after_ms} ms"),
            Self::Error { message } => write!(f, "{message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RecommendationStatus {
    Pending,
    Complete,
    Failed { reason: FailureReason },
}

/// `Partial` whenever any input was missing, stale or assumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    Full,
    Partial,
}

/// Where the rainfall outlook used by the rule engine came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ForecastSource {
    Model { version: u64 },
    NotAvailable { reason: String },
}

/// Finalised recommendation. Written once and never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Same value as the ticket returned by `trigger`.
    pub id: Uuid,
    pub field_id: FieldId,
    pub requested_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub status: RecommendationStatus,
    pub action_plan: ActionPlan,
    pub explanation: Explanation,
    pub risk_alerts: Vec<RiskAlert>,
    pub completeness: CompletenessScore,
    pub confidence: ConfidenceLevel,
    /// Why confidence is `Partial`; empty when `Full`.
    pub degradations: Vec<String>,
    pub forecast_source: ForecastSource,
    pub internal_forecast: Option<ForecastVector>,
    pub external_forecast: Option<ExternalForecast>,
    pub external_status: ExternalForecastStatus,
}

impl Recommendation {
    pub const fn is_complete(&self) -> bool {
        matches!(self.status, RecommendationStatus::Complete)
    }
}
