//! In-flight ticket board.
//!
//! A ticket lives here from `trigger` until its recommendation is persisted.
//! Finalised recommendations are read from storage. One that storage
//! refused is held here instead, so the ticket still resolves.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::types::{FieldId, Recommendation};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTicket {
    pub ticket: Uuid,
    pub field_id: FieldId,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct TicketBoard {
    pending: Mutex<HashMap<Uuid, PendingTicket>>,
    unsaved: Mutex<HashMap<Uuid, Recommendation>>,
}

impl TicketBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, ticket: PendingTicket) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(ticket.ticket, ticket);
        }
    }

    pub fn close(&self, ticket: Uuid) -> Option<PendingTicket> {
        self.pending.lock().ok()?.remove(&ticket)
    }

    /// Keep a finalised recommendation that could not be persisted and
    /// retire its pending ticket.
    pub fn hold(&self, rec: Recommendation) {
        let ticket = rec.id;
        if let Ok(mut unsaved) = self.unsaved.lock() {
            unsaved.insert(ticket, rec);
        }
        self.close(ticket);
    }

    pub fn held(&self, ticket: Uuid) -> Option<Recommendation> {
        self.unsaved.lock().ok()?.get(&ticket).cloned()
    }

    /// Held recommendations for a field, newest first.
    pub fn held_for_field(&self, field_id: &str) -> Vec<Recommendation> {
        let Ok(unsaved) = self.unsaved.lock() else {
            return Vec::new();
        };
        let mut recs: Vec<Recommendation> = unsaved
            .values()
            .filter(|r| r.field_id == field_id)
            .cloned()
            .collect();
        recs.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        recs
    }

    pub fn get(&self, ticket: Uuid) -> Option<PendingTicket> {
        self.pending.lock().ok()?.get(&ticket).cloned()
    }

    /// Most recently requested pending ticket for a field.
    pub fn latest_for_field(&self, field_id: &str) -> Option<PendingTicket> {
        self.pending
            .lock()
            .ok()?
            .values()
            .filter(|t| t.field_id == field_id)
            .max_by_key(|t| t.requested_at)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        ActionPlan, CompletenessScore, ConfidenceLevel, Explanation, ExternalForecastStatus,
        FailureReason, ForecastSource, RecommendationStatus,
    };
    use chrono::Duration;

    fn ticket(field: &str, offset_secs: i64) -> PendingTicket {
        PendingTicket {
            ticket: Uuid::new_v4(),
            field_id: field.into(),
            requested_at: Utc::now() + Duration::seconds(offset_secs),
        }
    }

    #[test]
    fn test_open_close() {
        let board = TicketBoard::new();
        let t = ticket("f1", 0);
        board.open(t.clone());
        assert_eq!(board.get(t.ticket), Some(t.clone()));
        assert_eq!(board.close(t.ticket), Some(t.clone()));
        assert!(board.get(t.ticket).is_none());
        assert!(board.is_empty());
    }

    #[test]
    fn test_latest_for_field() {
        let board = TicketBoard::new();
        let older = ticket("f1", 0);
        let newer = ticket("f1", 10);
        board.open(older);
        board.open(newer.clone());
        board.open(ticket("f2", 20));
        assert_eq!(board.latest_for_field("f1"), Some(newer));
        assert!(board.latest_for_field("f3").is_none());
    }

    fn unsaved(t: &PendingTicket) -> Recommendation {
        Recommendation {
            id: t.ticket,
            field_id: t.field_id.clone(),
            requested_at: t.requested_at,
            completed_at: t.requested_at,
            status: RecommendationStatus::Failed {
                reason: FailureReason::Error {
                    message: "storage offline".into(),
                },
            },
            action_plan: ActionPlan::default(),
            explanation: Explanation::new(),
            risk_alerts: Vec::new(),
            completeness: CompletenessScore::empty(),
            confidence: ConfidenceLevel::Partial,
            degradations: Vec::new(),
            forecast_source: ForecastSource::NotAvailable {
                reason: "storage offline".into(),
            },
            internal_forecast: None,
            external_forecast: None,
            external_status: ExternalForecastStatus::Unavailable {
                reason: "not configured".into(),
            },
        }
    }

    #[test]
    fn test_hold_retires_pending_ticket() {
        let board = TicketBoard::new();
        let older = ticket("f1", 0);
        let newer = ticket("f1", 10);
        board.open(older.clone());
        board.open(newer.clone());

        board.hold(unsaved(&older));
        board.hold(unsaved(&newer));

        assert!(board.is_empty());
        assert_eq!(board.held(older.ticket).map(|r| r.id), Some(older.ticket));
        let ids: Vec<Uuid> = board.held_for_field("f1").iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![newer.ticket, older.ticket]);
        assert!(board.held_for_field("f2").is_empty());
    }
}
