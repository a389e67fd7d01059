// ==========================================
// Scheduled Deliveries - occurrence entity
// ==========================================
// One concrete future instance of a recurring delivery, owned
// exclusively by its ScheduledDelivery. Immutable once EXECUTED.
// ==========================================

use crate::domain::types::{CoordinationOutcome, OccurrenceStatus};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledOccurrence {
    pub occurrence_id: String,
    pub schedule_id: String,

    /// Concrete datetime produced by the recurrence expansion.
    /// Unique per (schedule_id, scheduled_for).
    pub scheduled_for: NaiveDateTime,
    pub status: OccurrenceStatus,

    // ===== J-1 coordination state =====
    // The handshake is an explicit state field plus a deadline inspected
    // by the periodic dispatcher, not a suspended timer. Crash recovery
    // and cancellation only need to re-read these columns.
    pub coordination_deadline: Option<NaiveDateTime>,
    pub client_confirmed: bool,
    pub counterparty_confirmed: bool,
    pub coordination_outcome: Option<CoordinationOutcome>,

    /// Negotiated price for this occurrence only (minor units).
    pub final_price: Option<i64>,

    // ===== execution result =====
    pub delivery_reference: Option<String>,
    pub attempt_count: i32,
    pub last_error: Option<String>,

    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl ScheduledOccurrence {
    pub fn new(
        occurrence_id: impl Into<String>,
        schedule_id: impl Into<String>,
        scheduled_for: NaiveDateTime,
        now: NaiveDateTime,
    ) -> Self {
        Self {
            occurrence_id: occurrence_id.into(),
            schedule_id: schedule_id.into(),
            scheduled_for,
            status: OccurrenceStatus::Pending,
            coordination_deadline: None,
            client_confirmed: false,
            counterparty_confirmed: false,
            coordination_outcome: None,
            final_price: None,
            delivery_reference: None,
            attempt_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn both_confirmed(&self) -> bool {
        self.client_confirmed && self.counterparty_confirmed
    }

    /// Price the execution trigger sends to the delivery collaborator:
    /// the negotiated final price when one exists, the template price
    /// otherwise (resolved by the caller who holds the template).
    pub fn effective_price(&self, proposed_price: i64) -> i64 {
        self.final_price.unwrap_or(proposed_price)
    }
}
