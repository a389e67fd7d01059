// ==========================================
// Scheduled Deliveries - schedule aggregate root
// ==========================================
// ScheduledDelivery is the template a client registers once; the
// recurrence engine expands it into concrete occurrences. The
// lifecycle manager is the only writer of its state.
// ==========================================

use crate::domain::types::{PackageSize, RecurrenceKind, ScheduleStatus};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

// ==========================================
// Address - one endpoint of a delivery
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub address: String,
    pub contact_name: Option<String>,
    pub contact_phone: Option<String>,
    pub instructions: Option<String>,
}

impl Address {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            contact_name: None,
            contact_phone: None,
            instructions: None,
        }
    }
}

// ==========================================
// PackageSpec - what is being moved
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageSpec {
    pub size: PackageSize,
    pub weight_kg: Option<f64>,
    pub fragile: bool,
    pub category: Option<String>,
}

impl PackageSpec {
    pub fn of_size(size: PackageSize) -> Self {
        Self {
            size,
            weight_kg: None,
            fragile: false,
            category: None,
        }
    }
}

// ==========================================
// RecurrenceRule - occurrence generation template
// ==========================================
// days_of_week uses 0=Monday .. 6=Sunday and is meaningful only for
// WEEKLY. end_date is an exclusive upper bound. When neither end_date
// nor max_occurrences is set, expansion is capped by the configured
// hard ceiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurrenceRule {
    pub kind: RecurrenceKind,
    pub interval: u32,
    #[serde(default)]
    pub days_of_week: Vec<u8>,
    pub end_date: Option<NaiveDate>,
    pub max_occurrences: Option<u32>,
}

impl RecurrenceRule {
    /// Single occurrence at the anchor, no repetition.
    pub fn once() -> Self {
        Self {
            kind: RecurrenceKind::None,
            interval: 1,
            days_of_week: Vec::new(),
            end_date: None,
            max_occurrences: None,
        }
    }

    pub fn daily(interval: u32) -> Self {
        Self {
            kind: RecurrenceKind::Daily,
            interval,
            days_of_week: Vec::new(),
            end_date: None,
            max_occurrences: None,
        }
    }

    pub fn weekly(interval: u32, days_of_week: Vec<u8>) -> Self {
        Self {
            kind: RecurrenceKind::Weekly,
            interval,
            days_of_week,
            end_date: None,
            max_occurrences: None,
        }
    }

    pub fn monthly(interval: u32) -> Self {
        Self {
            kind: RecurrenceKind::Monthly,
            interval,
            days_of_week: Vec::new(),
            end_date: None,
            max_occurrences: None,
        }
    }

    pub fn with_end_date(mut self, end_date: NaiveDate) -> Self {
        self.end_date = Some(end_date);
        self
    }

    pub fn with_max_occurrences(mut self, max: u32) -> Self {
        self.max_occurrences = Some(max);
        self
    }
}

// ==========================================
// ScheduledDelivery - aggregate root
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledDelivery {
    pub schedule_id: String,
    pub client_id: String,
    /// The other party of the J-1 handshake (recipient or partner courier).
    pub counterparty_id: String,

    pub pickup: Address,
    pub delivery: Address,
    pub package: PackageSpec,

    /// Template price in minor currency units. Never rewritten by a
    /// negotiation; negotiated prices live on the occurrence.
    pub proposed_price: i64,

    pub recurrence: RecurrenceRule,
    /// Anchor datetime of the first occurrence.
    pub start_at: NaiveDateTime,

    pub notification_advance_hours: i64,
    pub auto_create_delivery: bool,

    pub status: ScheduleStatus,
    pub total_executions: i64,
    pub last_executed_at: Option<NaiveDateTime>,

    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    /// Optimistic lock revision.
    pub revision: i32,
}

impl ScheduledDelivery {
    pub fn is_active(&self) -> bool {
        self.status == ScheduleStatus::Active
    }

    pub fn is_paused(&self) -> bool {
        self.status == ScheduleStatus::Paused
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
