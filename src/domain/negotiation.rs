// ==========================================
// Scheduled Deliveries - negotiation session
// ==========================================
// Bounded offer/counter-offer exchange over one occurrence's price.
// At most one OPEN session per occurrence (partial unique index).
// ==========================================

use crate::domain::types::{NegotiationAction, NegotiationStatus, Party};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationSession {
    pub session_id: String,
    pub occurrence_id: String,

    /// The schedule's proposed price at session open.
    pub base_price: i64,
    /// The offer currently on the table.
    pub current_offer: i64,
    /// Who made the current offer. A counter-offer always flips this;
    /// the current offerer cannot submit the next offer.
    pub current_offerer: Party,

    pub status: NegotiationStatus,
    pub round_count: i32,
    /// Round ceiling captured at session open so a later config change
    /// does not move the goalposts mid-negotiation.
    pub max_rounds: i32,

    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl NegotiationSession {
    pub fn open(
        session_id: impl Into<String>,
        occurrence_id: impl Into<String>,
        base_price: i64,
        first_offer: i64,
        offerer: Party,
        max_rounds: i32,
        now: NaiveDateTime,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            occurrence_id: occurrence_id.into(),
            base_price,
            current_offer: first_offer,
            current_offerer: offerer,
            status: NegotiationStatus::Open,
            round_count: 1,
            max_rounds,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    /// The party expected to respond to the current offer.
    pub fn responder(&self) -> Party {
        self.current_offerer.other()
    }

    pub fn rounds_exhausted(&self) -> bool {
        self.round_count >= self.max_rounds
    }
}

// ==========================================
// NegotiationEntry - append-only history line
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationEntry {
    /// AUTOINCREMENT id; 0 until persisted.
    pub entry_id: i64,
    pub session_id: String,
    pub actor: Party,
    pub action: NegotiationAction,
    pub price: Option<i64>,
    pub message: Option<String>,
    pub created_at: NaiveDateTime,
}
