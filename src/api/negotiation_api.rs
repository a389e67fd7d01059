// ==========================================
// NegotiationApi - respond / counter-offer / history
// ==========================================

use crate::api::error::ApiResult;
use crate::domain::negotiation::{NegotiationEntry, NegotiationSession};
use crate::domain::types::Party;
use crate::engine::negotiation::NegotiationProtocol;
use chrono::NaiveDateTime;
use std::sync::Arc;

pub struct NegotiationApi {
    negotiation: Arc<NegotiationProtocol>,
}

impl NegotiationApi {
    pub fn new(negotiation: Arc<NegotiationProtocol>) -> Self {
        Self { negotiation }
    }

    /// Accept or reject the offer currently on the table.
    pub fn respond(
        &self,
        session_id: &str,
        party: Party,
        accept: bool,
        message: Option<String>,
        now: NaiveDateTime,
    ) -> ApiResult<NegotiationSession> {
        Ok(self
            .negotiation
            .respond(session_id, party, accept, message, now)?)
    }

    /// Propose a different price, flipping the offerer role.
    pub async fn counter_offer(
        &self,
        session_id: &str,
        party: Party,
        proposed_price: i64,
        message: Option<String>,
        now: NaiveDateTime,
    ) -> ApiResult<NegotiationSession> {
        Ok(self
            .negotiation
            .counter_offer(session_id, party, proposed_price, message, now)
            .await?)
    }

    pub fn get_history(&self, session_id: &str) -> ApiResult<Vec<NegotiationEntry>> {
        Ok(self.negotiation.history(session_id)?)
    }

    /// Most recent session of an occurrence, if any.
    pub fn get_session(&self, occurrence_id: &str) -> ApiResult<Option<NegotiationSession>> {
        Ok(self.negotiation.session_for_occurrence(occurrence_id)?)
    }
}
