// ==========================================
// Negotiation Sub-protocol
// ==========================================
// Bounded offer/counter-offer state machine over one occurrence's
// price. Roles alternate: the current offerer cannot act on their own
// offer. Resolution feeds back into coordination as the occurrence's
// outcome; the schedule's template price is never touched.
// ==========================================

use crate::domain::negotiation::{NegotiationEntry, NegotiationSession};
use crate::domain::types::{CoordinationOutcome, NegotiationAction, NegotiationStatus, Party};
use crate::engine::collaborators::{NotificationKind, NotificationSender};
use crate::engine::lifecycle::LifecycleManager;
use crate::engine::{SchedulerError, SchedulerResult};
use crate::repository::{NegotiationRepository, OccurrenceRepository, ScheduleRepository};
use chrono::NaiveDateTime;
use std::sync::Arc;
use tracing::{info, warn};

pub struct NegotiationProtocol {
    schedules: Arc<ScheduleRepository>,
    occurrences: Arc<OccurrenceRepository>,
    negotiations: Arc<NegotiationRepository>,
    lifecycle: Arc<LifecycleManager>,
    notifier: Arc<dyn NotificationSender>,
}

impl NegotiationProtocol {
    pub fn new(
        schedules: Arc<ScheduleRepository>,
        occurrences: Arc<OccurrenceRepository>,
        negotiations: Arc<NegotiationRepository>,
        lifecycle: Arc<LifecycleManager>,
        notifier: Arc<dyn NotificationSender>,
    ) -> Self {
        Self {
            schedules,
            occurrences,
            negotiations,
            lifecycle,
            notifier,
        }
    }

    /// Accept or reject the offer currently on the table.
    ///
    /// Accept resolves the session at `current_offer` and confirms the
    /// occurrence with that price as its occurrence-scoped final price.
    /// Reject fails the occurrence with last_error "negotiation_rejected".
    pub fn respond(
        &self,
        session_id: &str,
        party: Party,
        accept: bool,
        message: Option<String>,
        now: NaiveDateTime,
    ) -> SchedulerResult<NegotiationSession> {
        let mut session = self.negotiations.require(session_id)?;
        self.check_open(&session)?;
        self.check_responder(&session, party)?;

        let (status, action, outcome) = if accept {
            (
                NegotiationStatus::Accepted,
                NegotiationAction::Accept,
                CoordinationOutcome::Confirmed {
                    final_price: Some(session.current_offer),
                },
            )
        } else {
            (
                NegotiationStatus::Rejected,
                NegotiationAction::Reject,
                CoordinationOutcome::NegotiationRejected,
            )
        };

        session.status = status;
        self.negotiations.update_session(&session, now)?;
        self.negotiations.append_entry(&NegotiationEntry {
            entry_id: 0,
            session_id: session.session_id.clone(),
            actor: party,
            action,
            price: accept.then_some(session.current_offer),
            message,
            created_at: now,
        })?;

        self.lifecycle
            .record_coordination_outcome(&session.occurrence_id, outcome, now)?;

        info!(
            session_id,
            party = %party,
            accepted = accept,
            final_price = session.current_offer,
            "negotiation resolved"
        );
        Ok(session)
    }

    /// Put a new price on the table, flipping the offerer role.
    ///
    /// Fails with `NegotiationExpired` when the round cap is already
    /// reached — the session is then forced EXPIRED and the occurrence
    /// fails with last_error "negotiation_expired".
    pub async fn counter_offer(
        &self,
        session_id: &str,
        party: Party,
        proposed_price: i64,
        message: Option<String>,
        now: NaiveDateTime,
    ) -> SchedulerResult<NegotiationSession> {
        let mut session = self.negotiations.require(session_id)?;
        self.check_open(&session)?;
        self.check_responder(&session, party)?;

        if proposed_price <= 0 {
            return Err(SchedulerError::InvalidOffer(
                "proposed price must be positive".to_string(),
            ));
        }

        if session.rounds_exhausted() {
            session.status = NegotiationStatus::Expired;
            self.negotiations.update_session(&session, now)?;
            self.lifecycle.record_coordination_outcome(
                &session.occurrence_id,
                CoordinationOutcome::NegotiationExpired,
                now,
            )?;
            warn!(
                session_id,
                rounds = session.round_count,
                "negotiation round cap reached, session expired"
            );
            return Err(SchedulerError::NegotiationExpired {
                session_id: session_id.to_string(),
                max_rounds: session.max_rounds,
            });
        }

        session.current_offer = proposed_price;
        session.current_offerer = party;
        session.round_count += 1;
        self.negotiations.update_session(&session, now)?;
        self.negotiations.append_entry(&NegotiationEntry {
            entry_id: 0,
            session_id: session.session_id.clone(),
            actor: party,
            action: NegotiationAction::CounterOffer,
            price: Some(proposed_price),
            message,
            created_at: now,
        })?;

        self.notify_responder(&session).await;

        info!(
            session_id,
            round = session.round_count,
            offer = proposed_price,
            offerer = %party,
            "counter-offer recorded"
        );
        Ok(session)
    }

    /// Full offer history of a session, oldest first.
    pub fn history(&self, session_id: &str) -> SchedulerResult<Vec<NegotiationEntry>> {
        self.negotiations.require(session_id)?;
        Ok(self.negotiations.list_entries(session_id)?)
    }

    /// Most recent session attached to an occurrence, if any.
    pub fn session_for_occurrence(
        &self,
        occurrence_id: &str,
    ) -> SchedulerResult<Option<NegotiationSession>> {
        Ok(self.negotiations.find_latest_by_occurrence(occurrence_id)?)
    }

    fn check_open(&self, session: &NegotiationSession) -> SchedulerResult<()> {
        if !session.is_open() {
            return Err(SchedulerError::NegotiationClosed {
                session_id: session.session_id.clone(),
                status: session.status.to_string(),
            });
        }
        Ok(())
    }

    fn check_responder(&self, session: &NegotiationSession, party: Party) -> SchedulerResult<()> {
        if party != session.responder() {
            return Err(SchedulerError::NotCurrentResponder {
                session_id: session.session_id.clone(),
                party: party.to_string(),
            });
        }
        Ok(())
    }

    /// Tell the party now expected to answer that a new price is on the
    /// table. Fire-and-forget.
    async fn notify_responder(&self, session: &NegotiationSession) {
        let schedule = match self
            .occurrences
            .require(&session.occurrence_id)
            .map_err(SchedulerError::from)
            .and_then(|o| Ok(self.schedules.require(&o.schedule_id)?))
        {
            Ok(s) => s,
            Err(e) => {
                warn!(
                    session_id = %session.session_id,
                    error = %e,
                    "could not resolve schedule for counter-offer notification"
                );
                return;
            }
        };

        let responder_id = match session.responder() {
            Party::Client => schedule.client_id.as_str(),
            Party::Counterparty => schedule.counterparty_id.as_str(),
        };
        if let Err(e) = self
            .notifier
            .notify(responder_id, &session.occurrence_id, NotificationKind::PriceProposal)
            .await
        {
            warn!(
                session_id = %session.session_id,
                party_id = responder_id,
                error = %e,
                "counter-offer notification failed"
            );
        }
    }
}
