// ==========================================
// Coordination Protocol (J-1 handshake)
// ==========================================
// Runs the day-before confirmation between the two parties of a
// scheduled delivery. The handshake is an explicit state field plus a
// deadline column swept by the dispatcher; there are no live timers,
// so crash recovery is a plain re-read.
// ==========================================

use crate::config::SchedulerSettings;
use crate::domain::negotiation::{NegotiationEntry, NegotiationSession};
use crate::domain::occurrence::ScheduledOccurrence;
use crate::domain::types::{
    CoordinationOutcome, NegotiationAction, OccurrenceStatus, Party, ScheduleStatus,
};
use crate::engine::collaborators::{NotificationKind, NotificationSender};
use crate::engine::lifecycle::LifecycleManager;
use crate::engine::{SchedulerError, SchedulerResult};
use crate::repository::{NegotiationRepository, OccurrenceRepository, ScheduleRepository};
use chrono::{Duration, NaiveDateTime};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What a party's confirmation did to the handshake.
#[derive(Debug)]
pub enum ConfirmationOutcome {
    /// This party confirmed; the other one is still pending.
    AwaitingOtherParty(ScheduledOccurrence),
    /// Both parties confirmed unchanged terms; occurrence is READY.
    Confirmed(ScheduledOccurrence),
    /// The party proposed a different price; negotiation is open and
    /// the handshake outcome is deferred until it resolves.
    NegotiationOpened(NegotiationSession),
    /// The parent schedule was cancelled under us; occurrence SKIPPED.
    Skipped(ScheduledOccurrence),
}

pub struct CoordinationProtocol {
    schedules: Arc<ScheduleRepository>,
    occurrences: Arc<OccurrenceRepository>,
    negotiations: Arc<NegotiationRepository>,
    lifecycle: Arc<LifecycleManager>,
    notifier: Arc<dyn NotificationSender>,
    settings: SchedulerSettings,
}

impl CoordinationProtocol {
    pub fn new(
        schedules: Arc<ScheduleRepository>,
        occurrences: Arc<OccurrenceRepository>,
        negotiations: Arc<NegotiationRepository>,
        lifecycle: Arc<LifecycleManager>,
        notifier: Arc<dyn NotificationSender>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            schedules,
            occurrences,
            negotiations,
            lifecycle,
            notifier,
            settings,
        }
    }

    // ==========================================
    // Tick entry points
    // ==========================================

    /// Open the handshake for every PENDING occurrence whose
    /// notification window has arrived (parent ACTIVE only — paused
    /// schedules keep their occurrences PENDING untouched).
    ///
    /// Idempotent: the due query selects PENDING rows and the
    /// PENDING->COORDINATING claim is a single conditional UPDATE
    /// carrying the deadline and flag reset, so a second tick cannot
    /// double-notify and an interrupted one cannot leave a handshake
    /// without a deadline.
    pub async fn dispatch_due(&self, now: NaiveDateTime) -> SchedulerResult<usize> {
        let due = self
            .occurrences
            .find_due_for_coordination(now, self.settings.dispatch_batch_size)?;

        let mut started = 0;
        for occurrence in due {
            let deadline = now + Duration::hours(self.settings.coordination_timeout_hours);
            if !self
                .occurrences
                .claim_for_coordination(&occurrence.occurrence_id, deadline, now)?
            {
                continue; // another worker took it, or the row left PENDING
            }

            let schedule = self.schedules.require(&occurrence.schedule_id)?;
            self.notify_both(
                &schedule.client_id,
                &schedule.counterparty_id,
                &occurrence.occurrence_id,
                NotificationKind::UpcomingDelivery,
            )
            .await;

            debug!(
                occurrence_id = %occurrence.occurrence_id,
                deadline = %deadline,
                "coordination opened"
            );
            started += 1;
        }

        if started > 0 {
            info!(started, "coordination dispatch tick");
        }
        Ok(started)
    }

    /// Sweep COORDINATING occurrences whose confirmation window has
    /// elapsed: outcome TIMED_OUT, occurrence FAILED.
    pub async fn expire_timed_out(&self, now: NaiveDateTime) -> SchedulerResult<usize> {
        let expired = self
            .occurrences
            .find_coordination_expired(now, self.settings.dispatch_batch_size)?;

        let mut count = 0;
        for occurrence in expired {
            let recorded = self.lifecycle.record_coordination_outcome(
                &occurrence.occurrence_id,
                CoordinationOutcome::TimedOut,
                now,
            )?;

            if recorded.status == OccurrenceStatus::Failed {
                let schedule = self.schedules.require(&occurrence.schedule_id)?;
                self.notify_both(
                    &schedule.client_id,
                    &schedule.counterparty_id,
                    &occurrence.occurrence_id,
                    NotificationKind::CoordinationTimedOut,
                )
                .await;
            }
            count += 1;
        }

        if count > 0 {
            info!(count, "coordination timeouts swept");
        }
        Ok(count)
    }

    // ==========================================
    // Party responses
    // ==========================================

    /// A party answers the J-1 notification. No price proposal (or the
    /// unchanged price) counts as a confirmation; a differing price
    /// opens the negotiation sub-protocol and defers the outcome.
    pub async fn record_confirmation(
        &self,
        occurrence_id: &str,
        party: Party,
        price_proposal: Option<i64>,
        now: NaiveDateTime,
    ) -> SchedulerResult<ConfirmationOutcome> {
        let mut occurrence = self.occurrences.require(occurrence_id)?;

        if occurrence.status != OccurrenceStatus::Coordinating {
            return Err(SchedulerError::InvalidStateTransition {
                entity: "ScheduledOccurrence",
                id: occurrence_id.to_string(),
                from: occurrence.status.to_string(),
                to: "confirmation".to_string(),
            });
        }

        let schedule = self.schedules.require(&occurrence.schedule_id)?;
        if schedule.status == ScheduleStatus::Cancelled {
            occurrence.status = OccurrenceStatus::Skipped;
            self.occurrences.update(&occurrence, now)?;
            return Ok(ConfirmationOutcome::Skipped(occurrence));
        }

        // A differing price proposal turns the confirmation into the
        // opening offer of a negotiation.
        if let Some(proposal) = price_proposal {
            if proposal <= 0 {
                return Err(SchedulerError::InvalidOffer(
                    "proposed price must be positive".to_string(),
                ));
            }
            if proposal != schedule.proposed_price {
                return self
                    .open_negotiation(occurrence, &schedule.schedule_id, schedule.proposed_price, party, proposal, now)
                    .await;
            }
        }

        match party {
            Party::Client => occurrence.client_confirmed = true,
            Party::Counterparty => occurrence.counterparty_confirmed = true,
        }

        if occurrence.both_confirmed() {
            let recorded = self.lifecycle.record_coordination_outcome(
                occurrence_id,
                CoordinationOutcome::Confirmed { final_price: None },
                now,
            )?;
            info!(occurrence_id, "both parties confirmed unchanged terms");
            Ok(ConfirmationOutcome::Confirmed(recorded))
        } else {
            self.occurrences.update(&occurrence, now)?;
            debug!(occurrence_id, party = %party, "confirmation recorded, awaiting other party");
            Ok(ConfirmationOutcome::AwaitingOtherParty(occurrence))
        }
    }

    async fn open_negotiation(
        &self,
        mut occurrence: ScheduledOccurrence,
        schedule_id: &str,
        base_price: i64,
        offerer: Party,
        proposal: i64,
        now: NaiveDateTime,
    ) -> SchedulerResult<ConfirmationOutcome> {
        let session = NegotiationSession::open(
            Uuid::new_v4().to_string(),
            occurrence.occurrence_id.clone(),
            base_price,
            proposal,
            offerer,
            self.settings.negotiation_max_rounds,
            now,
        );
        self.negotiations.insert_session(&session)?;
        self.negotiations.append_entry(&NegotiationEntry {
            entry_id: 0,
            session_id: session.session_id.clone(),
            actor: offerer,
            action: NegotiationAction::Offer,
            price: Some(proposal),
            message: None,
            created_at: now,
        })?;

        occurrence.status = OccurrenceStatus::Negotiating;
        self.occurrences.update(&occurrence, now)?;

        let schedule = self.schedules.require(schedule_id)?;
        let other_party_id = match offerer.other() {
            Party::Client => schedule.client_id.as_str(),
            Party::Counterparty => schedule.counterparty_id.as_str(),
        };
        if let Err(e) = self
            .notifier
            .notify(other_party_id, &occurrence.occurrence_id, NotificationKind::PriceProposal)
            .await
        {
            warn!(
                occurrence_id = %occurrence.occurrence_id,
                error = %e,
                "price proposal notification failed"
            );
        }

        info!(
            occurrence_id = %occurrence.occurrence_id,
            session_id = %session.session_id,
            base_price,
            proposal,
            offerer = %offerer,
            "negotiation opened"
        );
        Ok(ConfirmationOutcome::NegotiationOpened(session))
    }

    /// Notify both parties; failures are logged and never block.
    async fn notify_both(
        &self,
        client_id: &str,
        counterparty_id: &str,
        occurrence_id: &str,
        kind: NotificationKind,
    ) {
        let (client_result, counterparty_result) = futures::join!(
            self.notifier.notify(client_id, occurrence_id, kind),
            self.notifier.notify(counterparty_id, occurrence_id, kind),
        );
        if let Err(e) = client_result {
            warn!(occurrence_id, party_id = client_id, error = %e, "notification failed");
        }
        if let Err(e) = counterparty_result {
            warn!(occurrence_id, party_id = counterparty_id, error = %e, "notification failed");
        }
    }
}
