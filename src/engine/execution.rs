// ==========================================
// Execution Trigger
// ==========================================
// Materializes a coordinated occurrence into a real delivery order
// via the external collaborator, exactly once. The at-most-once
// guarantee is the atomic READY->EXECUTING claim: of two racing
// ticks, only one observes the claim and only that one calls out.
// ==========================================

use crate::config::SchedulerSettings;
use crate::domain::occurrence::ScheduledOccurrence;
use crate::domain::types::OccurrenceStatus;
use crate::engine::collaborators::{
    DeliveryCreator, DeliveryRequest, NotificationKind, NotificationSender,
};
use crate::engine::lifecycle::LifecycleManager;
use crate::engine::{SchedulerError, SchedulerResult};
use crate::repository::{OccurrenceRepository, ScheduleRepository};
use chrono::NaiveDateTime;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct ExecutionTrigger {
    schedules: Arc<ScheduleRepository>,
    occurrences: Arc<OccurrenceRepository>,
    lifecycle: Arc<LifecycleManager>,
    creator: Arc<dyn DeliveryCreator>,
    notifier: Arc<dyn NotificationSender>,
    settings: SchedulerSettings,
}

impl ExecutionTrigger {
    pub fn new(
        schedules: Arc<ScheduleRepository>,
        occurrences: Arc<OccurrenceRepository>,
        lifecycle: Arc<LifecycleManager>,
        creator: Arc<dyn DeliveryCreator>,
        notifier: Arc<dyn NotificationSender>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            schedules,
            occurrences,
            lifecycle,
            creator,
            notifier,
            settings,
        }
    }

    /// Execute every READY occurrence whose scheduled_for has arrived
    /// on an ACTIVE auto-create schedule. Returns how many executions
    /// were attempted this tick.
    pub async fn dispatch_due(&self, now: NaiveDateTime) -> SchedulerResult<usize> {
        let due = self
            .occurrences
            .find_due_for_execution(now, self.settings.dispatch_batch_size)?;

        let mut attempted = 0;
        for occurrence in due {
            if self.try_execute(&occurrence.occurrence_id, now).await?.is_some() {
                attempted += 1;
            }
        }

        if attempted > 0 {
            info!(attempted, "execution dispatch tick");
        }
        Ok(attempted)
    }

    /// Manual trigger, bypassing the due-time and auto-create checks.
    /// Still goes through the claim, so it cannot double-execute.
    ///
    /// A collaborator failure is recorded first (retry or terminal
    /// FAILED) and then surfaced to the caller as `ExecutionFailure`.
    pub async fn execute_now(
        &self,
        occurrence_id: &str,
        now: NaiveDateTime,
    ) -> SchedulerResult<ScheduledOccurrence> {
        match self.try_execute(occurrence_id, now).await? {
            Some((occurrence, None)) => Ok(occurrence),
            Some((_, Some(failure))) => Err(SchedulerError::ExecutionFailure(failure)),
            None => {
                let occurrence = self.occurrences.require(occurrence_id)?;
                Err(SchedulerError::InvalidStateTransition {
                    entity: "ScheduledOccurrence",
                    id: occurrence_id.to_string(),
                    from: occurrence.status.to_string(),
                    to: OccurrenceStatus::Executing.to_string(),
                })
            }
        }
    }

    /// Claim and execute one occurrence. Ok(None) means the claim was
    /// lost (not READY, or another worker got there first) — not an
    /// error. A collaborator failure is recorded on the occurrence and
    /// returned alongside it so the manual trigger can surface it.
    async fn try_execute(
        &self,
        occurrence_id: &str,
        now: NaiveDateTime,
    ) -> SchedulerResult<Option<(ScheduledOccurrence, Option<String>)>> {
        if !self.occurrences.claim(
            occurrence_id,
            OccurrenceStatus::Ready,
            OccurrenceStatus::Executing,
            now,
        )? {
            debug!(occurrence_id, "execution claim lost");
            return Ok(None);
        }

        let mut occurrence = self.occurrences.require(occurrence_id)?;
        let schedule = self.schedules.require(&occurrence.schedule_id)?;

        // In-flight cancellation check before the irreversible call.
        if schedule.is_terminal() {
            occurrence.status = OccurrenceStatus::Skipped;
            self.occurrences.update(&occurrence, now)?;
            info!(occurrence_id, "execution aborted, parent schedule terminal");
            return Ok(Some((occurrence, None)));
        }

        let request = DeliveryRequest {
            schedule_id: schedule.schedule_id.clone(),
            occurrence_id: occurrence.occurrence_id.clone(),
            client_id: schedule.client_id.clone(),
            pickup: schedule.pickup.clone(),
            delivery: schedule.delivery.clone(),
            package: schedule.package.clone(),
            price: occurrence.effective_price(schedule.proposed_price),
        };

        let attempt = match self.creator.create_delivery(&request).await {
            Ok(delivery_reference) => {
                let recorded = self.lifecycle.record_execution(
                    occurrence_id,
                    Ok(delivery_reference),
                    now,
                )?;
                if let Err(e) = self
                    .notifier
                    .notify(&schedule.client_id, occurrence_id, NotificationKind::DeliveryCreated)
                    .await
                {
                    warn!(occurrence_id, error = %e, "delivery-created notification failed");
                }
                (recorded, None)
            }
            Err(e) => {
                warn!(occurrence_id, error = %e, "delivery creation collaborator failed");
                let message = e.to_string();
                let recorded = self.lifecycle.record_execution(
                    occurrence_id,
                    Err((message.clone(), e.is_transient())),
                    now,
                )?;
                (recorded, Some(message))
            }
        };

        Ok(Some(attempt))
    }
}
