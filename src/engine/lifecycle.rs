// ==========================================
// Schedule Lifecycle Manager
// ==========================================
// Owns the ScheduledDelivery aggregate and is the only writer of
// schedule/occurrence state. All transitions funnel through here so
// the state machine in domain::types stays enforceable.
// ==========================================

use crate::config::SchedulerSettings;
use crate::domain::occurrence::ScheduledOccurrence;
use crate::domain::schedule::{Address, PackageSpec, RecurrenceRule, ScheduledDelivery};
use crate::domain::types::{CoordinationOutcome, OccurrenceStatus, ScheduleStatus};
use crate::engine::recurrence::RecurrenceEngine;
use crate::engine::{FieldViolation, SchedulerError, SchedulerResult};
use crate::repository::{OccurrenceRepository, RepositoryError, ScheduleRepository};
use chrono::{Days, NaiveDateTime};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

// ==========================================
// Inputs
// ==========================================

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CreateScheduleInput {
    pub client_id: String,
    pub counterparty_id: String,
    pub pickup: Address,
    pub delivery: Address,
    pub package: PackageSpec,
    pub proposed_price: i64,
    pub recurrence: RecurrenceRule,
    pub start_at: NaiveDateTime,
    pub notification_advance_hours: Option<i64>,
    pub auto_create_delivery: bool,
}

/// Logistics fields only. The recurrence rule is immutable after
/// creation; changing it would orphan already-generated occurrences.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct UpdateScheduleInput {
    pub pickup: Option<Address>,
    pub delivery: Option<Address>,
    pub package: Option<PackageSpec>,
    pub proposed_price: Option<i64>,
    pub notification_advance_hours: Option<i64>,
    pub auto_create_delivery: Option<bool>,
}

// ==========================================
// LifecycleManager
// ==========================================

pub struct LifecycleManager {
    schedules: Arc<ScheduleRepository>,
    occurrences: Arc<OccurrenceRepository>,
    recurrence: RecurrenceEngine,
    settings: SchedulerSettings,
}

impl LifecycleManager {
    pub fn new(
        schedules: Arc<ScheduleRepository>,
        occurrences: Arc<OccurrenceRepository>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            schedules,
            occurrences,
            recurrence: RecurrenceEngine::new(settings.hard_ceiling),
            settings,
        }
    }

    pub fn recurrence_engine(&self) -> &RecurrenceEngine {
        &self.recurrence
    }

    // ==========================================
    // Creation
    // ==========================================

    /// Validate the definition, expand the first horizon window into
    /// PENDING occurrences and persist the aggregate as ACTIVE.
    ///
    /// Validation is multi-error: every violated field is reported, not
    /// just the first one.
    pub fn create(
        &self,
        input: CreateScheduleInput,
        now: NaiveDateTime,
    ) -> SchedulerResult<ScheduledDelivery> {
        let violations = self.validate_create(&input);
        if !violations.is_empty() {
            return Err(SchedulerError::validation(violations));
        }

        let schedule = ScheduledDelivery {
            schedule_id: Uuid::new_v4().to_string(),
            client_id: input.client_id,
            counterparty_id: input.counterparty_id,
            pickup: input.pickup,
            delivery: input.delivery,
            package: input.package,
            proposed_price: input.proposed_price,
            recurrence: input.recurrence,
            start_at: input.start_at,
            notification_advance_hours: input.notification_advance_hours.unwrap_or(24),
            auto_create_delivery: input.auto_create_delivery,
            status: ScheduleStatus::Active,
            total_executions: 0,
            last_executed_at: None,
            created_at: now,
            updated_at: now,
            revision: 0,
        };

        let horizon = horizon_end(now, self.settings.horizon_days);
        let dates = self
            .recurrence
            .expand(&schedule.recurrence, schedule.start_at, horizon)?;

        self.schedules.insert(&schedule)?;
        let seeded = self.seed_occurrences(&schedule.schedule_id, &dates, now)?;

        info!(
            schedule_id = %schedule.schedule_id,
            client_id = %schedule.client_id,
            kind = %schedule.recurrence.kind,
            seeded,
            "schedule created"
        );

        Ok(schedule)
    }

    fn validate_create(&self, input: &CreateScheduleInput) -> Vec<FieldViolation> {
        let mut violations = Vec::new();

        if input.client_id.trim().is_empty() {
            violations.push(FieldViolation::new("client_id", "must not be empty"));
        }
        if input.counterparty_id.trim().is_empty() {
            violations.push(FieldViolation::new("counterparty_id", "must not be empty"));
        }
        if input.pickup.address.trim().is_empty() {
            violations.push(FieldViolation::new("pickup.address", "must not be empty"));
        }
        if input.delivery.address.trim().is_empty() {
            violations.push(FieldViolation::new("delivery.address", "must not be empty"));
        }
        if input.proposed_price <= 0 {
            violations.push(FieldViolation::new("proposed_price", "must be positive"));
        }
        if let Some(weight) = input.package.weight_kg {
            if weight <= 0.0 {
                violations.push(FieldViolation::new("package.weight_kg", "must be positive"));
            }
        }
        if let Some(hours) = input.notification_advance_hours {
            if hours <= 0 {
                violations.push(FieldViolation::new(
                    "notification_advance_hours",
                    "must be positive",
                ));
            }
        }
        if let Err(e) = self.recurrence.validate(&input.recurrence) {
            violations.push(FieldViolation::new("recurrence", e.to_string()));
        }

        violations
    }

    fn seed_occurrences(
        &self,
        schedule_id: &str,
        dates: &[NaiveDateTime],
        now: NaiveDateTime,
    ) -> SchedulerResult<usize> {
        let occurrences: Vec<ScheduledOccurrence> = dates
            .iter()
            .map(|d| {
                ScheduledOccurrence::new(Uuid::new_v4().to_string(), schedule_id, *d, now)
            })
            .collect();
        Ok(self.occurrences.insert_missing(&occurrences)?)
    }

    // ==========================================
    // Pause / resume / cancel
    // ==========================================

    pub fn pause(&self, schedule_id: &str, now: NaiveDateTime) -> SchedulerResult<ScheduledDelivery> {
        self.transition_schedule(schedule_id, ScheduleStatus::Paused, now)
    }

    pub fn resume(&self, schedule_id: &str, now: NaiveDateTime) -> SchedulerResult<ScheduledDelivery> {
        self.transition_schedule(schedule_id, ScheduleStatus::Active, now)
    }

    fn transition_schedule(
        &self,
        schedule_id: &str,
        target: ScheduleStatus,
        now: NaiveDateTime,
    ) -> SchedulerResult<ScheduledDelivery> {
        let mut schedule = self.schedules.require(schedule_id)?;

        let allowed = match target {
            ScheduleStatus::Paused => schedule.status == ScheduleStatus::Active,
            ScheduleStatus::Active => schedule.status == ScheduleStatus::Paused,
            _ => false,
        };
        if !allowed {
            return Err(SchedulerError::InvalidStateTransition {
                entity: "ScheduledDelivery",
                id: schedule_id.to_string(),
                from: schedule.status.to_string(),
                to: target.to_string(),
            });
        }

        schedule.status = target;
        self.schedules.update(&schedule, now)?;
        schedule.revision += 1;

        info!(schedule_id, status = %target, "schedule status changed");
        Ok(schedule)
    }

    /// Terminal. Every non-terminal occurrence cascades to SKIPPED;
    /// in-flight EXECUTING rows abort at their own commit point.
    pub fn cancel(&self, schedule_id: &str, now: NaiveDateTime) -> SchedulerResult<ScheduledDelivery> {
        let mut schedule = self.schedules.require(schedule_id)?;

        if schedule.is_terminal() {
            return Err(SchedulerError::InvalidStateTransition {
                entity: "ScheduledDelivery",
                id: schedule_id.to_string(),
                from: schedule.status.to_string(),
                to: ScheduleStatus::Cancelled.to_string(),
            });
        }

        schedule.status = ScheduleStatus::Cancelled;
        self.schedules.update(&schedule, now)?;
        schedule.revision += 1;

        let skipped = self.occurrences.skip_open_for_schedule(schedule_id, now)?;
        info!(schedule_id, skipped, "schedule cancelled");

        Ok(schedule)
    }

    // ==========================================
    // Update / delete
    // ==========================================

    pub fn update_details(
        &self,
        schedule_id: &str,
        input: UpdateScheduleInput,
        now: NaiveDateTime,
    ) -> SchedulerResult<ScheduledDelivery> {
        let mut schedule = self.schedules.require(schedule_id)?;

        if schedule.is_terminal() {
            return Err(SchedulerError::InvalidStateTransition {
                entity: "ScheduledDelivery",
                id: schedule_id.to_string(),
                from: schedule.status.to_string(),
                to: "UPDATED".to_string(),
            });
        }

        let mut violations = Vec::new();
        if let Some(pickup) = input.pickup {
            if pickup.address.trim().is_empty() {
                violations.push(FieldViolation::new("pickup.address", "must not be empty"));
            } else {
                schedule.pickup = pickup;
            }
        }
        if let Some(delivery) = input.delivery {
            if delivery.address.trim().is_empty() {
                violations.push(FieldViolation::new("delivery.address", "must not be empty"));
            } else {
                schedule.delivery = delivery;
            }
        }
        if let Some(package) = input.package {
            if package.weight_kg.is_some_and(|w| w <= 0.0) {
                violations.push(FieldViolation::new("package.weight_kg", "must be positive"));
            } else {
                schedule.package = package;
            }
        }
        if let Some(price) = input.proposed_price {
            if price <= 0 {
                violations.push(FieldViolation::new("proposed_price", "must be positive"));
            } else {
                schedule.proposed_price = price;
            }
        }
        if let Some(hours) = input.notification_advance_hours {
            if hours <= 0 {
                violations.push(FieldViolation::new(
                    "notification_advance_hours",
                    "must be positive",
                ));
            } else {
                schedule.notification_advance_hours = hours;
            }
        }
        if let Some(auto) = input.auto_create_delivery {
            schedule.auto_create_delivery = auto;
        }
        if !violations.is_empty() {
            return Err(SchedulerError::validation(violations));
        }

        self.schedules.update(&schedule, now)?;
        schedule.revision += 1;
        debug!(schedule_id, "schedule details updated");

        Ok(schedule)
    }

    /// Only terminal schedules may be deleted; cancellation and
    /// completion stay explicit, recorded states.
    pub fn delete(&self, schedule_id: &str) -> SchedulerResult<()> {
        let schedule = self.schedules.require(schedule_id)?;

        if !schedule.is_terminal() {
            return Err(SchedulerError::InvalidStateTransition {
                entity: "ScheduledDelivery",
                id: schedule_id.to_string(),
                from: schedule.status.to_string(),
                to: "DELETED".to_string(),
            });
        }

        self.schedules.delete(schedule_id)?;
        info!(schedule_id, "schedule deleted");
        Ok(())
    }

    // ==========================================
    // Occurrence transitions
    // ==========================================

    /// Record the J-1 handshake result: CONFIRMED moves the occurrence
    /// to READY (carrying the negotiated price if any); everything else
    /// lands in FAILED with a human-readable last_error.
    pub fn record_coordination_outcome(
        &self,
        occurrence_id: &str,
        outcome: CoordinationOutcome,
        now: NaiveDateTime,
    ) -> SchedulerResult<ScheduledOccurrence> {
        let mut occurrence = self.occurrences.require(occurrence_id)?;

        let target = if outcome.is_confirmed() {
            OccurrenceStatus::Ready
        } else {
            OccurrenceStatus::Failed
        };
        self.check_occurrence_transition(&occurrence, target)?;

        // A cancel racing with the handshake wins: abort as SKIPPED.
        let schedule = self.schedules.require(&occurrence.schedule_id)?;
        if schedule.status == ScheduleStatus::Cancelled {
            occurrence.status = OccurrenceStatus::Skipped;
            self.occurrences.update(&occurrence, now)?;
            return Ok(occurrence);
        }

        occurrence.status = target;
        occurrence.coordination_outcome = Some(outcome);
        match outcome {
            CoordinationOutcome::Confirmed { final_price } => {
                if final_price.is_some() {
                    occurrence.final_price = final_price;
                }
            }
            CoordinationOutcome::TimedOut => {
                occurrence.last_error = Some("coordination_timeout".to_string());
            }
            CoordinationOutcome::NegotiationRejected => {
                occurrence.last_error = Some("negotiation_rejected".to_string());
            }
            CoordinationOutcome::NegotiationExpired => {
                occurrence.last_error = Some("negotiation_expired".to_string());
            }
        }
        self.occurrences.update(&occurrence, now)?;

        info!(
            occurrence_id,
            outcome = outcome.to_db_str(),
            status = %occurrence.status,
            "coordination outcome recorded"
        );

        if occurrence.status == OccurrenceStatus::Failed {
            self.advance_completion(&occurrence.schedule_id, now)?;
        }

        Ok(occurrence)
    }

    /// Record the execution result of a claimed (EXECUTING) occurrence.
    ///
    /// Success sets the delivery reference and bumps the parent's
    /// execution counters. A transient failure below the attempt ceiling
    /// returns the occurrence to READY for the next tick; anything else
    /// is terminal FAILED.
    pub fn record_execution(
        &self,
        occurrence_id: &str,
        result: Result<String, (String, bool)>,
        now: NaiveDateTime,
    ) -> SchedulerResult<ScheduledOccurrence> {
        let mut occurrence = self.occurrences.require(occurrence_id)?;

        match result {
            Ok(delivery_reference) => {
                self.check_occurrence_transition(&occurrence, OccurrenceStatus::Executed)?;
                occurrence.status = OccurrenceStatus::Executed;
                occurrence.delivery_reference = Some(delivery_reference);
                occurrence.last_error = None;
                self.occurrences.update(&occurrence, now)?;

                self.bump_execution_counters(&occurrence.schedule_id, now)?;
                info!(
                    occurrence_id,
                    delivery_reference = occurrence.delivery_reference.as_deref().unwrap_or(""),
                    "occurrence executed"
                );
                self.advance_completion(&occurrence.schedule_id, now)?;
            }
            Err((message, transient)) => {
                occurrence.attempt_count += 1;
                occurrence.last_error = Some(message);

                let retry = transient && occurrence.attempt_count < self.settings.execution_max_attempts;
                let target = if retry {
                    OccurrenceStatus::Ready
                } else {
                    OccurrenceStatus::Failed
                };
                self.check_occurrence_transition(&occurrence, target)?;
                occurrence.status = target;
                self.occurrences.update(&occurrence, now)?;

                warn!(
                    occurrence_id,
                    attempt = occurrence.attempt_count,
                    retry,
                    error = occurrence.last_error.as_deref().unwrap_or(""),
                    "occurrence execution failed"
                );
                if target == OccurrenceStatus::Failed {
                    self.advance_completion(&occurrence.schedule_id, now)?;
                }
            }
        }

        Ok(occurrence)
    }

    /// Manual retry: reopen a terminal FAILED occurrence as READY with
    /// a fresh attempt budget. The parent must still be ACTIVE.
    pub fn retry(
        &self,
        occurrence_id: &str,
        now: NaiveDateTime,
    ) -> SchedulerResult<ScheduledOccurrence> {
        let mut occurrence = self.occurrences.require(occurrence_id)?;
        if occurrence.status != OccurrenceStatus::Failed {
            return Err(SchedulerError::InvalidStateTransition {
                entity: "ScheduledOccurrence",
                id: occurrence_id.to_string(),
                from: occurrence.status.to_string(),
                to: OccurrenceStatus::Ready.to_string(),
            });
        }

        let schedule = self.schedules.require(&occurrence.schedule_id)?;
        if schedule.status != ScheduleStatus::Active {
            return Err(SchedulerError::InvalidStateTransition {
                entity: "ScheduledDelivery",
                id: schedule.schedule_id.clone(),
                from: schedule.status.to_string(),
                to: "RETRY".to_string(),
            });
        }

        occurrence.status = OccurrenceStatus::Ready;
        occurrence.attempt_count = 0;
        occurrence.last_error = None;
        occurrence.coordination_deadline = None;
        self.occurrences.update(&occurrence, now)?;

        info!(occurrence_id, "failed occurrence reopened for retry");
        Ok(occurrence)
    }

    fn bump_execution_counters(
        &self,
        schedule_id: &str,
        now: NaiveDateTime,
    ) -> SchedulerResult<()> {
        // Optimistic-lock retry: a concurrent pause/update only costs us
        // a re-read, never a lost counter.
        for _ in 0..3 {
            let mut schedule = self.schedules.require(schedule_id)?;
            schedule.total_executions += 1;
            schedule.last_executed_at = Some(now);
            match self.schedules.update(&schedule, now) {
                Ok(()) => return Ok(()),
                Err(RepositoryError::OptimisticLockFailure { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(SchedulerError::Repository(
            RepositoryError::DatabaseTransactionError(format!(
                "could not bump execution counters for {schedule_id} after 3 attempts"
            )),
        ))
    }

    fn check_occurrence_transition(
        &self,
        occurrence: &ScheduledOccurrence,
        target: OccurrenceStatus,
    ) -> SchedulerResult<()> {
        if !occurrence.status.can_transition_to(target) {
            return Err(SchedulerError::InvalidStateTransition {
                entity: "ScheduledOccurrence",
                id: occurrence.occurrence_id.clone(),
                from: occurrence.status.to_string(),
                to: target.to_string(),
            });
        }
        Ok(())
    }

    // ==========================================
    // Completion / horizon
    // ==========================================

    /// Flip an ACTIVE schedule to COMPLETED once the recurrence can
    /// produce nothing new and no occurrence is still in flight.
    /// Called after every occurrence terminal transition.
    pub fn advance_completion(
        &self,
        schedule_id: &str,
        now: NaiveDateTime,
    ) -> SchedulerResult<bool> {
        let mut schedule = self.schedules.require(schedule_id)?;
        if schedule.status != ScheduleStatus::Active {
            return Ok(false);
        }

        let planned = self
            .recurrence
            .planned_total(&schedule.recurrence, schedule.start_at)?;
        let generated = self.occurrences.count_by_schedule(schedule_id)? as usize;
        if generated < planned {
            return Ok(false);
        }
        if self.occurrences.count_open(schedule_id)? > 0 {
            return Ok(false);
        }

        schedule.status = ScheduleStatus::Completed;
        self.schedules.update(&schedule, now)?;
        info!(schedule_id, planned, "schedule completed");
        Ok(true)
    }

    /// Generate the missing PENDING occurrences inside the rolling
    /// horizon window. Deduplicated by (schedule_id, scheduled_for), so
    /// re-running is harmless.
    pub fn extend_horizon(&self, schedule_id: &str, now: NaiveDateTime) -> SchedulerResult<usize> {
        let schedule = self.schedules.require(schedule_id)?;
        if schedule.status != ScheduleStatus::Active {
            return Ok(0);
        }

        let horizon = horizon_end(now, self.settings.horizon_days);
        let dates = self
            .recurrence
            .expand(&schedule.recurrence, schedule.start_at, horizon)?;

        let inserted = self.seed_occurrences(schedule_id, &dates, now)?;
        if inserted > 0 {
            debug!(schedule_id, inserted, "horizon extended");
        }
        Ok(inserted)
    }

    /// Horizon pass over every ACTIVE schedule; returns total inserted.
    pub fn extend_all_horizons(&self, now: NaiveDateTime) -> SchedulerResult<usize> {
        let mut total = 0;
        for schedule in self.schedules.list_by_status(ScheduleStatus::Active)? {
            total += self.extend_horizon(&schedule.schedule_id, now)?;
        }
        Ok(total)
    }
}

fn horizon_end(now: NaiveDateTime, horizon_days: i64) -> NaiveDateTime {
    now.checked_add_days(Days::new(horizon_days.max(0) as u64))
        .unwrap_or(now)
}
