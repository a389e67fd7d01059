// ==========================================
// ScheduleApi - schedule CRUD + lifecycle surface
// ==========================================
// Thin layer over the lifecycle manager and execution trigger for the
// UI/transport layer. All writes go through the engines; this layer
// only translates errors.
// ==========================================

use crate::api::error::ApiResult;
use crate::domain::occurrence::ScheduledOccurrence;
use crate::domain::schedule::ScheduledDelivery;
use crate::domain::types::ScheduleStatus;
use crate::engine::execution::ExecutionTrigger;
use crate::engine::lifecycle::{CreateScheduleInput, LifecycleManager, UpdateScheduleInput};
use crate::repository::{OccurrenceRepository, ScheduleRepository};
use chrono::NaiveDateTime;
use std::sync::Arc;

pub struct ScheduleApi {
    schedules: Arc<ScheduleRepository>,
    occurrences: Arc<OccurrenceRepository>,
    lifecycle: Arc<LifecycleManager>,
    execution: Arc<ExecutionTrigger>,
}

impl ScheduleApi {
    pub fn new(
        schedules: Arc<ScheduleRepository>,
        occurrences: Arc<OccurrenceRepository>,
        lifecycle: Arc<LifecycleManager>,
        execution: Arc<ExecutionTrigger>,
    ) -> Self {
        Self {
            schedules,
            occurrences,
            lifecycle,
            execution,
        }
    }

    // ===== CRUD =====

    pub fn create_schedule(
        &self,
        input: CreateScheduleInput,
        now: NaiveDateTime,
    ) -> ApiResult<ScheduledDelivery> {
        Ok(self.lifecycle.create(input, now)?)
    }

    pub fn get_schedule(&self, schedule_id: &str) -> ApiResult<ScheduledDelivery> {
        Ok(self.schedules.require(schedule_id)?)
    }

    pub fn list_schedules(
        &self,
        client_id: &str,
        status: Option<ScheduleStatus>,
    ) -> ApiResult<Vec<ScheduledDelivery>> {
        Ok(self.schedules.list_by_client(client_id, status)?)
    }

    pub fn update_schedule(
        &self,
        schedule_id: &str,
        input: UpdateScheduleInput,
        now: NaiveDateTime,
    ) -> ApiResult<ScheduledDelivery> {
        Ok(self.lifecycle.update_details(schedule_id, input, now)?)
    }

    /// Only terminal (cancelled/completed) schedules can be deleted;
    /// occurrences and negotiation sessions cascade.
    pub fn delete_schedule(&self, schedule_id: &str) -> ApiResult<()> {
        Ok(self.lifecycle.delete(schedule_id)?)
    }

    // ===== lifecycle =====

    pub fn pause_schedule(
        &self,
        schedule_id: &str,
        now: NaiveDateTime,
    ) -> ApiResult<ScheduledDelivery> {
        Ok(self.lifecycle.pause(schedule_id, now)?)
    }

    pub fn resume_schedule(
        &self,
        schedule_id: &str,
        now: NaiveDateTime,
    ) -> ApiResult<ScheduledDelivery> {
        Ok(self.lifecycle.resume(schedule_id, now)?)
    }

    pub fn cancel_schedule(
        &self,
        schedule_id: &str,
        now: NaiveDateTime,
    ) -> ApiResult<ScheduledDelivery> {
        Ok(self.lifecycle.cancel(schedule_id, now)?)
    }

    /// Reopen a FAILED occurrence as READY with a fresh attempt budget.
    pub fn retry_occurrence(
        &self,
        occurrence_id: &str,
        now: NaiveDateTime,
    ) -> ApiResult<ScheduledOccurrence> {
        Ok(self.lifecycle.retry(occurrence_id, now)?)
    }

    /// Manually execute a READY occurrence without waiting for its
    /// scheduled time.
    pub async fn execute_now(
        &self,
        occurrence_id: &str,
        now: NaiveDateTime,
    ) -> ApiResult<ScheduledOccurrence> {
        Ok(self.execution.execute_now(occurrence_id, now).await?)
    }

    // ===== reads =====

    pub fn list_occurrences(&self, schedule_id: &str) -> ApiResult<Vec<ScheduledOccurrence>> {
        self.schedules.require(schedule_id)?;
        Ok(self.occurrences.list_by_schedule(schedule_id)?)
    }

    pub fn get_occurrence(&self, occurrence_id: &str) -> ApiResult<ScheduledOccurrence> {
        Ok(self.occurrences.require(occurrence_id)?)
    }
}
