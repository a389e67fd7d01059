// ==========================================
// DashboardApi - read models for the manager surface
// ==========================================
// Occurrence counts by status, execution success rate, and calendar
// events over a date range. Read-only.
// ==========================================

use crate::api::error::ApiResult;
use crate::domain::types::OccurrenceStatus;
use crate::repository::{OccurrenceRepository, ScheduleRepository};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

// ==========================================
// Read models
// ==========================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleStats {
    /// None for the fleet-wide summary.
    pub schedule_id: Option<String>,
    pub counts_by_status: HashMap<OccurrenceStatus, i64>,
    pub total_occurrences: i64,
    pub executed: i64,
    pub failed: i64,
    /// executed / (executed + failed); 0.0 when nothing terminal yet.
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub occurrence_id: String,
    pub schedule_id: String,
    pub client_id: String,
    pub scheduled_for: NaiveDateTime,
    pub status: OccurrenceStatus,
    pub pickup_address: String,
    pub delivery_address: String,
    /// Negotiated final price when one exists, template price otherwise.
    pub price: i64,
}

// ==========================================
// DashboardApi
// ==========================================

pub struct DashboardApi {
    schedules: Arc<ScheduleRepository>,
    occurrences: Arc<OccurrenceRepository>,
}

impl DashboardApi {
    pub fn new(schedules: Arc<ScheduleRepository>, occurrences: Arc<OccurrenceRepository>) -> Self {
        Self {
            schedules,
            occurrences,
        }
    }

    pub fn schedule_stats(&self, schedule_id: &str) -> ApiResult<ScheduleStats> {
        self.schedules.require(schedule_id)?;
        let counts = self.occurrences.status_counts(Some(schedule_id))?;
        Ok(build_stats(Some(schedule_id.to_string()), counts))
    }

    pub fn overall_stats(&self) -> ApiResult<ScheduleStats> {
        let counts = self.occurrences.status_counts(None)?;
        Ok(build_stats(None, counts))
    }

    /// Occurrences in [from, to), joined with their schedule's
    /// addresses and effective price.
    pub fn calendar_events(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> ApiResult<Vec<CalendarEvent>> {
        let occurrences = self.occurrences.list_between(from, to)?;

        let mut schedules = HashMap::new();
        let mut events = Vec::with_capacity(occurrences.len());
        for occurrence in occurrences {
            if !schedules.contains_key(&occurrence.schedule_id) {
                let schedule = self.schedules.require(&occurrence.schedule_id)?;
                schedules.insert(occurrence.schedule_id.clone(), schedule);
            }
            let schedule = &schedules[&occurrence.schedule_id];

            events.push(CalendarEvent {
                occurrence_id: occurrence.occurrence_id.clone(),
                schedule_id: occurrence.schedule_id.clone(),
                client_id: schedule.client_id.clone(),
                scheduled_for: occurrence.scheduled_for,
                status: occurrence.status,
                pickup_address: schedule.pickup.address.clone(),
                delivery_address: schedule.delivery.address.clone(),
                price: occurrence.effective_price(schedule.proposed_price),
            });
        }

        Ok(events)
    }
}

fn build_stats(
    schedule_id: Option<String>,
    counts: HashMap<OccurrenceStatus, i64>,
) -> ScheduleStats {
    let total: i64 = counts.values().sum();
    let executed = *counts.get(&OccurrenceStatus::Executed).unwrap_or(&0);
    let failed = *counts.get(&OccurrenceStatus::Failed).unwrap_or(&0);
    let resolved = executed + failed;
    let success_rate = if resolved > 0 {
        executed as f64 / resolved as f64
    } else {
        0.0
    };

    ScheduleStats {
        schedule_id,
        counts_by_status: counts,
        total_occurrences: total,
        executed,
        failed,
        success_rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_rate() {
        let mut counts = HashMap::new();
        counts.insert(OccurrenceStatus::Executed, 3);
        counts.insert(OccurrenceStatus::Failed, 1);
        counts.insert(OccurrenceStatus::Pending, 6);

        let stats = build_stats(None, counts);
        assert_eq!(stats.total_occurrences, 10);
        assert!((stats.success_rate - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_success_rate_with_nothing_terminal() {
        let stats = build_stats(None, HashMap::new());
        assert_eq!(stats.success_rate, 0.0);
    }
}
