// ==========================================
// Schedule Dispatcher
// ==========================================
// Entry point for the external time trigger (cron-like). One tick:
// extend horizons, open due handshakes, sweep expired ones, execute
// due occurrences. Every step is idempotent, so overlapping or
// repeated ticks are safe.
// ==========================================

use crate::engine::coordination::CoordinationProtocol;
use crate::engine::execution::ExecutionTrigger;
use crate::engine::lifecycle::LifecycleManager;
use crate::engine::SchedulerResult;
use chrono::NaiveDateTime;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub occurrences_seeded: usize,
    pub coordinations_opened: usize,
    pub coordinations_timed_out: usize,
    pub executions_attempted: usize,
}

pub struct ScheduleDispatcher {
    lifecycle: Arc<LifecycleManager>,
    coordination: Arc<CoordinationProtocol>,
    execution: Arc<ExecutionTrigger>,
}

impl ScheduleDispatcher {
    pub fn new(
        lifecycle: Arc<LifecycleManager>,
        coordination: Arc<CoordinationProtocol>,
        execution: Arc<ExecutionTrigger>,
    ) -> Self {
        Self {
            lifecycle,
            coordination,
            execution,
        }
    }

    pub async fn run_tick(&self, now: NaiveDateTime) -> SchedulerResult<TickReport> {
        let occurrences_seeded = self.lifecycle.extend_all_horizons(now)?;
        let coordinations_opened = self.coordination.dispatch_due(now).await?;
        let coordinations_timed_out = self.coordination.expire_timed_out(now).await?;
        let executions_attempted = self.execution.dispatch_due(now).await?;

        let report = TickReport {
            occurrences_seeded,
            coordinations_opened,
            coordinations_timed_out,
            executions_attempted,
        };
        info!(
            seeded = report.occurrences_seeded,
            opened = report.coordinations_opened,
            timed_out = report.coordinations_timed_out,
            executed = report.executions_attempted,
            "dispatcher tick done"
        );
        Ok(report)
    }
}
