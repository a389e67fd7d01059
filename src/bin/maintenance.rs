// Small ops utility: run one maintenance sweep against a schedule
// database without standing up the full service.
//
// Usage:
//   cargo run --bin schedule-maintenance -- [db_path]
//
// One sweep = extend generation horizons for every ACTIVE schedule,
// then time out coordination handshakes whose deadline has passed.
// Safe to run repeatedly (every step is idempotent).

use chrono::Utc;
use scheduled_deliveries::config::{ConfigManager, SchedulerSettings};
use scheduled_deliveries::db::{init_schema, open_sqlite_connection};
use scheduled_deliveries::engine::collaborators::NoOpNotificationSender;
use scheduled_deliveries::engine::coordination::CoordinationProtocol;
use scheduled_deliveries::engine::lifecycle::LifecycleManager;
use scheduled_deliveries::repository::{
    NegotiationRepository, OccurrenceRepository, ScheduleRepository,
};
use std::sync::{Arc, Mutex};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    scheduled_deliveries::logging::init();

    let db_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "scheduled_deliveries.db".to_string());

    let conn = Arc::new(Mutex::new(open_sqlite_connection(&db_path)?));
    {
        let guard = conn
            .lock()
            .map_err(|e| format!("lock acquisition failed: {e}"))?;
        init_schema(&guard)?;
    }

    let settings = match ConfigManager::from_connection(conn.clone()) {
        Ok(config) => config.load_settings()?,
        Err(e) => {
            eprintln!("config unavailable, using defaults: {e}");
            SchedulerSettings::default()
        }
    };

    let schedules = Arc::new(ScheduleRepository::new(conn.clone()));
    let occurrences = Arc::new(OccurrenceRepository::new(conn.clone()));
    let negotiations = Arc::new(NegotiationRepository::new(conn.clone()));

    let lifecycle = Arc::new(LifecycleManager::new(
        schedules.clone(),
        occurrences.clone(),
        settings.clone(),
    ));
    let coordination = CoordinationProtocol::new(
        schedules,
        occurrences,
        negotiations,
        lifecycle.clone(),
        Arc::new(NoOpNotificationSender),
        settings,
    );

    let now = Utc::now().naive_utc();
    let seeded = lifecycle.extend_all_horizons(now)?;
    let timed_out = coordination.expire_timed_out(now).await?;

    println!("seeded={seeded} timed_out={timed_out}");
    Ok(())
}
