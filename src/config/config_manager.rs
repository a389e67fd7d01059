// ==========================================
// Scheduled Deliveries - configuration manager
// ==========================================
// Storage: config_kv table (key-value). Every knob has a default so an
// empty table is a fully working deployment.
// ==========================================

use crate::db::open_sqlite_connection;
use rusqlite::{params, Connection};
use std::error::Error;
use std::sync::{Arc, Mutex};

/// Configuration keys
pub mod config_keys {
    /// Rolling occurrence-generation window, days
    pub const HORIZON_DAYS: &str = "scheduler.horizon_days";
    /// Hard cap on occurrences expanded from one rule
    pub const HARD_CEILING: &str = "scheduler.hard_ceiling";
    /// Confirmation window of the J-1 handshake, hours
    pub const COORDINATION_TIMEOUT_HOURS: &str = "coordination.timeout_hours";
    /// Offer/counter-offer round ceiling
    pub const NEGOTIATION_MAX_ROUNDS: &str = "negotiation.max_rounds";
    /// Execution attempt ceiling before an occurrence fails permanently
    pub const EXECUTION_MAX_ATTEMPTS: &str = "execution.max_attempts";
    /// Max occurrences handled per dispatcher tick
    pub const DISPATCH_BATCH_SIZE: &str = "dispatch.batch_size";
}

// ==========================================
// SchedulerSettings - resolved snapshot
// ==========================================
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SchedulerSettings {
    pub horizon_days: i64,
    pub hard_ceiling: u32,
    pub coordination_timeout_hours: i64,
    pub negotiation_max_rounds: i32,
    pub execution_max_attempts: i32,
    pub dispatch_batch_size: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            horizon_days: 60,
            hard_ceiling: 365,
            coordination_timeout_hours: 12,
            negotiation_max_rounds: 5,
            execution_max_attempts: 3,
            dispatch_batch_size: 100,
        }
    }
}

// ==========================================
// ConfigManager
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    pub fn new(db_path: &str) -> Result<Self, Box<dyn Error>> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Build from an existing shared connection. The unified PRAGMAs are
    /// re-applied (idempotent) so behavior matches fresh opens.
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Result<Self, Box<dyn Error>> {
        {
            let conn_guard = conn
                .lock()
                .map_err(|e| format!("lock acquisition failed: {e}"))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }
        Ok(Self { conn })
    }

    fn get_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| format!("lock acquisition failed: {e}"))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    pub fn set_config_value(&self, key: &str, value: &str) -> Result<(), Box<dyn Error>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| format!("lock acquisition failed: {e}"))?;

        conn.execute(
            r#"INSERT INTO config_kv (key, value, updated_at)
               VALUES (?1, ?2, datetime('now'))
               ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = datetime('now')"#,
            params![key, value],
        )?;
        Ok(())
    }

    fn get_i64_or(&self, key: &str, default: i64) -> Result<i64, Box<dyn Error>> {
        match self.get_config_value(key)? {
            Some(raw) => {
                let parsed = raw
                    .trim()
                    .parse::<i64>()
                    .map_err(|e| format!("config {key} holds non-numeric value {raw:?}: {e}"))?;
                Ok(parsed)
            }
            None => Ok(default),
        }
    }

    /// Resolve the full settings snapshot. Values at or below zero fall
    /// back to the defaults rather than poisoning the schedulers.
    pub fn load_settings(&self) -> Result<SchedulerSettings, Box<dyn Error>> {
        let defaults = SchedulerSettings::default();

        let positive = |v: i64, d: i64| if v > 0 { v } else { d };

        let horizon_days = positive(
            self.get_i64_or(config_keys::HORIZON_DAYS, defaults.horizon_days)?,
            defaults.horizon_days,
        );
        let hard_ceiling = positive(
            self.get_i64_or(config_keys::HARD_CEILING, defaults.hard_ceiling as i64)?,
            defaults.hard_ceiling as i64,
        ) as u32;
        let coordination_timeout_hours = positive(
            self.get_i64_or(
                config_keys::COORDINATION_TIMEOUT_HOURS,
                defaults.coordination_timeout_hours,
            )?,
            defaults.coordination_timeout_hours,
        );
        let negotiation_max_rounds = positive(
            self.get_i64_or(
                config_keys::NEGOTIATION_MAX_ROUNDS,
                defaults.negotiation_max_rounds as i64,
            )?,
            defaults.negotiation_max_rounds as i64,
        ) as i32;
        let execution_max_attempts = positive(
            self.get_i64_or(
                config_keys::EXECUTION_MAX_ATTEMPTS,
                defaults.execution_max_attempts as i64,
            )?,
            defaults.execution_max_attempts as i64,
        ) as i32;
        let dispatch_batch_size = positive(
            self.get_i64_or(
                config_keys::DISPATCH_BATCH_SIZE,
                defaults.dispatch_batch_size as i64,
            )?,
            defaults.dispatch_batch_size as i64,
        ) as usize;

        Ok(SchedulerSettings {
            horizon_days,
            hard_ceiling,
            coordination_timeout_hours,
            negotiation_max_rounds,
            execution_max_attempts,
            dispatch_batch_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;

    fn manager() -> ConfigManager {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        ConfigManager::from_connection(Arc::new(Mutex::new(conn))).unwrap()
    }

    #[test]
    fn test_defaults_on_empty_table() {
        let mgr = manager();
        let settings = mgr.load_settings().unwrap();
        assert_eq!(settings, SchedulerSettings::default());
    }

    #[test]
    fn test_override_and_reload() {
        let mgr = manager();
        mgr.set_config_value(config_keys::NEGOTIATION_MAX_ROUNDS, "8").unwrap();
        mgr.set_config_value(config_keys::HORIZON_DAYS, "30").unwrap();

        let settings = mgr.load_settings().unwrap();
        assert_eq!(settings.negotiation_max_rounds, 8);
        assert_eq!(settings.horizon_days, 30);
        // untouched keys keep their defaults
        assert_eq!(settings.execution_max_attempts, 3);
    }

    #[test]
    fn test_non_positive_value_falls_back() {
        let mgr = manager();
        mgr.set_config_value(config_keys::HARD_CEILING, "0").unwrap();
        let settings = mgr.load_settings().unwrap();
        assert_eq!(settings.hard_ceiling, 365);
    }
}
