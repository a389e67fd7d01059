// ==========================================
// Scheduled Deliveries - SQLite infrastructure
// ==========================================
// Goals:
// - One place for Connection::open PRAGMA behavior, so every module
//   runs with foreign keys enabled and the same busy_timeout
// - Schema creation for the five tables the crate owns
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// Default busy_timeout (milliseconds)
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Schema version the code expects.
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// Apply the unified PRAGMAs to a connection.
///
/// foreign_keys and busy_timeout are per-connection settings and must be
/// re-applied on every open.
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// Open a SQLite connection with the unified configuration applied.
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// Read schema_version (None when the table does not exist yet).
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// Create all tables and indexes owned by this crate. Idempotent.
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS config_kv (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS scheduled_delivery (
            schedule_id TEXT PRIMARY KEY,
            client_id TEXT NOT NULL,
            counterparty_id TEXT NOT NULL,
            pickup_address TEXT NOT NULL,
            pickup_contact_name TEXT,
            pickup_contact_phone TEXT,
            pickup_instructions TEXT,
            delivery_address TEXT NOT NULL,
            delivery_contact_name TEXT,
            delivery_contact_phone TEXT,
            delivery_instructions TEXT,
            package_size TEXT NOT NULL,
            package_weight_kg REAL,
            package_fragile INTEGER NOT NULL DEFAULT 0,
            cargo_category TEXT,
            proposed_price INTEGER NOT NULL,
            recurrence_kind TEXT NOT NULL,
            recurrence_interval INTEGER NOT NULL DEFAULT 1,
            recurrence_days_of_week TEXT,
            recurrence_end_date TEXT,
            recurrence_max_occurrences INTEGER,
            start_at TEXT NOT NULL,
            notification_advance_hours INTEGER NOT NULL DEFAULT 24,
            auto_create_delivery INTEGER NOT NULL DEFAULT 1,
            status TEXT NOT NULL,
            total_executions INTEGER NOT NULL DEFAULT 0,
            last_executed_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            revision INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_schedule_client
            ON scheduled_delivery(client_id);
        CREATE INDEX IF NOT EXISTS idx_schedule_status
            ON scheduled_delivery(status);

        CREATE TABLE IF NOT EXISTS scheduled_occurrence (
            occurrence_id TEXT PRIMARY KEY,
            schedule_id TEXT NOT NULL
                REFERENCES scheduled_delivery(schedule_id) ON DELETE CASCADE,
            scheduled_for TEXT NOT NULL,
            status TEXT NOT NULL,
            coordination_deadline TEXT,
            client_confirmed INTEGER NOT NULL DEFAULT 0,
            counterparty_confirmed INTEGER NOT NULL DEFAULT 0,
            coordination_outcome TEXT,
            final_price INTEGER,
            delivery_reference TEXT,
            attempt_count INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(schedule_id, scheduled_for)
        );

        CREATE INDEX IF NOT EXISTS idx_occurrence_status_due
            ON scheduled_occurrence(status, scheduled_for);

        CREATE TABLE IF NOT EXISTS negotiation_session (
            session_id TEXT PRIMARY KEY,
            occurrence_id TEXT NOT NULL
                REFERENCES scheduled_occurrence(occurrence_id) ON DELETE CASCADE,
            base_price INTEGER NOT NULL,
            current_offer INTEGER NOT NULL,
            current_offerer TEXT NOT NULL,
            status TEXT NOT NULL,
            round_count INTEGER NOT NULL DEFAULT 0,
            max_rounds INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_one_open_session_per_occurrence
            ON negotiation_session(occurrence_id) WHERE status = 'OPEN';

        CREATE TABLE IF NOT EXISTS negotiation_entry (
            entry_id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL
                REFERENCES negotiation_session(session_id) ON DELETE CASCADE,
            actor TEXT NOT NULL,
            action TEXT NOT NULL,
            price INTEGER,
            message TEXT,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_entry_session
            ON negotiation_entry(session_id, entry_id);

        INSERT OR IGNORE INTO schema_version (version) VALUES (1);
        "#,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), Some(CURRENT_SCHEMA_VERSION));
    }
}
