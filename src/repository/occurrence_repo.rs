// ==========================================
// OccurrenceRepository - scheduled_occurrence table
// ==========================================
// The occurrence table is the only shared mutable resource of the
// scheduling core. Status claims are conditional UPDATEs: exactly one
// of several racing workers observes rows_affected == 1.
// ==========================================

use crate::domain::occurrence::ScheduledOccurrence;
use crate::domain::types::{CoordinationOutcome, OccurrenceStatus};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::schedule_repo::parse_dt_rusqlite;
use crate::repository::{fmt_dt, text_conversion_err};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

const SELECT_COLUMNS: &str = r#"occurrence_id, schedule_id, scheduled_for, status,
       coordination_deadline, client_confirmed, counterparty_confirmed,
       coordination_outcome, final_price,
       delivery_reference, attempt_count, last_error,
       created_at, updated_at"#;

/// Statuses that still hold up schedule completion.
const OPEN_STATUSES: &str = "('PENDING','COORDINATING','NEGOTIATING','READY','EXECUTING')";

pub struct OccurrenceRepository {
    conn: Arc<Mutex<Connection>>,
}

impl OccurrenceRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn insert(&self, occurrence: &ScheduledOccurrence) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        Self::insert_with(&conn, occurrence, false)?;
        Ok(occurrence.occurrence_id.clone())
    }

    /// Insert a batch inside one transaction, ignoring rows whose
    /// (schedule_id, scheduled_for) already exists. Returns how many
    /// rows were actually inserted.
    pub fn insert_missing(&self, occurrences: &[ScheduledOccurrence]) -> RepositoryResult<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        let mut inserted = 0usize;
        for occurrence in occurrences {
            inserted += Self::insert_with(&tx, occurrence, true)?;
        }

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(inserted)
    }

    fn insert_with(
        conn: &Connection,
        occurrence: &ScheduledOccurrence,
        or_ignore: bool,
    ) -> RepositoryResult<usize> {
        let verb = if or_ignore { "INSERT OR IGNORE" } else { "INSERT" };
        let rows = conn.execute(
            &format!(
                r#"{verb} INTO scheduled_occurrence (
                    occurrence_id, schedule_id, scheduled_for, status,
                    coordination_deadline, client_confirmed, counterparty_confirmed,
                    coordination_outcome, final_price,
                    delivery_reference, attempt_count, last_error,
                    created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#
            ),
            params![
                &occurrence.occurrence_id,
                &occurrence.schedule_id,
                fmt_dt(&occurrence.scheduled_for),
                occurrence.status.to_db_str(),
                occurrence.coordination_deadline.map(|d| fmt_dt(&d)),
                occurrence.client_confirmed,
                occurrence.counterparty_confirmed,
                occurrence.coordination_outcome.as_ref().map(|o| o.to_db_str()),
                occurrence.final_price,
                &occurrence.delivery_reference,
                &occurrence.attempt_count,
                &occurrence.last_error,
                fmt_dt(&occurrence.created_at),
                fmt_dt(&occurrence.updated_at),
            ],
        )?;
        Ok(rows)
    }

    pub fn find_by_id(&self, occurrence_id: &str) -> RepositoryResult<Option<ScheduledOccurrence>> {
        let conn = self.get_conn()?;

        match conn.query_row(
            &format!("SELECT {SELECT_COLUMNS} FROM scheduled_occurrence WHERE occurrence_id = ?"),
            params![occurrence_id],
            map_row,
        ) {
            Ok(occurrence) => Ok(Some(occurrence)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn require(&self, occurrence_id: &str) -> RepositoryResult<ScheduledOccurrence> {
        self.find_by_id(occurrence_id)?
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "ScheduledOccurrence".to_string(),
                id: occurrence_id.to_string(),
            })
    }

    pub fn list_by_schedule(&self, schedule_id: &str) -> RepositoryResult<Vec<ScheduledOccurrence>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM scheduled_occurrence
             WHERE schedule_id = ? ORDER BY scheduled_for"
        ))?;
        let occurrences = stmt
            .query_map(params![schedule_id], map_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(occurrences)
    }

    pub fn list_between(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> RepositoryResult<Vec<ScheduledOccurrence>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM scheduled_occurrence
             WHERE scheduled_for >= ? AND scheduled_for < ?
             ORDER BY scheduled_for"
        ))?;
        let occurrences = stmt
            .query_map(params![fmt_dt(&from), fmt_dt(&to)], map_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(occurrences)
    }

    /// PENDING occurrences of ACTIVE schedules whose notification window
    /// has opened: scheduled_for - advance_hours <= now.
    pub fn find_due_for_coordination(
        &self,
        now: NaiveDateTime,
        limit: usize,
    ) -> RepositoryResult<Vec<ScheduledOccurrence>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM scheduled_occurrence o
             JOIN scheduled_delivery s ON s.schedule_id = o.schedule_id
             WHERE o.status = 'PENDING'
               AND s.status = 'ACTIVE'
               AND datetime(o.scheduled_for, '-' || s.notification_advance_hours || ' hours')
                   <= datetime(?)
             ORDER BY o.scheduled_for
             LIMIT ?",
            prefixed_columns("o")
        ))?;
        let occurrences = stmt
            .query_map(params![fmt_dt(&now), limit as i64], map_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(occurrences)
    }

    /// COORDINATING occurrences whose confirmation deadline has elapsed.
    ///
    /// A COORDINATING row without a deadline is treated as already
    /// elapsed; whatever wrote it never finished opening the handshake,
    /// and the sweep is the only path that can unstick it.
    pub fn find_coordination_expired(
        &self,
        now: NaiveDateTime,
        limit: usize,
    ) -> RepositoryResult<Vec<ScheduledOccurrence>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM scheduled_occurrence
             WHERE status = 'COORDINATING'
               AND (coordination_deadline IS NULL OR coordination_deadline < ?)
             ORDER BY coordination_deadline
             LIMIT ?"
        ))?;
        let occurrences = stmt
            .query_map(params![fmt_dt(&now), limit as i64], map_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(occurrences)
    }

    /// READY occurrences of ACTIVE auto-create schedules whose
    /// scheduled_for has arrived.
    pub fn find_due_for_execution(
        &self,
        now: NaiveDateTime,
        limit: usize,
    ) -> RepositoryResult<Vec<ScheduledOccurrence>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM scheduled_occurrence o
             JOIN scheduled_delivery s ON s.schedule_id = o.schedule_id
             WHERE o.status = 'READY'
               AND s.status = 'ACTIVE'
               AND s.auto_create_delivery = 1
               AND o.scheduled_for <= ?
             ORDER BY o.scheduled_for
             LIMIT ?",
            prefixed_columns("o")
        ))?;
        let occurrences = stmt
            .query_map(params![fmt_dt(&now), limit as i64], map_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(occurrences)
    }

    /// Atomically move an occurrence from `from` to `to`.
    ///
    /// Returns true when this caller won the claim. A false return is
    /// not an error: another worker got there first or the row left the
    /// expected state.
    pub fn claim(
        &self,
        occurrence_id: &str,
        from: OccurrenceStatus,
        to: OccurrenceStatus,
        now: NaiveDateTime,
    ) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;

        let rows_affected = conn.execute(
            "UPDATE scheduled_occurrence
             SET status = ?, updated_at = ?
             WHERE occurrence_id = ? AND status = ?",
            params![to.to_db_str(), fmt_dt(&now), occurrence_id, from.to_db_str()],
        )?;

        Ok(rows_affected == 1)
    }

    /// Atomically open the handshake on a PENDING occurrence: status,
    /// deadline and confirmation flags land in one statement, so an
    /// interrupted dispatch can never leave a COORDINATING row without
    /// a deadline.
    pub fn claim_for_coordination(
        &self,
        occurrence_id: &str,
        deadline: NaiveDateTime,
        now: NaiveDateTime,
    ) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;

        let rows_affected = conn.execute(
            "UPDATE scheduled_occurrence
             SET status = 'COORDINATING', coordination_deadline = ?,
                 client_confirmed = 0, counterparty_confirmed = 0,
                 updated_at = ?
             WHERE occurrence_id = ? AND status = 'PENDING'",
            params![fmt_dt(&deadline), fmt_dt(&now), occurrence_id],
        )?;

        Ok(rows_affected == 1)
    }

    /// Persist the mutable columns of an occurrence.
    pub fn update(&self, occurrence: &ScheduledOccurrence, now: NaiveDateTime) -> RepositoryResult<()> {
        let conn = self.get_conn()?;

        let rows_affected = conn.execute(
            r#"UPDATE scheduled_occurrence
               SET status = ?, coordination_deadline = ?,
                   client_confirmed = ?, counterparty_confirmed = ?,
                   coordination_outcome = ?, final_price = ?,
                   delivery_reference = ?, attempt_count = ?, last_error = ?,
                   updated_at = ?
               WHERE occurrence_id = ?"#,
            params![
                occurrence.status.to_db_str(),
                occurrence.coordination_deadline.map(|d| fmt_dt(&d)),
                occurrence.client_confirmed,
                occurrence.counterparty_confirmed,
                occurrence.coordination_outcome.as_ref().map(|o| o.to_db_str()),
                occurrence.final_price,
                &occurrence.delivery_reference,
                &occurrence.attempt_count,
                &occurrence.last_error,
                fmt_dt(&now),
                &occurrence.occurrence_id,
            ],
        )?;

        if rows_affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "ScheduledOccurrence".to_string(),
                id: occurrence.occurrence_id.clone(),
            });
        }

        Ok(())
    }

    /// Cancellation sweep: every non-terminal occurrence of the schedule
    /// becomes SKIPPED. EXECUTING rows are left for their in-flight
    /// worker, which re-checks parent status before committing.
    pub fn skip_open_for_schedule(
        &self,
        schedule_id: &str,
        now: NaiveDateTime,
    ) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;

        let rows_affected = conn.execute(
            "UPDATE scheduled_occurrence
             SET status = 'SKIPPED', updated_at = ?
             WHERE schedule_id = ?
               AND status IN ('PENDING','COORDINATING','NEGOTIATING','READY','FAILED')",
            params![fmt_dt(&now), schedule_id],
        )?;

        Ok(rows_affected)
    }

    pub fn count_by_schedule(&self, schedule_id: &str) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM scheduled_occurrence WHERE schedule_id = ?",
            params![schedule_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Occurrences still in flight (neither executed, skipped nor failed).
    pub fn count_open(&self, schedule_id: &str) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM scheduled_occurrence
                 WHERE schedule_id = ? AND status IN {OPEN_STATUSES}"
            ),
            params![schedule_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn status_counts(
        &self,
        schedule_id: Option<&str>,
    ) -> RepositoryResult<HashMap<OccurrenceStatus, i64>> {
        let conn = self.get_conn()?;

        let mut counts = HashMap::new();
        let mut collect = |stmt: &mut rusqlite::Statement,
                           params: &[&dyn rusqlite::ToSql]|
         -> RepositoryResult<()> {
            let rows = stmt.query_map(params, |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (status_str, count) = row?;
                if let Some(status) = OccurrenceStatus::from_db_str(&status_str) {
                    counts.insert(status, count);
                }
            }
            Ok(())
        };

        match schedule_id {
            Some(id) => {
                let mut stmt = conn.prepare(
                    "SELECT status, COUNT(*) FROM scheduled_occurrence
                     WHERE schedule_id = ? GROUP BY status",
                )?;
                collect(&mut stmt, &[&id])?;
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT status, COUNT(*) FROM scheduled_occurrence GROUP BY status",
                )?;
                collect(&mut stmt, &[])?;
            }
        }

        Ok(counts)
    }
}

fn prefixed_columns(alias: &str) -> String {
    SELECT_COLUMNS
        .split(',')
        .map(|c| format!("{alias}.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn map_row(row: &rusqlite::Row) -> rusqlite::Result<ScheduledOccurrence> {
    let status_str: String = row.get(3)?;
    let outcome_tag: Option<String> = row.get(7)?;
    let final_price: Option<i64> = row.get(8)?;

    Ok(ScheduledOccurrence {
        occurrence_id: row.get(0)?,
        schedule_id: row.get(1)?,
        scheduled_for: parse_dt_rusqlite(2, &row.get::<_, String>(2)?)?,
        status: OccurrenceStatus::from_db_str(&status_str)
            .ok_or_else(|| text_conversion_err(3, &status_str))?,
        coordination_deadline: row
            .get::<_, Option<String>>(4)?
            .map(|s| parse_dt_rusqlite(4, &s))
            .transpose()?,
        client_confirmed: row.get(5)?,
        counterparty_confirmed: row.get(6)?,
        coordination_outcome: outcome_tag
            .as_deref()
            .and_then(|tag| CoordinationOutcome::from_db_parts(tag, final_price)),
        final_price,
        delivery_reference: row.get(9)?,
        attempt_count: row.get(10)?,
        last_error: row.get(11)?,
        created_at: parse_dt_rusqlite(12, &row.get::<_, String>(12)?)?,
        updated_at: parse_dt_rusqlite(13, &row.get::<_, String>(13)?)?,
    })
}
