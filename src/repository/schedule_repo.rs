// ==========================================
// ScheduleRepository - scheduled_delivery table
// ==========================================
// Aggregate-root persistence. Updates go through an optimistic lock
// (revision column): two workers racing on the same schedule cannot
// both win.
// ==========================================

use crate::domain::schedule::{Address, PackageSpec, RecurrenceRule, ScheduledDelivery};
use crate::domain::types::{PackageSize, RecurrenceKind, ScheduleStatus};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::{fmt_date, fmt_dt, parse_date, text_conversion_err, DATETIME_FMT};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex, MutexGuard};

const SELECT_COLUMNS: &str = r#"schedule_id, client_id, counterparty_id,
       pickup_address, pickup_contact_name, pickup_contact_phone, pickup_instructions,
       delivery_address, delivery_contact_name, delivery_contact_phone, delivery_instructions,
       package_size, package_weight_kg, package_fragile, cargo_category,
       proposed_price,
       recurrence_kind, recurrence_interval, recurrence_days_of_week,
       recurrence_end_date, recurrence_max_occurrences,
       start_at, notification_advance_hours, auto_create_delivery,
       status, total_executions, last_executed_at,
       created_at, updated_at, revision"#;

pub struct ScheduleRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ScheduleRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn insert(&self, schedule: &ScheduledDelivery) -> RepositoryResult<String> {
        let conn = self.get_conn()?;

        conn.execute(
            r#"INSERT INTO scheduled_delivery (
                schedule_id, client_id, counterparty_id,
                pickup_address, pickup_contact_name, pickup_contact_phone, pickup_instructions,
                delivery_address, delivery_contact_name, delivery_contact_phone, delivery_instructions,
                package_size, package_weight_kg, package_fragile, cargo_category,
                proposed_price,
                recurrence_kind, recurrence_interval, recurrence_days_of_week,
                recurrence_end_date, recurrence_max_occurrences,
                start_at, notification_advance_hours, auto_create_delivery,
                status, total_executions, last_executed_at,
                created_at, updated_at, revision
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                &schedule.schedule_id,
                &schedule.client_id,
                &schedule.counterparty_id,
                &schedule.pickup.address,
                &schedule.pickup.contact_name,
                &schedule.pickup.contact_phone,
                &schedule.pickup.instructions,
                &schedule.delivery.address,
                &schedule.delivery.contact_name,
                &schedule.delivery.contact_phone,
                &schedule.delivery.instructions,
                schedule.package.size.to_db_str(),
                &schedule.package.weight_kg,
                schedule.package.fragile,
                &schedule.package.category,
                &schedule.proposed_price,
                schedule.recurrence.kind.to_db_str(),
                &schedule.recurrence.interval,
                days_of_week_json(&schedule.recurrence)?,
                schedule.recurrence.end_date.map(|d| fmt_date(&d)),
                &schedule.recurrence.max_occurrences,
                fmt_dt(&schedule.start_at),
                &schedule.notification_advance_hours,
                schedule.auto_create_delivery,
                schedule.status.to_db_str(),
                &schedule.total_executions,
                schedule.last_executed_at.map(|d| fmt_dt(&d)),
                fmt_dt(&schedule.created_at),
                fmt_dt(&schedule.updated_at),
                &schedule.revision,
            ],
        )?;

        Ok(schedule.schedule_id.clone())
    }

    pub fn find_by_id(&self, schedule_id: &str) -> RepositoryResult<Option<ScheduledDelivery>> {
        let conn = self.get_conn()?;

        match conn.query_row(
            &format!("SELECT {SELECT_COLUMNS} FROM scheduled_delivery WHERE schedule_id = ?"),
            params![schedule_id],
            map_row,
        ) {
            Ok(schedule) => Ok(Some(schedule)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Like find_by_id but errors when the row is missing.
    pub fn require(&self, schedule_id: &str) -> RepositoryResult<ScheduledDelivery> {
        self.find_by_id(schedule_id)?
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "ScheduledDelivery".to_string(),
                id: schedule_id.to_string(),
            })
    }

    pub fn list_by_client(
        &self,
        client_id: &str,
        status: Option<ScheduleStatus>,
    ) -> RepositoryResult<Vec<ScheduledDelivery>> {
        let conn = self.get_conn()?;

        let mut sql = format!(
            "SELECT {SELECT_COLUMNS} FROM scheduled_delivery WHERE client_id = ?"
        );
        if status.is_some() {
            sql.push_str(" AND status = ?");
        }
        sql.push_str(" ORDER BY created_at DESC, schedule_id");

        let mut stmt = conn.prepare(&sql)?;
        let schedules = match status {
            Some(s) => stmt
                .query_map(params![client_id, s.to_db_str()], map_row)?
                .collect::<Result<Vec<_>, _>>()?,
            None => stmt
                .query_map(params![client_id], map_row)?
                .collect::<Result<Vec<_>, _>>()?,
        };

        Ok(schedules)
    }

    pub fn list_by_status(&self, status: ScheduleStatus) -> RepositoryResult<Vec<ScheduledDelivery>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM scheduled_delivery WHERE status = ? ORDER BY schedule_id"
        ))?;
        let schedules = stmt
            .query_map(params![status.to_db_str()], map_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(schedules)
    }

    pub fn list_all(&self) -> RepositoryResult<Vec<ScheduledDelivery>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM scheduled_delivery ORDER BY created_at DESC, schedule_id"
        ))?;
        let schedules = stmt
            .query_map([], map_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(schedules)
    }

    /// Update mutable fields, status and execution counters.
    ///
    /// # Concurrency
    /// Optimistic lock on the revision column. The stored revision is
    /// bumped; the caller's in-memory copy is stale after a successful
    /// update and must be re-read.
    ///
    /// # Errors
    /// - `OptimisticLockFailure` when another writer got there first
    /// - `NotFound` when the schedule does not exist
    pub fn update(&self, schedule: &ScheduledDelivery, now: NaiveDateTime) -> RepositoryResult<()> {
        let conn = self.get_conn()?;

        let rows_affected = conn.execute(
            r#"UPDATE scheduled_delivery
               SET pickup_address = ?, pickup_contact_name = ?, pickup_contact_phone = ?,
                   pickup_instructions = ?,
                   delivery_address = ?, delivery_contact_name = ?, delivery_contact_phone = ?,
                   delivery_instructions = ?,
                   package_size = ?, package_weight_kg = ?, package_fragile = ?, cargo_category = ?,
                   proposed_price = ?, notification_advance_hours = ?, auto_create_delivery = ?,
                   status = ?, total_executions = ?, last_executed_at = ?,
                   updated_at = ?, revision = revision + 1
               WHERE schedule_id = ? AND revision = ?"#,
            params![
                &schedule.pickup.address,
                &schedule.pickup.contact_name,
                &schedule.pickup.contact_phone,
                &schedule.pickup.instructions,
                &schedule.delivery.address,
                &schedule.delivery.contact_name,
                &schedule.delivery.contact_phone,
                &schedule.delivery.instructions,
                schedule.package.size.to_db_str(),
                &schedule.package.weight_kg,
                schedule.package.fragile,
                &schedule.package.category,
                &schedule.proposed_price,
                &schedule.notification_advance_hours,
                schedule.auto_create_delivery,
                schedule.status.to_db_str(),
                &schedule.total_executions,
                schedule.last_executed_at.map(|d| fmt_dt(&d)),
                fmt_dt(&now),
                &schedule.schedule_id,
                &schedule.revision,
            ],
        )?;

        if rows_affected == 0 {
            // Missing row or stale revision?
            let exists: Result<i32, _> = conn.query_row(
                "SELECT revision FROM scheduled_delivery WHERE schedule_id = ?",
                params![&schedule.schedule_id],
                |row| row.get(0),
            );

            return match exists {
                Ok(actual_revision) => Err(RepositoryError::OptimisticLockFailure {
                    schedule_id: schedule.schedule_id.clone(),
                    expected: schedule.revision,
                    actual: actual_revision,
                }),
                Err(rusqlite::Error::QueryReturnedNoRows) => Err(RepositoryError::NotFound {
                    entity: "ScheduledDelivery".to_string(),
                    id: schedule.schedule_id.clone(),
                }),
                Err(e) => Err(e.into()),
            };
        }

        Ok(())
    }

    /// Delete a schedule; occurrences and sessions go with it (FK cascade).
    pub fn delete(&self, schedule_id: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;

        let rows_affected = conn.execute(
            "DELETE FROM scheduled_delivery WHERE schedule_id = ?",
            params![schedule_id],
        )?;

        if rows_affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "ScheduledDelivery".to_string(),
                id: schedule_id.to_string(),
            });
        }

        Ok(())
    }
}

fn days_of_week_json(rule: &RecurrenceRule) -> RepositoryResult<Option<String>> {
    if rule.days_of_week.is_empty() {
        return Ok(None);
    }
    serde_json::to_string(&rule.days_of_week)
        .map(Some)
        .map_err(|e| RepositoryError::InternalError(format!("days_of_week serialization: {e}")))
}

fn map_row(row: &rusqlite::Row) -> rusqlite::Result<ScheduledDelivery> {
    let package_size_str: String = row.get(11)?;
    let recurrence_kind_str: String = row.get(16)?;
    let days_json: Option<String> = row.get(18)?;
    let status_str: String = row.get(24)?;

    Ok(ScheduledDelivery {
        schedule_id: row.get(0)?,
        client_id: row.get(1)?,
        counterparty_id: row.get(2)?,
        pickup: Address {
            address: row.get(3)?,
            contact_name: row.get(4)?,
            contact_phone: row.get(5)?,
            instructions: row.get(6)?,
        },
        delivery: Address {
            address: row.get(7)?,
            contact_name: row.get(8)?,
            contact_phone: row.get(9)?,
            instructions: row.get(10)?,
        },
        package: PackageSpec {
            size: PackageSize::from_db_str(&package_size_str)
                .ok_or_else(|| text_conversion_err(11, &package_size_str))?,
            weight_kg: row.get(12)?,
            fragile: row.get(13)?,
            category: row.get(14)?,
        },
        proposed_price: row.get(15)?,
        recurrence: RecurrenceRule {
            kind: RecurrenceKind::from_db_str(&recurrence_kind_str)
                .ok_or_else(|| text_conversion_err(16, &recurrence_kind_str))?,
            interval: row.get(17)?,
            days_of_week: match days_json {
                Some(ref s) => serde_json::from_str(s)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(
                        18,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    ))?,
                None => Vec::new(),
            },
            end_date: row
                .get::<_, Option<String>>(19)?
                .map(|s| parse_date_rusqlite(19, &s))
                .transpose()?,
            max_occurrences: row.get(20)?,
        },
        start_at: parse_dt_rusqlite(21, &row.get::<_, String>(21)?)?,
        notification_advance_hours: row.get(22)?,
        auto_create_delivery: row.get(23)?,
        status: ScheduleStatus::from_db_str(&status_str)
            .ok_or_else(|| text_conversion_err(24, &status_str))?,
        total_executions: row.get(25)?,
        last_executed_at: row
            .get::<_, Option<String>>(26)?
            .map(|s| parse_dt_rusqlite(26, &s))
            .transpose()?,
        created_at: parse_dt_rusqlite(27, &row.get::<_, String>(27)?)?,
        updated_at: parse_dt_rusqlite(28, &row.get::<_, String>(28)?)?,
        revision: row.get(29)?,
    })
}

pub(crate) fn parse_dt_rusqlite(idx: usize, s: &str) -> rusqlite::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, DATETIME_FMT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_date_rusqlite(idx: usize, s: &str) -> rusqlite::Result<chrono::NaiveDate> {
    parse_date(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())),
        )
    })
}
