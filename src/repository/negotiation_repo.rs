// ==========================================
// NegotiationRepository - negotiation_session + negotiation_entry
// ==========================================
// Session rows carry the live state machine; entries are the
// append-only history behind the get-history read model. A partial
// unique index keeps at most one OPEN session per occurrence.
// ==========================================

use crate::domain::negotiation::{NegotiationEntry, NegotiationSession};
use crate::domain::types::{NegotiationAction, NegotiationStatus, Party};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::schedule_repo::parse_dt_rusqlite;
use crate::repository::{fmt_dt, text_conversion_err};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex, MutexGuard};

const SESSION_COLUMNS: &str = r#"session_id, occurrence_id, base_price, current_offer,
       current_offerer, status, round_count, max_rounds, created_at, updated_at"#;

pub struct NegotiationRepository {
    conn: Arc<Mutex<Connection>>,
}

impl NegotiationRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn insert_session(&self, session: &NegotiationSession) -> RepositoryResult<String> {
        let conn = self.get_conn()?;

        conn.execute(
            r#"INSERT INTO negotiation_session (
                session_id, occurrence_id, base_price, current_offer,
                current_offerer, status, round_count, max_rounds,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                &session.session_id,
                &session.occurrence_id,
                &session.base_price,
                &session.current_offer,
                session.current_offerer.to_db_str(),
                session.status.to_db_str(),
                &session.round_count,
                &session.max_rounds,
                fmt_dt(&session.created_at),
                fmt_dt(&session.updated_at),
            ],
        )?;

        Ok(session.session_id.clone())
    }

    pub fn find_by_id(&self, session_id: &str) -> RepositoryResult<Option<NegotiationSession>> {
        let conn = self.get_conn()?;

        match conn.query_row(
            &format!("SELECT {SESSION_COLUMNS} FROM negotiation_session WHERE session_id = ?"),
            params![session_id],
            map_session_row,
        ) {
            Ok(session) => Ok(Some(session)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn require(&self, session_id: &str) -> RepositoryResult<NegotiationSession> {
        self.find_by_id(session_id)?
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "NegotiationSession".to_string(),
                id: session_id.to_string(),
            })
    }

    /// The single OPEN session of an occurrence, if any.
    pub fn find_open_by_occurrence(
        &self,
        occurrence_id: &str,
    ) -> RepositoryResult<Option<NegotiationSession>> {
        let conn = self.get_conn()?;

        match conn.query_row(
            &format!(
                "SELECT {SESSION_COLUMNS} FROM negotiation_session
                 WHERE occurrence_id = ? AND status = 'OPEN'"
            ),
            params![occurrence_id],
            map_session_row,
        ) {
            Ok(session) => Ok(Some(session)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Most recent session of an occurrence regardless of status.
    pub fn find_latest_by_occurrence(
        &self,
        occurrence_id: &str,
    ) -> RepositoryResult<Option<NegotiationSession>> {
        let conn = self.get_conn()?;

        match conn.query_row(
            &format!(
                "SELECT {SESSION_COLUMNS} FROM negotiation_session
                 WHERE occurrence_id = ?
                 ORDER BY created_at DESC, session_id DESC
                 LIMIT 1"
            ),
            params![occurrence_id],
            map_session_row,
        ) {
            Ok(session) => Ok(Some(session)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn update_session(
        &self,
        session: &NegotiationSession,
        now: NaiveDateTime,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;

        let rows_affected = conn.execute(
            r#"UPDATE negotiation_session
               SET current_offer = ?, current_offerer = ?, status = ?,
                   round_count = ?, updated_at = ?
               WHERE session_id = ?"#,
            params![
                &session.current_offer,
                session.current_offerer.to_db_str(),
                session.status.to_db_str(),
                &session.round_count,
                fmt_dt(&now),
                &session.session_id,
            ],
        )?;

        if rows_affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "NegotiationSession".to_string(),
                id: session.session_id.clone(),
            });
        }

        Ok(())
    }

    pub fn append_entry(&self, entry: &NegotiationEntry) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;

        conn.execute(
            r#"INSERT INTO negotiation_entry (
                session_id, actor, action, price, message, created_at
            ) VALUES (?, ?, ?, ?, ?, ?)"#,
            params![
                &entry.session_id,
                entry.actor.to_db_str(),
                entry.action.to_db_str(),
                &entry.price,
                &entry.message,
                fmt_dt(&entry.created_at),
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    pub fn list_entries(&self, session_id: &str) -> RepositoryResult<Vec<NegotiationEntry>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(
            r#"SELECT entry_id, session_id, actor, action, price, message, created_at
               FROM negotiation_entry
               WHERE session_id = ?
               ORDER BY entry_id"#,
        )?;

        let entries = stmt
            .query_map(params![session_id], map_entry_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(entries)
    }
}

fn map_session_row(row: &rusqlite::Row) -> rusqlite::Result<NegotiationSession> {
    let offerer_str: String = row.get(4)?;
    let status_str: String = row.get(5)?;

    Ok(NegotiationSession {
        session_id: row.get(0)?,
        occurrence_id: row.get(1)?,
        base_price: row.get(2)?,
        current_offer: row.get(3)?,
        current_offerer: Party::from_db_str(&offerer_str)
            .ok_or_else(|| text_conversion_err(4, &offerer_str))?,
        status: NegotiationStatus::from_db_str(&status_str)
            .ok_or_else(|| text_conversion_err(5, &status_str))?,
        round_count: row.get(6)?,
        max_rounds: row.get(7)?,
        created_at: parse_dt_rusqlite(8, &row.get::<_, String>(8)?)?,
        updated_at: parse_dt_rusqlite(9, &row.get::<_, String>(9)?)?,
    })
}

fn map_entry_row(row: &rusqlite::Row) -> rusqlite::Result<NegotiationEntry> {
    let actor_str: String = row.get(2)?;
    let action_str: String = row.get(3)?;

    Ok(NegotiationEntry {
        entry_id: row.get(0)?,
        session_id: row.get(1)?,
        actor: Party::from_db_str(&actor_str)
            .ok_or_else(|| text_conversion_err(2, &actor_str))?,
        action: NegotiationAction::from_db_str(&action_str)
            .ok_or_else(|| text_conversion_err(3, &action_str))?,
        price: row.get(4)?,
        message: row.get(5)?,
        created_at: parse_dt_rusqlite(6, &row.get::<_, String>(6)?)?,
    })
}
