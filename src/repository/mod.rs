// ==========================================
// Scheduled Deliveries - repository layer
// ==========================================
// One repository per table. All repositories share an
// Arc<Mutex<Connection>>; datetimes are stored as
// "%Y-%m-%d %H:%M:%S" text, dates as "%Y-%m-%d".
// ==========================================

pub mod error;
pub mod negotiation_repo;
pub mod occurrence_repo;
pub mod schedule_repo;

pub use error::{RepositoryError, RepositoryResult};
pub use negotiation_repo::NegotiationRepository;
pub use occurrence_repo::OccurrenceRepository;
pub use schedule_repo::ScheduleRepository;

use chrono::{NaiveDate, NaiveDateTime};

pub(crate) const DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";
pub(crate) const DATE_FMT: &str = "%Y-%m-%d";

pub(crate) fn fmt_dt(dt: &NaiveDateTime) -> String {
    dt.format(DATETIME_FMT).to_string()
}

pub(crate) fn fmt_date(d: &NaiveDate) -> String {
    d.format(DATE_FMT).to_string()
}

pub(crate) fn parse_date(s: &str) -> Result<NaiveDate, RepositoryError> {
    NaiveDate::parse_from_str(s, DATE_FMT)
        .map_err(|e| RepositoryError::InternalError(format!("invalid stored date {s:?}: {e}")))
}

/// rusqlite conversion error for an enum column holding an unknown tag.
pub(crate) fn text_conversion_err(idx: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("unrecognized value {value:?}").into(),
    )
}
