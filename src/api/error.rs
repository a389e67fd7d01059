// ==========================================
// Scheduled Deliveries - API layer error types
// ==========================================
// Converts repository/engine errors into caller-facing errors. Every
// message carries an explicit reason; validation failures list every
// violated field.
// ==========================================

use crate::engine::{FieldViolation, SchedulerError};
use crate::repository::RepositoryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    // ===== caller mistakes (never retried) =====
    #[error("validation failed: {reasons}", reasons = .violations.iter()
        .map(|v| format!("{}: {}", v.field, v.message))
        .collect::<Vec<_>>()
        .join("; "))]
    Validation { violations: Vec<FieldViolation> },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state transition: from={from} to={to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("business rule violated: {0}")]
    BusinessRuleViolation(String),

    // ===== negotiation =====
    #[error("negotiation expired: {0}")]
    NegotiationExpired(String),

    #[error("negotiation closed: {0}")]
    NegotiationClosed(String),

    // ===== concurrency =====
    #[error("conflict: {0}")]
    Conflict(String),

    // ===== execution =====
    #[error("execution failed: {0}")]
    ExecutionFailure(String),

    // ===== data access =====
    #[error("database error: {0}")]
    DatabaseError(String),

    #[error("database connection failed: {0}")]
    DatabaseConnectionError(String),

    #[error("database transaction failed: {0}")]
    DatabaseTransactionError(String),

    // ===== generic =====
    #[error("internal error: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::OptimisticLockFailure {
                schedule_id,
                expected,
                actual,
            } => ApiError::Conflict(format!(
                "schedule {schedule_id} was modified concurrently (expected revision {expected}, found {actual})"
            )),
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{entity} with id={id}"))
            }
            RepositoryError::DatabaseConnectionError(msg) => ApiError::DatabaseConnectionError(msg),
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseConnectionError(format!("database lock: {msg}"))
            }
            RepositoryError::DatabaseTransactionError(msg) => ApiError::DatabaseTransactionError(msg),
            RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::BusinessRuleViolation(format!("unique constraint: {msg}"))
            }
            RepositoryError::ForeignKeyViolation(msg) => {
                ApiError::BusinessRuleViolation(format!("foreign key constraint: {msg}"))
            }
            RepositoryError::InternalError(msg) => ApiError::InternalError(msg),
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::Validation { violations } => ApiError::Validation { violations },
            SchedulerError::InvalidRule(e) => ApiError::InvalidInput(e.to_string()),
            SchedulerError::InvalidStateTransition { from, to, .. } => {
                ApiError::InvalidStateTransition { from, to }
            }
            SchedulerError::NegotiationExpired {
                session_id,
                max_rounds,
            } => ApiError::NegotiationExpired(format!(
                "session {session_id} reached the round cap of {max_rounds}"
            )),
            SchedulerError::NegotiationClosed { session_id, status } => {
                ApiError::NegotiationClosed(format!("session {session_id} is {status}"))
            }
            SchedulerError::NotCurrentResponder { session_id, party } => ApiError::InvalidInput(
                format!("party {party} holds the current offer in session {session_id}"),
            ),
            SchedulerError::InvalidOffer(msg) => ApiError::InvalidInput(msg),
            SchedulerError::ExecutionFailure(msg) => ApiError::ExecutionFailure(msg),
            SchedulerError::Repository(e) => e.into(),
            SchedulerError::Other(e) => ApiError::Other(e),
        }
    }
}

/// Result alias
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_conversion() {
        let repo_err = RepositoryError::NotFound {
            entity: "ScheduledDelivery".to_string(),
            id: "S001".to_string(),
        };
        let api_err: ApiError = repo_err.into();
        match api_err {
            ApiError::NotFound(msg) => {
                assert!(msg.contains("ScheduledDelivery"));
                assert!(msg.contains("S001"));
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_validation_lists_every_field() {
        let err: ApiError = SchedulerError::validation(vec![
            FieldViolation::new("pickup.address", "must not be empty"),
            FieldViolation::new("proposed_price", "must be positive"),
        ])
        .into();
        let msg = err.to_string();
        assert!(msg.contains("pickup.address"));
        assert!(msg.contains("proposed_price"));
    }

    #[test]
    fn test_optimistic_lock_becomes_conflict() {
        let repo_err = RepositoryError::OptimisticLockFailure {
            schedule_id: "S001".to_string(),
            expected: 1,
            actual: 2,
        };
        let api_err: ApiError = repo_err.into();
        assert!(matches!(api_err, ApiError::Conflict(_)));
    }
}
