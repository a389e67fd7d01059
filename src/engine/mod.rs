// ==========================================
// Scheduled Deliveries - engine layer
// ==========================================
// The five scheduling components plus the dispatcher that drives
// them from the external time trigger. Engines own all state
// transitions; the API layer never writes schedule state directly.
// ==========================================

pub mod collaborators;
pub mod coordination;
pub mod dispatcher;
pub mod execution;
pub mod lifecycle;
pub mod negotiation;
pub mod recurrence;

pub use coordination::CoordinationProtocol;
pub use dispatcher::{ScheduleDispatcher, TickReport};
pub use execution::ExecutionTrigger;
pub use lifecycle::{CreateScheduleInput, LifecycleManager, UpdateScheduleInput};
pub use negotiation::NegotiationProtocol;
pub use recurrence::{RecurrenceEngine, RecurrenceError};

use crate::repository::RepositoryError;
use thiserror::Error;

// ==========================================
// FieldViolation - one line of a multi-field validation failure
// ==========================================
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

// ==========================================
// SchedulerError - engine layer errors
// ==========================================
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// Bad caller input; lists every violated field, never retried.
    #[error("validation failed: {}", format_violations(.violations))]
    Validation { violations: Vec<FieldViolation> },

    #[error(transparent)]
    InvalidRule(#[from] RecurrenceError),

    #[error("invalid state transition: {entity} {id} from={from} to={to}")]
    InvalidStateTransition {
        entity: &'static str,
        id: String,
        from: String,
        to: String,
    },

    #[error("negotiation round cap reached: session={session_id}, max_rounds={max_rounds}")]
    NegotiationExpired { session_id: String, max_rounds: i32 },

    #[error("negotiation session is closed: session={session_id}, status={status}")]
    NegotiationClosed { session_id: String, status: String },

    #[error("party {party} holds the current offer and cannot act on it: session={session_id}")]
    NotCurrentResponder { session_id: String, party: String },

    #[error("invalid offer: {0}")]
    InvalidOffer(String),

    #[error("delivery creation failed: {0}")]
    ExecutionFailure(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SchedulerError {
    pub fn validation(violations: Vec<FieldViolation>) -> Self {
        SchedulerError::Validation { violations }
    }
}

fn format_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("{}: {}", v.field, v.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result alias
pub type SchedulerResult<T> = Result<T, SchedulerError>;
