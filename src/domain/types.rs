// ==========================================
// Scheduled Deliveries - domain type definitions
// ==========================================
// Serialization format: SCREAMING_SNAKE_CASE (matches database storage)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// Schedule status
// ==========================================
// Lifecycle: ACTIVE <-> PAUSED; COMPLETED / CANCELLED terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleStatus {
    Active,
    Paused,
    Completed,
    Cancelled,
}

impl ScheduleStatus {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Active => "ACTIVE",
            ScheduleStatus::Paused => "PAUSED",
            ScheduleStatus::Completed => "COMPLETED",
            ScheduleStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(ScheduleStatus::Active),
            "PAUSED" => Some(ScheduleStatus::Paused),
            "COMPLETED" => Some(ScheduleStatus::Completed),
            "CANCELLED" => Some(ScheduleStatus::Cancelled),
            _ => None,
        }
    }

    /// COMPLETED and CANCELLED admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScheduleStatus::Completed | ScheduleStatus::Cancelled)
    }
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// Occurrence status
// ==========================================
// PENDING -> COORDINATING -> {NEGOTIATING, READY, FAILED}
// NEGOTIATING -> {READY, FAILED}
// READY -> EXECUTING -> {EXECUTED, FAILED}; EXECUTING -> READY (transient retry)
// any non-terminal -> SKIPPED on parent cancellation
// EXECUTING is the ephemeral in-flight claim taken by the execution trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OccurrenceStatus {
    Pending,
    Coordinating,
    Negotiating,
    Ready,
    Executing,
    Executed,
    Failed,
    Skipped,
}

impl OccurrenceStatus {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            OccurrenceStatus::Pending => "PENDING",
            OccurrenceStatus::Coordinating => "COORDINATING",
            OccurrenceStatus::Negotiating => "NEGOTIATING",
            OccurrenceStatus::Ready => "READY",
            OccurrenceStatus::Executing => "EXECUTING",
            OccurrenceStatus::Executed => "EXECUTED",
            OccurrenceStatus::Failed => "FAILED",
            OccurrenceStatus::Skipped => "SKIPPED",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(OccurrenceStatus::Pending),
            "COORDINATING" => Some(OccurrenceStatus::Coordinating),
            "NEGOTIATING" => Some(OccurrenceStatus::Negotiating),
            "READY" => Some(OccurrenceStatus::Ready),
            "EXECUTING" => Some(OccurrenceStatus::Executing),
            "EXECUTED" => Some(OccurrenceStatus::Executed),
            "FAILED" => Some(OccurrenceStatus::Failed),
            "SKIPPED" => Some(OccurrenceStatus::Skipped),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OccurrenceStatus::Executed | OccurrenceStatus::Skipped)
    }

    /// Legal transitions of the occurrence state machine.
    ///
    /// FAILED -> READY is the manual retry operation: the lifecycle manager
    /// reopens the occurrence with a fresh attempt budget.
    pub fn can_transition_to(&self, target: OccurrenceStatus) -> bool {
        use OccurrenceStatus::*;
        match (self, target) {
            (Pending, Coordinating) => true,
            (Coordinating, Negotiating) => true,
            (Coordinating, Ready) | (Coordinating, Failed) => true,
            (Negotiating, Ready) | (Negotiating, Failed) => true,
            (Ready, Executing) => true,
            (Executing, Executed) | (Executing, Failed) => true,
            (Executing, Ready) => true,
            (Failed, Ready) => true,
            // Parent cancellation sweeps every non-terminal occurrence.
            (from, Skipped) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for OccurrenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// Recurrence kind
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecurrenceKind {
    None,
    Daily,
    Weekly,
    Monthly,
}

impl RecurrenceKind {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            RecurrenceKind::None => "NONE",
            RecurrenceKind::Daily => "DAILY",
            RecurrenceKind::Weekly => "WEEKLY",
            RecurrenceKind::Monthly => "MONTHLY",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "NONE" => Some(RecurrenceKind::None),
            "DAILY" => Some(RecurrenceKind::Daily),
            "WEEKLY" => Some(RecurrenceKind::Weekly),
            "MONTHLY" => Some(RecurrenceKind::Monthly),
            _ => None,
        }
    }
}

impl fmt::Display for RecurrenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// Negotiation party
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Party {
    Client,
    Counterparty,
}

impl Party {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            Party::Client => "CLIENT",
            Party::Counterparty => "COUNTERPARTY",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "CLIENT" => Some(Party::Client),
            "COUNTERPARTY" => Some(Party::Counterparty),
            _ => None,
        }
    }

    pub fn other(&self) -> Party {
        match self {
            Party::Client => Party::Counterparty,
            Party::Counterparty => Party::Client,
        }
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// Negotiation session status
// ==========================================
// Once a session leaves OPEN it is immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NegotiationStatus {
    Open,
    Accepted,
    Rejected,
    Expired,
}

impl NegotiationStatus {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            NegotiationStatus::Open => "OPEN",
            NegotiationStatus::Accepted => "ACCEPTED",
            NegotiationStatus::Rejected => "REJECTED",
            NegotiationStatus::Expired => "EXPIRED",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "OPEN" => Some(NegotiationStatus::Open),
            "ACCEPTED" => Some(NegotiationStatus::Accepted),
            "REJECTED" => Some(NegotiationStatus::Rejected),
            "EXPIRED" => Some(NegotiationStatus::Expired),
            _ => None,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, NegotiationStatus::Open)
    }
}

impl fmt::Display for NegotiationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// Negotiation history action
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NegotiationAction {
    Offer,
    CounterOffer,
    Accept,
    Reject,
}

impl NegotiationAction {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            NegotiationAction::Offer => "OFFER",
            NegotiationAction::CounterOffer => "COUNTER_OFFER",
            NegotiationAction::Accept => "ACCEPT",
            NegotiationAction::Reject => "REJECT",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "OFFER" => Some(NegotiationAction::Offer),
            "COUNTER_OFFER" => Some(NegotiationAction::CounterOffer),
            "ACCEPT" => Some(NegotiationAction::Accept),
            "REJECT" => Some(NegotiationAction::Reject),
            _ => None,
        }
    }
}

// ==========================================
// Coordination outcome
// ==========================================
// Result of the J-1 handshake for one occurrence. CONFIRMED may carry a
// negotiated final price; the price is scoped to the occurrence only and
// never written back to the schedule template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoordinationOutcome {
    Confirmed { final_price: Option<i64> },
    TimedOut,
    NegotiationRejected,
    NegotiationExpired,
}

impl CoordinationOutcome {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            CoordinationOutcome::Confirmed { .. } => "CONFIRMED",
            CoordinationOutcome::TimedOut => "TIMED_OUT",
            CoordinationOutcome::NegotiationRejected => "NEGOTIATION_REJECTED",
            CoordinationOutcome::NegotiationExpired => "NEGOTIATION_EXPIRED",
        }
    }

    /// Reconstruct from the (outcome, final_price) column pair.
    pub fn from_db_parts(tag: &str, final_price: Option<i64>) -> Option<Self> {
        match tag {
            "CONFIRMED" => Some(CoordinationOutcome::Confirmed { final_price }),
            "TIMED_OUT" => Some(CoordinationOutcome::TimedOut),
            "NEGOTIATION_REJECTED" => Some(CoordinationOutcome::NegotiationRejected),
            "NEGOTIATION_EXPIRED" => Some(CoordinationOutcome::NegotiationExpired),
            _ => None,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, CoordinationOutcome::Confirmed { .. })
    }

    pub fn final_price(&self) -> Option<i64> {
        match self {
            CoordinationOutcome::Confirmed { final_price } => *final_price,
            _ => None,
        }
    }
}

// ==========================================
// Package size
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PackageSize {
    Small,
    Medium,
    Large,
    ExtraLarge,
}

impl PackageSize {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            PackageSize::Small => "SMALL",
            PackageSize::Medium => "MEDIUM",
            PackageSize::Large => "LARGE",
            PackageSize::ExtraLarge => "EXTRA_LARGE",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "SMALL" => Some(PackageSize::Small),
            "MEDIUM" => Some(PackageSize::Medium),
            "LARGE" => Some(PackageSize::Large),
            "EXTRA_LARGE" => Some(PackageSize::ExtraLarge),
            _ => None,
        }
    }
}

impl fmt::Display for PackageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}
