// ==========================================
// Scheduled Deliveries - domain layer
// ==========================================
// Entities and typed enums. No SQL, no IO.
// ==========================================

pub mod negotiation;
pub mod occurrence;
pub mod schedule;
pub mod types;

pub use negotiation::{NegotiationEntry, NegotiationSession};
pub use occurrence::ScheduledOccurrence;
pub use schedule::{Address, PackageSpec, RecurrenceRule, ScheduledDelivery};
