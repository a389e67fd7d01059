// ==========================================
// Scheduled Deliveries - core library
// ==========================================
// Recurring delivery scheduling: recurrence expansion,
// J-1 coordination handshake, bounded price negotiation,
// at-most-once execution of the resulting delivery orders.
// ==========================================

// Domain layer - entities and types
pub mod domain;

// Repository layer - data access
pub mod repository;

// Engine layer - scheduling core
pub mod engine;

// Configuration layer
pub mod config;

// Database infrastructure (connection init / PRAGMA / schema)
pub mod db;

// Logging
pub mod logging;

// API layer - surface consumed by the UI/transport layer
pub mod api;

// ==========================================
// Re-exports
// ==========================================

// Domain types
pub use domain::types::{
    CoordinationOutcome, NegotiationAction, NegotiationStatus, OccurrenceStatus, PackageSize,
    Party, RecurrenceKind, ScheduleStatus,
};

// Domain entities
pub use domain::{
    Address, NegotiationEntry, NegotiationSession, PackageSpec, RecurrenceRule, ScheduledDelivery,
    ScheduledOccurrence,
};

// Engines
pub use engine::{
    CoordinationProtocol, ExecutionTrigger, LifecycleManager, NegotiationProtocol,
    RecurrenceEngine, ScheduleDispatcher,
};

// Collaborator ports
pub use engine::collaborators::{
    DeliveryCreationError, DeliveryCreator, DeliveryRequest, NotificationKind, NotificationSender,
};

// API
pub use api::{DashboardApi, NegotiationApi, ScheduleApi};

// ==========================================
// Constants
// ==========================================

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const APP_NAME: &str = "scheduled-deliveries";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
