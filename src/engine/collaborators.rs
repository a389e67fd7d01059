// ==========================================
// Collaborator ports
// ==========================================
// Trait seams for the external systems the scheduling core depends
// on. Injected at construction; the core never reaches for globals.
// ==========================================

use crate::domain::schedule::{Address, PackageSpec};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ==========================================
// Delivery creation
// ==========================================

/// Payload handed to the delivery-creation collaborator when an
/// occurrence executes. Carries the negotiated final price when one
/// exists, the template price otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRequest {
    pub schedule_id: String,
    pub occurrence_id: String,
    pub client_id: String,
    pub pickup: Address,
    pub delivery: Address,
    pub package: PackageSpec,
    /// Minor currency units.
    pub price: i64,
}

#[derive(Error, Debug, Clone)]
pub enum DeliveryCreationError {
    /// Network-level failure; worth retrying.
    #[error("delivery creation transport failure: {0}")]
    Transport(String),

    /// The collaborator rejected the request; retrying is pointless.
    #[error("delivery creation rejected: {0}")]
    Rejected(String),
}

impl DeliveryCreationError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DeliveryCreationError::Transport(_))
    }
}

/// External delivery-creation collaborator. Called exactly once per
/// occurrence execution; the at-most-once gate lives in the trigger,
/// not here.
#[async_trait]
pub trait DeliveryCreator: Send + Sync {
    /// Returns the reference of the created delivery order.
    async fn create_delivery(
        &self,
        request: &DeliveryRequest,
    ) -> Result<String, DeliveryCreationError>;
}

// ==========================================
// Notifications
// ==========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    /// J-1 heads-up: a scheduled delivery is due tomorrow.
    UpcomingDelivery,
    /// The other party proposed a different price.
    PriceProposal,
    /// The delivery order was created.
    DeliveryCreated,
    /// The handshake expired without a response.
    CoordinationTimedOut,
}

/// Fire-and-forget notification collaborator. Failures are logged by
/// the caller and never block a protocol step.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn notify(
        &self,
        party_id: &str,
        occurrence_id: &str,
        kind: NotificationKind,
    ) -> Result<(), anyhow::Error>;
}

/// Sink used where no notification channel is configured
/// (maintenance binaries, tests that don't assert on notifications).
pub struct NoOpNotificationSender;

#[async_trait]
impl NotificationSender for NoOpNotificationSender {
    async fn notify(
        &self,
        _party_id: &str,
        _occurrence_id: &str,
        _kind: NotificationKind,
    ) -> Result<(), anyhow::Error> {
        Ok(())
    }
}
