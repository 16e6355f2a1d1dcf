//! Collaborator traits — the seams between the reminder core and the
//! outside world (chat platform, record storage).

use async_trait::async_trait;

use crate::error::{DeliveryError, Result};
use crate::types::{DeleteOutcome, Destination, MessageId, NamedRecord, RecordKind};

/// Outbound side of a chat platform.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Platform name, for logs.
    fn name(&self) -> &str;

    /// Send a text message and return its id.
    async fn send(
        &self,
        destination: Destination,
        text: &str,
    ) -> std::result::Result<MessageId, DeliveryError>;

    /// Delete a message. Outcomes are classified, never raised.
    async fn delete(&self, destination: Destination, message_id: MessageId) -> DeleteOutcome;
}

/// Read side of record persistence, as seen by the fanout.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn load_records(
        &self,
        destination: Destination,
        kind: RecordKind,
    ) -> Result<Vec<NamedRecord>>;
}
