//! Idempotency store trait — the at-most-once gate.
//!
//! Checked before any side effect. A second delivery with the same
//! message_id must produce zero new side effects.

use crate::error::StoreError;
use crate::message::InboundMessage;
use async_trait::async_trait;

/// Durable mapping from inbound message id to "already processed".
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Atomically claim a message for processing.
    ///
    /// Returns `true` if this is the first delivery (the message was
    /// durably recorded), `false` if the message_id was already claimed.
    /// Check and insert are a single atomic operation (a unique constraint
    /// on message_id, conflict treated as "already processed"), so two
    /// concurrent deliveries of the same id cannot both claim it.
    async fn claim(&self, message: &InboundMessage) -> std::result::Result<bool, StoreError>;

    /// Whether a message id has already been processed.
    async fn has_processed(&self, message_id: &str) -> std::result::Result<bool, StoreError>;
}
