//! Handing encoded rows to a message broker.

mod kafka;
mod memory;

pub use kafka::{KafkaPublisher, connect};
pub use memory::MemoryPublisher;

use async_trait::async_trait;

use crate::error::PublishError;

/// Accepts opaque encoded payloads, one call per row.
///
/// Callers do not retry: a failed publish is reported and the row is dropped.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, payload: Vec<u8>) -> Result<(), PublishError>;

    /// Where payloads go, for logs.
    fn destination(&self) -> String;
}
