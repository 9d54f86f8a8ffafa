//! Broker client seam
//!
//! The engine talks to the broker only through these traits. [`memory`]
//! provides an in-process broker used by tests and local runs; the `kafka`
//! feature enables the rdkafka-backed implementation in [`kafka`].

use crate::envelope::{AckToken, Envelope, OutboundRecord};
use crate::error::EngineResult;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub mod memory;

#[cfg(feature = "kafka")]
pub mod kafka;

pub use memory::MemoryBroker;

#[cfg(feature = "kafka")]
pub use kafka::KafkaBroker;

/// A durable, group-bound reader for one topic
#[async_trait]
pub trait TopicReader: Send {
    /// Block until the next envelope arrives; `Ok(None)` once `cancel` fires
    async fn fetch(&mut self, cancel: &CancellationToken) -> EngineResult<Option<Envelope>>;

    /// Synchronously record the group position past `ack`
    async fn commit(&mut self, ack: &AckToken) -> EngineResult<()>;

    /// Leave the group and release the session
    async fn close(&mut self) -> EngineResult<()> {
        Ok(())
    }
}

/// A writer for one topic that waits for full acknowledgment
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TopicWriter: Send + Sync {
    /// Deliver a batch; returns once every record is acknowledged or one fails
    async fn write_batch(&self, records: Vec<OutboundRecord>) -> EngineResult<()>;

    /// Flush anything buffered by the client and release it
    async fn close(&self) -> EngineResult<()>;
}

/// Creates readers and writers bound to one connection profile
#[async_trait]
pub trait BrokerClient: Send + Sync {
    type Reader: TopicReader + 'static;
    type Writer: TopicWriter + 'static;

    /// Join `group` on `topic`; resumes from the group's committed position
    async fn reader(&self, topic: &str, group: &str) -> EngineResult<Self::Reader>;

    async fn writer(&self, topic: &str) -> EngineResult<Self::Writer>;
}
