//! Connection profile, topic registry and engine settings
//!
//! All of these are plain values validated at construction. They are passed
//! explicitly to the broker client, the orchestrator and the publisher; nothing
//! here is process-global.

pub mod connection;
pub mod settings;
pub mod topics;

pub use connection::{parse_addresses, ConnectionProfile, ConnectionProfileBuilder, Credentials};
pub use settings::{parse_duration, ConsumerSettings, EngineConfig, ProducerSettings};
pub use topics::{ConsumerBinding, PartitionKeyStrategy, ProducerBinding, TopicEntry, TopicRegistry};
