//! Kafka streaming engine for the sc services
//!
//! This library moves domain events between services over Kafka: a durable,
//! group-bound consumption loop per topic with commit-after-handle semantics,
//! and a batching publisher that waits for full replica acknowledgment.
//!
//! # Example
//!
//! ```no_run
//! use sc_kafka::broker::MemoryBroker;
//! use sc_kafka::consumer::handler_fn;
//! use sc_kafka::events::{PostCreated, SubscriptionCreated};
//! use sc_kafka::{EngineConfig, Orchestrator, Publisher};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = EngineConfig::from_env()?;
//! // Swap in `KafkaBroker` (feature `kafka`) to talk to a real cluster
//! let broker = MemoryBroker::new();
//!
//! let orchestrator = Orchestrator::builder(broker.clone(), config.topics.clone())
//!     .consume::<PostCreated, _>(handler_fn("posts", |post: PostCreated, _cancel: CancellationToken| async move {
//!         tracing::info!(id = %post.id, "post created");
//!         Ok::<(), anyhow::Error>(())
//!     }))
//!     .start()
//!     .await?;
//!
//! let publisher = Publisher::start(&broker, &config.topics, config.producer.clone()).await?;
//! publisher
//!     .publish(&SubscriptionCreated {
//!         id: "sub-1".to_string(),
//!         subscriber_id: "user-1".to_string(),
//!         creator_id: "user-2".to_string(),
//!         ..Default::default()
//!     })
//!     .await?;
//!
//! publisher.close().await?;
//! orchestrator.run_until_shutdown(async { tokio::signal::ctrl_c().await.unwrap_or(()) }).await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::module_inception)]

use std::str::FromStr;

// Re-export commonly used items
pub use config::{ConnectionProfile, EngineConfig, TopicEntry, TopicRegistry};
pub use error::{EngineError, EngineResult, ErrorSeverity};
pub use events::{DomainEvent, EventKind};
pub use orchestrator::{LoopReport, Orchestrator};
pub use producer::Publisher;

/// Connection profile, topic registry and settings
pub mod config;

/// Error types
pub mod error;

/// Domain event payloads
pub mod events;

/// Transport envelopes
pub mod envelope;

/// Payload codecs
pub mod codec;

/// Broker client seam and implementations
pub mod broker;

/// Consumption loop
pub mod consumer;

/// Production path
pub mod producer;

/// Per-topic worker orchestration
pub mod orchestrator;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Output format of the tracing subscriber
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

/// Initialize the tracing subscriber
///
/// The filter comes from `RUST_LOG` and defaults to `info`.
pub fn init_tracing(format: LogFormat) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}
