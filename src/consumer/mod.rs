//! Consumption side of the engine
//!
//! A [`ConsumptionLoop`] owns one group-bound reader and processes its topic
//! sequentially:
//! - fetch the next envelope, or stop when the cancellation token fires
//! - decode it with the topic's codec; undecodable messages are committed and skipped
//! - dispatch the event to the handler exactly once
//! - commit synchronously after success; leave uncommitted after failure
//!
//! # Example
//!
//! ```no_run
//! use sc_kafka::broker::{BrokerClient, MemoryBroker};
//! use sc_kafka::codec::JsonCodec;
//! use sc_kafka::config::ConsumerBinding;
//! use sc_kafka::consumer::{handler_fn, ConsumptionLoop};
//! use sc_kafka::events::{EventKind, PostCreated};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let broker = MemoryBroker::new();
//! let binding = ConsumerBinding {
//!     kind: EventKind::PostCreated,
//!     topic: "post.created".to_string(),
//!     group: "sc-post-consumers".to_string(),
//! };
//!
//! let reader = broker.reader(&binding.topic, &binding.group).await?;
//! let handler = handler_fn("log-posts", |post: PostCreated, _cancel: CancellationToken| async move {
//!     println!("post {} by {}", post.id, post.author_id);
//!     Ok::<(), anyhow::Error>(())
//! });
//!
//! let stats = ConsumptionLoop::new(&binding, reader, JsonCodec, handler, CancellationToken::new())
//!     .run()
//!     .await?;
//! println!("{:?}", stats);
//! # Ok(())
//! # }
//! ```

pub mod consumer;
pub mod handler;
pub mod metrics;
pub mod outcome;

pub use consumer::{drain_topic, ConsumptionLoop};
pub use handler::{handler_fn, EventHandler, HandlerFn};
pub use metrics::{LoopMetrics, LoopStats};
pub use outcome::MessageOutcome;
