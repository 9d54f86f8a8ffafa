//! Typed publishing front for the per-topic batchers

use super::batcher::{run_batcher, Command, Pending};
use crate::broker::BrokerClient;
use crate::codec::{EventCodec, JsonCodec};
use crate::config::{PartitionKeyStrategy, ProducerSettings, TopicRegistry};
use crate::envelope::OutboundRecord;
use crate::error::{EngineError, EngineResult};
use crate::events::{DomainEvent, EventKind};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Pick the partition key: the primary id if non-empty, else the fallback, else unkeyed
pub fn partition_key(primary: &str, fallback: &str) -> Option<Bytes> {
    [primary, fallback]
        .into_iter()
        .find(|candidate| !candidate.is_empty())
        .map(|key| Bytes::copy_from_slice(key.as_bytes()))
}

#[derive(Debug, Clone)]
struct Route {
    topic: String,
    key_strategy: PartitionKeyStrategy,
}

/// Publishes domain events to their registry topics
///
/// One batcher task per topic owns the writer; `publish` only enqueues and
/// waits for the batch acknowledgment, so the publisher can be shared by
/// reference across tasks without extra locking.
pub struct Publisher {
    routes: HashMap<EventKind, Route>,
    lanes: HashMap<String, mpsc::Sender<Command>>,
    batchers: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

fn closed_error() -> EngineError {
    EngineError::DeliveryFailed("publisher closed".to_string())
}

impl Publisher {
    /// Create a writer and batcher for every topic usable for production
    pub async fn start<B: BrokerClient>(
        broker: &B,
        registry: &TopicRegistry,
        settings: ProducerSettings,
    ) -> EngineResult<Self> {
        registry.validate_for_production()?;
        let settings = settings.normalized();

        let mut routes = HashMap::new();
        let mut lanes = HashMap::new();
        let mut batchers = Vec::new();

        for binding in registry.producer_bindings() {
            routes.insert(
                binding.kind,
                Route {
                    topic: binding.topic.clone(),
                    key_strategy: binding.key_strategy,
                },
            );
            if lanes.contains_key(&binding.topic) {
                continue;
            }

            let writer = broker.writer(&binding.topic).await?;
            let (tx, rx) = mpsc::channel(settings.batch_size.saturating_mul(2));
            batchers.push(tokio::spawn(run_batcher(
                binding.topic.clone(),
                writer,
                rx,
                settings.clone(),
            )));
            lanes.insert(binding.topic, tx);
        }

        info!("Publisher started for {} topic(s)", lanes.len());
        Ok(Self {
            routes,
            lanes,
            batchers: Mutex::new(batchers),
            closed: AtomicBool::new(false),
        })
    }

    /// Publish a domain event to its kind's topic
    ///
    /// Returns once the batch holding the event is acknowledged by all
    /// in-sync replicas, or with the batch's delivery error.
    pub async fn publish<E: DomainEvent>(&self, event: &E) -> EngineResult<()> {
        let route = self.route(E::KIND)?;
        let key = match route.key_strategy {
            PartitionKeyStrategy::PrimaryThenSubject => partition_key(event.event_id(), event.subject_id()),
            PartitionKeyStrategy::SubjectOnly => partition_key(event.subject_id(), ""),
            PartitionKeyStrategy::Unkeyed => None,
        };
        self.enqueue(route, key, event).await
    }

    /// Publish any JSON-serializable value to `kind`'s topic with an explicit key
    ///
    /// An empty or missing key leaves the record unkeyed.
    pub async fn publish_keyed<E>(&self, kind: EventKind, key: Option<&str>, event: &E) -> EngineResult<()>
    where
        E: Serialize + DeserializeOwned,
    {
        let route = self.route(kind)?;
        let key = key.and_then(|key| partition_key(key, ""));
        self.enqueue(route, key, event).await
    }

    fn route(&self, kind: EventKind) -> EngineResult<&Route> {
        self.routes
            .get(&kind)
            .ok_or_else(|| EngineError::ConfigInvalid(format!("no topic configured for {}", kind)))
    }

    async fn enqueue<E>(&self, route: &Route, key: Option<Bytes>, event: &E) -> EngineResult<()>
    where
        E: Serialize + DeserializeOwned,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(closed_error());
        }

        let value = JsonCodec.encode(event)?;
        let lane = self.lanes.get(&route.topic).ok_or_else(closed_error)?;

        let (ack, acked) = oneshot::channel();
        let pending = Pending {
            record: OutboundRecord::new(key, value),
            ack,
        };
        lane.send(Command::Publish(pending))
            .await
            .map_err(|_| closed_error())?;

        acked.await.map_err(|_| closed_error())?
    }

    /// Stop accepting events, flush every batcher and close its writer
    ///
    /// Idempotent. Returns the first writer close error, if any.
    pub async fn close(&self) -> EngineResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut waiting = Vec::new();
        for (topic, lane) in &self.lanes {
            let (done, closed) = oneshot::channel();
            if lane.send(Command::Close(done)).await.is_ok() {
                waiting.push((topic, closed));
            }
        }

        let mut first_error = None;
        for (topic, closed) in waiting {
            if let Ok(Err(e)) = closed.await {
                warn!("Failed to close writer for {}: {}", topic, e);
                first_error.get_or_insert(e);
            }
        }

        let batchers = std::mem::take(&mut *self.batchers.lock());
        for batcher in batchers {
            if let Err(e) = batcher.await {
                warn!("Batcher task ended abnormally: {}", e);
            }
        }

        info!("Publisher closed");
        first_error.map_or(Ok(()), Err)
    }
}
