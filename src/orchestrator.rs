//! Runs one consumption loop per topic under a shared cancellation token

use crate::broker::BrokerClient;
use crate::codec::{EventCodec, JsonCodec};
use crate::config::{ConsumerBinding, TopicRegistry};
use crate::consumer::{ConsumptionLoop, EventHandler, LoopMetrics, LoopStats};
use crate::error::{EngineError, EngineResult};
use crate::events::{DomainEvent, EventKind};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

type LoopFuture = BoxFuture<'static, EngineResult<LoopStats>>;

type SpawnLoop<R> = Box<dyn FnOnce(R, &ConsumerBinding, CancellationToken, Arc<LoopMetrics>) -> LoopFuture + Send>;

struct Registration<R> {
    kind: EventKind,
    spawn: SpawnLoop<R>,
}

/// Collects handlers before any reader is created
pub struct OrchestratorBuilder<B: BrokerClient> {
    broker: B,
    registry: TopicRegistry,
    registrations: Vec<Registration<B::Reader>>,
}

impl<B: BrokerClient> OrchestratorBuilder<B> {
    /// Consume `E`'s topic with JSON payloads
    pub fn consume<E, H>(self, handler: H) -> Self
    where
        E: DomainEvent,
        H: EventHandler<E>,
    {
        self.consume_with_codec::<E, H, JsonCodec>(handler, JsonCodec)
    }

    /// Consume `E`'s topic with a custom payload codec
    pub fn consume_with_codec<E, H, C>(mut self, handler: H, codec: C) -> Self
    where
        E: DomainEvent,
        H: EventHandler<E>,
        C: EventCodec<E>,
    {
        let spawn: SpawnLoop<B::Reader> = Box::new(move |reader, binding, cancel, metrics| {
            ConsumptionLoop::new(binding, reader, codec, handler, cancel)
                .with_metrics(metrics)
                .run()
                .boxed()
        });
        self.registrations.push(Registration { kind: E::KIND, spawn });
        self
    }

    /// Connect every reader, then spawn one task per loop
    ///
    /// Nothing is spawned if any reader fails to connect. Handlers whose
    /// kind has no complete consumer entry are skipped with a warning.
    pub async fn start(self) -> EngineResult<Orchestrator> {
        let OrchestratorBuilder {
            broker,
            registry,
            registrations,
        } = self;
        registry.validate_for_consumption()?;

        let mut ready = Vec::new();
        let mut seen = Vec::new();
        for registration in registrations {
            if seen.contains(&registration.kind) {
                warn!(kind = %registration.kind, "Handler already registered for this kind, ignoring");
                continue;
            }
            seen.push(registration.kind);

            let Some(binding) = registry.consumer_binding(registration.kind) else {
                warn!(kind = %registration.kind, "No topic entry usable for consumption, handler not started");
                continue;
            };

            let reader = broker.reader(&binding.topic, &binding.group).await?;
            ready.push((binding, reader, registration.spawn));
        }

        if ready.is_empty() {
            return Err(EngineError::ConfigInvalid(
                "no registered handler matches a consumable topic".to_string(),
            ));
        }

        let cancel = CancellationToken::new();
        let mut loops = Vec::with_capacity(ready.len());
        let mut tasks = JoinSet::new();

        for (index, (binding, reader, spawn)) in ready.into_iter().enumerate() {
            let metrics = Arc::new(LoopMetrics::new());
            let run = spawn(reader, &binding, cancel.child_token(), metrics.clone());

            // A panicking handler ends its own loop only
            tasks.spawn(async move {
                let result = AssertUnwindSafe(run)
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(EngineError::HandlerFailed("consumption loop panicked".to_string())));
                (index, result)
            });

            info!(topic = %binding.topic, group = %binding.group, "Started consumption loop");
            loops.push(ActiveLoop { binding, metrics });
        }

        Ok(Orchestrator {
            cancel,
            loops,
            tasks,
        })
    }
}

struct ActiveLoop {
    binding: ConsumerBinding,
    metrics: Arc<LoopMetrics>,
}

/// Final state of one consumption loop
#[derive(Debug, Clone, PartialEq)]
pub struct LoopReport {
    pub kind: EventKind,
    pub topic: String,
    pub group: String,
    /// Counters on clean exit, or the error that ended the loop
    pub result: EngineResult<LoopStats>,
}

/// Handle to the running consumption loops
pub struct Orchestrator {
    cancel: CancellationToken,
    loops: Vec<ActiveLoop>,
    tasks: JoinSet<(usize, EngineResult<LoopStats>)>,
}

impl Orchestrator {
    pub fn builder<B: BrokerClient>(broker: B, registry: TopicRegistry) -> OrchestratorBuilder<B> {
        OrchestratorBuilder {
            broker,
            registry,
            registrations: Vec::new(),
        }
    }

    /// Token shared by every loop; cancelling it starts shutdown
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn topics(&self) -> Vec<&str> {
        self.loops.iter().map(|l| l.binding.topic.as_str()).collect()
    }

    /// Current counters per topic
    pub fn stats(&self) -> Vec<(String, LoopStats)> {
        self.loops
            .iter()
            .map(|l| (l.binding.topic.clone(), l.metrics.snapshot()))
            .collect()
    }

    /// Cancel every loop and wait for all of them to return
    pub async fn shutdown(self) -> Vec<LoopReport> {
        info!("Shutting down {} consumption loop(s)", self.loops.len());
        self.cancel.cancel();
        self.run_until_shutdown(std::future::ready(())).await
    }

    /// Wait for every loop to return on its own
    pub async fn wait(self) -> Vec<LoopReport> {
        self.run_until_shutdown(std::future::pending()).await
    }

    /// Run until `signal` completes or every loop has returned, then shut down
    pub async fn run_until_shutdown<F>(mut self, signal: F) -> Vec<LoopReport>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(signal);
        let mut finished = Vec::with_capacity(self.loops.len());

        loop {
            tokio::select! {
                _ = &mut signal => {
                    info!("Shutdown requested");
                    break;
                }
                joined = self.tasks.join_next() => match joined {
                    Some(joined) => finished.extend(self.record(joined)),
                    None => break,
                }
            }
        }

        self.cancel.cancel();
        while let Some(joined) = self.tasks.join_next().await {
            finished.extend(self.record(joined));
        }

        finished.sort_by_key(|(index, _)| *index);
        let reports: Vec<LoopReport> = finished
            .into_iter()
            .map(|(index, result)| {
                let binding = &self.loops[index].binding;
                LoopReport {
                    kind: binding.kind,
                    topic: binding.topic.clone(),
                    group: binding.group.clone(),
                    result,
                }
            })
            .collect();

        info!("All consumption loops stopped");
        reports
    }

    fn record(
        &self,
        joined: Result<(usize, EngineResult<LoopStats>), tokio::task::JoinError>,
    ) -> Option<(usize, EngineResult<LoopStats>)> {
        match joined {
            Ok((index, result)) => {
                if let Err(e) = &result {
                    let binding = &self.loops[index].binding;
                    error!(topic = %binding.topic, group = %binding.group, error = %e, "Consumption loop terminated");
                }
                Some((index, result))
            }
            Err(e) => {
                error!("Consumption task could not be joined: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::config::TopicEntry;
    use crate::consumer::handler_fn;
    use crate::events::PostCreated;

    fn registry() -> TopicRegistry {
        TopicRegistry::new()
            .with_entry(TopicEntry::new(EventKind::PostCreated, "post.created").with_group("sc-post-consumers"))
    }

    fn noop() -> impl EventHandler<PostCreated> {
        handler_fn("noop", |_: PostCreated, _cancel: CancellationToken| async {
            Ok::<(), anyhow::Error>(())
        })
    }

    #[tokio::test]
    async fn test_start_requires_a_matching_handler() {
        let result = Orchestrator::builder(MemoryBroker::new(), registry()).start().await;
        assert!(matches!(result, Err(EngineError::ConfigInvalid(_))));
    }

    #[tokio::test]
    async fn test_duplicate_registration_runs_once() {
        let orchestrator = Orchestrator::builder(MemoryBroker::new(), registry())
            .consume::<PostCreated, _>(noop())
            .consume::<PostCreated, _>(noop())
            .start()
            .await
            .unwrap();

        assert_eq!(orchestrator.topics(), vec!["post.created"]);
        let reports = orchestrator.shutdown().await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].result, Ok(LoopStats::default()));
    }

    #[tokio::test]
    async fn test_panicking_handler_is_reported() {
        let broker = MemoryBroker::new();
        broker.append("post.created", None, br#"{"id":"p1"}"#);

        let handler = handler_fn("explode", |_: PostCreated, _cancel: CancellationToken| async {
            if true {
                panic!("handler bug");
            }
            Ok::<(), anyhow::Error>(())
        });
        let orchestrator = Orchestrator::builder(broker, registry())
            .consume::<PostCreated, _>(handler)
            .start()
            .await
            .unwrap();

        let reports = orchestrator.wait().await;
        assert!(matches!(reports[0].result, Err(EngineError::HandlerFailed(_))));
    }
}
