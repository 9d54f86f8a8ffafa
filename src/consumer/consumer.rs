//! Fetch, decode, dispatch and commit for one topic

use super::handler::EventHandler;
use super::metrics::{LoopMetrics, LoopStats};
use super::outcome::MessageOutcome;
use crate::broker::TopicReader;
use crate::codec::EventCodec;
use crate::config::ConsumerBinding;
use crate::error::{EngineError, EngineResult};
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Sequential consumption loop bound to one topic and consumer group
///
/// Messages are processed strictly in fetch order. A message is committed
/// only after its handler succeeded, or without dispatch when its payload
/// cannot be decoded. A handler failure leaves it uncommitted and the loop
/// moves on, so redelivery happens after a rebalance or restart.
pub struct ConsumptionLoop<E, R, C, H> {
    topic: String,
    group: String,
    reader: R,
    codec: C,
    handler: H,
    cancel: CancellationToken,
    metrics: Arc<LoopMetrics>,
    _event: PhantomData<fn() -> E>,
}

impl<E, R, C, H> ConsumptionLoop<E, R, C, H>
where
    E: Send + 'static,
    R: TopicReader,
    C: EventCodec<E>,
    H: EventHandler<E>,
{
    pub fn new(binding: &ConsumerBinding, reader: R, codec: C, handler: H, cancel: CancellationToken) -> Self {
        Self {
            topic: binding.topic.clone(),
            group: binding.group.clone(),
            reader,
            codec,
            handler,
            cancel,
            metrics: Arc::new(LoopMetrics::new()),
            _event: PhantomData,
        }
    }

    /// Share counters with an outside observer
    pub fn with_metrics(mut self, metrics: Arc<LoopMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> Arc<LoopMetrics> {
        self.metrics.clone()
    }

    /// Process exactly one message
    ///
    /// Returns `Ok(None)` once cancellation is observed. A fetch error is
    /// returned as is and ends the loop; commit errors are only logged.
    pub async fn process_next(&mut self) -> EngineResult<Option<MessageOutcome>> {
        if self.cancel.is_cancelled() {
            return Ok(None);
        }

        let Some(envelope) = self.reader.fetch(&self.cancel).await? else {
            return Ok(None);
        };
        self.metrics.record_fetched();

        let (decoded, handled) = match self.codec.decode(&envelope.value) {
            Err(e) => {
                warn!(
                    topic = %envelope.topic(),
                    partition = envelope.partition(),
                    offset = envelope.offset(),
                    error = %e,
                    "Skipping undecodable message"
                );
                (Err(e), None)
            }
            Ok(event) => {
                let handled = self
                    .handler
                    .handle(event, &self.cancel)
                    .await
                    .map_err(|e| EngineError::HandlerFailed(format!("{:#}", e)));
                if let Err(e) = &handled {
                    error!(
                        topic = %envelope.topic(),
                        partition = envelope.partition(),
                        offset = envelope.offset(),
                        handler = self.handler.name(),
                        error = %e,
                        "Leaving message uncommitted"
                    );
                }
                (Ok(()), Some(handled))
            }
        };

        let outcome = MessageOutcome::from_results(&decoded, handled.as_ref());
        match outcome {
            MessageOutcome::SkippedCommitted => self.metrics.record_skipped(),
            MessageOutcome::LeftUncommitted => self.metrics.record_handler_failure(),
            MessageOutcome::Committed => {}
        }

        // A successful handler is committed even if cancellation arrived meanwhile
        if outcome.should_commit() {
            match self.reader.commit(&envelope.ack).await {
                Ok(()) => {
                    if outcome == MessageOutcome::Committed {
                        self.metrics.record_committed();
                    }
                    debug!(ack = %envelope.ack, %outcome, "Committed");
                }
                Err(e) => {
                    self.metrics.record_commit_failure();
                    warn!(ack = %envelope.ack, error = %e, "Commit failed");
                }
            }
        }

        Ok(Some(outcome))
    }

    /// Run until cancelled or a fetch fails, then leave the group
    pub async fn run(mut self) -> EngineResult<LoopStats> {
        let span = info_span!("consume", topic = %self.topic, group = %self.group);

        async move {
            info!("Consumption loop started");
            let result = loop {
                match self.process_next().await {
                    Ok(Some(_)) => {}
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(e),
                }
            };

            if let Err(e) = self.reader.close().await {
                warn!(error = %e, "Failed to close reader");
            }

            let stats = self.metrics.snapshot();
            match result {
                Ok(()) => {
                    info!(?stats, "Consumption loop stopped");
                    Ok(stats)
                }
                Err(e) => {
                    error!(?stats, error = %e, "Consumption loop failed");
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }
}

/// Fetch and commit every message without decoding or dispatching
///
/// Stops when `cancel` fires or a fetch fails, then leaves the group.
/// Returns the number of messages drained. Commit failures are logged and
/// do not stop the drain.
pub async fn drain_topic<R>(reader: &mut R, cancel: &CancellationToken) -> EngineResult<u64>
where
    R: TopicReader + ?Sized,
{
    let mut drained = 0;
    let result = loop {
        match reader.fetch(cancel).await {
            Ok(Some(envelope)) => {
                drained += 1;
                if let Err(e) = reader.commit(&envelope.ack).await {
                    warn!(ack = %envelope.ack, error = %e, "Failed to commit drained message");
                }
            }
            Ok(None) => break Ok(drained),
            Err(e) => break Err(e),
        }
    };

    if let Err(e) = reader.close().await {
        warn!(error = %e, "Failed to close reader");
    }
    info!(drained, "Drain stopped");
    result
}
