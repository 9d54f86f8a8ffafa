//! Per-topic batching task

use crate::broker::TopicWriter;
use crate::config::ProducerSettings;
use crate::envelope::OutboundRecord;
use crate::error::EngineResult;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// A record waiting for its batch, with the caller's acknowledgment slot
pub(crate) struct Pending {
    pub record: OutboundRecord,
    pub ack: oneshot::Sender<EngineResult<()>>,
}

pub(crate) enum Command {
    Publish(Pending),
    /// Flush, close the writer and stop
    Close(oneshot::Sender<EngineResult<()>>),
}

/// Own one writer and serialize every publish for its topic
///
/// A batch is written when it reaches `batch_size` records or when its
/// oldest record has waited `batch_timeout`. Every caller in the batch gets
/// the batch's result. The task stops on `Close` or when all senders are
/// dropped, flushing what it holds first.
pub(crate) async fn run_batcher<W: TopicWriter>(
    topic: String,
    writer: W,
    mut commands: mpsc::Receiver<Command>,
    settings: ProducerSettings,
) {
    let settings = settings.normalized();
    let mut batch: Vec<Pending> = Vec::with_capacity(settings.batch_size);
    let mut deadline: Option<Instant> = None;

    loop {
        let command = match deadline {
            Some(at) => tokio::select! {
                command = commands.recv() => command,
                _ = tokio::time::sleep_until(at) => {
                    flush(&topic, &writer, &mut batch).await;
                    deadline = None;
                    continue;
                }
            },
            None => commands.recv().await,
        };

        match command {
            Some(Command::Publish(pending)) => {
                // A timeout too large for the clock never fires
                if batch.is_empty() {
                    deadline = Instant::now().checked_add(settings.batch_timeout);
                }
                batch.push(pending);
                if batch.len() >= settings.batch_size {
                    flush(&topic, &writer, &mut batch).await;
                    deadline = None;
                }
            }
            Some(Command::Close(done)) => {
                flush(&topic, &writer, &mut batch).await;
                let _ = done.send(writer.close().await);
                debug!("Batcher for {} closed", topic);
                return;
            }
            None => {
                flush(&topic, &writer, &mut batch).await;
                if let Err(e) = writer.close().await {
                    warn!("Failed to close writer for {}: {}", topic, e);
                }
                return;
            }
        }
    }
}

async fn flush<W: TopicWriter>(topic: &str, writer: &W, batch: &mut Vec<Pending>) {
    if batch.is_empty() {
        return;
    }

    let (records, acks): (Vec<_>, Vec<_>) = std::mem::take(batch)
        .into_iter()
        .map(|pending| (pending.record, pending.ack))
        .unzip();
    let count = records.len();

    let result = writer.write_batch(records).await;
    match &result {
        Ok(()) => debug!(topic, count, "Batch delivered"),
        Err(e) => error!(topic, count, error = %e, "Batch delivery failed"),
    }

    for ack in acks {
        // The caller may have stopped waiting
        let _ = ack.send(result.clone());
    }
}
