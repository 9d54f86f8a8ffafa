//! In-process broker with Kafka-like group semantics
//!
//! Every topic has a single partition. A reader starts at its group's
//! committed offset and advances an uncommitted in-memory position as it
//! fetches, so a message that is fetched but never committed is delivered
//! again only to the next reader of the same group.

use super::{BrokerClient, TopicReader, TopicWriter};
use crate::envelope::{AckToken, Envelope, OutboundRecord};
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

const PARTITION: i32 = 0;

/// A record as stored in a topic log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub offset: i64,
    pub key: Option<Bytes>,
    pub value: Bytes,
    pub produced_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct TopicState {
    log: Vec<StoredRecord>,
    /// Next offset to read, per group
    committed: HashMap<String, i64>,
    commit_calls: u64,
    batch_sizes: Vec<usize>,
    pending_fetch_failure: Option<String>,
    fail_commits: bool,
    write_failure: Option<String>,
    closed_writers: u64,
    closed_readers: u64,
    notify: Arc<Notify>,
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: HashMap<String, TopicState>,
    unreachable: HashSet<String>,
}

impl BrokerState {
    fn topic(&mut self, topic: &str) -> &mut TopicState {
        self.topics.entry(topic.to_string()).or_default()
    }
}

/// Shared handle to an in-process broker; clones see the same topics
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw record, bypassing any writer; returns its offset
    pub fn append(&self, topic: &str, key: Option<&[u8]>, value: &[u8]) -> i64 {
        let mut state = self.state.lock();
        let topic = state.topic(topic);
        let offset = topic.log.len() as i64;
        topic.log.push(StoredRecord {
            offset,
            key: key.map(Bytes::copy_from_slice),
            value: Bytes::copy_from_slice(value),
            produced_at: Utc::now(),
        });
        topic.notify.notify_waiters();
        offset
    }

    /// Every record written to `topic` so far
    pub fn records(&self, topic: &str) -> Vec<StoredRecord> {
        self.state.lock().topic(topic).log.clone()
    }

    /// Next offset `group` will read from `topic`, if it ever committed
    pub fn committed_offset(&self, topic: &str, group: &str) -> Option<i64> {
        self.state.lock().topic(topic).committed.get(group).copied()
    }

    /// Number of commit round-trips attempted against `topic`
    pub fn commit_calls(&self, topic: &str) -> u64 {
        self.state.lock().topic(topic).commit_calls
    }

    /// Size of every batch written to `topic`, in write order
    pub fn batch_sizes(&self, topic: &str) -> Vec<usize> {
        self.state.lock().topic(topic).batch_sizes.clone()
    }

    /// Number of writers for `topic` that were closed
    pub fn closed_writers(&self, topic: &str) -> u64 {
        self.state.lock().topic(topic).closed_writers
    }

    /// Number of readers for `topic` that left their group
    pub fn closed_readers(&self, topic: &str) -> u64 {
        self.state.lock().topic(topic).closed_readers
    }

    /// Make the next fetch on `topic` fail with a transport error
    pub fn fail_next_fetch(&self, topic: &str, reason: impl Into<String>) {
        let mut state = self.state.lock();
        let topic = state.topic(topic);
        topic.pending_fetch_failure = Some(reason.into());
        topic.notify.notify_waiters();
    }

    /// Make every commit on `topic` fail until reset
    pub fn set_commit_failure(&self, topic: &str, fail: bool) {
        self.state.lock().topic(topic).fail_commits = fail;
    }

    /// Make every batch written to `topic` fail until reset
    pub fn set_write_failure(&self, topic: &str, reason: Option<String>) {
        self.state.lock().topic(topic).write_failure = reason;
    }

    /// Refuse new readers and writers for `topic`
    pub fn set_unreachable(&self, topic: &str, unreachable: bool) {
        let mut state = self.state.lock();
        if unreachable {
            state.unreachable.insert(topic.to_string());
        } else {
            state.unreachable.remove(topic);
        }
    }

    fn check_reachable(&self, topic: &str) -> EngineResult<()> {
        if self.state.lock().unreachable.contains(topic) {
            return Err(EngineError::Connection(format!("topic {} is unreachable", topic)));
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerClient for MemoryBroker {
    type Reader = MemoryReader;
    type Writer = MemoryWriter;

    async fn reader(&self, topic: &str, group: &str) -> EngineResult<MemoryReader> {
        self.check_reachable(topic)?;
        let (position, notify) = {
            let mut state = self.state.lock();
            let topic_state = state.topic(topic);
            let position = topic_state.committed.get(group).copied().unwrap_or(0);
            (position, topic_state.notify.clone())
        };

        Ok(MemoryReader {
            broker: self.clone(),
            topic: topic.to_string(),
            group: group.to_string(),
            position,
            notify,
        })
    }

    async fn writer(&self, topic: &str) -> EngineResult<MemoryWriter> {
        self.check_reachable(topic)?;
        self.state.lock().topic(topic);
        Ok(MemoryWriter {
            broker: self.clone(),
            topic: topic.to_string(),
        })
    }
}

/// Group-bound reader over a [`MemoryBroker`] topic
#[derive(Debug)]
pub struct MemoryReader {
    broker: MemoryBroker,
    topic: String,
    group: String,
    position: i64,
    notify: Arc<Notify>,
}

impl MemoryReader {
    pub fn group(&self) -> &str {
        &self.group
    }

    fn try_next(&mut self) -> EngineResult<Option<Envelope>> {
        let mut state = self.broker.state.lock();
        let topic = state.topic(&self.topic);

        if let Some(reason) = topic.pending_fetch_failure.take() {
            return Err(EngineError::FetchFailed(reason));
        }

        let Some(record) = topic.log.get(self.position as usize) else {
            return Ok(None);
        };

        let envelope = Envelope {
            key: record.key.clone(),
            value: record.value.clone(),
            produced_at: record.produced_at,
            ack: AckToken {
                topic: self.topic.clone(),
                partition: PARTITION,
                offset: record.offset,
            },
        };
        self.position += 1;
        Ok(Some(envelope))
    }
}

#[async_trait]
impl TopicReader for MemoryReader {
    async fn fetch(&mut self, cancel: &CancellationToken) -> EngineResult<Option<Envelope>> {
        let notify = self.notify.clone();
        loop {
            // Register interest before checking the log so an append between
            // the check and the await still wakes us.
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(envelope) = self.try_next()? {
                return Ok(Some(envelope));
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(None),
                _ = &mut notified => {}
            }
        }
    }

    async fn commit(&mut self, ack: &AckToken) -> EngineResult<()> {
        let mut state = self.broker.state.lock();
        let topic = state.topic(&ack.topic);
        topic.commit_calls += 1;

        if topic.fail_commits {
            return Err(EngineError::CommitFailed(format!(
                "group {} could not commit {}",
                self.group, ack
            )));
        }

        let next = ack.offset + 1;
        let committed = topic.committed.entry(self.group.clone()).or_insert(0);
        if next > *committed {
            *committed = next;
        }
        Ok(())
    }

    async fn close(&mut self) -> EngineResult<()> {
        self.broker.state.lock().topic(&self.topic).closed_readers += 1;
        Ok(())
    }
}

/// Writer over a [`MemoryBroker`] topic
#[derive(Debug, Clone)]
pub struct MemoryWriter {
    broker: MemoryBroker,
    topic: String,
}

#[async_trait]
impl TopicWriter for MemoryWriter {
    async fn write_batch(&self, records: Vec<OutboundRecord>) -> EngineResult<()> {
        let mut state = self.broker.state.lock();
        let topic = state.topic(&self.topic);

        if let Some(reason) = &topic.write_failure {
            return Err(EngineError::DeliveryFailed(reason.clone()));
        }

        topic.batch_sizes.push(records.len());
        for record in records {
            let offset = topic.log.len() as i64;
            topic.log.push(StoredRecord {
                offset,
                key: record.key,
                value: record.value,
                produced_at: record.produced_at,
            });
        }
        topic.notify.notify_waiters();
        Ok(())
    }

    async fn close(&self) -> EngineResult<()> {
        self.broker.state.lock().topic(&self.topic).closed_writers += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[tokio::test]
    async fn test_reader_resumes_from_committed_offset() {
        let broker = MemoryBroker::new();
        broker.append("t", None, b"a");
        broker.append("t", None, b"b");
        let cancel = CancellationToken::new();

        let mut reader = broker.reader("t", "g").await.unwrap();
        let first = reader.fetch(&cancel).await.unwrap().unwrap();
        reader.commit(&first.ack).await.unwrap();
        let second = reader.fetch(&cancel).await.unwrap().unwrap();
        assert_eq!(second.value, Bytes::from_static(b"b"));
        drop(reader);

        // "b" was never committed, so a fresh reader sees it again
        let mut reader = broker.reader("t", "g").await.unwrap();
        let again = reader.fetch(&cancel).await.unwrap().unwrap();
        assert_eq!(again.offset(), 1);
        assert_eq!(broker.committed_offset("t", "g"), Some(1));
    }

    #[tokio::test]
    async fn test_groups_are_independent() {
        let broker = MemoryBroker::new();
        broker.append("t", None, b"a");
        let cancel = CancellationToken::new();

        let mut one = broker.reader("t", "g1").await.unwrap();
        let env = one.fetch(&cancel).await.unwrap().unwrap();
        one.commit(&env.ack).await.unwrap();

        let mut two = broker.reader("t", "g2").await.unwrap();
        assert_eq!(two.fetch(&cancel).await.unwrap().unwrap().offset(), 0);
    }

    #[tokio::test]
    async fn test_fetch_wakes_on_append() {
        let broker = MemoryBroker::new();
        let cancel = CancellationToken::new();
        let mut reader = broker.reader("t", "g").await.unwrap();

        let producer = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.append("t", Some(b"k"), b"late");
        });

        let env = tokio::time::timeout(Duration::from_secs(2), reader.fetch(&cancel))
            .await
            .expect("fetch should wake up")
            .unwrap()
            .unwrap();
        assert_eq!(env.key, Some(Bytes::from_static(b"k")));
    }

    #[tokio::test]
    async fn test_fetch_returns_none_on_cancel() {
        let broker = MemoryBroker::new();
        let cancel = CancellationToken::new();
        let mut reader = broker.reader("t", "g").await.unwrap();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let fetched = tokio::time::timeout(Duration::from_secs(2), reader.fetch(&cancel))
            .await
            .expect("fetch should unblock on cancel")
            .unwrap();
        assert!(fetched.is_none());
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let broker = MemoryBroker::new();
        let cancel = CancellationToken::new();

        broker.set_unreachable("t", true);
        assert!(matches!(
            broker.reader("t", "g").await,
            Err(EngineError::Connection(_))
        ));
        broker.set_unreachable("t", false);

        let mut reader = broker.reader("t", "g").await.unwrap();
        broker.fail_next_fetch("t", "socket closed");
        assert_eq!(
            reader.fetch(&cancel).await.unwrap_err(),
            EngineError::FetchFailed("socket closed".into())
        );

        broker.append("t", None, b"x");
        let env = reader.fetch(&cancel).await.unwrap().unwrap();
        broker.set_commit_failure("t", true);
        assert!(matches!(
            reader.commit(&env.ack).await,
            Err(EngineError::CommitFailed(_))
        ));
        assert_eq!(broker.commit_calls("t"), 1);
        assert_eq!(broker.committed_offset("t", "g"), None);
    }

    #[tokio::test]
    async fn test_writer_records_batches() {
        let broker = MemoryBroker::new();
        let writer = broker.writer("t").await.unwrap();

        writer
            .write_batch(vec![
                OutboundRecord::new(None, Bytes::from_static(b"1")),
                OutboundRecord::new(Some(Bytes::from_static(b"k")), Bytes::from_static(b"2")),
            ])
            .await
            .unwrap();
        writer.close().await.unwrap();

        assert_eq!(broker.batch_sizes("t"), vec![2]);
        assert_eq!(broker.records("t")[1].offset, 1);
        assert_eq!(broker.closed_writers("t"), 1);

        broker.set_write_failure("t", Some("not enough replicas".into()));
        assert!(matches!(
            writer.write_batch(vec![OutboundRecord::new(None, Bytes::new())]).await,
            Err(EngineError::DeliveryFailed(_))
        ));
    }
}
