//! rdkafka-backed broker client

use super::{BrokerClient, TopicReader, TopicWriter};
use crate::config::{ConnectionProfile, ConsumerSettings, ProducerSettings};
use crate::envelope::{AckToken, Envelope, OutboundRecord};
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use futures::future::join_all;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::{ClientConfig, Message, Offset, TopicPartitionList};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Broker client for a Kafka-compatible cluster
#[derive(Debug, Clone)]
pub struct KafkaBroker {
    profile: ConnectionProfile,
    consumer: ConsumerSettings,
    producer: ProducerSettings,
}

impl KafkaBroker {
    pub fn new(profile: ConnectionProfile, consumer: ConsumerSettings, producer: ProducerSettings) -> Self {
        Self {
            profile,
            consumer,
            producer,
        }
    }

    fn base_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", self.profile.bootstrap_servers())
            .set("client.id", self.profile.client_id())
            .set(
                "socket.connection.setup.timeout.ms",
                millis(self.profile.dial_timeout()),
            )
            .set("socket.timeout.ms", millis(self.profile.read_timeout()));

        if let Some(credentials) = self.profile.credentials() {
            config
                .set("security.protocol", "SASL_PLAINTEXT")
                .set("sasl.mechanisms", "PLAIN")
                .set("sasl.username", &credentials.username)
                .set("sasl.password", &credentials.password);
        }
        config
    }
}

fn millis(duration: Duration) -> String {
    duration.as_millis().to_string()
}

fn connection_error(topic: &str, e: KafkaError) -> EngineError {
    EngineError::Connection(format!("{}: {}", topic, e))
}

#[async_trait]
impl BrokerClient for KafkaBroker {
    type Reader = KafkaReader;
    type Writer = KafkaWriter;

    async fn reader(&self, topic: &str, group: &str) -> EngineResult<KafkaReader> {
        let mut config = self.base_config();
        config
            .set("group.id", group)
            .set("enable.auto.commit", "false")
            .set("auto.commit.interval.ms", millis(self.consumer.commit_interval))
            .set("auto.offset.reset", &self.consumer.auto_offset_reset)
            .set("session.timeout.ms", millis(self.consumer.session_timeout))
            .set("heartbeat.interval.ms", millis(self.consumer.heartbeat_interval))
            .set("fetch.min.bytes", self.consumer.min_bytes.to_string())
            .set("fetch.max.bytes", self.consumer.max_bytes.to_string());

        let consumer: StreamConsumer = config.create().map_err(|e| connection_error(topic, e))?;
        consumer
            .subscribe(&[topic])
            .map_err(|e| connection_error(topic, e))?;

        // Surface unreachable brokers at startup instead of on the first fetch
        let consumer = Arc::new(consumer);
        let metadata_client = consumer.clone();
        let metadata_topic = topic.to_string();
        let dial_timeout = self.profile.dial_timeout();
        tokio::task::spawn_blocking(move || metadata_client.fetch_metadata(Some(metadata_topic.as_str()), dial_timeout))
            .await
            .map_err(|e| EngineError::Connection(format!("{}: {}", topic, e)))?
            .map_err(|e| connection_error(topic, e))?;

        info!("Subscribed to topic {} as group {}", topic, group);
        Ok(KafkaReader {
            consumer,
            topic: topic.to_string(),
            group: group.to_string(),
        })
    }

    async fn writer(&self, topic: &str) -> EngineResult<KafkaWriter> {
        let mut config = self.base_config();
        config
            .set("acks", "all")
            .set("batch.num.messages", self.producer.batch_size.to_string())
            .set("linger.ms", millis(self.producer.batch_timeout))
            .set("request.timeout.ms", millis(self.profile.write_timeout()))
            .set("message.timeout.ms", millis(self.profile.write_timeout()))
            .set(
                "allow.auto.create.topics",
                self.producer.allow_auto_topic_creation.to_string(),
            );

        let producer: FutureProducer = config.create().map_err(|e| connection_error(topic, e))?;
        debug!("Created producer for topic {}", topic);

        Ok(KafkaWriter {
            producer,
            topic: topic.to_string(),
            write_timeout: self.profile.write_timeout(),
        })
    }
}

/// Consumer-group member for one topic
pub struct KafkaReader {
    consumer: Arc<StreamConsumer>,
    topic: String,
    group: String,
}

#[async_trait]
impl TopicReader for KafkaReader {
    async fn fetch(&mut self, cancel: &CancellationToken) -> EngineResult<Option<Envelope>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(None),
            received = self.consumer.recv() => {
                let message = received.map_err(|e| EngineError::FetchFailed(e.to_string()))?;
                let produced_at = message
                    .timestamp()
                    .to_millis()
                    .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                    .unwrap_or_else(Utc::now);

                Ok(Some(Envelope {
                    key: message.key().map(Bytes::copy_from_slice),
                    value: message.payload().map(Bytes::copy_from_slice).unwrap_or_default(),
                    produced_at,
                    ack: AckToken {
                        topic: message.topic().to_string(),
                        partition: message.partition(),
                        offset: message.offset(),
                    },
                }))
            }
        }
    }

    async fn commit(&mut self, ack: &AckToken) -> EngineResult<()> {
        let mut list = TopicPartitionList::new();
        list.add_partition_offset(&ack.topic, ack.partition, Offset::Offset(ack.offset + 1))
            .map_err(|e| EngineError::CommitFailed(e.to_string()))?;

        let consumer = self.consumer.clone();
        tokio::task::spawn_blocking(move || consumer.commit(&list, CommitMode::Sync))
            .await
            .map_err(|e| EngineError::CommitFailed(e.to_string()))?
            .map_err(|e| EngineError::CommitFailed(format!("{} for group {}: {}", ack, self.group, e)))
    }

    async fn close(&mut self) -> EngineResult<()> {
        self.consumer.unsubscribe();
        debug!("Left group {} on topic {}", self.group, self.topic);
        Ok(())
    }
}

/// Producer for one topic; every write waits for all in-sync replicas
pub struct KafkaWriter {
    producer: FutureProducer,
    topic: String,
    write_timeout: Duration,
}

#[async_trait]
impl TopicWriter for KafkaWriter {
    async fn write_batch(&self, records: Vec<OutboundRecord>) -> EngineResult<()> {
        let deliveries = records.iter().map(|record| {
            let mut future_record = FutureRecord::<[u8], [u8]>::to(&self.topic)
                .payload(record.value.as_ref())
                .timestamp(record.produced_at.timestamp_millis());
            if let Some(key) = &record.key {
                future_record = future_record.key(key.as_ref());
            }
            self.producer.send(future_record, Timeout::After(self.write_timeout))
        });

        let mut first_error = None;
        for result in join_all(deliveries).await {
            if let Err((e, _)) = result {
                warn!("Delivery to {} failed: {}", self.topic, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(EngineError::DeliveryFailed(format!("{}: {}", self.topic, e))),
            None => Ok(()),
        }
    }

    async fn close(&self) -> EngineResult<()> {
        let producer = self.producer.clone();
        let timeout = self.write_timeout;
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| EngineError::DeliveryFailed(e.to_string()))?
            .map_err(|e| EngineError::DeliveryFailed(format!("flush {}: {}", self.topic, e)))
    }
}
