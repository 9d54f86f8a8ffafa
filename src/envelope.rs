//! Broker-agnostic transport units

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt;

/// Opaque position of an envelope, handed back to the reader to commit it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AckToken {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl fmt::Display for AckToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]@{}", self.topic, self.partition, self.offset)
    }
}

/// One message read from a topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub key: Option<Bytes>,
    pub value: Bytes,
    pub produced_at: DateTime<Utc>,
    pub ack: AckToken,
}

impl Envelope {
    pub fn topic(&self) -> &str {
        &self.ack.topic
    }

    pub fn partition(&self) -> i32 {
        self.ack.partition
    }

    pub fn offset(&self) -> i64 {
        self.ack.offset
    }
}

/// One message waiting to be written to a topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRecord {
    pub key: Option<Bytes>,
    pub value: Bytes,
    pub produced_at: DateTime<Utc>,
}

impl OutboundRecord {
    pub fn new(key: Option<Bytes>, value: Bytes) -> Self {
        Self {
            key,
            value,
            produced_at: Utc::now(),
        }
    }
}
