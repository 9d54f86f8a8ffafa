//! Engine settings and the environment loader

use super::connection::{parse_addresses, ConnectionProfile};
use super::topics::{TopicEntry, TopicRegistry};
use crate::events::EventKind;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DEFAULT_MAX_BYTES: usize = 10 << 20;

/// Production Path batching settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerSettings {
    /// Records accumulated before a flush
    pub batch_size: usize,
    /// Longest a record waits in a partial batch
    pub batch_timeout: Duration,
    /// Let the broker create missing topics on first write
    pub allow_auto_topic_creation: bool,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_timeout: Duration::from_millis(200),
            allow_auto_topic_creation: true,
        }
    }
}

impl ProducerSettings {
    /// Clamp non-positive values to usable ones
    pub fn normalized(mut self) -> Self {
        if self.batch_size == 0 {
            self.batch_size = 1;
        }
        if self.batch_timeout.is_zero() {
            self.batch_timeout = Duration::from_millis(1);
        }
        self
    }
}

/// Consumption-side client settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerSettings {
    pub min_bytes: usize,
    pub max_bytes: usize,
    pub commit_interval: Duration,
    pub heartbeat_interval: Duration,
    pub session_timeout: Duration,
    /// Where a group with no committed position starts (earliest, latest)
    pub auto_offset_reset: String,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            min_bytes: 1,
            max_bytes: DEFAULT_MAX_BYTES,
            commit_interval: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(3),
            session_timeout: Duration::from_secs(30),
            auto_offset_reset: "earliest".to_string(),
        }
    }
}

impl ConsumerSettings {
    /// Clamp non-positive fetch sizes to their defaults
    pub fn normalized(mut self) -> Self {
        if self.min_bytes == 0 {
            self.min_bytes = 1;
        }
        if self.max_bytes == 0 {
            self.max_bytes = DEFAULT_MAX_BYTES;
        }
        self
    }
}

/// Everything the engine needs, as supplied by the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub broker: ConnectionProfile,
    pub topics: TopicRegistry,
    pub producer: ProducerSettings,
    pub consumer: ConsumerSettings,
}

impl EngineConfig {
    /// Load `<dir>/.env` when present, then read the process environment
    pub fn load(dir: Option<&Path>) -> Result<Self> {
        if let Some(dir) = dir {
            let path = dir.join(".env");
            if path.exists() {
                dotenvy::from_path(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
            }
        }
        Self::from_env()
    }

    /// Build the configuration from `KAFKA_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        // An empty variable counts as unset
        let get = |key: &str, default: &str| {
            lookup(key)
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let broker = ConnectionProfile::builder()
            .addresses(parse_addresses(&get("KAFKA_BROKERS", "kafka-broker:9092")))
            .client_id(get("KAFKA_CLIENT_ID", "sc-kafka"))
            .dial_timeout(duration_var(&get, "KAFKA_DIAL_TIMEOUT", "5s")?)
            .read_timeout(duration_var(&get, "KAFKA_READ_TIMEOUT", "10s")?)
            .write_timeout(duration_var(&get, "KAFKA_WRITE_TIMEOUT", "10s")?)
            .credentials(get("KAFKA_USERNAME", ""), get("KAFKA_PASSWORD", ""))
            .build()?;

        let topics = TopicRegistry::new()
            .with_entry(
                TopicEntry::new(EventKind::PostCreated, get("KAFKA_TOPIC_POST_CREATED", "post.created"))
                    .with_group(get("KAFKA_CONSUMER_POST_CREATED_GROUP", "sc-post-consumers")),
            )
            .with_entry(
                TopicEntry::new(
                    EventKind::SubscriptionCreated,
                    get("KAFKA_TOPIC_SUBSCRIPTION_CREATED", "subscription.created"),
                )
                .with_group(get("KAFKA_CONSUMER_SUBSCRIPTION_GROUP", "sc-subscription-consumers")),
            )
            .with_entry(
                TopicEntry::new(
                    EventKind::NotificationRequested,
                    get("KAFKA_TOPIC_NOTIFICATION", "notification.created"),
                )
                .with_group(get("KAFKA_CONSUMER_NOTIFICATION_GROUP", "sc-notification-consumers")),
            );

        let producer = ProducerSettings {
            batch_size: usize_var(&get, "KAFKA_PRODUCER_BATCH_SIZE", "100")?,
            batch_timeout: duration_var(&get, "KAFKA_PRODUCER_BATCH_TIMEOUT", "200ms")?,
            allow_auto_topic_creation: get("KAFKA_PRODUCER_AUTO_CREATE_TOPIC", "true")
                .parse()
                .context("Invalid KAFKA_PRODUCER_AUTO_CREATE_TOPIC")?,
        }
        .normalized();

        let consumer = ConsumerSettings {
            min_bytes: usize_var(&get, "KAFKA_CONSUMER_MIN_BYTES", "1")?,
            max_bytes: usize_var(&get, "KAFKA_CONSUMER_MAX_BYTES", "10485760")?,
            commit_interval: duration_var(&get, "KAFKA_CONSUMER_COMMIT_INTERVAL", "1s")?,
            heartbeat_interval: duration_var(&get, "KAFKA_CONSUMER_HEARTBEAT_INTERVAL", "3s")?,
            session_timeout: duration_var(&get, "KAFKA_CONSUMER_SESSION_TIMEOUT", "30s")?,
            auto_offset_reset: get("KAFKA_CONSUMER_AUTO_OFFSET_RESET", "earliest"),
        }
        .normalized();

        Ok(Self {
            broker,
            topics,
            producer,
            consumer,
        })
    }
}

/// Non-positive integers fall back to zero so `normalized` can replace them
fn usize_var<G>(get: &G, key: &str, default: &str) -> Result<usize>
where
    G: Fn(&str, &str) -> String,
{
    let raw = get(key, default);
    let value: i64 = raw
        .trim()
        .parse()
        .with_context(|| format!("Invalid {}: '{}'", key, raw))?;
    Ok(usize::try_from(value).unwrap_or(0))
}

fn duration_var<G>(get: &G, key: &str, default: &str) -> Result<Duration>
where
    G: Fn(&str, &str) -> String,
{
    let raw = get(key, default);
    parse_duration(&raw).with_context(|| format!("Invalid {}", key))
}

/// Parse a Go-style duration such as `300ms`, `1.5s` or `1h30m`
///
/// A number without any unit is a count of nanoseconds. Negative values and
/// totals beyond `i64::MAX` nanoseconds are rejected.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(anyhow!("empty duration"));
    }

    let input = if raw.contains(|c: char| "nsuµμmh".contains(c)) {
        raw.to_string()
    } else {
        format!("{}ns", raw)
    };
    let mut rest = input.strip_prefix('+').unwrap_or(&input);
    if rest.starts_with('-') {
        return Err(anyhow!("'{}' is not a non-negative duration", raw));
    }

    let mut total: u128 = 0;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_len);
        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);

        let nanos_per_unit = unit_nanos(unit).ok_or_else(|| anyhow!("'{}' has unknown unit '{}'", raw, unit))?;
        let value = component_nanos(number, nanos_per_unit).ok_or_else(|| anyhow!("'{}' is not a duration", raw))?;
        total = total
            .checked_add(value)
            .ok_or_else(|| anyhow!("'{}' is out of range", raw))?;
        rest = tail;
    }

    if total > i64::MAX as u128 {
        return Err(anyhow!("'{}' is out of range", raw));
    }
    Ok(Duration::from_nanos(total as u64))
}

fn unit_nanos(unit: &str) -> Option<u128> {
    match unit {
        "ns" => Some(1),
        "us" | "µs" | "μs" => Some(1_000),
        "ms" => Some(1_000_000),
        "s" => Some(1_000_000_000),
        "m" => Some(60_000_000_000),
        "h" => Some(3_600_000_000_000),
        _ => None,
    }
}

/// `number` is digits with at most one `.`; fractional nanoseconds truncate
fn component_nanos(number: &str, nanos_per_unit: u128) -> Option<u128> {
    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }

    let whole: u128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut value = whole.checked_mul(nanos_per_unit)?;

    let fraction = &fraction[..fraction.len().min(18)];
    if !fraction.is_empty() {
        let digits: u128 = fraction.parse().ok()?;
        let scale = 10u128.pow(fraction.len() as u32);
        value = value.checked_add(digits * nanos_per_unit / scale)?;
    }
    Some(value)
}
