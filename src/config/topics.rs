//! Static mapping from event kind to topic, consumer group and key strategy

use crate::error::{EngineError, EngineResult};
use crate::events::EventKind;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How the Production Path picks a partition key for an event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionKeyStrategy {
    /// Event id, falling back to the subject id, else unkeyed
    #[default]
    PrimaryThenSubject,
    /// Subject id only, else unkeyed
    SubjectOnly,
    /// Always unkeyed; the broker balances round robin
    Unkeyed,
}

/// One registry row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicEntry {
    pub kind: EventKind,
    pub topic: String,
    /// Consumer group; only the consumption side needs it
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub key_strategy: PartitionKeyStrategy,
}

impl TopicEntry {
    pub fn new(kind: EventKind, topic: impl Into<String>) -> Self {
        Self {
            kind,
            topic: topic.into(),
            group: None,
            key_strategy: PartitionKeyStrategy::default(),
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_key_strategy(mut self, strategy: PartitionKeyStrategy) -> Self {
        self.key_strategy = strategy;
        self
    }

    /// Consumer group, if present and non-blank
    pub fn group(&self) -> Option<&str> {
        self.group.as_deref().map(str::trim).filter(|g| !g.is_empty())
    }

    fn has_topic(&self) -> bool {
        !self.topic.trim().is_empty()
    }

    pub fn is_consumable(&self) -> bool {
        self.has_topic() && self.group().is_some()
    }

    pub fn is_producible(&self) -> bool {
        self.has_topic()
    }
}

/// A consumer-side view of a complete entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerBinding {
    pub kind: EventKind,
    pub topic: String,
    pub group: String,
}

/// A producer-side view of a complete entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerBinding {
    pub kind: EventKind,
    pub topic: String,
    pub key_strategy: PartitionKeyStrategy,
}

/// Registry of topic entries; tolerant of entries incomplete for one role
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicRegistry {
    entries: Vec<TopicEntry>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry; duplicates of the same topic are allowed
    pub fn with_entry(mut self, entry: TopicEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn push(&mut self, entry: TopicEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[TopicEntry] {
        &self.entries
    }

    /// Entries with both topic and group, one per kind (first wins)
    pub fn consumer_bindings(&self) -> Vec<ConsumerBinding> {
        let mut bindings: Vec<ConsumerBinding> = Vec::new();
        for entry in &self.entries {
            let Some(group) = entry.group().filter(|_| entry.has_topic()) else {
                debug!(kind = %entry.kind, topic = %entry.topic, "entry incomplete for consumption, skipping");
                continue;
            };
            if bindings.iter().any(|b| b.kind == entry.kind) {
                continue;
            }
            bindings.push(ConsumerBinding {
                kind: entry.kind,
                topic: entry.topic.trim().to_string(),
                group: group.to_string(),
            });
        }
        bindings
    }

    /// Entries with a topic, one per kind (first wins)
    pub fn producer_bindings(&self) -> Vec<ProducerBinding> {
        let mut bindings: Vec<ProducerBinding> = Vec::new();
        for entry in &self.entries {
            if !entry.is_producible() {
                debug!(kind = %entry.kind, "entry has no topic, skipping for production");
                continue;
            }
            if bindings.iter().any(|b| b.kind == entry.kind) {
                continue;
            }
            bindings.push(ProducerBinding {
                kind: entry.kind,
                topic: entry.topic.trim().to_string(),
                key_strategy: entry.key_strategy,
            });
        }
        bindings
    }

    /// Consumer binding for a kind, if the kind is active for consumption
    pub fn consumer_binding(&self, kind: EventKind) -> Option<ConsumerBinding> {
        self.consumer_bindings().into_iter().find(|b| b.kind == kind)
    }

    /// Consumer binding for a topic name, used by drain mode
    pub fn consumer_binding_for_topic(&self, topic: &str) -> Option<ConsumerBinding> {
        self.consumer_bindings().into_iter().find(|b| b.topic == topic)
    }

    /// Fail only when no entry is usable for consumption
    pub fn validate_for_consumption(&self) -> EngineResult<()> {
        if self.consumer_bindings().is_empty() {
            return Err(EngineError::ConfigInvalid(
                "no topic has both a topic name and a consumer group".to_string(),
            ));
        }
        Ok(())
    }

    /// Fail only when no entry is usable for production
    pub fn validate_for_production(&self) -> EngineResult<()> {
        if self.producer_bindings().is_empty() {
            return Err(EngineError::ConfigInvalid(
                "no topic is configured for publishing".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn registry() -> TopicRegistry {
        TopicRegistry::new()
            .with_entry(TopicEntry::new(EventKind::PostCreated, "post.created").with_group("sc-post-consumers"))
            .with_entry(TopicEntry::new(EventKind::SubscriptionCreated, "subscription.created"))
            .with_entry(TopicEntry::new(EventKind::NotificationRequested, "").with_group("sc-notification-consumers"))
    }

    #[test]
    fn test_consumer_side_skips_incomplete_entries() {
        let bindings = registry().consumer_bindings();

        assert_eq!(
            bindings,
            vec![ConsumerBinding {
                kind: EventKind::PostCreated,
                topic: "post.created".into(),
                group: "sc-post-consumers".into(),
            }]
        );
    }

    #[test]
    fn test_producer_side_only_needs_topic() {
        let kinds: Vec<EventKind> = registry().producer_bindings().into_iter().map(|b| b.kind).collect();

        assert_eq!(kinds, vec![EventKind::PostCreated, EventKind::SubscriptionCreated]);
    }

    #[test]
    fn test_duplicate_topics_for_different_roles() {
        let registry = TopicRegistry::new()
            .with_entry(
                TopicEntry::new(EventKind::NotificationRequested, "notification.created")
                    .with_key_strategy(PartitionKeyStrategy::SubjectOnly),
            )
            .with_entry(
                TopicEntry::new(EventKind::NotificationRequested, "notification.created")
                    .with_group("sc-notification-consumers"),
            );

        let consumer = registry.consumer_binding(EventKind::NotificationRequested).unwrap();
        assert_eq!(consumer.group, "sc-notification-consumers");

        let producer = registry.producer_bindings();
        assert_eq!(producer.len(), 1);
        assert_eq!(producer[0].key_strategy, PartitionKeyStrategy::SubjectOnly);
    }

    #[test]
    fn test_blank_group_is_incomplete() {
        let entry = TopicEntry::new(EventKind::PostCreated, "post.created").with_group("  ");
        assert!(!entry.is_consumable());
        assert!(entry.is_producible());
    }

    #[test]
    fn test_validation_fails_only_when_nothing_is_usable() {
        assert!(registry().validate_for_consumption().is_ok());
        assert!(registry().validate_for_production().is_ok());

        let empty = TopicRegistry::new()
            .with_entry(TopicEntry::new(EventKind::PostCreated, "post.created"));
        assert!(matches!(
            empty.validate_for_consumption(),
            Err(EngineError::ConfigInvalid(_))
        ));
        assert!(matches!(
            TopicRegistry::new().validate_for_production(),
            Err(EngineError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn test_lookup_by_topic() {
        let binding = registry().consumer_binding_for_topic("post.created").unwrap();
        assert_eq!(binding.kind, EventKind::PostCreated);
        assert!(registry().consumer_binding_for_topic("subscription.created").is_none());
    }
}
