#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use sc_kafka::config::{ConsumerBinding, TopicEntry, TopicRegistry};
use sc_kafka::consumer::EventHandler;
use sc_kafka::events::{DomainEvent, EventKind, PostCreated};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const POST_TOPIC: &str = "post.created";
pub const POST_GROUP: &str = "sc-post-consumers";
pub const SUBSCRIPTION_TOPIC: &str = "subscription.created";
pub const SUBSCRIPTION_GROUP: &str = "sc-subscription-consumers";
pub const NOTIFICATION_TOPIC: &str = "notification.created";
pub const NOTIFICATION_GROUP: &str = "sc-notification-consumers";

/// Upper bound for anything that should happen "promptly"
pub const PROMPTLY: Duration = Duration::from_secs(2);

pub fn registry() -> TopicRegistry {
    TopicRegistry::new()
        .with_entry(TopicEntry::new(EventKind::PostCreated, POST_TOPIC).with_group(POST_GROUP))
        .with_entry(TopicEntry::new(EventKind::SubscriptionCreated, SUBSCRIPTION_TOPIC).with_group(SUBSCRIPTION_GROUP))
        .with_entry(TopicEntry::new(EventKind::NotificationRequested, NOTIFICATION_TOPIC).with_group(NOTIFICATION_GROUP))
}

pub fn post_binding() -> ConsumerBinding {
    ConsumerBinding {
        kind: EventKind::PostCreated,
        topic: POST_TOPIC.to_string(),
        group: POST_GROUP.to_string(),
    }
}

pub fn post(id: &str, author_id: &str, content: &str) -> PostCreated {
    PostCreated {
        id: id.to_string(),
        author_id: author_id.to_string(),
        content: content.to_string(),
        ..Default::default()
    }
}

pub fn post_json(id: &str) -> Vec<u8> {
    serde_json::to_vec(&post(id, "u1", "hello")).unwrap()
}

/// Records every event id it sees and fails a configurable number of times per id
#[derive(Clone, Default)]
pub struct RecordingHandler {
    seen: Arc<Mutex<Vec<String>>>,
    failures_left: Arc<Mutex<HashMap<String, usize>>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` invocations for `id`
    pub fn fail(self, id: &str, times: usize) -> Self {
        self.failures_left.lock().insert(id.to_string(), times);
        self
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl<E: DomainEvent> EventHandler<E> for RecordingHandler {
    async fn handle(&self, event: E, _cancel: &CancellationToken) -> anyhow::Result<()> {
        let id = event.event_id().to_string();
        self.seen.lock().push(id.clone());

        let mut failures = self.failures_left.lock();
        if let Some(left) = failures.get_mut(&id) {
            if *left > 0 {
                *left -= 1;
                anyhow::bail!("handler rejected {}", id);
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}
