//! Domain events exchanged between services

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Logical kind of a domain event, used to route it to a topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    /// A user published a post
    PostCreated,
    /// A user subscribed to a creator
    SubscriptionCreated,
    /// A notification should be delivered to a user
    #[serde(rename = "notification")]
    NotificationRequested,
}

impl EventKind {
    /// Every known kind, in registry order
    pub const ALL: [EventKind; 3] = [
        EventKind::PostCreated,
        EventKind::SubscriptionCreated,
        EventKind::NotificationRequested,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PostCreated => "post-created",
            EventKind::SubscriptionCreated => "subscription-created",
            EventKind::NotificationRequested => "notification",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown event kind '{}'", s))
    }
}

/// A typed event carried in an envelope's value
pub trait DomainEvent:
    Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static
{
    /// Kind used to look the event's topic up in the registry
    const KIND: EventKind;

    /// The event's own identifier, possibly empty
    fn event_id(&self) -> &str;

    /// The principal subject the event is about, possibly empty
    fn subject_id(&self) -> &str;
}

/// Read an explicit JSON `null` as the field's default value
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Emitted when a new post is created
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostCreated {
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub author_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(deserialize_with = "null_as_default")]
    pub created_at: DateTime<Utc>,
}

impl DomainEvent for PostCreated {
    const KIND: EventKind = EventKind::PostCreated;

    fn event_id(&self) -> &str {
        &self.id
    }

    fn subject_id(&self) -> &str {
        &self.author_id
    }
}

/// A new subscription between two users
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionCreated {
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub subscriber_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub creator_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub created_at: DateTime<Utc>,
}

impl DomainEvent for SubscriptionCreated {
    const KIND: EventKind = EventKind::SubscriptionCreated;

    fn event_id(&self) -> &str {
        &self.id
    }

    fn subject_id(&self) -> &str {
        &self.subscriber_id
    }
}

/// A lightweight message that should be delivered to a user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationRequested {
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub user_id: String,
    #[serde(rename = "type", deserialize_with = "null_as_default")]
    pub kind: String,
    #[serde(deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", deserialize_with = "null_as_default")]
    pub metadata: BTreeMap<String, String>,
    #[serde(deserialize_with = "null_as_default")]
    pub created_at: DateTime<Utc>,
}

impl DomainEvent for NotificationRequested {
    const KIND: EventKind = EventKind::NotificationRequested;

    fn event_id(&self) -> &str {
        &self.id
    }

    fn subject_id(&self) -> &str {
        &self.user_id
    }
}
