//! Topics, active subscriptions and listener dispatch

use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use smallvec::SmallVec;

use crate::error::RealtimeError;

/// A destination the manager subscribes to on every connection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Shared topic delivered to every client
    Broadcast(String),
    /// Per-user queue; only subscribed when the session has a subject
    PrivateQueue(String),
}

impl Topic {
    pub fn broadcast(destination: impl Into<String>) -> Self {
        Topic::Broadcast(destination.into())
    }

    pub fn private_queue(destination: impl Into<String>) -> Self {
        Topic::PrivateQueue(destination.into())
    }

    pub fn destination(&self) -> &str {
        match self {
            Topic::Broadcast(d) | Topic::PrivateQueue(d) => d,
        }
    }

    pub fn is_private(&self) -> bool {
        matches!(self, Topic::PrivateQueue(_))
    }
}

/// A subscription issued on the current link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSubscription {
    pub id: String,
    pub destination: String,
}

pub type ActiveSubscriptions = SmallVec<[ActiveSubscription; 4]>;

/// A decoded inbound message
#[derive(Debug, Clone)]
pub struct InboundEvent {
    /// Topic destination the message was delivered on
    pub destination: String,
    pub subscription: String,
    pub message_id: Option<String>,
    pub payload: serde_json::Value,
}

impl InboundEvent {
    /// Decode the payload into a typed model
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, RealtimeError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

pub type Listener = Arc<dyn Fn(&InboundEvent) + Send + Sync>;

/// Configured topics and the listeners registered for each of them
pub struct ListenerRegistry {
    topics: Vec<Topic>,
    listeners: DashMap<String, Vec<Listener>>,
}

impl ListenerRegistry {
    pub fn new(topics: Vec<Topic>) -> Self {
        let listeners = DashMap::new();
        for topic in &topics {
            listeners.insert(topic.destination().to_string(), Vec::new());
        }
        Self { topics, listeners }
    }

    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    /// Register a listener for a configured topic
    pub fn add_listener(&self, destination: &str, listener: Listener) -> Result<(), RealtimeError> {
        match self.listeners.get_mut(destination) {
            Some(mut entry) => {
                entry.push(listener);
                Ok(())
            }
            None => Err(RealtimeError::UnknownTopic(destination.to_string())),
        }
    }

    /// Deliver an event to every listener of its topic. Returns the number of
    /// listeners invoked.
    pub fn dispatch(&self, event: &InboundEvent) -> usize {
        // Clone out so listeners may register further listeners
        let listeners = match self.listeners.get(&event.destination) {
            Some(entry) => entry.clone(),
            None => return 0,
        };
        for listener in &listeners {
            listener(event);
        }
        listeners.len()
    }

    /// Subscriptions to issue on a fresh connection
    pub fn plan(&self, subject: Option<&str>) -> ActiveSubscriptions {
        let mut planned = ActiveSubscriptions::new();
        for (index, topic) in self.topics.iter().enumerate() {
            let id = match (topic, subject) {
                (Topic::Broadcast(_), _) => format!("sub-{}", index),
                (Topic::PrivateQueue(_), Some(subject)) => format!("user-{}-{}", subject, index),
                (Topic::PrivateQueue(destination), None) => {
                    tracing::warn!(
                        destination = %destination,
                        "Session has no subject, skipping private queue subscription"
                    );
                    continue;
                }
            };
            planned.push(ActiveSubscription {
                id,
                destination: topic.destination().to_string(),
            });
        }
        planned
    }
}
