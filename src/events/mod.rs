//! Event broadcast at the top tier
//!
//! The bridge owns one [`EventHub`] and hands clones of it to whatever needs to
//! publish (the forwarding gateway, the warning endpoint) or subscribe (the
//! `/events` WebSocket). Publishing never fails: with no subscribers the event
//! is simply discarded.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::reading::{Reading, Warning};

/// Channel capacity per subscriber; slower subscribers skip events
const CHANNEL_CAPACITY: usize = 256;

/// Event delivered to subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MeshEvent {
    Warning(Warning),
    Reading(Reading),
}

/// Bookkeeping for one connected subscriber
#[derive(Debug, Clone, Serialize)]
pub struct SubscriberInfo {
    pub id: Uuid,
    pub label: String,
    pub connected_at: DateTime<Utc>,
}

/// Shared broadcast table
#[derive(Debug, Clone)]
pub struct EventHub {
    tx: broadcast::Sender<MeshEvent>,
    subscribers: Arc<Mutex<HashMap<Uuid, SubscriberInfo>>>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    /// Create a hub with no subscribers
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            subscribers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Attach a subscriber; it is detached when the subscription is dropped
    #[must_use]
    pub fn subscribe(&self, label: impl Into<String>) -> Subscription {
        let info = SubscriberInfo {
            id: Uuid::new_v4(),
            label: label.into(),
            connected_at: Utc::now(),
        };
        let id = info.id;
        tracing::info!(subscriber = %id, label = %info.label, "event subscriber attached");
        self.subscribers.lock().insert(id, info);

        Subscription {
            id,
            rx: self.tx.subscribe(),
            subscribers: self.subscribers.clone(),
        }
    }

    /// Broadcast an event; returns how many subscribers received it
    pub fn publish(&self, event: MeshEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Connected subscribers, oldest first
    #[must_use]
    pub fn subscribers(&self) -> Vec<SubscriberInfo> {
        let mut list: Vec<_> = self.subscribers.lock().values().cloned().collect();
        list.sort_by_key(|s| s.connected_at);
        list
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

/// Receiving end held by one subscriber
#[derive(Debug)]
pub struct Subscription {
    id: Uuid,
    rx: broadcast::Receiver<MeshEvent>,
    subscribers: Arc<Mutex<HashMap<Uuid, SubscriberInfo>>>,
}

impl Subscription {
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Next event, skipping over any this subscriber lagged behind on
    ///
    /// Returns `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<MeshEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(subscriber = %self.id, skipped, "event subscriber lagging");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.subscribers.lock().remove(&self.id);
        tracing::info!(subscriber = %self.id, "event subscriber detached");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_every_subscriber() {
        let hub = EventHub::new();
        let mut a = hub.subscribe("a");
        let mut b = hub.subscribe("b");
        assert_eq!(hub.subscriber_count(), 2);

        let reading = Reading::now("S1", "temp", 21.0);
        assert_eq!(hub.publish(MeshEvent::Reading(reading.clone())), 2);

        assert_eq!(a.recv().await, Some(MeshEvent::Reading(reading.clone())));
        assert_eq!(b.recv().await, Some(MeshEvent::Reading(reading)));
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let hub = EventHub::new();
        assert_eq!(hub.publish(MeshEvent::Reading(Reading::now("S1", "t", 1.0))), 0);
    }

    #[test]
    fn dropping_subscription_detaches() {
        let hub = EventHub::new();
        let sub = hub.subscribe("ws");
        assert_eq!(hub.subscribers()[0].id, sub.id());
        drop(sub);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn events_are_tagged() {
        let warning = Warning {
            reading: Reading::now("S1", "temp", 95.0),
            message: "value 95 above 90".to_string(),
        };
        let json = serde_json::to_value(MeshEvent::Warning(warning)).unwrap();
        assert_eq!(json["type"], "warning");
        assert_eq!(json["message"], "value 95 above 90");
        assert_eq!(json["reading"]["sensor_id"], "S1");
    }
}
