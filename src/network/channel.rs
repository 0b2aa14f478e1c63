//! Broadcast and Presence Channel
//!
//! The transport seam. A [`Transport`] hands out per-topic subscriptions;
//! each subscription can broadcast named events to the other subscribers
//! and publish a presence entry. Events arrive on an unbounded queue owned
//! by the subscriber.
//!
//! Delivery rules, matching a typical realtime pub/sub service:
//! - a broadcast goes to every current subscriber except the sender;
//! - every presence change delivers the full presence list to every
//!   subscriber, the one that changed included;
//! - dropping a [`Subscription`] leaves the topic and withdraws its presence.
//!
//! [`MemoryHub`] is the in-process implementation used by tests and the
//! demo binary.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::identity::{Participant, ParticipantId};
use super::protocol::Broadcast;

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Subscribing to a topic failed.
    #[error("Subscribe to {0} failed")]
    SubscribeFailed(String),

    /// The subscription is no longer attached to its topic.
    #[error("Channel closed")]
    Closed,

    /// Payload could not be encoded.
    #[error("Encode failed: {0}")]
    Encode(String),
}

/// Something that arrived on a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A broadcast from another subscriber.
    Broadcast {
        /// Subscriber that sent it.
        from: ParticipantId,
        /// Decoded event.
        message: Broadcast,
    },
    /// The full presence list after a change.
    PresenceSync(Vec<Participant>),
}

/// Outgoing half of a subscription.
pub trait Channel: Send + Sync {
    /// Topic name.
    fn topic(&self) -> &str;

    /// Send an event to every other subscriber.
    fn broadcast(&self, message: &Broadcast) -> Result<(), TransportError>;

    /// Publish (or replace) this subscriber's presence entry.
    fn track(&self, meta: Participant) -> Result<(), TransportError>;

    /// Withdraw this subscriber's presence entry.
    fn untrack(&self) -> Result<(), TransportError>;

    /// Current presence list.
    fn presence(&self) -> Vec<Participant>;
}

/// Source of subscriptions.
pub trait Transport: Send + Sync {
    /// Subscribe `member` to `topic`.
    fn subscribe(&self, topic: &str, member: ParticipantId) -> Result<Subscription, TransportError>;
}

/// Raw event as it travels through the hub.
#[derive(Debug, Clone)]
enum Wire {
    Broadcast { from: ParticipantId, payload: Arc<str> },
    Presence(Vec<Participant>),
}

/// A live subscription: the outgoing channel plus the incoming event queue.
pub struct Subscription {
    channel: Arc<dyn Channel>,
    events: mpsc::UnboundedReceiver<Wire>,
}

impl Subscription {
    /// Outgoing half, shareable.
    pub fn channel(&self) -> Arc<dyn Channel> {
        Arc::clone(&self.channel)
    }

    /// Next event. `None` once the topic is gone.
    ///
    /// Payloads that do not decode are logged and skipped.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        loop {
            match self.events.recv().await? {
                Wire::Presence(list) => return Some(ChannelEvent::PresenceSync(list)),
                Wire::Broadcast { from, payload } => match Broadcast::from_json(&payload) {
                    Ok(message) => return Some(ChannelEvent::Broadcast { from, message }),
                    Err(e) => {
                        warn!(topic = self.channel.topic(), from = %from.short(), error = %e, "Dropping malformed broadcast");
                    }
                },
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<ChannelEvent> {
        loop {
            match self.events.try_recv().ok()? {
                Wire::Presence(list) => return Some(ChannelEvent::PresenceSync(list)),
                Wire::Broadcast { from, payload } => {
                    if let Ok(message) = Broadcast::from_json(&payload) {
                        return Some(ChannelEvent::Broadcast { from, message });
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("topic", &self.channel.topic()).finish()
    }
}

// =============================================================================
// IN-MEMORY HUB
// =============================================================================

struct Subscriber {
    tx: mpsc::UnboundedSender<Wire>,
    presence: Option<Participant>,
}

#[derive(Default)]
struct Topic {
    subscribers: BTreeMap<u64, Subscriber>,
}

impl Topic {
    fn presence(&self) -> Vec<Participant> {
        self.subscribers.values().filter_map(|s| s.presence.clone()).collect()
    }

    fn sync_presence(&mut self) {
        let list = self.presence();
        self.subscribers.retain(|_, s| s.tx.send(Wire::Presence(list.clone())).is_ok());
    }
}

#[derive(Default)]
struct HubState {
    topics: BTreeMap<String, Topic>,
    next_id: u64,
    failing_subscribes: u32,
}

/// In-process broadcast hub.
#[derive(Clone, Default)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl MemoryHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` subscribe calls fail.
    pub fn fail_next_subscribes(&self, n: u32) {
        lock(&self.state).failing_subscribes = n;
    }

    /// Number of subscribers on a topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        lock(&self.state).topics.get(topic).map_or(0, |t| t.subscribers.len())
    }
}

impl Transport for MemoryHub {
    fn subscribe(&self, topic: &str, member: ParticipantId) -> Result<Subscription, TransportError> {
        let mut state = lock(&self.state);
        if state.failing_subscribes > 0 {
            state.failing_subscribes -= 1;
            return Err(TransportError::SubscribeFailed(topic.to_string()));
        }

        let id = state.next_id;
        state.next_id += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        state
            .topics
            .entry(topic.to_string())
            .or_default()
            .subscribers
            .insert(id, Subscriber { tx, presence: None });
        debug!(topic, member = %member.short(), "Subscribed");

        let channel = MemoryChannel {
            state: Arc::clone(&self.state),
            topic: topic.to_string(),
            id,
            member,
        };
        Ok(Subscription { channel: Arc::new(channel), events: rx })
    }
}

/// Outgoing half of a hub subscription.
struct MemoryChannel {
    state: Arc<Mutex<HubState>>,
    topic: String,
    id: u64,
    member: ParticipantId,
}

impl MemoryChannel {
    fn with_topic<T>(&self, f: impl FnOnce(&mut Topic) -> T) -> Result<T, TransportError> {
        let mut state = lock(&self.state);
        let topic = state.topics.get_mut(&self.topic).ok_or(TransportError::Closed)?;
        if !topic.subscribers.contains_key(&self.id) {
            return Err(TransportError::Closed);
        }
        Ok(f(topic))
    }
}

impl Channel for MemoryChannel {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn broadcast(&self, message: &Broadcast) -> Result<(), TransportError> {
        let payload: Arc<str> = message
            .to_json()
            .map_err(|e| TransportError::Encode(e.to_string()))?
            .into();
        trace!(topic = %self.topic, event = message.name(), "Broadcast");
        self.with_topic(|topic| {
            for (id, sub) in &topic.subscribers {
                if *id == self.id {
                    continue;
                }
                // A closed receiver is cleaned up on the next presence sync.
                let _ = sub.tx.send(Wire::Broadcast { from: self.member, payload: Arc::clone(&payload) });
            }
        })
    }

    fn track(&self, meta: Participant) -> Result<(), TransportError> {
        self.with_topic(|topic| {
            if let Some(sub) = topic.subscribers.get_mut(&self.id) {
                sub.presence = Some(meta);
            }
            topic.sync_presence();
        })
    }

    fn untrack(&self) -> Result<(), TransportError> {
        self.with_topic(|topic| {
            if let Some(sub) = topic.subscribers.get_mut(&self.id) {
                sub.presence = None;
            }
            topic.sync_presence();
        })
    }

    fn presence(&self) -> Vec<Participant> {
        self.with_topic(|topic| topic.presence()).unwrap_or_default()
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        let Some(topic) = state.topics.get_mut(&self.topic) else {
            return;
        };
        let had_presence = topic
            .subscribers
            .remove(&self.id)
            .map_or(false, |s| s.presence.is_some());
        if had_presence {
            topic.sync_presence();
        }
        if topic.subscribers.is_empty() {
            state.topics.remove(&self.topic);
        }
        debug!(topic = %self.topic, member = %self.member.short(), "Unsubscribed");
    }
}

fn lock(state: &Mutex<HubState>) -> MutexGuard<'_, HubState> {
    // Ignore poisoning.
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
