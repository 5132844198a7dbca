//! Subscriber registry.
//!
//! Maps each client id to the outbound channel of its live subscription
//! session. The registry only stores and looks up; it never sends. Callers
//! take a [`SubscriberRegistry::snapshot_all`] and fan out over the copy.
//!
//! The receiving half of every channel is owned by the transport (one
//! subscription session per channel). The registry holds a sender used only
//! for delivery; dropping the entry closes the channel once any in-flight
//! events are drained, which ends the session's stream.

use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::event::{ClientId, Event};

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Per-target delivery failure. Logged by the engine, never propagated.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// Subscriber is not draining its channel fast enough; the event is
    /// dropped for that subscriber.
    #[error("outbound channel full")]
    Full,

    /// Subscriber's session is gone.
    #[error("outbound channel closed")]
    Closed,
}

/// Process-unique identity of an outbound channel.
///
/// Distinguishes two sessions registered under the same client id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(u64);

/// Sending half of a subscriber's event channel.
///
/// Cloning is cheap and yields a handle to the same channel (same
/// [`ChannelId`]).
#[derive(Debug, Clone)]
pub struct OutboundChannel {
    id: ChannelId,
    tx: mpsc::Sender<Arc<Event>>,
}

impl OutboundChannel {
    /// Create a bounded channel holding up to `capacity` undelivered events.
    ///
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Arc<Event>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = ChannelId(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed));
        (Self { id, tx }, rx)
    }

    /// Channel identity.
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Enqueue `event` without waiting.
    pub fn send(&self, event: &Arc<Event>) -> Result<(), DeliveryError> {
        self.tx.try_send(Arc::clone(event)).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

/// Mapping from client id to outbound channel.
///
/// Iteration order is the client id order, which keeps snapshots
/// deterministic.
#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    entries: BTreeMap<ClientId, OutboundChannel>,
}

impl SubscriberRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `id`.
    ///
    /// Duplicate ids are last-write-wins. The replaced channel is returned so
    /// the caller can report it; dropping it closes the earlier session's
    /// stream.
    pub fn register(&mut self, id: ClientId, channel: OutboundChannel) -> Option<OutboundChannel> {
        self.entries.insert(id, channel)
    }

    /// Remove the entry for `id`. Returns whether an entry was present.
    pub fn unregister(&mut self, id: &ClientId) -> bool {
        self.entries.remove(id).is_some()
    }

    /// Point-in-time copy of all entries for iteration outside the registry.
    pub fn snapshot_all(&self) -> Vec<(ClientId, OutboundChannel)> {
        self.entries.iter().map(|(id, channel)| (id.clone(), channel.clone())).collect()
    }

    /// Whether `id` is currently subscribed.
    pub fn contains(&self, id: &ClientId) -> bool {
        self.entries.contains_key(id)
    }

    /// Whether `id` is subscribed through `channel`.
    ///
    /// Session teardown checks this first so a stale session cannot evict a
    /// newer session that replaced it under the same id.
    pub fn contains_channel(&self, id: &ClientId, channel: ChannelId) -> bool {
        self.entries.get(id).is_some_and(|entry| entry.id() == channel)
    }

    /// Number of subscribers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nobody is subscribed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
