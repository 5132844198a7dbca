//! Broadcast engine.
//!
//! Owns the logical clock and the subscriber registry and serializes every
//! timestamp-assigning operation (Join, Publish, Leave, session end) behind a
//! single lock. Inside the critical section an operation:
//!
//! 1. validates and mutates the registry,
//! 2. advances the clock,
//! 3. builds the event,
//! 4. fans it out to a registry snapshot.
//!
//! Sends are non-blocking (`try_send` into bounded per-subscriber channels),
//! so fanning out under the lock is cheap and guarantees that every
//! subscriber receives events in timestamp order. A full or closed channel is
//! a per-target [`DeliveryFailure`]; it is logged and never fails the
//! operation.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::{
    clock::{LogicalClock, LogicalTimestamp},
    error::EngineError,
    event::{ClientId, Event},
    registry::{ChannelId, DeliveryError, OutboundChannel, SubscriberRegistry},
};

/// Maximum chat message length in bytes.
pub const MAX_MESSAGE_LEN: usize = 128;

/// Default number of undelivered events buffered per subscriber.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Longest accepted message, in bytes
    pub max_message_len: usize,
    /// Per-subscriber outbound buffer size, in events
    pub outbound_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { max_message_len: MAX_MESSAGE_LEN, outbound_capacity: DEFAULT_OUTBOUND_CAPACITY }
    }
}

/// Failed delivery of one event to one subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    /// Subscriber that missed the event
    pub client_id: ClientId,
    /// Why the send failed
    pub error: DeliveryError,
}

/// Outcome of one fan-out.
#[derive(Debug, Clone)]
pub struct Broadcast {
    /// The stamped event
    pub event: Arc<Event>,
    /// Subscribers the event was enqueued for
    pub delivered: usize,
    /// Subscribers the event could not be enqueued for
    pub failures: Vec<DeliveryFailure>,
}

impl Broadcast {
    /// Timestamp assigned to the event.
    pub fn timestamp(&self) -> LogicalTimestamp {
        self.event.timestamp()
    }
}

/// Why a subscriber is being removed.
#[derive(Debug, Clone, Copy)]
enum Departure {
    /// Client called Leave.
    Leave,
    /// The transport tore down the session holding this channel.
    SessionEnd(ChannelId),
}

#[derive(Debug, Default)]
struct EngineState {
    clock: LogicalClock,
    registry: SubscriberRegistry,
}

impl EngineState {
    /// Deliver `event` to every registered subscriber.
    fn fan_out(&self, event: Event) -> Broadcast {
        let event = Arc::new(event);
        let mut delivered = 0;
        let mut failures = Vec::new();

        for (client_id, channel) in self.registry.snapshot_all() {
            match channel.send(&event) {
                Ok(()) => delivered += 1,
                Err(error) => failures.push(DeliveryFailure { client_id, error }),
            }
        }

        Broadcast { event, delivered, failures }
    }
}

/// Join/Publish/Leave orchestrator.
///
/// Shared between connection tasks behind an `Arc`. All methods are
/// synchronous and never hold the lock across an await point.
#[derive(Debug)]
pub struct BroadcastEngine {
    state: Mutex<EngineState>,
    config: EngineConfig,
}

impl Default for BroadcastEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl BroadcastEngine {
    /// Create an engine with an empty registry and the clock at zero.
    pub fn new(config: EngineConfig) -> Self {
        Self { state: Mutex::new(EngineState::default()), config }
    }

    /// Create an engine whose clock resumes from `start`.
    pub fn with_clock(config: EngineConfig, start: LogicalTimestamp) -> Self {
        let state = EngineState { clock: LogicalClock::starting_at(start), ..Default::default() };
        Self { state: Mutex::new(state), config }
    }

    /// Create an outbound channel sized by the configuration.
    pub fn open_channel(
        &self,
    ) -> (OutboundChannel, tokio::sync::mpsc::Receiver<Arc<Event>>) {
        OutboundChannel::new(self.config.outbound_capacity)
    }

    // A panic while holding the lock cannot leave the state half-updated:
    // every mutation happens after the last fallible step.
    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `channel` for `id` and broadcast a Join event.
    ///
    /// The new subscriber is part of the snapshot and receives its own Join,
    /// which anchors its view of logical time. A previous registration under
    /// the same id is replaced.
    pub fn join(&self, id: ClientId, channel: OutboundChannel) -> Result<Broadcast, EngineError> {
        let (broadcast, replaced) = {
            let mut state = self.lock();
            let timestamp = state.clock.advance()?;
            let replaced = state.registry.register(id.clone(), channel);
            (state.fan_out(Event::join(id.clone(), timestamp)), replaced)
        };

        if replaced.is_some() {
            tracing::warn!(client_id = %id, "duplicate client id replaced an existing subscription");
        }

        tracing::info!(
            client_id = %id,
            logical_time = %broadcast.timestamp(),
            "participant joined"
        );
        log_failures(&broadcast);

        Ok(broadcast)
    }

    /// Broadcast a chat message from `id`.
    ///
    /// Messages longer than [`EngineConfig::max_message_len`] bytes are
    /// rejected before the clock is touched. The sender need not be
    /// subscribed; if it is, it receives its own message.
    pub fn publish(&self, id: &ClientId, text: &str) -> Result<Broadcast, EngineError> {
        if text.len() > self.config.max_message_len {
            tracing::debug!(client_id = %id, len = text.len(), "rejected oversized message");
            return Err(EngineError::message_too_long(text.len(), self.config.max_message_len));
        }

        let broadcast = {
            let mut state = self.lock();
            let timestamp = state.clock.advance()?;
            state.fan_out(Event::chat(id.clone(), timestamp, text.to_string()))
        };

        tracing::info!(
            client_id = %id,
            logical_time = %broadcast.timestamp(),
            content = ?text,
            "message published"
        );
        log_failures(&broadcast);

        Ok(broadcast)
    }

    /// Explicit, client-initiated removal.
    ///
    /// Returns `Ok(None)` without advancing the clock when `id` is not
    /// subscribed, so repeated calls are harmless.
    pub fn leave(&self, id: &ClientId) -> Result<Option<Broadcast>, EngineError> {
        self.depart(id, Departure::Leave)
    }

    /// Transport-initiated removal after a subscription session ended.
    ///
    /// Only removes the entry registered through `channel`; if an explicit
    /// Leave or a newer session with the same id got there first, this is a
    /// no-op.
    pub fn on_session_end(
        &self,
        id: &ClientId,
        channel: ChannelId,
    ) -> Result<Option<Broadcast>, EngineError> {
        self.depart(id, Departure::SessionEnd(channel))
    }

    fn depart(&self, id: &ClientId, departure: Departure) -> Result<Option<Broadcast>, EngineError> {
        let broadcast = {
            let mut state = self.lock();

            let present = match departure {
                Departure::Leave => state.registry.contains(id),
                Departure::SessionEnd(channel) => state.registry.contains_channel(id, channel),
            };
            if !present {
                return Ok(None);
            }

            let timestamp = state.clock.advance()?;
            let removed = state.registry.unregister(id);
            debug_assert!(removed);

            state.fan_out(Event::leave(id.clone(), timestamp))
        };

        let reason = match departure {
            Departure::Leave => "leave",
            Departure::SessionEnd(_) => "disconnect",
        };
        tracing::info!(
            client_id = %id,
            logical_time = %broadcast.timestamp(),
            reason,
            "participant left"
        );
        log_failures(&broadcast);

        Ok(Some(broadcast))
    }

    /// Last assigned timestamp.
    pub fn now(&self) -> LogicalTimestamp {
        self.lock().clock.now()
    }

    /// Number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.lock().registry.len()
    }

    /// Whether `id` is currently subscribed.
    pub fn is_subscribed(&self, id: &ClientId) -> bool {
        self.lock().registry.contains(id)
    }

    /// Ids of current subscribers, in registry order.
    pub fn snapshot(&self) -> Vec<ClientId> {
        self.lock().registry.snapshot_all().into_iter().map(|(id, _)| id).collect()
    }
}

fn log_failures(broadcast: &Broadcast) {
    for failure in &broadcast.failures {
        tracing::warn!(
            client_id = %failure.client_id,
            kind = %broadcast.event.kind(),
            logical_time = %broadcast.timestamp(),
            error = %failure.error,
            "failed to deliver broadcast"
        );
    }
}
