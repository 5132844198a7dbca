//! Client identifiers and broadcast events.

use std::{borrow::Borrow, fmt, sync::Arc};

use chitchat_proto::{BroadcastEvent, EventKind};

use crate::{clock::LogicalTimestamp, error::EngineError};

/// Opaque, caller-supplied participant identifier.
///
/// # Invariants
///
/// Never empty. The only constructor is [`ClientId::new`], which rejects the
/// empty string, so every engine operation receives a validated id.
///
/// Uniqueness is not enforced; see [`crate::SubscriberRegistry::register`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(Arc<str>);

impl ClientId {
    /// Validate and wrap a raw identifier.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, EngineError> {
        let raw = raw.as_ref();
        if raw.is_empty() {
            return Err(EngineError::InvalidArgument("client id must not be empty".to_string()));
        }
        Ok(Self(Arc::from(raw)))
    }

    /// Identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ClientId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Immutable event fanned out to every subscriber.
///
/// Built once per accepted operation and shared by reference between all
/// outbound channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    kind: EventKind,
    client_id: ClientId,
    timestamp: LogicalTimestamp,
    message: Option<String>,
}

impl Event {
    /// Join event for `client_id`.
    pub fn join(client_id: ClientId, timestamp: LogicalTimestamp) -> Self {
        Self { kind: EventKind::Join, client_id, timestamp, message: None }
    }

    /// Chat event carrying `message`.
    pub fn chat(client_id: ClientId, timestamp: LogicalTimestamp, message: String) -> Self {
        Self { kind: EventKind::Chat, client_id, timestamp, message: Some(message) }
    }

    /// Leave event for `client_id`.
    pub fn leave(client_id: ClientId, timestamp: LogicalTimestamp) -> Self {
        Self { kind: EventKind::Leave, client_id, timestamp, message: None }
    }

    /// Event kind.
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Originating client.
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Logical timestamp assigned at emission.
    pub fn timestamp(&self) -> LogicalTimestamp {
        self.timestamp
    }

    /// Message text. Only present for chat events.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl From<&Event> for BroadcastEvent {
    fn from(event: &Event) -> Self {
        Self {
            kind: event.kind,
            client_id: event.client_id.to_string(),
            timestamp: event.timestamp.get(),
            message: event.message.clone().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_client_id_is_rejected() {
        assert!(matches!(ClientId::new(""), Err(EngineError::InvalidArgument(_))));
        assert_eq!(ClientId::new("alice").map(|id| id.to_string()), Ok("alice".to_string()));
    }

    #[test]
    fn only_chat_carries_message() {
        let alice = ClientId::new("alice").unwrap();
        let ts = LogicalTimestamp::new(7);

        assert_eq!(Event::join(alice.clone(), ts).message(), None);
        assert_eq!(Event::leave(alice.clone(), ts).message(), None);
        assert_eq!(Event::chat(alice, ts, "hi".to_string()).message(), Some("hi"));
    }

    #[test]
    fn wire_event_has_empty_message_for_join() {
        let event = Event::join(ClientId::new("bob").unwrap(), LogicalTimestamp::new(2));
        let wire = BroadcastEvent::from(&event);

        assert_eq!(wire.kind, EventKind::Join);
        assert_eq!(wire.client_id, "bob");
        assert_eq!(wire.timestamp, 2);
        assert!(wire.message.is_empty());
    }
}
