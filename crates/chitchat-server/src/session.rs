//! Subscription sessions.
//!
//! A [`SubscriptionSession`] is the server-side lifetime of one Subscribe
//! call. Opening it registers an outbound channel and broadcasts Join; the
//! session then pumps events from that channel into an [`EventSink`] until
//! one of three things happens:
//!
//! - the caller's cancellation future resolves (connection closed),
//! - the sink fails (client stopped reading),
//! - the registry dropped the channel (explicit Leave or replacement by a
//!   newer session with the same id).
//!
//! Cleanup runs in `Drop`, so it also happens when the owning task is
//! aborted or the future is dropped mid-await.

use std::{future::Future, sync::Arc};

use tokio::sync::mpsc;

use crate::{
    engine::BroadcastEngine,
    error::EngineError,
    event::{ClientId, Event},
    registry::ChannelId,
};

/// Destination for the events of one session.
///
/// Implemented by the QUIC stream writer; tests use in-memory sinks.
pub trait EventSink: Send {
    /// Error reported when the sink can no longer accept events.
    type Error: std::fmt::Display + Send;

    /// Write one event to the subscriber.
    fn deliver(&mut self, event: &Event) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Why [`SubscriptionSession::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Cancellation future resolved.
    Cancelled,
    /// Sink rejected an event.
    SinkClosed,
    /// Registry entry was removed; all buffered events were delivered.
    Removed,
}

/// Server-side state of one live subscription.
#[derive(Debug)]
pub struct SubscriptionSession {
    engine: Arc<BroadcastEngine>,
    client_id: ClientId,
    channel: ChannelId,
    rx: mpsc::Receiver<Arc<Event>>,
}

impl SubscriptionSession {
    /// Register `client_id` and broadcast its Join.
    ///
    /// The returned session's first event is its own Join.
    pub fn open(engine: Arc<BroadcastEngine>, client_id: ClientId) -> Result<Self, EngineError> {
        let (channel, rx) = engine.open_channel();
        let channel_id = channel.id();
        engine.join(client_id.clone(), channel)?;

        Ok(Self { engine, client_id, channel: channel_id, rx })
    }

    /// Subscribed client.
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Next buffered or future event. `None` once the registry dropped the
    /// channel and the buffer is empty.
    pub async fn next_event(&mut self) -> Option<Arc<Event>> {
        self.rx.recv().await
    }

    /// Pump events into `sink` until cancelled, the sink fails, or the
    /// session is removed. Consumes the session; cleanup runs on return.
    pub async fn run<S, F>(mut self, sink: &mut S, cancelled: F) -> SessionEnd
    where
        S: EventSink,
        F: Future<Output = ()>,
    {
        tokio::pin!(cancelled);

        loop {
            tokio::select! {
                biased;

                () = &mut cancelled => {
                    tracing::debug!(client_id = %self.client_id, "subscription cancelled");
                    return SessionEnd::Cancelled;
                }

                event = self.rx.recv() => {
                    let Some(event) = event else {
                        tracing::debug!(client_id = %self.client_id, "subscription removed");
                        return SessionEnd::Removed;
                    };

                    if let Err(e) = sink.deliver(&event).await {
                        tracing::debug!(
                            client_id = %self.client_id,
                            logical_time = %event.timestamp(),
                            error = %e,
                            "subscriber stopped reading"
                        );
                        return SessionEnd::SinkClosed;
                    }
                }
            }
        }
    }
}

impl Drop for SubscriptionSession {
    fn drop(&mut self) {
        self.rx.close();

        if let Err(e) = self.engine.on_session_end(&self.client_id, self.channel) {
            tracing::error!(client_id = %self.client_id, error = %e, "session cleanup failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::future;

    use chitchat_proto::EventKind;

    use super::*;
    use crate::clock::LogicalTimestamp;

    #[derive(Default)]
    struct VecSink {
        events: Vec<(EventKind, String, i64)>,
        fail_after: Option<usize>,
    }

    impl EventSink for VecSink {
        type Error = &'static str;

        async fn deliver(&mut self, event: &Event) -> Result<(), Self::Error> {
            if self.fail_after.is_some_and(|n| self.events.len() >= n) {
                return Err("sink closed");
            }
            self.events.push((event.kind(), event.client_id().to_string(), event.timestamp().get()));
            Ok(())
        }
    }

    fn id(raw: &str) -> ClientId {
        ClientId::new(raw).unwrap()
    }

    #[tokio::test]
    async fn leave_ends_session_after_buffered_events() {
        let engine = Arc::new(BroadcastEngine::default());
        let session = SubscriptionSession::open(Arc::clone(&engine), id("alice")).unwrap();

        engine.publish(&id("alice"), "hi").unwrap();
        engine.leave(&id("alice")).unwrap();

        let mut sink = VecSink::default();
        let end = session.run(&mut sink, future::pending()).await;

        assert_eq!(end, SessionEnd::Removed);
        assert_eq!(sink.events, vec![
            (EventKind::Join, "alice".to_string(), 1),
            (EventKind::Chat, "alice".to_string(), 2),
        ]);
        assert_eq!(engine.now(), LogicalTimestamp::new(3));
    }

    #[tokio::test]
    async fn cancellation_broadcasts_leave() {
        let engine = Arc::new(BroadcastEngine::default());
        let mut observer = SubscriptionSession::open(Arc::clone(&engine), id("bob")).unwrap();
        let session = SubscriptionSession::open(Arc::clone(&engine), id("alice")).unwrap();

        let mut sink = VecSink::default();
        let end = session.run(&mut sink, future::ready(())).await;
        assert_eq!(end, SessionEnd::Cancelled);

        let mut seen = Vec::new();
        while let Ok(event) = observer.rx.try_recv() {
            seen.push((event.kind(), event.client_id().to_string()));
        }
        assert_eq!(seen, vec![
            (EventKind::Join, "bob".to_string()),
            (EventKind::Join, "alice".to_string()),
            (EventKind::Leave, "alice".to_string()),
        ]);
        assert_eq!(engine.snapshot(), vec![id("bob")]);
    }

    #[tokio::test]
    async fn failing_sink_removes_subscriber() {
        let engine = Arc::new(BroadcastEngine::default());
        let session = SubscriptionSession::open(Arc::clone(&engine), id("alice")).unwrap();

        let mut sink = VecSink { fail_after: Some(0), ..VecSink::default() };
        let end = session.run(&mut sink, future::pending()).await;

        assert_eq!(end, SessionEnd::SinkClosed);
        assert!(!engine.is_subscribed(&id("alice")));
        assert_eq!(engine.now(), LogicalTimestamp::new(2));
    }

    #[tokio::test]
    async fn replaced_session_does_not_evict_newer_one() {
        let engine = Arc::new(BroadcastEngine::default());
        let old = SubscriptionSession::open(Arc::clone(&engine), id("alice")).unwrap();
        let mut new = SubscriptionSession::open(Arc::clone(&engine), id("alice")).unwrap();

        let mut sink = VecSink::default();
        assert_eq!(old.run(&mut sink, future::pending()).await, SessionEnd::Removed);

        assert!(engine.is_subscribed(&id("alice")));
        assert_eq!(engine.now(), LogicalTimestamp::new(2));

        let join = new.next_event().await.unwrap();
        assert_eq!(join.timestamp(), LogicalTimestamp::new(2));
    }
}
