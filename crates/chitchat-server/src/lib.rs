//! ChitChat broadcast server.
//!
//! Clients publish short text messages and receive every message published
//! by any client, tagged with a server-assigned logical timestamp.
//!
//! # Architecture
//!
//! The broadcast core is synchronous and transport-agnostic:
//!
//! - [`LogicalClock`]: gapless server-wide counter
//! - [`SubscriberRegistry`]: client id to outbound channel mapping
//! - [`BroadcastEngine`]: Join/Publish/Leave, one critical section per event
//! - [`SubscriptionSession`]: lifetime of one Subscribe call
//!
//! [`ChatService`] maps wire requests onto the engine without doing I/O.
//! [`Server`] drives it over QUIC: one task per connection, one task per
//! bidirectional stream, one stream per call.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod engine;
mod error;
mod event;
mod registry;
mod service;
mod session;
mod transport;

use std::{net::SocketAddr, sync::Arc};

use chitchat_proto::{ErrorPayload, Payload};
pub use clock::{LogicalClock, LogicalTimestamp};
pub use engine::{
    Broadcast, BroadcastEngine, DEFAULT_OUTBOUND_CAPACITY, DeliveryFailure, EngineConfig,
    MAX_MESSAGE_LEN,
};
pub use error::{EngineError, ServerError};
pub use event::{ClientId, Event};
pub use registry::{ChannelId, DeliveryError, OutboundChannel, SubscriberRegistry};
pub use service::ChatService;
pub use session::{EventSink, SessionEnd, SubscriptionSession};
pub use transport::{QuicEventSink, QuinnTransport, read_frame, write_frame, write_payload};

/// Default listen port.
pub const DEFAULT_PORT: u16 = 50051;

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to (e.g., "0.0.0.0:50051")
    pub bind_address: String,
    /// Path to TLS certificate (PEM format)
    pub cert_path: Option<String>,
    /// Path to TLS private key (PEM format)
    pub key_path: Option<String>,
    /// Broadcast engine limits
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: format!("0.0.0.0:{DEFAULT_PORT}"),
            cert_path: None,
            key_path: None,
            engine: EngineConfig::default(),
        }
    }
}

/// Production ChitChat server.
pub struct Server {
    service: ChatService,
    transport: QuinnTransport,
}

impl Server {
    /// Create and bind a new server.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let transport = QuinnTransport::bind(
            &config.bind_address,
            config.cert_path.as_deref(),
            config.key_path.as_deref(),
        )?;
        let service = ChatService::new(Arc::new(BroadcastEngine::new(config.engine)));

        Ok(Self { service, transport })
    }

    /// Shared broadcast engine.
    pub fn engine(&self) -> &Arc<BroadcastEngine> {
        self.service.engine()
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.transport.local_addr()
    }

    /// Accept connections until the endpoint is closed.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!(addr = %self.transport.local_addr()?, "server starting");

        while let Some(incoming) = self.transport.accept().await {
            let service = self.service.clone();
            tokio::spawn(handle_connection(incoming, service));
        }

        tracing::info!("endpoint closed, server stopping");
        Ok(())
    }
}

fn connection_id() -> u64 {
    let mut buf = [0u8; 8];
    if let Err(e) = getrandom::fill(&mut buf) {
        tracing::debug!(error = %e, "no OS randomness for connection id");
    }
    u64::from_le_bytes(buf)
}

/// Handle a single QUIC connection, from handshake to close.
async fn handle_connection(incoming: quinn::Incoming, service: ChatService) {
    let conn_id = connection_id();
    let conn = match incoming.await {
        Ok(conn) => conn,
        Err(e) => {
            tracing::warn!(conn_id, error = %e, "handshake failed");
            return;
        },
    };
    tracing::debug!(conn_id, remote = %conn.remote_address(), "connection accepted");

    loop {
        match conn.accept_bi().await {
            Ok((send, recv)) => {
                let conn = conn.clone();
                let service = service.clone();

                tokio::spawn(async move {
                    if let Err(e) = handle_stream(&conn, &service, send, recv).await {
                        tracing::warn!(conn_id, error = %e, "stream error");
                    }
                });
            },
            Err(e) => {
                tracing::debug!(conn_id, reason = %e, "connection closed");
                break;
            },
        }
    }
}

/// Handle one call: read the request frame, answer it, finish the stream.
async fn handle_stream(
    conn: &quinn::Connection,
    service: &ChatService,
    mut send: quinn::SendStream,
    mut recv: quinn::RecvStream,
) -> Result<(), ServerError> {
    let frame = match read_frame(&mut recv).await {
        Ok(Some(frame)) => frame,
        Ok(None) => return Ok(()),
        Err(e @ ServerError::Protocol(_)) => {
            let reply = Payload::Error(ErrorPayload::invalid_payload(e.to_string()));
            write_payload(&mut send, reply, 0).await?;
            finish(&mut send);
            return Err(e);
        },
        Err(e) => return Err(e),
    };

    let request_id = frame.header.request_id();
    tracing::debug!(opcode = frame.header.opcode(), request_id, "request received");

    let payload = match Payload::from_frame(&frame) {
        Ok(payload) => payload,
        Err(e) => {
            let reply = Payload::Error(ErrorPayload::invalid_payload(e.to_string()));
            write_payload(&mut send, reply, request_id).await?;
            finish(&mut send);
            return Err(e.into());
        },
    };

    match payload {
        Payload::Subscribe(request) => match service.subscribe(&request) {
            Ok(session) => {
                let client_id = session.client_id().clone();
                let cancel = cancelled(conn, send.stopped());
                let mut sink = QuicEventSink::new(&mut send, request_id);
                let end = session.run(&mut sink, cancel).await;
                tracing::debug!(client_id = %client_id, ?end, "subscription ended");
            },
            Err(e) => {
                let reply = Payload::Error(subscribe_error(&e));
                write_payload(&mut send, reply, request_id).await?;
            },
        },
        Payload::Publish(request) => {
            let reply = Payload::PublishAck(service.publish(&request));
            write_payload(&mut send, reply, request_id).await?;
        },
        Payload::Leave(request) => {
            let reply = Payload::LeaveAck(service.leave(&request));
            write_payload(&mut send, reply, request_id).await?;
        },
        other => {
            tracing::warn!(opcode = ?other.opcode(), "unexpected request");
            let reply = Payload::Error(ErrorPayload::unexpected_opcode(frame.header.opcode()));
            write_payload(&mut send, reply, request_id).await?;
        },
    }

    finish(&mut send);
    Ok(())
}

/// Resolves when the connection closes or the peer stops reading the
/// subscription stream.
async fn cancelled(
    conn: &quinn::Connection,
    stopped: impl Future<Output = Result<Option<quinn::VarInt>, quinn::StoppedError>>,
) {
    tokio::select! {
        _ = conn.closed() => {},
        result = stopped => {
            tracing::debug!(?result, "subscription stream stopped by peer");
        },
    }
}

fn subscribe_error(err: &EngineError) -> ErrorPayload {
    match err {
        EngineError::InvalidArgument(_) => ErrorPayload::invalid_argument(err.to_string()),
        EngineError::Overflow => ErrorPayload::internal(err.to_string()),
    }
}

fn finish(send: &mut quinn::SendStream) {
    if let Err(e) = send.finish() {
        tracing::debug!(error = %e, "stream already closed");
    }
}
