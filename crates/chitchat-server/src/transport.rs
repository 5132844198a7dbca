//! Quinn-based QUIC transport.
//!
//! Encrypted, multiplexed streams over UDP with TLS 1.3. Supports production
//! TLS certificates (PEM files) and self-signed certificates for local runs.
//! ALPN is set to `chitchat`.
//!
//! Every call uses its own bidirectional stream carrying length-delimited
//! [`Frame`]s: one request frame from the client, then one response frame
//! (Publish, Leave) or a stream of Broadcast frames (Subscribe).

use std::{net::SocketAddr, sync::Arc};

use chitchat_proto::{ALPN_PROTOCOL, BroadcastEvent, Frame, FrameHeader, Payload};
use quinn::{Endpoint, ReadExactError, RecvStream, SendStream, ServerConfig};

use crate::{error::ServerError, event::Event, session::EventSink};

/// QUIC listener.
///
/// Self-signed certificates (`bind(addr, None, None)`) log a warning and are
/// only suitable for local testing; clients must skip verification to use
/// them.
pub struct QuinnTransport {
    endpoint: Endpoint,
}

impl QuinnTransport {
    /// Create and bind a QUIC endpoint.
    ///
    /// If `cert_path` and `key_path` are both provided they are used for TLS,
    /// otherwise a self-signed certificate for `localhost` is generated.
    pub fn bind(
        address: &str,
        cert_path: Option<&str>,
        key_path: Option<&str>,
    ) -> Result<Self, ServerError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid bind address '{address}': {e}")))?;

        let server_config = match (cert_path, key_path) {
            (Some(cert), Some(key)) => load_tls_config(cert, key)?,
            (None, None) => generate_self_signed_config()?,
            _ => {
                return Err(ServerError::Config(
                    "cert and key must be provided together".to_string(),
                ));
            },
        };

        let endpoint = Endpoint::server(server_config, addr)
            .map_err(|e| ServerError::Transport(format!("failed to create endpoint: {e}")))?;

        tracing::info!(%addr, "QUIC transport bound");

        Ok(Self { endpoint })
    }

    /// Wait for the next incoming connection attempt.
    ///
    /// The handshake is left to the caller. Returns `None` once the endpoint
    /// is closed.
    pub async fn accept(&self) -> Option<quinn::Incoming> {
        self.endpoint.accept().await
    }

    /// Local address the transport is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.endpoint
            .local_addr()
            .map_err(|e| ServerError::Transport(format!("failed to get local address: {e}")))
    }
}

/// Read one frame. `Ok(None)` if the peer finished the stream cleanly
/// before sending anything.
pub async fn read_frame(recv: &mut RecvStream) -> Result<Option<Frame>, ServerError> {
    let mut buf = vec![0u8; FrameHeader::SIZE];
    match recv.read_exact(&mut buf).await {
        Ok(()) => {},
        Err(ReadExactError::FinishedEarly(0)) => return Ok(None),
        Err(e) => return Err(ServerError::Transport(format!("read header failed: {e}"))),
    }

    let payload_len = FrameHeader::from_bytes(&buf)?.payload_size() as usize;
    buf.resize(FrameHeader::SIZE + payload_len, 0);
    recv.read_exact(&mut buf[FrameHeader::SIZE..])
        .await
        .map_err(|e| ServerError::Transport(format!("read payload failed: {e}")))?;

    Ok(Some(Frame::decode(&buf)?))
}

/// Write one frame.
pub async fn write_frame(send: &mut SendStream, frame: &Frame) -> Result<(), ServerError> {
    let bytes = frame.to_vec()?;
    send.write_all(&bytes)
        .await
        .map_err(|e| ServerError::Transport(format!("write failed: {e}")))
}

/// Encode `payload` under `request_id` and write it.
pub async fn write_payload(
    send: &mut SendStream,
    payload: Payload,
    request_id: u32,
) -> Result<(), ServerError> {
    let frame = payload.into_frame(request_id)?;
    write_frame(send, &frame).await
}

/// Writes session events as Broadcast frames on a subscription stream.
pub struct QuicEventSink<'a> {
    send: &'a mut SendStream,
    request_id: u32,
}

impl<'a> QuicEventSink<'a> {
    /// Sink writing to `send`, echoing `request_id` in every frame.
    pub fn new(send: &'a mut SendStream, request_id: u32) -> Self {
        Self { send, request_id }
    }
}

impl EventSink for QuicEventSink<'_> {
    type Error = ServerError;

    async fn deliver(&mut self, event: &Event) -> Result<(), ServerError> {
        let payload = Payload::Broadcast(BroadcastEvent::from(event));
        write_payload(&mut *self.send, payload, self.request_id).await
    }
}

fn quic_config(mut tls_config: rustls::ServerConfig) -> Result<ServerConfig, ServerError> {
    tls_config.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

    let crypto = quinn::crypto::rustls::QuicServerConfig::try_from(tls_config)
        .map_err(|e| ServerError::Config(format!("QUIC config error: {e}")))?;

    Ok(ServerConfig::with_crypto(Arc::new(crypto)))
}

fn tls_builder()
-> Result<rustls::ConfigBuilder<rustls::ServerConfig, rustls::WantsVerifier>, ServerError> {
    rustls::ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| ServerError::Config(format!("invalid TLS config: {e}")))
}

/// Load TLS configuration from certificate and key files.
fn load_tls_config(cert_path: &str, key_path: &str) -> Result<ServerConfig, ServerError> {
    use std::fs;

    let cert_pem = fs::read(cert_path)
        .map_err(|e| ServerError::Config(format!("failed to read cert '{cert_path}': {e}")))?;

    let key_pem = fs::read(key_path)
        .map_err(|e| ServerError::Config(format!("failed to read key '{key_path}': {e}")))?;

    let certs = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::Config(format!("failed to parse certificates: {e}")))?;

    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| ServerError::Config(format!("failed to parse private key: {e}")))?
        .ok_or_else(|| ServerError::Config("no private key found".to_string()))?;

    let tls_config = tls_builder()?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::Config(format!("invalid TLS config: {e}")))?;

    quic_config(tls_config)
}

/// Generate a self-signed certificate for `localhost`.
fn generate_self_signed_config() -> Result<ServerConfig, ServerError> {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .map_err(|e| ServerError::Config(format!("failed to generate self-signed cert: {e}")))?;

    let cert_chain = vec![cert.cert.der().clone()];
    let key = rustls::pki_types::PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

    let tls_config = tls_builder()?
        .with_no_client_auth()
        .with_single_cert(cert_chain, key.into())
        .map_err(|e| ServerError::Config(format!("invalid TLS config: {e}")))?;

    tracing::warn!("using self-signed certificate, not for production use");

    quic_config(tls_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn binds_with_self_signed_cert() {
        let transport = QuinnTransport::bind("127.0.0.1:0", None, None).unwrap();
        assert_ne!(transport.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn rejects_invalid_address() {
        let result = QuinnTransport::bind("invalid:address:format", None, None);
        assert!(matches!(result, Err(ServerError::Config(_))));
    }

    #[tokio::test]
    async fn rejects_cert_without_key() {
        let result = QuinnTransport::bind("127.0.0.1:0", Some("cert.pem"), None);
        assert!(matches!(result, Err(ServerError::Config(_))));
    }

    #[tokio::test]
    async fn missing_cert_file_is_config_error() {
        let result =
            QuinnTransport::bind("127.0.0.1:0", Some("/nonexistent/cert.pem"), Some("/nonexistent/key.pem"));
        assert!(matches!(result, Err(ServerError::Config(_))));
    }
}
