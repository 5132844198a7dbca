//! QUIC transport for the client.
//!
//! A thin layer over Quinn: every call opens a bidirectional stream, writes
//! one request frame, finishes the send side and reads response frames from
//! the receive side. Protocol logic lives in [`crate::ChatClient`].

use std::{net::SocketAddr, sync::Arc, time::Duration};

use chitchat_proto::{ALPN_PROTOCOL, Frame, FrameHeader};
use quinn::{ClientConfig, Endpoint, ReadExactError, RecvStream};
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Stream error.
    #[error("stream error: {0}")]
    Stream(String),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] chitchat_proto::ProtocolError),
}

/// Open QUIC connection to a ChitChat server.
#[derive(Debug)]
pub struct Connection {
    endpoint: Endpoint,
    connection: quinn::Connection,
}

impl Connection {
    /// Connect to `server_addr`.
    ///
    /// Accepts any server certificate, so self-signed development servers
    /// work out of the box.
    pub async fn connect(server_addr: SocketAddr) -> Result<Self, TransportError> {
        let bind: SocketAddr = if server_addr.is_ipv6() {
            SocketAddr::from(([0u16; 8], 0))
        } else {
            SocketAddr::from(([0u8; 4], 0))
        };

        let mut endpoint = Endpoint::client(bind)
            .map_err(|e| TransportError::Connection(format!("endpoint creation failed: {e}")))?;
        endpoint.set_default_client_config(insecure_client_config()?);

        let connection = endpoint
            .connect(server_addr, "localhost")
            .map_err(|e| TransportError::Connection(format!("connect failed: {e}")))?
            .await
            .map_err(|e| TransportError::Connection(format!("connection failed: {e}")))?;

        tracing::debug!(%server_addr, "connected");

        Ok(Self { endpoint, connection })
    }

    /// Open a stream and send `frame` as its only request.
    pub async fn call(&self, frame: &Frame) -> Result<RecvStream, TransportError> {
        let (mut send, recv) = self
            .connection
            .open_bi()
            .await
            .map_err(|e| TransportError::Stream(format!("open_bi failed: {e}")))?;

        let bytes = frame.to_vec()?;
        send.write_all(&bytes)
            .await
            .map_err(|e| TransportError::Stream(format!("write failed: {e}")))?;
        send.finish().map_err(|e| TransportError::Stream(format!("finish failed: {e}")))?;

        Ok(recv)
    }

    /// Close the connection and wait for the close to reach the server.
    pub async fn close(&self) {
        self.connection.close(0u32.into(), b"client closed");
        self.endpoint.wait_idle().await;
    }
}

/// Read one frame. `Ok(None)` if the server finished the stream.
pub async fn read_frame(recv: &mut RecvStream) -> Result<Option<Frame>, TransportError> {
    let mut buf = vec![0u8; FrameHeader::SIZE];
    match recv.read_exact(&mut buf).await {
        Ok(()) => {},
        Err(ReadExactError::FinishedEarly(0)) => return Ok(None),
        Err(e) => return Err(TransportError::Stream(format!("header read failed: {e}"))),
    }

    let payload_size = FrameHeader::from_bytes(&buf)?.payload_size() as usize;
    buf.resize(FrameHeader::SIZE + payload_size, 0);
    recv.read_exact(&mut buf[FrameHeader::SIZE..])
        .await
        .map_err(|e| TransportError::Stream(format!("payload read failed: {e}")))?;

    Ok(Some(Frame::decode(&buf)?))
}

/// Client config that accepts any certificate.
///
/// WARNING: Development only. Production should verify certificates.
fn insecure_client_config() -> Result<ClientConfig, TransportError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut crypto = rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| TransportError::Connection(format!("invalid TLS config: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(InsecureCertVerifier { provider }))
        .with_no_client_auth();

    // Must match server's ALPN protocol
    crypto.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

    let crypto = quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
        .map_err(|e| TransportError::Connection(format!("QUIC config error: {e}")))?;
    let mut config = ClientConfig::new(Arc::new(crypto));

    let idle_timeout: quinn::IdleTimeout = Duration::from_secs(30)
        .try_into()
        .map_err(|e| TransportError::Connection(format!("invalid idle timeout: {e}")))?;
    let mut transport = quinn::TransportConfig::default();
    transport.max_idle_timeout(Some(idle_timeout));
    // subscriptions can sit idle for long stretches
    transport.keep_alive_interval(Some(Duration::from_secs(10)));
    config.transport_config(Arc::new(transport));

    Ok(config)
}

/// Certificate verifier that accepts any certificate (insecure, for
/// development). Handshake signatures are still checked.
#[derive(Debug)]
struct InsecureCertVerifier {
    provider: Arc<rustls::crypto::CryptoProvider>,
}

impl rustls::client::danger::ServerCertVerifier for InsecureCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}
