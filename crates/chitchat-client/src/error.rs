//! Client error types.

use thiserror::Error;

use crate::transport::TransportError;

/// Errors returned by [`crate::ChatClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// Local argument validation failed before anything was sent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Connection or stream failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Server answered with an Error frame.
    #[error("server error {code}: {message}")]
    Server {
        /// Error code (see `chitchat_proto::ErrorPayload`)
        code: u16,
        /// Human-readable description
        message: String,
    },

    /// Server answered with a frame that does not fit the call.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Server finished the stream without answering.
    #[error("stream closed before a response arrived")]
    NoResponse,
}

impl From<chitchat_proto::ProtocolError> for ClientError {
    fn from(err: chitchat_proto::ProtocolError) -> Self {
        Self::Transport(TransportError::Protocol(err))
    }
}
