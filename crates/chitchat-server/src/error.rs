//! Server error types.
//!
//! Two layers, mirroring the crate split:
//! - [`EngineError`]: failures of the broadcast core, surfaced to the caller
//!   of Join/Publish/Leave
//! - [`ServerError`]: runtime failures (configuration, transport, protocol)
//!
//! Per-subscriber send failures are not errors of the triggering operation;
//! they are reported as [`crate::DeliveryFailure`] values and logged.

use thiserror::Error;

/// Errors returned by [`crate::BroadcastEngine`] operations.
///
/// Both variants are returned before any state is mutated: a failed
/// operation consumes no timestamp and reaches no subscriber.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Caller supplied an invalid argument (empty client id, oversized
    /// message).
    ///
    /// Not retryable with the same input.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Logical clock exhausted.
    ///
    /// Fatal to the triggering operation only.
    #[error("logical clock overflow")]
    Overflow,
}

impl EngineError {
    /// Oversized message rejection.
    pub(crate) fn message_too_long(len: usize, max: usize) -> Self {
        Self::InvalidArgument(format!("message too long: {len} bytes (max {max})"))
    }
}

/// Errors that can occur in the server runtime.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Configuration error (invalid bind address, unreadable TLS files).
    ///
    /// Prevents startup. Fix configuration and restart.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport/network error.
    ///
    /// Fatal for the affected connection or stream only.
    #[error("transport error: {0}")]
    Transport(String),

    /// Peer sent malformed data.
    #[error("protocol error: {0}")]
    Protocol(#[from] chitchat_proto::ProtocolError),

    /// Broadcast core rejected the operation.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_error_display() {
        let err = EngineError::message_too_long(129, 128);
        assert_eq!(err.to_string(), "invalid argument: message too long: 129 bytes (max 128)");

        assert_eq!(EngineError::Overflow.to_string(), "logical clock overflow");
    }

    #[test]
    fn server_error_wraps_engine_error() {
        let err = ServerError::from(EngineError::Overflow);
        assert_eq!(err.to_string(), "engine error: logical clock overflow");
    }
}
