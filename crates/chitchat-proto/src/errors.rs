//! Protocol error types.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while parsing or building frames.
///
/// All variants describe malformed input from the peer or a local encoding
/// bug. None of them are retryable with the same bytes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer is shorter than a frame header.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Minimum number of bytes required
        expected: usize,
        /// Bytes available
        actual: usize,
    },

    /// Header magic does not match "CHIT".
    #[error("invalid magic number")]
    InvalidMagic,

    /// Header version is not supported by this build.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Payload exceeds [`crate::FrameHeader::MAX_PAYLOAD_SIZE`].
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Claimed or actual payload size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Fewer payload bytes than the header claims.
    #[error("frame truncated: expected {expected} payload bytes, got {actual}")]
    FrameTruncated {
        /// Payload size claimed by the header
        expected: usize,
        /// Payload bytes available
        actual: usize,
    },

    /// Opcode is not part of the protocol.
    #[error("unknown opcode: {0:#06x}")]
    UnknownOpcode(u16),

    /// Payload could not be encoded as CBOR.
    #[error("CBOR encode failed: {0}")]
    CborEncode(String),

    /// Payload bytes are not valid CBOR for the opcode.
    #[error("CBOR decode failed: {0}")]
    CborDecode(String),
}
