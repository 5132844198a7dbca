//! CBOR-encoded protocol messages.
//!
//! Frame headers are raw binary, payloads are CBOR. The opcode in the header
//! selects the payload type, so only the inner struct is serialized and no
//! variant tag appears in the CBOR.
//!
//! # Invariants
//!
//! Each payload variant maps to exactly one opcode (enforced by match
//! exhaustiveness in [`Payload::opcode`] and [`Payload::decode`]).

use bytes::Bytes;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    Frame, FrameHeader, Opcode,
    errors::{ProtocolError, Result},
};

/// Open a broadcast stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    /// Caller-chosen client identifier (must be non-empty)
    pub client_id: String,
}

/// Publish a chat message to every subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRequest {
    /// Publishing client
    pub client_id: String,
    /// Message text (at most 128 bytes)
    pub text: String,
}

/// Publish acknowledgement.
///
/// Deliberately carries no timestamp: clients learn logical time only from
/// broadcasts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResponse {
    /// Whether the message was accepted
    pub ack: bool,
    /// Rejection reason, empty on success
    #[serde(default)]
    pub error: String,
}

impl PublishResponse {
    /// Accepted.
    pub fn accepted() -> Self {
        Self { ack: true, error: String::new() }
    }

    /// Rejected with a human-readable reason.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self { ack: false, error: reason.into() }
    }
}

/// Explicitly leave the chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveRequest {
    /// Leaving client
    pub client_id: String,
}

/// Leave acknowledgement. Always `true`: leaving is idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveResponse {
    /// Acknowledged
    pub ack: bool,
}

/// Kind of broadcast event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// A client subscribed
    Join,
    /// A client published a message
    Chat,
    /// A client left or disconnected
    Leave,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Join => "JOIN",
            Self::Chat => "CHAT",
            Self::Leave => "LEAVE",
        })
    }
}

/// Event delivered on a subscription stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastEvent {
    /// Event kind
    pub kind: EventKind,
    /// Originating client
    pub client_id: String,
    /// Server-assigned logical timestamp
    pub timestamp: i64,
    /// Message text, empty for Join and Leave
    #[serde(default)]
    pub message: String,
}

/// Error payload for error frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error code identifying the type of error.
    pub code: u16,
    /// Human-readable error message.
    pub message: String,
}

impl ErrorPayload {
    /// Request arguments were rejected.
    pub const INVALID_ARGUMENT: u16 = 0x0001;
    /// Payload could not be decoded for its opcode.
    pub const INVALID_PAYLOAD: u16 = 0x0002;
    /// Opcode is not valid as a request.
    pub const UNEXPECTED_OPCODE: u16 = 0x0003;
    /// The server failed to process the request.
    pub const INTERNAL: u16 = 0x0004;

    /// Create an invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self { code: Self::INVALID_ARGUMENT, message: msg.into() }
    }

    /// Create an invalid payload error.
    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        Self { code: Self::INVALID_PAYLOAD, message: msg.into() }
    }

    /// Create an unexpected opcode error.
    pub fn unexpected_opcode(opcode: u16) -> Self {
        Self { code: Self::UNEXPECTED_OPCODE, message: format!("unexpected opcode {opcode:#06x}") }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self { code: Self::INTERNAL, message: msg.into() }
    }
}

/// All possible frame payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Open a subscription stream
    Subscribe(SubscribeRequest),
    /// Publish a message
    Publish(PublishRequest),
    /// Publish acknowledgement
    PublishAck(PublishResponse),
    /// Explicit leave
    Leave(LeaveRequest),
    /// Leave acknowledgement
    LeaveAck(LeaveResponse),
    /// Broadcast event
    Broadcast(BroadcastEvent),
    /// Error response
    Error(ErrorPayload),
}

impl Payload {
    /// Opcode corresponding to this payload type.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::Subscribe(_) => Opcode::Subscribe,
            Self::Publish(_) => Opcode::Publish,
            Self::PublishAck(_) => Opcode::PublishAck,
            Self::Leave(_) => Opcode::Leave,
            Self::LeaveAck(_) => Opcode::LeaveAck,
            Self::Broadcast(_) => Opcode::Broadcast,
            Self::Error(_) => Opcode::Error,
        }
    }

    /// Encode the inner struct as CBOR.
    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Self::Subscribe(p) => to_cbor(p),
            Self::Publish(p) => to_cbor(p),
            Self::PublishAck(p) => to_cbor(p),
            Self::Leave(p) => to_cbor(p),
            Self::LeaveAck(p) => to_cbor(p),
            Self::Broadcast(p) => to_cbor(p),
            Self::Error(p) => to_cbor(p),
        }
    }

    /// Decode CBOR bytes as the payload type selected by `opcode`.
    pub fn decode(opcode: Opcode, bytes: &[u8]) -> Result<Self> {
        Ok(match opcode {
            Opcode::Subscribe => Self::Subscribe(from_cbor(bytes)?),
            Opcode::Publish => Self::Publish(from_cbor(bytes)?),
            Opcode::PublishAck => Self::PublishAck(from_cbor(bytes)?),
            Opcode::Leave => Self::Leave(from_cbor(bytes)?),
            Opcode::LeaveAck => Self::LeaveAck(from_cbor(bytes)?),
            Opcode::Broadcast => Self::Broadcast(from_cbor(bytes)?),
            Opcode::Error => Self::Error(from_cbor(bytes)?),
        })
    }

    /// Encode into a frame carrying `request_id`.
    pub fn into_frame(self, request_id: u32) -> Result<Frame> {
        let bytes = self.encode()?;
        if bytes.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: bytes.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        let mut header = FrameHeader::new(self.opcode());
        header.set_request_id(request_id);
        Ok(Frame::new(header, Bytes::from(bytes)))
    }

    /// Decode the payload of `frame` using its header opcode.
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let raw = frame.header.opcode();
        let opcode = Opcode::from_u16(raw).ok_or(ProtocolError::UnknownOpcode(raw))?;
        Self::decode(opcode, &frame.payload)
    }
}

fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| ProtocolError::CborEncode(e.to_string()))?;
    Ok(buf)
}

fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
}
