//! ChitChat wire protocol.
//!
//! Every call on the wire is a [`Frame`]: a fixed 16-byte binary header
//! followed by a CBOR payload. The header carries the [`Opcode`], which alone
//! identifies the payload type, so payloads are encoded without a variant tag.
//!
//! # Components
//!
//! - [`FrameHeader`]: zero-copy header with magic, version, opcode, request id
//!   and payload size
//! - [`Frame`]: header plus raw payload bytes
//! - [`Payload`]: typed request/response/broadcast messages
//!
//! One QUIC bidirectional stream carries one call. Request/response calls
//! (Publish, Leave) exchange exactly one frame each way; Subscribe sends one
//! request frame and then receives Broadcast frames until the server finishes
//! the stream.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod errors;
mod frame;
mod header;
mod opcode;
pub mod payloads;

pub use errors::ProtocolError;
pub use frame::Frame;
pub use header::FrameHeader;
pub use opcode::Opcode;
pub use payloads::{
    BroadcastEvent, ErrorPayload, EventKind, LeaveRequest, LeaveResponse, Payload, PublishRequest,
    PublishResponse, SubscribeRequest,
};

/// ALPN identifier negotiated during the QUIC handshake.
pub const ALPN_PROTOCOL: &[u8] = b"chitchat";
