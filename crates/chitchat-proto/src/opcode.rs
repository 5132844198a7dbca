//! Operation codes.

/// Frame operation code.
///
/// Identifies the payload type carried by a frame. Values are stable on the
/// wire; new opcodes get new numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    /// Open a broadcast stream for a client
    Subscribe = 0x0001,
    /// Publish a chat message
    Publish = 0x0002,
    /// Response to Publish
    PublishAck = 0x0003,
    /// Explicitly leave the chat
    Leave = 0x0004,
    /// Response to Leave
    LeaveAck = 0x0005,
    /// Server-to-client event on a subscription stream
    Broadcast = 0x0010,
    /// Error response
    Error = 0x00FF,
}

impl Opcode {
    /// Raw wire value.
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    /// Parse a raw wire value. `None` if unrecognized.
    #[must_use]
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0001 => Some(Self::Subscribe),
            0x0002 => Some(Self::Publish),
            0x0003 => Some(Self::PublishAck),
            0x0004 => Some(Self::Leave),
            0x0005 => Some(Self::LeaveAck),
            0x0010 => Some(Self::Broadcast),
            0x00FF => Some(Self::Error),
            _ => None,
        }
    }
}
