//! Frame header with zero-copy parsing.
//!
//! The `FrameHeader` is a fixed 16-byte structure serialized as raw binary
//! (Big Endian). The server reads it before touching the payload, so it can
//! reject garbage and size the payload read without deserializing anything.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    Opcode,
    errors::{ProtocolError, Result},
};

/// Fixed 16-byte frame header (Big Endian network byte order)
///
/// Fields are stored as raw byte arrays, so every 16-byte pattern is a valid
/// in-memory value and the header can be cast directly from untrusted bytes.
/// Semantic validation (magic, version, size limit) happens in
/// [`FrameHeader::from_bytes`].
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct FrameHeader {
    // Protocol identification (bytes 0-7)
    magic: [u8; 4], // 0x43484954 ("CHIT" in ASCII)
    version: u8,    // 0x01
    reserved: u8,
    opcode: [u8; 2],

    // Call metadata (bytes 8-15)
    request_id: [u8; 4],             // echoed back in the response
    pub(crate) payload_size: [u8; 4], // u32 payload length
}

impl FrameHeader {
    /// Size of the serialized header
    pub const SIZE: usize = 16;

    /// Magic number: "CHIT" in ASCII (0x43484954)
    pub const MAGIC: u32 = 0x4348_4954;

    /// Current protocol version
    pub const VERSION: u8 = 0x01;

    /// Maximum payload size (64 KiB)
    pub const MAX_PAYLOAD_SIZE: u32 = 64 * 1024;

    /// Create a header for `opcode` with zero request id and payload size.
    #[must_use]
    pub fn new(opcode: Opcode) -> Self {
        Self {
            magic: Self::MAGIC.to_be_bytes(),
            version: Self::VERSION,
            reserved: 0,
            opcode: opcode.to_u16().to_be_bytes(),
            request_id: [0; 4],
            payload_size: [0; 4],
        }
    }

    /// Parse header from network bytes (zero-copy)
    ///
    /// Only the first [`Self::SIZE`] bytes are inspected; trailing bytes are
    /// the payload and are ignored here.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooShort` if the buffer is shorter than 16 bytes
    /// - `ProtocolError::InvalidMagic` if the magic number is wrong
    /// - `ProtocolError::UnsupportedVersion` if the version is unknown
    /// - `ProtocolError::PayloadTooLarge` if the claimed payload exceeds the
    ///   limit
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let (header, _) = Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::FrameTooShort { expected: Self::SIZE, actual: bytes.len() })?;

        if u32::from_be_bytes(header.magic) != Self::MAGIC {
            return Err(ProtocolError::InvalidMagic);
        }

        if header.version != Self::VERSION {
            return Err(ProtocolError::UnsupportedVersion(header.version));
        }

        let payload_size = u32::from_be_bytes(header.payload_size);
        if payload_size > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_size as usize,
                max: Self::MAX_PAYLOAD_SIZE as usize,
            });
        }

        Ok(header)
    }

    /// Serialize header to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(self.as_bytes());
        arr
    }

    /// Protocol magic number.
    #[must_use]
    pub fn magic(&self) -> u32 {
        u32::from_be_bytes(self.magic)
    }

    /// Protocol version byte.
    #[must_use]
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Operation code as raw u16.
    #[must_use]
    pub fn opcode(&self) -> u16 {
        u16::from_be_bytes(self.opcode)
    }

    /// Operation code as enum. `None` if unrecognized.
    #[must_use]
    pub fn opcode_enum(&self) -> Option<Opcode> {
        Opcode::from_u16(self.opcode())
    }

    /// Client-assigned nonce for request/response correlation.
    #[must_use]
    pub fn request_id(&self) -> u32 {
        u32::from_be_bytes(self.request_id)
    }

    /// Payload size in bytes.
    #[must_use]
    pub fn payload_size(&self) -> u32 {
        u32::from_be_bytes(self.payload_size)
    }

    /// Set client request nonce for response correlation.
    pub fn set_request_id(&mut self, request_id: u32) {
        self.request_id = request_id.to_be_bytes();
    }
}

impl std::fmt::Debug for FrameHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameHeader")
            .field("magic", &format!("{:#010x}", self.magic()))
            .field("version", &self.version())
            .field("opcode", &format!("{:#06x}", self.opcode()))
            .field("request_id", &self.request_id())
            .field("payload_size", &self.payload_size())
            .finish()
    }
}
