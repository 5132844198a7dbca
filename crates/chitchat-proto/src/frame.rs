//! Frame type combining header and payload.
//!
//! A `Frame` is the transport-layer packet: the 16-byte binary header followed
//! by already-encoded payload bytes. For typed access see
//! [`crate::Payload::into_frame`] and [`crate::Payload::from_frame`].

use bytes::{BufMut, Bytes};

use crate::{
    FrameHeader,
    errors::{ProtocolError, Result},
};

/// Complete protocol frame.
///
/// Layout on the wire: `[FrameHeader: 16 bytes] + [payload: variable bytes]`
///
/// # Invariants
///
/// - `payload.len()` matches `header.payload_size()`. Enforced by
///   [`Frame::new`] and verified by [`Frame::decode`].
/// - `payload.len()` never exceeds [`FrameHeader::MAX_PAYLOAD_SIZE`] on the
///   wire. Checked by [`Frame::encode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame header
    pub header: FrameHeader,

    /// Raw payload bytes (CBOR)
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame, setting the header's payload size from `payload`.
    ///
    /// Oversized payloads are accepted here and rejected by [`Frame::encode`].
    #[must_use]
    pub fn new(mut header: FrameHeader, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();

        // Lengths past u32::MAX saturate; encode() rejects them anyway.
        let payload_len = u32::try_from(payload.len()).unwrap_or(u32::MAX);
        header.payload_size = payload_len.to_be_bytes();

        Self { header, payload }
    }

    /// Total encoded size in bytes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        FrameHeader::SIZE + self.payload.len()
    }

    /// Encode frame into buffer.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if the payload exceeds the limit
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        if self.payload.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.payload.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        debug_assert_eq!(self.payload.len(), self.header.payload_size() as usize);

        dst.put_slice(&self.header.to_bytes());
        dst.put_slice(&self.payload);

        Ok(())
    }

    /// Encode frame into a fresh buffer.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode(&mut buf)?;
        Ok(buf)
    }

    /// Decode frame from wire format.
    ///
    /// Validates the header before copying the payload. Trailing bytes past
    /// the claimed payload are ignored.
    ///
    /// # Errors
    ///
    /// - any header error from [`FrameHeader::from_bytes`]
    /// - `ProtocolError::FrameTruncated` if fewer payload bytes are present
    ///   than the header claims
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = FrameHeader::from_bytes(bytes)?;

        let payload_size = header.payload_size() as usize;
        let total_size = FrameHeader::SIZE + payload_size;

        let payload = bytes.get(FrameHeader::SIZE..total_size).ok_or(
            ProtocolError::FrameTruncated {
                expected: payload_size,
                actual: bytes.len().saturating_sub(FrameHeader::SIZE),
            },
        )?;

        Ok(Self { header: *header, payload: Bytes::copy_from_slice(payload) })
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::Opcode;

    proptest! {
        #[test]
        fn frame_round_trip(
            request_id in any::<u32>(),
            payload in prop::collection::vec(any::<u8>(), 0..512),
        ) {
            let mut header = FrameHeader::new(Opcode::Publish);
            header.set_request_id(request_id);
            let frame = Frame::new(header, payload);

            let wire = frame.to_vec().expect("should encode");
            prop_assert_eq!(wire.len(), frame.encoded_len());

            let parsed = Frame::decode(&wire).expect("should decode");
            prop_assert_eq!(frame, parsed);
        }
    }

    #[test]
    fn new_sets_payload_size() {
        let frame = Frame::new(FrameHeader::new(Opcode::Leave), vec![1, 2, 3, 4]);
        assert_eq!(frame.header.payload_size(), 4);
    }

    #[test]
    fn reject_truncated_frame() {
        let frame = Frame::new(FrameHeader::new(Opcode::Publish), vec![0u8; 100]);
        let wire = frame.to_vec().expect("should encode");

        let result = Frame::decode(&wire[..FrameHeader::SIZE + 10]);
        assert_eq!(result, Err(ProtocolError::FrameTruncated { expected: 100, actual: 10 }));
    }

    #[test]
    fn reject_oversized_encode() {
        let payload = vec![0u8; FrameHeader::MAX_PAYLOAD_SIZE as usize + 1];
        let frame = Frame::new(FrameHeader::new(Opcode::Publish), payload);

        let mut wire = Vec::new();
        assert!(matches!(frame.encode(&mut wire), Err(ProtocolError::PayloadTooLarge { .. })));
        assert!(wire.is_empty());
    }
}
