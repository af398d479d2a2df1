//! The 16-byte frame header (§3, §4.1).
//!
//! [`Header::decode`] only parses bytes into fields - it does not reject an
//! unknown opcode or a bad magic byte. Those checks belong to
//! [`crate::validate`], which runs once, in a fixed order, before any other
//! code looks at a datagram. Keeping the split this way means the header
//! codec stays a pure, total function even on adversarial input.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{
    CodecError, WireDecode, WireEncode, get_bytes_exact, get_u8, get_u16, get_u32, put_bytes_exact,
    put_u8, put_u16, put_u32,
};

/// First byte of every valid frame; rejects stray, non-RTGP UDP traffic.
pub const MAGIC: u8 = 0xA1;

/// Frame header size in bytes.
pub const HEADER_LEN: usize = 16;

/// Largest legal UDP datagram (header + payload), chosen to stay under the
/// common path MTU and avoid IP fragmentation.
pub const MAX_DATAGRAM_SIZE: usize = 1400;

/// Largest legal payload, i.e. `MAX_DATAGRAM_SIZE - HEADER_LEN`.
pub const MAX_PAYLOAD_SIZE: usize = MAX_DATAGRAM_SIZE - HEADER_LEN;

/// Default UDP port the server listens on.
pub const DEFAULT_SERVER_PORT: u16 = 4242;

/// `user_id` reserved for frames the server sends.
pub const SERVER_USER_ID: u32 = 0xFFFF_FFFF;

/// `user_id` a client uses before it has been assigned one (only legal on `C_CONNECT`).
pub const UNASSIGNED_USER_ID: u32 = 0;

/// Lowest `user_id` a connected client may hold.
pub const MIN_CLIENT_USER_ID: u32 = 1;

/// Highest `user_id` a connected client may hold.
pub const MAX_CLIENT_USER_ID: u32 = 0xFFFF_FFFE;

/// Per-frame delivery/bookkeeping bits occupying header offset 12.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
pub struct Flags(pub u8);

impl Flags {
    /// Frame is tracked for retransmit and expects an `ACK` in return.
    pub const RELIABLE: u8 = 0x01;
    /// Frame carries a piggyback `ack_id` the receiver should process.
    pub const IS_ACK: u8 = 0x02;
    /// Payload was compressed with the (out-of-core) configured codec.
    pub const COMPRESSED: u8 = 0x04;
    /// All bits not assigned a meaning above; must be zero on the wire.
    const RESERVED_MASK: u8 = !(Self::RELIABLE | Self::IS_ACK | Self::COMPRESSED);

    /// Builds an empty flag set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Sets the [`Flags::RELIABLE`] bit.
    #[must_use]
    pub const fn with_reliable(self, reliable: bool) -> Self {
        self.with_bit(Self::RELIABLE, reliable)
    }

    /// Sets the [`Flags::IS_ACK`] bit.
    #[must_use]
    pub const fn with_is_ack(self, is_ack: bool) -> Self {
        self.with_bit(Self::IS_ACK, is_ack)
    }

    /// Sets the [`Flags::COMPRESSED`] bit.
    #[must_use]
    pub const fn with_compressed(self, compressed: bool) -> Self {
        self.with_bit(Self::COMPRESSED, compressed)
    }

    const fn with_bit(self, bit: u8, set: bool) -> Self {
        if set { Self(self.0 | bit) } else { Self(self.0 & !bit) }
    }

    /// Whether [`Flags::RELIABLE`] is set.
    #[must_use]
    pub const fn is_reliable(self) -> bool {
        self.0 & Self::RELIABLE != 0
    }

    /// Whether [`Flags::IS_ACK`] is set.
    #[must_use]
    pub const fn is_ack(self) -> bool {
        self.0 & Self::IS_ACK != 0
    }

    /// Whether [`Flags::COMPRESSED`] is set.
    #[must_use]
    pub const fn is_compressed(self) -> bool {
        self.0 & Self::COMPRESSED != 0
    }

    /// Whether any bit outside the three assigned ones is set. Not checked
    /// by [`crate::validate`] today (only the reserved byte region is),
    /// kept for callers that want to reject forward-incompatible frames
    /// more strictly than the baseline protocol requires.
    #[must_use]
    pub const fn has_unknown_bits(self) -> bool {
        self.0 & Self::RESERVED_MASK != 0
    }
}

/// The fixed 16-byte prefix of every RTGP frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Should equal [`MAGIC`]; not enforced by this type, see module docs.
    pub magic: u8,
    /// Raw opcode byte; not resolved to [`crate::opcode::OpCode`] here.
    pub opcode: u8,
    /// Declared length of the payload following this header.
    pub payload_size: u16,
    /// Sender identity (§3).
    pub user_id: u32,
    /// Sender's wrapping 16-bit sequence counter.
    pub seq_id: u16,
    /// Piggybacked latest sequence number received from the peer.
    pub ack_id: u16,
    /// Delivery/bookkeeping flags.
    pub flags: Flags,
    /// Must be `[0, 0, 0]` on a conformant frame.
    pub reserved: [u8; 3],
}

impl Header {
    /// Builds a header with `magic` set to [`MAGIC`] and `reserved` zeroed,
    /// the only two fields a caller should never need to set explicitly.
    #[must_use]
    pub const fn new(opcode: u8, payload_size: u16, user_id: u32, seq_id: u16, ack_id: u16, flags: Flags) -> Self {
        Self {
            magic: MAGIC,
            opcode,
            payload_size,
            user_id,
            seq_id,
            ack_id,
            flags,
            reserved: [0, 0, 0],
        }
    }
}

impl WireEncode for Header {
    const ENCODED_LEN: usize = HEADER_LEN;

    fn encode(&self, buf: &mut BytesMut) {
        put_u8(buf, self.magic);
        put_u8(buf, self.opcode);
        put_u16(buf, self.payload_size);
        put_u32(buf, self.user_id);
        put_u16(buf, self.seq_id);
        put_u16(buf, self.ack_id);
        put_u8(buf, self.flags.0);
        put_bytes_exact(buf, &self.reserved);
    }
}

impl WireDecode for Header {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        let magic = get_u8(buf)?;
        let opcode = get_u8(buf)?;
        let payload_size = get_u16(buf)?;
        let user_id = get_u32(buf)?;
        let seq_id = get_u16(buf)?;
        let ack_id = get_u16(buf)?;
        let flags = Flags(get_u8(buf)?);
        let reserved = get_bytes_exact::<3>(buf)?;
        Ok(Self {
            magic,
            opcode,
            payload_size,
            user_id,
            seq_id,
            ack_id,
            flags,
            reserved,
        })
    }
}

/// Splits a raw datagram into its parsed header and remaining payload bytes,
/// without any validation beyond having enough bytes to decode the header
/// itself (the short-buffer case the validator's own size check precedes).
///
/// # Errors
///
/// [`CodecError::BufferTooShort`] if `datagram` is shorter than [`HEADER_LEN`].
pub fn split_header(datagram: &[u8]) -> Result<(Header, Bytes), CodecError> {
    let mut buf = Bytes::copy_from_slice(datagram);
    let header = Header::decode(&mut buf)?;
    Ok((header, buf))
}

/// Serializes `header` followed by `payload` into one contiguous datagram.
#[must_use]
pub fn assemble(header: &Header, payload: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    header.encode(&mut buf);
    buf.put_slice(payload);
    buf.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let header = Header::new(
            0x01,
            0,
            UNASSIGNED_USER_ID,
            7,
            0,
            Flags::empty().with_reliable(true).with_is_ack(true),
        );
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), HEADER_LEN);
        let mut frozen = buf.freeze();
        let decoded = Header::decode(&mut frozen).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn flags_roundtrip_bits() {
        let f = Flags::empty()
            .with_reliable(true)
            .with_is_ack(false)
            .with_compressed(true);
        assert!(f.is_reliable());
        assert!(!f.is_ack());
        assert!(f.is_compressed());
        assert!(!f.has_unknown_bits());
        assert!(Flags(0x80).has_unknown_bits());
    }

    #[test]
    fn assemble_then_split_recovers_payload() {
        let header = Header::new(0x20, 1, 5, 42, 41, Flags::empty());
        let datagram = assemble(&header, &[0xAB]);
        let (decoded, payload) = split_header(&datagram).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(&payload[..], &[0xAB]);
    }

    #[test]
    fn split_header_rejects_short_datagram() {
        assert!(matches!(
            split_header(&[0u8; 4]),
            Err(CodecError::BufferTooShort { .. })
        ));
    }
}
