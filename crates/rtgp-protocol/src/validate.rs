//! The datagram validator (§4.3).
//!
//! [`validate`] runs nine checks in a fixed order and returns the first
//! failure - callers must not infer that later checks also passed just
//! because an earlier one did. It never allocates beyond the zero-copy
//! [`Bytes`] slice it hands back, and never mutates any state, so it is safe
//! to run directly on adversarial input before any peer or security record
//! exists for the sender.

use bytes::Bytes;

use crate::codec::WireDecode;
use crate::error::ValidationError;
use crate::header::{HEADER_LEN, Header, MAGIC, MAX_DATAGRAM_SIZE, MAX_PAYLOAD_SIZE, SERVER_USER_ID};
use crate::opcode::{OpCode, PayloadKind, peek_entry_count};

/// A datagram that has passed every check in [`validate`]: a parsed header,
/// its resolved opcode, and the payload bytes (zero-copy slice of the input).
#[derive(Debug, Clone)]
pub struct ValidatedFrame {
    /// The parsed frame header.
    pub header: Header,
    /// The header's opcode, already resolved from the closed set.
    pub opcode: OpCode,
    /// Payload bytes following the header.
    pub payload: Bytes,
}

/// Runs the full §4.3 check sequence against a raw datagram.
///
/// `claimed_from_server` is the transport-level knowledge of which side sent
/// this datagram (the client only ever receives from its bound server
/// endpoint; the server only ever receives from client endpoints), used for
/// the final authority check - it is not derived from the frame itself.
///
/// # Errors
///
/// Returns the first [`ValidationError`] encountered, per the fixed check
/// order documented on the enum's variants.
pub fn validate(datagram: &[u8], claimed_from_server: bool) -> Result<ValidatedFrame, ValidationError> {
    let size = datagram.len();

    // 1. size >= 16
    if size < HEADER_LEN {
        return Err(ValidationError::PacketTooSmall { size });
    }
    // 2. size <= 1400
    if size > MAX_DATAGRAM_SIZE {
        return Err(ValidationError::PacketTooLarge { size });
    }
    // 3. magic == 0xA1
    if datagram[0] != MAGIC {
        return Err(ValidationError::InvalidMagic { byte: datagram[0] });
    }

    let mut head = Bytes::copy_from_slice(&datagram[..HEADER_LEN]);
    let header = Header::decode(&mut head).expect("exactly HEADER_LEN bytes were sliced above");

    // 4. payload_size <= 1384
    let payload_size = header.payload_size as usize;
    if payload_size > MAX_PAYLOAD_SIZE {
        return Err(ValidationError::PacketTooLarge {
            size: HEADER_LEN + payload_size,
        });
    }
    // 5. opcode known
    let Some(opcode) = OpCode::from_byte(header.opcode) else {
        return Err(ValidationError::UnknownOpcode { byte: header.opcode });
    };
    // 6. reserved bytes all zero
    if header.reserved != [0, 0, 0] {
        return Err(ValidationError::MalformedPacket);
    }
    // 7. total size == 16 + payload_size
    if size != HEADER_LEN + payload_size {
        return Err(ValidationError::MalformedPacket);
    }

    let payload = Bytes::copy_from_slice(&datagram[HEADER_LEN..]);

    // 8. payload shape matches the opcode's declared kind
    match opcode.info().payload {
        PayloadKind::Fixed(expected) => {
            if payload_size != expected {
                return Err(ValidationError::MalformedPacket);
            }
        }
        PayloadKind::Variable {
            header_len,
            entry_size,
            max_count,
        } => {
            if payload_size < 1 {
                return Err(ValidationError::MalformedPacket);
            }
            let count =
                peek_entry_count(&payload).map_err(|_| ValidationError::MalformedPacket)?;
            if count > max_count {
                return Err(ValidationError::MalformedPacket);
            }
            let expected = header_len + usize::from(count) * entry_size;
            if payload_size != expected {
                return Err(ValidationError::MalformedPacket);
            }
        }
    }

    // 9. authority
    check_authority(claimed_from_server, opcode, header.user_id)?;

    Ok(ValidatedFrame {
        header,
        opcode,
        payload,
    })
}

fn check_authority(claimed_from_server: bool, opcode: OpCode, user_id: u32) -> Result<(), ValidationError> {
    use crate::header::{MAX_CLIENT_USER_ID, MIN_CLIENT_USER_ID, UNASSIGNED_USER_ID};

    if claimed_from_server {
        if user_id != SERVER_USER_ID {
            return Err(ValidationError::InvalidUserId { user_id, opcode });
        }
        return Ok(());
    }

    if opcode == OpCode::CConnect {
        if user_id != UNASSIGNED_USER_ID {
            return Err(ValidationError::InvalidUserId { user_id, opcode });
        }
    } else if !(MIN_CLIENT_USER_ID..=MAX_CLIENT_USER_ID).contains(&user_id) {
        return Err(ValidationError::InvalidUserId { user_id, opcode });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{Flags, assemble};

    fn connect_datagram() -> Vec<u8> {
        let header = Header::new(OpCode::CConnect.to_byte(), 0, 0, 0, 0, Flags::empty().with_reliable(true));
        assemble(&header, &[])
    }

    #[test]
    fn accepts_well_formed_connect() {
        let datagram = connect_datagram();
        let frame = validate(&datagram, false).unwrap();
        assert_eq!(frame.opcode, OpCode::CConnect);
    }

    #[test]
    fn rejects_short_packet() {
        assert!(matches!(
            validate(&[0u8; 4], false),
            Err(ValidationError::PacketTooSmall { size: 4 })
        ));
    }

    #[test]
    fn rejects_oversized_packet() {
        let datagram = vec![0u8; MAX_DATAGRAM_SIZE + 1];
        assert!(matches!(
            validate(&datagram, false),
            Err(ValidationError::PacketTooLarge { .. })
        ));
    }

    #[test]
    fn rejects_bad_magic() {
        let mut datagram = connect_datagram();
        datagram[0] = 0x00;
        assert!(matches!(
            validate(&datagram, false),
            Err(ValidationError::InvalidMagic { byte: 0x00 })
        ));
    }

    #[test]
    fn rejects_unknown_opcode() {
        let mut datagram = connect_datagram();
        datagram[1] = 0xAA;
        assert!(matches!(
            validate(&datagram, false),
            Err(ValidationError::UnknownOpcode { byte: 0xAA })
        ));
    }

    #[test]
    fn rejects_mismatched_payload_size_declaration() {
        let mut datagram = connect_datagram();
        datagram.push(0xFF); // extra trailing byte, payload_size field still says 0
        assert!(matches!(
            validate(&datagram, false),
            Err(ValidationError::MalformedPacket)
        ));
    }

    #[test]
    fn rejects_move_batch_over_cap() {
        // count = 115 > 114 max, with a consistent (but over-cap) payload_size.
        let count: u8 = 115;
        let payload_size = 5 + usize::from(count) * 12;
        let header = Header::new(
            OpCode::SEntityMoveBatch.to_byte(),
            payload_size as u16,
            SERVER_USER_ID,
            0,
            0,
            Flags::empty(),
        );
        let mut payload = vec![0u8; payload_size];
        payload[0] = count;
        let datagram = assemble(&header, &payload);
        assert!(matches!(
            validate(&datagram, true),
            Err(ValidationError::MalformedPacket)
        ));
    }

    #[test]
    fn rejects_server_claimed_frame_with_non_server_user_id() {
        let header = Header::new(OpCode::Pong.to_byte(), 0, 1, 0, 0, Flags::empty());
        let datagram = assemble(&header, &[]);
        assert!(matches!(
            validate(&datagram, true),
            Err(ValidationError::InvalidUserId { user_id: 1, .. })
        ));
    }

    #[test]
    fn rejects_connect_with_nonzero_user_id() {
        let header = Header::new(OpCode::CConnect.to_byte(), 0, 7, 0, 0, Flags::empty());
        let datagram = assemble(&header, &[]);
        assert!(matches!(
            validate(&datagram, false),
            Err(ValidationError::InvalidUserId { user_id: 7, .. })
        ));
    }

    #[test]
    fn rejects_nonzero_reserved_bytes() {
        let mut datagram = connect_datagram();
        datagram[13] = 1;
        assert!(matches!(
            validate(&datagram, false),
            Err(ValidationError::MalformedPacket)
        ));
    }
}
