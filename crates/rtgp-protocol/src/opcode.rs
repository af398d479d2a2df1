//! The closed set of protocol operation codes and their classification
//! (§4.2, §6.1).
//!
//! Rather than four parallel `match` statements (one per question the
//! registry answers - reliable?, origin?, payload size?) that can silently
//! drift out of sync as opcodes are added, every [`OpCode`] variant carries
//! its classification in one place: [`OpCode::info`] looks up a single
//! per-variant [`OpcodeInfo`] record. This replaces the kind of duplicated
//! `switch`-per-question code the original implementation had.

use crate::codec::{CodecError, get_u8};
use bytes::Bytes;

/// Whether an opcode is sent reliably (tracked for retransmit + acked) or
/// unreliably (best-effort, no retransmit).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reliability {
    /// Delivered at-least-once via the reliable channel (§4.4).
    Reliable,
    /// Best-effort, never retransmitted.
    Unreliable,
}

/// Which side(s) of a connection may originate a given opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Only the client sends this opcode.
    Client,
    /// Only the server sends this opcode.
    Server,
    /// Either side may send this opcode (`DISCONNECT`, `ACK`).
    Both,
}

/// The shape of an opcode's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// Payload is always exactly this many bytes (0 for "no payload").
    Fixed(usize),
    /// Payload starts with a fixed-size header that includes an entry
    /// count, followed by `count` entries of `entry_size` bytes each.
    ///
    /// `header_len` includes the one-byte count field itself, so the total
    /// expected payload size is `header_len + count * entry_size`.
    Variable {
        /// Bytes preceding the repeated entries, including the count byte.
        header_len: usize,
        /// Bytes per repeated entry.
        entry_size: usize,
        /// Maximum legal value of the count byte.
        max_count: u8,
    },
}

/// Static classification for one [`OpCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodeInfo {
    /// Reliable or unreliable delivery.
    pub reliability: Reliability,
    /// Which side(s) may send this opcode.
    pub origin: Origin,
    /// Expected payload shape.
    pub payload: PayloadKind,
}

/// R_GET_USERS has no explicit count cap in the protocol beyond the overall
/// 1384-byte payload limit; this is the largest count that still fits.
pub const MAX_USERS_IN_RESPONSE: u8 = 255u8.min(((1384 - 1) / 4) as u8);

macro_rules! opcodes {
    (
        $(
            $(#[$meta:meta])*
            $name:ident = $value:expr => { $reliability:expr, $origin:expr, $payload:expr }
        ),* $(,)?
    ) => {
        /// One of the closed set of RTGP operation codes (§6.1).
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        #[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
        pub enum OpCode {
            $(
                $(#[$meta])*
                $name = $value,
            )*
        }

        impl OpCode {
            /// Attempts to convert a raw opcode byte into a known [`OpCode`].
            ///
            /// Returns `None` for any byte outside the closed set (the
            /// validator turns this into [`crate::error::ValidationError::UnknownOpcode`]).
            #[must_use]
            pub const fn from_byte(byte: u8) -> Option<Self> {
                match byte {
                    $($value => Some(Self::$name),)*
                    _ => None,
                }
            }

            /// Raw wire value of this opcode.
            #[must_use]
            pub const fn to_byte(self) -> u8 {
                self as u8
            }

            /// Looks up this opcode's static classification.
            #[must_use]
            pub const fn info(self) -> OpcodeInfo {
                match self {
                    $(Self::$name => OpcodeInfo {
                        reliability: $reliability,
                        origin: $origin,
                        payload: $payload,
                    },)*
                }
            }
        }
    };
}

opcodes! {
    /// Client requests a connection. Empty payload, `user_id` must be 0.
    CConnect = 0x01 => { Reliability::Reliable, Origin::Client, PayloadKind::Fixed(0) },
    /// Server accepts a connection and assigns a `user_id`.
    SAccept = 0x02 => { Reliability::Reliable, Origin::Server, PayloadKind::Fixed(4) },
    /// Graceful session termination, either direction.
    Disconnect = 0x03 => { Reliability::Reliable, Origin::Both, PayloadKind::Fixed(1) },
    /// Client requests the list of connected users.
    CGetUsers = 0x04 => { Reliability::Reliable, Origin::Client, PayloadKind::Fixed(0) },
    /// Server responds with the connected user id list.
    RGetUsers = 0x05 => { Reliability::Reliable, Origin::Server, PayloadKind::Variable { header_len: 1, entry_size: 4, max_count: MAX_USERS_IN_RESPONSE } },
    /// Server notifies a game-state change (Lobby/Running/Paused/GameOver).
    SUpdateState = 0x06 => { Reliability::Reliable, Origin::Server, PayloadKind::Fixed(1) },
    /// Server notifies game over with the final score.
    SGameOver = 0x07 => { Reliability::Reliable, Origin::Server, PayloadKind::Fixed(4) },
    /// Client signals ready/not-ready in the lobby.
    CReady = 0x08 => { Reliability::Reliable, Origin::Client, PayloadKind::Fixed(1) },
    /// Server signals game start with a countdown (0 cancels).
    SGameStart = 0x09 => { Reliability::Reliable, Origin::Server, PayloadKind::Fixed(4) },
    /// Server broadcasts a player's ready-state change.
    SPlayerReadyState = 0x0A => { Reliability::Reliable, Origin::Server, PayloadKind::Fixed(5) },
    /// Client requests the list of open lobbies.
    CRequestLobbies = 0x0B => { Reliability::Reliable, Origin::Client, PayloadKind::Fixed(0) },
    /// Server responds with the open lobby list.
    SLobbyList = 0x0C => { Reliability::Reliable, Origin::Server, PayloadKind::Variable { header_len: 1, entry_size: 27, max_count: 50 } },
    /// Client requests to join a lobby by code.
    CJoinLobby = 0x0D => { Reliability::Reliable, Origin::Client, PayloadKind::Fixed(6) },
    /// Server responds to a lobby join request.
    SJoinLobbyResponse = 0x0E => { Reliability::Reliable, Origin::Server, PayloadKind::Fixed(18) },
    /// Server spawns a new entity.
    SEntitySpawn = 0x10 => { Reliability::Reliable, Origin::Server, PayloadKind::Fixed(14) },
    /// Server updates an entity's position/velocity (unreliable).
    SEntityMove = 0x11 => { Reliability::Unreliable, Origin::Server, PayloadKind::Fixed(16) },
    /// Server destroys an entity.
    SEntityDestroy = 0x12 => { Reliability::Reliable, Origin::Server, PayloadKind::Fixed(4) },
    /// Server updates an entity's health.
    SEntityHealth = 0x13 => { Reliability::Reliable, Origin::Server, PayloadKind::Fixed(12) },
    /// Server notifies a power-up pickup event.
    SPowerupEvent = 0x14 => { Reliability::Reliable, Origin::Server, PayloadKind::Fixed(9) },
    /// Server broadcasts a batch of entity moves sharing one server tick (unreliable).
    SEntityMoveBatch = 0x15 => { Reliability::Unreliable, Origin::Server, PayloadKind::Variable { header_len: 5, entry_size: 12, max_count: 114 } },
    /// Client requests a bandwidth mode change.
    CSetBandwidthMode = 0x16 => { Reliability::Reliable, Origin::Client, PayloadKind::Fixed(1) },
    /// Server notifies that a client's bandwidth mode changed.
    SBandwidthModeChanged = 0x17 => { Reliability::Reliable, Origin::Server, PayloadKind::Fixed(6) },
    /// Server announces the level name and background for the session.
    SLevelAnnounce = 0x18 => { Reliability::Reliable, Origin::Server, PayloadKind::Fixed(64) },
    /// Client sends its current input mask (unreliable).
    CInput = 0x20 => { Reliability::Unreliable, Origin::Client, PayloadKind::Fixed(1) },
    /// Server sends an authoritative position correction (unreliable).
    SUpdatePos = 0x21 => { Reliability::Unreliable, Origin::Server, PayloadKind::Fixed(8) },
    /// Client sends a chat message.
    CChat = 0x30 => { Reliability::Reliable, Origin::Client, PayloadKind::Fixed(260) },
    /// Server relays a chat message.
    SChat = 0x31 => { Reliability::Reliable, Origin::Server, PayloadKind::Fixed(260) },
    /// Client pings the server for latency measurement (unreliable).
    Ping = 0xF0 => { Reliability::Unreliable, Origin::Client, PayloadKind::Fixed(0) },
    /// Server responds to a ping (unreliable).
    Pong = 0xF1 => { Reliability::Unreliable, Origin::Server, PayloadKind::Fixed(0) },
    /// Dedicated acknowledgement carrier, either direction (unreliable).
    Ack = 0xF2 => { Reliability::Unreliable, Origin::Both, PayloadKind::Fixed(0) },
}

impl OpCode {
    /// Whether this opcode is delivered reliably.
    #[must_use]
    pub const fn is_reliable(self) -> bool {
        matches!(self.info().reliability, Reliability::Reliable)
    }
}

/// Reads the leading count byte of a [`PayloadKind::Variable`] payload
/// without consuming the rest of the buffer - used by the validator and by
/// per-opcode entry iterators.
///
/// # Errors
///
/// [`CodecError::BufferTooShort`] if `payload` is empty.
pub fn peek_entry_count(payload: &Bytes) -> Result<u8, CodecError> {
    let mut head = payload.clone();
    get_u8(&mut head)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_known_byte() {
        for byte in 0u8..=255 {
            if let Some(op) = OpCode::from_byte(byte) {
                assert_eq!(op.to_byte(), byte);
            }
        }
    }

    #[test]
    fn unknown_bytes_reject() {
        for byte in [0x00, 0x0F, 0x1F, 0x22, 0x32, 0xF3, 0xFF] {
            assert!(OpCode::from_byte(byte).is_none(), "byte {byte:#04x}");
        }
    }

    #[test]
    fn reliability_matches_spec_table() {
        assert!(OpCode::CConnect.is_reliable());
        assert!(OpCode::SEntitySpawn.is_reliable());
        assert!(!OpCode::SEntityMove.is_reliable());
        assert!(!OpCode::CInput.is_reliable());
        assert!(!OpCode::Ping.is_reliable());
        assert!(!OpCode::Ack.is_reliable());
        assert!(OpCode::Disconnect.is_reliable());
    }

    #[test]
    fn move_batch_validator_cap() {
        let PayloadKind::Variable { max_count, .. } = OpCode::SEntityMoveBatch.info().payload
        else {
            panic!("expected variable payload");
        };
        assert_eq!(max_count, 114);
    }
}
