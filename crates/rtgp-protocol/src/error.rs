//! Error taxonomy shared across the protocol core.
//!
//! Every fallible operation in this crate returns one of these enums rather
//! than panicking or relying on a process-wide error sink - orchestrators
//! built on top of this crate are expected to map these to policy (drop,
//! log, disconnect) per their own error-handling design.

use thiserror::Error;

use crate::opcode::OpCode;

/// Errors produced while validating a received datagram (§4.3).
///
/// Checks run in a fixed order and the first failing check's error is
/// returned - callers should not infer that later checks also passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Datagram is shorter than the 16-byte header.
    #[error("packet too small: {size} bytes")]
    PacketTooSmall {
        /// Total datagram size in bytes.
        size: usize,
    },
    /// Datagram exceeds the 1400-byte maximum.
    #[error("packet too large: {size} bytes")]
    PacketTooLarge {
        /// Total datagram size in bytes.
        size: usize,
    },
    /// The first byte was not `0xA1`.
    #[error("invalid magic byte: {byte:#04x}")]
    InvalidMagic {
        /// The byte that was found in place of the magic.
        byte: u8,
    },
    /// The opcode byte did not match any known [`OpCode`].
    #[error("unknown opcode: {byte:#04x}")]
    UnknownOpcode {
        /// The unrecognized opcode byte.
        byte: u8,
    },
    /// A reserved header byte was non-zero, the declared `payload_size`
    /// did not match the datagram's actual length, or (for variable-length
    /// opcodes) the declared entry count didn't match the payload length or
    /// exceeded its cap.
    #[error("malformed packet")]
    MalformedPacket,
    /// `user_id` did not satisfy the rule for the claimed origin and opcode.
    #[error("invalid user id: {user_id:#010x} for opcode {opcode:?}")]
    InvalidUserId {
        /// The offending user id.
        user_id: u32,
        /// The opcode the user id was carried on.
        opcode: OpCode,
    },
}

/// Errors produced by the reliable channel (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReliableError {
    /// [`crate::reliable::ReliableChannel::track_outgoing`] was called twice
    /// for the same `seq_id` without the first being cleaned up.
    #[error("seq_id {0} is already tracked for retransmit")]
    DuplicateOutgoing(u16),
    /// An incoming `seq_id` falls outside the anti-replay window behind the
    /// current highest received sequence number.
    #[error("seq_id {seq_id} is {distance} packets behind the anti-replay window")]
    InvalidSequence {
        /// The rejected sequence id.
        seq_id: u16,
        /// How far behind the window edge it fell.
        distance: u32,
    },
    /// An incoming `seq_id` has already been recorded as received.
    #[error("duplicate packet: seq_id {0}")]
    DuplicatePacket(u16),
    /// A tracked outgoing entry reached its retry cap without being
    /// acknowledged - fatal for the owning peer/connection.
    #[error("retry limit exceeded for seq_id {0}")]
    RetryLimitExceeded(u16),
}

/// Errors produced by the connection state machine (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid state transition: cannot {attempted} while {current:?}")]
pub struct InvalidStateTransition {
    /// The state the machine was in when the transition was attempted.
    pub current: crate::connection::ConnectionState,
    /// A short name for the attempted transition, for diagnostics.
    pub attempted: &'static str,
}

/// Reason a connection or peer was disconnected, coded onto the wire in the
/// `DISCONNECT` opcode's payload (§6.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
pub enum DisconnectReason {
    /// The peer (or this side) asked to disconnect, and it was acknowledged.
    LocalRequest,
    /// The remote peer sent a `DISCONNECT` frame.
    RemoteRequest,
    /// No valid datagram was seen within the heartbeat timeout.
    Timeout,
    /// A connect attempt exhausted its retry budget.
    MaxRetriesExceeded,
    /// A reliable channel's retry cap was reached for an outgoing frame.
    RetryLimitExceeded,
    /// An external ban predicate rejected the endpoint.
    Banned,
    /// An unrecognized wire reason code - reserved for forward
    /// compatibility, never produced by this implementation.
    Unknown(u8),
}

impl DisconnectReason {
    /// Stable 8-bit wire reason code.
    #[must_use]
    pub const fn to_wire(self) -> u8 {
        match self {
            Self::LocalRequest => 0,
            Self::RemoteRequest => 1,
            Self::Timeout => 2,
            Self::MaxRetriesExceeded => 3,
            Self::RetryLimitExceeded => 4,
            Self::Banned => 5,
            Self::Unknown(code) => code,
        }
    }

    /// Decodes a wire reason code, mapping anything unrecognized to
    /// [`DisconnectReason::Unknown`] rather than failing - a reason code is
    /// diagnostic information, not something worth dropping a frame over.
    #[must_use]
    pub const fn from_wire(code: u8) -> Self {
        match code {
            0 => Self::LocalRequest,
            1 => Self::RemoteRequest,
            2 => Self::Timeout,
            3 => Self::MaxRetriesExceeded,
            4 => Self::RetryLimitExceeded,
            5 => Self::Banned,
            other => Self::Unknown(other),
        }
    }
}
