//! Structured diagnostic events, the direct counterpart of §9's "the core
//! must not depend on a process-wide logger; it emits diagnostics through a
//! caller-provided sink or returns structured errors."
//!
//! Every variant here is also traced via `tracing` at the point it is
//! raised (`debug!`/`trace!`/`warn!`, same as the rest of the crate family) -
//! this type exists *alongside* `tracing`, not instead of it, for callers
//! that want structured events without wiring up a subscriber.

use std::net::SocketAddr;

use crate::error::DisconnectReason;
use crate::opcode::OpCode;

/// One structured, non-fatal event an orchestrator's ingress/tick loop
/// raised while handling a datagram or peer.
///
/// `from` is `None` only for diagnostics that are not about a single
/// datagram (currently none; kept `Option` so a future variant can omit
/// it without a breaking change).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// A datagram failed header/opcode/size validation and was dropped.
    InvalidDatagram {
        /// Who sent it.
        from: SocketAddr,
        /// `Display` of the [`crate::error::ValidationError`] that rejected it.
        reason: String,
    },
    /// A datagram whose opcode's declared origin does not match who sent it
    /// (a client claiming a server-only opcode, or vice versa).
    UnexpectedOpcode {
        /// Who sent it.
        from: SocketAddr,
        /// The opcode claimed.
        opcode: OpCode,
    },
    /// A `seq_id` already present in the receiver's anti-replay window.
    DuplicateFrame {
        /// Who sent it.
        from: SocketAddr,
        /// The repeated sequence number.
        seq_id: u16,
    },
    /// A `seq_id` rejected by the reliable channel's wrap-aware window check
    /// (too far behind the highest seen).
    SequenceRejected {
        /// Who sent it.
        from: SocketAddr,
        /// The rejected sequence number.
        seq_id: u16,
    },
    /// A frame whose opcode validated but whose payload failed to decode.
    MalformedPayload {
        /// Who sent it.
        from: SocketAddr,
        /// The opcode whose payload could not be decoded.
        opcode: OpCode,
        /// `Display` of the [`crate::error::CodecError`] that rejected it.
        reason: String,
    },
    /// A peer was evicted without a graceful `DISCONNECT` exchange.
    PeerEvicted {
        /// The peer's server-assigned id, where one exists (always present
        /// server-side; client-side diagnostics about its own connection do
        /// not raise this - see [`crate::error::DisconnectReason`] on
        /// `ClientEvent`/`ServerEvent` instead).
        user_id: u32,
        /// Why the peer was evicted.
        reason: DisconnectReason,
    },
}
