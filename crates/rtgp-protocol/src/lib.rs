//! Sans-IO core of the RTGP protocol: byte codec, frame header and opcode
//! registry, datagram validator, per-peer reliable channel, and connection
//! lifecycle state machine.
//!
//! This crate has no socket, no async runtime, and no global logger - it is
//! pure functions and plain structs over byte buffers and timestamps. The
//! [`rtgp-net`](https://docs.rs/rtgp-net) crate supplies a concrete async
//! UDP backend; the `rtgp-client`/`rtgp-server` crates wire this crate and
//! that backend together into runnable orchestrators.

pub mod codec;
pub mod connection;
pub mod diagnostics;
pub mod error;
pub mod header;
pub mod opcode;
pub mod payload;
pub mod reliable;
pub mod seq;
pub mod validate;

pub use codec::{CodecError, WireDecode, WireEncode};
pub use connection::{Config as ConnectionConfig, ConnectionCallbacks, ConnectionState, ConnectionStateMachine, TickAction};
pub use diagnostics::Diagnostic;
pub use error::{DisconnectReason, InvalidStateTransition, ReliableError, ValidationError};
pub use header::{Flags, Header, DEFAULT_SERVER_PORT, HEADER_LEN, MAX_DATAGRAM_SIZE, MAX_PAYLOAD_SIZE, SERVER_USER_ID, UNASSIGNED_USER_ID};
pub use opcode::{OpCode, Origin, PayloadKind, Reliability};
pub use reliable::{AntiReplayWindow, ReliableChannel, ReliableConfig};
pub use seq::Seq;
pub use validate::{ValidatedFrame, validate};
