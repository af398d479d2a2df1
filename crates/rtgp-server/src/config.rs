//! Tunables for one [`crate::Server`].

use std::time::Duration;

use rtgp_protocol::{PositionScale, ReliableConfig};

/// Default duration of silence (no validated datagram) before a peer is
/// evicted as timed out (§4.7 "Tick").
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bundles the knobs a server needs: per-peer reliable-channel behavior,
/// the idle-eviction timeout, the quantization scale egress helpers use, and
/// the lobby join gate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServerConfig {
    /// Retransmit timeout, retry cap, anti-replay window (§4.4), applied to
    /// every peer's [`rtgp_protocol::ReliableChannel`].
    pub reliable: ReliableConfig,
    /// How long a peer may stay silent before [`crate::Server::tick`] evicts
    /// it with [`rtgp_protocol::error::DisconnectReason::Timeout`]. Default
    /// 10 s (§4.7).
    pub client_timeout: Duration,
    /// World-space-to-wire scale for quantized position/velocity fields,
    /// mirroring the client's own `position_scale` so both ends agree
    /// without the wire carrying the scale itself.
    pub position_scale: PositionScale,
    /// Capacity of the bounded event queue [`crate::Server::poll`] drains.
    pub event_queue_capacity: usize,
    /// Six-byte lobby code clients must supply via `C_JOIN_LOBBY` before
    /// `C_INPUT`/`C_READY`/`C_GET_USERS` are honored. `None` disables the
    /// gate (every peer is treated as already joined) - the source's
    /// equivalent is an empty `expectedLobbyCode`.
    pub required_lobby_code: Option<[u8; 6]>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            reliable: ReliableConfig::default(),
            client_timeout: DEFAULT_CLIENT_TIMEOUT,
            position_scale: PositionScale::default(),
            event_queue_capacity: 256,
            required_lobby_code: None,
        }
    }
}
