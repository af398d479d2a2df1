//! Tunables for one [`crate::Client`].

use rtgp_protocol::{ConnectionConfig, PositionScale, ReliableConfig};

/// Bundles the three independently-tunable knobs a client needs: connection
/// lifecycle timers, reliable-channel retransmit behavior, and the
/// position/velocity fixed-point scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClientConfig {
    /// Connect/disconnect/heartbeat timers (§4.5).
    pub connection: ConnectionConfig,
    /// Retransmit timeout, retry cap, anti-replay window (§4.4).
    pub reliable: ReliableConfig,
    /// World-space-to-wire scale for quantized position/velocity fields.
    pub position_scale: PositionScale,
    /// Capacity of the bounded event queue [`crate::Client::poll`] drains.
    /// Once full, the oldest undrained event is dropped (a slow-polling
    /// application loses history rather than stalling the I/O task).
    pub event_queue_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            reliable: ReliableConfig::default(),
            position_scale: PositionScale::default(),
            event_queue_capacity: 256,
        }
    }
}
