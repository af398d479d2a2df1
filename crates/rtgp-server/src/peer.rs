//! One connected remote endpoint, from the server's point of view (§3
//! "Peer"), and the `user_id` allocator peers are assigned from (§4.7
//! "User-id assignment").
//!
//! Unlike [`rtgp_protocol::ConnectionStateMachine`], a peer carries no
//! lifecycle state variable: the source's own `ClientConnection` has none
//! either - a server-side peer exists from the instant its `C_CONNECT` is
//! accepted to the instant it is removed, with no "connecting" phase of its
//! own (that phase only exists from the *client's* point of view). See
//! `DESIGN.md` for the full rationale.

use std::net::SocketAddr;
use std::time::Instant;

use rtgp_protocol::header::{MAX_CLIENT_USER_ID, MIN_CLIENT_USER_ID};
use rtgp_protocol::payload::BandwidthMode;
use rtgp_protocol::reliable::ReliableChannel;
use rtgp_protocol::seq::Seq;

/// One connected client, keyed elsewhere by its socket address ("connection
/// key", §3).
#[derive(Debug)]
pub struct Peer {
    /// Network identity and connection key.
    pub addr: SocketAddr,
    /// Server-assigned id, stable for the life of this peer.
    pub user_id: u32,
    /// Outgoing retransmit tracking plus the incoming anti-replay window.
    pub channel: ReliableChannel,
    /// This peer's next outgoing `seq_id`.
    pub next_seq: Seq,
    /// Updated on every validated datagram; compared against
    /// [`crate::config::ServerConfig::client_timeout`] each tick.
    pub last_activity: Instant,
    /// Set once `C_JOIN_LOBBY` succeeds; gates input/game-action opcodes
    /// when [`crate::config::ServerConfig::required_lobby_code`] is `Some`.
    pub joined_lobby: bool,
    /// Last bandwidth mode this peer requested via `C_SET_BANDWIDTH_MODE`.
    pub bandwidth_mode: BandwidthMode,
}

impl Peer {
    /// Builds a freshly accepted peer with empty reliable-channel state.
    #[must_use]
    pub fn new(addr: SocketAddr, user_id: u32, reliable: rtgp_protocol::ReliableConfig, now: Instant) -> Self {
        Self {
            addr,
            user_id,
            channel: ReliableChannel::new(reliable),
            next_seq: Seq::default(),
            last_activity: now,
            joined_lobby: false,
            bandwidth_mode: BandwidthMode::Normal,
        }
    }
}

/// Recycles `user_id`s to a LIFO free-list, falling back to a monotonic
/// counter that wraps within the legal client range (§4.7 "User-id
/// assignment").
#[derive(Debug, Clone)]
pub struct UserIdAllocator {
    free: Vec<u32>,
    next: u32,
}

impl Default for UserIdAllocator {
    fn default() -> Self {
        Self {
            free: Vec::new(),
            next: MIN_CLIENT_USER_ID,
        }
    }
}

impl UserIdAllocator {
    /// Builds an allocator with an empty free-list, starting the counter at
    /// [`MIN_CLIENT_USER_ID`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next id: the most recently freed one if any are
    /// available, else the counter, post-incremented and wrapped back to
    /// [`MIN_CLIENT_USER_ID`] once it reaches [`MAX_CLIENT_USER_ID`].
    #[must_use]
    pub fn allocate(&mut self) -> u32 {
        if let Some(id) = self.free.pop() {
            return id;
        }
        let id = self.next;
        self.next = if id >= MAX_CLIENT_USER_ID { MIN_CLIENT_USER_ID } else { id + 1 };
        id
    }

    /// Returns `id` to the free-list for reuse by a future [`Self::allocate`].
    pub fn release(&mut self, id: u32) {
        self.free.push(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_sequentially_from_the_minimum() {
        let mut ids = UserIdAllocator::new();
        assert_eq!(ids.allocate(), 1);
        assert_eq!(ids.allocate(), 2);
    }

    #[test]
    fn prefers_the_free_list_lifo() {
        let mut ids = UserIdAllocator::new();
        let a = ids.allocate();
        let b = ids.allocate();
        ids.release(a);
        ids.release(b);
        assert_eq!(ids.allocate(), b);
        assert_eq!(ids.allocate(), a);
    }

    #[test]
    fn counter_wraps_at_the_max_client_id() {
        let mut ids = UserIdAllocator::new();
        ids.next = MAX_CLIENT_USER_ID;
        assert_eq!(ids.allocate(), MAX_CLIENT_USER_ID);
        assert_eq!(ids.allocate(), MIN_CLIENT_USER_ID);
    }
}
