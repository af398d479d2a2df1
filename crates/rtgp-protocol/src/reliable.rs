//! Anti-replay window and per-peer selective-repeat ARQ (§4.4).
//!
//! Two types live here:
//!
//! - [`AntiReplayWindow`]: a bounded, wrap-aware "recently seen sequence
//!   numbers" set. This is the piece the original source reimplemented
//!   twice (once inside its `ReliableChannel`, once inline in the server's
//!   per-connection security bookkeeping) - here it is one type used in both
//!   places, so the wrap-aware pruning logic exists exactly once.
//! - [`ReliableChannel`]: the full selective-repeat layer (outgoing
//!   retransmit tracking plus an [`AntiReplayWindow`] for its incoming
//!   half).

use std::time::{Duration, Instant};

use ahash::{AHashMap, AHashSet};
use tracing::trace;

use crate::error::ReliableError;
use crate::seq::Seq;

/// Default anti-replay / duplicate-detection window size.
pub const DEFAULT_WINDOW: u32 = 1000;

/// A bounded set of recently-seen sequence numbers plus the highest one
/// seen, with wrap-aware pruning.
#[derive(Debug, Clone)]
pub struct AntiReplayWindow {
    received: AHashSet<u16>,
    highest: Option<Seq>,
    window: u32,
}

impl AntiReplayWindow {
    /// Builds an empty window that retains up to `window` recent entries
    /// behind the current highest.
    #[must_use]
    pub fn new(window: u32) -> Self {
        Self {
            received: AHashSet::new(),
            highest: None,
            window,
        }
    }

    /// Membership test against the received set.
    #[must_use]
    pub fn is_duplicate(&self, seq: Seq) -> bool {
        self.received.contains(&seq.0)
    }

    /// The highest sequence number ever recorded, i.e. the value that
    /// belongs in an outgoing `ack_id` field.
    #[must_use]
    pub const fn highest(&self) -> Option<Seq> {
        self.highest
    }

    /// Number of sequence numbers currently retained.
    #[must_use]
    pub fn len(&self) -> usize {
        self.received.len()
    }

    /// Whether the window currently retains no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.received.is_empty()
    }

    /// Records `seq` as received.
    ///
    /// If `seq` is strictly newer than the current highest (16-bit
    /// wrap-aware), the highest is advanced and the set is pruned to drop
    /// entries whose wrap-distance from the new highest exceeds the window.
    ///
    /// # Errors
    ///
    /// [`ReliableError::DuplicatePacket`] if `seq` is already in the set.
    /// [`ReliableError::InvalidSequence`] if `seq` falls more than `window`
    /// steps behind the current highest.
    pub fn record_received(&mut self, seq: Seq) -> Result<(), ReliableError> {
        if self.is_duplicate(seq) {
            return Err(ReliableError::DuplicatePacket(seq.0));
        }
        if let Some(highest) = self.highest {
            let distance = seq.wrapping_distance(highest);
            if distance < 0 && distance.unsigned_abs() > self.window {
                return Err(ReliableError::InvalidSequence {
                    seq_id: seq.0,
                    distance: distance.unsigned_abs(),
                });
            }
        }

        self.received.insert(seq.0);

        if self.highest.is_none_or(|h| seq > h) {
            self.highest = Some(seq);
            let highest = seq;
            let window = self.window;
            self.received
                .retain(|&id| highest.wrapping_distance(Seq(id)).unsigned_abs() <= window);
        }

        Ok(())
    }

    /// Drops every retained entry and forgets the highest seen.
    pub fn clear(&mut self) {
        self.received.clear();
        self.highest = None;
    }
}

/// Tuning for one [`ReliableChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReliableConfig {
    /// How long an unacked outgoing frame waits before being retransmitted.
    /// Default 200 ms.
    pub retransmit_timeout: Duration,
    /// Retransmit attempts tolerated before [`ReliableError::RetryLimitExceeded`].
    /// Default 5.
    pub max_retries: u32,
    /// Anti-replay window size for the incoming half. Default 1000.
    pub window: u32,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            retransmit_timeout: Duration::from_millis(200),
            max_retries: 5,
            window: DEFAULT_WINDOW,
        }
    }
}

#[derive(Debug, Clone)]
struct OutgoingEntry {
    frame: Vec<u8>,
    sent_at: Instant,
    retry_count: u32,
    acked: bool,
}

/// Per-peer selective-repeat ARQ layer: tracks outgoing reliable sends for
/// retransmit and exposes an [`AntiReplayWindow`] for incoming duplicate
/// detection and the outgoing piggyback `ack_id`.
#[derive(Debug)]
pub struct ReliableChannel {
    outgoing: AHashMap<u16, OutgoingEntry>,
    incoming: AntiReplayWindow,
    config: ReliableConfig,
}

impl ReliableChannel {
    /// Builds an empty channel.
    #[must_use]
    pub fn new(config: ReliableConfig) -> Self {
        Self {
            outgoing: AHashMap::new(),
            incoming: AntiReplayWindow::new(config.window),
            config,
        }
    }

    /// Records `frame` for potential retransmit under `seq_id`.
    ///
    /// # Errors
    ///
    /// [`ReliableError::DuplicateOutgoing`] if `seq_id` is already tracked.
    pub fn track_outgoing(&mut self, seq_id: Seq, frame: Vec<u8>, now: Instant) -> Result<(), ReliableError> {
        if self.outgoing.contains_key(&seq_id.0) {
            return Err(ReliableError::DuplicateOutgoing(seq_id.0));
        }
        self.outgoing.insert(
            seq_id.0,
            OutgoingEntry {
                frame,
                sent_at: now,
                retry_count: 0,
                acked: false,
            },
        );
        Ok(())
    }

    /// Marks the outgoing entry for `ack_id` as acked. Unknown ids are
    /// silently ignored - the ack may reference a frame already cleaned up.
    pub fn record_ack(&mut self, ack_id: Seq) {
        if let Some(entry) = self.outgoing.get_mut(&ack_id.0) {
            entry.acked = true;
        }
    }

    /// Membership test on the incoming received set.
    #[must_use]
    pub fn is_duplicate(&self, seq_id: Seq) -> bool {
        self.incoming.is_duplicate(seq_id)
    }

    /// Records an incoming `seq_id`, see [`AntiReplayWindow::record_received`].
    ///
    /// # Errors
    ///
    /// See [`AntiReplayWindow::record_received`].
    pub fn record_received(&mut self, seq_id: Seq) -> Result<(), ReliableError> {
        self.incoming.record_received(seq_id)
    }

    /// The highest sequence number ever received, for the outgoing `ack_id`.
    #[must_use]
    pub const fn last_received_seq_id(&self) -> Option<Seq> {
        self.incoming.highest()
    }

    /// Number of outgoing entries still awaiting acknowledgement or cleanup.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.outgoing.len()
    }

    /// Number of sequence numbers retained in the incoming window.
    #[must_use]
    pub fn received_count(&self) -> usize {
        self.incoming.len()
    }

    /// Returns every outgoing frame due for retransmit, incrementing its
    /// retry count and refreshing its `sent_at` as it does so.
    ///
    /// Results are ordered by sequence number for determinism; the protocol
    /// does not require any particular retransmit order.
    pub fn tick(&mut self, now: Instant) -> Vec<(Seq, Vec<u8>)> {
        let timeout = self.config.retransmit_timeout;
        let max_retries = self.config.max_retries;
        let mut due: Vec<(Seq, Vec<u8>)> = self
            .outgoing
            .iter_mut()
            .filter(|(_, entry)| {
                !entry.acked && entry.retry_count < max_retries && now.duration_since(entry.sent_at) >= timeout
            })
            .map(|(&seq, entry)| {
                entry.retry_count += 1;
                entry.sent_at = now;
                trace!(seq_id = seq, retry = entry.retry_count, "retransmitting frame");
                (Seq(seq), entry.frame.clone())
            })
            .collect();
        due.sort_by_key(|(seq, _)| seq.0);
        due
    }

    /// Drops acked entries; reports the first remaining entry that has
    /// reached the retry cap, if any - fatal for the owning peer.
    ///
    /// # Errors
    ///
    /// [`ReliableError::RetryLimitExceeded`] if any unacked entry's retry
    /// count has reached `max_retries`.
    pub fn cleanup(&mut self) -> Result<(), ReliableError> {
        self.outgoing.retain(|_, entry| !entry.acked);
        let max_retries = self.config.max_retries;
        let mut exhausted: Vec<u16> = self
            .outgoing
            .iter()
            .filter(|(_, entry)| entry.retry_count >= max_retries)
            .map(|(&seq, _)| seq)
            .collect();
        exhausted.sort_unstable();
        if let Some(seq) = exhausted.into_iter().next() {
            return Err(ReliableError::RetryLimitExceeded(seq));
        }
        Ok(())
    }

    /// Drops all outgoing and incoming state. Called on disconnect.
    pub fn clear(&mut self) {
        self.outgoing.clear();
        self.incoming.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_detection_is_idempotent() {
        let mut window = AntiReplayWindow::new(1000);
        window.record_received(Seq(5)).unwrap();
        assert!(window.is_duplicate(Seq(5)));
        assert!(matches!(
            window.record_received(Seq(5)),
            Err(ReliableError::DuplicatePacket(5))
        ));
    }

    #[test]
    fn wrap_advances_highest() {
        let mut window = AntiReplayWindow::new(1000);
        window.record_received(Seq(65535)).unwrap();
        window.record_received(Seq(0)).unwrap();
        assert_eq!(window.highest(), Some(Seq(0)));
    }

    #[test]
    fn far_behind_is_rejected() {
        let mut window = AntiReplayWindow::new(1000);
        window.record_received(Seq(100)).unwrap();
        let stale = Seq(100u16.wrapping_sub(1001));
        assert!(matches!(
            window.record_received(stale),
            Err(ReliableError::InvalidSequence { .. })
        ));
    }

    #[test]
    fn prunes_outside_window_after_wrap() {
        let mut window = AntiReplayWindow::new(5);
        for s in 0..=5u16 {
            window.record_received(Seq(s)).unwrap();
        }
        assert!(!window.is_duplicate(Seq(0)));
        assert!(window.is_duplicate(Seq(5)));
    }

    #[test]
    fn track_outgoing_rejects_duplicate_seq() {
        let mut channel = ReliableChannel::new(ReliableConfig::default());
        let now = Instant::now();
        channel.track_outgoing(Seq(1), vec![0xAA], now).unwrap();
        assert!(matches!(
            channel.track_outgoing(Seq(1), vec![0xBB], now),
            Err(ReliableError::DuplicateOutgoing(1))
        ));
    }

    #[test]
    fn unacked_entry_is_retransmitted_then_cleaned_up_on_ack() {
        let mut config = ReliableConfig::default();
        config.retransmit_timeout = Duration::from_millis(50);
        let mut channel = ReliableChannel::new(config);
        let start = Instant::now();
        channel.track_outgoing(Seq(7), vec![0xCC], start).unwrap();

        assert!(channel.tick(start + Duration::from_millis(10)).is_empty());

        let due = channel.tick(start + Duration::from_millis(60));
        assert_eq!(due, vec![(Seq(7), vec![0xCC])]);

        channel.record_ack(Seq(7));
        channel.cleanup().unwrap();
        assert_eq!(channel.pending_count(), 0);
    }

    #[test]
    fn retry_cap_is_fatal() {
        let mut config = ReliableConfig::default();
        config.retransmit_timeout = Duration::from_millis(1);
        config.max_retries = 2;
        let mut channel = ReliableChannel::new(config);
        let start = Instant::now();
        channel.track_outgoing(Seq(3), vec![0x01], start).unwrap();

        let mut now = start;
        for _ in 0..2 {
            now += Duration::from_millis(10);
            channel.tick(now);
        }
        assert!(matches!(
            channel.cleanup(),
            Err(ReliableError::RetryLimitExceeded(3))
        ));
    }
}
