//! Per-peer connection lifecycle (§4.5).
//!
//! Four states, a fixed set of legal transitions, and two timers
//! (`connect_timeout`, `heartbeat_timeout`) plus a flush timer
//! (`disconnect_timeout`). Every illegal transition returns
//! [`InvalidStateTransition`] rather than panicking - callers (the client
//! and server orchestrators) decide what an illegal transition means for
//! them, this type only enforces which ones are legal.

use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::error::{DisconnectReason, InvalidStateTransition};

/// One of the four lifecycle states a connection or peer can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
pub enum ConnectionState {
    /// No handshake in progress; the initial and final state.
    Disconnected,
    /// `C_CONNECT` sent, awaiting `S_ACCEPT`.
    Connecting,
    /// Handshake complete; data frames flow.
    Connected,
    /// `DISCONNECT` sent, awaiting acknowledgement or flush timeout.
    Disconnecting,
}

impl ConnectionState {
    /// Whether this state has no further transitions pending - i.e. the
    /// connection can be torn down without losing in-flight protocol state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected)
    }
}

/// Result of one [`ConnectionStateMachine::tick`] call, telling the
/// orchestrator what (if anything) it must do in response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    /// Nothing timed out this tick.
    NoAction,
    /// The connect attempt timed out but retries remain; the orchestrator
    /// should re-send `C_CONNECT`. The state machine does not send anything
    /// itself.
    ShouldRetryConnect,
    /// The connection timed out and moved to [`ConnectionState::Disconnected`]
    /// (either the connect retry budget or the heartbeat timeout was
    /// exceeded).
    ConnectionTimedOut,
    /// The graceful disconnect flush window elapsed; the connection is now
    /// [`ConnectionState::Disconnected`] with [`DisconnectReason::LocalRequest`].
    DisconnectComplete,
}

/// Timers governing state-machine transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    /// How long a single connect attempt (`Connecting`) is given before it
    /// is retried or abandoned. Default 2 s.
    pub connect_timeout: Duration,
    /// How long `Disconnecting` waits for a `DISCONNECT` acknowledgement
    /// before giving up and finalizing locally anyway. Default 1 s.
    pub disconnect_timeout: Duration,
    /// How long `Connected` tolerates silence (no validated datagram) before
    /// declaring the peer dead. Reset by [`ConnectionStateMachine::record_activity`].
    /// Default 10 s.
    pub heartbeat_timeout: Duration,
    /// Interval on which the orchestrator should proactively send a
    /// keepalive (`PING`) while `Connected` and otherwise idle. Not enforced
    /// by the state machine itself. Default 1 s.
    pub heartbeat_interval: Duration,
    /// Number of connect_timeout expirations tolerated before a connect
    /// attempt gives up with [`DisconnectReason::MaxRetriesExceeded`].
    /// Default 3.
    pub max_connect_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            disconnect_timeout: Duration::from_secs(1),
            heartbeat_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(1),
            max_connect_retries: 3,
        }
    }
}

/// Optional lifecycle hooks, invoked synchronously from inside the
/// state-changing method that triggers them.
///
/// These run on whatever thread calls the state machine - for the client and
/// server orchestrators that is always the tick/ingress thread, never an I/O
/// completion. Stored as a plain struct owned by the state machine (rather
/// than the machine and its callbacks holding references to each other) so
/// there is no cycle to break.
#[derive(Default)]
pub struct ConnectionCallbacks {
    /// Called on every state transition with the old and new state.
    pub on_state_change: Option<Box<dyn FnMut(ConnectionState, ConnectionState) + Send>>,
    /// Called when the handshake completes, with the assigned `user_id`.
    pub on_connected: Option<Box<dyn FnMut(u32) + Send>>,
    /// Called when the connection reaches `Disconnected` from any other
    /// state, with the reason.
    pub on_disconnected: Option<Box<dyn FnMut(DisconnectReason) + Send>>,
    /// Called specifically when a connect attempt fails outright (retry
    /// budget exhausted) rather than succeeding or being cancelled.
    pub on_connect_failed: Option<Box<dyn FnMut(DisconnectReason) + Send>>,
}

impl std::fmt::Debug for ConnectionCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionCallbacks")
            .field("on_state_change", &self.on_state_change.is_some())
            .field("on_connected", &self.on_connected.is_some())
            .field("on_disconnected", &self.on_disconnected.is_some())
            .field("on_connect_failed", &self.on_connect_failed.is_some())
            .finish()
    }
}

/// Per-peer (or, client-side, per-connection) lifecycle state machine.
#[derive(Debug)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    state_entered_at: Instant,
    last_activity: Instant,
    retry_count: u32,
    last_disconnect_reason: Option<DisconnectReason>,
    config: Config,
    callbacks: ConnectionCallbacks,
}

impl ConnectionStateMachine {
    /// Builds a new machine in [`ConnectionState::Disconnected`].
    #[must_use]
    pub fn new(config: Config, now: Instant) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            state_entered_at: now,
            last_activity: now,
            retry_count: 0,
            last_disconnect_reason: None,
            config,
            callbacks: ConnectionCallbacks::default(),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// The reason the connection last reached `Disconnected`, if any.
    #[must_use]
    pub const fn last_disconnect_reason(&self) -> Option<DisconnectReason> {
        self.last_disconnect_reason
    }

    /// Number of connect retries consumed by the current (or most recent)
    /// connect attempt.
    #[must_use]
    pub const fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Grants mutable access to the lifecycle callbacks, for registration.
    pub fn callbacks_mut(&mut self) -> &mut ConnectionCallbacks {
        &mut self.callbacks
    }

    fn enter(&mut self, new: ConnectionState, now: Instant) {
        let old = self.state;
        self.state = new;
        self.state_entered_at = now;
        trace!(?old, ?new, "connection state transition");
        if let Some(cb) = &mut self.callbacks.on_state_change {
            cb(old, new);
        }
    }

    fn finalize_disconnected(&mut self, reason: DisconnectReason, now: Instant) {
        self.enter(ConnectionState::Disconnected, now);
        self.last_disconnect_reason = Some(reason);
        if let Some(cb) = &mut self.callbacks.on_disconnected {
            cb(reason);
        }
    }

    fn reject(&self, attempted: &'static str) -> InvalidStateTransition {
        debug!(current = ?self.state, attempted, "rejected connection state transition");
        InvalidStateTransition {
            current: self.state,
            attempted,
        }
    }

    /// `Disconnected --initiate_connect--> Connecting`.
    ///
    /// # Errors
    ///
    /// [`InvalidStateTransition`] unless currently `Disconnected`.
    pub fn initiate_connect(&mut self, now: Instant) -> Result<(), InvalidStateTransition> {
        if self.state != ConnectionState::Disconnected {
            return Err(self.reject("initiate_connect"));
        }
        self.retry_count = 0;
        self.last_activity = now;
        self.enter(ConnectionState::Connecting, now);
        Ok(())
    }

    /// `Connecting --handle_accept(id)--> Connected`.
    ///
    /// # Errors
    ///
    /// [`InvalidStateTransition`] unless currently `Connecting`.
    pub fn handle_accept(&mut self, user_id: u32, now: Instant) -> Result<(), InvalidStateTransition> {
        if self.state != ConnectionState::Connecting {
            return Err(self.reject("handle_accept"));
        }
        self.last_activity = now;
        self.enter(ConnectionState::Connected, now);
        if let Some(cb) = &mut self.callbacks.on_connected {
            cb(user_id);
        }
        Ok(())
    }

    /// `{Connecting, Connected} --initiate_disconnect--> Disconnecting`.
    ///
    /// # Errors
    ///
    /// [`InvalidStateTransition`] unless currently `Connecting` or `Connected`.
    pub fn initiate_disconnect(&mut self, now: Instant) -> Result<(), InvalidStateTransition> {
        if !matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            return Err(self.reject("initiate_disconnect"));
        }
        self.enter(ConnectionState::Disconnecting, now);
        Ok(())
    }

    /// `Connected --handle_remote_disconnect--> Disconnected(RemoteRequest)`.
    ///
    /// # Errors
    ///
    /// [`InvalidStateTransition`] unless currently `Connected`.
    pub fn handle_remote_disconnect(&mut self, now: Instant) -> Result<(), InvalidStateTransition> {
        if self.state != ConnectionState::Connected {
            return Err(self.reject("handle_remote_disconnect"));
        }
        self.finalize_disconnected(DisconnectReason::RemoteRequest, now);
        Ok(())
    }

    /// `Disconnecting --handle_disconnect_ack--> Disconnected(LocalRequest)`.
    ///
    /// # Errors
    ///
    /// [`InvalidStateTransition`] unless currently `Disconnecting`.
    pub fn handle_disconnect_ack(&mut self, now: Instant) -> Result<(), InvalidStateTransition> {
        if self.state != ConnectionState::Disconnecting {
            return Err(self.reject("handle_disconnect_ack"));
        }
        self.finalize_disconnected(DisconnectReason::LocalRequest, now);
        Ok(())
    }

    /// `any --force_disconnect(reason)--> Disconnected(reason)`.
    ///
    /// Always succeeds. A no-op (no callback fires) if already
    /// `Disconnected`, since no transition actually occurs.
    pub fn force_disconnect(&mut self, reason: DisconnectReason, now: Instant) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        self.finalize_disconnected(reason, now);
    }

    /// Resets the heartbeat timer. The orchestrator calls this on every
    /// validated incoming datagram, regardless of opcode.
    pub fn record_activity(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// Advances timers and returns the action the orchestrator must take.
    ///
    /// - While `Connecting`: if `connect_timeout` has elapsed, either retries
    ///   (resetting the timer, state unchanged) or - once `max_connect_retries`
    ///   is exhausted - finalizes to `Disconnected(MaxRetriesExceeded)` and
    ///   fires `on_connect_failed`.
    /// - While `Connected`: if `heartbeat_timeout` has elapsed since the last
    ///   `record_activity`, finalizes to `Disconnected(Timeout)`.
    /// - While `Disconnecting`: if `disconnect_timeout` has elapsed, finalizes
    ///   to `Disconnected(LocalRequest)`.
    /// - While `Disconnected`: always `NoAction`.
    pub fn tick(&mut self, now: Instant) -> TickAction {
        match self.state {
            ConnectionState::Connecting => {
                if now.duration_since(self.state_entered_at) < self.config.connect_timeout {
                    return TickAction::NoAction;
                }
                self.retry_count += 1;
                if self.retry_count >= self.config.max_connect_retries {
                    self.finalize_disconnected(DisconnectReason::MaxRetriesExceeded, now);
                    if let Some(cb) = &mut self.callbacks.on_connect_failed {
                        cb(DisconnectReason::MaxRetriesExceeded);
                    }
                    TickAction::ConnectionTimedOut
                } else {
                    self.state_entered_at = now;
                    TickAction::ShouldRetryConnect
                }
            }
            ConnectionState::Connected => {
                if now.duration_since(self.last_activity) >= self.config.heartbeat_timeout {
                    self.finalize_disconnected(DisconnectReason::Timeout, now);
                    TickAction::ConnectionTimedOut
                } else {
                    TickAction::NoAction
                }
            }
            ConnectionState::Disconnecting => {
                if now.duration_since(self.state_entered_at) >= self.config.disconnect_timeout {
                    self.finalize_disconnected(DisconnectReason::LocalRequest, now);
                    TickAction::DisconnectComplete
                } else {
                    TickAction::NoAction
                }
            }
            ConnectionState::Disconnected => TickAction::NoAction,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> ConnectionStateMachine {
        ConnectionStateMachine::new(Config::default(), Instant::now())
    }

    #[test]
    fn full_happy_path() {
        let now = Instant::now();
        let mut m = ConnectionStateMachine::new(Config::default(), now);
        m.initiate_connect(now).unwrap();
        assert_eq!(m.state(), ConnectionState::Connecting);
        m.handle_accept(1, now).unwrap();
        assert_eq!(m.state(), ConnectionState::Connected);
        m.initiate_disconnect(now).unwrap();
        assert_eq!(m.state(), ConnectionState::Disconnecting);
        m.handle_disconnect_ack(now).unwrap();
        assert_eq!(m.state(), ConnectionState::Disconnected);
        assert_eq!(
            m.last_disconnect_reason(),
            Some(DisconnectReason::LocalRequest)
        );
    }

    #[test]
    fn illegal_transition_rejected() {
        let mut m = machine();
        let now = Instant::now();
        assert!(matches!(
            m.handle_accept(1, now),
            Err(InvalidStateTransition {
                current: ConnectionState::Disconnected,
                ..
            })
        ));
    }

    #[test]
    fn connect_retries_then_gives_up() {
        let start = Instant::now();
        let mut config = Config::default();
        config.connect_timeout = Duration::from_millis(10);
        config.max_connect_retries = 3;
        let mut m = ConnectionStateMachine::new(config, start);
        m.initiate_connect(start).unwrap();

        let t1 = start + Duration::from_millis(20);
        assert_eq!(m.tick(t1), TickAction::ShouldRetryConnect);
        assert_eq!(m.state(), ConnectionState::Connecting);

        let t2 = t1 + Duration::from_millis(20);
        assert_eq!(m.tick(t2), TickAction::ShouldRetryConnect);

        let t3 = t2 + Duration::from_millis(20);
        assert_eq!(m.tick(t3), TickAction::ConnectionTimedOut);
        assert_eq!(m.state(), ConnectionState::Disconnected);
        assert_eq!(
            m.last_disconnect_reason(),
            Some(DisconnectReason::MaxRetriesExceeded)
        );
    }

    #[test]
    fn heartbeat_timeout_disconnects() {
        let start = Instant::now();
        let mut config = Config::default();
        config.heartbeat_timeout = Duration::from_millis(50);
        let mut m = ConnectionStateMachine::new(config, start);
        m.initiate_connect(start).unwrap();
        m.handle_accept(1, start).unwrap();

        assert_eq!(m.tick(start + Duration::from_millis(10)), TickAction::NoAction);
        m.record_activity(start + Duration::from_millis(10));
        assert_eq!(m.tick(start + Duration::from_millis(40)), TickAction::NoAction);

        let timed_out = m.tick(start + Duration::from_millis(100));
        assert_eq!(timed_out, TickAction::ConnectionTimedOut);
        assert_eq!(
            m.last_disconnect_reason(),
            Some(DisconnectReason::Timeout)
        );
    }

    #[test]
    fn force_disconnect_from_any_state_including_connecting() {
        let now = Instant::now();
        let mut m = ConnectionStateMachine::new(Config::default(), now);
        m.initiate_connect(now).unwrap();
        m.force_disconnect(DisconnectReason::Banned, now);
        assert_eq!(m.state(), ConnectionState::Disconnected);
        assert_eq!(m.last_disconnect_reason(), Some(DisconnectReason::Banned));
    }

    #[test]
    fn force_disconnect_already_disconnected_is_noop() {
        let now = Instant::now();
        let mut m = machine();
        m.force_disconnect(DisconnectReason::Banned, now);
        assert_eq!(m.last_disconnect_reason(), None);
    }
}
