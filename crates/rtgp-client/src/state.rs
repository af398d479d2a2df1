//! Pure, socket-free client state and the ingress/egress logic that drives
//! it (§4.6).
//!
//! Everything in this module is plain data and total functions over
//! [`Instant`]/byte buffers - no socket, no task, no lock. [`crate::Client`]
//! is the thin async shell that owns one of these behind a
//! [`std::sync::Mutex`] and wires its inputs/outputs to a real
//! [`rtgp_net::AsyncDatagramSocket`].

use std::net::SocketAddr;
use std::time::Instant;

use tracing::{debug, trace, warn};

use rtgp_protocol::codec::WireDecode;
use rtgp_protocol::connection::{ConnectionState, ConnectionStateMachine, TickAction};
use rtgp_protocol::diagnostics::Diagnostic;
use rtgp_protocol::error::DisconnectReason;
use rtgp_protocol::header::{Flags, Header, SERVER_USER_ID, UNASSIGNED_USER_ID, assemble};
use rtgp_protocol::opcode::{OpCode, Origin};
use rtgp_protocol::payload::{
    CInput, CJoinLobby, CReady, CSetBandwidthMode, ChatMessage, DisconnectPayload, RGetUsers, SAccept,
    SBandwidthModeChanged, SEntityDestroy, SEntityHealth, SEntityMove, SEntityMoveBatch, SEntitySpawn,
    SGameOver, SGameStart, SJoinLobbyResponse, SLevelAnnounce, SLobbyList, SPlayerReadyState,
    SPowerupEvent, SUpdatePos, SUpdateState,
};
use rtgp_protocol::reliable::ReliableChannel;
use rtgp_protocol::seq::Seq;
use rtgp_protocol::validate::validate;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::events::ClientEvent;

/// One or more frames to emit, paired with the events this step produced.
#[derive(Debug, Default)]
pub struct Outcome {
    /// Raw datagrams the caller must now send to the server endpoint.
    pub to_send: Vec<Vec<u8>>,
    /// Events to place on the application's event queue.
    pub events: Vec<ClientEvent>,
    /// Structured diagnostics raised while handling this tick/datagram, for
    /// a caller-supplied sink (§9; see [`crate::Client::set_diagnostic_sink`]).
    pub diagnostics: Vec<Diagnostic>,
}

impl Outcome {
    fn send(&mut self, frame: Vec<u8>) {
        self.to_send.push(frame);
    }

    fn emit(&mut self, event: ClientEvent) {
        self.events.push(event);
    }

    fn diag(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }
}

/// The single connection a client holds (§3 "Connection").
pub struct ClientState {
    state_machine: ConnectionStateMachine,
    channel: ReliableChannel,
    next_seq: Seq,
    user_id: u32,
    server_addr: Option<SocketAddr>,
    config: ClientConfig,
}

impl ClientState {
    /// Builds a fresh, disconnected client state.
    #[must_use]
    pub fn new(config: ClientConfig, now: Instant) -> Self {
        Self {
            state_machine: ConnectionStateMachine::new(config.connection, now),
            channel: ReliableChannel::new(config.reliable),
            next_seq: Seq::default(),
            user_id: UNASSIGNED_USER_ID,
            server_addr: None,
            config,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state_machine.state()
    }

    /// This client's server-assigned id, or [`UNASSIGNED_USER_ID`] before
    /// the handshake completes.
    #[must_use]
    pub const fn user_id(&self) -> u32 {
        self.user_id
    }

    /// The server endpoint this client is bound to, once [`Self::begin_connect`]
    /// has been called.
    #[must_use]
    pub const fn server_addr(&self) -> Option<SocketAddr> {
        self.server_addr
    }

    fn require_connected(&self) -> Result<(), ClientError> {
        if self.state_machine.state() == ConnectionState::Connected {
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }

    fn build_frame(&mut self, opcode: OpCode, payload: &[u8], now: Instant) -> Vec<u8> {
        let reliable = opcode.is_reliable();
        let seq = self.next_seq.next();
        let last_received = self.channel.last_received_seq_id();
        let ack_id = last_received.unwrap_or_default();
        let flags = Flags::empty().with_reliable(reliable).with_is_ack(true);
        #[allow(clippy::cast_possible_truncation)]
        let header = Header::new(opcode.to_byte(), payload.len() as u16, self.user_id, seq.0, ack_id.0, flags);
        let frame = assemble(&header, payload);
        if reliable {
            self.channel
                .track_outgoing(seq, frame.clone(), now)
                .expect("a freshly minted seq_id cannot already be tracked");
        }
        frame
    }

    /// `connect(host, port)` (§4.6): binds the server endpoint and sends the
    /// initial `C_CONNECT`.
    ///
    /// # Errors
    ///
    /// [`ClientError::InvalidState`] unless currently [`ConnectionState::Disconnected`].
    pub fn begin_connect(&mut self, server_addr: SocketAddr, now: Instant) -> Result<Vec<u8>, ClientError> {
        self.state_machine.initiate_connect(now)?;
        self.server_addr = Some(server_addr);
        self.user_id = UNASSIGNED_USER_ID;
        Ok(self.build_frame(OpCode::CConnect, &[], now))
    }

    /// `disconnect()`: sends a graceful `DISCONNECT` and moves to
    /// [`ConnectionState::Disconnecting`]. A no-op if already disconnected
    /// or disconnecting.
    pub fn begin_disconnect(&mut self, now: Instant) -> Option<Vec<u8>> {
        if self.state_machine.initiate_disconnect(now).is_err() {
            return None;
        }
        let payload = DisconnectPayload { reason: DisconnectReason::LocalRequest };
        Some(self.build_frame(OpCode::Disconnect, &rtgp_protocol::codec::encode_to_vec(&payload), now))
    }

    /// `send_input(mask)`.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] unless currently [`ConnectionState::Connected`].
    pub fn send_input(&mut self, input: CInput, now: Instant) -> Result<Vec<u8>, ClientError> {
        self.require_connected()?;
        Ok(self.build_frame(OpCode::CInput, &rtgp_protocol::codec::encode_to_vec(&input), now))
    }

    /// `ping()`.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] unless currently [`ConnectionState::Connected`].
    pub fn ping(&mut self, now: Instant) -> Result<Vec<u8>, ClientError> {
        self.require_connected()?;
        Ok(self.build_frame(OpCode::Ping, &[], now))
    }

    /// `send_ready(flag)`.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] unless currently [`ConnectionState::Connected`].
    pub fn send_ready(&mut self, is_ready: bool, now: Instant) -> Result<Vec<u8>, ClientError> {
        self.require_connected()?;
        let payload = CReady { is_ready };
        Ok(self.build_frame(OpCode::CReady, &rtgp_protocol::codec::encode_to_vec(&payload), now))
    }

    /// `send_chat(text)`.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] unless currently [`ConnectionState::Connected`].
    pub fn send_chat(&mut self, text: &str, now: Instant) -> Result<Vec<u8>, ClientError> {
        self.require_connected()?;
        let payload = ChatMessage::new(self.user_id, text);
        Ok(self.build_frame(OpCode::CChat, &rtgp_protocol::codec::encode_to_vec(&payload), now))
    }

    /// `request_lobby_list()`.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] unless currently [`ConnectionState::Connected`].
    pub fn request_lobby_list(&mut self, now: Instant) -> Result<Vec<u8>, ClientError> {
        self.require_connected()?;
        Ok(self.build_frame(OpCode::CRequestLobbies, &[], now))
    }

    /// `join_lobby(code)`.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] unless currently [`ConnectionState::Connected`].
    pub fn join_lobby(&mut self, code: [u8; 6], now: Instant) -> Result<Vec<u8>, ClientError> {
        self.require_connected()?;
        let payload = CJoinLobby { code };
        Ok(self.build_frame(OpCode::CJoinLobby, &rtgp_protocol::codec::encode_to_vec(&payload), now))
    }

    /// `set_bandwidth_mode(mode)` - supplements §6.5's named method list with
    /// the one client-to-server opcode (`C_SET_BANDWIDTH_MODE`) it otherwise
    /// left no send method for.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] unless currently [`ConnectionState::Connected`].
    pub fn set_bandwidth_mode(
        &mut self,
        mode: rtgp_protocol::payload::BandwidthMode,
        now: Instant,
    ) -> Result<Vec<u8>, ClientError> {
        self.require_connected()?;
        let payload = CSetBandwidthMode { mode };
        Ok(self.build_frame(OpCode::CSetBandwidthMode, &rtgp_protocol::codec::encode_to_vec(&payload), now))
    }

    /// `request_users()` - `C_GET_USERS`.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] unless currently [`ConnectionState::Connected`].
    pub fn request_users(&mut self, now: Instant) -> Result<Vec<u8>, ClientError> {
        self.require_connected()?;
        Ok(self.build_frame(OpCode::CGetUsers, &[], now))
    }

    /// Advances the lifecycle timers and reliable-channel retransmits one
    /// tick (§4.6 "Tick").
    pub fn tick(&mut self, now: Instant) -> Outcome {
        let mut outcome = Outcome::default();

        match self.state_machine.tick(now) {
            TickAction::NoAction => {}
            TickAction::ShouldRetryConnect => {
                trace!("retrying connect");
                outcome.send(self.build_frame(OpCode::CConnect, &[], now));
            }
            TickAction::ConnectionTimedOut => {
                let reason = self.state_machine.last_disconnect_reason().unwrap_or(DisconnectReason::Timeout);
                self.channel.clear();
                if reason == DisconnectReason::MaxRetriesExceeded {
                    outcome.emit(ClientEvent::ConnectFailed { reason });
                } else {
                    outcome.emit(ClientEvent::Disconnected { reason });
                }
            }
            TickAction::DisconnectComplete => {
                self.channel.clear();
                outcome.emit(ClientEvent::Disconnected { reason: DisconnectReason::LocalRequest });
            }
        }

        if self.state_machine.state() != ConnectionState::Disconnected {
            for (_, frame) in self.channel.tick(now) {
                outcome.send(frame);
            }
            if let Err(rtgp_protocol::error::ReliableError::RetryLimitExceeded(seq)) = self.channel.cleanup() {
                debug!(seq_id = seq, "outgoing frame exceeded retry limit, forcing disconnect");
                self.state_machine.force_disconnect(DisconnectReason::RetryLimitExceeded, now);
                self.channel.clear();
                outcome.emit(ClientEvent::Disconnected { reason: DisconnectReason::RetryLimitExceeded });
                outcome.diag(Diagnostic::PeerEvicted { user_id: self.user_id, reason: DisconnectReason::RetryLimitExceeded });
            }
        }

        outcome
    }

    /// Processes one datagram received from the network (§4.6 "Incoming").
    ///
    /// `from` is the UDP source address; datagrams from anywhere but the
    /// bound server endpoint are dropped before validation even runs.
    pub fn ingest(&mut self, datagram: &[u8], from: SocketAddr, now: Instant) -> Outcome {
        let mut outcome = Outcome::default();

        let Some(server_addr) = self.server_addr else {
            trace!("dropping datagram received before connect()");
            return outcome;
        };
        if from != server_addr {
            warn!(%from, expected = %server_addr, "dropping datagram from unexpected source");
            return outcome;
        }

        let frame = match validate(datagram, true) {
            Ok(frame) => frame,
            Err(error) => {
                debug!(%error, "dropping invalid datagram");
                outcome.diag(Diagnostic::InvalidDatagram { from, reason: error.to_string() });
                return outcome;
            }
        };

        if frame.opcode.info().origin == Origin::Client {
            debug!(opcode = ?frame.opcode, "dropping client-originated opcode claimed by server");
            outcome.diag(Diagnostic::UnexpectedOpcode { from, opcode: frame.opcode });
            return outcome;
        }

        self.state_machine.record_activity(now);

        let seq = Seq(frame.header.seq_id);
        if frame.header.flags.is_ack() {
            self.channel.record_ack(Seq(frame.header.ack_id));
        }

        if self.channel.is_duplicate(seq) {
            trace!(seq_id = frame.header.seq_id, "dropping duplicate frame");
            outcome.diag(Diagnostic::DuplicateFrame { from, seq_id: frame.header.seq_id });
            return outcome;
        }
        if let Err(error) = self.channel.record_received(seq) {
            debug!(%error, seq_id = frame.header.seq_id, "dropping frame that failed sequence check");
            outcome.diag(Diagnostic::SequenceRejected { from, seq_id: frame.header.seq_id });
            return outcome;
        }

        let reliable = frame.opcode.is_reliable();
        self.dispatch(from, frame.opcode, frame.payload, now, &mut outcome);

        // Built after dispatch, not before: S_ACCEPT assigns self.user_id as
        // part of dispatch, and the ack needs to carry that new id rather
        // than the unassigned placeholder it was sent under.
        if reliable {
            outcome.send(self.build_frame(OpCode::Ack, &[], now));
        }

        outcome
    }

    #[allow(clippy::too_many_lines)]
    fn dispatch(&mut self, from: SocketAddr, opcode: OpCode, payload: bytes::Bytes, now: Instant, outcome: &mut Outcome) {
        macro_rules! decode_or_drop {
            ($ty:ty) => {
                match <$ty as WireDecode>::decode(&mut payload.clone()) {
                    Ok(value) => value,
                    Err(error) => {
                        debug!(%error, ?opcode, "dropping malformed payload");
                        outcome.diag(Diagnostic::MalformedPayload { from, opcode, reason: error.to_string() });
                        return;
                    }
                }
            };
        }

        match opcode {
            OpCode::SAccept => {
                let accept: SAccept = decode_or_drop!(SAccept);
                if self.state_machine.handle_accept(accept.new_user_id, now).is_ok() {
                    self.user_id = accept.new_user_id;
                    outcome.emit(ClientEvent::Connected { user_id: accept.new_user_id });
                }
            }
            OpCode::Disconnect => {
                let disconnect: DisconnectPayload = decode_or_drop!(DisconnectPayload);
                match self.state_machine.state() {
                    ConnectionState::Connected => {
                        if self.state_machine.handle_remote_disconnect(now).is_ok() {
                            self.channel.clear();
                            outcome.emit(ClientEvent::Disconnected { reason: disconnect.reason });
                        }
                    }
                    ConnectionState::Disconnecting => {
                        if self.state_machine.handle_disconnect_ack(now).is_ok() {
                            self.channel.clear();
                            outcome.emit(ClientEvent::Disconnected { reason: DisconnectReason::LocalRequest });
                        }
                    }
                    ConnectionState::Connecting | ConnectionState::Disconnected => {}
                }
            }
            OpCode::RGetUsers => {
                match RGetUsers::decode(&mut payload.clone()) {
                    Ok(v) => outcome.emit(ClientEvent::Users(v)),
                    Err(error) => {
                        debug!(%error, "dropping malformed R_GET_USERS");
                        outcome.diag(Diagnostic::MalformedPayload { from, opcode, reason: error.to_string() });
                    }
                }
            }
            OpCode::SUpdateState => outcome.emit(ClientEvent::GameState(decode_or_drop!(SUpdateState))),
            OpCode::SGameOver => outcome.emit(ClientEvent::GameOver(decode_or_drop!(SGameOver))),
            OpCode::SGameStart => outcome.emit(ClientEvent::GameStart(decode_or_drop!(SGameStart))),
            OpCode::SPlayerReadyState => {
                outcome.emit(ClientEvent::PlayerReadyState(decode_or_drop!(SPlayerReadyState)));
            }
            OpCode::SLobbyList => match SLobbyList::decode(&mut payload.clone()) {
                Ok(v) => outcome.emit(ClientEvent::LobbyList(v)),
                Err(error) => {
                    debug!(%error, "dropping malformed S_LOBBY_LIST");
                    outcome.diag(Diagnostic::MalformedPayload { from, opcode, reason: error.to_string() });
                }
            },
            OpCode::SJoinLobbyResponse => {
                outcome.emit(ClientEvent::JoinLobbyResponse(decode_or_drop!(SJoinLobbyResponse)));
            }
            OpCode::SEntitySpawn => outcome.emit(ClientEvent::EntitySpawn(decode_or_drop!(SEntitySpawn))),
            OpCode::SEntityMove => outcome.emit(ClientEvent::EntityMove(decode_or_drop!(SEntityMove))),
            OpCode::SEntityDestroy => outcome.emit(ClientEvent::EntityDestroy(decode_or_drop!(SEntityDestroy))),
            OpCode::SEntityHealth => outcome.emit(ClientEvent::EntityHealth(decode_or_drop!(SEntityHealth))),
            OpCode::SPowerupEvent => outcome.emit(ClientEvent::Powerup(decode_or_drop!(SPowerupEvent))),
            OpCode::SEntityMoveBatch => match SEntityMoveBatch::decode(&mut payload.clone()) {
                Ok(v) => outcome.emit(ClientEvent::EntityMoveBatch(v)),
                Err(error) => {
                    debug!(%error, "dropping malformed S_ENTITY_MOVE_BATCH");
                    outcome.diag(Diagnostic::MalformedPayload { from, opcode, reason: error.to_string() });
                }
            },
            OpCode::SBandwidthModeChanged => {
                outcome.emit(ClientEvent::BandwidthModeChanged(decode_or_drop!(SBandwidthModeChanged)));
            }
            OpCode::SLevelAnnounce => outcome.emit(ClientEvent::LevelAnnounce(decode_or_drop!(SLevelAnnounce))),
            OpCode::SUpdatePos => outcome.emit(ClientEvent::PositionCorrection(decode_or_drop!(SUpdatePos))),
            OpCode::SChat => outcome.emit(ClientEvent::ChatMessage(decode_or_drop!(ChatMessage))),
            OpCode::Pong | OpCode::Ack => {
                // Activity and the piggyback ack were already processed above;
                // these opcodes carry no further information.
            }
            OpCode::CConnect
            | OpCode::CGetUsers
            | OpCode::CReady
            | OpCode::CRequestLobbies
            | OpCode::CJoinLobby
            | OpCode::CInput
            | OpCode::CChat
            | OpCode::CSetBandwidthMode
            | OpCode::Ping => {
                debug!(?opcode, "client-originated opcode reached client dispatch unexpectedly");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtgp_protocol::header::MAX_CLIENT_USER_ID;
    use rtgp_protocol::payload::InputMask;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    fn accept_datagram(user_id: u32, ack_id: u16) -> Vec<u8> {
        let payload = SAccept { new_user_id: user_id };
        let header = Header::new(
            OpCode::SAccept.to_byte(),
            4,
            SERVER_USER_ID,
            0,
            ack_id,
            Flags::empty().with_reliable(true).with_is_ack(true),
        );
        assemble(&header, &rtgp_protocol::codec::encode_to_vec(&payload))
    }

    #[test]
    fn connect_then_accept_yields_connected_event() {
        let now = Instant::now();
        let mut state = ClientState::new(ClientConfig::default(), now);
        let connect_frame = state.begin_connect(addr(4242), now).unwrap();
        assert_eq!(connect_frame[1], OpCode::CConnect.to_byte());

        let outcome = state.ingest(&accept_datagram(7, 0), addr(4242), now);
        assert_eq!(state.state(), ConnectionState::Connected);
        assert_eq!(state.user_id(), 7);
        assert!(matches!(outcome.events.as_slice(), [ClientEvent::Connected { user_id: 7 }]));
        // S_ACCEPT is reliable, so an ACK must be queued back.
        assert_eq!(outcome.to_send.len(), 1);
        assert_eq!(outcome.to_send[0][1], OpCode::Ack.to_byte());
    }

    #[test]
    fn data_methods_refuse_before_connected() {
        let now = Instant::now();
        let mut state = ClientState::new(ClientConfig::default(), now);
        assert!(matches!(state.ping(now), Err(ClientError::NotConnected)));
        assert!(matches!(state.send_input(CInput::default(), now), Err(ClientError::NotConnected)));
    }

    #[test]
    fn datagram_from_wrong_source_is_dropped() {
        let now = Instant::now();
        let mut state = ClientState::new(ClientConfig::default(), now);
        state.begin_connect(addr(4242), now).unwrap();
        let outcome = state.ingest(&accept_datagram(1, 0), addr(9999), now);
        assert!(outcome.events.is_empty());
        assert_eq!(state.state(), ConnectionState::Connecting);
    }

    #[test]
    fn duplicate_reliable_frame_is_dropped_without_re_ack() {
        let now = Instant::now();
        let mut state = ClientState::new(ClientConfig::default(), now);
        state.begin_connect(addr(4242), now).unwrap();
        let datagram = accept_datagram(1, 0);
        let _ = state.ingest(&datagram, addr(4242), now);
        let outcome = state.ingest(&datagram, addr(4242), now);
        assert!(outcome.to_send.is_empty());
        assert!(outcome.events.is_empty());
    }

    #[test]
    fn connect_retry_budget_exhausts_into_connect_failed() {
        let start = Instant::now();
        let mut config = ClientConfig::default();
        config.connection.connect_timeout = std::time::Duration::from_millis(10);
        config.connection.max_connect_retries = 1;
        let mut state = ClientState::new(config, start);
        state.begin_connect(addr(4242), start).unwrap();

        let t = start + std::time::Duration::from_millis(50);
        let outcome = state.tick(t);
        assert!(matches!(
            outcome.events.as_slice(),
            [ClientEvent::ConnectFailed { reason: DisconnectReason::MaxRetriesExceeded }]
        ));
        assert_eq!(state.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn send_input_assigns_user_id_once_connected() {
        let now = Instant::now();
        let mut state = ClientState::new(ClientConfig::default(), now);
        state.begin_connect(addr(4242), now).unwrap();
        let _ = state.ingest(&accept_datagram(MAX_CLIENT_USER_ID, 0), addr(4242), now);
        let frame = state.send_input(CInput { mask: InputMask(InputMask::UP) }, now).unwrap();
        assert_eq!(frame[1], OpCode::CInput.to_byte());
        assert_eq!(u32::from_be_bytes(frame[4..8].try_into().unwrap()), MAX_CLIENT_USER_ID);
    }
}
