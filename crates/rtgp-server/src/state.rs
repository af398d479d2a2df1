//! Pure, socket-free server state and the ingress/egress/tick logic that
//! drives it (§4.7).
//!
//! Like [`rtgp_client::state::ClientState`], everything here is plain data
//! and total functions over [`Instant`]/byte buffers. [`crate::Server`] is
//! the thin async shell that owns one of these behind a [`std::sync::Mutex`]
//! and wires it to a real [`rtgp_net::AsyncDatagramSocket`].

use std::net::SocketAddr;
use std::time::Instant;

use ahash::AHashMap;
use bytes::BytesMut;
use tracing::{debug, trace, warn};

use rtgp_protocol::codec::{WireDecode, encode_to_vec};
use rtgp_protocol::diagnostics::Diagnostic;
use rtgp_protocol::error::{DisconnectReason, ReliableError};
use rtgp_protocol::header::{Flags, Header, SERVER_USER_ID, assemble};
use rtgp_protocol::opcode::{OpCode, Origin};
use rtgp_protocol::payload::{
    BandwidthMode, CInput, CJoinLobby, CReady, CSetBandwidthMode, ChatMessage, DisconnectPayload, GameState,
    LobbyInfo, MoveBatchEntry, RGetUsers, SAccept, SBandwidthModeChanged, SEntityDestroy, SEntityHealth,
    SEntityMove, SEntityMoveBatch, SEntitySpawn, SGameOver, SGameStart, SJoinLobbyResponse, SLevelAnnounce,
    SLobbyList, SPlayerReadyState, SPowerupEvent, SUpdatePos, SUpdateState,
};
use rtgp_protocol::seq::Seq;
use rtgp_protocol::validate::validate;

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::events::ServerEvent;
use crate::peer::{Peer, UserIdAllocator};

/// One or more frames to emit, each addressed to its own recipient, paired
/// with the events this step produced.
#[derive(Debug, Default)]
pub struct Outcome {
    /// Raw datagrams the caller must now send, each to its paired endpoint.
    pub to_send: Vec<(Vec<u8>, SocketAddr)>,
    /// Events to place on the application's event queue.
    pub events: Vec<ServerEvent>,
    /// Structured diagnostics raised while handling this tick/datagram, for
    /// a caller-supplied sink (§9; see [`crate::Server::set_diagnostic_sink`]).
    pub diagnostics: Vec<Diagnostic>,
}

impl Outcome {
    fn send(&mut self, frame: Vec<u8>, addr: SocketAddr) {
        self.to_send.push((frame, addr));
    }

    fn emit(&mut self, event: ServerEvent) {
        self.events.push(event);
    }

    fn diag(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }
}

/// Optional collaborator consulted on every `C_CONNECT` before a peer is
/// registered (§4.7 "Ban integration").
pub type BanPredicate = Box<dyn FnMut(SocketAddr) -> bool + Send>;

/// Every peer currently connected to one socket, plus the id allocator they
/// draw from (§4.7).
pub struct ServerState {
    peers: AHashMap<SocketAddr, Peer>,
    by_user_id: AHashMap<u32, SocketAddr>,
    ids: UserIdAllocator,
    config: ServerConfig,
    ban_predicate: Option<BanPredicate>,
}

impl ServerState {
    /// Builds an empty server with no connected peers.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            peers: AHashMap::new(),
            by_user_id: AHashMap::new(),
            ids: UserIdAllocator::new(),
            config,
            ban_predicate: None,
        }
    }

    /// Installs a predicate consulted on every `C_CONNECT`; returning `true`
    /// rejects the endpoint with `DISCONNECT(Banned)` before a peer is ever
    /// registered for it.
    pub fn set_ban_predicate(&mut self, predicate: impl FnMut(SocketAddr) -> bool + Send + 'static) {
        self.ban_predicate = Some(Box::new(predicate));
    }

    /// Number of currently connected peers.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.peers.len()
    }

    /// Every currently connected peer's id, in arbitrary order.
    #[must_use]
    pub fn connected_ids(&self) -> Vec<u32> {
        self.by_user_id.keys().copied().collect()
    }

    /// The UDP endpoint bound to `user_id`, if it is currently connected.
    #[must_use]
    pub fn endpoint_of(&self, user_id: u32) -> Option<SocketAddr> {
        self.by_user_id.get(&user_id).copied()
    }

    /// Whether `user_id` last requested [`BandwidthMode::Low`].
    #[must_use]
    pub fn is_low_bandwidth(&self, user_id: u32) -> bool {
        self.peer_by_user_id(user_id).is_some_and(|peer| peer.bandwidth_mode == BandwidthMode::Low)
    }

    fn peer_by_user_id(&self, user_id: u32) -> Option<&Peer> {
        self.by_user_id.get(&user_id).and_then(|addr| self.peers.get(addr))
    }

    fn low_bandwidth_count(&self) -> u8 {
        #[allow(clippy::cast_possible_truncation)]
        let count = self.peers.values().filter(|peer| peer.bandwidth_mode == BandwidthMode::Low).count() as u8;
        count
    }

    fn build_frame(peer: &mut Peer, opcode: OpCode, payload: &[u8], now: Instant) -> Vec<u8> {
        let reliable = opcode.is_reliable();
        let seq = peer.next_seq.next();
        let last_received = peer.channel.last_received_seq_id();
        let ack_id = last_received.unwrap_or_default();
        let flags = Flags::empty().with_reliable(reliable).with_is_ack(true);
        #[allow(clippy::cast_possible_truncation)]
        let header = Header::new(opcode.to_byte(), payload.len() as u16, SERVER_USER_ID, seq.0, ack_id.0, flags);
        let frame = assemble(&header, payload);
        if reliable {
            peer.channel.track_outgoing(seq, frame.clone(), now).expect("a freshly minted seq_id cannot already be tracked");
        }
        frame
    }

    /// Builds a one-shot, untracked reply addressed to an endpoint that may
    /// not (yet, or ever) have a registered peer - used for the handful of
    /// teardown-adjacent replies (ban rejection, disconnect acknowledgement,
    /// timeout eviction) the source sends without going through a
    /// connection's normal retransmit bookkeeping.
    fn build_raw_frame(opcode: OpCode, payload: &[u8], seq_id: u16, ack_id: u16) -> Vec<u8> {
        #[allow(clippy::cast_possible_truncation)]
        let header = Header::new(
            opcode.to_byte(),
            payload.len() as u16,
            SERVER_USER_ID,
            seq_id,
            ack_id,
            Flags::empty().with_is_ack(true),
        );
        assemble(&header, payload)
    }

    fn unicast(&mut self, user_id: u32, opcode: OpCode, payload: &[u8], now: Instant) -> Result<(Vec<u8>, SocketAddr), ServerError> {
        let addr = self.endpoint_of(user_id).ok_or(ServerError::UnknownPeer(user_id))?;
        let peer = self.peers.get_mut(&addr).expect("by_user_id and peers must stay in sync");
        Ok((Self::build_frame(peer, opcode, payload, now), addr))
    }

    fn broadcast(&mut self, opcode: OpCode, payload: &[u8], now: Instant) -> Vec<(Vec<u8>, SocketAddr)> {
        self.peers.values_mut().map(|peer| (Self::build_frame(peer, opcode, payload, now), peer.addr)).collect()
    }

    fn remove_peer(&mut self, addr: SocketAddr) {
        if let Some(peer) = self.peers.remove(&addr) {
            self.by_user_id.remove(&peer.user_id);
            self.ids.release(peer.user_id);
        }
    }

    /// Forcibly disconnects `user_id`, sending a `DISCONNECT` with `reason`
    /// and removing the peer. A no-op if `user_id` is not connected.
    pub fn disconnect_client(&mut self, user_id: u32, reason: DisconnectReason, now: Instant) -> Outcome {
        let mut outcome = Outcome::default();
        let Some(addr) = self.endpoint_of(user_id) else {
            return outcome;
        };
        if let Some(peer) = self.peers.get_mut(&addr) {
            let payload = encode_to_vec(&DisconnectPayload { reason });
            let frame = Self::build_frame(peer, OpCode::Disconnect, &payload, now);
            outcome.send(frame, addr);
        }
        self.remove_peer(addr);
        outcome.emit(ServerEvent::Disconnected { user_id, reason });
        outcome
    }

    // --- egress: typed broadcast/unicast helpers ---

    /// Broadcasts `S_UPDATE_STATE`.
    pub fn broadcast_game_state(&mut self, state: GameState, now: Instant) -> Vec<(Vec<u8>, SocketAddr)> {
        let payload = encode_to_vec(&SUpdateState { state });
        self.broadcast(OpCode::SUpdateState, &payload, now)
    }

    /// Broadcasts `S_GAME_OVER`.
    pub fn broadcast_game_over(&mut self, final_score: u32, now: Instant) -> Vec<(Vec<u8>, SocketAddr)> {
        let payload = encode_to_vec(&SGameOver { final_score });
        self.broadcast(OpCode::SGameOver, &payload, now)
    }

    /// Broadcasts `S_GAME_START`.
    pub fn broadcast_game_start(&mut self, countdown_seconds: f32, now: Instant) -> Vec<(Vec<u8>, SocketAddr)> {
        let payload = encode_to_vec(&SGameStart { countdown_seconds });
        self.broadcast(OpCode::SGameStart, &payload, now)
    }

    /// Broadcasts a player's ready-state change as `S_PLAYER_READY_STATE`.
    pub fn broadcast_ready_state(&mut self, user_id: u32, is_ready: bool, now: Instant) -> Vec<(Vec<u8>, SocketAddr)> {
        let payload = encode_to_vec(&SPlayerReadyState { user_id, is_ready });
        self.broadcast(OpCode::SPlayerReadyState, &payload, now)
    }

    /// Responds to a [`ServerEvent::LobbyListRequested`] with `S_LOBBY_LIST`.
    ///
    /// # Errors
    ///
    /// [`ServerError::UnknownPeer`] if `user_id` is not connected.
    pub fn send_lobby_list(&mut self, user_id: u32, lobbies: Vec<LobbyInfo>, now: Instant) -> Result<(Vec<u8>, SocketAddr), ServerError> {
        let mut buf = BytesMut::new();
        SLobbyList { lobbies }.encode(&mut buf);
        self.unicast(user_id, OpCode::SLobbyList, &buf, now)
    }

    /// Responds to a [`ServerEvent::UsersRequested`] with `R_GET_USERS`.
    ///
    /// # Errors
    ///
    /// [`ServerError::UnknownPeer`] if `user_id` is not connected.
    pub fn send_users(&mut self, user_id: u32, user_ids: Vec<u32>, now: Instant) -> Result<(Vec<u8>, SocketAddr), ServerError> {
        let mut buf = BytesMut::new();
        RGetUsers { user_ids }.encode(&mut buf);
        self.unicast(user_id, OpCode::RGetUsers, &buf, now)
    }

    /// Broadcasts `S_ENTITY_SPAWN`.
    pub fn broadcast_entity_spawn(&mut self, spawn: SEntitySpawn, now: Instant) -> Vec<(Vec<u8>, SocketAddr)> {
        let payload = encode_to_vec(&spawn);
        self.broadcast(OpCode::SEntitySpawn, &payload, now)
    }

    /// Unicasts `S_ENTITY_MOVE`.
    ///
    /// # Errors
    ///
    /// [`ServerError::UnknownPeer`] if `user_id` is not connected.
    pub fn unicast_entity_move(&mut self, user_id: u32, mv: SEntityMove, now: Instant) -> Result<(Vec<u8>, SocketAddr), ServerError> {
        let payload = encode_to_vec(&mv);
        self.unicast(user_id, OpCode::SEntityMove, &payload, now)
    }

    /// Broadcasts `S_ENTITY_MOVE`.
    pub fn broadcast_entity_move(&mut self, mv: SEntityMove, now: Instant) -> Vec<(Vec<u8>, SocketAddr)> {
        let payload = encode_to_vec(&mv);
        self.broadcast(OpCode::SEntityMove, &payload, now)
    }

    /// Broadcasts a shared-tick `S_ENTITY_MOVE_BATCH` (up to
    /// [`SEntityMoveBatch::MAX_ENTRIES`] entries; the caller is responsible
    /// for splitting larger batches).
    pub fn broadcast_entity_move_batch(&mut self, server_tick: u32, entries: Vec<MoveBatchEntry>, now: Instant) -> Vec<(Vec<u8>, SocketAddr)> {
        let mut buf = BytesMut::new();
        SEntityMoveBatch { server_tick, entries }.encode(&mut buf);
        self.broadcast(OpCode::SEntityMoveBatch, &buf, now)
    }

    /// Broadcasts `S_ENTITY_DESTROY`.
    pub fn broadcast_entity_destroy(&mut self, entity_id: u32, now: Instant) -> Vec<(Vec<u8>, SocketAddr)> {
        let payload = encode_to_vec(&SEntityDestroy { entity_id });
        self.broadcast(OpCode::SEntityDestroy, &payload, now)
    }

    /// Broadcasts `S_ENTITY_HEALTH`.
    pub fn broadcast_entity_health(&mut self, health: SEntityHealth, now: Instant) -> Vec<(Vec<u8>, SocketAddr)> {
        let payload = encode_to_vec(&health);
        self.broadcast(OpCode::SEntityHealth, &payload, now)
    }

    /// Broadcasts `S_POWERUP_EVENT`.
    pub fn broadcast_powerup_event(&mut self, event: SPowerupEvent, now: Instant) -> Vec<(Vec<u8>, SocketAddr)> {
        let payload = encode_to_vec(&event);
        self.broadcast(OpCode::SPowerupEvent, &payload, now)
    }

    /// Broadcasts `S_LEVEL_ANNOUNCE`.
    pub fn broadcast_level_announce(&mut self, announce: SLevelAnnounce, now: Instant) -> Vec<(Vec<u8>, SocketAddr)> {
        let payload = encode_to_vec(&announce);
        self.broadcast(OpCode::SLevelAnnounce, &payload, now)
    }

    /// Unicasts an authoritative `S_UPDATE_POS` correction.
    ///
    /// # Errors
    ///
    /// [`ServerError::UnknownPeer`] if `user_id` is not connected.
    pub fn unicast_position_correction(&mut self, user_id: u32, pos: SUpdatePos, now: Instant) -> Result<(Vec<u8>, SocketAddr), ServerError> {
        let payload = encode_to_vec(&pos);
        self.unicast(user_id, OpCode::SUpdatePos, &payload, now)
    }

    /// Broadcasts an `S_CHAT` relay of a message `sender_id` sent - the
    /// application calls this explicitly after receiving
    /// [`ServerEvent::Chat`]; relaying is never automatic (mirrors the
    /// source's separate `broadcastChat`).
    pub fn broadcast_chat(&mut self, sender_id: u32, text: &str, now: Instant) -> Vec<(Vec<u8>, SocketAddr)> {
        let payload = encode_to_vec(&ChatMessage::new(sender_id, text));
        self.broadcast(OpCode::SChat, &payload, now)
    }

    // --- ingress ---

    /// Advances every peer's reliable channel one tick: emits due
    /// retransmits, drops peers whose outgoing retry cap was exceeded, and
    /// evicts peers silent longer than [`ServerConfig::client_timeout`]
    /// (§4.7 "Tick").
    pub fn tick(&mut self, now: Instant) -> Outcome {
        let mut outcome = Outcome::default();

        let timed_out: Vec<(SocketAddr, u32)> = self
            .peers
            .values()
            .filter(|peer| now.duration_since(peer.last_activity) > self.config.client_timeout)
            .map(|peer| (peer.addr, peer.user_id))
            .collect();
        for (addr, user_id) in timed_out {
            let payload = encode_to_vec(&DisconnectPayload { reason: DisconnectReason::Timeout });
            let frame = Self::build_raw_frame(OpCode::Disconnect, &payload, 0, 0);
            outcome.send(frame, addr);
            self.remove_peer(addr);
            outcome.emit(ServerEvent::Disconnected { user_id, reason: DisconnectReason::Timeout });
            outcome.diag(Diagnostic::PeerEvicted { user_id, reason: DisconnectReason::Timeout });
        }

        for peer in self.peers.values_mut() {
            let addr = peer.addr;
            for (_, frame) in peer.channel.tick(now) {
                outcome.send(frame, addr);
            }
        }

        let mut exhausted = Vec::new();
        for peer in self.peers.values_mut() {
            if let Err(ReliableError::RetryLimitExceeded(seq)) = peer.channel.cleanup() {
                debug!(user_id = peer.user_id, seq_id = seq, "outgoing frame exceeded retry limit, evicting peer");
                exhausted.push((peer.addr, peer.user_id));
            }
        }
        for (addr, user_id) in exhausted {
            self.remove_peer(addr);
            outcome.emit(ServerEvent::Disconnected { user_id, reason: DisconnectReason::RetryLimitExceeded });
            outcome.diag(Diagnostic::PeerEvicted { user_id, reason: DisconnectReason::RetryLimitExceeded });
        }

        outcome
    }

    /// Processes one datagram received from `from` (§4.7 "Ingress").
    pub fn ingest(&mut self, datagram: &[u8], from: SocketAddr, now: Instant) -> Outcome {
        let mut outcome = Outcome::default();

        let frame = match validate(datagram, false) {
            Ok(frame) => frame,
            Err(error) => {
                debug!(%error, %from, "dropping invalid datagram");
                outcome.diag(Diagnostic::InvalidDatagram { from, reason: error.to_string() });
                return outcome;
            }
        };

        if frame.opcode.info().origin == Origin::Server {
            debug!(opcode = ?frame.opcode, "dropping server-originated opcode claimed by a client");
            outcome.diag(Diagnostic::UnexpectedOpcode { from, opcode: frame.opcode });
            return outcome;
        }

        if frame.opcode == OpCode::CConnect {
            self.handle_connect(frame.header.seq_id, from, now, &mut outcome);
            return outcome;
        }

        if frame.opcode == OpCode::CJoinLobby && !self.peers.contains_key(&from) {
            self.handle_join_lobby_from_unknown(frame.header.seq_id, &frame.payload, from, now, &mut outcome);
            return outcome;
        }

        let Some(peer) = self.peers.get_mut(&from) else {
            debug!(%from, opcode = ?frame.opcode, "dropping frame from unregistered endpoint");
            return outcome;
        };
        if frame.header.user_id != peer.user_id {
            debug!(claimed = frame.header.user_id, bound = peer.user_id, "dropping frame with mismatched user_id binding");
            return outcome;
        }

        peer.last_activity = now;
        if frame.header.flags.is_ack() {
            peer.channel.record_ack(Seq(frame.header.ack_id));
        }

        let seq = Seq(frame.header.seq_id);
        if peer.channel.is_duplicate(seq) {
            trace!(seq_id = frame.header.seq_id, "dropping duplicate frame");
            outcome.diag(Diagnostic::DuplicateFrame { from, seq_id: frame.header.seq_id });
            return outcome;
        }
        if let Err(error) = peer.channel.record_received(seq) {
            debug!(%error, seq_id = frame.header.seq_id, "dropping frame that failed sequence check");
            outcome.diag(Diagnostic::SequenceRejected { from, seq_id: frame.header.seq_id });
            return outcome;
        }

        let reliable = frame.opcode.is_reliable();
        self.dispatch(from, frame.header.seq_id, frame.opcode, frame.payload, now, &mut outcome);

        // Built after dispatch, mirroring the client: DISCONNECT's own
        // handler removes the peer outright, so this naturally sends
        // nothing for it rather than acking a connection that no longer
        // exists.
        if reliable {
            if let Some(peer) = self.peers.get_mut(&from) {
                let ack = Self::build_frame(peer, OpCode::Ack, &[], now);
                outcome.send(ack, from);
            }
        }

        outcome
    }

    fn handle_connect(&mut self, seq_id: u16, from: SocketAddr, now: Instant, outcome: &mut Outcome) {
        if let Some(peer) = self.peers.get_mut(&from) {
            let _ = peer.channel.record_received(Seq(seq_id));
            peer.last_activity = now;
            let payload = encode_to_vec(&SAccept { new_user_id: peer.user_id });
            let frame = Self::build_frame(peer, OpCode::SAccept, &payload, now);
            outcome.send(frame, from);
            return;
        }

        if let Some(predicate) = &mut self.ban_predicate {
            if predicate(from) {
                let payload = encode_to_vec(&DisconnectPayload { reason: DisconnectReason::Banned });
                let frame = Self::build_raw_frame(OpCode::Disconnect, &payload, 0, seq_id);
                outcome.send(frame, from);
                return;
            }
        }

        let user_id = self.ids.allocate();
        let mut peer = Peer::new(from, user_id, self.config.reliable, now);
        let _ = peer.channel.record_received(Seq(seq_id));
        let payload = encode_to_vec(&SAccept { new_user_id: user_id });
        let frame = Self::build_frame(&mut peer, OpCode::SAccept, &payload, now);
        outcome.send(frame, from);
        self.by_user_id.insert(user_id, from);
        self.peers.insert(from, peer);
        outcome.emit(ServerEvent::Connected { user_id, addr: from });
    }

    fn handle_join_lobby_from_unknown(&mut self, seq_id: u16, payload: &bytes::Bytes, from: SocketAddr, _now: Instant, outcome: &mut Outcome) {
        if let Err(error) = CJoinLobby::decode(&mut payload.clone()) {
            debug!(%from, "dropping malformed C_JOIN_LOBBY from unregistered endpoint");
            outcome.diag(Diagnostic::MalformedPayload { from, opcode: OpCode::CJoinLobby, reason: error.to_string() });
            return;
        }
        let response = SJoinLobbyResponse { accepted: false, reason: 1, level_name: [0; 16] };
        let serialized = encode_to_vec(&response);
        let frame = Self::build_raw_frame(OpCode::SJoinLobbyResponse, &serialized, 0, seq_id);
        outcome.send(frame, from);
    }

    #[allow(clippy::too_many_lines)]
    fn dispatch(&mut self, from: SocketAddr, seq_id: u16, opcode: OpCode, payload: bytes::Bytes, now: Instant, outcome: &mut Outcome) {
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

        let lobby_gated = |peer: &Peer, config: &ServerConfig| config.required_lobby_code.is_none() || peer.joined_lobby;

        match opcode {
            OpCode::Disconnect => {
                let disconnect: DisconnectPayload = decode_or_drop!(DisconnectPayload);
                let _ = disconnect.reason;
                let Some(peer) = self.peers.get(&from) else { return };
                let user_id = peer.user_id;
                let reply_payload = encode_to_vec(&DisconnectPayload { reason: DisconnectReason::RemoteRequest });
                let reply = Self::build_raw_frame(OpCode::Disconnect, &reply_payload, 0, seq_id);
                outcome.send(reply, from);
                self.remove_peer(from);
                outcome.emit(ServerEvent::Disconnected { user_id, reason: DisconnectReason::RemoteRequest });
            }
            OpCode::CInput => {
                let input: CInput = decode_or_drop!(CInput);
                let Some(peer) = self.peers.get(&from) else { return };
                if !lobby_gated(peer, &self.config) {
                    return;
                }
                outcome.emit(ServerEvent::Input { user_id: peer.user_id, input });
            }
            OpCode::CGetUsers => {
                let Some(peer) = self.peers.get(&from) else { return };
                if !lobby_gated(peer, &self.config) {
                    return;
                }
                outcome.emit(ServerEvent::UsersRequested { user_id: peer.user_id });
            }
            OpCode::CReady => {
                let ready: CReady = decode_or_drop!(CReady);
                let Some(peer) = self.peers.get(&from) else { return };
                if !lobby_gated(peer, &self.config) {
                    return;
                }
                outcome.emit(ServerEvent::Ready { user_id: peer.user_id, is_ready: ready.is_ready });
            }
            OpCode::CRequestLobbies => {
                let Some(peer) = self.peers.get(&from) else { return };
                outcome.emit(ServerEvent::LobbyListRequested { user_id: peer.user_id });
            }
            OpCode::CJoinLobby => {
                let join: CJoinLobby = decode_or_drop!(CJoinLobby);
                let Some(peer) = self.peers.get_mut(&from) else { return };
                let user_id = peer.user_id;
                let accepted = match self.config.required_lobby_code {
                    None => true,
                    Some(expected) => expected == join.code,
                };
                if accepted {
                    peer.joined_lobby = true;
                }
                let response = SJoinLobbyResponse {
                    accepted,
                    reason: u8::from(!accepted),
                    level_name: [0; 16],
                };
                let serialized = encode_to_vec(&response);
                let frame = Self::build_frame(peer, OpCode::SJoinLobbyResponse, &serialized, now);
                outcome.send(frame, from);
                outcome.emit(ServerEvent::JoinLobbyRequested { user_id, code: join.code, accepted });
            }
            OpCode::CSetBandwidthMode => {
                let request: CSetBandwidthMode = decode_or_drop!(CSetBandwidthMode);
                let Some(peer) = self.peers.get_mut(&from) else { return };
                peer.bandwidth_mode = request.mode;
                let user_id = peer.user_id;
                let active_count = self.low_bandwidth_count();
                let payload = encode_to_vec(&SBandwidthModeChanged { user_id, mode: request.mode, active_count });
                for (frame, addr) in self.broadcast(OpCode::SBandwidthModeChanged, &payload, now) {
                    outcome.send(frame, addr);
                }
                outcome.emit(ServerEvent::BandwidthModeChanged { user_id, mode: request.mode });
            }
            OpCode::CChat => {
                let chat: ChatMessage = decode_or_drop!(ChatMessage);
                let Some(peer) = self.peers.get(&from) else { return };
                if !lobby_gated(peer, &self.config) {
                    return;
                }
                outcome.emit(ServerEvent::Chat { user_id: peer.user_id, text: chat.text().into_owned() });
            }
            OpCode::Ping => {
                let Some(peer) = self.peers.get_mut(&from) else { return };
                let frame = Self::build_frame(peer, OpCode::Pong, &[], now);
                outcome.send(frame, from);
            }
            OpCode::Ack => {
                // Piggyback ack and activity were already processed above.
            }
            OpCode::CConnect => {
                warn!("C_CONNECT reached server dispatch unexpectedly");
            }
            OpCode::SAccept
            | OpCode::RGetUsers
            | OpCode::SUpdateState
            | OpCode::SGameOver
            | OpCode::SGameStart
            | OpCode::SPlayerReadyState
            | OpCode::SLobbyList
            | OpCode::SJoinLobbyResponse
            | OpCode::SEntitySpawn
            | OpCode::SEntityMove
            | OpCode::SEntityDestroy
            | OpCode::SEntityHealth
            | OpCode::SPowerupEvent
            | OpCode::SEntityMoveBatch
            | OpCode::SBandwidthModeChanged
            | OpCode::SLevelAnnounce
            | OpCode::SUpdatePos
            | OpCode::SChat
            | OpCode::Pong => {
                debug!(?opcode, "server-originated opcode reached server dispatch unexpectedly");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtgp_protocol::header::{UNASSIGNED_USER_ID, assemble as assemble_frame};
    use std::net::{IpAddr, Ipv4Addr};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    fn connect_datagram(seq_id: u16) -> Vec<u8> {
        let header = Header::new(OpCode::CConnect.to_byte(), 0, UNASSIGNED_USER_ID, seq_id, 0, Flags::empty().with_reliable(true));
        assemble_frame(&header, &[])
    }

    fn frame_for(peer_user_id: u32, opcode: OpCode, payload: &[u8], seq_id: u16, reliable: bool) -> Vec<u8> {
        let header = Header::new(opcode.to_byte(), payload.len() as u16, peer_user_id, seq_id, 0, Flags::empty().with_reliable(reliable));
        assemble_frame(&header, payload)
    }

    #[test]
    fn connect_registers_a_peer_and_replies_with_accept() {
        let mut state = ServerState::new(ServerConfig::default());
        let now = Instant::now();
        let outcome = state.ingest(&connect_datagram(0), addr(4242), now);

        assert_eq!(state.client_count(), 1);
        assert!(matches!(outcome.events.as_slice(), [ServerEvent::Connected { .. }]));
        assert_eq!(outcome.to_send[0].0[1], OpCode::SAccept.to_byte());
    }

    #[test]
    fn resending_connect_is_idempotent() {
        let mut state = ServerState::new(ServerConfig::default());
        let now = Instant::now();
        let _ = state.ingest(&connect_datagram(0), addr(4242), now);
        let first_id = state.connected_ids()[0];

        let outcome = state.ingest(&connect_datagram(1), addr(4242), now);
        assert_eq!(state.client_count(), 1);
        assert!(outcome.events.is_empty());
        assert_eq!(state.connected_ids(), vec![first_id]);
    }

    #[test]
    fn input_from_unregistered_endpoint_is_dropped() {
        let mut state = ServerState::new(ServerConfig::default());
        let now = Instant::now();
        let datagram = frame_for(1, OpCode::CInput, &encode_to_vec(&CInput::default()), 0, false);
        let outcome = state.ingest(&datagram, addr(9999), now);
        assert!(outcome.events.is_empty());
    }

    #[test]
    fn input_is_gated_behind_required_lobby_code() {
        let mut config = ServerConfig::default();
        config.required_lobby_code = Some(*b"ABCDEF");
        let mut state = ServerState::new(config);
        let now = Instant::now();
        let _ = state.ingest(&connect_datagram(0), addr(4242), now);
        let user_id = state.connected_ids()[0];

        let datagram = frame_for(user_id, OpCode::CInput, &encode_to_vec(&CInput::default()), 1, false);
        let outcome = state.ingest(&datagram, addr(4242), now);
        assert!(outcome.events.is_empty());

        let join_payload = encode_to_vec(&CJoinLobby { code: *b"ABCDEF" });
        let join_datagram = frame_for(user_id, OpCode::CJoinLobby, &join_payload, 2, true);
        let _ = state.ingest(&join_datagram, addr(4242), now);

        let datagram = frame_for(user_id, OpCode::CInput, &encode_to_vec(&CInput::default()), 3, false);
        let outcome = state.ingest(&datagram, addr(4242), now);
        assert!(matches!(outcome.events.as_slice(), [ServerEvent::Input { user_id: uid, .. }] if *uid == user_id));
    }

    #[test]
    fn join_lobby_from_unknown_endpoint_still_gets_a_response() {
        let mut state = ServerState::new(ServerConfig::default());
        let now = Instant::now();
        let join_payload = encode_to_vec(&CJoinLobby { code: *b"ABCDEF" });
        let datagram = frame_for(0, OpCode::CJoinLobby, &join_payload, 0, true);
        let outcome = state.ingest(&datagram, addr(5555), now);
        assert_eq!(outcome.to_send.len(), 1);
        assert_eq!(outcome.to_send[0].0[1], OpCode::SJoinLobbyResponse.to_byte());
        assert_eq!(state.client_count(), 0);
    }

    #[test]
    fn disconnect_removes_peer_and_frees_its_id() {
        let mut state = ServerState::new(ServerConfig::default());
        let now = Instant::now();
        let _ = state.ingest(&connect_datagram(0), addr(4242), now);
        let user_id = state.connected_ids()[0];

        let payload = encode_to_vec(&DisconnectPayload { reason: DisconnectReason::LocalRequest });
        let datagram = frame_for(user_id, OpCode::Disconnect, &payload, 1, true);
        let outcome = state.ingest(&datagram, addr(4242), now);

        assert_eq!(state.client_count(), 0);
        assert!(matches!(
            outcome.events.as_slice(),
            [ServerEvent::Disconnected { reason: DisconnectReason::RemoteRequest, .. }]
        ));
    }

    #[test]
    fn idle_peer_is_evicted_on_tick() {
        let mut config = ServerConfig::default();
        config.client_timeout = std::time::Duration::from_millis(10);
        let mut state = ServerState::new(config);
        let start = Instant::now();
        let _ = state.ingest(&connect_datagram(0), addr(4242), start);

        let outcome = state.tick(start + std::time::Duration::from_millis(50));
        assert_eq!(state.client_count(), 0);
        assert!(matches!(
            outcome.events.as_slice(),
            [ServerEvent::Disconnected { reason: DisconnectReason::Timeout, .. }]
        ));
    }

    #[test]
    fn bandwidth_mode_change_broadcasts_to_every_peer() {
        let mut state = ServerState::new(ServerConfig::default());
        let now = Instant::now();
        let _ = state.ingest(&connect_datagram(0), addr(1111), now);
        let _ = state.ingest(&connect_datagram(0), addr(2222), now);
        let user_id = state.connected_ids()[0];

        let payload = encode_to_vec(&CSetBandwidthMode { mode: BandwidthMode::Low });
        let datagram = frame_for(user_id, OpCode::CSetBandwidthMode, &payload, 1, true);
        let outcome = state.ingest(&datagram, addr(1111), now);

        let broadcasts = outcome.to_send.iter().filter(|(frame, _)| frame[1] == OpCode::SBandwidthModeChanged.to_byte()).count();
        assert_eq!(broadcasts, 2);
        assert!(matches!(outcome.events.as_slice(), [ServerEvent::BandwidthModeChanged { mode: BandwidthMode::Low, .. }]));
    }
}
