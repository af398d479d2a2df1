//! User-visible events and the callback surface `poll` dispatches them to
//! (§6.5).
//!
//! Every opcode the server can send gets an event variant here, not just the
//! subset §6.5 names explicitly - `R_GET_USERS`, `S_LEVEL_ANNOUNCE`, and
//! `S_BANDWIDTH_MODE_CHANGED` are server-to-client opcodes too, and a client
//! that silently swallowed them would be unable to show a user list, a level
//! banner, or a bandwidth-mode confirmation. `S_ENTITY_MOVE_BATCH` is kept as
//! one batch event rather than exploded into per-entity `EntityMove`s, since
//! the whole point of the batch opcode is that its entries share one
//! server tick.

use rtgp_protocol::error::DisconnectReason;
use rtgp_protocol::payload::{
    ChatMessage, RGetUsers, SBandwidthModeChanged, SEntityDestroy, SEntityHealth, SEntityMove,
    SEntityMoveBatch, SEntitySpawn, SGameOver, SGameStart, SJoinLobbyResponse, SLevelAnnounce,
    SLobbyList, SPlayerReadyState, SPowerupEvent, SUpdatePos, SUpdateState,
};

/// One decoded, dispatch-ready event produced by the ingress pipeline.
///
/// These are queued, never handed to a callback directly from the I/O path -
/// see the module docs on [`crate::Client::poll`].
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The handshake completed; carries the server-assigned user id.
    Connected {
        /// This client's newly assigned id.
        user_id: u32,
    },
    /// The connection ended, locally or remotely initiated.
    Disconnected {
        /// Why the connection ended.
        reason: DisconnectReason,
    },
    /// A connect attempt exhausted its retry budget without an accept.
    ConnectFailed {
        /// Always [`DisconnectReason::MaxRetriesExceeded`] today; kept as a
        /// full reason rather than a unit variant for forward compatibility.
        reason: DisconnectReason,
    },
    /// `R_GET_USERS` response.
    Users(RGetUsers),
    /// `S_UPDATE_STATE`.
    GameState(SUpdateState),
    /// `S_GAME_OVER`.
    GameOver(SGameOver),
    /// `S_GAME_START`.
    GameStart(SGameStart),
    /// `S_PLAYER_READY_STATE`.
    PlayerReadyState(SPlayerReadyState),
    /// `S_LOBBY_LIST`.
    LobbyList(SLobbyList),
    /// `S_JOIN_LOBBY_RESPONSE`.
    JoinLobbyResponse(SJoinLobbyResponse),
    /// `S_ENTITY_SPAWN`.
    EntitySpawn(SEntitySpawn),
    /// `S_ENTITY_MOVE`.
    EntityMove(SEntityMove),
    /// `S_ENTITY_DESTROY`.
    EntityDestroy(SEntityDestroy),
    /// `S_ENTITY_HEALTH`.
    EntityHealth(SEntityHealth),
    /// `S_POWERUP_EVENT`.
    Powerup(SPowerupEvent),
    /// `S_ENTITY_MOVE_BATCH`.
    EntityMoveBatch(SEntityMoveBatch),
    /// `S_BANDWIDTH_MODE_CHANGED`.
    BandwidthModeChanged(SBandwidthModeChanged),
    /// `S_LEVEL_ANNOUNCE`.
    LevelAnnounce(SLevelAnnounce),
    /// `S_UPDATE_POS`, an authoritative position correction.
    PositionCorrection(SUpdatePos),
    /// `S_CHAT`.
    ChatMessage(ChatMessage),
}

type Callback<T> = Option<Box<dyn FnMut(T) + Send>>;

/// Optional per-event callbacks, invoked in order from inside
/// [`crate::Client::poll`] - never from the I/O task.
#[derive(Default)]
pub struct ClientCallbacks {
    /// [`ClientEvent::Connected`].
    pub on_connected: Callback<u32>,
    /// [`ClientEvent::Disconnected`].
    pub on_disconnected: Callback<DisconnectReason>,
    /// [`ClientEvent::ConnectFailed`].
    pub on_connect_failed: Callback<DisconnectReason>,
    /// [`ClientEvent::Users`].
    pub on_users: Callback<RGetUsers>,
    /// [`ClientEvent::GameState`].
    pub on_game_state: Callback<SUpdateState>,
    /// [`ClientEvent::GameOver`].
    pub on_game_over: Callback<SGameOver>,
    /// [`ClientEvent::GameStart`].
    pub on_game_start: Callback<SGameStart>,
    /// [`ClientEvent::PlayerReadyState`].
    pub on_player_ready_state: Callback<SPlayerReadyState>,
    /// [`ClientEvent::LobbyList`].
    pub on_lobby_list: Callback<SLobbyList>,
    /// [`ClientEvent::JoinLobbyResponse`].
    pub on_join_lobby_response: Callback<SJoinLobbyResponse>,
    /// [`ClientEvent::EntitySpawn`].
    pub on_entity_spawn: Callback<SEntitySpawn>,
    /// [`ClientEvent::EntityMove`].
    pub on_entity_move: Callback<SEntityMove>,
    /// [`ClientEvent::EntityDestroy`].
    pub on_entity_destroy: Callback<SEntityDestroy>,
    /// [`ClientEvent::EntityHealth`].
    pub on_entity_health: Callback<SEntityHealth>,
    /// [`ClientEvent::Powerup`].
    pub on_powerup: Callback<SPowerupEvent>,
    /// [`ClientEvent::EntityMoveBatch`].
    pub on_entity_move_batch: Callback<SEntityMoveBatch>,
    /// [`ClientEvent::BandwidthModeChanged`].
    pub on_bandwidth_mode_changed: Callback<SBandwidthModeChanged>,
    /// [`ClientEvent::LevelAnnounce`].
    pub on_level_announce: Callback<SLevelAnnounce>,
    /// [`ClientEvent::PositionCorrection`].
    pub on_position_correction: Callback<SUpdatePos>,
    /// [`ClientEvent::ChatMessage`].
    pub on_chat_message: Callback<ChatMessage>,
}

impl std::fmt::Debug for ClientCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCallbacks").finish_non_exhaustive()
    }
}

impl ClientCallbacks {
    /// Dispatches one event to its registered callback, if any. Unregistered
    /// events are silently dropped - the application is not required to
    /// care about every opcode.
    pub fn dispatch(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Connected { user_id } => call(&mut self.on_connected, user_id),
            ClientEvent::Disconnected { reason } => call(&mut self.on_disconnected, reason),
            ClientEvent::ConnectFailed { reason } => call(&mut self.on_connect_failed, reason),
            ClientEvent::Users(v) => call(&mut self.on_users, v),
            ClientEvent::GameState(v) => call(&mut self.on_game_state, v),
            ClientEvent::GameOver(v) => call(&mut self.on_game_over, v),
            ClientEvent::GameStart(v) => call(&mut self.on_game_start, v),
            ClientEvent::PlayerReadyState(v) => call(&mut self.on_player_ready_state, v),
            ClientEvent::LobbyList(v) => call(&mut self.on_lobby_list, v),
            ClientEvent::JoinLobbyResponse(v) => call(&mut self.on_join_lobby_response, v),
            ClientEvent::EntitySpawn(v) => call(&mut self.on_entity_spawn, v),
            ClientEvent::EntityMove(v) => call(&mut self.on_entity_move, v),
            ClientEvent::EntityDestroy(v) => call(&mut self.on_entity_destroy, v),
            ClientEvent::EntityHealth(v) => call(&mut self.on_entity_health, v),
            ClientEvent::Powerup(v) => call(&mut self.on_powerup, v),
            ClientEvent::EntityMoveBatch(v) => call(&mut self.on_entity_move_batch, v),
            ClientEvent::BandwidthModeChanged(v) => call(&mut self.on_bandwidth_mode_changed, v),
            ClientEvent::LevelAnnounce(v) => call(&mut self.on_level_announce, v),
            ClientEvent::PositionCorrection(v) => call(&mut self.on_position_correction, v),
            ClientEvent::ChatMessage(v) => call(&mut self.on_chat_message, v),
        }
    }
}

fn call<T>(slot: &mut Callback<T>, value: T) {
    if let Some(cb) = slot {
        cb(value);
    }
}
