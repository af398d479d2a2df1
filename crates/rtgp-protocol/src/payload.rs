//! Per-opcode payload types (§6.1).
//!
//! Every payload implements [`WireEncode`]/[`WireDecode`] by hand rather
//! than through a derive macro: the wire format mixes NUL-padded fixed
//! strings, small bitmask bytes, and - for three opcodes - a count-prefixed
//! repeated entry list, and a one-size-fits-all derive would fight that
//! variety more than it would help. Opcodes with an empty payload
//! (`C_CONNECT`, `C_GET_USERS`, `C_REQUEST_LOBBIES`, `PING`, `PONG`, `ACK`)
//! carry no payload type at all - an empty byte slice is their whole wire
//! representation.

use bytes::{Bytes, BytesMut};

use crate::codec::{
    CodecError, WireDecode, WireEncode, get_bytes_exact, get_f32, get_i16, get_u8, get_u16, get_u32,
    get_i32, put_bytes_exact, put_f32, put_i16, put_u8, put_u16, put_u32, put_i32,
};

/// Scale factor applied when converting world-space floats to the wire's
/// fixed-point `i16` representation (§6.1): `i16 = round(f * scale)`.
///
/// The source never exposed this as a configurable value consistently - one
/// deployment default is assumed here and documented rather than guessed
/// per-field. See `DESIGN.md`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionScale(pub f32);

impl Default for PositionScale {
    fn default() -> Self {
        Self(10.0)
    }
}

/// Converts a world-space float to the wire's quantized `i16`, saturating
/// rather than wrapping on overflow.
#[must_use]
pub fn quantize(value: f32, scale: PositionScale) -> i16 {
    let scaled = (value * scale.0).round();
    if scaled >= f32::from(i16::MAX) {
        i16::MAX
    } else if scaled <= f32::from(i16::MIN) {
        i16::MIN
    } else {
        scaled as i16
    }
}

/// Converts a quantized wire `i16` back to a world-space float.
#[must_use]
pub fn dequantize(value: i16, scale: PositionScale) -> f32 {
    f32::from(value) / scale.0
}

/// `S_ACCEPT` payload: the newly assigned `user_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SAccept {
    /// The id the server has bound to this connection.
    pub new_user_id: u32,
}

impl WireEncode for SAccept {
    const ENCODED_LEN: usize = 4;
    fn encode(&self, buf: &mut BytesMut) {
        put_u32(buf, self.new_user_id);
    }
}
impl WireDecode for SAccept {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            new_user_id: get_u32(buf)?,
        })
    }
}

/// `DISCONNECT` payload: the reason code, either direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisconnectPayload {
    /// Why the connection is ending.
    pub reason: crate::error::DisconnectReason,
}

impl WireEncode for DisconnectPayload {
    const ENCODED_LEN: usize = 1;
    fn encode(&self, buf: &mut BytesMut) {
        put_u8(buf, self.reason.to_wire());
    }
}
impl WireDecode for DisconnectPayload {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            reason: crate::error::DisconnectReason::from_wire(get_u8(buf)?),
        })
    }
}

/// `R_GET_USERS` payload: the connected user id list.
///
/// Variable-length; callers decode the header (entry count) and then
/// iterate entries rather than going through [`WireDecode`] directly, since
/// the type has no fixed `ENCODED_LEN`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RGetUsers {
    /// Every connected user's id.
    pub user_ids: Vec<u32>,
}

impl RGetUsers {
    /// Encodes the count-prefixed user id list.
    pub fn encode(&self, buf: &mut BytesMut) {
        #[allow(clippy::cast_possible_truncation)]
        put_u8(buf, self.user_ids.len() as u8);
        for &id in &self.user_ids {
            put_u32(buf, id);
        }
    }

    /// Decodes a count-prefixed user id list. Does not itself enforce the
    /// opcode's count cap - that is the validator's job, run before this is
    /// ever called.
    ///
    /// # Errors
    ///
    /// [`CodecError::BufferTooShort`] if fewer bytes are present than the
    /// declared count requires.
    pub fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        let count = get_u8(buf)?;
        let mut user_ids = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            user_ids.push(get_u32(buf)?);
        }
        Ok(Self { user_ids })
    }
}

/// Lobby/session game state carried by `S_UPDATE_STATE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameState {
    /// Players are in the lobby, not yet playing.
    Lobby,
    /// A round is in progress.
    Running,
    /// The round is paused.
    Paused,
    /// The round has ended.
    GameOver,
    /// An unrecognized state byte, preserved rather than rejected.
    Unknown(u8),
}

impl GameState {
    /// Stable wire byte for this state.
    #[must_use]
    pub const fn to_wire(self) -> u8 {
        match self {
            Self::Lobby => 0,
            Self::Running => 1,
            Self::Paused => 2,
            Self::GameOver => 3,
            Self::Unknown(byte) => byte,
        }
    }

    /// Decodes a wire byte, mapping anything unrecognized to `Unknown`.
    #[must_use]
    pub const fn from_wire(byte: u8) -> Self {
        match byte {
            0 => Self::Lobby,
            1 => Self::Running,
            2 => Self::Paused,
            3 => Self::GameOver,
            other => Self::Unknown(other),
        }
    }
}

/// `S_UPDATE_STATE` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SUpdateState {
    /// The session's new state.
    pub state: GameState,
}

impl WireEncode for SUpdateState {
    const ENCODED_LEN: usize = 1;
    fn encode(&self, buf: &mut BytesMut) {
        put_u8(buf, self.state.to_wire());
    }
}
impl WireDecode for SUpdateState {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            state: GameState::from_wire(get_u8(buf)?),
        })
    }
}

/// `S_GAME_OVER` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SGameOver {
    /// Final score for the session.
    pub final_score: u32,
}

impl WireEncode for SGameOver {
    const ENCODED_LEN: usize = 4;
    fn encode(&self, buf: &mut BytesMut) {
        put_u32(buf, self.final_score);
    }
}
impl WireDecode for SGameOver {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            final_score: get_u32(buf)?,
        })
    }
}

/// `C_READY` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CReady {
    /// Whether the client has marked itself ready.
    pub is_ready: bool,
}

impl WireEncode for CReady {
    const ENCODED_LEN: usize = 1;
    fn encode(&self, buf: &mut BytesMut) {
        put_u8(buf, u8::from(self.is_ready));
    }
}
impl WireDecode for CReady {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            is_ready: get_u8(buf)? != 0,
        })
    }
}

/// `S_GAME_START` payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SGameStart {
    /// Seconds remaining until the round starts; `0.0` cancels the countdown.
    pub countdown_seconds: f32,
}

impl WireEncode for SGameStart {
    const ENCODED_LEN: usize = 4;
    fn encode(&self, buf: &mut BytesMut) {
        put_f32(buf, self.countdown_seconds);
    }
}
impl WireDecode for SGameStart {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            countdown_seconds: get_f32(buf)?,
        })
    }
}

/// `S_PLAYER_READY_STATE` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SPlayerReadyState {
    /// The player whose ready state changed.
    pub user_id: u32,
    /// The player's new ready state.
    pub is_ready: bool,
}

impl WireEncode for SPlayerReadyState {
    const ENCODED_LEN: usize = 5;
    fn encode(&self, buf: &mut BytesMut) {
        put_u32(buf, self.user_id);
        put_u8(buf, u8::from(self.is_ready));
    }
}
impl WireDecode for SPlayerReadyState {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            user_id: get_u32(buf)?,
            is_ready: get_u8(buf)? != 0,
        })
    }
}

/// One entry of an `S_LOBBY_LIST` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LobbyInfo {
    /// Six-byte join code.
    pub code: [u8; 6],
    /// UDP port the lobby's session listens on.
    pub port: u16,
    /// Current player count.
    pub players: u8,
    /// Maximum player count.
    pub max: u8,
    /// Non-zero while the lobby is actively running a round.
    pub active: u8,
    /// NUL-padded level name.
    pub level_name: [u8; 16],
}

impl LobbyInfo {
    const ENCODED_LEN: usize = 6 + 2 + 1 + 1 + 1 + 16;

    fn encode(&self, buf: &mut BytesMut) {
        put_bytes_exact(buf, &self.code);
        put_u16(buf, self.port);
        put_u8(buf, self.players);
        put_u8(buf, self.max);
        put_u8(buf, self.active);
        put_bytes_exact(buf, &self.level_name);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            code: get_bytes_exact::<6>(buf)?,
            port: get_u16(buf)?,
            players: get_u8(buf)?,
            max: get_u8(buf)?,
            active: get_u8(buf)?,
            level_name: get_bytes_exact::<16>(buf)?,
        })
    }
}

/// `S_LOBBY_LIST` payload: up to 50 open lobbies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SLobbyList {
    /// The open lobby list.
    pub lobbies: Vec<LobbyInfo>,
}

impl SLobbyList {
    /// Maximum entries this opcode may carry in one frame.
    pub const MAX_LOBBIES: u8 = 50;

    /// Encodes the count-prefixed lobby list.
    pub fn encode(&self, buf: &mut BytesMut) {
        #[allow(clippy::cast_possible_truncation)]
        put_u8(buf, self.lobbies.len() as u8);
        for lobby in &self.lobbies {
            lobby.encode(buf);
        }
    }

    /// Decodes a count-prefixed lobby list.
    ///
    /// # Errors
    ///
    /// [`CodecError::BufferTooShort`] if fewer bytes are present than the
    /// declared count requires.
    pub fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        let count = get_u8(buf)?;
        let mut lobbies = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            lobbies.push(LobbyInfo::decode(buf)?);
        }
        Ok(Self { lobbies })
    }
}

/// `C_JOIN_LOBBY` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CJoinLobby {
    /// Six-byte join code.
    pub code: [u8; 6],
}

impl WireEncode for CJoinLobby {
    const ENCODED_LEN: usize = 6;
    fn encode(&self, buf: &mut BytesMut) {
        put_bytes_exact(buf, &self.code);
    }
}
impl WireDecode for CJoinLobby {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            code: get_bytes_exact::<6>(buf)?,
        })
    }
}

/// `S_JOIN_LOBBY_RESPONSE` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SJoinLobbyResponse {
    /// Whether the join request was accepted.
    pub accepted: bool,
    /// Rejection reason, meaningful only when `accepted` is `false`.
    pub reason: u8,
    /// NUL-padded level name for the joined lobby.
    pub level_name: [u8; 16],
}

impl WireEncode for SJoinLobbyResponse {
    const ENCODED_LEN: usize = 1 + 1 + 16;
    fn encode(&self, buf: &mut BytesMut) {
        put_u8(buf, u8::from(self.accepted));
        put_u8(buf, self.reason);
        put_bytes_exact(buf, &self.level_name);
    }
}
impl WireDecode for SJoinLobbyResponse {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            accepted: get_u8(buf)? != 0,
            reason: get_u8(buf)?,
            level_name: get_bytes_exact::<16>(buf)?,
        })
    }
}

/// `S_ENTITY_SPAWN` payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SEntitySpawn {
    /// Newly spawned entity's id.
    pub entity_id: u32,
    /// Entity type tag (e.g. player, enemy, projectile).
    pub kind: u8,
    /// Entity subtype tag, meaning dependent on `kind`.
    pub subtype: u8,
    /// Spawn position, x.
    pub x: f32,
    /// Spawn position, y.
    pub y: f32,
}

impl WireEncode for SEntitySpawn {
    const ENCODED_LEN: usize = 4 + 1 + 1 + 4 + 4;
    fn encode(&self, buf: &mut BytesMut) {
        put_u32(buf, self.entity_id);
        put_u8(buf, self.kind);
        put_u8(buf, self.subtype);
        put_f32(buf, self.x);
        put_f32(buf, self.y);
    }
}
impl WireDecode for SEntitySpawn {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            entity_id: get_u32(buf)?,
            kind: get_u8(buf)?,
            subtype: get_u8(buf)?,
            x: get_f32(buf)?,
            y: get_f32(buf)?,
        })
    }
}

/// `S_ENTITY_MOVE` payload: one quantized position/velocity update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SEntityMove {
    /// The moved entity's id.
    pub entity_id: u32,
    /// Server simulation tick this update corresponds to.
    pub server_tick: u32,
    /// Quantized position, x.
    pub px: i16,
    /// Quantized position, y.
    pub py: i16,
    /// Quantized velocity, x.
    pub vx: i16,
    /// Quantized velocity, y.
    pub vy: i16,
}

impl WireEncode for SEntityMove {
    const ENCODED_LEN: usize = 4 + 4 + 2 * 4;
    fn encode(&self, buf: &mut BytesMut) {
        put_u32(buf, self.entity_id);
        put_u32(buf, self.server_tick);
        put_i16(buf, self.px);
        put_i16(buf, self.py);
        put_i16(buf, self.vx);
        put_i16(buf, self.vy);
    }
}
impl WireDecode for SEntityMove {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            entity_id: get_u32(buf)?,
            server_tick: get_u32(buf)?,
            px: get_i16(buf)?,
            py: get_i16(buf)?,
            vx: get_i16(buf)?,
            vy: get_i16(buf)?,
        })
    }
}

/// `S_ENTITY_DESTROY` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SEntityDestroy {
    /// The destroyed entity's id.
    pub entity_id: u32,
}

impl WireEncode for SEntityDestroy {
    const ENCODED_LEN: usize = 4;
    fn encode(&self, buf: &mut BytesMut) {
        put_u32(buf, self.entity_id);
    }
}
impl WireDecode for SEntityDestroy {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            entity_id: get_u32(buf)?,
        })
    }
}

/// `S_ENTITY_HEALTH` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SEntityHealth {
    /// The entity whose health changed.
    pub entity_id: u32,
    /// Current health.
    pub current: i32,
    /// Maximum health.
    pub max: i32,
}

impl WireEncode for SEntityHealth {
    const ENCODED_LEN: usize = 4 + 4 + 4;
    fn encode(&self, buf: &mut BytesMut) {
        put_u32(buf, self.entity_id);
        put_i32(buf, self.current);
        put_i32(buf, self.max);
    }
}
impl WireDecode for SEntityHealth {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            entity_id: get_u32(buf)?,
            current: get_i32(buf)?,
            max: get_i32(buf)?,
        })
    }
}

/// `S_POWERUP_EVENT` payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SPowerupEvent {
    /// The player who picked up the power-up.
    pub player_id: u32,
    /// Power-up type tag.
    pub kind: u8,
    /// How long the effect lasts, in seconds.
    pub duration: f32,
}

impl WireEncode for SPowerupEvent {
    const ENCODED_LEN: usize = 4 + 1 + 4;
    fn encode(&self, buf: &mut BytesMut) {
        put_u32(buf, self.player_id);
        put_u8(buf, self.kind);
        put_f32(buf, self.duration);
    }
}
impl WireDecode for SPowerupEvent {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            player_id: get_u32(buf)?,
            kind: get_u8(buf)?,
            duration: get_f32(buf)?,
        })
    }
}

/// One entry of an `S_ENTITY_MOVE_BATCH` payload - the same quantized shape
/// as [`SEntityMove`] minus the per-entry `server_tick`, since the batch
/// shares a single tick across all its entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveBatchEntry {
    /// The moved entity's id.
    pub entity_id: u32,
    /// Quantized position, x.
    pub px: i16,
    /// Quantized position, y.
    pub py: i16,
    /// Quantized velocity, x.
    pub vx: i16,
    /// Quantized velocity, y.
    pub vy: i16,
}

impl MoveBatchEntry {
    const ENCODED_LEN: usize = 4 + 2 * 4;

    fn encode(&self, buf: &mut BytesMut) {
        put_u32(buf, self.entity_id);
        put_i16(buf, self.px);
        put_i16(buf, self.py);
        put_i16(buf, self.vx);
        put_i16(buf, self.vy);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            entity_id: get_u32(buf)?,
            px: get_i16(buf)?,
            py: get_i16(buf)?,
            vx: get_i16(buf)?,
            vy: get_i16(buf)?,
        })
    }
}

/// `S_ENTITY_MOVE_BATCH` payload: up to 114 moves sharing one server tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SEntityMoveBatch {
    /// Simulation tick shared by every entry in this batch.
    pub server_tick: u32,
    /// The batched entity moves.
    pub entries: Vec<MoveBatchEntry>,
}

impl SEntityMoveBatch {
    /// Maximum entries this opcode may carry in one frame.
    pub const MAX_ENTRIES: u8 = 114;

    /// Encodes the count, shared tick, then each entry in order.
    pub fn encode(&self, buf: &mut BytesMut) {
        #[allow(clippy::cast_possible_truncation)]
        put_u8(buf, self.entries.len() as u8);
        put_u32(buf, self.server_tick);
        for entry in &self.entries {
            entry.encode(buf);
        }
    }

    /// Decodes the count, shared tick, then each entry in order.
    ///
    /// # Errors
    ///
    /// [`CodecError::BufferTooShort`] if fewer bytes are present than the
    /// declared count requires.
    pub fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        let count = get_u8(buf)?;
        let server_tick = get_u32(buf)?;
        let mut entries = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            entries.push(MoveBatchEntry::decode(buf)?);
        }
        Ok(Self {
            server_tick,
            entries,
        })
    }
}

/// Client-requested bandwidth profile (`C_SET_BANDWIDTH_MODE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandwidthMode {
    /// Full update rate.
    Normal,
    /// Reduced update rate for constrained links.
    Low,
    /// An unrecognized mode byte, preserved rather than rejected.
    Unknown(u8),
}

impl BandwidthMode {
    /// Stable wire byte for this mode.
    #[must_use]
    pub const fn to_wire(self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::Low => 1,
            Self::Unknown(byte) => byte,
        }
    }

    /// Decodes a wire byte, mapping anything unrecognized to `Unknown`.
    #[must_use]
    pub const fn from_wire(byte: u8) -> Self {
        match byte {
            0 => Self::Normal,
            1 => Self::Low,
            other => Self::Unknown(other),
        }
    }
}

/// `C_SET_BANDWIDTH_MODE` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CSetBandwidthMode {
    /// The requested bandwidth mode.
    pub mode: BandwidthMode,
}

impl WireEncode for CSetBandwidthMode {
    const ENCODED_LEN: usize = 1;
    fn encode(&self, buf: &mut BytesMut) {
        put_u8(buf, self.mode.to_wire());
    }
}
impl WireDecode for CSetBandwidthMode {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            mode: BandwidthMode::from_wire(get_u8(buf)?),
        })
    }
}

/// `S_BANDWIDTH_MODE_CHANGED` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SBandwidthModeChanged {
    /// The client whose bandwidth mode changed.
    pub user_id: u32,
    /// The new mode.
    pub mode: BandwidthMode,
    /// Number of clients currently in low-bandwidth mode.
    pub active_count: u8,
}

impl WireEncode for SBandwidthModeChanged {
    const ENCODED_LEN: usize = 4 + 1 + 1;
    fn encode(&self, buf: &mut BytesMut) {
        put_u32(buf, self.user_id);
        put_u8(buf, self.mode.to_wire());
        put_u8(buf, self.active_count);
    }
}
impl WireDecode for SBandwidthModeChanged {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            user_id: get_u32(buf)?,
            mode: BandwidthMode::from_wire(get_u8(buf)?),
            active_count: get_u8(buf)?,
        })
    }
}

/// `S_LEVEL_ANNOUNCE` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SLevelAnnounce {
    /// NUL-padded level name.
    pub level_name: [u8; 32],
    /// NUL-padded background asset identifier.
    pub background: [u8; 32],
}

impl WireEncode for SLevelAnnounce {
    const ENCODED_LEN: usize = 32 + 32;
    fn encode(&self, buf: &mut BytesMut) {
        put_bytes_exact(buf, &self.level_name);
        put_bytes_exact(buf, &self.background);
    }
}
impl WireDecode for SLevelAnnounce {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            level_name: get_bytes_exact::<32>(buf)?,
            background: get_bytes_exact::<32>(buf)?,
        })
    }
}

/// Client input bitmask carried by `C_INPUT`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputMask(pub u8);

impl InputMask {
    /// Up/thrust held.
    pub const UP: u8 = 0x01;
    /// Down held.
    pub const DOWN: u8 = 0x02;
    /// Left held.
    pub const LEFT: u8 = 0x04;
    /// Right held.
    pub const RIGHT: u8 = 0x08;
    /// Fire held.
    pub const SHOOT: u8 = 0x10;

    /// Whether `bit` is set.
    #[must_use]
    pub const fn has(self, bit: u8) -> bool {
        self.0 & bit != 0
    }
}

/// `C_INPUT` payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CInput {
    /// The held-input bitmask for this tick.
    pub mask: InputMask,
}

impl WireEncode for CInput {
    const ENCODED_LEN: usize = 1;
    fn encode(&self, buf: &mut BytesMut) {
        put_u8(buf, self.mask.0);
    }
}
impl WireDecode for CInput {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            mask: InputMask(get_u8(buf)?),
        })
    }
}

/// `S_UPDATE_POS` payload: an authoritative, unquantized position correction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SUpdatePos {
    /// Corrected position, x.
    pub x: f32,
    /// Corrected position, y.
    pub y: f32,
}

impl WireEncode for SUpdatePos {
    const ENCODED_LEN: usize = 4 + 4;
    fn encode(&self, buf: &mut BytesMut) {
        put_f32(buf, self.x);
        put_f32(buf, self.y);
    }
}
impl WireDecode for SUpdatePos {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            x: get_f32(buf)?,
            y: get_f32(buf)?,
        })
    }
}

/// Shared shape of `C_CHAT` and `S_CHAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatMessage {
    /// The sender's user id.
    pub user_id: u32,
    /// NUL-padded UTF-8 message bytes.
    pub message: [u8; 256],
}

impl ChatMessage {
    /// Builds a chat payload from a UTF-8 string, truncating and NUL-padding
    /// to fit the fixed 256-byte field.
    #[must_use]
    pub fn new(user_id: u32, text: &str) -> Self {
        let mut message = [0u8; 256];
        let bytes = text.as_bytes();
        let len = bytes.len().min(message.len());
        message[..len].copy_from_slice(&bytes[..len]);
        Self { user_id, message }
    }

    /// Decodes the message field as UTF-8 up to the first NUL byte,
    /// lossily substituting any invalid sequences.
    #[must_use]
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        let end = self.message.iter().position(|&b| b == 0).unwrap_or(self.message.len());
        String::from_utf8_lossy(&self.message[..end])
    }
}

impl WireEncode for ChatMessage {
    const ENCODED_LEN: usize = 4 + 256;
    fn encode(&self, buf: &mut BytesMut) {
        put_u32(buf, self.user_id);
        put_bytes_exact(buf, &self.message);
    }
}
impl WireDecode for ChatMessage {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            user_id: get_u32(buf)?,
            message: get_bytes_exact::<256>(buf)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_exact, encode_to_vec};

    #[test]
    fn saccept_round_trips() {
        let value = SAccept { new_user_id: 7 };
        let encoded = encode_to_vec(&value);
        assert_eq!(decode_exact::<SAccept>(&encoded).unwrap(), value);
    }

    #[test]
    fn entity_move_round_trips_negative_values() {
        let value = SEntityMove {
            entity_id: 42,
            server_tick: 1000,
            px: -100,
            py: 200,
            vx: -5,
            vy: 0,
        };
        let encoded = encode_to_vec(&value);
        assert_eq!(decode_exact::<SEntityMove>(&encoded).unwrap(), value);
    }

    #[test]
    fn move_batch_round_trips_three_entries() {
        let batch = SEntityMoveBatch {
            server_tick: 1000,
            entries: vec![
                MoveBatchEntry { entity_id: 1, px: 10, py: 20, vx: 1, vy: -1 },
                MoveBatchEntry { entity_id: 2, px: -10, py: -20, vx: 0, vy: 0 },
                MoveBatchEntry { entity_id: 3, px: 0, py: 0, vx: 5, vy: 5 },
            ],
        };
        let mut buf = BytesMut::new();
        batch.encode(&mut buf);
        let mut frozen = buf.freeze();
        let decoded = SEntityMoveBatch::decode(&mut frozen).unwrap();
        assert_eq!(decoded, batch);
    }

    #[test]
    fn chat_message_round_trips_and_truncates() {
        let msg = ChatMessage::new(3, "hello");
        assert_eq!(msg.text(), "hello");
        let encoded = encode_to_vec(&msg);
        let decoded = decode_exact::<ChatMessage>(&encoded).unwrap();
        assert_eq!(decoded.text(), "hello");

        let long = "x".repeat(300);
        let truncated = ChatMessage::new(1, &long);
        assert_eq!(truncated.text().len(), 256);
    }

    #[test]
    fn quantize_saturates_out_of_range() {
        assert_eq!(quantize(10_000.0, PositionScale(10.0)), i16::MAX);
        assert_eq!(quantize(-10_000.0, PositionScale(10.0)), i16::MIN);
        assert_eq!(quantize(1.5, PositionScale(10.0)), 15);
    }

    #[test]
    fn game_state_unknown_byte_preserved() {
        assert_eq!(GameState::from_wire(200).to_wire(), 200);
        assert_eq!(GameState::from_wire(1), GameState::Running);
    }

    #[test]
    fn lobby_list_round_trips() {
        let list = SLobbyList {
            lobbies: vec![LobbyInfo {
                code: *b"ABC123",
                port: 4343,
                players: 2,
                max: 4,
                active: 0,
                level_name: *b"level-one\0\0\0\0\0\0\0",
            }],
        };
        let mut buf = BytesMut::new();
        list.encode(&mut buf);
        let mut frozen = buf.freeze();
        let decoded = SLobbyList::decode(&mut frozen).unwrap();
        assert_eq!(decoded, list);
    }
}
