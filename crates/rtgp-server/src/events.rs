//! User-visible events and the callback surface `poll` dispatches them to
//! (§6.5's server bullet).
//!
//! `C_GET_USERS` is named `UsersRequested` here rather than `GetUsers`, since
//! on the server side the event *is* the request - the response
//! (`R_GET_USERS`) is something the application sends back explicitly via
//! [`crate::Server::send_users`], mirroring how the source's
//! `onGetUsersRequestCallback_` hands the request to the application instead
//! of answering it itself.

use std::net::SocketAddr;

use rtgp_protocol::error::DisconnectReason;
use rtgp_protocol::payload::{BandwidthMode, CInput};

/// One decoded, dispatch-ready event produced by the ingress pipeline.
///
/// These are queued, never handed to a callback directly from the I/O path -
/// see the module docs on [`crate::Server::poll`].
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A peer completed the handshake.
    Connected {
        /// The newly assigned id.
        user_id: u32,
        /// The peer's UDP endpoint.
        addr: SocketAddr,
    },
    /// A peer's connection ended, locally or remotely initiated, or by
    /// timeout/retry exhaustion.
    Disconnected {
        /// The peer that disconnected.
        user_id: u32,
        /// Why the connection ended.
        reason: DisconnectReason,
    },
    /// `C_INPUT`.
    Input {
        /// The sending peer.
        user_id: u32,
        /// The input bitmask for this tick.
        input: CInput,
    },
    /// `C_GET_USERS`; respond with [`crate::Server::send_users`].
    UsersRequested {
        /// The requesting peer.
        user_id: u32,
    },
    /// `C_READY`.
    Ready {
        /// The peer whose ready state changed.
        user_id: u32,
        /// The peer's new ready state.
        is_ready: bool,
    },
    /// `C_CHAT`.
    Chat {
        /// The sending peer.
        user_id: u32,
        /// The message text, already decoded from its NUL-padded field.
        text: String,
    },
    /// `C_SET_BANDWIDTH_MODE` took effect.
    BandwidthModeChanged {
        /// The peer whose mode changed.
        user_id: u32,
        /// The new mode.
        mode: BandwidthMode,
    },
    /// `C_REQUEST_LOBBIES`; respond with [`crate::Server::send_lobby_list`].
    LobbyListRequested {
        /// The requesting peer.
        user_id: u32,
    },
    /// `C_JOIN_LOBBY`, already answered with `S_JOIN_LOBBY_RESPONSE`; this
    /// event is purely informational for application-side bookkeeping.
    JoinLobbyRequested {
        /// The requesting peer.
        user_id: u32,
        /// The six-byte code it supplied.
        code: [u8; 6],
        /// Whether the join gate accepted it.
        accepted: bool,
    },
}

type Callback<T> = Option<Box<dyn FnMut(T) + Send>>;

/// Optional per-event callbacks, invoked in order from inside
/// [`crate::Server::poll`] - never from the I/O task.
#[derive(Default)]
pub struct ServerCallbacks {
    /// [`ServerEvent::Connected`].
    pub on_connected: Callback<(u32, SocketAddr)>,
    /// [`ServerEvent::Disconnected`].
    pub on_disconnected: Callback<(u32, DisconnectReason)>,
    /// [`ServerEvent::Input`].
    pub on_input: Callback<(u32, CInput)>,
    /// [`ServerEvent::UsersRequested`].
    pub on_users_requested: Callback<u32>,
    /// [`ServerEvent::Ready`].
    pub on_ready: Callback<(u32, bool)>,
    /// [`ServerEvent::Chat`].
    pub on_chat: Callback<(u32, String)>,
    /// [`ServerEvent::BandwidthModeChanged`].
    pub on_bandwidth_mode_changed: Callback<(u32, BandwidthMode)>,
    /// [`ServerEvent::LobbyListRequested`].
    pub on_lobby_list_requested: Callback<u32>,
    /// [`ServerEvent::JoinLobbyRequested`].
    pub on_join_lobby_requested: Callback<(u32, [u8; 6], bool)>,
}

impl std::fmt::Debug for ServerCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerCallbacks").finish_non_exhaustive()
    }
}

impl ServerCallbacks {
    /// Dispatches one event to its registered callback, if any. Unregistered
    /// events are silently dropped - the application is not required to
    /// care about every opcode.
    pub fn dispatch(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Connected { user_id, addr } => call(&mut self.on_connected, (user_id, addr)),
            ServerEvent::Disconnected { user_id, reason } => call(&mut self.on_disconnected, (user_id, reason)),
            ServerEvent::Input { user_id, input } => call(&mut self.on_input, (user_id, input)),
            ServerEvent::UsersRequested { user_id } => call(&mut self.on_users_requested, user_id),
            ServerEvent::Ready { user_id, is_ready } => call(&mut self.on_ready, (user_id, is_ready)),
            ServerEvent::Chat { user_id, text } => call(&mut self.on_chat, (user_id, text)),
            ServerEvent::BandwidthModeChanged { user_id, mode } => {
                call(&mut self.on_bandwidth_mode_changed, (user_id, mode));
            }
            ServerEvent::LobbyListRequested { user_id } => call(&mut self.on_lobby_list_requested, user_id),
            ServerEvent::JoinLobbyRequested { user_id, code, accepted } => {
                call(&mut self.on_join_lobby_requested, (user_id, code, accepted));
            }
        }
    }
}

fn call<T>(slot: &mut Callback<T>, value: T) {
    if let Some(cb) = slot {
        cb(value);
    }
}
