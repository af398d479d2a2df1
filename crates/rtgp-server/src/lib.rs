//! Server orchestrator: one socket, many peers, a deferred event queue.
//!
//! [`state`] holds the pure, socket-free peer table and ingress/egress
//! logic; [`Server`] is the thin async shell around it that owns a real
//! [`AsyncDatagramSocket`], spawns a background receive task, and exposes
//! the public API. Shared state lives behind a [`std::sync::Mutex`] that is
//! never held across an `.await` point, mirroring `rtgp-client`'s `Client`.

pub mod config;
pub mod error;
pub mod events;
pub mod peer;
pub mod state;

use std::net::SocketAddr;
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tokio::task::JoinHandle;
use tracing::{trace, warn};

use rtgp_net::AsyncDatagramSocket;
use rtgp_protocol::diagnostics::Diagnostic;
use rtgp_protocol::error::DisconnectReason;
use rtgp_protocol::header::MAX_DATAGRAM_SIZE;
use rtgp_protocol::payload::{GameState, LobbyInfo, MoveBatchEntry, SEntityHealth, SEntityMove, SEntitySpawn, SLevelAnnounce, SPowerupEvent, SUpdatePos};

pub use config::ServerConfig;
pub use error::ServerError;
pub use events::{ServerCallbacks, ServerEvent};
pub use state::ServerState;

fn now() -> Instant {
    Instant::now()
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A caller-supplied sink for [`Diagnostic`] events (§9; see
/// [`Server::set_diagnostic_sink`]).
type DiagnosticSink = Box<dyn Fn(Diagnostic) + Send + Sync>;

fn emit_diagnostics(sink: &Mutex<Option<DiagnosticSink>>, diagnostics: Vec<Diagnostic>) {
    if diagnostics.is_empty() {
        return;
    }
    let guard = lock(sink);
    if let Some(sink) = guard.as_ref() {
        for diagnostic in diagnostics {
            sink(diagnostic);
        }
    }
}

/// One listening RTGP server socket and every peer currently connected to
/// it (§6.5).
///
/// `S` is the socket backend - [`rtgp_net::UdpTransport`] in production,
/// swappable for a fake in tests.
pub struct Server<S: AsyncDatagramSocket> {
    socket: Arc<S>,
    state: Arc<Mutex<ServerState>>,
    events_tx: SyncSender<ServerEvent>,
    events_rx: Receiver<ServerEvent>,
    diagnostic_sink: Arc<Mutex<Option<DiagnosticSink>>>,
    recv_task: JoinHandle<()>,
}

async fn send_all<S: AsyncDatagramSocket>(socket: &S, frames: Vec<(Vec<u8>, SocketAddr)>) {
    for (frame, addr) in frames {
        if let Err(error) = socket.send_to(&frame, addr).await {
            warn!(%error, %addr, "failed to send queued frame");
        }
    }
}

fn spawn_recv_task<S: AsyncDatagramSocket>(
    socket: Arc<S>,
    state: Arc<Mutex<ServerState>>,
    events_tx: SyncSender<ServerEvent>,
    diagnostic_sink: Arc<Mutex<Option<DiagnosticSink>>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            let (len, from) = match socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(rtgp_net::SocketError::Cancelled | rtgp_net::SocketError::Closed) => {
                    trace!("recv task stopping");
                    return;
                }
                Err(error) => {
                    warn!(%error, "recv failed, stopping recv task");
                    return;
                }
            };

            let outcome = {
                let mut state = lock(&state);
                state.ingest(&buf[..len], from, now())
            };

            send_all(&*socket, outcome.to_send).await;

            for event in outcome.events {
                if events_tx.try_send(event).is_err() {
                    warn!("event queue full or disconnected, dropping event");
                }
            }

            emit_diagnostics(&diagnostic_sink, outcome.diagnostics);
        }
    })
}

impl<S: AsyncDatagramSocket> Server<S> {
    /// Binds a socket on `port` (`0` for an OS-assigned port, `DEFAULT_SERVER_PORT`
    /// by convention) and starts accepting connections.
    ///
    /// # Errors
    ///
    /// Whatever [`AsyncDatagramSocket::bind`] returns.
    pub async fn start(port: u16, config: ServerConfig) -> Result<Self, ServerError> {
        let socket = Arc::new(S::bind(port).await?);
        let capacity = config.event_queue_capacity.max(1);
        let (events_tx, events_rx) = sync_channel(capacity);
        let state = Arc::new(Mutex::new(ServerState::new(config)));
        let diagnostic_sink = Arc::new(Mutex::new(None));
        let recv_task = spawn_recv_task(socket.clone(), state.clone(), events_tx.clone(), diagnostic_sink.clone());
        Ok(Self {
            socket,
            state,
            events_tx,
            events_rx,
            diagnostic_sink,
            recv_task,
        })
    }

    /// Installs `sink` to receive every [`Diagnostic`] this server raises
    /// from then on, in place of (or alongside) a `tracing` subscriber (§9).
    /// Replaces any previously installed sink.
    pub fn set_diagnostic_sink(&self, sink: impl Fn(Diagnostic) + Send + Sync + 'static) {
        *lock(&self.diagnostic_sink) = Some(Box::new(sink));
    }

    /// The local port this server's socket is bound to.
    ///
    /// # Errors
    ///
    /// [`ServerError::Socket`] if the socket has already been closed.
    pub fn local_port(&self) -> Result<u16, ServerError> {
        Ok(self.socket.local_port()?)
    }

    /// Number of currently connected peers.
    #[must_use]
    pub fn client_count(&self) -> usize {
        lock(&self.state).client_count()
    }

    /// Every currently connected peer's id, in arbitrary order.
    #[must_use]
    pub fn connected_ids(&self) -> Vec<u32> {
        lock(&self.state).connected_ids()
    }

    /// The UDP endpoint bound to `user_id`, if it is currently connected.
    #[must_use]
    pub fn endpoint_of(&self, user_id: u32) -> Option<SocketAddr> {
        lock(&self.state).endpoint_of(user_id)
    }

    /// Whether `user_id` last requested low-bandwidth mode.
    #[must_use]
    pub fn is_low_bandwidth(&self, user_id: u32) -> bool {
        lock(&self.state).is_low_bandwidth(user_id)
    }

    /// Installs a predicate consulted on every `C_CONNECT`; returning `true`
    /// rejects the endpoint with `DISCONNECT(Banned)` before a peer is ever
    /// registered for it.
    pub fn set_ban_predicate(&self, predicate: impl FnMut(SocketAddr) -> bool + Send + 'static) {
        lock(&self.state).set_ban_predicate(predicate);
    }

    fn queue_events(&self, events: Vec<ServerEvent>) {
        for event in events {
            if self.events_tx.try_send(event).is_err() {
                warn!("event queue full or disconnected, dropping event");
            }
        }
    }

    /// Forcibly disconnects `user_id`, sending `DISCONNECT` with `reason`.
    /// A no-op if `user_id` is not connected.
    pub async fn disconnect_client(&self, user_id: u32, reason: DisconnectReason) {
        let outcome = lock(&self.state).disconnect_client(user_id, reason, now());
        send_all(&*self.socket, outcome.to_send).await;
        self.queue_events(outcome.events);
        emit_diagnostics(&self.diagnostic_sink, outcome.diagnostics);
    }

    /// Broadcasts `S_UPDATE_STATE`.
    pub async fn broadcast_game_state(&self, state: GameState) {
        let frames = lock(&self.state).broadcast_game_state(state, now());
        send_all(&*self.socket, frames).await;
    }

    /// Broadcasts `S_GAME_OVER`.
    pub async fn broadcast_game_over(&self, final_score: u32) {
        let frames = lock(&self.state).broadcast_game_over(final_score, now());
        send_all(&*self.socket, frames).await;
    }

    /// Broadcasts `S_GAME_START`.
    pub async fn broadcast_game_start(&self, countdown_seconds: f32) {
        let frames = lock(&self.state).broadcast_game_start(countdown_seconds, now());
        send_all(&*self.socket, frames).await;
    }

    /// Broadcasts a player's ready-state change as `S_PLAYER_READY_STATE`.
    pub async fn broadcast_ready_state(&self, user_id: u32, is_ready: bool) {
        let frames = lock(&self.state).broadcast_ready_state(user_id, is_ready, now());
        send_all(&*self.socket, frames).await;
    }

    /// Responds to a [`ServerEvent::LobbyListRequested`] with `S_LOBBY_LIST`.
    ///
    /// # Errors
    ///
    /// [`ServerError::UnknownPeer`] if `user_id` is not connected.
    pub async fn send_lobby_list(&self, user_id: u32, lobbies: Vec<LobbyInfo>) -> Result<(), ServerError> {
        let (frame, addr) = lock(&self.state).send_lobby_list(user_id, lobbies, now())?;
        self.socket.send_to(&frame, addr).await?;
        Ok(())
    }

    /// Responds to a [`ServerEvent::UsersRequested`] with `R_GET_USERS`.
    ///
    /// # Errors
    ///
    /// [`ServerError::UnknownPeer`] if `user_id` is not connected.
    pub async fn send_users(&self, user_id: u32, user_ids: Vec<u32>) -> Result<(), ServerError> {
        let (frame, addr) = lock(&self.state).send_users(user_id, user_ids, now())?;
        self.socket.send_to(&frame, addr).await?;
        Ok(())
    }

    /// Broadcasts `S_ENTITY_SPAWN`.
    pub async fn broadcast_entity_spawn(&self, spawn: SEntitySpawn) {
        let frames = lock(&self.state).broadcast_entity_spawn(spawn, now());
        send_all(&*self.socket, frames).await;
    }

    /// Unicasts `S_ENTITY_MOVE`.
    ///
    /// # Errors
    ///
    /// [`ServerError::UnknownPeer`] if `user_id` is not connected.
    pub async fn unicast_entity_move(&self, user_id: u32, mv: SEntityMove) -> Result<(), ServerError> {
        let (frame, addr) = lock(&self.state).unicast_entity_move(user_id, mv, now())?;
        self.socket.send_to(&frame, addr).await?;
        Ok(())
    }

    /// Broadcasts `S_ENTITY_MOVE`.
    pub async fn broadcast_entity_move(&self, mv: SEntityMove) {
        let frames = lock(&self.state).broadcast_entity_move(mv, now());
        send_all(&*self.socket, frames).await;
    }

    /// Broadcasts a shared-tick `S_ENTITY_MOVE_BATCH`.
    pub async fn broadcast_entity_move_batch(&self, server_tick: u32, entries: Vec<MoveBatchEntry>) {
        let frames = lock(&self.state).broadcast_entity_move_batch(server_tick, entries, now());
        send_all(&*self.socket, frames).await;
    }

    /// Broadcasts `S_ENTITY_DESTROY`.
    pub async fn broadcast_entity_destroy(&self, entity_id: u32) {
        let frames = lock(&self.state).broadcast_entity_destroy(entity_id, now());
        send_all(&*self.socket, frames).await;
    }

    /// Broadcasts `S_ENTITY_HEALTH`.
    pub async fn broadcast_entity_health(&self, health: SEntityHealth) {
        let frames = lock(&self.state).broadcast_entity_health(health, now());
        send_all(&*self.socket, frames).await;
    }

    /// Broadcasts `S_POWERUP_EVENT`.
    pub async fn broadcast_powerup_event(&self, event: SPowerupEvent) {
        let frames = lock(&self.state).broadcast_powerup_event(event, now());
        send_all(&*self.socket, frames).await;
    }

    /// Broadcasts `S_LEVEL_ANNOUNCE`.
    pub async fn broadcast_level_announce(&self, announce: SLevelAnnounce) {
        let frames = lock(&self.state).broadcast_level_announce(announce, now());
        send_all(&*self.socket, frames).await;
    }

    /// Unicasts an authoritative `S_UPDATE_POS` correction.
    ///
    /// # Errors
    ///
    /// [`ServerError::UnknownPeer`] if `user_id` is not connected.
    pub async fn unicast_position_correction(&self, user_id: u32, pos: SUpdatePos) -> Result<(), ServerError> {
        let (frame, addr) = lock(&self.state).unicast_position_correction(user_id, pos, now())?;
        self.socket.send_to(&frame, addr).await?;
        Ok(())
    }

    /// Broadcasts an `S_CHAT` relay of a message `sender_id` sent - called
    /// explicitly after receiving [`ServerEvent::Chat`]; relaying is never
    /// automatic.
    pub async fn broadcast_chat(&self, sender_id: u32, text: &str) {
        let frames = lock(&self.state).broadcast_chat(sender_id, text, now());
        send_all(&*self.socket, frames).await;
    }

    /// Advances every peer's reliable channel: emits due retransmits, drops
    /// peers whose outgoing retry cap was exceeded, and evicts peers idle
    /// longer than [`ServerConfig::client_timeout`]. The application is
    /// expected to call this on a fixed interval.
    pub async fn tick(&self) {
        let outcome = lock(&self.state).tick(now());
        send_all(&*self.socket, outcome.to_send).await;
        self.queue_events(outcome.events);
        emit_diagnostics(&self.diagnostic_sink, outcome.diagnostics);
    }

    /// Drains every event queued since the last call and runs `callbacks`
    /// against each of them, in arrival order.
    pub fn poll(&self, callbacks: &mut ServerCallbacks) {
        while let Ok(event) = self.events_rx.try_recv() {
            callbacks.dispatch(event);
        }
    }

    /// Closes the socket and stops the background receive task.
    pub async fn stop(&self) {
        self.recv_task.abort();
        let _ = self.socket.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtgp_net::UdpTransport;

    async fn server_and_fake_client() -> (Server<UdpTransport>, UdpTransport, SocketAddr) {
        let server = Server::<UdpTransport>::start(0, ServerConfig::default()).await.unwrap();
        let fake_client = UdpTransport::bind(0).await.unwrap();
        let server_addr: SocketAddr = ([127, 0, 0, 1], server.local_port().unwrap()).into();
        (server, fake_client, server_addr)
    }

    fn connect_datagram() -> Vec<u8> {
        let header = rtgp_protocol::Header::new(
            rtgp_protocol::OpCode::CConnect.to_byte(),
            0,
            rtgp_protocol::header::UNASSIGNED_USER_ID,
            0,
            0,
            rtgp_protocol::Flags::empty().with_reliable(true),
        );
        rtgp_protocol::header::assemble(&header, &[])
    }

    #[tokio::test]
    async fn connecting_registers_a_peer_and_fires_connected_event() {
        let (server, fake_client, server_addr) = server_and_fake_client().await;
        fake_client.send_to(&connect_datagram(), server_addr).await.unwrap();

        let mut buf = [0u8; 64];
        let (len, _from) = fake_client.recv_from(&mut buf).await.unwrap();
        assert_eq!(buf[1], rtgp_protocol::OpCode::SAccept.to_byte());
        let _ = len;

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut callbacks = ServerCallbacks::default();
        let connected = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = connected.clone();
        callbacks.on_connected = Some(Box::new(move |(_user_id, _addr)| {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
        }));
        server.poll(&mut callbacks);

        assert!(connected.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(server.client_count(), 1);
    }

    #[tokio::test]
    async fn unknown_user_id_egress_call_reports_unknown_peer() {
        let (server, _fake_client, _addr) = server_and_fake_client().await;
        let result = server.unicast_position_correction(999, SUpdatePos { x: 0.0, y: 0.0 }).await;
        assert!(matches!(result, Err(ServerError::UnknownPeer(999))));
    }
}
