//! Client orchestrator: one socket, one connection, a deferred event queue.
//!
//! [`state`] holds the pure, socket-free connection state; [`Client`] is the
//! thin async shell around it that owns a real [`AsyncDatagramSocket`],
//! spawns a background receive task, and exposes the public API. Shared
//! state lives behind a [`std::sync::Mutex`] that is never held across an
//! `.await` point - every critical section is a plain, synchronous call into
//! [`state::ClientState`].

pub mod config;
pub mod error;
pub mod events;
pub mod state;

use std::net::SocketAddr;
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tokio::task::JoinHandle;
use tracing::{trace, warn};

use rtgp_net::AsyncDatagramSocket;
use rtgp_protocol::ConnectionState;
use rtgp_protocol::diagnostics::Diagnostic;
use rtgp_protocol::header::MAX_DATAGRAM_SIZE;
use rtgp_protocol::payload::{BandwidthMode, CInput};

pub use config::ClientConfig;
pub use error::ClientError;
pub use events::{ClientCallbacks, ClientEvent};
pub use state::ClientState;

/// Wall-clock `now` for the protocol core's `Instant`-based timers.
fn now() -> Instant {
    Instant::now()
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A caller-supplied sink for [`Diagnostic`] events (§9; see
/// [`Client::set_diagnostic_sink`]).
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

/// One client connection to one RTGP server.
///
/// `S` is the socket backend - [`rtgp_net::UdpTransport`] in production,
/// swappable for a fake in tests.
pub struct Client<S: AsyncDatagramSocket> {
    socket: Arc<S>,
    state: Arc<Mutex<ClientState>>,
    events_tx: SyncSender<ClientEvent>,
    events_rx: Receiver<ClientEvent>,
    diagnostic_sink: Arc<Mutex<Option<DiagnosticSink>>>,
    recv_task: JoinHandle<()>,
}

fn spawn_recv_task<S: AsyncDatagramSocket>(
    socket: Arc<S>,
    state: Arc<Mutex<ClientState>>,
    events_tx: SyncSender<ClientEvent>,
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

            let server_addr = lock(&state).server_addr();
            if let Some(addr) = server_addr {
                for frame in outcome.to_send {
                    if let Err(error) = socket.send_to(&frame, addr).await {
                        warn!(%error, "failed to send queued frame from recv task");
                    }
                }
            }

            for event in outcome.events {
                if events_tx.try_send(event).is_err() {
                    warn!("event queue full or disconnected, dropping event");
                }
            }

            emit_diagnostics(&diagnostic_sink, outcome.diagnostics);
        }
    })
}

impl<S: AsyncDatagramSocket> Client<S> {
    /// Binds a fresh socket on `local_port` (`0` for an OS-assigned port)
    /// and readies a client, not yet connected to any server.
    ///
    /// # Errors
    ///
    /// Whatever [`AsyncDatagramSocket::bind`] returns.
    pub async fn new(local_port: u16, config: ClientConfig) -> Result<Self, ClientError> {
        let socket = Arc::new(S::bind(local_port).await?);
        let capacity = config.event_queue_capacity.max(1);
        let (events_tx, events_rx) = sync_channel(capacity);
        let state = Arc::new(Mutex::new(ClientState::new(config, now())));
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

    /// Installs `sink` to receive every [`Diagnostic`] this client raises
    /// from then on, in place of (or alongside) a `tracing` subscriber (§9).
    /// Replaces any previously installed sink.
    pub fn set_diagnostic_sink(&self, sink: impl Fn(Diagnostic) + Send + Sync + 'static) {
        *lock(&self.diagnostic_sink) = Some(Box::new(sink));
    }

    /// The local port this client's socket is bound to.
    ///
    /// # Errors
    ///
    /// [`ClientError::Socket`] if the socket has already been closed.
    pub fn local_port(&self) -> Result<u16, ClientError> {
        Ok(self.socket.local_port()?)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        lock(&self.state).state()
    }

    /// This client's server-assigned id, or [`rtgp_protocol::UNASSIGNED_USER_ID`]
    /// before the handshake completes.
    #[must_use]
    pub fn user_id(&self) -> u32 {
        lock(&self.state).user_id()
    }

    async fn send_now(&self, frame: Vec<u8>) -> Result<(), ClientError> {
        let Some(addr) = lock(&self.state).server_addr() else {
            return Err(ClientError::NotConnected);
        };
        self.socket.send_to(&frame, addr).await?;
        Ok(())
    }

    fn queue_events(&self, events: Vec<ClientEvent>) {
        for event in events {
            if self.events_tx.try_send(event).is_err() {
                warn!("event queue full or disconnected, dropping event");
            }
        }
    }

    /// Initiates the handshake with `server_addr`.
    ///
    /// # Errors
    ///
    /// [`ClientError::InvalidState`] unless currently disconnected;
    /// [`ClientError::Socket`] if the initial send fails.
    pub async fn connect(&self, server_addr: SocketAddr) -> Result<(), ClientError> {
        let frame = lock(&self.state).begin_connect(server_addr, now())?;
        self.socket.send_to(&frame, server_addr).await?;
        Ok(())
    }

    /// Initiates a graceful disconnect. A no-op if already disconnected or
    /// disconnecting.
    ///
    /// # Errors
    ///
    /// [`ClientError::Socket`] if the send fails.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        let frame = lock(&self.state).begin_disconnect(now());
        if let Some(frame) = frame {
            self.send_now(frame).await?;
        }
        Ok(())
    }

    /// Sends the current input bitmask (`C_INPUT`, unreliable).
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] unless currently connected.
    pub async fn send_input(&self, input: CInput) -> Result<(), ClientError> {
        let frame = lock(&self.state).send_input(input, now())?;
        self.send_now(frame).await
    }

    /// Sends a keepalive ping.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] unless currently connected.
    pub async fn ping(&self) -> Result<(), ClientError> {
        let frame = lock(&self.state).ping(now())?;
        self.send_now(frame).await
    }

    /// Signals ready/not-ready in the lobby.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] unless currently connected.
    pub async fn send_ready(&self, is_ready: bool) -> Result<(), ClientError> {
        let frame = lock(&self.state).send_ready(is_ready, now())?;
        self.send_now(frame).await
    }

    /// Sends a chat message, truncated to fit the wire's fixed 256-byte field.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] unless currently connected.
    pub async fn send_chat(&self, text: &str) -> Result<(), ClientError> {
        let frame = lock(&self.state).send_chat(text, now())?;
        self.send_now(frame).await
    }

    /// Requests the list of open lobbies.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] unless currently connected.
    pub async fn request_lobby_list(&self) -> Result<(), ClientError> {
        let frame = lock(&self.state).request_lobby_list(now())?;
        self.send_now(frame).await
    }

    /// Requests to join a lobby by its six-byte code.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] unless currently connected.
    pub async fn join_lobby(&self, code: [u8; 6]) -> Result<(), ClientError> {
        let frame = lock(&self.state).join_lobby(code, now())?;
        self.send_now(frame).await
    }

    /// Requests a bandwidth mode change.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] unless currently connected.
    pub async fn set_bandwidth_mode(&self, mode: BandwidthMode) -> Result<(), ClientError> {
        let frame = lock(&self.state).set_bandwidth_mode(mode, now())?;
        self.send_now(frame).await
    }

    /// Requests the connected user id list (`C_GET_USERS`).
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] unless currently connected.
    pub async fn request_users(&self) -> Result<(), ClientError> {
        let frame = lock(&self.state).request_users(now())?;
        self.send_now(frame).await
    }

    /// Advances lifecycle timers and reliable-channel retransmits. The
    /// application is expected to call this on a fixed interval (e.g. once
    /// per frame or once per `heartbeat_interval`).
    ///
    /// # Errors
    ///
    /// [`ClientError::Socket`] if a queued retransmit or retry send fails.
    pub async fn tick(&self) -> Result<(), ClientError> {
        let outcome = lock(&self.state).tick(now());
        if let Some(addr) = lock(&self.state).server_addr() {
            for frame in outcome.to_send {
                self.socket.send_to(&frame, addr).await?;
            }
        }
        self.queue_events(outcome.events);
        emit_diagnostics(&self.diagnostic_sink, outcome.diagnostics);
        Ok(())
    }

    /// Drains every event queued since the last call and runs `callbacks`
    /// against each of them, in arrival order.
    pub fn poll(&self, callbacks: &mut ClientCallbacks) {
        while let Ok(event) = self.events_rx.try_recv() {
            callbacks.dispatch(event);
        }
    }

    /// Closes the socket and stops the background receive task.
    pub async fn close(&self) {
        self.recv_task.abort();
        let _ = self.socket.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtgp_net::UdpTransport;

    async fn connected_pair() -> (Client<UdpTransport>, UdpTransport, SocketAddr) {
        let client = Client::<UdpTransport>::new(0, ClientConfig::default()).await.unwrap();
        let fake_server = UdpTransport::bind(0).await.unwrap();
        let server_addr: SocketAddr = ([127, 0, 0, 1], fake_server.local_port().unwrap()).into();
        (client, fake_server, server_addr)
    }

    #[tokio::test]
    async fn connect_receives_accept_and_fires_event() {
        let (client, fake_server, server_addr) = connected_pair().await;
        client.connect(server_addr).await.unwrap();

        let mut buf = [0u8; 64];
        let (len, client_addr) = fake_server.recv_from(&mut buf).await.unwrap();
        assert_eq!(buf[1], rtgp_protocol::OpCode::CConnect.to_byte());
        let _ = len;

        let accept_payload = rtgp_protocol::codec::encode_to_vec(&rtgp_protocol::payload::SAccept { new_user_id: 5 });
        let header = rtgp_protocol::Header::new(
            rtgp_protocol::OpCode::SAccept.to_byte(),
            4,
            rtgp_protocol::SERVER_USER_ID,
            0,
            0,
            rtgp_protocol::Flags::empty().with_reliable(true),
        );
        let datagram = rtgp_protocol::header::assemble(&header, &accept_payload);
        fake_server.send_to(&datagram, client_addr).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut callbacks = ClientCallbacks::default();
        let connected = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = connected.clone();
        callbacks.on_connected = Some(Box::new(move |_user_id| {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
        }));
        client.poll(&mut callbacks);

        assert!(connected.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(client.connection_state(), ConnectionState::Connected);
        assert_eq!(client.user_id(), 5);
    }

    #[tokio::test]
    async fn data_send_refuses_before_connected() {
        let (client, _fake_server, _addr) = connected_pair().await;
        let result = client.ping().await;
        assert!(matches!(result, Err(ClientError::NotConnected)));
    }
}
