//! A concrete `tokio`-backed implementation of the abstract async datagram
//! socket the RTGP protocol core depends on (§6.4).
//!
//! The core itself (`rtgp-protocol`) never imports this crate - it only
//! describes the [`AsyncDatagramSocket`] trait's shape in its specification.
//! `rtgp-client`/`rtgp-server` are generic over any type implementing this
//! trait, with [`UdpTransport`] as the implementation they ship by default.
//! This mirrors the split the teacher workspace draws between an abstract
//! session/IO layer and a concrete transport backend crate.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Errors a socket backend may report.
#[derive(Debug, Error)]
pub enum SocketError {
    /// `bind` failed to claim the requested (or any) local port.
    #[error("failed to bind to port {port}: {source}")]
    BindFailed {
        /// The port that was requested, `0` meaning "any".
        port: u16,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// A send operation failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] io::Error),
    /// A receive operation failed.
    #[error("receive failed: {0}")]
    RecvFailed(#[source] io::Error),
    /// The socket was closed and can no longer be used.
    #[error("socket is closed")]
    Closed,
    /// A pending operation was cancelled via [`AsyncDatagramSocket::cancel`].
    #[error("operation cancelled")]
    Cancelled,
}

/// The abstract async datagram socket the protocol core's orchestrators are
/// generic over (§6.4). The core itself never calls this trait directly -
/// it is implemented here and consumed by `rtgp-client`/`rtgp-server`.
///
/// Every method here corresponds one-to-one to a method on the original
/// C++ `IAsyncSocket` interface, translated from its callback-based shape
/// (`asyncSendTo(bytes, endpoint, callback)`) to a plain `async fn`
/// returning a `Result` - `async`/`await` is Rust's native equivalent of a
/// completion callback, so there is no `Future`-returning-a-`Future`
/// indirection to add on top.
pub trait AsyncDatagramSocket: Sized + Send + Sync + 'static {
    /// Binds a new socket to `port` (`0` for an OS-assigned ephemeral port).
    ///
    /// # Errors
    ///
    /// [`SocketError::BindFailed`] if the port could not be claimed.
    fn bind(port: u16) -> impl Future<Output = Result<Self, SocketError>> + Send;

    /// Whether the socket has not yet been [`close`](AsyncDatagramSocket::close)d.
    fn is_open(&self) -> bool;

    /// The local port this socket is bound to.
    ///
    /// # Errors
    ///
    /// [`SocketError::Closed`] if the socket has already been closed.
    fn local_port(&self) -> Result<u16, SocketError>;

    /// Sends `data` to `target`.
    ///
    /// # Errors
    ///
    /// [`SocketError::Closed`] if the socket is closed; [`SocketError::SendFailed`]
    /// on an OS-level send error.
    fn send_to(&self, data: &[u8], target: SocketAddr) -> impl Future<Output = Result<usize, SocketError>> + Send;

    /// Waits for the next datagram, writing it into `buf` and returning its
    /// length and source address.
    ///
    /// # Errors
    ///
    /// [`SocketError::Closed`] if the socket is closed; [`SocketError::RecvFailed`]
    /// on an OS-level receive error; [`SocketError::Cancelled`] if
    /// [`cancel`](AsyncDatagramSocket::cancel) was called while this was
    /// pending.
    fn recv_from(&self, buf: &mut [u8]) -> impl Future<Output = Result<(usize, SocketAddr), SocketError>> + Send;

    /// Wakes any pending [`recv_from`](AsyncDatagramSocket::recv_from) with
    /// [`SocketError::Cancelled`], without closing the socket.
    fn cancel(&self);

    /// Closes the socket. Idempotent.
    ///
    /// # Errors
    ///
    /// This implementation's `close` is infallible but returns a `Result`
    /// to match the abstract interface, which allows a backend's close to
    /// fail (e.g. flushing a buffered transport).
    fn close(&self) -> impl Future<Output = Result<(), SocketError>> + Send;
}

struct Inner {
    socket: UdpSocket,
    closed: AtomicBool,
    cancel: Notify,
}

/// [`AsyncDatagramSocket`] implementation backed by `tokio::net::UdpSocket`.
///
/// Cheaply [`Clone`]-able; clones share the same underlying socket and
/// cancellation signal.
#[derive(Clone)]
pub struct UdpTransport(Arc<Inner>);

impl AsyncDatagramSocket for UdpTransport {
    async fn bind(port: u16) -> Result<Self, SocketError> {
        let addr: SocketAddr = ([0, 0, 0, 0], port).into();
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| SocketError::BindFailed { port, source })?;
        debug!(port = socket.local_addr().ok().map(|a| a.port()), "udp socket bound");
        Ok(Self(Arc::new(Inner {
            socket,
            closed: AtomicBool::new(false),
            cancel: Notify::new(),
        })))
    }

    fn is_open(&self) -> bool {
        !self.0.closed.load(Ordering::Acquire)
    }

    fn local_port(&self) -> Result<u16, SocketError> {
        if !self.is_open() {
            return Err(SocketError::Closed);
        }
        self.0
            .socket
            .local_addr()
            .map(|addr| addr.port())
            .map_err(SocketError::RecvFailed)
    }

    async fn send_to(&self, data: &[u8], target: SocketAddr) -> Result<usize, SocketError> {
        if !self.is_open() {
            return Err(SocketError::Closed);
        }
        self.0
            .socket
            .send_to(data, target)
            .await
            .map_err(SocketError::SendFailed)
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), SocketError> {
        if !self.is_open() {
            return Err(SocketError::Closed);
        }
        tokio::select! {
            biased;
            () = self.0.cancel.notified() => Err(SocketError::Cancelled),
            result = self.0.socket.recv_from(buf) => result.map_err(SocketError::RecvFailed),
        }
    }

    fn cancel(&self) {
        self.0.cancel.notify_waiters();
    }

    async fn close(&self) -> Result<(), SocketError> {
        if self.0.closed.swap(true, Ordering::AcqRel) {
            warn!("socket closed twice");
        }
        self.0.cancel.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_and_receive_round_trip() {
        let server = UdpTransport::bind(0).await.unwrap();
        let client = UdpTransport::bind(0).await.unwrap();
        let server_addr: SocketAddr = ([127, 0, 0, 1], server.local_port().unwrap()).into();

        client.send_to(b"hello", server_addr).await.unwrap();

        let mut buf = [0u8; 16];
        let (len, _from) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"hello");
    }

    #[tokio::test]
    async fn cancel_wakes_pending_recv() {
        let socket = UdpTransport::bind(0).await.unwrap();
        let recv_socket = socket.clone();
        let handle = tokio::spawn(async move {
            let mut buf = [0u8; 16];
            recv_socket.recv_from(&mut buf).await
        });

        tokio::task::yield_now().await;
        socket.cancel();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(SocketError::Cancelled)));
    }

    #[tokio::test]
    async fn closed_socket_rejects_operations() {
        let socket = UdpTransport::bind(0).await.unwrap();
        socket.close().await.unwrap();
        assert!(!socket.is_open());
        assert!(matches!(socket.local_port(), Err(SocketError::Closed)));
        let target: SocketAddr = ([127, 0, 0, 1], 4242).into();
        assert!(matches!(
            socket.send_to(b"x", target).await,
            Err(SocketError::Closed)
        ));
    }
}
