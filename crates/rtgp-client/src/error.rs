//! Error taxonomy for the client orchestrator (§7's "internal" tier, the
//! slice of it that can surface directly from an API call).

use rtgp_protocol::InvalidStateTransition;
use rtgp_net::SocketError;
use thiserror::Error;

/// Errors returned directly from a [`crate::Client`] API call.
///
/// Ingress-side failures (malformed datagrams, duplicate/stale sequence
/// numbers) never reach here - per §7 those are dropped and logged, not
/// propagated to the caller.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A data-sending method was called while not [`rtgp_protocol::ConnectionState::Connected`].
    #[error("not connected")]
    NotConnected,
    /// `connect`/`disconnect` was called from a state that does not allow it.
    #[error(transparent)]
    InvalidState(#[from] InvalidStateTransition),
    /// The underlying socket rejected the operation.
    #[error(transparent)]
    Socket(#[from] SocketError),
}
