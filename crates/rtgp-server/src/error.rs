//! Error taxonomy for the server orchestrator (§7's "internal" tier, the
//! slice of it that can surface directly from an API call).

use rtgp_net::SocketError;
use thiserror::Error;

/// Errors returned directly from a [`crate::Server`] API call.
///
/// Ingress-side failures (malformed datagrams, unregistered senders,
/// duplicate/stale sequence numbers) never reach here - per §7 those are
/// dropped and logged, not propagated to the caller.
#[derive(Debug, Error)]
pub enum ServerError {
    /// `user_id` named in a unicast call has no connected peer.
    #[error("no peer with user_id {0}")]
    UnknownPeer(u32),
    /// The underlying socket rejected the operation.
    #[error(transparent)]
    Socket(#[from] SocketError),
}
