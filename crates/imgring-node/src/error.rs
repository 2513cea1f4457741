//! Node-level error type.
//!
//! The run loop distinguishes two worlds: errors that tear down one
//! connection (logged, loop continues) never reach this type; everything
//! that does reach it is unrecoverable and exits the process nonzero -
//! a peer speaking another protocol version, an impossible message, an
//! unreachable ring peer.

use std::net::SocketAddrV4;

use thiserror::Error;

use crate::net::NetError;

/// Fatal node errors; the event loop returns these and the process exits.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Wire-format violation: wrong version or unassigned type byte.
    #[error("protocol error: {0}")]
    Protocol(#[from] imgring_proto::ProtocolError),

    /// A structurally valid message arrived where it cannot occur.
    #[error("unexpected {kind} message")]
    Unexpected {
        /// Message class that was received.
        kind: &'static str,
    },

    /// Could not bind a receiver socket.
    #[error("failed to bind receiver: {source}")]
    Bind {
        /// Underlying socket error.
        source: std::io::Error,
    },

    /// Accepting on a receiver failed.
    #[error("failed to accept connection: {source}")]
    Accept {
        /// Underlying socket error.
        source: std::io::Error,
    },

    /// Could not reach a ring peer. Broken fingers are not healed.
    #[error("failed to reach peer {peer}: {source}")]
    Connect {
        /// Peer we tried to reach.
        peer: SocketAddrV4,
        /// Underlying socket error.
        source: std::io::Error,
    },

    /// Could not resolve or reach the bootstrap target.
    #[error("bootstrap to {target} failed: {reason}")]
    Bootstrap {
        /// The `fqdn:port` we were given.
        target: String,
        /// What went wrong.
        reason: String,
    },

    /// A required exchange with a ring peer failed mid-stream.
    #[error("ring exchange failed: {0}")]
    Exchange(#[from] NetError),
}
