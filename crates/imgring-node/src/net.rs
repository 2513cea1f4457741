//! Thin transport helpers over TCP streams.
//!
//! Every packet in this protocol has a fixed size, so reading one is always
//! "read exactly `size_of::<T>()` bytes, then cast". A peer that closes the
//! socket before the packet is complete surfaces as [`NetError::PrematureClose`]
//! - an explicit result variant rather than a generic I/O error, because the
//! at-location exchanges branch on it: a closed connection there means the
//! forwarded message was accepted.

use std::net::SocketAddrV4;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use zerocopy::{FromBytes, Immutable, IntoBytes};

use crate::error::NodeError;

/// Transport-level read/write failures.
#[derive(Debug, Error)]
pub enum NetError {
    /// The peer closed the connection before a full packet arrived.
    #[error("peer closed the connection mid-packet")]
    PrematureClose,

    /// Any other socket failure.
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// Open a connection to a ring peer.
///
/// # Errors
///
/// `NodeError::Connect` - unreachable peers are fatal; broken fingers are
/// not healed.
pub async fn connect(peer: SocketAddrV4) -> Result<TcpStream, NodeError> {
    TcpStream::connect(peer).await.map_err(|source| NodeError::Connect { peer, source })
}

/// Read exactly one fixed-size packet.
///
/// Short reads are retried until the packet is complete or the peer closes
/// the socket, which is reported as [`NetError::PrematureClose`].
pub async fn read_packet<T>(stream: &mut TcpStream) -> Result<T, NetError>
where
    T: FromBytes,
{
    let mut buf = vec![0u8; std::mem::size_of::<T>()];
    match stream.read_exact(&mut buf).await {
        Ok(_) => {},
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(NetError::PrematureClose);
        },
        Err(err) => return Err(NetError::Io(err)),
    }

    // INVARIANT: the buffer is exactly size_of::<T>() bytes and T is an
    // alignment-1 FromBytes type, so the cast cannot fail.
    Ok(T::read_from_bytes(&buf)
        .ok()
        .unwrap_or_else(|| unreachable!("buffer sized to the packet layout")))
}

/// Write one fixed-size packet.
pub async fn write_packet<T>(stream: &mut TcpStream, packet: &T) -> Result<(), NetError>
where
    T: IntoBytes + Immutable,
{
    stream.write_all(packet.as_bytes()).await?;
    Ok(())
}
