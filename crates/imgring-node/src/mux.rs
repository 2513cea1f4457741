//! Event multiplexer.
//!
//! One blocking readiness wait over everything the node listens to: the DHT
//! receiver, the image receiver, and the operator command channel. Each
//! [`EventMux::next`] call yields exactly one ready event; the caller handles
//! it to completion before waiting again, so all node state is mutated from
//! the one loop thread and no locking exists anywhere.
//!
//! Sources are registered at construction. The only re-registration is
//! [`EventMux::replace_dht`]: a REID tears down the DHT receiver and binds a
//! fresh one, and the next wait picks up the new socket.

use std::net::{SocketAddr, SocketAddrV4};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::error::NodeError;

/// Operator commands, fed by the stdin task (or a test harness).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Tear the node down cleanly.
    Shutdown,
    /// Log predecessor/successor ids and the finger table.
    Report,
}

/// One ready event from the multiplexer.
#[derive(Debug)]
pub enum Event {
    /// A peer connected to the DHT receiver.
    Dht(TcpStream, SocketAddr),
    /// An image client connected to the image receiver.
    Image(TcpStream, SocketAddr),
    /// An operator command arrived.
    Command(Command),
}

/// The node's registered event sources.
#[derive(Debug)]
pub struct EventMux {
    dht: TcpListener,
    image: TcpListener,
    commands: mpsc::Receiver<Command>,
}

impl EventMux {
    /// Register the two receivers and the command channel.
    #[must_use]
    pub fn new(dht: TcpListener, image: TcpListener, commands: mpsc::Receiver<Command>) -> Self {
        Self { dht, image, commands }
    }

    /// Block until one source is ready and return its event.
    ///
    /// A closed command channel (the operator hung up without saying `q`)
    /// degrades to a shutdown command.
    pub async fn next(&mut self) -> Result<Event, NodeError> {
        tokio::select! {
            cmd = self.commands.recv() => Ok(Event::Command(cmd.unwrap_or(Command::Shutdown))),
            res = self.dht.accept() => {
                let (stream, peer) = res.map_err(|source| NodeError::Accept { source })?;
                Ok(Event::Dht(stream, peer))
            },
            res = self.image.accept() => {
                let (stream, peer) = res.map_err(|source| NodeError::Accept { source })?;
                Ok(Event::Image(stream, peer))
            },
        }
    }

    /// Swap in a freshly bound DHT receiver (REID rebuild).
    pub fn replace_dht(&mut self, listener: TcpListener) {
        self.dht = listener;
    }

    /// Local address of the DHT receiver.
    pub fn dht_addr(&self) -> Result<SocketAddrV4, NodeError> {
        local_v4(&self.dht)
    }

    /// Local address of the image receiver.
    pub fn image_addr(&self) -> Result<SocketAddrV4, NodeError> {
        local_v4(&self.image)
    }
}

/// IPv4 local address of a listener. The node only ever binds IPv4.
pub fn local_v4(listener: &TcpListener) -> Result<SocketAddrV4, NodeError> {
    match listener.local_addr() {
        Ok(SocketAddr::V4(addr)) => Ok(addr),
        Ok(SocketAddr::V6(addr)) => Err(NodeError::Bind {
            source: std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                format!("receiver bound to IPv6 address {addr}"),
            ),
        }),
        Err(source) => Err(NodeError::Bind { source }),
    }
}
